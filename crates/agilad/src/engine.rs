use agila_core::{AnalyzerError, BoundingBox, Embedding, FaceAnalyzer};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, AnalyzerError>>,
    },
    Embed {
        faces: Vec<RgbImage>,
        reply: oneshot::Sender<Vec<Result<Embedding, AnalyzerError>>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect faces in `image`, highest confidence first.
    pub async fn detect(&self, image: RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Extract one embedding per face crop. Each crop succeeds or fails on
    /// its own; only a dead engine fails the whole batch.
    pub async fn embed_many(
        &self,
        faces: Vec<RgbImage>,
    ) -> Result<Vec<Result<Embedding, EngineError>>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                faces,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let results = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(results
            .into_iter()
            .map(|r| r.map_err(EngineError::from))
            .collect())
    }
}

/// Spawn the engine on a dedicated OS thread that owns `analyzer`.
///
/// Inference sessions need exclusive access and are CPU-bound, so requests
/// are queued (up to `queue_depth`) and served one at a time.
pub fn spawn_engine(
    mut analyzer: Box<dyn FaceAnalyzer + Send>,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("agila-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let result = analyzer.detect(&image);
                        if let Ok(faces) = &result {
                            tracing::debug!(
                                width = image.width(),
                                height = image.height(),
                                faces = faces.len(),
                                "detect"
                            );
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Embed { faces, reply } => {
                        let results: Vec<_> = faces.iter().map(|face| analyzer.embed(face)).collect();
                        tracing::debug!(
                            crops = faces.len(),
                            ok = results.iter().filter(|r| r.is_ok()).count(),
                            "embed"
                        );
                        let _ = reply.send(results);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agila_core::detector::DetectorError;
    use image::Rgb;

    struct CountingAnalyzer;

    impl FaceAnalyzer for CountingAnalyzer {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
            if image.width() == 1 {
                return Err(DetectorError::EmptyImage.into());
            }
            Ok(vec![BoundingBox {
                x: 1.0,
                y: 2.0,
                width: 3.0,
                height: 4.0,
                confidence: 0.9,
                landmarks: None,
            }])
        }

        fn embed(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError> {
            if face.width() == 1 {
                return Err(DetectorError::EmptyImage.into());
            }
            Ok(Embedding::new(vec![face.width() as f32]))
        }
    }

    #[tokio::test]
    async fn test_detect_roundtrip() {
        let engine = spawn_engine(Box::new(CountingAnalyzer), 2).unwrap();
        let faces = engine.detect(RgbImage::new(10, 10)).await.unwrap();
        assert_eq!(faces.len(), 1);
        assert!(engine.detect(RgbImage::new(1, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_embed_many_keeps_per_crop_failures() {
        let engine = spawn_engine(Box::new(CountingAnalyzer), 2).unwrap();
        let crops = vec![
            RgbImage::from_pixel(5, 5, Rgb([0, 0, 0])),
            RgbImage::new(1, 1),
            RgbImage::new(7, 7),
        ];
        let results = engine.embed_many(crops).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().values, vec![5.0]);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().values, vec![7.0]);
    }
}
