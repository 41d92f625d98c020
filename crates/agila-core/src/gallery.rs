//! `features.csv`: the flat file of enrolled embeddings.
//!
//! One row per embedding: `"name","f0",...,"f{D-1}"`, every field quoted.
//! Recognition scans the whole file linearly.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use thiserror::Error;

use crate::types::{Embedding, FaceRecord};

const NAME_COLUMN: &str = "name";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery I/O: {0}")]
    Io(#[from] io::Error),
    #[error("gallery CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("gallery line {line}: {message}")]
    Parse { line: u64, message: String },
    #[error("embedding has {got} dimensions, gallery stores {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("no embeddings to append")]
    Empty,
}

/// Handle to the gallery file. Reads and appends are serialized.
pub struct FeatureStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FeatureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded state is the file itself; a panicked writer leaves
        // nothing in memory to repair.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append every embedding as a row labelled `name`, creating the file
    /// (with header) on first use.
    pub fn append(&self, name: &str, embeddings: &[Embedding]) -> Result<(), GalleryError> {
        let dim = embeddings.first().map(Embedding::dim).ok_or(GalleryError::Empty)?;
        if let Some(bad) = embeddings.iter().find(|e| e.dim() != dim) {
            return Err(GalleryError::DimensionMismatch {
                expected: dim,
                got: bad.dim(),
            });
        }

        let _guard = self.guard();

        let existing_dim = self.stored_dimension()?;
        if let Some(expected) = existing_dim {
            if expected != dim {
                return Err(GalleryError::DimensionMismatch { expected, got: dim });
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(file);

        if existing_dim.is_none() {
            let mut header = vec![NAME_COLUMN.to_string()];
            header.extend((0..dim).map(|i| format!("f{i}")));
            writer.write_record(&header)?;
        }

        for embedding in embeddings {
            let mut row = Vec::with_capacity(dim + 1);
            row.push(name.to_string());
            row.extend(embedding.values.iter().map(f32::to_string));
            writer.write_record(&row)?;
        }
        writer.flush()?;

        tracing::info!(
            path = %self.path.display(),
            name,
            rows = embeddings.len(),
            "appended embeddings to gallery"
        );
        Ok(())
    }

    /// Load every record. `None` when the file does not exist yet.
    pub fn load(&self) -> Result<Option<Vec<FaceRecord>>, GalleryError> {
        let _guard = self.guard();

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut records = Vec::new();

        for row in reader.records() {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);

            let mut fields = row.iter();
            let name = fields.next().unwrap_or_default().to_string();
            let values = fields
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| GalleryError::Parse {
                    line,
                    message: e.to_string(),
                })?;

            records.push(FaceRecord {
                name,
                embedding: Embedding::new(values),
            });
        }

        tracing::debug!(path = %self.path.display(), rows = records.len(), "loaded gallery");
        Ok(Some(records))
    }

    /// Number of stored rows; 0 when the file is absent.
    pub fn len(&self) -> Result<usize, GalleryError> {
        Ok(self.load()?.map(|r| r.len()).unwrap_or(0))
    }

    /// Embedding width declared by the header, or `None` for a missing or
    /// empty file. Caller holds the lock.
    fn stored_dimension(&self) -> Result<Option<usize>, GalleryError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let header = reader.headers()?;
        if header.get(0) != Some(NAME_COLUMN) {
            return Err(GalleryError::Parse {
                line: 1,
                message: format!("first column must be '{NAME_COLUMN}'"),
            });
        }
        Ok(Some(header.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FeatureStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path().join("features.csv"));
        (dir, store)
    }

    #[test]
    fn test_load_missing_file() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_append_creates_quoted_header() {
        let (_dir, store) = store();
        store
            .append("Ana Cruz", &[Embedding::new(vec![0.5, -1.0, 2.25])])
            .unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(r#""name","f0","f1","f2""#));
        assert_eq!(lines.next(), Some(r#""Ana Cruz","0.5","-1","2.25""#));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_append_twice_keeps_single_header() {
        let (_dir, store) = store();
        store.append("ana", &[Embedding::new(vec![1.0, 0.0])]).unwrap();
        store
            .append("ben", &[Embedding::new(vec![0.0, 1.0]), Embedding::new(vec![0.1, 0.9])])
            .unwrap();

        let records = store.load().unwrap().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["ana", "ben", "ben"]);
        assert_eq!(records[2].embedding.values, vec![0.1, 0.9]);
    }

    #[test]
    fn test_append_rejects_dimension_change() {
        let (_dir, store) = store();
        store.append("ana", &[Embedding::new(vec![1.0, 0.0])]).unwrap();
        let err = store.append("ben", &[Embedding::new(vec![1.0, 0.0, 0.0])]);
        assert!(matches!(
            err,
            Err(GalleryError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_append_rejects_mixed_batch() {
        let (_dir, store) = store();
        let err = store.append(
            "ana",
            &[Embedding::new(vec![1.0, 0.0]), Embedding::new(vec![1.0])],
        );
        assert!(matches!(err, Err(GalleryError::DimensionMismatch { .. })));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_append_empty_batch() {
        let (_dir, store) = store();
        assert!(matches!(store.append("ana", &[]), Err(GalleryError::Empty)));
    }

    #[test]
    fn test_load_unquoted_file() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "name,f0,f1\nana,1.0,2e-3\n").unwrap();
        let records = store.load().unwrap().unwrap();
        assert_eq!(records[0].name, "ana");
        assert_eq!(records[0].embedding.values, vec![1.0, 0.002]);
    }

    #[test]
    fn test_load_bad_number_names_line() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "name,f0\nana,1.0\nben,oops\n").unwrap();
        match store.load() {
            Err(GalleryError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_append_to_empty_file_writes_header() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "").unwrap();
        store.append("ana", &[Embedding::new(vec![1.0])]).unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with(r#""name","f0""#));
    }
}
