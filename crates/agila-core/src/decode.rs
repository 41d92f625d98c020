//! Data-URL image decoding and the crop/resize helpers shared by the handlers.

use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

use crate::types::PixelBox;

/// Standard alphabet, padding optional. Browsers always pad, but hand-built
/// payloads often do not.
const DATA_URL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("empty image payload")]
    Empty,
    #[error("not a data URL: missing ',' separator")]
    MissingSeparator,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("empty crop region")]
    EmptyCrop,
}

/// Extract the raw encoded bytes from a `"<header>,<base64>"` data URL.
pub fn data_url_bytes(data_url: &str) -> Result<Vec<u8>, ImageError> {
    if data_url.trim().is_empty() {
        return Err(ImageError::Empty);
    }
    let (_header, encoded) = data_url
        .split_once(',')
        .ok_or(ImageError::MissingSeparator)?;
    let bytes = DATA_URL_BASE64.decode(encoded.trim())?;
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    Ok(bytes)
}

/// Decode a data URL into an 8-bit RGB image. Any format the `image` crate
/// can sniff is accepted.
pub fn decode_data_url(data_url: &str) -> Result<RgbImage, ImageError> {
    let bytes = data_url_bytes(data_url)?;
    let img = image::load_from_memory(&bytes)?;
    tracing::trace!(width = img.width(), height = img.height(), "decoded data URL image");
    Ok(img.to_rgb8())
}

/// Bilinear resize to exactly `width` × `height`, ignoring aspect ratio.
pub fn resize_exact(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// Copy out the region under `region`, clamped to the image bounds.
pub fn crop_box(img: &RgbImage, region: PixelBox) -> Result<RgbImage, ImageError> {
    let x = region.x.min(img.width());
    let y = region.y.min(img.height());
    let width = region.width.min(img.width() - x);
    let height = region.height.min(img.height() - y);
    if width == 0 || height == 0 {
        return Err(ImageError::EmptyCrop);
    }
    Ok(imageops::crop_imm(img, x, y, width, height).to_image())
}
