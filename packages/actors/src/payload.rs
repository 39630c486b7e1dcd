//! Image payload sniffing and normalization.
//!
//! Adapters are inconsistent about whether they return raw image bytes or
//! base64 text. Everything that leaves this module is raw bytes with a known
//! image format.

use std::io::Cursor;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bytes::Bytes;
use staging_core::TransformError;

use crate::adapter::PayloadEncoding;

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Image formats recognised by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
            ImageKind::Bmp => "image/bmp",
        }
    }

    fn format(&self) -> image::ImageFormat {
        match self {
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Gif => image::ImageFormat::Gif,
            ImageKind::Webp => image::ImageFormat::WebP,
            ImageKind::Bmp => image::ImageFormat::Bmp,
        }
    }
}

/// Identify an image by its signature.
pub fn sniff(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(ImageKind::Png)
    } else if bytes.starts_with(b"GIF8") {
        Some(ImageKind::Gif)
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else if bytes.starts_with(b"BM") {
        Some(ImageKind::Bmp)
    } else {
        None
    }
}

/// Image header facts, read without decoding pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

/// Sniff an upload and read its dimensions from the header.
pub fn probe(bytes: &[u8]) -> Option<ImageInfo> {
    let kind = sniff(bytes)?;
    let (width, height) = image::ImageReader::with_format(Cursor::new(bytes), kind.format())
        .into_dimensions()
        .ok()?;
    Some(ImageInfo {
        kind,
        width,
        height,
    })
}

/// Raw image bytes of a known format.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Bytes,
    pub kind: ImageKind,
}

/// Turn an adapter payload into raw image bytes.
///
/// An explicit encoding is honored; without one a recognised signature means
/// binary and anything else is tried as base64.
pub fn normalize(
    payload: Bytes,
    encoding: Option<PayloadEncoding>,
) -> Result<NormalizedImage, TransformError> {
    if payload.is_empty() {
        return Err(TransformError::MalformedResponse(
            "empty payload".to_string(),
        ));
    }

    let bytes = match encoding {
        Some(PayloadEncoding::Binary) => payload,
        Some(PayloadEncoding::Base64) => decode_base64(&payload)?,
        None if sniff(&payload).is_some() => payload,
        None => decode_base64(&payload)?,
    };

    let kind = sniff(&bytes).ok_or_else(|| {
        TransformError::MalformedResponse("payload is not a recognised image".to_string())
    })?;

    Ok(NormalizedImage { bytes, kind })
}

/// Fully decode an image to prove it is usable. CPU bound.
pub fn verify_decodes(image: &NormalizedImage) -> Result<(u32, u32), TransformError> {
    let decoded = image::load_from_memory_with_format(&image.bytes, image.kind.format())
        .map_err(|e| TransformError::MalformedResponse(e.to_string()))?;
    Ok((decoded.width(), decoded.height()))
}

fn decode_base64(payload: &[u8]) -> Result<Bytes, TransformError> {
    let text = match payload.strip_prefix(b"data:") {
        Some(uri) => {
            let comma = uri.iter().position(|b| *b == b',').ok_or_else(|| {
                TransformError::MalformedResponse("data URI without payload".to_string())
            })?;
            &uri[comma + 1..]
        }
        None => payload,
    };

    let cleaned: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    LENIENT_BASE64
        .decode(cleaned)
        .map(Bytes::from)
        .map_err(|e| TransformError::MalformedResponse(format!("invalid base64 payload: {e}")))
}
