//! The AI transform adapter seam.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use staging_core::{StyleParams, TransformError};

/// How the adapter says its payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Raw image bytes.
    Binary,
    /// Base64 text, optionally wrapped in a `data:` URI.
    Base64,
}

/// What an adapter hands back for one image.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub payload: Bytes,
    /// `None` means the encoding is sniffed from the payload.
    pub encoding: Option<PayloadEncoding>,
    pub quality_score: Option<f64>,
}

impl AdapterResponse {
    /// A response whose encoding is left to sniffing.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            encoding: None,
            quality_score: None,
        }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(payload).with_encoding(PayloadEncoding::Binary)
    }

    pub fn base64(payload: impl Into<Bytes>) -> Self {
        Self::new(payload).with_encoding(PayloadEncoding::Base64)
    }

    pub fn with_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_quality_score(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }
}

/// Result type for adapters.
pub type AdapterResult = Result<AdapterResponse, TransformError>;

/// Future type for async adapters.
pub type AdapterFuture = Pin<Box<dyn Future<Output = AdapterResult> + Send>>;

/// An external image-to-image model.
///
/// Responses are untrusted: the executor normalizes and decodes them before
/// anything is stored.
pub trait TransformAdapter: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Stage one room photo.
    fn transform(&self, image: Bytes, style: StyleParams) -> AdapterFuture;
}

/// A simple function-based adapter.
pub struct FnAdapter<F>
where
    F: Fn(Bytes, StyleParams) -> AdapterFuture + Send + Sync + 'static,
{
    name: String,
    transform: F,
}

impl<F> FnAdapter<F>
where
    F: Fn(Bytes, StyleParams) -> AdapterFuture + Send + Sync + 'static,
{
    /// Create a new function-based adapter.
    pub fn new(name: impl Into<String>, transform: F) -> Self {
        Self {
            name: name.into(),
            transform,
        }
    }
}

impl<F> TransformAdapter for FnAdapter<F>
where
    F: Fn(Bytes, StyleParams) -> AdapterFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, image: Bytes, style: StyleParams) -> AdapterFuture {
        (self.transform)(image, style)
    }
}

/// Helper macro for creating adapters from async closures.
#[macro_export]
macro_rules! transform_adapter {
    ($name:expr, |$image:ident, $style:ident| $body:expr) => {
        $crate::FnAdapter::new(
            $name,
            |$image: ::bytes::Bytes, $style: ::staging_core::StyleParams| {
                Box::pin(async move {
                    let result: $crate::AdapterResult = $body;
                    result
                }) as $crate::AdapterFuture
            },
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_adapter_forwards_image_and_style() {
        let adapter = transform_adapter!("echo", |image, style| {
            assert_eq!(style.style, "modern");
            Ok(AdapterResponse::binary(image).with_quality_score(0.85))
        });

        assert_eq!(adapter.name(), "echo");
        let style = StyleParams {
            style: "modern".into(),
            ..StyleParams::default()
        };
        let response = adapter
            .transform(Bytes::from_static(b"img"), style)
            .await
            .unwrap();
        assert_eq!(response.payload, Bytes::from_static(b"img"));
        assert_eq!(response.encoding, Some(PayloadEncoding::Binary));
        assert_eq!(response.quality_score, Some(0.85));
    }
}
