//! # Image processing handler.
//!
//! Reads the uploaded object, checks its format by magic bytes, runs an opaque
//! [`Transform`] and writes the artifact under `output_prefix + key`.
//!
//! Failure modes: object missing, unsupported format, transform error, write error.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::broker::Message;
use crate::error::{HandlerError, StoreError};
use crate::external::ObjectStore;
use crate::handlers::handler::BatchContext;
use crate::handlers::per_message::MessageHandler;

/// Pixel-level transformation applied to a validated image.
pub type Transform = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

/// Image formats accepted by [`ImageProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    /// Detects the format from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        })
    }
}

/// Validates and transforms uploaded images.
pub struct ImageProcessor {
    store: Arc<dyn ObjectStore>,
    output_prefix: String,
    transform: Transform,
}

impl ImageProcessor {
    /// Identity transform, artifacts under `processed/`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            output_prefix: "processed/".into(),
            transform: Arc::new(|bytes: &[u8]| -> Result<Vec<u8>, String> { Ok(bytes.to_vec()) }),
        }
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Key of the artifact produced for `key`.
    pub fn output_key(&self, key: &str) -> String {
        format!("{}{}", self.output_prefix, key)
    }
}

#[async_trait]
impl MessageHandler for ImageProcessor {
    fn name(&self) -> &str {
        "image-processor"
    }

    async fn handle_message(
        &self,
        message: &Message,
        _ctx: &BatchContext,
    ) -> Result<(), HandlerError> {
        let key = &message.event.key;
        let bytes = self.store.read(key).await.map_err(|e| match e {
            StoreError::NotFound { key } => HandlerError::ObjectMissing { key },
            other => HandlerError::failed(other.to_string()),
        })?;

        let format = ImageFormat::sniff(&bytes).ok_or_else(|| HandlerError::UnsupportedFormat {
            key: key.clone(),
            detail: message
                .event
                .content_type
                .clone()
                .unwrap_or_else(|| "unrecognized signature".into()),
        })?;

        let output = (self.transform)(&bytes).map_err(|error| HandlerError::Transform {
            key: key.clone(),
            error,
        })?;

        let out_key = self.output_key(key);
        self.store
            .write(&out_key, output)
            .await
            .map_err(|e| HandlerError::Write {
                key: out_key.clone(),
                error: e.to_string(),
            })?;

        debug!(key = %key, %format, output = %out_key, "image processed");
        Ok(())
    }
}
