use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parley_common::{Error, Result};
use reqwest::Client;
use tracing::debug;

/// Marker for an image reference that already carries base64 data.
pub const BASE64_SCHEME: &str = "base64://";
/// Marker for a local file reference.
pub const FILE_SCHEME: &str = "file://";
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Turn an image reference into an inline `data:image/jpeg;base64,` URL.
///
/// `base64://` payloads are relabelled without re-encoding. Everything else is
/// read from disk; remote URLs must be fetched to a local path beforehand.
pub async fn encode_image(reference: &str) -> Result<String> {
    if let Some(payload) = reference.strip_prefix(BASE64_SCHEME) {
        return Ok(format!("{JPEG_DATA_URL_PREFIX}{payload}"));
    }

    let path = reference.strip_prefix(FILE_SCHEME).unwrap_or(reference);
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read image {path}: {e}"),
        ))
    })?;
    debug!(path, bytes = bytes.len(), "encoded image");
    Ok(format!("{JPEG_DATA_URL_PREFIX}{}", BASE64.encode(bytes)))
}

pub fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Resolves remote image URLs to local files. The returned file is deleted
/// once its contents have been inlined into a turn.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PathBuf>;
}

/// Downloads images over HTTP into a local directory.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
    dir: PathBuf,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self::with_dir(std::env::temp_dir())
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: None,
                message: format!("failed to download image {url}: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(Error::Upstream {
                status: Some(response.status().as_u16()),
                message: format!("failed to download image {url}"),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::Upstream {
            status: None,
            message: format!("failed to read image body from {url}: {e}"),
        })?;

        let path = self
            .dir
            .join(format!("parley-image-{}.jpg", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &bytes).await?;
        debug!(url, path = %path.display(), "downloaded image");
        Ok(path)
    }
}
