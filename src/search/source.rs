//! Where feature store files come from.
//!
//! A source hands out raw bytes by file name. The store decides how to parse
//! them, so the same loader works for a local data directory and for a
//! static file server.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Errors that can occur while reading a feature store file.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to read {name}: {message}")]
    Io { name: String, message: String },

    #[error("failed to fetch {name}: {message}")]
    Http { name: String, message: String },
}

#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Read the complete contents of `name`.
    async fn read(&self, name: &str) -> Result<Vec<u8>, SourceError>;

    /// Human readable location, used in logs.
    fn describe(&self) -> String;
}

/// Files in a local directory.
pub struct LocalSource {
    dir: PathBuf,
}

impl LocalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FeatureSource for LocalSource {
    async fn read(&self, name: &str) -> Result<Vec<u8>, SourceError> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(SourceError::Io {
                name: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Files published under a base URL, e.g. a static asset server.
pub struct HttpSource {
    base_url: url::Url,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let invalid = |message: String| SourceError::Http {
            name: base_url.to_string(),
            message,
        };

        // a trailing slash makes `join` append instead of replacing the last segment
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = url::Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl FeatureSource for HttpSource {
    async fn read(&self, name: &str) -> Result<Vec<u8>, SourceError> {
        let url = self.base_url.join(name).map_err(|e| SourceError::Http {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        log::debug!("fetching {url}");

        let http_err = |message: String| SourceError::Http {
            name: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| http_err(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.to_string()));
        }
        if !response.status().is_success() {
            return Err(http_err(format!("status {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| http_err(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.base_url.to_string()
    }
}
