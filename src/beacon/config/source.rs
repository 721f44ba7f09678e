// SPDX-License-Identifier: MIT

//! Where configuration documents come from

use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

use crate::eval::error::{ConfigError, ValidationError};

/// A validated configuration location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Fetched by the host's [`ConfigFetcher`]
    Remote(Url),
    /// Read from the local filesystem
    File(PathBuf),
}

impl ConfigSource {
    /// Accepts `https://` and `file://` URLs only
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidConfigUrl {
            url: input.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(input).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "https" => {
                if url.host_str().map_or(true, str::is_empty) {
                    return Err(invalid("missing host"));
                }
                Ok(ConfigSource::Remote(url))
            }
            "file" => url
                .to_file_path()
                .map(ConfigSource::File)
                .map_err(|_| invalid("not a local file path")),
            other => Err(invalid(&format!(
                "unsupported scheme '{}', expected https or file",
                other
            ))),
        }
    }

    /// File extension used to pick the document format
    pub fn extension(&self) -> Option<String> {
        let path = match self {
            ConfigSource::Remote(url) => PathBuf::from(url.path()),
            ConfigSource::File(path) => path.clone(),
        };
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Remote(url) => write!(f, "{}", url),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Host-supplied transport for remote configuration documents.
///
/// The engine never opens network connections itself.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    /// Return the raw document body at `url`
    async fn fetch(&self, url: &Url) -> Result<String, ConfigError>;
}
