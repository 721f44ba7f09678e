//! Configuration loader - JSON and YAML document parsing
//!
//! Picks the format from the source's file extension and falls back to YAML,
//! which also accepts JSON documents.

use super::source::{ConfigFetcher, ConfigSource};
use super::types::ConfigDocument;
use crate::eval::error::ConfigError;

/// Loads configuration documents from a [`ConfigSource`]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Read and parse the document at `source`. Remote sources need a fetcher.
    pub async fn load(
        &self,
        source: &ConfigSource,
        fetcher: Option<&dyn ConfigFetcher>,
    ) -> Result<ConfigDocument, ConfigError> {
        let content = match source {
            ConfigSource::File(path) => tokio::fs::read_to_string(path).await?,
            ConfigSource::Remote(url) => match fetcher {
                Some(fetcher) => fetcher.fetch(url).await?,
                None => {
                    return Err(ConfigError::Fetch(format!(
                        "no fetcher registered for {}",
                        url
                    )))
                }
            },
        };
        log::debug!("Loaded {} bytes of configuration from {}", content.len(), source);
        Self::parse(&content, source.extension().as_deref())
    }

    /// Parse by extension: `json` uses the JSON parser, anything else YAML
    pub fn parse(content: &str, extension: Option<&str>) -> Result<ConfigDocument, ConfigError> {
        match extension {
            Some("json") => Self::parse_json(content),
            _ => Self::parse_yaml(content),
        }
    }

    /// Parse a configuration document from a JSON string
    pub fn parse_json(content: &str) -> Result<ConfigDocument, ConfigError> {
        let doc: ConfigDocument = serde_json::from_str(content)?;
        Ok(doc)
    }

    /// Parse a configuration document from a YAML string
    pub fn parse_yaml(content: &str) -> Result<ConfigDocument, ConfigError> {
        let doc: ConfigDocument = serde_yaml::from_str(content)?;
        Ok(doc)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
