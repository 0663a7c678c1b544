//! Process-wide IdP metadata cache.
//!
//! Metadata is fetched on first use, parsed, and kept until explicitly
//! invalidated. Concurrent misses for the same location may both fetch; the
//! writes are idempotent, so no lock is held across the fetch.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use url::Url;

use super::{SamlError, idp_metadata::IdpMetadata};

/// Get-or-fetch access to IdP metadata by location.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn get(&self, location: &str) -> Result<Arc<IdpMetadata>, SamlError>;
}

enum MetadataSource {
    File(PathBuf),
    Remote(Url),
}

pub struct MetadataCache {
    http_client: reqwest::Client,
    entries: DashMap<String, Arc<IdpMetadata>>,
    require_https: bool,
}

impl MetadataCache {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            entries: DashMap::new(),
            require_https: true,
        }
    }

    /// Whether remote metadata must be served over HTTPS (default: true).
    pub fn with_require_https(mut self, require_https: bool) -> Self {
        self.require_https = require_https;
        self
    }

    /// Cached metadata for `location`, without fetching.
    pub fn cached(&self, location: &str) -> Option<Arc<IdpMetadata>> {
        self.entries.get(location).map(|entry| entry.value().clone())
    }

    /// Drop the cached entry for `location`. Returns whether one existed.
    pub fn invalidate(&self, location: &str) -> bool {
        let removed = self.entries.remove(location).is_some();
        if removed {
            tracing::info!(location = %location, "Invalidated cached IdP metadata");
        }
        removed
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
        tracing::info!("Cleared IdP metadata cache");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn classify(&self, location: &str) -> Result<MetadataSource, SamlError> {
        let unavailable = |reason: String| SamlError::MetadataUnavailable {
            location: location.to_string(),
            reason,
        };

        match Url::parse(location) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(MetadataSource::File)
                .map_err(|_| unavailable("invalid file URL".to_string())),
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if self.require_https {
                    crate::validation::url::require_https(location).map_err(|e| {
                        unavailable(format!("metadata URL must use HTTPS: {e}"))
                    })?;
                }
                Ok(MetadataSource::Remote(url))
            }
            // Windows drive letters parse as one-letter schemes
            Ok(url) if url.scheme().len() > 1 => {
                Err(unavailable(format!("unsupported scheme '{}'", url.scheme())))
            }
            _ => Ok(MetadataSource::File(PathBuf::from(location))),
        }
    }

    async fn fetch(&self, location: &str) -> Result<String, SamlError> {
        let unavailable = |reason: String| SamlError::MetadataUnavailable {
            location: location.to_string(),
            reason,
        };

        match self.classify(location)? {
            MetadataSource::File(path) => {
                tracing::debug!(path = %path.display(), "Reading SAML IdP metadata file");
                tokio::fs::read_to_string(&path).await.map_err(|e| {
                    tracing::error!(error = %e, path = %path.display(), "Failed to read SAML metadata");
                    unavailable(e.to_string())
                })
            }
            MetadataSource::Remote(url) => {
                tracing::debug!(url = %url, "Fetching SAML IdP metadata");

                let response = self.http_client.get(url.clone()).send().await.map_err(|e| {
                    tracing::error!(error = %e, url = %url, "Failed to fetch SAML metadata");
                    unavailable(e.to_string())
                })?;

                if !response.status().is_success() {
                    let status = response.status();
                    tracing::error!(status = %status, url = %url, "SAML metadata endpoint returned error");
                    return Err(unavailable(format!("HTTP {status}")));
                }

                response.text().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to read SAML metadata response");
                    unavailable(e.to_string())
                })
            }
        }
    }
}

#[async_trait]
impl MetadataProvider for MetadataCache {
    async fn get(&self, location: &str) -> Result<Arc<IdpMetadata>, SamlError> {
        if let Some(metadata) = self.cached(location) {
            return Ok(metadata);
        }

        let metadata_xml = self.fetch(location).await?;
        let metadata = Arc::new(IdpMetadata::parse(&metadata_xml).inspect_err(|e| {
            tracing::error!(error = %e, location = %location, "Failed to parse SAML metadata");
        })?);

        self.entries.insert(location.to_string(), metadata.clone());
        tracing::info!(
            location = %location,
            entity_id = %metadata.entity_id(),
            "Cached IdP metadata"
        );
        Ok(metadata)
    }
}
