//! Catalog loading: JSON snapshot first, remote API second.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::client::RetroApiClient;
use crate::error::{CatalogError, Result};
use crate::models::CatalogDocument;

/// Parses a catalog document (API or exported snapshot shape) and normalizes it.
pub fn parse_catalog(json: &str) -> Result<Catalog> {
    let document: CatalogDocument = serde_json::from_str(json)?;
    Ok(Catalog::from_document(document))
}

#[derive(Debug, Clone, Default)]
pub struct CatalogLoader {
    snapshot: Option<PathBuf>,
    remote: Option<(RetroApiClient, String)>,
}

impl CatalogLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, path: impl AsRef<Path>) -> Self {
        self.snapshot = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_remote(mut self, client: RetroApiClient, url: impl Into<String>) -> Self {
        self.remote = Some((client, url.into()));
        self
    }

    pub fn snapshot(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Loads the catalog.
    ///
    /// A source is accepted only if it yields at least one channel; failures
    /// of the snapshot are logged and the remote is tried next.
    ///
    /// # Errors
    ///
    /// [`CatalogError::CatalogUnavailable`] when no source yields a
    /// non-empty channel list.
    pub async fn load(&self) -> Result<Catalog> {
        let mut reasons = Vec::new();

        if let Some(path) = &self.snapshot {
            match self.load_snapshot(path).await {
                Ok(catalog) if !catalog.is_empty() => {
                    info!(
                        path = %path.display(),
                        channels = catalog.len(),
                        "Catalog loaded from snapshot"
                    );
                    return Ok(catalog);
                }
                Ok(_) => {
                    warn!(path = %path.display(), "Snapshot has no channels");
                    reasons.push(format!("{}: no channels", path.display()));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read catalog snapshot");
                    reasons.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        if let Some((client, url)) = &self.remote {
            match client.fetch_catalog(url).await {
                Ok(document) => {
                    let catalog = Catalog::from_document(document);
                    if !catalog.is_empty() {
                        info!(url = %url, channels = catalog.len(), "Catalog loaded from API");
                        return Ok(catalog);
                    }
                    warn!(url = %url, "Catalog API returned no channels");
                    reasons.push(format!("{}: no channels", url));
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Catalog API request failed");
                    reasons.push(format!("{}: {}", url, e));
                }
            }
        }

        if reasons.is_empty() {
            return Err(CatalogError::unavailable("no catalog source configured"));
        }
        Err(CatalogError::unavailable(reasons.join("; ")))
    }

    async fn load_snapshot(&self, path: &Path) -> Result<Catalog> {
        let content = tokio::fs::read_to_string(path).await?;
        parse_catalog(&content)
    }
}
