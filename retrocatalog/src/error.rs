//! Error types for catalog loading and epoch resolution

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Neither the snapshot nor the remote API yielded a non-empty channel list
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API answered with a non-success status
    #[error("API error: {0}")]
    ApiError(String),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Local persistence failed
    #[error("Store error: {0}")]
    Store(#[from] retrostore::StoreError),

    /// Epoch value that is neither RFC 3339 nor a millisecond timestamp
    #[error("Invalid epoch: {0}")]
    InvalidEpoch(String),

    /// No remote endpoint configured
    #[error("No remote endpoint configured for {0}")]
    NoRemote(&'static str),

    /// Configuration error (from retroconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CatalogError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::CatalogUnavailable(msg.into())
    }
}
