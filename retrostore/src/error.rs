//! Error types for the local key-value sink

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Value larger than the per-key quota
    #[error("Value for key '{key}' is {size} bytes, quota is {limit} bytes")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    /// Key cannot be mapped to a storage slot
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
