//! Error types for the broadcast state store

pub type Result<T> = std::result::Result<T, ScheduleError>;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Clip {clip_index} out of range for channel {channel_id} ({len} clips)")]
    ClipOutOfRange {
        channel_id: String,
        clip_index: usize,
        len: usize,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] retrostore::StoreError),

    #[error("{0}")]
    Other(String),
}

impl ScheduleError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
