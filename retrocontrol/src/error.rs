//! Error types for playback control

use serde::Serialize;

use crate::player::ErrorClass;

pub type Result<T> = std::result::Result<T, ControlError>;

/// A player command could not be delivered
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("Player not ready")]
    NotReady,

    #[error("Player rejected command: {0}")]
    Rejected(String),

    #[error("Player gone")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Catalog has no channels")]
    NoChannels,

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] retroschedule::ScheduleError),

    #[error("Store error: {0}")]
    Store(#[from] retrostore::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ControlError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Why the supervisor gave up on a source or a clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlaybackFailure {
    /// One source failed; another one is being tried
    SourceUnplayable {
        source_id: String,
        class: ErrorClass,
    },
    /// Every source of the clip failed
    AllSourcesFailed,
    /// The buffer watchdog kept firing, hard reload included
    PlayerUnresponsive,
    /// Too many clips failed in a row; skipping paused for a while
    SkipBudgetExhausted,
}

impl std::fmt::Display for PlaybackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackFailure::SourceUnplayable { source_id, class } => {
                write!(f, "source {} unplayable ({:?})", source_id, class)
            }
            PlaybackFailure::AllSourcesFailed => write!(f, "all sources failed"),
            PlaybackFailure::PlayerUnresponsive => write!(f, "player unresponsive"),
            PlaybackFailure::SkipBudgetExhausted => write!(f, "skip budget exhausted"),
        }
    }
}
