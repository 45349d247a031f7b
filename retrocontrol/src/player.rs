//! Capability interface to the embedded video player.
//!
//! The player is an opaque, asynchronous actor: commands return quickly and
//! their effects are reported later as [`PlayerEvent`]s. Only the
//! supervisor holds a [`PlayerBackend`]; everything else sees its effects
//! through [`crate::TvEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PlayerError;

/// State reported by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl PlayerState {
    /// Maps the IFrame API state numbers (-1, 0, 1, 2, 3, 5).
    pub fn from_iframe_state(code: i32) -> Option<Self> {
        match code {
            -1 => Some(PlayerState::Unstarted),
            0 => Some(PlayerState::Ended),
            1 => Some(PlayerState::Playing),
            2 => Some(PlayerState::Paused),
            3 => Some(PlayerState::Buffering),
            5 => Some(PlayerState::Cued),
            _ => None,
        }
    }

    /// States in which autoplay has not started yet
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            PlayerState::Unstarted | PlayerState::Cued | PlayerState::Paused
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Retrying the same source cannot help
    Permanent,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerErrorCode {
    NotFound,
    NotEmbeddable,
    InvalidId,
    Html5Failure,
    Restricted,
    Timeout,
    Unknown(i32),
}

impl PlayerErrorCode {
    /// Maps the IFrame API error numbers; unknown numbers stay transient.
    pub fn from_iframe_code(code: i32) -> Self {
        match code {
            2 => PlayerErrorCode::InvalidId,
            5 => PlayerErrorCode::Html5Failure,
            100 => PlayerErrorCode::NotFound,
            101 | 150 => PlayerErrorCode::NotEmbeddable,
            other => PlayerErrorCode::Unknown(other),
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            PlayerErrorCode::NotFound
            | PlayerErrorCode::NotEmbeddable
            | PlayerErrorCode::InvalidId
            | PlayerErrorCode::Html5Failure
            | PlayerErrorCode::Restricted => ErrorClass::Permanent,
            PlayerErrorCode::Timeout | PlayerErrorCode::Unknown(_) => ErrorClass::Transient,
        }
    }

    pub fn is_permanent(self) -> bool {
        self.class() == ErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Ready,
    StateChange(PlayerState),
    Error(PlayerErrorCode),
}

/// Identifies one supervisor lifetime.
///
/// Every supervisor takes a fresh token and binds it to the player; events
/// carrying another token come from a previous lifetime and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LifecycleToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl LifecycleToken {
    pub fn next() -> Self {
        LifecycleToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LifecycleToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Player event tagged with the lifetime it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerEnvelope {
    pub token: LifecycleToken,
    pub event: PlayerEvent,
}

impl PlayerEnvelope {
    pub fn new(token: LifecycleToken, event: PlayerEvent) -> Self {
        Self { token, event }
    }
}

/// Commands understood by the embedded player.
///
/// `load` starts playback of `source_id` at `start_offset` seconds; outcomes
/// arrive later as events tagged with the token given to `bind`.
pub trait PlayerBackend: Send + Sync {
    /// Tags subsequent events with `token`
    fn bind(&self, token: LifecycleToken) -> Result<(), PlayerError> {
        let _ = token;
        Ok(())
    }

    fn load(&self, source_id: &str, start_offset: f64) -> Result<(), PlayerError>;

    fn play(&self) -> Result<(), PlayerError>;

    fn pause(&self) -> Result<(), PlayerError>;

    fn seek_to(&self, offset: f64) -> Result<(), PlayerError>;

    fn mute(&self) -> Result<(), PlayerError>;

    fn unmute(&self) -> Result<(), PlayerError>;

    /// `volume` in `[0, 1]`
    fn set_volume(&self, volume: f64) -> Result<(), PlayerError>;

    /// Playback position in seconds within the loaded source
    fn current_offset(&self) -> Result<f64, PlayerError>;

    fn state(&self) -> Result<PlayerState, PlayerError>;
}
