//! # retrocontrol - playback control for RetroTV
//!
//! Keeps an embedded video player in step with the pseudo-live schedule of
//! [`retroschedule`], and turns viewer intents into schedule changes.
//!
//! ## Architecture
//!
//! - [`PlayerBackend`]: capability interface of the embedded player. Its
//!   events come back as [`PlayerEnvelope`]s tagged with the
//!   [`LifecycleToken`] of the supervisor that bound it; stale ones are
//!   dropped.
//! - [`PlayerSupervisor`]: reconciles the player with the desired clip and
//!   offset, owns every playback timer ([`TimerScope`]), the muted-autoplay
//!   protocol ([`AutoplayGuard`]) and the error policy ([`SourceFallback`],
//!   retries, skips).
//! - [`ChannelController`]: power, channel up/down, jumps and volume;
//!   builds one supervisor per channel selection.
//! - [`SessionStore`]: last selection, restored at startup.
//! - [`TvRuntime`]: drives a controller on a dedicated thread.
//! - [`TvEventBus`]: [`TvEvent`] notifications for the UI.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use retrocontrol::{ChannelController, TvEvent, TvRuntime};
//!
//! let controller = ChannelController::new(catalog, store, player, clock.clone());
//! let runtime = TvRuntime::new(controller, clock);
//! let events = runtime.controller().subscribe();
//! runtime.start()?;
//!
//! runtime.controller().power_on()?;
//! while let Ok(event) = events.recv() {
//!     if let TvEvent::PlaybackStart { clip_id } = event {
//!         println!("now playing {}", clip_id);
//!     }
//! }
//! ```

pub mod autoplay;
pub mod controller;
pub mod error;
pub mod events;
pub mod fallback;
pub mod player;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod supervisor;
pub mod timers;

#[cfg(feature = "retroconfig")]
pub mod config_ext;

pub use autoplay::AutoplayGuard;
pub use controller::ChannelController;
pub use error::{ControlError, PlaybackFailure, PlayerError, Result};
pub use events::{TvEvent, TvEventBus};
pub use fallback::SourceFallback;
pub use player::{
    ErrorClass, LifecycleToken, PlayerBackend, PlayerEnvelope, PlayerErrorCode, PlayerEvent,
    PlayerState,
};
pub use runtime::TvRuntime;
pub use session::{SessionSelection, SessionStore, SESSION_KEY};
pub use settings::SupervisorSettings;
pub use supervisor::{DesiredClip, Lifecycle, LoadedClip, PlayerSupervisor, SupervisorSnapshot};
pub use timers::{TimerKind, TimerScope};

#[cfg(feature = "retroconfig")]
pub use config_ext::PlaybackConfigExt;
