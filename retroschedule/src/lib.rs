//! # retroschedule - pseudo-live schedule for RetroTV
//!
//! Every channel is an endless loop over its playlist, started at the global
//! broadcast epoch. This crate answers "what is on air, and how far in":
//!
//! - [`engine`]: the pure schedule function ([`compute_position`]) and its
//!   manual-mode counterpart ([`compute_manual`])
//! - [`store`]: per-channel timeline/manual state ([`BroadcastStore`]),
//!   persisted and observable
//! - [`watcher`]: a reactive [`PositionView`] of one channel
//!   ([`PositionWatcher`])
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use retrocatalog::{Channel, Clip, Source};
//! use retroschedule::compute_position;
//!
//! let clip = |id: &str, d: f64| Clip::new(id, vec![Source::new(id, "primary")], d);
//! let z = Channel::new("z", "Z", vec![clip("a", 10.0), clip("b", 20.0), clip("c", 30.0)]);
//! let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//!
//! let pos = compute_position(t0, t0 + chrono::TimeDelta::seconds(75), &z);
//! assert_eq!(pos.clip_index, Some(1));
//! assert_eq!(pos.offset, 5.0);
//! ```

pub mod engine;
pub mod error;
pub mod state;
pub mod store;
pub mod watcher;

#[cfg(feature = "retroconfig")]
pub mod config_ext;

pub use engine::{compute_manual, compute_position, elapsed_seconds, SchedulePosition};
pub use error::{Result, ScheduleError};
pub use state::{BroadcastMode, ChannelState, ManualAnchor, ManualPolicy};
pub use store::{BroadcastStore, StateChanged, BROADCAST_STATE_KEY};
pub use watcher::{PositionView, PositionWatcher};

#[cfg(feature = "retroconfig")]
pub use config_ext::BroadcastConfigExt;
