//! Shared helpers for the RetroTV crates.
//!
//! - [`clock`]: the wall-clock abstraction every scheduling and timer
//!   computation goes through, with a manually driven clock for tests.
//! - [`time_utils`]: conversions between seconds, `Duration`s and the
//!   `HH:MM:SS` form used in logs and countdowns.

pub mod clock;
pub mod time_utils;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use time_utils::{after, format_hhmmss, format_hhmmss_f64, seconds_between, secs_to_duration};
