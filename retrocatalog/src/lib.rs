//! # retrocatalog - channel catalog and broadcast epoch for RetroTV
//!
//! This crate provides the two read-only inputs of the pseudo-live schedule:
//!
//! - the [`Catalog`]: channels, each an ordered playlist of clips with
//!   alternate sources and an authoritative duration
//! - the global broadcast epoch, resolved by the [`EpochProvider`]
//!
//! # Catalog sources
//!
//! [`CatalogLoader`] reads a JSON snapshot first and falls back to the
//! remote API. Both the API shape (`channels[].clips[].sources[]`) and the
//! exported snapshot shape (`channels[].items[].youtubeId`) are accepted.
//! Durations are normalized (300 s when missing or not positive) and clips
//! with no playable source are dropped.
//!
//! ```no_run
//! use retrocatalog::CatalogLoader;
//!
//! # #[tokio::main]
//! # async fn main() -> retrocatalog::Result<()> {
//! let catalog = CatalogLoader::new().with_snapshot("channels.json").load().await?;
//! for channel in catalog.get_channels() {
//!     println!("{}: {} clips, {:.0}s", channel.name(), channel.len(), channel.total_duration());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Extension
//!
//! With the `retroconfig` feature (default), [`CatalogConfigExt`] builds the
//! loader and the epoch source from the application configuration.

pub mod catalog;
pub mod client;
pub mod epoch;
pub mod error;
pub mod loader;
pub mod models;

#[cfg(feature = "retroconfig")]
pub mod config_ext;

pub use catalog::{
    normalize_duration, Catalog, CatalogInfo, Channel, Clip, Source, DEFAULT_CLIP_DURATION_SECS,
};
pub use client::{ClientBuilder, RetroApiClient};
pub use epoch::{
    format_epoch, parse_epoch_str, EpochOrigin, EpochProvider, EpochResolution, EpochSource,
    HttpEpochSource, EPOCH_STORE_KEY,
};
pub use error::{CatalogError, Result};
pub use loader::{parse_catalog, CatalogLoader};

#[cfg(feature = "retroconfig")]
pub use config_ext::CatalogConfigExt;
