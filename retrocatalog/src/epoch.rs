//! Global broadcast epoch.
//!
//! Every channel and every viewer share one epoch, the instant "broadcast
//! started". [`EpochProvider::get_epoch`] resolves it in this order:
//!
//! 1. in-memory cache
//! 2. local mirror in the key-value sink ([`EPOCH_STORE_KEY`])
//! 3. remote epoch endpoint (the answer is mirrored locally)
//! 4. the local clock, recorded in the mirror so later sessions agree
//!
//! Once resolved, the epoch is never changed by the core.
//! [`EpochProvider::refresh_from_remote`] is the only way to pick up an
//! administrative reset.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use retrostore::KeyValueStore;
use retroutils::SharedClock;
use tracing::{debug, info, warn};

use crate::client::RetroApiClient;
use crate::error::{CatalogError, Result};
use crate::models::EpochValue;

/// Key of the local epoch mirror
pub const EPOCH_STORE_KEY: &str = "retrotv.epoch";

/// Parses an epoch written as RFC 3339 or as a millisecond timestamp.
pub fn parse_epoch_str(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    if let Ok(ms) = raw.parse::<i64>() {
        return millis_to_epoch(ms);
    }
    Err(CatalogError::InvalidEpoch(raw.to_string()))
}

pub(crate) fn epoch_from_value(value: &EpochValue) -> Result<DateTime<Utc>> {
    match value {
        EpochValue::Iso(s) => parse_epoch_str(s),
        EpochValue::Millis(ms) => millis_to_epoch(*ms),
    }
}

fn millis_to_epoch(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CatalogError::InvalidEpoch(ms.to_string()))
}

/// Canonical text form used in the local mirror.
pub fn format_epoch(epoch: DateTime<Utc>) -> String {
    epoch.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Where a resolved epoch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochOrigin {
    Memory,
    LocalMirror,
    Remote,
    /// No stored or remote epoch; the local clock was used (soft warning)
    LocalClockFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochResolution {
    pub epoch: DateTime<Utc>,
    pub origin: EpochOrigin,
}

/// Remote supplier of the epoch
#[async_trait]
pub trait EpochSource: Send + Sync {
    async fn fetch_epoch(&self) -> Result<DateTime<Utc>>;
}

/// Epoch endpoint answering `{ "epoch": <ISO 8601> }`
#[derive(Debug, Clone)]
pub struct HttpEpochSource {
    client: RetroApiClient,
    url: String,
}

impl HttpEpochSource {
    pub fn new(client: RetroApiClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EpochSource for HttpEpochSource {
    async fn fetch_epoch(&self) -> Result<DateTime<Utc>> {
        self.client.fetch_epoch(&self.url).await
    }
}

pub struct EpochProvider {
    cache: Mutex<Option<DateTime<Utc>>>,
    store: Arc<dyn KeyValueStore>,
    remote: Option<Arc<dyn EpochSource>>,
    clock: SharedClock,
}

impl std::fmt::Debug for EpochProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochProvider")
            .field("cache", &self.cached())
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

impl EpochProvider {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: SharedClock) -> Self {
        Self {
            cache: Mutex::new(None),
            store,
            remote: None,
            clock,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn EpochSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Cached epoch, if already resolved
    pub fn cached(&self) -> Option<DateTime<Utc>> {
        *self.cache.lock().expect("EpochProvider mutex poisoned")
    }

    /// Resolves the epoch. Never fails: the local clock is the last resort.
    pub async fn get_epoch(&self) -> EpochResolution {
        if let Some(epoch) = self.cached() {
            return EpochResolution {
                epoch,
                origin: EpochOrigin::Memory,
            };
        }

        if let Some(epoch) = self.read_mirror() {
            debug!(epoch = %format_epoch(epoch), "Epoch restored from local mirror");
            self.remember(epoch);
            return EpochResolution {
                epoch,
                origin: EpochOrigin::LocalMirror,
            };
        }

        if let Some(remote) = &self.remote {
            match remote.fetch_epoch().await {
                Ok(epoch) => {
                    info!(epoch = %format_epoch(epoch), "Epoch fetched from remote");
                    self.write_mirror(epoch);
                    self.remember(epoch);
                    return EpochResolution {
                        epoch,
                        origin: EpochOrigin::Remote,
                    };
                }
                Err(e) => warn!(error = %e, "Epoch fetch failed"),
            }
        }

        let epoch = self.clock.now();
        warn!(
            epoch = %format_epoch(epoch),
            "Epoch unavailable, starting the broadcast timeline from the local clock"
        );
        self.write_mirror(epoch);
        self.remember(epoch);
        EpochResolution {
            epoch,
            origin: EpochOrigin::LocalClockFallback,
        }
    }

    /// Re-reads the remote epoch and adopts it if it differs from the cached one.
    ///
    /// Returns the new epoch when it changed.
    pub async fn refresh_from_remote(&self) -> Result<Option<DateTime<Utc>>> {
        let remote = self.remote.as_ref().ok_or(CatalogError::NoRemote("epoch"))?;
        let epoch = remote.fetch_epoch().await?;
        if self.cached() == Some(epoch) {
            return Ok(None);
        }
        info!(epoch = %format_epoch(epoch), "Epoch reset by remote");
        self.write_mirror(epoch);
        self.remember(epoch);
        Ok(Some(epoch))
    }

    fn remember(&self, epoch: DateTime<Utc>) {
        *self.cache.lock().expect("EpochProvider mutex poisoned") = Some(epoch);
    }

    fn read_mirror(&self) -> Option<DateTime<Utc>> {
        match self.store.get(EPOCH_STORE_KEY) {
            Ok(Some(raw)) => match parse_epoch_str(&raw) {
                Ok(epoch) => Some(epoch),
                Err(e) => {
                    warn!(error = %e, "Ignoring corrupt epoch mirror");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Cannot read epoch mirror");
                None
            }
        }
    }

    fn write_mirror(&self, epoch: DateTime<Utc>) {
        if let Err(e) = self.store.set(EPOCH_STORE_KEY, &format_epoch(epoch)) {
            warn!(error = %e, "Cannot persist epoch mirror");
        }
    }
}
