//! Immutable in-memory catalog.
//!
//! A [`Catalog`] is built once per load from a [`CatalogDocument`] and never
//! mutated afterwards; channels are shared as `Arc<Channel>` so that the
//! schedule engine, the broadcast store and the supervisor can all hold the
//! channel they work on without copying clip lists.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{CatalogDocument, ChannelDocument, ClipDocument};
use crate::parse_epoch_str;

/// Duration assumed for clips whose duration is missing or not positive.
pub const DEFAULT_CLIP_DURATION_SECS: f64 = 300.0;

/// Normalizes a raw duration: missing, non-finite or ≤ 0 gives the default,
/// anything positive is raised to at least one second.
pub fn normalize_duration(raw: Option<f64>) -> f64 {
    match raw {
        Some(d) if d.is_finite() && d > 0.0 => d.max(1.0),
        _ => DEFAULT_CLIP_DURATION_SECS,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    /// Identifier handed to the embedded player
    pub id: String,
    pub label: String,
}

impl Source {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    /// Ordered alternates; the first one is the primary
    pub sources: Vec<Source>,
    /// Authoritative for scheduling, always ≥ 1
    pub duration_seconds: f64,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

impl Clip {
    pub fn new(id: impl Into<String>, sources: Vec<Source>, duration_seconds: f64) -> Self {
        Self {
            id: id.into(),
            sources,
            duration_seconds: normalize_duration(Some(duration_seconds)),
            title: None,
            year: None,
            tags: Vec::new(),
            category: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn primary_source(&self) -> Option<&Source> {
        self.sources.first()
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    id: String,
    name: String,
    clips: Vec<Clip>,
    created_at_epoch: Option<DateTime<Utc>>,
    total_duration: f64,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, clips: Vec<Clip>) -> Self {
        let total_duration = clips.iter().map(|c| c.duration_seconds).sum();
        Self {
            id: id.into(),
            name: name.into(),
            clips,
            created_at_epoch: None,
            total_duration,
        }
    }

    pub fn with_created_at_epoch(mut self, at: DateTime<Utc>) -> Self {
        self.created_at_epoch = Some(at);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clips in broadcast order
    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn clip(&self, index: usize) -> Option<&Clip> {
        self.clips.get(index)
    }

    pub fn clip_index(&self, clip_id: &str) -> Option<usize> {
        self.clips.iter().position(|c| c.id == clip_id)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Sum of clip durations, in seconds (0 for an empty channel)
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Sum of the durations of the clips before `index`
    pub fn start_of(&self, index: usize) -> f64 {
        self.clips
            .iter()
            .take(index)
            .map(|c| c.duration_seconds)
            .sum()
    }

    pub fn created_at_epoch(&self) -> Option<DateTime<Utc>> {
        self.created_at_epoch
    }
}

/// Provenance of a loaded snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub version: Option<i64>,
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    channels: Vec<Arc<Channel>>,
    index: HashMap<String, usize>,
    info: CatalogInfo,
}

impl Catalog {
    /// Builds a catalog from channels in broadcast order.
    ///
    /// Duplicate channel ids keep their first occurrence.
    pub fn new(channels: Vec<Channel>) -> Self {
        Self::with_info(channels, CatalogInfo::default())
    }

    pub fn with_info(channels: Vec<Channel>, info: CatalogInfo) -> Self {
        let mut ordered = Vec::with_capacity(channels.len());
        let mut index = HashMap::with_capacity(channels.len());

        for channel in channels {
            if index.contains_key(channel.id()) {
                warn!(channel = %channel.id(), "Duplicate channel id, keeping the first one");
                continue;
            }
            index.insert(channel.id().to_string(), ordered.len());
            ordered.push(Arc::new(channel));
        }

        Self {
            channels: ordered,
            index,
            info,
        }
    }

    /// Normalizes a wire document.
    ///
    /// Clips without any playable source are dropped; durations are
    /// normalized with [`normalize_duration`].
    pub fn from_document(document: CatalogDocument) -> Self {
        let info = CatalogInfo {
            version: document.version,
            generated_at: document.generated_at,
        };
        let channels = document
            .channels
            .into_iter()
            .filter(|c| !c.id.trim().is_empty())
            .map(channel_from_document)
            .collect();
        Self::with_info(channels, info)
    }

    pub fn get_channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn get_channel(&self, id: &str) -> Option<Arc<Channel>> {
        self.index.get(id).map(|&i| self.channels[i].clone())
    }

    pub fn first_channel(&self) -> Option<Arc<Channel>> {
        self.channels.first().cloned()
    }

    /// Channel after `id` in catalog order, wrapping around.
    ///
    /// An unknown id yields the first channel.
    pub fn next_channel_id(&self, id: &str) -> Option<&str> {
        if self.channels.is_empty() {
            return None;
        }
        let next = match self.index.get(id) {
            Some(&i) => (i + 1) % self.channels.len(),
            None => 0,
        };
        Some(self.channels[next].id())
    }

    /// Channel before `id` in catalog order, wrapping around.
    ///
    /// An unknown id yields the last channel.
    pub fn previous_channel_id(&self, id: &str) -> Option<&str> {
        let len = self.channels.len();
        if len == 0 {
            return None;
        }
        let previous = match self.index.get(id) {
            Some(&i) => (i + len - 1) % len,
            None => len - 1,
        };
        Some(self.channels[previous].id())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn info(&self) -> &CatalogInfo {
        &self.info
    }
}

fn channel_from_document(doc: ChannelDocument) -> Channel {
    let channel_id = doc.id.trim().to_string();
    let total = doc.clips.len();

    let clips: Vec<Clip> = doc
        .clips
        .into_iter()
        .enumerate()
        .filter_map(|(i, clip)| clip_from_document(&channel_id, i, clip))
        .collect();

    if clips.len() != total {
        warn!(
            channel = %channel_id,
            dropped = total - clips.len(),
            "Dropped clips without a playable source"
        );
    }
    debug!(channel = %channel_id, clips = clips.len(), "Normalized channel");

    let name = if doc.name.trim().is_empty() {
        channel_id.clone()
    } else {
        doc.name
    };

    let mut channel = Channel::new(channel_id, name, clips);
    if let Some(raw) = doc.created_at_epoch.as_deref() {
        match parse_epoch_str(raw) {
            Ok(at) => channel = channel.with_created_at_epoch(at),
            Err(_) => debug!(value = raw, "Ignoring unparsable channel epoch"),
        }
    }
    channel
}

fn clip_from_document(channel_id: &str, position: usize, doc: ClipDocument) -> Option<Clip> {
    let duration_seconds = normalize_duration(doc.raw_duration());

    let mut sources: Vec<Source> = doc
        .sources
        .unwrap_or_default()
        .into_iter()
        .filter(|s| !s.id.trim().is_empty())
        .enumerate()
        .map(|(i, s)| {
            let label = s
                .label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| default_label(i));
            Source::new(s.id.trim(), label)
        })
        .collect();

    if let Some(yt) = doc.youtube_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if !sources.iter().any(|s| s.id == yt) {
            let label = default_label(sources.len());
            sources.push(Source::new(yt, label));
        }
    }

    if sources.is_empty() {
        return None;
    }

    let id = doc
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{}-{}", channel_id, position));

    Some(Clip {
        id,
        sources,
        duration_seconds,
        title: doc.title.filter(|t| !t.trim().is_empty()),
        year: doc.year,
        tags: doc.tags.unwrap_or_default(),
        category: doc.category,
    })
}

fn default_label(index: usize) -> String {
    if index == 0 {
        "primary".to_string()
    } else {
        format!("alternate {}", index)
    }
}
