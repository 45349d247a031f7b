//! Wire models for the catalog and epoch documents
//!
//! Two catalog shapes are accepted:
//!
//! - the API shape: `{ channels: [{ id, name, clips: [{ id, sources: [{ id, label }],
//!   durationSeconds, title? }] }] }`
//! - the exported snapshot shape: `{ version, generatedAt, channels: [{ _id, name,
//!   playlistStartEpoch, items: [{ _id, title, youtubeId, duration, year, tags,
//!   category }] }] }`
//!
//! Both deserialize into the same structures through field aliases;
//! normalization into the immutable [`crate::Catalog`] happens in
//! [`crate::catalog`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Catalog document
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    /// Snapshot version (milliseconds timestamp in exported snapshots)
    #[serde(default)]
    pub version: Option<i64>,
    /// Snapshot generation time, as written by the exporter
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelDocument>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDocument {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "items")]
    pub clips: Vec<ClipDocument>,
    #[serde(default, alias = "playlistStartEpoch")]
    pub created_at_epoch: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipDocument {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<SourceDocument>>,
    /// Single embedded-player id carried by exported snapshots
    #[serde(default)]
    pub youtube_id: Option<String>,
    /// Number or numeric string; anything else falls back to the default duration
    #[serde(default, alias = "duration")]
    pub duration_seconds: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourceDocument {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl ClipDocument {
    /// Reads the duration field as seconds, if it holds a number.
    pub fn raw_duration(&self) -> Option<f64> {
        match self.duration_seconds.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

// ============================================================================
// Epoch document
// ============================================================================

/// Response of the epoch endpoint: `{ "epoch": "2024-01-01T00:00:00Z" }`.
///
/// A bare millisecond timestamp is accepted too.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EpochDocument {
    pub epoch: EpochValue,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EpochValue {
    Iso(String),
    Millis(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_shape() {
        let doc: CatalogDocument = serde_json::from_str(
            r#"{"channels":[{"id":"z","name":"Zed","clips":[
                {"id":"a","sources":[{"id":"yt-a","label":"primary"}],"durationSeconds":10}
            ]}]}"#,
        )
        .unwrap();
        let clip = &doc.channels[0].clips[0];
        assert_eq!(clip.id.as_deref(), Some("a"));
        assert_eq!(clip.raw_duration(), Some(10.0));
        assert_eq!(clip.sources.as_ref().unwrap()[0].id, "yt-a");
    }

    #[test]
    fn test_snapshot_shape() {
        let doc: CatalogDocument = serde_json::from_str(
            r#"{"version":1700000000000,"generatedAt":"2024-01-01T00:00:00Z","channels":[
                {"_id":"665f","name":"Retro Hits","playlistStartEpoch":"2020-01-01T00:00:00Z",
                 "items":[{"_id":"i1","title":"Song","youtubeId":"abc123","duration":"212",
                           "year":2003,"tags":null,"category":"songs"}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(doc.version, Some(1_700_000_000_000));
        let channel = &doc.channels[0];
        assert_eq!(channel.id, "665f");
        assert_eq!(channel.created_at_epoch.as_deref(), Some("2020-01-01T00:00:00Z"));
        let clip = &channel.clips[0];
        assert_eq!(clip.youtube_id.as_deref(), Some("abc123"));
        assert_eq!(clip.raw_duration(), Some(212.0));
        assert_eq!(clip.tags, None);
    }

    #[test]
    fn test_epoch_document_variants() {
        let iso: EpochDocument = serde_json::from_str(r#"{"epoch":"2024-01-01T00:00:00Z"}"#).unwrap();
        assert!(matches!(iso.epoch, EpochValue::Iso(_)));
        let ms: EpochDocument = serde_json::from_str(r#"{"epoch":1704067200000}"#).unwrap();
        assert!(matches!(ms.epoch, EpochValue::Millis(1_704_067_200_000)));
    }
}
