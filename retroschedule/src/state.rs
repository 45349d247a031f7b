//! Per-channel broadcast state

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastMode {
    /// Position follows the global epoch
    Timeline,
    /// Position follows an anchor set by a viewer action
    Manual,
}

impl std::fmt::Display for BroadcastMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastMode::Timeline => write!(f, "timeline"),
            BroadcastMode::Manual => write!(f, "manual"),
        }
    }
}

/// "Clip `clip_index` was at `offset_at_anchor_seconds` at `anchored_at_wallclock`"
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAnchor {
    pub clip_index: usize,
    pub offset_at_anchor_seconds: f64,
    pub anchored_at_wallclock: DateTime<Utc>,
}

/// State of one channel.
///
/// `manual_anchor` is present iff `mode` is [`BroadcastMode::Manual`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub channel_id: String,
    pub mode: BroadcastMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_anchor: Option<ManualAnchor>,
    /// When the viewer last asked for manual playback; anchor rotations keep it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_observed_clip_index: Option<usize>,
    #[serde(default)]
    pub last_observed_offset_seconds: f64,
    pub updated_at: DateTime<Utc>,
}

impl ChannelState {
    pub fn timeline(channel_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.into(),
            mode: BroadcastMode::Timeline,
            manual_anchor: None,
            manual_since: None,
            last_observed_clip_index: None,
            last_observed_offset_seconds: 0.0,
            updated_at: now,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.mode == BroadcastMode::Manual
    }

    /// Checks the mode/anchor pairing.
    pub fn is_consistent(&self) -> bool {
        match self.mode {
            BroadcastMode::Timeline => self.manual_anchor.is_none(),
            BroadcastMode::Manual => self.manual_anchor.is_some(),
        }
    }

    pub(crate) fn enter_manual(&mut self, anchor: ManualAnchor, now: DateTime<Utc>) {
        self.mode = BroadcastMode::Manual;
        self.manual_anchor = Some(anchor);
        self.manual_since = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn enter_timeline(&mut self, now: DateTime<Utc>) {
        self.mode = BroadcastMode::Timeline;
        self.manual_anchor = None;
        self.manual_since = None;
        self.updated_at = now;
    }
}

/// When a channel in manual mode goes back to the timeline on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManualPolicy {
    /// Manual until the viewer switches channel or returns to live
    #[default]
    Sticky,
    /// Back to the timeline once manual mode has lasted this long
    IdleTimeout(Duration),
}

impl ManualPolicy {
    /// `0` selects [`ManualPolicy::Sticky`].
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            ManualPolicy::Sticky
        } else {
            ManualPolicy::IdleTimeout(Duration::from_secs(secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_serialized_shape() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut state = ChannelState::timeline("z", now);
        state.enter_manual(
            ManualAnchor {
                clip_index: 2,
                offset_at_anchor_seconds: 0.0,
                anchored_at_wallclock: now,
            },
            now,
        );
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["mode"], "manual");
        assert_eq!(json["manualAnchor"]["clipIndex"], 2);
        assert!(state.is_consistent());

        state.enter_timeline(now);
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("manualAnchor").is_none());
        assert!(state.is_consistent());
    }

    #[test]
    fn test_policy_from_secs() {
        assert_eq!(ManualPolicy::from_secs(0), ManualPolicy::Sticky);
        assert_eq!(
            ManualPolicy::from_secs(90),
            ManualPolicy::IdleTimeout(Duration::from_secs(90))
        );
    }
}
