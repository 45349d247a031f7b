//! Last viewing session: channel, clip, volume and power state.
//!
//! Saved through the throttled writer on every relevant change and flushed on
//! shutdown. Restoring never fails: missing or corrupt data just means a
//! fresh session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use retrostore::{KeyValueStore, ThrottledWriter};
use retroutils::SharedClock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

pub const SESSION_KEY: &str = "retrotv.session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSelection {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub clip_index: Option<usize>,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub power_on: bool,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

fn default_volume() -> f64 {
    1.0
}

impl Default for SessionSelection {
    fn default() -> Self {
        Self {
            channel_id: None,
            clip_index: None,
            volume: default_volume(),
            power_on: false,
            saved_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    writer: Arc<ThrottledWriter>,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(writer: Arc<ThrottledWriter>, clock: SharedClock) -> Self {
        Self { writer, clock }
    }

    /// Throttled save. Storage errors are logged, never raised.
    pub fn save(&self, selection: &SessionSelection) {
        if let Err(e) = self.try_save(selection) {
            warn!(error = %e, "Cannot save session");
        }
    }

    fn try_save(&self, selection: &SessionSelection) -> Result<()> {
        let mut selection = selection.clone();
        selection.saved_at = Some(self.clock.now());
        let json = serde_json::to_string(&selection)?;
        let written = self.writer.write(SESSION_KEY, &json)?;
        debug!(written, channel = ?selection.channel_id, "Session saved");
        Ok(())
    }

    /// Commits throttled writes whose interval has elapsed.
    pub fn flush_due(&self) {
        if let Err(e) = self.writer.flush_due() {
            warn!(error = %e, "Cannot write session");
        }
    }

    pub fn flush(&self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "Cannot flush session");
        }
    }

    pub fn restore(&self) -> Option<SessionSelection> {
        let raw = match self.writer.store().get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Cannot read session");
                return None;
            }
        };
        match serde_json::from_str::<SessionSelection>(&raw) {
            Ok(mut selection) => {
                selection.volume = if selection.volume.is_finite() {
                    selection.volume.clamp(0.0, 1.0)
                } else {
                    default_volume()
                };
                Some(selection)
            }
            Err(e) => {
                warn!(error = %e, "Ignoring corrupt session");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use retrostore::MemoryStore;
    use retroutils::ManualClock;
    use std::time::Duration;

    fn setup() -> (Arc<ManualClock>, Arc<MemoryStore>, SessionStore) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let memory = Arc::new(MemoryStore::new());
        let writer = Arc::new(ThrottledWriter::new(
            memory.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        (clock.clone(), memory, SessionStore::new(writer, clock))
    }

    #[test]
    fn test_save_and_restore() {
        let (_clock, _memory, session) = setup();
        assert_eq!(session.restore(), None);

        let selection = SessionSelection {
            channel_id: Some("z".to_string()),
            clip_index: Some(1),
            volume: 0.3,
            power_on: true,
            saved_at: None,
        };
        session.save(&selection);
        let restored = session.restore().unwrap();
        assert_eq!(restored.channel_id.as_deref(), Some("z"));
        assert_eq!(restored.clip_index, Some(1));
        assert_eq!(restored.volume, 0.3);
        assert!(restored.power_on);
        assert!(restored.saved_at.is_some());
    }

    #[test]
    fn test_throttled_until_flush() {
        let (_clock, _memory, session) = setup();
        let mut selection = SessionSelection::default();
        selection.channel_id = Some("a".to_string());
        session.save(&selection);
        selection.channel_id = Some("b".to_string());
        session.save(&selection);
        assert_eq!(session.restore().unwrap().channel_id.as_deref(), Some("a"));

        session.flush();
        assert_eq!(session.restore().unwrap().channel_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_corrupt_session_is_ignored() {
        let (_clock, memory, session) = setup();
        memory.set(SESSION_KEY, "{not json").unwrap();
        assert_eq!(session.restore(), None);
    }

    #[test]
    fn test_volume_clamped_on_restore() {
        let (_clock, memory, session) = setup();
        memory
            .set(SESSION_KEY, r#"{"channelId":"z","volume":7.5}"#)
            .unwrap();
        let restored = session.restore().unwrap();
        assert_eq!(restored.volume, 1.0);
        assert!(!restored.power_on);
    }
}
