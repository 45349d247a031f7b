//! Broadcast state store.
//!
//! Owns the [`ChannelState`] of every channel and answers "what is on air on
//! this channel now", in timeline or manual mode. State changes are pushed
//! to subscribers as [`StateChanged`] and persisted through a
//! [`ThrottledWriter`] under [`BROADCAST_STATE_KEY`].
//!
//! In manual mode the anchor is kept normalized: whenever the position
//! crosses into another clip, the anchor is rotated to the start of that
//! clip, so `offset_at_anchor_seconds` stays within the anchored clip.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use retrocatalog::Channel;
use retrostore::ThrottledWriter;
use retroutils::{after, SharedClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{compute_manual, compute_position, SchedulePosition};
use crate::error::{Result, ScheduleError};
use crate::state::{BroadcastMode, ChannelState, ManualAnchor, ManualPolicy};

/// Key of the persisted channel states
pub const BROADCAST_STATE_KEY: &str = "retrotv.broadcast_state";

const PERSISTED_VERSION: u32 = 1;

/// Notification sent to subscribers after a channel's state changed
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanged {
    pub channel_id: String,
    pub mode: BroadcastMode,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStates {
    version: u32,
    #[serde(default)]
    channels: Vec<ChannelState>,
}

pub struct BroadcastStore {
    epoch: DateTime<Utc>,
    clock: SharedClock,
    policy: ManualPolicy,
    states: Mutex<HashMap<String, ChannelState>>,
    subscribers: Mutex<Vec<Sender<StateChanged>>>,
    writer: Option<Arc<ThrottledWriter>>,
}

impl std::fmt::Debug for BroadcastStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastStore")
            .field("epoch", &self.epoch)
            .field("policy", &self.policy)
            .field("channels", &self.lock_states().len())
            .finish()
    }
}

impl BroadcastStore {
    pub fn new(epoch: DateTime<Utc>, clock: SharedClock) -> Self {
        Self {
            epoch,
            clock,
            policy: ManualPolicy::default(),
            states: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            writer: None,
        }
    }

    pub fn with_policy(mut self, policy: ManualPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Persist states through `writer`
    pub fn with_writer(mut self, writer: Arc<ThrottledWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    pub fn policy(&self) -> ManualPolicy {
        self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelState>> {
        self.states.lock().expect("BroadcastStore mutex poisoned")
    }

    /// Ensures a state exists for `channel_id`. Returns `true` if it was created.
    pub fn initialize(&self, channel_id: &str) -> bool {
        let now = self.clock.now();
        let mut states = self.lock_states();
        if states.contains_key(channel_id) {
            return false;
        }
        debug!(channel = channel_id, "Initializing channel state");
        states.insert(
            channel_id.to_string(),
            ChannelState::timeline(channel_id, now),
        );
        true
    }

    pub fn state(&self, channel_id: &str) -> Option<ChannelState> {
        self.lock_states().get(channel_id).cloned()
    }

    pub fn mode(&self, channel_id: &str) -> BroadcastMode {
        self.lock_states()
            .get(channel_id)
            .map(|s| s.mode)
            .unwrap_or(BroadcastMode::Timeline)
    }

    pub fn updated_at(&self, channel_id: &str) -> Option<DateTime<Utc>> {
        self.lock_states().get(channel_id).map(|s| s.updated_at)
    }

    /// Current position of `channel` according to its mode.
    ///
    /// May rotate the manual anchor or expire manual mode; either counts as
    /// a state change.
    pub fn position_for(&self, channel: &Channel, now: DateTime<Utc>) -> SchedulePosition {
        let (position, changed) = {
            let mut states = self.lock_states();
            let state = states
                .entry(channel.id().to_string())
                .or_insert_with(|| ChannelState::timeline(channel.id(), now));

            let mut changed = self.expire_manual(state, channel, now);
            let position = match (state.mode, state.manual_anchor) {
                (BroadcastMode::Manual, Some(anchor)) => {
                    let position = compute_manual(&anchor, now, channel);
                    if rotate_anchor(state, &anchor, &position, now) {
                        changed = true;
                    }
                    position
                }
                _ => compute_position(self.epoch, now, channel),
            };

            state.last_observed_clip_index = position.clip_index;
            state.last_observed_offset_seconds = position.offset;
            let event = changed.then(|| StateChanged {
                channel_id: state.channel_id.clone(),
                mode: state.mode,
                updated_at: state.updated_at,
            });
            (position, event)
        };

        if let Some(event) = changed {
            self.after_change(event);
        }
        position
    }

    /// Pure timeline position, ignoring any manual state
    pub fn timeline_position(&self, channel: &Channel, now: DateTime<Utc>) -> SchedulePosition {
        compute_position(self.epoch, now, channel)
    }

    /// Position at `at` under the current state, without touching it.
    ///
    /// Used to look ahead (clip rollover); anchors are neither rotated nor
    /// expired.
    pub fn peek_position(&self, channel: &Channel, at: DateTime<Utc>) -> SchedulePosition {
        let anchor = self
            .lock_states()
            .get(channel.id())
            .filter(|s| s.is_manual())
            .and_then(|s| s.manual_anchor)
            .filter(|a| a.clip_index < channel.len());
        match anchor {
            Some(anchor) => compute_manual(&anchor, at, channel),
            None => compute_position(self.epoch, at, channel),
        }
    }

    /// Puts `channel` in manual mode at `clip_index` / `offset`, anchored now.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::ClipOutOfRange`] if the channel has no such clip.
    pub fn set_manual(
        &self,
        channel: &Channel,
        clip_index: usize,
        offset: f64,
    ) -> Result<SchedulePosition> {
        if clip_index >= channel.len() {
            return Err(ScheduleError::ClipOutOfRange {
                channel_id: channel.id().to_string(),
                clip_index,
                len: channel.len(),
            });
        }

        let now = self.clock.now();
        let requested = ManualAnchor {
            clip_index,
            offset_at_anchor_seconds: if offset.is_finite() { offset.max(0.0) } else { 0.0 },
            anchored_at_wallclock: now,
        };
        // an offset past the clip end lands in a later clip
        let position = compute_manual(&requested, now, channel);
        let anchor = match position.clip_index {
            Some(index) => ManualAnchor {
                clip_index: index,
                offset_at_anchor_seconds: position.offset,
                anchored_at_wallclock: now,
            },
            None => requested,
        };

        let event = {
            let mut states = self.lock_states();
            let state = states
                .entry(channel.id().to_string())
                .or_insert_with(|| ChannelState::timeline(channel.id(), now));
            state.enter_manual(anchor, now);
            state.last_observed_clip_index = position.clip_index;
            state.last_observed_offset_seconds = position.offset;
            StateChanged {
                channel_id: state.channel_id.clone(),
                mode: state.mode,
                updated_at: state.updated_at,
            }
        };

        info!(
            channel = %channel.id(),
            clip_index = anchor.clip_index,
            offset = anchor.offset_at_anchor_seconds,
            "Manual playback anchored"
        );
        self.after_change(event);
        Ok(position)
    }

    /// Returns `channel_id` to the timeline. Returns `false` if it already was.
    pub fn clear_manual(&self, channel_id: &str) -> bool {
        let now = self.clock.now();
        let event = {
            let mut states = self.lock_states();
            let state = states
                .entry(channel_id.to_string())
                .or_insert_with(|| ChannelState::timeline(channel_id, now));
            if !state.is_manual() {
                return false;
            }
            state.enter_timeline(now);
            StateChanged {
                channel_id: state.channel_id.clone(),
                mode: state.mode,
                updated_at: state.updated_at,
            }
        };
        info!(channel = channel_id, "Back to the broadcast timeline");
        self.after_change(event);
        true
    }

    /// Forgets the state of `channel_id` (administrative reset).
    pub fn reset(&self, channel_id: &str) -> bool {
        let removed = self.lock_states().remove(channel_id).is_some();
        if removed {
            self.after_change(StateChanged {
                channel_id: channel_id.to_string(),
                mode: BroadcastMode::Timeline,
                updated_at: self.clock.now(),
            });
        }
        removed
    }

    pub fn subscribe(&self) -> Receiver<StateChanged> {
        let (tx, rx) = unbounded::<StateChanged>();
        self.subscribers
            .lock()
            .expect("BroadcastStore mutex poisoned")
            .push(tx);
        rx
    }

    fn broadcast(&self, event: StateChanged) {
        let mut subscribers = self.subscribers.lock().expect("BroadcastStore mutex poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn after_change(&self, event: StateChanged) {
        self.persist();
        self.broadcast(event);
    }

    /// Hands the current states to the throttled writer.
    ///
    /// Failures are logged and dropped.
    pub fn persist(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let payload = {
            let states = self.lock_states();
            let mut channels: Vec<ChannelState> = states.values().cloned().collect();
            channels.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
            serde_json::to_string(&PersistedStates {
                version: PERSISTED_VERSION,
                channels,
            })
        };
        match payload {
            Ok(json) => {
                if let Err(e) = writer.write(BROADCAST_STATE_KEY, &json) {
                    warn!(error = %e, "Cannot persist broadcast state");
                }
            }
            Err(e) => warn!(error = %e, "Cannot serialize broadcast state"),
        }
    }

    /// Commits a throttled write whose interval has elapsed.
    pub fn flush_due(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        if let Err(e) = writer.flush_due() {
            warn!(error = %e, "Throttled broadcast state write failed");
        }
    }

    /// Final write, for shutdown / page hide.
    pub fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        self.persist();
        if let Err(e) = writer.flush() {
            warn!(error = %e, "Final broadcast state write failed");
        }
    }

    /// Loads persisted states, replacing in-memory ones with the same id.
    ///
    /// Inconsistent entries are skipped. Returns the number restored.
    pub fn restore(&self) -> Result<usize> {
        let Some(writer) = &self.writer else {
            return Ok(0);
        };
        let Some(raw) = writer.store().get(BROADCAST_STATE_KEY)? else {
            return Ok(0);
        };
        let persisted: PersistedStates = serde_json::from_str(&raw)?;
        if persisted.version != PERSISTED_VERSION {
            warn!(version = persisted.version, "Ignoring broadcast state of unknown version");
            return Ok(0);
        }

        let mut states = self.lock_states();
        let mut restored = 0;
        for state in persisted.channels {
            if !state.is_consistent() || state.channel_id.is_empty() {
                warn!(channel = %state.channel_id, "Skipping inconsistent channel state");
                continue;
            }
            states.insert(state.channel_id.clone(), state);
            restored += 1;
        }
        info!(restored, "Broadcast state restored");
        Ok(restored)
    }

    fn expire_manual(&self, state: &mut ChannelState, channel: &Channel, now: DateTime<Utc>) -> bool {
        if !state.is_manual() {
            return false;
        }
        let expired = match (self.policy, state.manual_since) {
            (ManualPolicy::IdleTimeout(limit), Some(since)) => now >= after(since, limit),
            _ => false,
        };
        let stale_anchor = state
            .manual_anchor
            .is_some_and(|a| a.clip_index >= channel.len());
        if !expired && !stale_anchor {
            return false;
        }
        if stale_anchor {
            warn!(channel = %state.channel_id, "Manual anchor no longer matches the playlist");
        } else {
            info!(channel = %state.channel_id, "Manual playback expired");
        }
        state.enter_timeline(now);
        true
    }
}

/// Moves the anchor to the start of the clip now playing, if it changed.
fn rotate_anchor(
    state: &mut ChannelState,
    anchor: &ManualAnchor,
    position: &SchedulePosition,
    now: DateTime<Utc>,
) -> bool {
    let Some(index) = position.clip_index else {
        return false;
    };
    if index == anchor.clip_index {
        return false;
    }
    let into_clip = TimeDelta::milliseconds((position.offset * 1000.0).round() as i64);
    state.manual_anchor = Some(ManualAnchor {
        clip_index: index,
        offset_at_anchor_seconds: 0.0,
        anchored_at_wallclock: now - into_clip,
    });
    state.updated_at = now;
    debug!(channel = %state.channel_id, clip_index = index, "Manual anchor rotated");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use retrocatalog::{Clip, Source};
    use retrostore::{KeyValueStore, MemoryStore};
    use retroutils::{Clock, ManualClock};
    use std::time::Duration;

    fn clip(id: &str, d: f64) -> Clip {
        Clip::new(id, vec![Source::new(format!("yt-{}", id), "primary")], d)
    }

    fn channel_z() -> Channel {
        Channel::new("z", "Z", vec![clip("a", 10.0), clip("b", 20.0), clip("c", 30.0)])
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup(start_after_epoch: u64) -> (Arc<ManualClock>, BroadcastStore) {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::from_secs(start_after_epoch));
        let store = BroadcastStore::new(t0(), clock.clone());
        (clock, store)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_clock, store) = setup(0);
        assert!(store.initialize("z"));
        assert!(!store.initialize("z"));
        assert_eq!(store.mode("z"), BroadcastMode::Timeline);
    }

    #[test]
    fn test_timeline_position() {
        let (clock, store) = setup(75);
        let pos = store.position_for(&channel_z(), clock.now());
        assert_eq!(pos.clip_index, Some(1));
        assert_eq!(pos.offset, 5.0);
        let state = store.state("z").unwrap();
        assert_eq!(state.last_observed_clip_index, Some(1));
    }

    #[test]
    fn test_manual_jump_rotates() {
        let (clock, store) = setup(1_000);
        let z = channel_z();
        let rx = store.subscribe();

        let pos = store.set_manual(&z, 2, 0.0).unwrap();
        assert_eq!(pos.clip_index, Some(2));
        assert_eq!(pos.offset, 0.0);
        assert_eq!(rx.try_recv().unwrap().mode, BroadcastMode::Manual);
        assert_eq!(store.position_for(&z, clock.now()).clip_index, Some(2));

        clock.advance_secs(31.0);
        let pos = store.position_for(&z, clock.now());
        assert_eq!(pos.clip_index, Some(0));
        assert_eq!(pos.offset, 1.0);

        // anchor now sits at the start of A
        let anchor = store.state("z").unwrap().manual_anchor.unwrap();
        assert_eq!(anchor.clip_index, 0);
        assert_eq!(anchor.offset_at_anchor_seconds, 0.0);
        assert!(rx.try_recv().is_ok());

        // offset keeps advancing in real time
        clock.advance_secs(2.0);
        let pos = store.position_for(&z, clock.now());
        assert_eq!(pos.clip_index, Some(0));
        assert_eq!(pos.offset, 3.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_peek_does_not_rotate() {
        let (clock, store) = setup(0);
        let z = channel_z();
        store.set_manual(&z, 1, 18.0).unwrap();
        let before = store.state("z").unwrap();

        let ahead = store.peek_position(&z, clock.now() + TimeDelta::seconds(2));
        assert_eq!(ahead.clip_index, Some(2));
        assert_eq!(ahead.offset, 0.0);
        assert_eq!(store.state("z").unwrap(), before);
    }

    #[test]
    fn test_set_manual_normalizes_large_offset() {
        let (_clock, store) = setup(0);
        let z = channel_z();
        let pos = store.set_manual(&z, 0, 15.0).unwrap();
        assert_eq!(pos.clip_index, Some(1));
        assert_eq!(pos.offset, 5.0);
        let anchor = store.state("z").unwrap().manual_anchor.unwrap();
        assert_eq!(anchor.clip_index, 1);
        assert_eq!(anchor.offset_at_anchor_seconds, 5.0);
    }

    #[test]
    fn test_set_manual_out_of_range() {
        let (_clock, store) = setup(0);
        assert!(matches!(
            store.set_manual(&channel_z(), 3, 0.0),
            Err(ScheduleError::ClipOutOfRange { len: 3, .. })
        ));
        assert!(store.state("z").is_none());
    }

    #[test]
    fn test_clear_manual_returns_to_timeline() {
        let (clock, store) = setup(75);
        let z = channel_z();
        store.set_manual(&z, 0, 0.0).unwrap();
        clock.advance_secs(4.0);

        assert!(store.clear_manual("z"));
        assert!(!store.clear_manual("z"));
        let pos = store.position_for(&z, clock.now());
        assert_eq!(pos, compute_position(t0(), clock.now(), &z));
    }

    #[test]
    fn test_idle_timeout_policy() {
        let clock = ManualClock::new(t0());
        let store = BroadcastStore::new(t0(), clock.clone())
            .with_policy(ManualPolicy::IdleTimeout(Duration::from_secs(60)));
        let z = channel_z();
        store.set_manual(&z, 2, 0.0).unwrap();

        clock.advance_secs(59.0);
        store.position_for(&z, clock.now());
        assert_eq!(store.mode("z"), BroadcastMode::Manual);

        clock.advance_secs(1.0);
        store.position_for(&z, clock.now());
        assert_eq!(store.mode("z"), BroadcastMode::Timeline);
    }

    #[test]
    fn test_sticky_policy_never_expires() {
        let (clock, store) = setup(0);
        let z = channel_z();
        store.set_manual(&z, 1, 0.0).unwrap();
        clock.advance_secs(86_400.0);
        store.position_for(&z, clock.now());
        assert_eq!(store.mode("z"), BroadcastMode::Manual);
    }

    #[test]
    fn test_persist_and_restore() {
        let clock = ManualClock::new(t0());
        let sink = Arc::new(MemoryStore::new());
        let writer = Arc::new(ThrottledWriter::new(
            sink.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        let store = BroadcastStore::new(t0(), clock.clone()).with_writer(writer.clone());
        let z = channel_z();
        store.set_manual(&z, 2, 4.0).unwrap();
        store.flush();
        assert!(sink.get(BROADCAST_STATE_KEY).unwrap().is_some());

        let restored = BroadcastStore::new(t0(), clock.clone()).with_writer(writer);
        assert_eq!(restored.restore().unwrap(), 1);
        let state = restored.state("z").unwrap();
        assert_eq!(state.mode, BroadcastMode::Manual);
        assert_eq!(state.manual_anchor.unwrap().offset_at_anchor_seconds, 4.0);

        clock.advance_secs(1.0);
        assert_eq!(restored.position_for(&z, clock.now()).offset, 5.0);
    }

    #[test]
    fn test_restore_skips_inconsistent_states() {
        let clock = ManualClock::new(t0());
        let sink = Arc::new(MemoryStore::new());
        sink.set(
            BROADCAST_STATE_KEY,
            r#"{"version":1,"channels":[
                {"channelId":"bad","mode":"manual","updatedAt":"2024-01-01T00:00:00Z"},
                {"channelId":"ok","mode":"timeline","updatedAt":"2024-01-01T00:00:00Z"}
            ]}"#,
        )
        .unwrap();
        let writer = Arc::new(ThrottledWriter::new(sink, clock.clone(), Duration::from_secs(1)));
        let store = BroadcastStore::new(t0(), clock).with_writer(writer);
        assert_eq!(store.restore().unwrap(), 1);
        assert!(store.state("bad").is_none());
    }

    #[test]
    fn test_stale_anchor_falls_back_to_timeline() {
        let (clock, store) = setup(75);
        let long = Channel::new("z", "Z", vec![clip("a", 10.0), clip("b", 20.0), clip("c", 30.0), clip("d", 5.0)]);
        store.set_manual(&long, 3, 0.0).unwrap();

        // same channel id, shorter playlist after a catalog reload
        let pos = store.position_for(&channel_z(), clock.now());
        assert_eq!(store.mode("z"), BroadcastMode::Timeline);
        assert_eq!(pos.clip_index, Some(1));
    }
}
