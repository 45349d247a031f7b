//! Reactive position view over one channel.
//!
//! [`PositionWatcher`] keeps a [`PositionView`] of the selected channel and
//! recomputes it only when something it depends on moved: the channel
//! itself, the channel's state timestamp in the [`BroadcastStore`], or an
//! explicit [`PositionWatcher::tick`]. Countdown displays tick it about once
//! per second; the supervisor does not depend on it and asks the store
//! directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use retrocatalog::{Channel, Clip};
use retroutils::SharedClock;
use serde::Serialize;

use crate::engine::SchedulePosition;
use crate::state::BroadcastMode;
use crate::store::{BroadcastStore, StateChanged};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub channel_id: Option<String>,
    pub clip_index: Option<usize>,
    pub clip: Option<Clip>,
    pub offset: f64,
    pub remaining: f64,
    pub next_clip_index: Option<usize>,
    pub next_clip: Option<Clip>,
    pub cycle_position: f64,
    pub total_duration: f64,
    pub mode: BroadcastMode,
    /// `false` without a channel or for a channel without clips
    pub is_valid: bool,
}

impl Default for PositionView {
    fn default() -> Self {
        Self {
            channel_id: None,
            clip_index: None,
            clip: None,
            offset: 0.0,
            remaining: 0.0,
            next_clip_index: None,
            next_clip: None,
            cycle_position: 0.0,
            total_duration: 0.0,
            mode: BroadcastMode::Timeline,
            is_valid: false,
        }
    }
}

impl PositionView {
    pub fn from_position(channel: &Channel, position: &SchedulePosition, mode: BroadcastMode) -> Self {
        let next_clip_index = position.next_clip_index(channel.len());
        Self {
            channel_id: Some(channel.id().to_string()),
            clip_index: position.clip_index,
            clip: position.clip_index.and_then(|i| channel.clip(i)).cloned(),
            offset: position.offset,
            remaining: position.remaining,
            next_clip_index,
            next_clip: next_clip_index.and_then(|i| channel.clip(i)).cloned(),
            cycle_position: position.cycle_position,
            total_duration: channel.total_duration(),
            mode,
            is_valid: !position.is_empty(),
        }
    }

    pub fn clip_id(&self) -> Option<&str> {
        self.clip.as_ref().map(|c| c.id.as_str())
    }
}

impl BroadcastStore {
    /// Position of `channel` at `now`, with clip details.
    pub fn view_for(&self, channel: &Channel, now: DateTime<Utc>) -> PositionView {
        let position = self.position_for(channel, now);
        PositionView::from_position(channel, &position, self.mode(channel.id()))
    }

    /// Same as [`BroadcastStore::view_for`], without touching the stored
    /// state.
    pub fn peek_view(&self, channel: &Channel, at: DateTime<Utc>) -> PositionView {
        let position = self.peek_position(channel, at);
        PositionView::from_position(channel, &position, self.mode(channel.id()))
    }
}

pub struct PositionWatcher {
    store: Arc<BroadcastStore>,
    clock: SharedClock,
    changes: Receiver<StateChanged>,
    channel: Option<Arc<Channel>>,
    seen_updated_at: Option<DateTime<Utc>>,
    view: PositionView,
}

impl std::fmt::Debug for PositionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionWatcher")
            .field("channel", &self.channel.as_ref().map(|c| c.id().to_string()))
            .field("view", &self.view)
            .finish()
    }
}

impl PositionWatcher {
    pub fn new(store: Arc<BroadcastStore>, clock: SharedClock) -> Self {
        let changes = store.subscribe();
        Self {
            store,
            clock,
            changes,
            channel: None,
            seen_updated_at: None,
            view: PositionView::default(),
        }
    }

    pub fn channel(&self) -> Option<&Arc<Channel>> {
        self.channel.as_ref()
    }

    pub fn view(&self) -> &PositionView {
        &self.view
    }

    /// Follows `channel`. Returns `true` if the view was recomputed.
    pub fn set_channel(&mut self, channel: Option<Arc<Channel>>) -> bool {
        let same = match (&self.channel, &channel) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return false;
        }
        self.channel = channel;
        self.recompute();
        true
    }

    /// Drains store notifications and recomputes if the followed channel's
    /// state changed. Returns `true` if the view was recomputed.
    pub fn poll(&mut self) -> bool {
        let Some(channel_id) = self.channel.as_ref().map(|c| c.id().to_string()) else {
            while self.changes.try_recv().is_ok() {}
            return false;
        };
        let mut touched = false;
        while let Ok(change) = self.changes.try_recv() {
            if change.channel_id == channel_id {
                touched = true;
            }
        }
        if !touched || self.store.updated_at(&channel_id) == self.seen_updated_at {
            return false;
        }
        self.recompute();
        true
    }

    /// Explicit recomputation.
    pub fn tick(&mut self) -> &PositionView {
        self.recompute();
        &self.view
    }

    fn recompute(&mut self) {
        self.view = match &self.channel {
            Some(channel) => self.store.view_for(channel, self.clock.now()),
            None => PositionView::default(),
        };
        // view_for may itself rotate an anchor; remember the resulting timestamp
        self.seen_updated_at = self
            .channel
            .as_ref()
            .and_then(|c| self.store.updated_at(c.id()));
        while self.changes.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use retrocatalog::Source;
    use retroutils::ManualClock;

    fn clip(id: &str, d: f64) -> Clip {
        Clip::new(id, vec![Source::new(format!("yt-{}", id), "primary")], d)
    }

    fn setup() -> (Arc<ManualClock>, Arc<BroadcastStore>, Arc<Channel>) {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(t0);
        clock.advance_secs(75.0);
        let store = Arc::new(BroadcastStore::new(t0, clock.clone()));
        let channel = Arc::new(Channel::new(
            "z",
            "Z",
            vec![clip("a", 10.0), clip("b", 20.0), clip("c", 30.0)],
        ));
        (clock, store, channel)
    }

    #[test]
    fn test_view_fields() {
        let (clock, store, channel) = setup();
        let mut watcher = PositionWatcher::new(store, clock);
        assert!(!watcher.view().is_valid);

        assert!(watcher.set_channel(Some(channel.clone())));
        let view = watcher.view();
        assert!(view.is_valid);
        assert_eq!(view.clip_id(), Some("b"));
        assert_eq!(view.offset, 5.0);
        assert_eq!(view.remaining, 15.0);
        assert_eq!(view.next_clip_index, Some(2));
        assert_eq!(view.next_clip.as_ref().unwrap().id, "c");
        assert_eq!(view.cycle_position, 15.0);
        assert_eq!(view.total_duration, 60.0);
        assert_eq!(view.mode, BroadcastMode::Timeline);

        assert!(!watcher.set_channel(Some(channel)));
    }

    #[test]
    fn test_recomputes_on_state_change_only() {
        let (clock, store, channel) = setup();
        let mut watcher = PositionWatcher::new(store.clone(), clock.clone());
        watcher.set_channel(Some(channel.clone()));

        clock.advance_secs(3.0);
        assert!(!watcher.poll());
        assert_eq!(watcher.view().offset, 5.0);

        store.set_manual(&channel, 0, 0.0).unwrap();
        assert!(watcher.poll());
        assert_eq!(watcher.view().clip_index, Some(0));
        assert_eq!(watcher.view().mode, BroadcastMode::Manual);

        // other channels are ignored
        store.clear_manual("other");
        store.initialize("other");
        assert!(!watcher.poll());
    }

    #[test]
    fn test_tick_recomputes() {
        let (clock, store, channel) = setup();
        let mut watcher = PositionWatcher::new(store, clock.clone());
        watcher.set_channel(Some(channel));
        clock.advance_secs(3.0);
        assert_eq!(watcher.tick().offset, 8.0);
    }

    #[test]
    fn test_empty_channel_view() {
        let (clock, store, _channel) = setup();
        let mut watcher = PositionWatcher::new(store, clock);
        watcher.set_channel(Some(Arc::new(Channel::new("e", "Empty", vec![]))));
        assert!(!watcher.view().is_valid);
        assert_eq!(watcher.view().clip_index, None);
        assert_eq!(watcher.view().next_clip_index, None);
    }

    #[test]
    fn test_peek_view_leaves_state_alone() {
        let (clock, store, channel) = setup();
        store.set_manual(&channel, 0, 0.0).unwrap();
        let anchored = store.updated_at("z");
        let changes = store.subscribe();

        clock.advance_secs(12.0);
        let view = store.peek_view(&channel, store.now());
        assert_eq!(view.clip_id(), Some("b"));
        assert_eq!(view.offset, 2.0);
        assert_eq!(view.mode, BroadcastMode::Manual);
        assert!(changes.try_recv().is_err());
        assert_eq!(store.updated_at("z"), anchored);

        // the mutating read rotates the anchor
        store.view_for(&channel, store.now());
        assert!(changes.try_recv().is_ok());
    }
}
