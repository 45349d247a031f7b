use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use retrocatalog::Source;
use retroschedule::PositionView;

use crate::error::PlaybackFailure;

/// Notifications for the surrounding UI
#[derive(Debug, Clone, PartialEq)]
pub enum TvEvent {
    PositionChanged {
        channel_id: String,
        position: PositionView,
    },
    /// `true` once buffering lasted past the show delay, `false` when it ends
    Buffering(bool),
    SourceFallback {
        clip_id: String,
        source: Source,
    },
    Failure {
        clip_id: String,
        reason: PlaybackFailure,
    },
    PlaybackStart {
        clip_id: String,
    },
    ClipTransition {
        from_clip_id: String,
        to_clip_id: String,
    },
    /// Autoplay failed; the UI should ask for a tap
    TapToStart,
    Recovering {
        clip_id: String,
        attempt: u32,
    },
}

#[derive(Clone, Default)]
pub struct TvEventBus {
    subscribers: Arc<Mutex<Vec<Sender<TvEvent>>>>,
}

impl std::fmt::Debug for TvEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("TvEventBus").field("subscribers", &count).finish()
    }
}

impl TvEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<TvEvent> {
        let (tx, rx) = unbounded::<TvEvent>();
        {
            let mut subscribers = self.subscribers.lock().expect("TvEventBus mutex poisoned");
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, event: TvEvent) {
        let mut subscribers = self.subscribers.lock().expect("TvEventBus mutex poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
