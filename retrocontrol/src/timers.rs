//! Cancellation scope for the supervisor timers.
//!
//! Timers are plain absolute deadlines, one per [`TimerKind`]. Nothing runs
//! on its own: the owner calls [`TimerScope::take_due`] on every tick and
//! handles what expired. Dropping or clearing the scope cancels everything.

use std::time::Duration;

use chrono::{DateTime, Utc};
use retroutils::after;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    LoadDebounce,
    BufferShow,
    BufferWatchdog,
    Retry,
    Grace1,
    Grace2,
    Mobile1,
    Mobile2,
    SkipCooldown,
}

#[derive(Debug, Clone, Default)]
pub struct TimerScope {
    entries: Vec<(TimerKind, DateTime<Utc>)>,
}

impl TimerScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `kind` to fire `delay` after `now`, replacing any previous deadline.
    pub fn arm(&mut self, kind: TimerKind, now: DateTime<Utc>, delay: Duration) {
        self.cancel(kind);
        self.entries.push((kind, after(now, delay)));
    }

    /// Arms `kind` unless it is already armed.
    pub fn arm_once(&mut self, kind: TimerKind, now: DateTime<Utc>, delay: Duration) {
        if !self.is_armed(kind) {
            self.entries.push((kind, after(now, delay)));
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.entries.retain(|(k, _)| *k != kind);
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.entries.iter().any(|(k, _)| *k == kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| *d)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|(_, d)| *d).min()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns expired timers, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<TimerKind> {
        let mut due: Vec<(TimerKind, DateTime<Utc>)> = Vec::new();
        self.entries.retain(|&(kind, deadline)| {
            if deadline <= now {
                due.push((kind, deadline));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|&(_, deadline)| deadline);
        due.into_iter().map(|(kind, _)| kind).collect()
    }
}
