//! Pure schedule engine.
//!
//! Given the global epoch, the wall clock and a channel, computes which clip
//! is on air and how far into it. Nothing here holds state: the same inputs
//! always give the same [`SchedulePosition`].
//!
//! Elapsed time since the epoch is floored to whole seconds before the walk,
//! so all viewers agree on the position within a second. A clip boundary
//! that falls exactly on the cycle position belongs to the later clip.

use chrono::{DateTime, Utc};
use retrocatalog::Channel;
use retroutils::seconds_between;
use serde::{Deserialize, Serialize};

use crate::state::ManualAnchor;

/// Where a channel is in its playlist.
///
/// `clip_index` is `None` for a channel without clips ("no content").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePosition {
    pub clip_index: Option<usize>,
    /// Seconds into the current clip, in `[0, duration)`
    pub offset: f64,
    /// `duration - offset`
    pub remaining: f64,
    /// Seconds into the current cycle, in `[0, total_duration)`
    pub cycle_position: f64,
    /// Number of complete cycles since the origin
    pub cycle_count: u64,
}

impl SchedulePosition {
    pub const EMPTY: SchedulePosition = SchedulePosition {
        clip_index: None,
        offset: 0.0,
        remaining: 0.0,
        cycle_position: 0.0,
        cycle_count: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.clip_index.is_none()
    }

    /// Index of the clip after the current one, wrapping at the end of the playlist
    pub fn next_clip_index(&self, clip_count: usize) -> Option<usize> {
        match self.clip_index {
            Some(i) if clip_count > 0 => Some((i + 1) % clip_count),
            _ => None,
        }
    }
}

/// Whole seconds elapsed since the epoch, never negative.
pub fn elapsed_seconds(epoch: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (now - epoch).num_milliseconds();
    if ms <= 0 {
        return 0;
    }
    (ms / 1000) as u64
}

/// Timeline position of `channel` at `now`.
pub fn compute_position(
    epoch: DateTime<Utc>,
    now: DateTime<Utc>,
    channel: &Channel,
) -> SchedulePosition {
    let total = channel.total_duration();
    if channel.is_empty() || total <= 0.0 {
        return SchedulePosition::EMPTY;
    }

    let elapsed = elapsed_seconds(epoch, now) as f64;
    let cycle_count = (elapsed / total).floor() as u64;
    let cycle_position = elapsed % total;
    locate(channel, cycle_position, cycle_count)
}

/// Manual-mode position: the anchored clip plays from the anchored offset at
/// real time, then the playlist continues in order.
///
/// The anchor is not rotated here; the broadcast store does that when the
/// returned clip differs from the anchored one.
pub fn compute_manual(
    anchor: &ManualAnchor,
    now: DateTime<Utc>,
    channel: &Channel,
) -> SchedulePosition {
    let total = channel.total_duration();
    if channel.is_empty() || total <= 0.0 {
        return SchedulePosition::EMPTY;
    }

    let index = anchor.clip_index.min(channel.len() - 1);
    let since_anchor = seconds_between(anchor.anchored_at_wallclock, now).max(0.0);
    let absolute =
        channel.start_of(index) + anchor.offset_at_anchor_seconds.max(0.0) + since_anchor;

    let cycle_count = (absolute / total).floor() as u64;
    let cycle_position = absolute % total;
    locate(channel, cycle_position, cycle_count)
}

/// Walks the playlist to the clip covering `cycle_position`.
fn locate(channel: &Channel, cycle_position: f64, cycle_count: u64) -> SchedulePosition {
    let mut cumulative = 0.0;
    for (index, clip) in channel.clips().iter().enumerate() {
        let end = cumulative + clip.duration_seconds;
        if end > cycle_position {
            let offset = (cycle_position - cumulative).max(0.0);
            return SchedulePosition {
                clip_index: Some(index),
                offset,
                remaining: clip.duration_seconds - offset,
                cycle_position,
                cycle_count,
            };
        }
        cumulative = end;
    }

    // only reachable through rounding on the very last clip
    let last = channel.len() - 1;
    let duration = channel.clips()[last].duration_seconds;
    let offset = (cycle_position - channel.start_of(last)).clamp(0.0, duration - f64::EPSILON);
    SchedulePosition {
        clip_index: Some(last),
        offset,
        remaining: duration - offset,
        cycle_position,
        cycle_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use retrocatalog::{Clip, Source};

    fn clip(id: &str, d: f64) -> Clip {
        Clip::new(id, vec![Source::new(format!("yt-{}", id), "primary")], d)
    }

    fn channel_z() -> Channel {
        Channel::new("z", "Z", vec![clip("a", 10.0), clip("b", 20.0), clip("c", 30.0)])
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_basic_scheduling() {
        let pos = compute_position(t0(), at(75), &channel_z());
        assert_eq!(pos.cycle_position, 15.0);
        assert_eq!(pos.cycle_count, 1);
        assert_eq!(pos.clip_index, Some(1));
        assert_eq!(pos.offset, 5.0);
        assert_eq!(pos.remaining, 15.0);
        assert_eq!(pos.next_clip_index(3), Some(2));
    }

    #[test]
    fn test_boundary_belongs_to_next_clip() {
        let pos = compute_position(t0(), at(10), &channel_z());
        assert_eq!(pos.clip_index, Some(1));
        assert_eq!(pos.offset, 0.0);
        assert_eq!(pos.remaining, 20.0);

        let wrap = compute_position(t0(), at(60), &channel_z());
        assert_eq!(wrap.clip_index, Some(0));
        assert_eq!(wrap.cycle_count, 1);
    }

    #[test]
    fn test_elapsed_is_floored_and_clamped() {
        let z = channel_z();
        let before = compute_position(t0(), at(-30), &z);
        assert_eq!(before.clip_index, Some(0));
        assert_eq!(before.offset, 0.0);

        let fractional = compute_position(t0(), at(12) + TimeDelta::milliseconds(900), &z);
        assert_eq!(fractional.offset, 2.0);
    }

    #[test]
    fn test_empty_channel() {
        let empty = Channel::new("e", "E", vec![]);
        let pos = compute_position(t0(), at(42), &empty);
        assert!(pos.is_empty());
        assert_eq!(pos, SchedulePosition::EMPTY);
        assert_eq!(pos.next_clip_index(0), None);
    }

    #[test]
    fn test_offset_always_within_clip() {
        let channel = Channel::new(
            "odd",
            "Odd",
            vec![clip("a", 7.3), clip("b", 1.0), clip("c", 123.45), clip("d", 0.2)],
        );
        for s in 0..2_000 {
            let pos = compute_position(t0(), at(s), &channel);
            let index = pos.clip_index.unwrap();
            let duration = channel.clips()[index].duration_seconds;
            assert!(pos.offset >= 0.0 && pos.offset < duration, "at {}: {:?}", s, pos);
            assert!(pos.cycle_position < channel.total_duration());
        }
    }

    #[test]
    fn test_each_clip_visited_duration_times_per_cycle() {
        let z = channel_z();
        let mut visits = [0u32; 3];
        for s in 0..60 {
            let pos = compute_position(t0(), at(s), &z);
            visits[pos.clip_index.unwrap()] += 1;
        }
        assert_eq!(visits, [10, 20, 30]);
    }

    #[test]
    fn test_remaining_leads_to_next_clip() {
        let z = channel_z();
        for s in [0, 3, 17, 42, 59, 75, 1_000_003] {
            let pos = compute_position(t0(), at(s), &z);
            let later = at(s) + TimeDelta::milliseconds((pos.remaining * 1000.0) as i64);
            let next = compute_position(t0(), later, &z);
            assert_eq!(next.clip_index, pos.next_clip_index(z.len()));
            assert!(next.offset <= 1.0);
        }
    }

    #[test]
    fn test_deterministic() {
        let z = channel_z();
        let a = compute_position(t0(), at(123_456), &z);
        let _ = compute_position(t0(), at(7), &z);
        let b = compute_position(t0(), at(123_456), &z);
        assert_eq!(a, b);
    }

    #[test]
    fn test_manual_rotates_through_playlist() {
        let z = channel_z();
        let anchor = ManualAnchor {
            clip_index: 2,
            offset_at_anchor_seconds: 0.0,
            anchored_at_wallclock: at(1_000),
        };
        let start = compute_manual(&anchor, at(1_000), &z);
        assert_eq!(start.clip_index, Some(2));
        assert_eq!(start.offset, 0.0);

        let later = compute_manual(&anchor, at(1_031), &z);
        assert_eq!(later.clip_index, Some(0));
        assert_eq!(later.offset, 1.0);
    }

    #[test]
    fn test_manual_keeps_subsecond_precision() {
        let z = channel_z();
        let anchor = ManualAnchor {
            clip_index: 1,
            offset_at_anchor_seconds: 4.0,
            anchored_at_wallclock: at(0),
        };
        let pos = compute_manual(&anchor, at(2) + TimeDelta::milliseconds(500), &z);
        assert_eq!(pos.clip_index, Some(1));
        assert_eq!(pos.offset, 6.5);
    }
}
