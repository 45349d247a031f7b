//! Supervisor tunables

use std::time::Duration;

/// Timing constants of the player supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    /// Start the next clip this close to the end of the current one
    pub switch_lead: Duration,
    /// No seek while `|actual - desired|` stays within this
    pub seek_tolerance: Duration,
    /// Beyond this drift, reload instead of seeking
    pub reload_tolerance: Duration,
    pub buffer_show_delay: Duration,
    pub buffer_watchdog: Duration,
    pub load_debounce: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub playback_start_grace_1: Duration,
    pub playback_start_grace_2: Duration,
    pub mobile_watchdog_1: Duration,
    pub mobile_watchdog_2: Duration,
    pub tick_interval: Duration,
    /// Width of the desired-offset buckets used to deduplicate loads
    pub video_buffer_window: Duration,
    pub skip_cooldown: Duration,
    /// Lower bound of the consecutive-skip budget
    pub min_skip_budget: usize,
    /// Watchdog strikes before a hard reload
    pub watchdog_escalation: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            switch_lead: Duration::from_secs(2),
            seek_tolerance: Duration::from_secs(1),
            reload_tolerance: Duration::from_secs(5),
            buffer_show_delay: Duration::from_secs(3),
            buffer_watchdog: Duration::from_secs(9),
            load_debounce: Duration::from_millis(100),
            max_retries: 4,
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(8),
            playback_start_grace_1: Duration::from_millis(1_000),
            playback_start_grace_2: Duration::from_millis(2_500),
            mobile_watchdog_1: Duration::from_secs(3),
            mobile_watchdog_2: Duration::from_secs(6),
            tick_interval: Duration::from_millis(500),
            video_buffer_window: Duration::from_secs(5),
            skip_cooldown: Duration::from_secs(5),
            min_skip_budget: 10,
            watchdog_escalation: 2,
        }
    }
}

impl SupervisorSettings {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(1u32 << exponent)
            .min(self.retry_cap)
    }

    /// Consecutive skips allowed for a playlist of `clip_count` clips
    pub fn skip_budget(&self, clip_count: usize) -> usize {
        clip_count.max(self.min_skip_budget)
    }
}
