//! Supervisor settings read from the `playback` section of retroconfig

use std::time::Duration;

use anyhow::Result;
use retroconfig::Config;

use crate::settings::SupervisorSettings;

pub trait PlaybackConfigExt {
    /// Every supervisor constant, missing keys falling back to the defaults
    fn get_supervisor_settings(&self) -> Result<SupervisorSettings>;

    fn set_supervisor_settings(&self, settings: &SupervisorSettings) -> Result<()>;
}

fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl PlaybackConfigExt for Config {
    fn get_supervisor_settings(&self) -> Result<SupervisorSettings> {
        let d = SupervisorSettings::default();
        let get = |key: &str, default: Duration| -> Result<Duration> {
            Ok(Duration::from_millis(self.get_playback_ms(key, ms(default))?))
        };

        Ok(SupervisorSettings {
            switch_lead: get("switch_lead_ms", d.switch_lead)?,
            seek_tolerance: get("seek_tolerance_ms", d.seek_tolerance)?,
            reload_tolerance: get("reload_tolerance_ms", d.reload_tolerance)?,
            buffer_show_delay: get("buffer_show_delay_ms", d.buffer_show_delay)?,
            buffer_watchdog: get("buffer_watchdog_ms", d.buffer_watchdog)?,
            load_debounce: get("load_debounce_ms", d.load_debounce)?,
            max_retries: self.get_playback_ms("max_retries", d.max_retries as u64)? as u32,
            retry_base: get("retry_base_ms", d.retry_base)?,
            retry_cap: get("retry_cap_ms", d.retry_cap)?,
            playback_start_grace_1: get("playback_start_grace_1_ms", d.playback_start_grace_1)?,
            playback_start_grace_2: get("playback_start_grace_2_ms", d.playback_start_grace_2)?,
            mobile_watchdog_1: get("mobile_watchdog_1_ms", d.mobile_watchdog_1)?,
            mobile_watchdog_2: get("mobile_watchdog_2_ms", d.mobile_watchdog_2)?,
            tick_interval: get("tick_interval_ms", d.tick_interval)?,
            video_buffer_window: get("video_buffer_window_ms", d.video_buffer_window)?,
            skip_cooldown: get("skip_cooldown_ms", d.skip_cooldown)?,
            min_skip_budget: self.get_playback_ms("min_skip_budget", d.min_skip_budget as u64)? as usize,
            watchdog_escalation: self
                .get_playback_ms("watchdog_escalation", d.watchdog_escalation as u64)?
                as u32,
        })
    }

    fn set_supervisor_settings(&self, s: &SupervisorSettings) -> Result<()> {
        let durations = [
            ("switch_lead_ms", s.switch_lead),
            ("seek_tolerance_ms", s.seek_tolerance),
            ("reload_tolerance_ms", s.reload_tolerance),
            ("buffer_show_delay_ms", s.buffer_show_delay),
            ("buffer_watchdog_ms", s.buffer_watchdog),
            ("load_debounce_ms", s.load_debounce),
            ("retry_base_ms", s.retry_base),
            ("retry_cap_ms", s.retry_cap),
            ("playback_start_grace_1_ms", s.playback_start_grace_1),
            ("playback_start_grace_2_ms", s.playback_start_grace_2),
            ("mobile_watchdog_1_ms", s.mobile_watchdog_1),
            ("mobile_watchdog_2_ms", s.mobile_watchdog_2),
            ("tick_interval_ms", s.tick_interval),
            ("video_buffer_window_ms", s.video_buffer_window),
            ("skip_cooldown_ms", s.skip_cooldown),
        ];
        for (key, value) in durations {
            self.set_playback_ms(key, ms(value))?;
        }
        self.set_playback_ms("max_retries", s.max_retries as u64)?;
        self.set_playback_ms("min_skip_budget", s.min_skip_budget as u64)?;
        self.set_playback_ms("watchdog_escalation", s.watchdog_escalation as u64)?;
        Ok(())
    }
}
