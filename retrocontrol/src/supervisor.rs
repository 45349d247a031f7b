//! Player supervisor.
//!
//! Drives the embedded player toward the clip and offset the broadcast store
//! says should be on air. One supervisor lives for one channel selection
//! with power on; it is rebuilt on channel change and dropped on power-off,
//! which cancels all of its timers at once.
//!
//! Reconciliation runs on every tick, every player event and every desired
//! state change:
//!
//! 1. a different clip is desired: load it (debounced) and remember the
//!    desired offset as the pending seek, applied on `Playing`
//! 2. same clip, drift beyond the reload tolerance: reload
//! 3. same clip, behind by more than the seek tolerance: seek forward
//! 4. otherwise nothing
//!
//! Close to the end of a clip the next one is loaded ahead of the boundary.
//!
//! Errors are split by class: permanent errors move to the next source of
//! the clip, then skip the clip; transient errors retry with exponential
//! backoff and count as permanent once retries are exhausted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use retrocatalog::Channel;
use retroschedule::{BroadcastStore, SchedulePosition};
use retroutils::{after, secs_to_duration};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::autoplay::AutoplayGuard;
use crate::error::PlaybackFailure;
use crate::events::{TvEvent, TvEventBus};
use crate::fallback::SourceFallback;
use crate::player::{
    ErrorClass, LifecycleToken, PlayerBackend, PlayerEnvelope, PlayerErrorCode, PlayerEvent,
    PlayerState,
};
use crate::settings::SupervisorSettings;
use crate::timers::{TimerKind, TimerScope};

/// Look past the end of the current clip by this much to find the next one
const LOOKAHEAD_MARGIN_SECS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Loading,
    Playing,
    Buffering,
    Paused,
    Recovering,
    Failed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Loading => "loading",
            Lifecycle::Playing => "playing",
            Lifecycle::Buffering => "buffering",
            Lifecycle::Paused => "paused",
            Lifecycle::Recovering => "recovering",
            Lifecycle::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredClip {
    pub clip_index: usize,
    pub clip_id: String,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedClip {
    pub clip_index: usize,
    pub clip_id: String,
    pub source_id: String,
    pub offset_at_load: f64,
    #[serde(skip)]
    bucket: i64,
}

/// Read-only view of the supervisor, for the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSnapshot {
    pub channel_id: String,
    pub lifecycle: Lifecycle,
    pub retry_count: u32,
    pub muted_for_autoplay: bool,
    pub user_unlocked: bool,
    pub desired: Option<DesiredClip>,
    pub loaded: Option<LoadedClip>,
    pub source_cursor: usize,
    pub load_in_flight: bool,
    pub consecutive_skips: usize,
    pub failed_clips: usize,
    pub last_state_change_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
struct LoadRequest {
    clip_index: usize,
    source_id: String,
    start_offset: f64,
    bucket: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rollover {
    from_index: usize,
    to_index: usize,
}

pub struct PlayerSupervisor {
    token: LifecycleToken,
    player: Arc<dyn PlayerBackend>,
    store: Arc<BroadcastStore>,
    channel: Arc<Channel>,
    settings: SupervisorSettings,
    events: TvEventBus,

    lifecycle: Lifecycle,
    desired: Option<DesiredClip>,
    loaded: Option<LoadedClip>,
    pending_load: Option<LoadRequest>,
    pending_seek: Option<f64>,
    load_in_flight: bool,
    retry_count: u32,
    watchdog_strikes: u32,
    last_state_change_at: DateTime<Utc>,
    autoplay: AutoplayGuard,
    fallback: SourceFallback,
    failed_clips: HashSet<String>,
    consecutive_skips: usize,
    timers: TimerScope,
    rollover: Option<Rollover>,
    buffering_shown: bool,
    tap_prompted: bool,
    cooling_down: bool,
}

impl std::fmt::Debug for PlayerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSupervisor")
            .field("token", &self.token)
            .field("channel", &self.channel.id())
            .field("lifecycle", &self.lifecycle)
            .field("desired", &self.desired)
            .field("loaded", &self.loaded)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

impl PlayerSupervisor {
    pub fn new(
        player: Arc<dyn PlayerBackend>,
        store: Arc<BroadcastStore>,
        channel: Arc<Channel>,
        settings: SupervisorSettings,
        events: TvEventBus,
    ) -> Self {
        let now = store.now();
        Self {
            token: LifecycleToken::next(),
            player,
            store,
            channel,
            settings,
            events,
            lifecycle: Lifecycle::Uninitialized,
            desired: None,
            loaded: None,
            pending_load: None,
            pending_seek: None,
            load_in_flight: false,
            retry_count: 0,
            watchdog_strikes: 0,
            last_state_change_at: now,
            autoplay: AutoplayGuard::new(1.0, false),
            fallback: SourceFallback::new(),
            failed_clips: HashSet::new(),
            consecutive_skips: 0,
            timers: TimerScope::new(),
            rollover: None,
            buffering_shown: false,
            tap_prompted: false,
            cooling_down: false,
        }
    }

    /// Volume restored when audio gets unlocked
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.autoplay = AutoplayGuard::new(volume, self.autoplay.user_unlocked());
        self
    }

    /// Carries an earlier gesture over from a previous supervisor
    pub fn with_user_unlocked(mut self, unlocked: bool) -> Self {
        if unlocked {
            self.autoplay.on_gesture();
        }
        self
    }

    /// Failed clips of this channel from a previous selection
    pub fn with_failed_clips(mut self, failed: HashSet<String>) -> Self {
        self.failed_clips = failed;
        self
    }

    pub fn token(&self) -> LifecycleToken {
        self.token
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.pending_seek
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooling_down
    }

    pub fn failed_clips(&self) -> &HashSet<String> {
        &self.failed_clips
    }

    pub fn into_failed_clips(self) -> HashSet<String> {
        self.failed_clips
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            channel_id: self.channel.id().to_string(),
            lifecycle: self.lifecycle,
            retry_count: self.retry_count,
            muted_for_autoplay: self.autoplay.muted_for_autoplay(),
            user_unlocked: self.autoplay.user_unlocked(),
            desired: self.desired.clone(),
            loaded: self.loaded.clone(),
            source_cursor: self.fallback.cursor(),
            load_in_flight: self.load_in_flight,
            consecutive_skips: self.consecutive_skips,
            failed_clips: self.failed_clips.len(),
            last_state_change_at: self.last_state_change_at,
        }
    }

    // ========================================================================
    // Lifetime
    // ========================================================================

    /// Binds the player to this lifetime and reconciles once.
    ///
    /// `after_power_on` arms the mobile autoplay watchdogs.
    pub fn start(&mut self, now: DateTime<Utc>, after_power_on: bool) {
        if let Err(e) = self.player.bind(self.token) {
            warn!(error = %e, "Cannot bind player events");
        }
        info!(
            channel = %self.channel.id(),
            token = %self.token,
            "Supervisor started"
        );
        if after_power_on {
            self.timers
                .arm(TimerKind::Mobile1, now, self.settings.mobile_watchdog_1);
            self.timers
                .arm(TimerKind::Mobile2, now, self.settings.mobile_watchdog_2);
        }
        self.reconcile(now);
    }

    /// Cancels every timer and pauses the player.
    pub fn stop(&mut self) {
        self.timers.cancel_all();
        self.pending_load = None;
        self.rollover = None;
        self.load_in_flight = false;
        if self.loaded.is_some() {
            if let Err(e) = self.player.pause() {
                warn!(error = %e, "Pause failed");
            }
        }
        self.hide_buffering();
        self.lifecycle = Lifecycle::Paused;
        info!(channel = %self.channel.id(), token = %self.token, "Supervisor stopped");
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Fires due timers, then reconciles.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        for kind in self.timers.take_due(now) {
            self.fire(kind, now);
        }
        self.reconcile(now);
    }

    /// The desired clip or offset changed (manual jump, return to live).
    pub fn on_desired_changed(&mut self, now: DateTime<Utc>) {
        self.rollover = None;
        self.reconcile(now);
    }

    /// Returns `false` for events of another lifetime.
    pub fn handle_player_event(&mut self, envelope: PlayerEnvelope, now: DateTime<Utc>) -> bool {
        if envelope.token != self.token {
            debug!(
                event = ?envelope.event,
                token = %envelope.token,
                current = %self.token,
                "Ignoring stale player event"
            );
            return false;
        }
        match envelope.event {
            PlayerEvent::Ready => self.on_ready(now),
            PlayerEvent::StateChange(state) => self.on_state_change(state, now),
            PlayerEvent::Error(code) => self.on_error(code, now),
        }
        true
    }

    pub fn user_gesture(&mut self) {
        self.autoplay.on_gesture();
    }

    pub fn tap_to_start(&mut self) {
        self.autoplay.tap_to_start(self.player.as_ref());
        self.tap_prompted = false;
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.autoplay.set_volume(volume, self.player.as_ref());
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    fn reconcile(&mut self, now: DateTime<Utc>) {
        if self.cooling_down {
            return;
        }
        let channel = Arc::clone(&self.channel);
        let position = self.store.position_for(&channel, now);
        let Some(index) = position.clip_index else {
            self.desired = None;
            return;
        };
        let clip = &channel.clips()[index];

        if self.failed_clips.contains(&clip.id) {
            self.skip_from(index, now);
            return;
        }

        self.desired = Some(DesiredClip {
            clip_index: index,
            clip_id: clip.id.clone(),
            offset: position.offset,
        });

        if let Some(rollover) = self.rollover {
            if index == rollover.from_index {
                return;
            }
            if index != rollover.to_index {
                debug!(expected = rollover.to_index, actual = index, "Schedule moved during rollover");
            }
            self.rollover = None;
        }

        let loaded_source = match &self.loaded {
            Some(loaded) if loaded.clip_index == index && loaded.clip_id == clip.id => {
                loaded.source_id.clone()
            }
            _ => {
                self.fallback.set_clip(clip);
                let Some(source) = self.fallback.current_source().cloned() else {
                    self.fail_clip(index, PlaybackFailure::AllSourcesFailed, now);
                    return;
                };
                self.pending_seek = Some(position.offset);
                self.request_load(index, source.id, 0.0, position.offset, false, now);
                return;
            }
        };

        if self.pending_load.is_some() || self.lifecycle != Lifecycle::Playing {
            return;
        }

        if position.remaining <= self.settings.switch_lead.as_secs_f64()
            && self.begin_rollover(index, &position, now)
        {
            return;
        }

        let actual = match self.player.current_offset() {
            Ok(actual) => actual,
            Err(e) => {
                debug!(error = %e, "Cannot read player offset");
                return;
            }
        };
        let drift = position.offset - actual;

        if drift.abs() > self.settings.reload_tolerance.as_secs_f64() {
            debug!(desired = position.offset, actual, "Drift beyond reload tolerance");
            self.pending_seek = Some(position.offset);
            self.request_load(index, loaded_source, 0.0, position.offset, true, now);
        } else if drift > self.settings.seek_tolerance.as_secs_f64() {
            debug!(desired = position.offset, actual, "Catching up");
            if let Err(e) = self.player.seek_to(position.offset) {
                warn!(error = %e, "Seek failed");
            }
        }
    }

    fn bucket(&self, desired_offset: f64) -> i64 {
        let window = self.settings.video_buffer_window.as_secs_f64();
        if window <= 0.0 {
            return desired_offset.floor() as i64;
        }
        (desired_offset / window).floor() as i64
    }

    /// Queues a load behind the debounce, coalescing with any queued one.
    ///
    /// Unless `force`d, a load matching what is already loaded (same clip,
    /// source and offset bucket) is dropped.
    fn request_load(
        &mut self,
        clip_index: usize,
        source_id: String,
        start_offset: f64,
        desired_offset: f64,
        force: bool,
        now: DateTime<Utc>,
    ) {
        let bucket = self.bucket(desired_offset);
        let already_loaded = self.loaded.as_ref().is_some_and(|l| {
            l.clip_index == clip_index && l.source_id == source_id && l.bucket == bucket
        });
        if already_loaded && !force {
            return;
        }
        self.pending_load = Some(LoadRequest {
            clip_index,
            source_id,
            start_offset,
            bucket,
        });
        self.timers
            .arm_once(TimerKind::LoadDebounce, now, self.settings.load_debounce);
    }

    fn issue_load(&mut self, request: LoadRequest, now: DateTime<Utc>) {
        let channel = Arc::clone(&self.channel);
        let Some(clip) = channel.clip(request.clip_index) else {
            return;
        };
        self.pending_load = None;
        self.timers.cancel(TimerKind::LoadDebounce);

        info!(
            channel = %channel.id(),
            clip = %clip.id,
            source = %request.source_id,
            start = request.start_offset,
            "Loading clip"
        );
        self.loaded = Some(LoadedClip {
            clip_index: request.clip_index,
            clip_id: clip.id.clone(),
            source_id: request.source_id.clone(),
            offset_at_load: request.start_offset,
            bucket: request.bucket,
        });

        if let Err(e) = self.player.load(&request.source_id, request.start_offset) {
            warn!(error = %e, clip = %clip.id, "Load failed");
            self.load_in_flight = false;
            self.on_transient(now);
            return;
        }

        self.load_in_flight = true;
        self.set_lifecycle(Lifecycle::Loading, now);
        self.autoplay.on_load(self.player.as_ref());
        self.tap_prompted = false;
        self.timers.cancel(TimerKind::BufferShow);
        self.timers
            .arm(TimerKind::Grace1, now, self.settings.playback_start_grace_1);
        self.timers
            .arm(TimerKind::Grace2, now, self.settings.playback_start_grace_2);
        self.timers
            .arm(TimerKind::BufferWatchdog, now, self.settings.buffer_watchdog);
    }

    /// Loads the next clip shortly before the boundary.
    ///
    /// Returns `true` if a transition was started.
    fn begin_rollover(&mut self, index: usize, position: &SchedulePosition, now: DateTime<Utc>) -> bool {
        let channel = Arc::clone(&self.channel);
        let lookahead = after(now, secs_to_duration(position.remaining + LOOKAHEAD_MARGIN_SECS));
        let next = self.store.peek_position(&channel, lookahead);
        let Some(next_index) = next.clip_index else {
            return false;
        };
        if next_index == index {
            return false;
        }
        let next_clip = &channel.clips()[next_index];
        if self.failed_clips.contains(&next_clip.id) {
            return false;
        }

        self.fallback.set_clip(next_clip);
        let Some(source) = self.fallback.current_source().cloned() else {
            return false;
        };
        let from_clip_id = channel.clips()[index].id.clone();

        debug!(
            from = %from_clip_id,
            to = %next_clip.id,
            remaining = position.remaining,
            "Clip rollover"
        );
        self.rollover = Some(Rollover {
            from_index: index,
            to_index: next_index,
        });
        self.pending_seek = Some(next.offset);
        let bucket = self.bucket(next.offset);
        self.issue_load(
            LoadRequest {
                clip_index: next_index,
                source_id: source.id,
                start_offset: 0.0,
                bucket,
            },
            now,
        );
        self.events.broadcast(TvEvent::ClipTransition {
            from_clip_id,
            to_clip_id: next_clip.id.clone(),
        });
        true
    }

    // ========================================================================
    // Player events
    // ========================================================================

    fn on_ready(&mut self, now: DateTime<Utc>) {
        let channel = Arc::clone(&self.channel);
        let position = self.store.position_for(&channel, now);
        if let (Some(loaded), Some(index)) = (&self.loaded, position.clip_index) {
            if loaded.clip_index == index {
                self.pending_seek = Some(position.offset);
            }
        }
        debug!(pending_seek = ?self.pending_seek, "Player ready");
        self.reconcile(now);
    }

    fn on_state_change(&mut self, state: PlayerState, now: DateTime<Utc>) {
        debug!(state = ?state, lifecycle = %self.lifecycle, "Player state change");
        match state {
            PlayerState::Playing => self.on_playing(now),
            PlayerState::Buffering => {
                if self.lifecycle != Lifecycle::Buffering {
                    self.set_lifecycle(Lifecycle::Buffering, now);
                    self.timers
                        .arm(TimerKind::BufferShow, now, self.settings.buffer_show_delay);
                    self.timers
                        .arm_once(TimerKind::BufferWatchdog, now, self.settings.buffer_watchdog);
                }
            }
            PlayerState::Paused => {
                if matches!(self.lifecycle, Lifecycle::Playing | Lifecycle::Buffering) {
                    self.set_lifecycle(Lifecycle::Paused, now);
                    self.timers.cancel(TimerKind::BufferShow);
                    self.timers.cancel(TimerKind::BufferWatchdog);
                    self.hide_buffering();
                }
                self.timers
                    .arm_once(TimerKind::Grace1, now, self.settings.playback_start_grace_1);
            }
            PlayerState::Ended => self.on_ended(now),
            PlayerState::Unstarted | PlayerState::Cued => {}
        }
    }

    /// The player reached the end of the loaded clip.
    ///
    /// A clip that ends before the schedule leaves it is never reloaded:
    /// close to the boundary the next clip is rolled in, otherwise the
    /// channel moves on to the next playable clip.
    fn on_ended(&mut self, now: DateTime<Utc>) {
        let Some(loaded) = self.loaded.clone() else {
            self.reconcile(now);
            return;
        };
        if self.rollover.is_some_and(|r| r.to_index == loaded.clip_index) {
            debug!(clip = %loaded.clip_id, "Ignoring end of stream during rollover");
            return;
        }
        self.load_in_flight = false;
        self.rollover = None;

        let channel = Arc::clone(&self.channel);
        let position = self.store.position_for(&channel, now);
        if position.clip_index != Some(loaded.clip_index) {
            self.loaded = None;
            self.reconcile(now);
            return;
        }
        if position.remaining <= self.settings.switch_lead.as_secs_f64()
            && self.begin_rollover(loaded.clip_index, &position, now)
        {
            return;
        }

        let next = self
            .next_playable(loaded.clip_index)
            .unwrap_or(loaded.clip_index);
        info!(
            clip = %loaded.clip_id,
            remaining = position.remaining,
            next,
            "Clip ended ahead of schedule"
        );
        self.loaded = None;
        match self.store.set_manual(&channel, next, 0.0) {
            Ok(_) => self.reconcile(now),
            Err(e) => warn!(error = %e, "Cannot move past ended clip"),
        }
    }

    fn on_playing(&mut self, now: DateTime<Utc>) {
        let was_playing = self.lifecycle == Lifecycle::Playing;
        self.set_lifecycle(Lifecycle::Playing, now);
        self.load_in_flight = false;
        for kind in [
            TimerKind::BufferShow,
            TimerKind::BufferWatchdog,
            TimerKind::Grace1,
            TimerKind::Grace2,
            TimerKind::Mobile1,
            TimerKind::Mobile2,
            TimerKind::Retry,
        ] {
            self.timers.cancel(kind);
        }
        self.hide_buffering();

        // catch-up only, never backward
        let channel = Arc::clone(&self.channel);
        let position = self.store.position_for(&channel, now);
        let same_clip = matches!(
            (&self.loaded, position.clip_index),
            (Some(loaded), Some(index)) if loaded.clip_index == index
        );
        if same_clip {
            match self.player.current_offset() {
                Ok(actual) if actual < position.offset - self.settings.seek_tolerance.as_secs_f64() => {
                    debug!(actual, target = position.offset, "Seeking to scheduled offset");
                    if let Err(e) = self.player.seek_to(position.offset) {
                        warn!(error = %e, "Seek failed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Cannot read player offset"),
            }
        }
        self.pending_seek = None;
        self.retry_count = 0;
        self.watchdog_strikes = 0;
        self.consecutive_skips = 0;
        self.autoplay.on_playing(self.player.as_ref());

        if !was_playing {
            if let Some(loaded) = &self.loaded {
                info!(clip = %loaded.clip_id, source = %loaded.source_id, "Playback started");
                self.events.broadcast(TvEvent::PlaybackStart {
                    clip_id: loaded.clip_id.clone(),
                });
            }
        }
    }

    fn on_error(&mut self, code: PlayerErrorCode, now: DateTime<Utc>) {
        self.load_in_flight = false;
        let Some(loaded) = &self.loaded else {
            warn!(code = ?code, "Player error with nothing loaded");
            return;
        };
        warn!(
            code = ?code,
            class = ?code.class(),
            clip = %loaded.clip_id,
            source = %loaded.source_id,
            "Player error"
        );
        match code.class() {
            ErrorClass::Permanent => self.on_permanent(ErrorClass::Permanent, now),
            ErrorClass::Transient => self.on_transient(now),
        }
    }

    /// Moves to the next source of the loaded clip, or gives the clip up.
    fn on_permanent(&mut self, class: ErrorClass, now: DateTime<Utc>) {
        let Some(loaded) = self.loaded.clone() else {
            return;
        };
        let channel = Arc::clone(&self.channel);
        let Some(clip) = channel.clip(loaded.clip_index) else {
            return;
        };
        self.fallback.set_clip(clip);
        self.retry_count = 0;
        self.timers.cancel(TimerKind::Retry);

        let next = self.fallback.mark_failed().cloned();
        debug!(
            clip = %clip.id,
            reason = %PlaybackFailure::SourceUnplayable { source_id: loaded.source_id.clone(), class },
            "Source given up"
        );
        let Some(next) = next else {
            self.fail_clip(loaded.clip_index, PlaybackFailure::AllSourcesFailed, now);
            return;
        };

        let position = self.store.position_for(&channel, now);
        let offset = match position.clip_index {
            Some(index) if index == loaded.clip_index => position.offset,
            _ => 0.0,
        };
        info!(clip = %clip.id, source = %next.id, offset, "Falling back to alternate source");
        self.events.broadcast(TvEvent::SourceFallback {
            clip_id: clip.id.clone(),
            source: next.clone(),
        });
        self.pending_seek = Some(offset);
        let bucket = self.bucket(offset);
        self.issue_load(
            LoadRequest {
                clip_index: loaded.clip_index,
                source_id: next.id,
                start_offset: offset,
                bucket,
            },
            now,
        );
    }

    fn on_transient(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        if self.retry_count > self.settings.max_retries {
            info!(retries = self.settings.max_retries, "Retries exhausted");
            self.on_permanent(ErrorClass::Transient, now);
            return;
        }
        let delay = self.settings.retry_delay(self.retry_count);
        self.set_lifecycle(Lifecycle::Recovering, now);
        self.timers.arm(TimerKind::Retry, now, delay);
        if let Some(loaded) = &self.loaded {
            info!(
                clip = %loaded.clip_id,
                attempt = self.retry_count,
                delay_ms = delay.as_millis() as u64,
                "Retrying"
            );
            self.events.broadcast(TvEvent::Recovering {
                clip_id: loaded.clip_id.clone(),
                attempt: self.retry_count,
            });
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn fire(&mut self, kind: TimerKind, now: DateTime<Utc>) {
        match kind {
            TimerKind::LoadDebounce => {
                if let Some(request) = self.pending_load.take() {
                    self.issue_load(request, now);
                }
            }
            TimerKind::BufferShow => {
                if self.lifecycle == Lifecycle::Buffering && !self.buffering_shown {
                    self.buffering_shown = true;
                    self.events.broadcast(TvEvent::Buffering(true));
                }
            }
            TimerKind::BufferWatchdog => self.on_buffer_watchdog(now),
            TimerKind::Retry => self.reload_current(now, false),
            TimerKind::Grace1 => {
                if self.lifecycle != Lifecycle::Playing && self.player_state().is_some_and(PlayerState::is_idle) {
                    debug!("Autoplay did not start, nudging");
                    self.autoplay.muted_play(self.player.as_ref());
                }
            }
            TimerKind::Grace2 => {
                let playing = self.player_state() == Some(PlayerState::Playing);
                if self.lifecycle != Lifecycle::Playing && !playing && !self.tap_prompted {
                    info!("Autoplay blocked, asking for a tap");
                    self.tap_prompted = true;
                    self.events.broadcast(TvEvent::TapToStart);
                }
            }
            TimerKind::Mobile1 | TimerKind::Mobile2 => {
                if self.lifecycle != Lifecycle::Playing && self.loaded.is_some() {
                    debug!(timer = ?kind, "Mobile watchdog, forcing muted play");
                    self.autoplay.muted_play(self.player.as_ref());
                }
            }
            TimerKind::SkipCooldown => {
                info!(channel = %self.channel.id(), "Skip cooldown over, retrying failed clips");
                self.cooling_down = false;
                self.failed_clips.clear();
                self.consecutive_skips = 0;
                self.retry_count = 0;
                self.watchdog_strikes = 0;
                self.fallback.reset();
                self.loaded = None;
            }
        }
    }

    fn on_buffer_watchdog(&mut self, now: DateTime<Utc>) {
        if !matches!(self.lifecycle, Lifecycle::Loading | Lifecycle::Buffering) {
            return;
        }
        let Some(loaded) = self.loaded.clone() else {
            return;
        };
        self.watchdog_strikes += 1;
        warn!(
            clip = %loaded.clip_id,
            strikes = self.watchdog_strikes,
            lifecycle = %self.lifecycle,
            "Buffer watchdog fired"
        );
        if self.watchdog_strikes > self.settings.watchdog_escalation {
            self.fail_clip(loaded.clip_index, PlaybackFailure::PlayerUnresponsive, now);
            return;
        }
        self.retry_count += 1;
        self.set_lifecycle(Lifecycle::Recovering, now);
        self.events.broadcast(TvEvent::Recovering {
            clip_id: loaded.clip_id,
            attempt: self.retry_count,
        });
        let hard = self.watchdog_strikes == self.settings.watchdog_escalation;
        self.reload_current(now, hard);
    }

    /// Reloads the loaded source, slightly rewound, or at the scheduled
    /// offset for a hard reload.
    fn reload_current(&mut self, now: DateTime<Utc>, hard: bool) {
        let Some(loaded) = self.loaded.clone() else {
            self.reconcile(now);
            return;
        };
        let channel = Arc::clone(&self.channel);
        let position = self.store.position_for(&channel, now);
        let desired_offset = match position.clip_index {
            Some(index) if index == loaded.clip_index => position.offset,
            _ => loaded.offset_at_load,
        };
        let start = if hard {
            desired_offset
        } else {
            let actual = self
                .player
                .current_offset()
                .unwrap_or(loaded.offset_at_load);
            (actual - 1.0).max(0.0)
        };

        self.pending_seek = Some(desired_offset);
        let bucket = self.bucket(desired_offset);
        self.issue_load(
            LoadRequest {
                clip_index: loaded.clip_index,
                source_id: loaded.source_id,
                start_offset: start,
                bucket,
            },
            now,
        );
    }

    // ========================================================================
    // Skipping
    // ========================================================================

    fn fail_clip(&mut self, index: usize, reason: PlaybackFailure, now: DateTime<Utc>) {
        let channel = Arc::clone(&self.channel);
        let clip_id = channel.clips()[index].id.clone();
        warn!(clip = %clip_id, reason = %reason, "Clip unplayable");

        self.failed_clips.insert(clip_id.clone());
        self.pending_load = None;
        self.pending_seek = None;
        self.load_in_flight = false;
        for kind in [
            TimerKind::LoadDebounce,
            TimerKind::BufferShow,
            TimerKind::BufferWatchdog,
            TimerKind::Retry,
            TimerKind::Grace1,
            TimerKind::Grace2,
        ] {
            self.timers.cancel(kind);
        }
        self.hide_buffering();
        self.set_lifecycle(Lifecycle::Failed, now);
        self.events.broadcast(TvEvent::Failure { clip_id, reason });

        self.consecutive_skips += 1;
        self.skip_from(index, now);
    }

    /// Jumps to the next clip not known to fail, within the skip budget.
    fn skip_from(&mut self, index: usize, now: DateTime<Utc>) {
        let channel = Arc::clone(&self.channel);
        let budget = self.settings.skip_budget(channel.len());

        let next = match self.next_playable(index) {
            Some(next) if self.consecutive_skips <= budget => next,
            _ => {
                self.start_cooldown(index, now);
                return;
            }
        };

        self.loaded = None;
        self.rollover = None;
        match self.store.set_manual(&channel, next, 0.0) {
            Ok(_) => {
                info!(
                    channel = %channel.id(),
                    from = index,
                    to = next,
                    skips = self.consecutive_skips,
                    "Skipping to next playable clip"
                );
                self.reconcile(now);
            }
            Err(e) => {
                warn!(error = %e, "Cannot skip");
                self.start_cooldown(index, now);
            }
        }
    }

    fn next_playable(&self, index: usize) -> Option<usize> {
        let clips = self.channel.clips();
        (1..clips.len())
            .map(|step| (index + step) % clips.len())
            .find(|&i| !self.failed_clips.contains(&clips[i].id))
    }

    fn start_cooldown(&mut self, index: usize, now: DateTime<Utc>) {
        let clip_id = self.channel.clips()[index].id.clone();
        warn!(
            channel = %self.channel.id(),
            skips = self.consecutive_skips,
            cooldown_ms = self.settings.skip_cooldown.as_millis() as u64,
            "No playable clip, cooling down"
        );
        self.cooling_down = true;
        self.loaded = None;
        self.set_lifecycle(Lifecycle::Failed, now);
        self.timers
            .arm(TimerKind::SkipCooldown, now, self.settings.skip_cooldown);
        self.events.broadcast(TvEvent::Failure {
            clip_id,
            reason: PlaybackFailure::SkipBudgetExhausted,
        });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn set_lifecycle(&mut self, lifecycle: Lifecycle, now: DateTime<Utc>) {
        if self.lifecycle != lifecycle {
            debug!(from = %self.lifecycle, to = %lifecycle, "Lifecycle");
            self.lifecycle = lifecycle;
            self.last_state_change_at = now;
        }
    }

    fn hide_buffering(&mut self) {
        if self.buffering_shown {
            self.buffering_shown = false;
            self.events.broadcast(TvEvent::Buffering(false));
        }
    }

    fn player_state(&self) -> Option<PlayerState> {
        match self.player.state() {
            Ok(state) => Some(state),
            Err(e) => {
                debug!(error = %e, "Cannot read player state");
                None
            }
        }
    }
}
