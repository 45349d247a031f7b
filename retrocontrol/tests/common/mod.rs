#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::Receiver;
use retrocatalog::{Channel, Clip, Source};
use retrocontrol::{
    LifecycleToken, PlayerBackend, PlayerEnvelope, PlayerError, PlayerEvent, PlayerState,
    PlayerSupervisor, SupervisorSettings, TvEvent, TvEventBus,
};
use retroschedule::BroadcastStore;
use retroutils::ManualClock;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Bind(LifecycleToken),
    Load(String, f64),
    Play,
    Pause,
    SeekTo(f64),
    Mute,
    Unmute,
    SetVolume(f64),
}

/// Player fake: records every command, reports whatever state and offset the
/// test sets.
#[derive(Debug)]
pub struct RecordingPlayer {
    calls: Mutex<Vec<Call>>,
    state: Mutex<PlayerState>,
    offset: Mutex<f64>,
    token: Mutex<Option<LifecycleToken>>,
}

impl RecordingPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(PlayerState::Unstarted),
            offset: Mutex::new(0.0),
            token: Mutex::new(None),
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn loads(&self) -> Vec<(String, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Load(source, offset) => Some((source, offset)),
                _ => None,
            })
            .collect()
    }

    pub fn last_load(&self) -> Option<(String, f64)> {
        self.loads().pop()
    }

    pub fn token(&self) -> Option<LifecycleToken> {
        *self.token.lock().unwrap()
    }

    pub fn set_state(&self, state: PlayerState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_offset(&self, offset: f64) {
        *self.offset.lock().unwrap() = offset;
    }

    /// Envelope for the currently bound lifetime
    pub fn envelope(&self, event: PlayerEvent) -> PlayerEnvelope {
        PlayerEnvelope::new(self.token().expect("player not bound"), event)
    }
}

impl PlayerBackend for RecordingPlayer {
    fn bind(&self, token: LifecycleToken) -> Result<(), PlayerError> {
        *self.token.lock().unwrap() = Some(token);
        self.record(Call::Bind(token));
        Ok(())
    }

    fn load(&self, source_id: &str, start_offset: f64) -> Result<(), PlayerError> {
        self.record(Call::Load(source_id.to_string(), start_offset));
        self.set_offset(start_offset);
        self.set_state(PlayerState::Unstarted);
        Ok(())
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.record(Call::Play);
        Ok(())
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.record(Call::Pause);
        self.set_state(PlayerState::Paused);
        Ok(())
    }

    fn seek_to(&self, offset: f64) -> Result<(), PlayerError> {
        self.record(Call::SeekTo(offset));
        self.set_offset(offset);
        Ok(())
    }

    fn mute(&self) -> Result<(), PlayerError> {
        self.record(Call::Mute);
        Ok(())
    }

    fn unmute(&self) -> Result<(), PlayerError> {
        self.record(Call::Unmute);
        Ok(())
    }

    fn set_volume(&self, volume: f64) -> Result<(), PlayerError> {
        self.record(Call::SetVolume(volume));
        Ok(())
    }

    fn current_offset(&self) -> Result<f64, PlayerError> {
        Ok(*self.offset.lock().unwrap())
    }

    fn state(&self) -> Result<PlayerState, PlayerError> {
        Ok(*self.state.lock().unwrap())
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn clip(id: &str, duration: f64, sources: &[&str]) -> Clip {
    let sources = sources
        .iter()
        .enumerate()
        .map(|(i, s)| Source::new(*s, if i == 0 { "primary" } else { "alternate" }))
        .collect();
    Clip::new(id, sources, duration)
}

/// `[A 10s, B 20s, C 30s]`, B with an alternate source
pub fn channel_z() -> Channel {
    Channel::new(
        "z",
        "Z",
        vec![
            clip("a", 10.0, &["a0"]),
            clip("b", 20.0, &["b0", "b1"]),
            clip("c", 30.0, &["c0"]),
        ],
    )
}

pub const VOLUME: f64 = 0.8;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<BroadcastStore>,
    pub channel: Arc<Channel>,
    pub player: Arc<RecordingPlayer>,
    pub events: TvEventBus,
    pub rx: Receiver<TvEvent>,
}

impl Harness {
    /// Channel Z, `secs` after the epoch
    pub fn at(secs: f64) -> Self {
        Self::with_channel(channel_z(), secs)
    }

    pub fn with_channel(channel: Channel, secs: f64) -> Self {
        let clock = ManualClock::new(t0());
        clock.advance_secs(secs);
        let store = Arc::new(BroadcastStore::new(t0(), clock.clone()));
        let events = TvEventBus::new();
        let rx = events.subscribe();
        Self {
            clock,
            store,
            channel: Arc::new(channel),
            player: RecordingPlayer::new(),
            events,
            rx,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.clock.advance_ms(ms);
    }

    /// Supervisor with audio already unlocked
    pub fn supervisor(&self) -> PlayerSupervisor {
        self.locked_supervisor().with_user_unlocked(true)
    }

    /// Supervisor that has not seen any gesture yet
    pub fn locked_supervisor(&self) -> PlayerSupervisor {
        PlayerSupervisor::new(
            self.player.clone(),
            self.store.clone(),
            self.channel.clone(),
            SupervisorSettings::default(),
            self.events.clone(),
        )
        .with_volume(VOLUME)
    }

    pub fn send(&self, supervisor: &mut PlayerSupervisor, event: PlayerEvent) -> bool {
        supervisor.handle_player_event(self.player.envelope(event), self.now())
    }

    pub fn drain_events(&self) -> Vec<TvEvent> {
        self.rx.try_iter().collect()
    }

    /// Starts a supervisor and brings it to `Playing` on the scheduled clip.
    pub fn playing(&self) -> PlayerSupervisor {
        let mut supervisor = self.supervisor();
        supervisor.start(self.now(), true);
        self.advance_ms(100);
        supervisor.tick(self.now());
        self.send(&mut supervisor, PlayerEvent::Ready);
        self.send(&mut supervisor, PlayerEvent::StateChange(PlayerState::Playing));
        self.player.set_state(PlayerState::Playing);
        supervisor
    }
}
