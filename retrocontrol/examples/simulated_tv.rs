//! Runs a two-channel TV against a simulated player for a few seconds.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p retrocontrol --example simulated_tv
//! ```

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::Sender;
use retrocatalog::{Catalog, Channel, Clip, Source};
use retrocontrol::{
    ChannelController, LifecycleToken, PlayerBackend, PlayerEnvelope, PlayerError, PlayerEvent,
    PlayerState, TvEvent, TvRuntime,
};
use retroschedule::BroadcastStore;
use retroutils::SystemClock;
use tracing_subscriber::EnvFilter;

/// Plays instantly and reports its events back to the runtime.
#[derive(Default)]
struct SimulatedPlayer {
    inner: Mutex<Simulation>,
}

#[derive(Default)]
struct Simulation {
    tx: Option<Sender<PlayerEnvelope>>,
    token: Option<LifecycleToken>,
    state: Option<PlayerState>,
    start_offset: f64,
    started_at: Option<Instant>,
}

impl SimulatedPlayer {
    fn connect(&self, tx: Sender<PlayerEnvelope>) {
        self.inner.lock().unwrap().tx = Some(tx);
    }

    fn emit(sim: &Simulation, event: PlayerEvent) {
        if let (Some(tx), Some(token)) = (&sim.tx, sim.token) {
            let _ = tx.send(PlayerEnvelope::new(token, event));
        }
    }
}

impl PlayerBackend for SimulatedPlayer {
    fn bind(&self, token: LifecycleToken) -> Result<(), PlayerError> {
        self.inner.lock().unwrap().token = Some(token);
        Ok(())
    }

    fn load(&self, source_id: &str, start_offset: f64) -> Result<(), PlayerError> {
        println!("player: load {} at {:.1}s", source_id, start_offset);
        let mut sim = self.inner.lock().unwrap();
        sim.start_offset = start_offset;
        sim.started_at = None;
        sim.state = Some(PlayerState::Unstarted);
        Self::emit(&sim, PlayerEvent::Ready);
        Ok(())
    }

    fn play(&self) -> Result<(), PlayerError> {
        let mut sim = self.inner.lock().unwrap();
        sim.started_at = Some(Instant::now());
        sim.state = Some(PlayerState::Playing);
        Self::emit(&sim, PlayerEvent::StateChange(PlayerState::Playing));
        Ok(())
    }

    fn pause(&self) -> Result<(), PlayerError> {
        let mut sim = self.inner.lock().unwrap();
        sim.state = Some(PlayerState::Paused);
        Ok(())
    }

    fn seek_to(&self, offset: f64) -> Result<(), PlayerError> {
        println!("player: seek to {:.1}s", offset);
        let mut sim = self.inner.lock().unwrap();
        sim.start_offset = offset;
        sim.started_at = Some(Instant::now());
        Ok(())
    }

    fn mute(&self) -> Result<(), PlayerError> {
        Ok(())
    }

    fn unmute(&self) -> Result<(), PlayerError> {
        println!("player: unmuted");
        Ok(())
    }

    fn set_volume(&self, volume: f64) -> Result<(), PlayerError> {
        println!("player: volume {:.2}", volume);
        Ok(())
    }

    fn current_offset(&self) -> Result<f64, PlayerError> {
        let sim = self.inner.lock().unwrap();
        let elapsed = sim.started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        Ok(sim.start_offset + elapsed)
    }

    fn state(&self) -> Result<PlayerState, PlayerError> {
        Ok(self.inner.lock().unwrap().state.unwrap_or(PlayerState::Unstarted))
    }
}

fn clip(id: &str, duration: f64) -> Clip {
    Clip::new(id, vec![Source::new(format!("yt-{}", id), "primary")], duration)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let catalog = Arc::new(Catalog::new(vec![
        Channel::new("music", "Music", vec![clip("m1", 3.0), clip("m2", 4.0)]),
        Channel::new("news", "News", vec![clip("n1", 5.0)]),
    ]));

    let clock = SystemClock::shared();
    let epoch = Utc::now() - chrono::Duration::seconds(2);
    let store = Arc::new(BroadcastStore::new(epoch, clock.clone()));
    let player = Arc::new(SimulatedPlayer::default());

    let controller = ChannelController::new(catalog, store, player.clone(), clock.clone());
    let runtime = TvRuntime::new(controller, clock);
    player.connect(runtime.player_events());

    let events = runtime.controller().subscribe();
    runtime.start()?;
    runtime.controller().power_on()?;

    let printer = thread::spawn(move || {
        while let Ok(event) = events.recv() {
            match event {
                TvEvent::PositionChanged { .. } => {}
                other => println!("event: {:?}", other),
            }
        }
    });

    thread::sleep(Duration::from_secs(5));
    runtime.controller().channel_up()?;
    thread::sleep(Duration::from_secs(3));

    runtime.stop();
    drop(runtime);
    let _ = printer.join();
    Ok(())
}
