//! Runtime driver.
//!
//! Runs a [`ChannelController`] on its own thread: player events arrive over
//! a channel and are handled as soon as they come in; otherwise the thread
//! wakes on the tick interval or on the next supervisor deadline, whichever
//! is first. Stopping flushes persisted state and joins the thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use retroutils::{seconds_between, secs_to_duration, SharedClock};
use tracing::{debug, info};

use crate::controller::ChannelController;
use crate::error::{ControlError, Result};
use crate::player::PlayerEnvelope;

/// Never sleep less than this between two wake-ups without events
const MIN_WAIT: Duration = Duration::from_millis(5);

pub struct TvRuntime {
    controller: Arc<Mutex<ChannelController>>,
    clock: SharedClock,
    tick_interval: Duration,
    player_tx: Sender<PlayerEnvelope>,
    player_rx: Receiver<PlayerEnvelope>,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TvRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvRuntime")
            .field("tick_interval", &self.tick_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl TvRuntime {
    pub fn new(controller: ChannelController, clock: SharedClock) -> Self {
        let tick_interval = controller.settings().tick_interval;
        let (player_tx, player_rx) = unbounded();
        Self {
            controller: Arc::new(Mutex::new(controller)),
            clock,
            tick_interval,
            player_tx,
            player_rx,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Where the player bridge sends its events.
    pub fn player_events(&self) -> Sender<PlayerEnvelope> {
        self.player_tx.clone()
    }

    pub fn controller(&self) -> MutexGuard<'_, ChannelController> {
        self.controller.lock().expect("Controller mutex poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .expect("Runtime handle mutex poisoned")
            .is_some()
    }

    /// Starts the driver thread. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut handle_guard = self.handle.lock().expect("Runtime handle mutex poisoned");
        if handle_guard.is_some() {
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let controller = Arc::clone(&self.controller);
        let clock = Arc::clone(&self.clock);
        let events = self.player_rx.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let tick_interval = self.tick_interval;

        let handle = thread::Builder::new()
            .name("retrotv-driver".to_string())
            .spawn(move || driver_loop(controller, clock, events, stop_flag, tick_interval))
            .map_err(|e| ControlError::other(format!("cannot spawn driver thread: {}", e)))?;

        info!(tick_ms = tick_interval.as_millis() as u64, "Runtime started");
        *handle_guard = Some(handle);
        Ok(())
    }

    /// Stops the driver thread, then performs the final writes.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self
            .handle
            .lock()
            .expect("Runtime handle mutex poisoned")
            .take();
        let Some(handle) = handle else {
            return;
        };
        debug!("Stopping driver thread");
        let _ = handle.join();
        self.controller().shutdown();
        info!("Runtime stopped");
    }
}

impl Drop for TvRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

fn driver_loop(
    controller: Arc<Mutex<ChannelController>>,
    clock: SharedClock,
    events: Receiver<PlayerEnvelope>,
    stop_flag: Arc<AtomicBool>,
    tick_interval: Duration,
) {
    while !stop_flag.load(Ordering::SeqCst) {
        let wait = {
            let controller = controller.lock().expect("Controller mutex poisoned");
            match controller.next_deadline() {
                Some(deadline) => {
                    let secs = seconds_between(clock.now(), deadline).max(0.0);
                    secs_to_duration(secs).min(tick_interval).max(MIN_WAIT)
                }
                None => tick_interval,
            }
        };

        match events.recv_timeout(wait) {
            Ok(envelope) => {
                let mut controller = controller.lock().expect("Controller mutex poisoned");
                controller.handle_player_event(envelope);
                while let Ok(envelope) = events.try_recv() {
                    controller.handle_player_event(envelope);
                }
                controller.tick();
            }
            Err(RecvTimeoutError::Timeout) => {
                controller.lock().expect("Controller mutex poisoned").tick();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Driver thread exiting");
}
