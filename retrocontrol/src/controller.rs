//! Channel controller.
//!
//! Turns viewer intents (power, channel up/down, jumps, volume) into
//! broadcast-store writes and supervisor lifetimes. The controller owns at
//! most one [`PlayerSupervisor`], alive while power is on; switching channel
//! drops it, which cancels all of its timers, and builds a new one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use retrocatalog::{Catalog, Channel};
use retroschedule::{BroadcastStore, PositionView, PositionWatcher};
use retroutils::SharedClock;
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::events::{TvEvent, TvEventBus};
use crate::player::{PlayerBackend, PlayerEnvelope};
use crate::session::{SessionSelection, SessionStore};
use crate::settings::SupervisorSettings;
use crate::supervisor::{PlayerSupervisor, SupervisorSnapshot};

pub struct ChannelController {
    catalog: Arc<Catalog>,
    store: Arc<BroadcastStore>,
    player: Arc<dyn PlayerBackend>,
    clock: SharedClock,
    settings: SupervisorSettings,
    events: TvEventBus,
    session: Option<SessionStore>,
    watcher: PositionWatcher,
    supervisor: Option<PlayerSupervisor>,
    channel: Option<Arc<Channel>>,
    power_on: bool,
    volume: f64,
    user_unlocked: bool,
    /// Clips known to fail, per channel, kept across supervisor lifetimes
    failed_clips: HashMap<String, HashSet<String>>,
    last_view: Option<PositionView>,
}

impl std::fmt::Debug for ChannelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelController")
            .field("channel", &self.channel.as_ref().map(|c| c.id().to_string()))
            .field("power_on", &self.power_on)
            .field("volume", &self.volume)
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

impl ChannelController {
    /// Starts powered off, on the first channel of the catalog.
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<BroadcastStore>,
        player: Arc<dyn PlayerBackend>,
        clock: SharedClock,
    ) -> Self {
        let watcher = PositionWatcher::new(Arc::clone(&store), Arc::clone(&clock));
        let mut controller = Self {
            catalog,
            store,
            player,
            clock,
            settings: SupervisorSettings::default(),
            events: TvEventBus::new(),
            session: None,
            watcher,
            supervisor: None,
            channel: None,
            power_on: false,
            volume: 1.0,
            user_unlocked: false,
            failed_clips: HashMap::new(),
            last_view: None,
        };
        if let Some(first) = controller.catalog.first_channel() {
            controller.store.initialize(first.id());
            controller.watcher.set_channel(Some(Arc::clone(&first)));
            controller.channel = Some(first);
        }
        controller
    }

    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_events(mut self, events: TvEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<BroadcastStore> {
        &self.store
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn events(&self) -> &TvEventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<TvEvent> {
        self.events.subscribe()
    }

    pub fn current_channel(&self) -> Option<&Arc<Channel>> {
        self.channel.as_ref()
    }

    pub fn is_powered(&self) -> bool {
        self.power_on
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Position view of the selected channel, as of the last tick.
    pub fn view(&self) -> &PositionView {
        self.watcher.view()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Reapplies the last saved selection.
    ///
    /// The saved clip index is advisory: the clip on air comes from the
    /// schedule. Power comes back on without counting as a gesture, so audio
    /// stays muted until the viewer interacts.
    pub fn restore_session(&mut self) -> Option<SessionSelection> {
        let selection = self.session.as_ref()?.restore()?;
        info!(
            channel = ?selection.channel_id,
            advisory_clip = ?selection.clip_index,
            power_on = selection.power_on,
            "Restoring session"
        );
        self.volume = selection.volume;

        let channel = selection
            .channel_id
            .as_deref()
            .and_then(|id| self.catalog.get_channel(id));
        match channel {
            Some(channel) => {
                self.store.initialize(channel.id());
                self.attach(channel);
            }
            None if selection.channel_id.is_some() => {
                warn!(channel = ?selection.channel_id, "Saved channel no longer in catalog");
            }
            None => {}
        }

        if selection.power_on && !self.power_on && self.channel.is_some() {
            self.power_on = true;
            self.start_supervisor(self.clock.now(), true);
        }
        self.emit_position();
        Some(selection)
    }

    pub fn save_session(&self) {
        let Some(session) = &self.session else {
            return;
        };
        let clip_index = self.channel.as_ref().and_then(|c| {
            self.store
                .state(c.id())
                .and_then(|s| s.last_observed_clip_index)
        });
        session.save(&SessionSelection {
            channel_id: self.channel.as_ref().map(|c| c.id().to_string()),
            clip_index,
            volume: self.volume,
            power_on: self.power_on,
            saved_at: None,
        });
    }

    // ========================================================================
    // Power
    // ========================================================================

    /// Counts as a user gesture.
    pub fn power_on(&mut self) -> Result<()> {
        if self.channel.is_none() {
            return Err(ControlError::NoChannels);
        }
        self.user_unlocked = true;
        if self.power_on {
            if let Some(supervisor) = &mut self.supervisor {
                supervisor.user_gesture();
            }
            return Ok(());
        }
        info!(channel = ?self.channel.as_ref().map(|c| c.id()), "Power on");
        self.power_on = true;
        self.start_supervisor(self.clock.now(), true);
        self.emit_position();
        self.save_session();
        Ok(())
    }

    pub fn power_off(&mut self) {
        if !self.power_on {
            return;
        }
        info!("Power off");
        self.stop_supervisor();
        self.power_on = false;
        self.save_session();
    }

    /// Returns the new power state.
    pub fn power_toggle(&mut self) -> Result<bool> {
        if self.power_on {
            self.power_off();
        } else {
            self.power_on()?;
        }
        Ok(self.power_on)
    }

    // ========================================================================
    // Channel selection
    // ========================================================================

    /// Next channel in catalog order, restarted from its first clip.
    pub fn channel_up(&mut self) -> Result<()> {
        let current = self.channel.as_ref().ok_or(ControlError::NoChannels)?;
        let next = self
            .catalog
            .next_channel_id(current.id())
            .ok_or(ControlError::NoChannels)?
            .to_string();
        self.switch_manual(&next)
    }

    /// Previous channel in catalog order, restarted from its first clip.
    pub fn channel_down(&mut self) -> Result<()> {
        let current = self.channel.as_ref().ok_or(ControlError::NoChannels)?;
        let previous = self
            .catalog
            .previous_channel_id(current.id())
            .ok_or(ControlError::NoChannels)?
            .to_string();
        self.switch_manual(&previous)
    }

    /// Tunes to `channel_id` in whatever mode it was left.
    pub fn select_channel(&mut self, channel_id: &str) -> Result<()> {
        let channel = self.lookup(channel_id)?;
        self.store.initialize(channel.id());
        self.switch_to(channel);
        Ok(())
    }

    /// Plays clip `clip_index` of `channel_id` from its start.
    pub fn jump_to_clip(&mut self, channel_id: &str, clip_index: usize) -> Result<()> {
        let channel = self.lookup(channel_id)?;
        self.store.set_manual(&channel, clip_index, 0.0)?;
        self.switch_to(channel);
        Ok(())
    }

    /// Tunes to `channel_id` on its broadcast timeline.
    pub fn select_category(&mut self, channel_id: &str) -> Result<()> {
        let channel = self.lookup(channel_id)?;
        self.store.initialize(channel.id());
        self.store.clear_manual(channel.id());
        self.switch_to(channel);
        Ok(())
    }

    /// Puts the current channel back on its timeline.
    pub fn return_to_live(&mut self) -> Result<()> {
        let channel = self.channel.clone().ok_or(ControlError::NoChannels)?;
        if self.store.clear_manual(channel.id()) {
            self.desired_changed();
        }
        Ok(())
    }

    fn lookup(&self, channel_id: &str) -> Result<Arc<Channel>> {
        self.catalog
            .get_channel(channel_id)
            .ok_or_else(|| ControlError::UnknownChannel(channel_id.to_string()))
    }

    fn switch_manual(&mut self, channel_id: &str) -> Result<()> {
        let channel = self.lookup(channel_id)?;
        if channel.is_empty() {
            self.store.initialize(channel.id());
        } else {
            self.store.set_manual(&channel, 0, 0.0)?;
        }
        self.switch_to(channel);
        Ok(())
    }

    /// Makes `channel` current. Same channel only notifies the supervisor.
    fn switch_to(&mut self, channel: Arc<Channel>) {
        let same = self
            .channel
            .as_ref()
            .is_some_and(|c| c.id() == channel.id());
        if same && self.supervisor.is_some() {
            self.desired_changed();
            self.save_session();
            return;
        }

        info!(channel = %channel.id(), name = %channel.name(), "Switching channel");
        self.stop_supervisor();
        self.attach(channel);
        if self.power_on {
            self.start_supervisor(self.clock.now(), false);
        }
        self.emit_position();
        self.save_session();
    }

    fn attach(&mut self, channel: Arc<Channel>) {
        self.watcher.set_channel(Some(Arc::clone(&channel)));
        self.channel = Some(channel);
    }

    fn desired_changed(&mut self) {
        let now = self.clock.now();
        if let Some(supervisor) = &mut self.supervisor {
            supervisor.on_desired_changed(now);
        }
        self.watcher.tick();
        self.emit_position();
    }

    fn start_supervisor(&mut self, now: DateTime<Utc>, after_power_on: bool) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        let failed = self.failed_clips.remove(channel.id()).unwrap_or_default();
        let mut supervisor = PlayerSupervisor::new(
            Arc::clone(&self.player),
            Arc::clone(&self.store),
            channel,
            self.settings.clone(),
            self.events.clone(),
        )
        .with_volume(self.volume)
        .with_user_unlocked(self.user_unlocked)
        .with_failed_clips(failed);
        supervisor.start(now, after_power_on);
        self.supervisor = Some(supervisor);
    }

    fn stop_supervisor(&mut self) {
        let Some(mut supervisor) = self.supervisor.take() else {
            return;
        };
        supervisor.stop();
        let channel_id = supervisor.channel().id().to_string();
        let failed = supervisor.into_failed_clips();
        if !failed.is_empty() {
            self.failed_clips.insert(channel_id, failed);
        }
    }

    // ========================================================================
    // Viewer input
    // ========================================================================

    pub fn volume_change(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(supervisor) = &mut self.supervisor {
            supervisor.set_volume(self.volume);
        }
        self.save_session();
    }

    /// Any click, touch or key press at the UI boundary.
    pub fn user_gesture(&mut self) {
        self.user_unlocked = true;
        if let Some(supervisor) = &mut self.supervisor {
            supervisor.user_gesture();
        }
    }

    pub fn tap_to_start(&mut self) {
        self.user_unlocked = true;
        if let Some(supervisor) = &mut self.supervisor {
            supervisor.tap_to_start();
        }
    }

    // ========================================================================
    // Driving
    // ========================================================================

    pub fn handle_player_event(&mut self, envelope: PlayerEnvelope) -> bool {
        let now = self.clock.now();
        match &mut self.supervisor {
            Some(supervisor) => supervisor.handle_player_event(envelope, now),
            None => {
                debug!(event = ?envelope.event, "Player event while powered off");
                false
            }
        }
    }

    /// Periodic work: supervisor timers and reconciliation, position
    /// notifications and throttled persistence.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        if let Some(supervisor) = &mut self.supervisor {
            supervisor.tick(now);
        }
        self.watcher.poll();
        self.watcher.tick();
        self.emit_position();
        self.store.flush_due();
        if let Some(session) = &self.session {
            session.flush_due();
        }
    }

    /// Earliest supervisor deadline, if any.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.supervisor.as_ref().and_then(|s| s.next_deadline())
    }

    fn emit_position(&mut self) {
        let view = self.watcher.view();
        let Some(channel_id) = view.channel_id.clone() else {
            return;
        };
        if self.last_view.as_ref() == Some(view) {
            return;
        }
        self.last_view = Some(view.clone());
        self.events.broadcast(TvEvent::PositionChanged {
            channel_id,
            position: view.clone(),
        });
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_position(&self, channel_id: &str) -> Result<PositionView> {
        let channel = self.lookup(channel_id)?;
        Ok(self.store.peek_view(&channel, self.clock.now()))
    }

    pub fn get_supervisor_state(&self) -> Option<SupervisorSnapshot> {
        self.supervisor.as_ref().map(PlayerSupervisor::snapshot)
    }

    /// Final writes, on shutdown or page hide.
    pub fn shutdown(&mut self) {
        info!("Shutting down channel controller");
        self.stop_supervisor();
        self.save_session();
        self.store.flush();
        if let Some(session) = &self.session {
            session.flush();
        }
    }
}
