mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{channel_z, clip, t0, Call, RecordingPlayer};
use retrocatalog::{Catalog, Channel};
use retrocontrol::{
    ChannelController, ControlError, Lifecycle, PlayerEvent, PlayerState, SessionStore, TvEvent,
};
use retroschedule::{BroadcastMode, BroadcastStore, BROADCAST_STATE_KEY};
use retrostore::{DirectoryStore, KeyValueStore, MemoryStore, ThrottledWriter};
use retroutils::ManualClock;

fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::new(vec![
        channel_z(),
        Channel::new(
            "y",
            "Y",
            vec![clip("x", 10.0, &["x0"]), clip("w", 10.0, &["w0"])],
        ),
    ]))
}

struct Fixture {
    clock: Arc<ManualClock>,
    store: Arc<BroadcastStore>,
    player: Arc<RecordingPlayer>,
    controller: ChannelController,
}

/// Controller on catalog `[z, y]`, `secs` after the epoch
fn fixture(secs: f64) -> Fixture {
    let clock = ManualClock::new(t0());
    clock.advance_secs(secs);
    let store = Arc::new(BroadcastStore::new(t0(), clock.clone()));
    let player = RecordingPlayer::new();
    let controller = ChannelController::new(catalog(), store.clone(), player.clone(), clock.clone());
    Fixture {
        clock,
        store,
        player,
        controller,
    }
}

impl Fixture {
    fn step(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        self.controller.tick();
    }

    fn send(&mut self, event: PlayerEvent) -> bool {
        let envelope = self.player.envelope(event);
        self.controller.handle_player_event(envelope)
    }
}

#[test]
fn test_power_on_plays_scheduled_clip() {
    let mut f = fixture(15.0);
    assert!(!f.controller.is_powered());
    assert_eq!(f.controller.current_channel().unwrap().id(), "z");

    f.controller.power_on().unwrap();
    assert!(f.controller.is_powered());
    f.step(100);
    assert_eq!(f.player.loads(), vec![("b0".to_string(), 0.0)]);

    let state = f.controller.get_supervisor_state().unwrap();
    assert_eq!(state.lifecycle, Lifecycle::Loading);
    assert!(state.user_unlocked);
    assert!(state.muted_for_autoplay);

    f.send(PlayerEvent::StateChange(PlayerState::Playing));
    let state = f.controller.get_supervisor_state().unwrap();
    assert_eq!(state.lifecycle, Lifecycle::Playing);
    assert!(!state.muted_for_autoplay);
}

#[test]
fn test_power_off_stops_everything() {
    let mut f = fixture(15.0);
    f.controller.power_on().unwrap();
    f.step(100);
    let old = f.player.envelope(PlayerEvent::Ready);

    f.controller.power_off();
    assert!(!f.controller.is_powered());
    assert!(f.player.calls().contains(&Call::Pause));
    assert!(f.controller.get_supervisor_state().is_none());

    let loads = f.player.loads().len();
    f.step(10_000);
    assert_eq!(f.player.loads().len(), loads);
    assert!(!f.controller.handle_player_event(old));

    assert!(f.controller.power_toggle().unwrap());
    assert!(!f.controller.power_toggle().unwrap());
}

#[test]
fn test_channel_up_restarts_next_channel_from_first_clip() {
    let mut f = fixture(15.0);
    f.controller.power_on().unwrap();
    f.step(100);
    let old = f.player.envelope(PlayerEvent::Error(retrocontrol::PlayerErrorCode::NotFound));

    f.controller.channel_up().unwrap();
    assert_eq!(f.controller.current_channel().unwrap().id(), "y");
    assert_eq!(f.store.mode("y"), BroadcastMode::Manual);

    // events of the previous supervisor are dropped
    assert!(!f.controller.handle_player_event(old));

    f.player.clear();
    f.step(100);
    assert_eq!(f.player.loads(), vec![("x0".to_string(), 0.0)]);

    // wraps around the catalog
    f.controller.channel_up().unwrap();
    assert_eq!(f.controller.current_channel().unwrap().id(), "z");
    f.step(100);
    assert_eq!(f.player.last_load(), Some(("a0".to_string(), 0.0)));

    f.controller.channel_down().unwrap();
    assert_eq!(f.controller.current_channel().unwrap().id(), "y");
}

#[test]
fn test_jump_to_clip_and_return_to_live() {
    let mut f = fixture(15.0);
    f.controller.power_on().unwrap();
    f.step(100);

    f.controller.jump_to_clip("z", 2).unwrap();
    assert_eq!(f.store.mode("z"), BroadcastMode::Manual);
    f.step(100);
    assert_eq!(f.player.last_load(), Some(("c0".to_string(), 0.0)));

    f.controller.return_to_live().unwrap();
    assert_eq!(f.store.mode("z"), BroadcastMode::Timeline);
    f.step(100);
    assert_eq!(f.player.last_load(), Some(("b0".to_string(), 0.0)));
    assert_eq!(f.controller.get_position("z").unwrap().clip_index, Some(1));
}

#[test]
fn test_select_channel_keeps_mode_and_select_category_resets_it() {
    let mut f = fixture(15.0);
    f.controller.jump_to_clip("y", 1).unwrap();
    f.controller.select_channel("z").unwrap();
    assert_eq!(f.store.mode("z"), BroadcastMode::Timeline);

    f.controller.select_channel("y").unwrap();
    assert_eq!(f.store.mode("y"), BroadcastMode::Manual);
    assert_eq!(f.controller.get_position("y").unwrap().clip_id(), Some("w"));

    f.controller.select_category("y").unwrap();
    assert_eq!(f.store.mode("y"), BroadcastMode::Timeline);
}

#[test]
fn test_errors() {
    let mut f = fixture(15.0);
    assert!(matches!(
        f.controller.get_position("nope"),
        Err(ControlError::UnknownChannel(_))
    ));
    assert!(matches!(
        f.controller.jump_to_clip("z", 9),
        Err(ControlError::Schedule(_))
    ));
    assert!(matches!(
        f.controller.select_channel("nope"),
        Err(ControlError::UnknownChannel(_))
    ));

    let clock = ManualClock::new(t0());
    let store = Arc::new(BroadcastStore::new(t0(), clock.clone()));
    let mut empty = ChannelController::new(
        Arc::new(Catalog::new(vec![])),
        store,
        RecordingPlayer::new(),
        clock,
    );
    assert!(matches!(empty.power_on(), Err(ControlError::NoChannels)));
    assert!(matches!(empty.channel_up(), Err(ControlError::NoChannels)));
}

#[test]
fn test_volume_waits_for_unmute() {
    let mut f = fixture(15.0);
    f.controller.power_on().unwrap();
    f.step(100);
    f.player.clear();

    f.controller.volume_change(0.3);
    assert!(f.player.calls().is_empty());

    f.send(PlayerEvent::StateChange(PlayerState::Playing));
    assert!(f.player.calls().ends_with(&[Call::Unmute, Call::SetVolume(0.3)]));

    f.player.clear();
    f.controller.volume_change(0.6);
    assert_eq!(f.player.calls(), vec![Call::SetVolume(0.6)]);
    assert_eq!(f.controller.volume(), 0.6);
}

#[test]
fn test_position_notifications() {
    let mut f = fixture(15.0);
    let events = f.controller.subscribe();

    f.controller.power_on().unwrap();
    let first: Vec<TvEvent> = events.try_iter().collect();
    match first.last() {
        Some(TvEvent::PositionChanged {
            channel_id,
            position,
        }) => {
            assert_eq!(channel_id, "z");
            assert_eq!(position.clip_id(), Some("b"));
            assert_eq!(position.offset, 5.0);
        }
        other => panic!("unexpected {:?}", other),
    }

    f.step(1_000);
    let offsets: Vec<f64> = events
        .try_iter()
        .filter_map(|e| match e {
            TvEvent::PositionChanged { position, .. } => Some(position.offset),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![6.0]);
}

#[test]
fn test_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(t0());
    clock.advance_secs(15.0);

    let open = || {
        let sink: Arc<dyn KeyValueStore> = Arc::new(DirectoryStore::new(dir.path()).unwrap());
        Arc::new(ThrottledWriter::new(sink, clock.clone(), Duration::from_secs(1)))
    };

    {
        let writer = open();
        let store = Arc::new(BroadcastStore::new(t0(), clock.clone()).with_writer(writer.clone()));
        let mut controller =
            ChannelController::new(catalog(), store, RecordingPlayer::new(), clock.clone())
                .with_session(SessionStore::new(writer, clock.clone()));
        controller.jump_to_clip("y", 1).unwrap();
        controller.volume_change(0.3);
        controller.power_on().unwrap();
        controller.shutdown();
    }

    let writer = open();
    let store = Arc::new(BroadcastStore::new(t0(), clock.clone()).with_writer(writer.clone()));
    assert_eq!(store.restore().unwrap(), 2);
    let mut controller =
        ChannelController::new(catalog(), store.clone(), RecordingPlayer::new(), clock.clone())
            .with_session(SessionStore::new(writer, clock.clone()));

    let selection = controller.restore_session().unwrap();
    assert_eq!(selection.channel_id.as_deref(), Some("y"));
    assert_eq!(controller.current_channel().unwrap().id(), "y");
    assert_eq!(controller.volume(), 0.3);
    assert!(controller.is_powered());
    assert_eq!(store.mode("y"), BroadcastMode::Manual);

    // audio stays locked until the viewer interacts
    let state = controller.get_supervisor_state().unwrap();
    assert!(!state.user_unlocked);
}

#[test]
fn test_throttled_state_write_lands_without_session() {
    let clock = ManualClock::new(t0());
    clock.advance_secs(15.0);
    let sink = Arc::new(MemoryStore::new());
    let writer = Arc::new(ThrottledWriter::new(
        sink.clone(),
        clock.clone(),
        Duration::from_secs(1),
    ));
    let store = Arc::new(BroadcastStore::new(t0(), clock.clone()).with_writer(writer));
    let mut controller =
        ChannelController::new(catalog(), store, RecordingPlayer::new(), clock.clone());
    let stored = || sink.get(BROADCAST_STATE_KEY).unwrap().unwrap_or_default();

    controller.jump_to_clip("z", 2).unwrap();
    assert!(stored().contains("\"mode\":\"manual\""));

    // inside the write interval: kept pending
    clock.advance_ms(200);
    controller.return_to_live().unwrap();
    assert!(stored().contains("\"mode\":\"manual\""));

    for _ in 0..5 {
        clock.advance_ms(200);
        controller.tick();
    }
    assert!(stored().contains("\"mode\":\"timeline\""));
}

#[test]
fn test_get_position_has_no_side_effects() {
    let mut f = fixture(15.0);
    f.controller.jump_to_clip("z", 0).unwrap();
    let anchored = f.store.updated_at("z");
    let changes = f.store.subscribe();

    f.clock.advance_secs(12.0);
    let position = f.controller.get_position("z").unwrap();
    assert_eq!(position.clip_id(), Some("b"));
    assert_eq!(position.mode, BroadcastMode::Manual);
    assert!(changes.try_recv().is_err());
    assert_eq!(f.store.updated_at("z"), anchored);
}
