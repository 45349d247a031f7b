//! Muted-autoplay protocol.
//!
//! Browsers refuse audible autoplay until the viewer interacts with the
//! page, so playback always starts muted and is unmuted on the first
//! `Playing` after a gesture (power-on counts as one). This is the only code
//! that calls `play`, `mute` and `unmute` on the player.

use tracing::{debug, warn};

use crate::player::PlayerBackend;

#[derive(Debug, Clone)]
pub struct AutoplayGuard {
    muted_for_autoplay: bool,
    user_unlocked: bool,
    first_load_done: bool,
    volume: f64,
}

impl AutoplayGuard {
    pub fn new(volume: f64, user_unlocked: bool) -> Self {
        Self {
            muted_for_autoplay: false,
            user_unlocked,
            first_load_done: false,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn muted_for_autoplay(&self) -> bool {
        self.muted_for_autoplay
    }

    pub fn user_unlocked(&self) -> bool {
        self.user_unlocked
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn on_gesture(&mut self) {
        self.user_unlocked = true;
    }

    /// Right after a `load`: the first one starts muted playback.
    pub fn on_load(&mut self, player: &dyn PlayerBackend) {
        if self.first_load_done {
            return;
        }
        self.first_load_done = true;
        self.muted_play(player);
    }

    /// On every `Playing`: unmute if the viewer has unlocked audio.
    pub fn on_playing(&mut self, player: &dyn PlayerBackend) {
        if !(self.user_unlocked && self.muted_for_autoplay) {
            return;
        }
        if let Err(e) = player.unmute() {
            warn!(error = %e, "Unmute failed");
            return;
        }
        if let Err(e) = player.set_volume(self.volume) {
            warn!(error = %e, "Cannot restore volume");
        }
        self.muted_for_autoplay = false;
        debug!(volume = self.volume, "Audio unlocked");
    }

    /// Re-issues a muted `play`.
    pub fn muted_play(&mut self, player: &dyn PlayerBackend) {
        if let Err(e) = player.mute() {
            warn!(error = %e, "Mute failed");
        }
        self.muted_for_autoplay = true;
        if let Err(e) = player.play() {
            warn!(error = %e, "Play failed");
        }
    }

    /// Tap-to-start handler: play inside the gesture, then unmute.
    pub fn tap_to_start(&mut self, player: &dyn PlayerBackend) {
        self.user_unlocked = true;
        if let Err(e) = player.play() {
            warn!(error = %e, "Play failed");
        }
        self.muted_for_autoplay = true;
        self.on_playing(player);
    }

    pub fn set_volume(&mut self, volume: f64, player: &dyn PlayerBackend) {
        self.volume = volume.clamp(0.0, 1.0);
        if self.muted_for_autoplay {
            return;
        }
        if let Err(e) = player.set_volume(self.volume) {
            warn!(error = %e, "Cannot set volume");
        }
    }
}
