use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// The three transport operations the timeline UI and the playback engine
/// share, plus a cursor read.
pub trait TransportControl {
    /// Authoritative seek, in project milliseconds.
    fn jump_at(&self, timestamp_ms: f64);
    fn is_playing(&self) -> bool;
    fn toggle_playback(&self);
    fn cursor_ms(&self) -> f64;
}

/// Owner of the playback cursor and the playing flag.
///
/// While playing, the cursor is derived from a monotonic clock: the position
/// at the last anchor (play, pause or jump) plus the time elapsed since.
/// Every jump bumps `seek_epoch`, so readers that poll can tell a
/// discontinuity from ordinary cursor motion.
pub struct Transport {
    clock: Arc<dyn Clock>,
    playing: bool,
    anchor_ms: f64,
    anchor_at: Duration,
    seek_epoch: u64,
}

impl Transport {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let anchor_at = clock.now();
        Self {
            clock,
            playing: false,
            anchor_ms: 0.0,
            anchor_at,
            seek_epoch: 0,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }

    pub fn cursor_ms(&self) -> f64 {
        if !self.playing {
            return self.anchor_ms;
        }
        let elapsed = self.clock.now().saturating_sub(self.anchor_at);
        self.anchor_ms + elapsed.as_secs_f64() * 1000.0
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn seek_epoch(&self) -> u64 {
        self.seek_epoch
    }

    pub fn play(&mut self) {
        if self.playing {
            return;
        }
        self.anchor_at = self.clock.now();
        self.playing = true;
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.anchor_ms = self.cursor_ms();
        self.anchor_at = self.clock.now();
        self.playing = false;
    }

    pub fn toggle_playback(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Move the cursor. Negative and non-finite timestamps land on 0.
    pub fn jump_at(&mut self, timestamp_ms: f64) {
        self.anchor_ms = if timestamp_ms.is_finite() {
            timestamp_ms.max(0.0)
        } else {
            0.0
        };
        self.anchor_at = self.clock.now();
        self.seek_epoch += 1;
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("playing", &self.playing)
            .field("cursor_ms", &self.cursor_ms())
            .field("seek_epoch", &self.seek_epoch)
            .finish()
    }
}

/// Cloneable handle to a [`Transport`] shared between the UI and the engine.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    inner: Arc<Mutex<Transport>>,
}

impl TransportHandle {
    pub fn new(transport: Transport) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Transport> {
        // Transport has no invariants a panicking holder could break halfway.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seek_epoch(&self) -> u64 {
        self.lock().seek_epoch()
    }

    pub fn play(&self) {
        self.lock().play();
    }

    pub fn pause(&self) {
        self.lock().pause();
    }
}

impl TransportControl for TransportHandle {
    fn jump_at(&self, timestamp_ms: f64) {
        self.lock().jump_at(timestamp_ms);
    }

    fn is_playing(&self) -> bool {
        self.lock().is_playing()
    }

    fn toggle_playback(&self) {
        self.lock().toggle_playback();
    }

    fn cursor_ms(&self) -> f64 {
        self.lock().cursor_ms()
    }
}
