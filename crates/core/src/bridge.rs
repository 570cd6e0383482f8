//! Connection between the playback engine and the externally owned transport.
//!
//! The bridge starts unbound. The surrounding application binds the shared
//! transport once its timeline UI reports ready; until then, requests are
//! dropped and the transport reads as paused at 0.

use studio_transport::{TransportControl, TransportHandle};
use tracing::debug;

#[derive(Debug, Default)]
pub struct TransportBridge {
    transport: Option<TransportHandle>,
    binding: u64,
}

impl TransportBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Second initialization phase. Rebinding replaces the previous transport
    /// and counts as a new binding.
    pub fn bind(&mut self, transport: TransportHandle) {
        self.binding += 1;
        debug!(binding = self.binding, "transport bound to playback engine");
        self.transport = Some(transport);
    }

    /// Increments on every `bind`; 0 while unbound.
    pub fn binding(&self) -> u64 {
        self.binding
    }

    pub fn is_bound(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport(&self) -> Option<&TransportHandle> {
        self.transport.as_ref()
    }

    /// Increments on every jump, from whichever side issued it.
    pub fn seek_epoch(&self) -> u64 {
        self.transport.as_ref().map_or(0, TransportHandle::seek_epoch)
    }
}

impl TransportControl for TransportBridge {
    fn jump_at(&self, timestamp_ms: f64) {
        match &self.transport {
            Some(transport) => transport.jump_at(timestamp_ms),
            None => debug!(timestamp_ms, "jump before transport is bound, dropped"),
        }
    }

    fn is_playing(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_playing())
    }

    fn toggle_playback(&self) {
        match &self.transport {
            Some(transport) => transport.toggle_playback(),
            None => debug!("toggle before transport is bound, dropped"),
        }
    }

    fn cursor_ms(&self) -> f64 {
        self.transport.as_ref().map_or(0.0, |t| t.cursor_ms())
    }
}
