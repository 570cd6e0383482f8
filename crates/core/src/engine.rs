use studio_engine::{AudioGraph, AudioSourceController};
use studio_transport::{SegmentResolver, TransportControl, TransportHandle};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::bridge::TransportBridge;
use crate::config::EngineConfig;
use crate::playback_loop::{LoopState, PlaybackEvent, PlaybackLoop};

/// Playback engine for one project timeline.
///
/// Construction and transport binding are separate steps: build the engine
/// early, then call [`PlaybackEngine::bind`] once the UI owning the transport
/// is ready.
pub struct PlaybackEngine<G: AudioGraph, R: SegmentResolver> {
    playback: PlaybackLoop<G>,
    bridge: TransportBridge,
    resolver: R,
    config: EngineConfig,
}

impl<G: AudioGraph, R: SegmentResolver> PlaybackEngine<G, R> {
    pub fn new(graph: G, resolver: R, config: EngineConfig) -> Self {
        let controller = AudioSourceController::new(graph)
            .with_late_start_threshold(config.late_start_threshold_ms());
        Self {
            playback: PlaybackLoop::new(controller).with_event_capacity(config.event_log_capacity),
            bridge: TransportBridge::new(),
            resolver,
            config,
        }
    }

    /// Attach the transport and sync to it right away. Binding a different
    /// transport later silences everything started against the old one.
    pub fn bind(&mut self, transport: TransportHandle) {
        self.bridge.bind(transport);
        self.tick();
    }

    pub fn is_bound(&self) -> bool {
        self.bridge.is_bound()
    }

    pub fn tick(&mut self) {
        self.playback.tick(&self.bridge, &self.resolver);
    }

    /// Seek and resynchronize immediately, without waiting for the next tick.
    pub fn jump_at(&mut self, timestamp_ms: f64) {
        if !self.bridge.is_bound() {
            tracing::debug!(timestamp_ms, "jump before transport is bound, dropped");
            return;
        }
        self.bridge.jump_at(timestamp_ms);
        self.playback.seek(&self.bridge, &self.resolver);
    }

    /// Flip the transport. The loop picks the change up on its next tick.
    pub fn toggle_playback(&self) {
        self.bridge.toggle_playback();
    }

    pub fn is_playing(&self) -> bool {
        self.bridge.is_playing()
    }

    pub fn cursor_ms(&self) -> f64 {
        self.bridge.cursor_ms()
    }

    pub fn state(&self) -> LoopState {
        self.playback.state()
    }

    pub fn controller(&self) -> &AudioSourceController<G> {
        self.playback.controller()
    }

    pub fn controller_mut(&mut self) -> &mut AudioSourceController<G> {
        self.playback.controller_mut()
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Swap the timeline content. Live sources are reconciled on the next tick.
    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn take_events(&mut self) -> Vec<PlaybackEvent> {
        self.playback.take_events()
    }

    /// Tick on the configured interval until `shutdown` turns true or its
    /// sender goes away. Everything is silenced on the way out.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            tick_ms = self.config.tick_interval().as_millis() as u64,
            "playback loop running"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.playback.stop_all();
        tracing::info!("playback loop stopped");
    }
}
