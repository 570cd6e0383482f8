//! Reconciliation of live audio sources against the segments under the cursor.
//!
//! The loop never sets the transport's state itself. It polls the bridge on
//! every tick and follows whatever the transport says: playing flag changes
//! move it between `Idle` and `Running`, and a changed seek epoch is handled
//! as a discontinuity.

use std::collections::{HashSet, VecDeque};
use std::sync::mpsc;

use studio_engine::{AudioGraph, AudioSourceController, EngineError};
use studio_transport::{SegmentId, SegmentResolver, SourceId, TransportControl};
use tracing::{debug, trace, warn};

use crate::bridge::TransportBridge;

/// Events kept by default before the oldest are dropped.
pub const EVENT_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// What the loop did, in the order it did it.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(LoopState),
    Seeked {
        cursor_ms: f64,
    },
    Started {
        source_id: SourceId,
        segment_id: SegmentId,
        offset_secs: f64,
    },
    Stopped {
        source_id: SourceId,
        segment_id: SegmentId,
    },
    SourceEnded {
        source_id: SourceId,
        segment_id: SegmentId,
    },
    StartFailed {
        segment_id: SegmentId,
    },
}

pub struct PlaybackLoop<G: AudioGraph> {
    controller: AudioSourceController<G>,
    state: LoopState,
    seen_binding: u64,
    seen_seek_epoch: u64,
    /// Active segments whose audio has nothing left at the cursor.
    exhausted: HashSet<SegmentId>,
    ended_tx: mpsc::Sender<(SourceId, SegmentId)>,
    ended_rx: mpsc::Receiver<(SourceId, SegmentId)>,
    events: VecDeque<PlaybackEvent>,
    event_capacity: usize,
}

impl<G: AudioGraph> PlaybackLoop<G> {
    pub fn new(controller: AudioSourceController<G>) -> Self {
        let (ended_tx, ended_rx) = mpsc::channel();
        Self {
            controller,
            state: LoopState::Idle,
            seen_binding: 0,
            seen_seek_epoch: 0,
            exhausted: HashSet::new(),
            ended_tx,
            ended_rx,
            events: VecDeque::new(),
            event_capacity: EVENT_LOG_CAPACITY,
        }
    }

    /// Keep at most `capacity` events, dropping the oldest. 0 turns the log off.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn controller(&self) -> &AudioSourceController<G> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AudioSourceController<G> {
        &mut self.controller
    }

    /// Drain the events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<PlaybackEvent> {
        self.events.drain(..).collect()
    }

    fn record(&mut self, event: PlaybackEvent) {
        if self.event_capacity == 0 {
            return;
        }
        if self.events.len() >= self.event_capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// One scheduled pass.
    pub fn tick<R>(&mut self, bridge: &TransportBridge, resolver: &R)
    where
        R: SegmentResolver + ?Sized,
    {
        self.collect_ended();

        if bridge.binding() != self.seen_binding {
            self.rebound(bridge);
        }

        let epoch = bridge.seek_epoch();
        if epoch != self.seen_seek_epoch {
            self.seen_seek_epoch = epoch;
            self.discontinuity(bridge.cursor_ms());
        }

        self.follow_transport(bridge, resolver);
    }

    /// Handle a jump that was just applied to the transport: every live
    /// source is stopped, then the loop reconciles at the new cursor right
    /// away if it is running.
    pub fn seek<R>(&mut self, bridge: &TransportBridge, resolver: &R)
    where
        R: SegmentResolver + ?Sized,
    {
        self.collect_ended();
        self.seen_binding = bridge.binding();
        self.seen_seek_epoch = bridge.seek_epoch();
        self.discontinuity(bridge.cursor_ms());
        self.follow_transport(bridge, resolver);
    }

    /// Silence everything without touching the transport.
    pub fn stop_all(&mut self) {
        self.exhausted.clear();
        for source in self.controller.stop_all() {
            self.record(PlaybackEvent::Stopped {
                source_id: source.source_id,
                segment_id: source.segment_id,
            });
        }
    }

    /// A different transport was bound. Nothing live was started against its
    /// cursor, and its seek epoch is unrelated to the one seen so far.
    fn rebound(&mut self, bridge: &TransportBridge) {
        debug!(binding = bridge.binding(), "transport rebound, restarting live sources");
        self.seen_binding = bridge.binding();
        self.seen_seek_epoch = bridge.seek_epoch();
        self.stop_all();
    }

    fn discontinuity(&mut self, cursor_ms: f64) {
        debug!(cursor_ms, "seek, restarting live sources");
        self.record(PlaybackEvent::Seeked { cursor_ms });
        self.stop_all();
    }

    fn follow_transport<R>(&mut self, bridge: &TransportBridge, resolver: &R)
    where
        R: SegmentResolver + ?Sized,
    {
        match (self.state, bridge.is_playing()) {
            (LoopState::Idle, true) => {
                self.set_state(LoopState::Running);
                self.reconcile(bridge.cursor_ms(), resolver);
            }
            (LoopState::Running, true) => self.reconcile(bridge.cursor_ms(), resolver),
            (LoopState::Running, false) => {
                self.set_state(LoopState::Idle);
                self.stop_all();
            }
            (LoopState::Idle, false) => {}
        }
    }

    fn set_state(&mut self, state: LoopState) {
        debug!(from = ?self.state, to = ?state, "playback loop state change");
        self.state = state;
        self.record(PlaybackEvent::StateChanged(state));
    }

    /// Converge live sources on the resolver's answer for `cursor_ms`.
    ///
    /// Stops are all issued before any start, so a segment that flickers out
    /// and back in never plays twice.
    fn reconcile<R>(&mut self, cursor_ms: f64, resolver: &R)
    where
        R: SegmentResolver + ?Sized,
    {
        let desired: Vec<_> = resolver
            .resolve(cursor_ms)
            .into_iter()
            .filter(|segment| {
                if !segment.has_audio() {
                    trace!(segment_id = %segment.id, "skipping segment without audio");
                }
                segment.has_audio()
            })
            .collect();
        let desired_ids: HashSet<SegmentId> = desired.iter().map(|s| s.id).collect();
        self.exhausted.retain(|id| desired_ids.contains(id));

        let stale: Vec<SourceId> = self
            .controller
            .live()
            .filter(|source| !desired_ids.contains(&source.segment_id))
            .map(|source| source.source_id)
            .collect();
        for source_id in stale {
            if let Some(source) = self.controller.stop(source_id) {
                self.record(PlaybackEvent::Stopped {
                    source_id,
                    segment_id: source.segment_id,
                });
            }
        }

        let mut live_ids: HashSet<SegmentId> = self.controller.live_segment_ids().collect();
        for segment in &desired {
            if self.exhausted.contains(&segment.id) || !live_ids.insert(segment.id) {
                continue;
            }
            let ended_tx = self.ended_tx.clone();
            let segment_id = segment.id;
            let started = self.controller.start(segment, cursor_ms, move |source_id| {
                let _ = ended_tx.send((source_id, segment_id));
            });
            match started {
                Ok(source) => self.record(PlaybackEvent::Started {
                    source_id: source.source_id,
                    segment_id,
                    offset_secs: source.offset_secs,
                }),
                Err(EngineError::Exhausted { offset_secs, .. }) => {
                    debug!(segment_id = %segment_id, offset_secs, "segment audio already played out");
                    live_ids.remove(&segment_id);
                    self.exhausted.insert(segment_id);
                }
                Err(err) => {
                    warn!(segment_id = %segment_id, %err, "segment failed to start");
                    live_ids.remove(&segment_id);
                    self.record(PlaybackEvent::StartFailed { segment_id });
                }
            }
        }
    }

    /// Pick up natural completions. A finished source is simply gone; the
    /// next tick starts whatever should follow it.
    fn collect_ended(&mut self) {
        self.controller.pump_ended();
        while let Ok((source_id, segment_id)) = self.ended_rx.try_recv() {
            self.record(PlaybackEvent::SourceEnded {
                source_id,
                segment_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use studio_engine::recording::{GraphOp, RecordingGraph};
    use studio_transport::{AudioArc, ManualClock, Segment, Timeline, Transport, TransportHandle};

    struct Harness {
        clock: Arc<ManualClock>,
        ui: TransportHandle,
        bridge: TransportBridge,
        playback: PlaybackLoop<RecordingGraph>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            let ui = TransportHandle::new(Transport::new(clock.clone()));
            let mut bridge = TransportBridge::new();
            bridge.bind(ui.clone());
            let playback = PlaybackLoop::new(AudioSourceController::new(RecordingGraph::new()));
            Self {
                clock,
                ui,
                bridge,
                playback,
            }
        }

        fn tick(&mut self, timeline: &Timeline) {
            self.playback.tick(&self.bridge, timeline);
        }

        fn jump(&mut self, timeline: &Timeline, ms: f64) {
            self.bridge.jump_at(ms);
            self.playback.seek(&self.bridge, timeline);
        }

        fn live_ids(&self) -> Vec<u64> {
            let mut ids: Vec<u64> = self
                .playback
                .controller()
                .live_segment_ids()
                .map(|id| id.0)
                .collect();
            ids.sort();
            ids
        }

        fn graph(&mut self) -> &mut RecordingGraph {
            self.playback.controller_mut().graph_mut()
        }
    }

    fn audio_segment(id: u64, start_ms: f64, duration_ms: f64) -> Segment {
        let frames = (duration_ms / 1000.0 * 8000.0) as usize;
        Segment::with_audio(SegmentId(id), start_ms, AudioArc::silence(frames, 8000, 1))
    }

    /// A: 0..4000, B: 2000..8000, C: 5000..6000
    fn timeline() -> Timeline {
        Timeline::from_segments([
            audio_segment(1, 0.0, 4000.0),
            audio_segment(2, 2000.0, 6000.0),
            audio_segment(3, 5000.0, 1000.0),
        ])
    }

    fn resolved_ids(timeline: &Timeline, cursor_ms: f64) -> Vec<u64> {
        let mut ids: Vec<u64> = timeline.resolve(cursor_ms).iter().map(|s| s.id.0).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_idle_until_transport_plays() {
        let timeline = timeline();
        let mut h = Harness::new();

        h.tick(&timeline);
        assert_eq!(h.playback.state(), LoopState::Idle);
        assert!(h.live_ids().is_empty());

        h.ui.toggle_playback();
        h.tick(&timeline);
        assert_eq!(h.playback.state(), LoopState::Running);
        assert_eq!(h.live_ids(), vec![1]);
    }

    #[test]
    fn test_live_set_tracks_resolver_while_cursor_moves() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.toggle_playback();

        for _ in 0..(9000 / 20) {
            h.tick(&timeline);
            let cursor = h.ui.cursor_ms();
            assert_eq!(h.live_ids(), resolved_ids(&timeline, cursor), "at {cursor}ms");
            h.clock.advance(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_segments_in_both_sets_are_left_alone() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.toggle_playback();
        h.tick(&timeline);
        h.graph().take_ops();

        h.clock.advance_ms(16);
        h.tick(&timeline);
        assert!(h.graph().ops().is_empty());
    }

    #[test]
    fn test_late_start_when_playing_mid_segment() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.jump_at(3500.0);
        h.ui.toggle_playback();
        h.tick(&timeline);

        let events = h.playback.take_events();
        let offsets: Vec<(u64, f64)> = events
            .iter()
            .filter_map(|e| match e {
                PlaybackEvent::Started {
                    segment_id,
                    offset_secs,
                    ..
                } => Some((segment_id.0, *offset_secs)),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![(1, 3.5), (2, 1.5)]);
    }

    #[test]
    fn test_pause_silences_everything() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.jump_at(5500.0);
        h.ui.toggle_playback();
        h.tick(&timeline);
        assert_eq!(h.live_ids(), vec![2, 3]);

        h.ui.toggle_playback();
        h.tick(&timeline);
        assert_eq!(h.playback.state(), LoopState::Idle);
        assert!(h.live_ids().is_empty());
        assert_eq!(h.graph().playing_count(), 0);
    }

    #[test]
    fn test_resume_restarts_at_paused_cursor() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.toggle_playback();
        h.tick(&timeline);
        h.clock.advance_ms(2500);
        h.ui.toggle_playback();
        h.tick(&timeline);
        h.clock.advance_ms(10_000);

        h.ui.toggle_playback();
        h.tick(&timeline);
        let restarted: Vec<_> = h
            .playback
            .controller()
            .live()
            .map(|s| (s.segment_id.0, s.offset_secs))
            .collect();
        assert_eq!(restarted, vec![(1, 2.5), (2, 0.0)]);
    }

    #[test]
    fn test_seek_restarts_sources_that_stay_active() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.jump_at(3000.0);
        h.ui.toggle_playback();
        h.tick(&timeline);
        assert_eq!(h.live_ids(), vec![1, 2]);
        let before: Vec<_> = h.playback.controller().live().cloned().collect();
        h.playback.take_events();

        h.jump(&timeline, 4500.0);

        assert_eq!(h.live_ids(), vec![2]);
        let b = h.playback.controller().live().next().unwrap().clone();
        assert_ne!(b.source_id, before[1].source_id);
        assert_eq!(b.offset_secs, 2.5);

        let events = h.playback.take_events();
        assert_eq!(
            events,
            vec![
                PlaybackEvent::Seeked { cursor_ms: 4500.0 },
                PlaybackEvent::Stopped {
                    source_id: before[0].source_id,
                    segment_id: SegmentId(1)
                },
                PlaybackEvent::Stopped {
                    source_id: before[1].source_id,
                    segment_id: SegmentId(2)
                },
                PlaybackEvent::Started {
                    source_id: b.source_id,
                    segment_id: SegmentId(2),
                    offset_secs: 2.5
                },
            ]
        );
    }

    #[test]
    fn test_jump_from_ui_is_detected_on_next_tick() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.jump_at(2500.0);
        h.ui.toggle_playback();
        h.tick(&timeline);
        let old: Vec<SourceId> = h.playback.controller().live().map(|s| s.source_id).collect();

        // Same segments stay active, but their offsets are now wrong.
        h.ui.jump_at(3600.0);
        h.tick(&timeline);

        let now: Vec<_> = h
            .playback
            .controller()
            .live()
            .map(|s| (s.source_id, s.segment_id.0, s.offset_secs))
            .collect();
        assert_eq!(now.len(), 2);
        assert!(now.iter().all(|(id, _, _)| !old.contains(id)));
        assert_eq!(now[0].1, 1);
        assert_eq!(now[0].2, 3.6);
        assert_eq!(now[1].1, 2);
        assert_eq!(now[1].2, 1.6);
    }

    #[test]
    fn test_seek_while_idle_starts_nothing() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.jump(&timeline, 3000.0);
        assert_eq!(h.playback.state(), LoopState::Idle);
        assert!(h.live_ids().is_empty());

        h.ui.toggle_playback();
        h.tick(&timeline);
        assert_eq!(h.live_ids(), vec![1, 2]);
    }

    #[test]
    fn test_stops_precede_starts() {
        // X: 0..1000, Y: 1000..2000
        let timeline = Timeline::from_segments([
            audio_segment(10, 0.0, 1000.0),
            audio_segment(20, 1000.0, 1000.0),
        ]);
        let mut h = Harness::new();
        h.ui.toggle_playback();
        h.tick(&timeline);
        let x = h.playback.controller().live().next().unwrap().generator;
        h.graph().take_ops();

        h.clock.advance_ms(1000);
        h.tick(&timeline);

        let ops = h.graph().take_ops();
        let stop_at = ops
            .iter()
            .position(|op| *op == GraphOp::Stop { generator: x })
            .unwrap();
        let start_at = ops
            .iter()
            .position(|op| matches!(op, GraphOp::Start { .. }))
            .unwrap();
        assert!(stop_at < start_at);
        assert_eq!(h.live_ids(), vec![20]);
    }

    #[test]
    fn test_natural_end_waits_for_next_tick() {
        let timeline = Timeline::from_segments([audio_segment(1, 0.0, 10_000.0)]);
        let mut h = Harness::new();
        h.ui.toggle_playback();
        h.tick(&timeline);
        let source = h.playback.controller().live().next().unwrap().clone();
        h.playback.take_events();

        // Audio ran out early (e.g. the segment is longer than its samples).
        h.graph().finish(source.generator);
        h.playback.controller_mut().pump_ended();
        assert!(h.live_ids().is_empty());

        h.clock.advance_ms(16);
        h.tick(&timeline);

        let events = h.playback.take_events();
        assert_eq!(
            events[0],
            PlaybackEvent::SourceEnded {
                source_id: source.source_id,
                segment_id: SegmentId(1)
            }
        );
        assert!(matches!(events[1], PlaybackEvent::Started { .. }));
        assert_eq!(h.live_ids(), vec![1]);
    }

    #[test]
    fn test_failed_start_does_not_abort_pass() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.graph().fail_next_generators(1);
        h.ui.jump_at(3000.0);
        h.ui.toggle_playback();
        h.tick(&timeline);

        assert_eq!(h.live_ids(), vec![2]);
        assert!(
            h.playback
                .take_events()
                .contains(&PlaybackEvent::StartFailed {
                    segment_id: SegmentId(1)
                })
        );

        // Retried on the next pass.
        h.tick(&timeline);
        assert_eq!(h.live_ids(), vec![1, 2]);
    }

    #[test]
    fn test_segments_without_audio_are_ignored() {
        let timeline = Timeline::from_segments([
            Segment::without_audio(SegmentId(1), 0.0, 5000.0),
            audio_segment(2, 0.0, 5000.0),
        ]);
        let mut h = Harness::new();
        h.ui.toggle_playback();
        h.tick(&timeline);
        assert_eq!(h.live_ids(), vec![2]);
    }

    #[test]
    fn test_duplicate_resolver_entries_start_once() {
        let twice = |cursor_ms: f64| {
            let segment = audio_segment(1, 0.0, 5000.0);
            if segment.is_active_at(cursor_ms) {
                vec![segment.clone(), segment]
            } else {
                Vec::new()
            }
        };
        let mut h = Harness::new();
        h.ui.toggle_playback();
        h.playback.tick(&h.bridge, &twice);
        assert_eq!(h.playback.controller().len(), 1);
    }
    #[test]
    fn test_played_out_segment_is_not_restarted() {
        // 1 s of audio on a 10 s segment.
        let short = Segment {
            duration_ms: 10_000.0,
            ..audio_segment(1, 0.0, 1000.0)
        };
        let timeline = Timeline::from_segments([short]);
        let mut h = Harness::new();
        h.ui.toggle_playback();
        h.tick(&timeline);
        let source = h.playback.controller().live().next().unwrap().clone();

        h.clock.advance_ms(1016);
        h.graph().finish(source.generator);
        for _ in 0..500 {
            h.tick(&timeline);
            h.clock.advance_ms(16);
        }

        let events = h.playback.take_events();
        let started = events
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::Started { .. }))
            .count();
        assert_eq!(started, 1);
        assert!(events.contains(&PlaybackEvent::SourceEnded {
            source_id: source.source_id,
            segment_id: SegmentId(1)
        }));
        assert!(h.live_ids().is_empty());

        // Seeking back into the samples plays it again.
        h.jump(&timeline, 200.0);
        assert_eq!(h.live_ids(), vec![1]);
    }

    #[test]
    fn test_cursor_past_samples_starts_nothing() {
        let short = Segment {
            duration_ms: 10_000.0,
            ..audio_segment(1, 0.0, 1000.0)
        };
        let timeline = Timeline::from_segments([short]);
        let mut h = Harness::new();
        h.ui.jump_at(1100.0);
        h.ui.toggle_playback();
        for _ in 0..500 {
            h.tick(&timeline);
            h.clock.advance_ms(16);
        }

        assert!(h.live_ids().is_empty());
        assert!(
            !h.graph()
                .ops()
                .iter()
                .any(|op| matches!(op, GraphOp::CreateGenerator { .. }))
        );
        assert_eq!(
            h.playback.take_events(),
            vec![PlaybackEvent::StateChanged(LoopState::Running)]
        );
    }

    #[test]
    fn test_event_log_keeps_newest() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.playback = PlaybackLoop::new(AudioSourceController::new(RecordingGraph::new()))
            .with_event_capacity(4);

        for _ in 0..10 {
            h.ui.toggle_playback();
            h.tick(&timeline);
        }

        let events = h.playback.take_events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], PlaybackEvent::StateChanged(LoopState::Running));
        assert!(matches!(events[1], PlaybackEvent::Started { .. }));
        assert_eq!(events[2], PlaybackEvent::StateChanged(LoopState::Idle));
        assert!(matches!(events[3], PlaybackEvent::Stopped { .. }));
    }

    #[test]
    fn test_event_log_can_be_disabled() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.playback = PlaybackLoop::new(AudioSourceController::new(RecordingGraph::new()))
            .with_event_capacity(0);
        h.ui.toggle_playback();
        h.tick(&timeline);

        assert_eq!(h.live_ids(), vec![1]);
        assert!(h.playback.take_events().is_empty());
    }

    #[test]
    fn test_rebind_restarts_against_new_transport() {
        let timeline = timeline();
        let mut h = Harness::new();
        h.ui.jump_at(3000.0);
        h.ui.toggle_playback();
        h.tick(&timeline);
        let old: Vec<SourceId> = h.playback.controller().live().map(|s| s.source_id).collect();
        assert_eq!(h.live_ids(), vec![1, 2]);

        // Same seek epoch as the old transport, different cursor.
        let other = TransportHandle::new(Transport::new(h.clock.clone()));
        other.jump_at(3500.0);
        other.play();
        assert_eq!(other.seek_epoch(), h.ui.seek_epoch());
        h.bridge.bind(other);
        h.tick(&timeline);

        let now: Vec<_> = h
            .playback
            .controller()
            .live()
            .map(|s| (s.source_id, s.segment_id.0, s.offset_secs))
            .collect();
        assert_eq!(now.len(), 2);
        assert!(now.iter().all(|(id, _, _)| !old.contains(id)));
        assert_eq!(now[0].2, 3.5);
        assert_eq!(now[1].2, 1.5);
    }
}
