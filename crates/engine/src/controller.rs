//! Lifecycle of the audio sources currently sounding on the timeline.
//!
//! Every start allocates a fresh generator and gain node pair. Generators
//! cannot be repositioned, so a source whose intended offset changes is
//! stopped and started again rather than mutated.

use std::collections::BTreeMap;

use studio_transport::{Segment, SegmentId, SourceId};
use tracing::{debug, trace, warn};

use crate::error::EngineError;
use crate::graph::{AudioGraph, GainNode, GeneratorNode};

/// In-segment offsets below this are played from the first sample.
pub const LATE_START_THRESHOLD_MS: f64 = 1000.0;

/// Gain used when a segment's stored gain is not a finite number.
pub const DEFAULT_GAIN: f32 = 1.0;

/// Called once, with the source id, when a source plays out its last sample.
pub type OnEnded = Box<dyn FnOnce(SourceId) + Send>;

/// One live source: a started generator and its dedicated gain node.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentlyPlayingAudioSource {
    pub source_id: SourceId,
    pub segment_id: SegmentId,
    pub generator: GeneratorNode,
    pub gain: GainNode,
    /// Gain as stored on the segment, even when it was not usable.
    pub original_gain: f32,
    /// Where in the segment's samples playback began.
    pub offset_secs: f64,
}

struct LiveSource {
    source: CurrentlyPlayingAudioSource,
    on_ended: Option<OnEnded>,
}

/// Seconds into the sample at which a segment starts when the cursor is
/// `offset_ms` past the segment's start.
///
/// ```
/// use studio_engine::{LATE_START_THRESHOLD_MS, late_start_offset_secs};
///
/// assert_eq!(late_start_offset_secs(1500.0, LATE_START_THRESHOLD_MS), 1.5);
/// assert_eq!(late_start_offset_secs(500.0, LATE_START_THRESHOLD_MS), 0.0);
/// ```
pub fn late_start_offset_secs(offset_ms: f64, threshold_ms: f64) -> f64 {
    if offset_ms.is_finite() && offset_ms >= threshold_ms && offset_ms > 0.0 {
        offset_ms / 1000.0
    } else {
        0.0
    }
}

pub struct AudioSourceController<G: AudioGraph> {
    graph: G,
    live: BTreeMap<SourceId, LiveSource>,
    next_source_id: u64,
    late_start_threshold_ms: f64,
}

impl<G: AudioGraph> AudioSourceController<G> {
    pub fn new(graph: G) -> Self {
        Self {
            graph,
            live: BTreeMap::new(),
            next_source_id: 0,
            late_start_threshold_ms: LATE_START_THRESHOLD_MS,
        }
    }

    pub fn with_late_start_threshold(mut self, threshold_ms: f64) -> Self {
        self.late_start_threshold_ms = threshold_ms;
        self
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    /// Start `segment` so that it lines up with the cursor at `cursor_ms`.
    ///
    /// Fails with [`EngineError::InvalidSegment`] for segments without audio,
    /// with [`EngineError::Exhausted`] when the offset is at or past the end of
    /// the audio (no generator is allocated), and with [`EngineError::Graph`]
    /// when the generator cannot be allocated. No failure touches the other
    /// live sources.
    pub fn start(
        &mut self,
        segment: &Segment,
        cursor_ms: f64,
        on_ended: impl FnOnce(SourceId) + Send + 'static,
    ) -> Result<CurrentlyPlayingAudioSource, EngineError> {
        let audio = segment.audio.as_ref().ok_or(EngineError::InvalidSegment {
            segment_id: segment.id,
        })?;

        let offset_secs =
            late_start_offset_secs(cursor_ms - segment.start_ms, self.late_start_threshold_ms);
        if audio.frame_at(offset_secs) >= audio.frames() {
            return Err(EngineError::Exhausted {
                segment_id: segment.id,
                offset_secs,
            });
        }

        let gain_value = if segment.output_gain.is_finite() {
            segment.output_gain
        } else {
            warn!(
                segment_id = %segment.id,
                output_gain = segment.output_gain,
                "segment gain is not finite, playing at unity"
            );
            DEFAULT_GAIN
        };

        let generator = self.graph.create_generator(audio)?;
        let gain = self.graph.create_gain(gain_value);
        self.graph.connect(generator, gain);
        self.graph.start(generator, offset_secs);

        let source_id = SourceId(self.next_source_id);
        self.next_source_id += 1;

        let source = CurrentlyPlayingAudioSource {
            source_id,
            segment_id: segment.id,
            generator,
            gain,
            original_gain: segment.output_gain,
            offset_secs,
        };

        debug!(
            source_id = %source_id,
            segment_id = %segment.id,
            offset_secs,
            gain = gain_value,
            "started audio source"
        );

        self.live.insert(
            source_id,
            LiveSource {
                source: source.clone(),
                on_ended: Some(Box::new(on_ended)),
            },
        );

        Ok(source)
    }

    /// Tear down a live source. Unknown or already finished ids are ignored.
    pub fn stop(&mut self, source_id: SourceId) -> Option<CurrentlyPlayingAudioSource> {
        let Some(live) = self.live.remove(&source_id) else {
            trace!(source_id = %source_id, "stop on a source that is not live");
            return None;
        };
        let source = live.source;
        self.graph.stop(source.generator);
        self.graph.release(source.generator, source.gain);
        debug!(source_id = %source_id, segment_id = %source.segment_id, "stopped audio source");
        Some(source)
    }

    /// Stop every live source, oldest first.
    pub fn stop_all(&mut self) -> Vec<CurrentlyPlayingAudioSource> {
        let ids: Vec<SourceId> = self.live.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.stop(id)).collect()
    }

    /// Change the gain of a live source in place. Ignored for ids that are
    /// not live and for non-finite values.
    pub fn set_gain(&mut self, source_id: SourceId, value: f32) {
        let Some(live) = self.live.get(&source_id) else {
            trace!(source_id = %source_id, "set_gain on a source that is not live");
            return;
        };
        if !value.is_finite() {
            warn!(source_id = %source_id, value, "ignoring non-finite gain");
            return;
        }
        self.graph.set_gain(live.source.gain, value);
    }

    /// Collect natural completions from the graph.
    ///
    /// Each finished source is removed and its `on_ended` callback fired.
    /// Completions for sources that were already stopped are dropped.
    pub fn pump_ended(&mut self) -> Vec<SourceId> {
        let mut ended = Vec::new();
        for generator in self.graph.drain_ended() {
            let Some(source_id) = self.source_for(generator) else {
                trace!(?generator, "completion for a source that is no longer live");
                continue;
            };
            let Some(mut live) = self.live.remove(&source_id) else {
                continue;
            };
            self.graph.release(live.source.generator, live.source.gain);
            debug!(
                source_id = %source_id,
                segment_id = %live.source.segment_id,
                "audio source played to its end"
            );
            if let Some(on_ended) = live.on_ended.take() {
                on_ended(source_id);
            }
            ended.push(source_id);
        }
        ended
    }

    fn source_for(&self, generator: GeneratorNode) -> Option<SourceId> {
        self.live
            .values()
            .find(|live| live.source.generator == generator)
            .map(|live| live.source.source_id)
    }

    pub fn get(&self, source_id: SourceId) -> Option<&CurrentlyPlayingAudioSource> {
        self.live.get(&source_id).map(|live| &live.source)
    }

    /// Live sources in start order.
    pub fn live(&self) -> impl Iterator<Item = &CurrentlyPlayingAudioSource> {
        self.live.values().map(|live| &live.source)
    }

    pub fn live_segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.live.values().map(|live| live.source.segment_id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<G: AudioGraph> Drop for AudioSourceController<G> {
    fn drop(&mut self) {
        self.stop_all();
    }
}
