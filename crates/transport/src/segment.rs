use std::fmt;

use crate::AudioArc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg-{}", self.0)
    }
}

/// Identity of one started audio source. A new id is minted for every start
/// and never handed out again, even when the same segment restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// A timed span of media on the project timeline.
///
/// Times are in project milliseconds. `audio` is `None` for segments that
/// carry no sound (video, captions, ...).
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: SegmentId,
    pub start_ms: f64,
    pub duration_ms: f64,
    pub audio: Option<AudioArc>,
    /// Multiplier applied by the segment's gain node. Stored values are not
    /// validated; a non-finite gain plays at unity.
    pub output_gain: f32,
}

impl Segment {
    /// An audio segment lasting as long as its samples.
    pub fn with_audio(id: SegmentId, start_ms: f64, audio: AudioArc) -> Self {
        Self {
            id,
            start_ms,
            duration_ms: audio.duration_ms(),
            audio: Some(audio),
            output_gain: 1.0,
        }
    }

    pub fn without_audio(id: SegmentId, start_ms: f64, duration_ms: f64) -> Self {
        Self {
            id,
            start_ms,
            duration_ms,
            audio: None,
            output_gain: 1.0,
        }
    }

    pub fn gain(mut self, output_gain: f32) -> Self {
        self.output_gain = output_gain;
        self
    }

    pub fn end_ms(&self) -> f64 {
        self.start_ms + self.duration_ms
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Half-open: a segment is active from its start up to, not including, its end.
    pub fn is_active_at(&self, cursor_ms: f64) -> bool {
        cursor_ms >= self.start_ms && cursor_ms < self.end_ms()
    }
}

/// Answers "which segments are under the cursor right now".
///
/// Implementations must be pure: the same timestamp always yields the same
/// segments, in the same order. The playback loop calls this on every tick and
/// every seek.
pub trait SegmentResolver {
    fn resolve(&self, cursor_ms: f64) -> Vec<Segment>;
}

impl<F> SegmentResolver for F
where
    F: Fn(f64) -> Vec<Segment>,
{
    fn resolve(&self, cursor_ms: f64) -> Vec<Segment> {
        self(cursor_ms)
    }
}
