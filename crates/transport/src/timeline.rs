use crate::{Segment, SegmentId, SegmentResolver};

/// Segments of a project laid out on one timeline, kept sorted by start time.
///
/// Unlike tracks in an arrangement, segments here may overlap freely: every
/// overlapping audio segment is heard at once.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    segments: Vec<Segment>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        let mut timeline = Self::new();
        for segment in segments {
            timeline.insert(segment);
        }
        timeline
    }

    /// Insert a segment, replacing any existing segment with the same id.
    pub fn insert(&mut self, segment: Segment) {
        self.segments.retain(|s| s.id != segment.id);
        let idx = self
            .segments
            .partition_point(|s| s.start_ms <= segment.start_ms);
        self.segments.insert(idx, segment);
    }

    pub fn remove(&mut self, id: SegmentId) -> Option<Segment> {
        let idx = self.segments.iter().position(|s| s.id == id)?;
        Some(self.segments.remove(idx))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// End of the last segment, or 0 for an empty timeline.
    pub fn end_ms(&self) -> f64 {
        self.segments
            .iter()
            .map(Segment::end_ms)
            .fold(0.0, f64::max)
    }
}

impl SegmentResolver for Timeline {
    fn resolve(&self, cursor_ms: f64) -> Vec<Segment> {
        // Sorted by start, so nothing past the cursor can be active.
        self.segments
            .iter()
            .take_while(|s| s.start_ms <= cursor_ms)
            .filter(|s| s.is_active_at(cursor_ms))
            .cloned()
            .collect()
    }
}
