use studio_transport::SegmentId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `start` was asked to play a segment that has no decoded audio.
    #[error("segment {segment_id} carries no audio and cannot be played")]
    InvalidSegment { segment_id: SegmentId },

    /// The cursor is past the last sample of the segment's audio, so there is
    /// nothing left to play even though the segment is still active.
    #[error("segment {segment_id} has no audio left at {offset_secs}s")]
    Exhausted {
        segment_id: SegmentId,
        offset_secs: f64,
    },

    #[error("audio graph error: {0}")]
    Graph(#[from] anyhow::Error),
}
