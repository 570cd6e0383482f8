//! Audio source lifecycle for timeline playback.
//!
//! [`AudioSourceController`] starts, stops and retargets one generator/gain
//! pair per sounding segment on top of an [`AudioGraph`]. [`CpalGraph`] is the
//! real-time implementation.

mod controller;
mod cpal_graph;
mod error;
mod graph;
#[cfg(any(test, feature = "testing"))]
pub mod recording;

pub use controller::{
    AudioSourceController, CurrentlyPlayingAudioSource, DEFAULT_GAIN, LATE_START_THRESHOLD_MS,
    OnEnded, late_start_offset_secs,
};
pub use cpal_graph::{CpalGraph, MAX_VOICES};
pub use error::EngineError;
pub use graph::{AudioGraph, GainNode, GeneratorNode};
