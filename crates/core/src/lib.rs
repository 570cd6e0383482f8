pub mod bridge;
pub mod config;
pub mod engine;
pub mod playback_loop;

pub use bridge::TransportBridge;
pub use config::{ConfigError, EngineConfig};
pub use engine::PlaybackEngine;
pub use playback_loop::{EVENT_LOG_CAPACITY, LoopState, PlaybackEvent, PlaybackLoop};

pub use studio_engine::{
    AudioGraph, AudioSourceController, CpalGraph, CurrentlyPlayingAudioSource, EngineError,
};
pub use studio_transport::{
    AudioArc, Segment, SegmentId, SegmentResolver, SourceId, Timeline, Transport,
    TransportControl, TransportHandle,
};
