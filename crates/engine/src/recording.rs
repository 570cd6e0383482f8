//! In-memory [`AudioGraph`] that records every call.
//!
//! Nothing is rendered. Tests inspect the operation log to check ordering,
//! and call [`RecordingGraph::finish`] to simulate a generator running out of
//! samples on the audio thread.

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use studio_transport::AudioArc;

use crate::graph::{AudioGraph, GainNode, GeneratorNode};

#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    CreateGenerator { generator: GeneratorNode, frames: usize },
    CreateGain { gain: GainNode, value: f32 },
    Connect { generator: GeneratorNode, gain: GainNode },
    Start { generator: GeneratorNode, offset_secs: f64 },
    SetGain { gain: GainNode, value: f32 },
    Stop { generator: GeneratorNode },
    Release { generator: GeneratorNode, gain: GainNode },
}

#[derive(Debug, Default)]
pub struct RecordingGraph {
    ops: Vec<GraphOp>,
    next_node: u64,
    gains: HashMap<GainNode, f32>,
    /// Started and not yet stopped or finished, with their start offset.
    playing: BTreeMap<GeneratorNode, f64>,
    ended: Vec<GeneratorNode>,
    failures: usize,
}

impl RecordingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[GraphOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<GraphOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn gain_of(&self, gain: GainNode) -> Option<f32> {
        self.gains.get(&gain).copied()
    }

    pub fn is_playing(&self, generator: GeneratorNode) -> bool {
        self.playing.contains_key(&generator)
    }

    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }

    pub fn start_offset(&self, generator: GeneratorNode) -> Option<f64> {
        self.playing.get(&generator).copied()
    }

    /// Make the next `count` generator allocations fail.
    pub fn fail_next_generators(&mut self, count: usize) {
        self.failures = count;
    }

    /// Simulate `generator` playing out its last sample.
    pub fn finish(&mut self, generator: GeneratorNode) {
        if self.playing.remove(&generator).is_some() {
            self.ended.push(generator);
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_node += 1;
        self.next_node
    }
}

impl AudioGraph for RecordingGraph {
    fn create_generator(&mut self, audio: &AudioArc) -> anyhow::Result<GeneratorNode> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(anyhow!("generator allocation refused"));
        }
        let generator = GeneratorNode(self.next_id());
        self.ops.push(GraphOp::CreateGenerator {
            generator,
            frames: audio.frames(),
        });
        Ok(generator)
    }

    fn create_gain(&mut self, value: f32) -> GainNode {
        let gain = GainNode(self.next_id());
        self.gains.insert(gain, value);
        self.ops.push(GraphOp::CreateGain { gain, value });
        gain
    }

    fn connect(&mut self, generator: GeneratorNode, gain: GainNode) {
        self.ops.push(GraphOp::Connect { generator, gain });
    }

    fn start(&mut self, generator: GeneratorNode, offset_secs: f64) {
        self.playing.insert(generator, offset_secs);
        self.ops.push(GraphOp::Start {
            generator,
            offset_secs,
        });
    }

    fn set_gain(&mut self, gain: GainNode, value: f32) {
        if let Some(current) = self.gains.get_mut(&gain) {
            *current = value;
        }
        self.ops.push(GraphOp::SetGain { gain, value });
    }

    fn stop(&mut self, generator: GeneratorNode) {
        self.playing.remove(&generator);
        self.ops.push(GraphOp::Stop { generator });
    }

    fn release(&mut self, generator: GeneratorNode, gain: GainNode) {
        self.gains.remove(&gain);
        self.ops.push(GraphOp::Release { generator, gain });
    }

    fn drain_ended(&mut self) -> Vec<GeneratorNode> {
        std::mem::take(&mut self.ended)
    }
}
