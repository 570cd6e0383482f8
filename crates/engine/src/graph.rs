use studio_transport::AudioArc;

/// Handle to a one-shot sample player. Once started it can only run to its
/// end or be stopped; it cannot be repositioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneratorNode(pub u64);

/// Handle to a gain stage sitting between a generator and the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GainNode(pub u64);

/// The low-level audio graph the source controller drives.
///
/// Nodes are cheap handles; the graph owns the actual voices. Implementations
/// report generators that ran out of samples through [`AudioGraph::drain_ended`],
/// which is the only path by which audio-thread events reach the controller.
pub trait AudioGraph {
    /// Allocate a generator bound to `audio`. Nothing sounds until `start`.
    fn create_generator(&mut self, audio: &AudioArc) -> anyhow::Result<GeneratorNode>;

    fn create_gain(&mut self, value: f32) -> GainNode;

    /// Route `generator` through `gain` into the output sink.
    fn connect(&mut self, generator: GeneratorNode, gain: GainNode);

    /// Begin playback now, `offset_secs` into the generator's samples.
    fn start(&mut self, generator: GeneratorNode, offset_secs: f64);

    fn set_gain(&mut self, gain: GainNode, value: f32);

    /// Silence the generator immediately. Stopping a generator that already
    /// ended is a no-op.
    fn stop(&mut self, generator: GeneratorNode);

    /// Forget both nodes. Handles must not be used afterwards.
    fn release(&mut self, generator: GeneratorNode, gain: GainNode);

    /// Generators that reached the end of their samples since the last call.
    fn drain_ended(&mut self) -> Vec<GeneratorNode>;
}
