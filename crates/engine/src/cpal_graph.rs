//! Real-time [`AudioGraph`] on the default cpal output device.
//!
//! The control side keeps node bookkeeping and talks to the audio callback
//! through two lock-free rings: commands go in, finished generators come
//! back out. Sample data crosses over as `basedrop::Shared`, so a voice
//! dropped on the audio thread never frees memory there; the collector is
//! drained on the control side in `drain_ended`.
//!
//! Segment audio is resampled to the device rate once per sample buffer and
//! cached, so starting a generator only allocates.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use basedrop::{Collector, Handle, Shared};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use studio_transport::AudioArc;
use tracing::{debug, info, warn};

use crate::graph::{AudioGraph, GainNode, GeneratorNode};

/// Upper bound on simultaneously sounding generators. The voice list is
/// allocated once at this size; starts beyond it are reported as ended.
pub const MAX_VOICES: usize = 128;

enum Command {
    Start {
        generator: GeneratorNode,
        gain: Option<GainNode>,
        gain_value: f32,
        audio: Shared<AudioArc>,
        frame: usize,
    },
    SetGain {
        gain: GainNode,
        value: f32,
    },
    Stop {
        generator: GeneratorNode,
    },
}

struct Voice {
    generator: GeneratorNode,
    gain: Option<GainNode>,
    gain_value: f32,
    audio: Shared<AudioArc>,
    frame: usize,
}

impl Voice {
    fn finished(&self) -> bool {
        self.frame >= self.audio.frames()
    }

    fn sample(&self, output_channel: usize) -> f32 {
        let channels = self.audio.channels() as usize;
        let idx = self.frame * channels + output_channel % channels;
        self.audio.samples().get(idx).copied().unwrap_or(0.0) * self.gain_value
    }
}

struct GeneratorState {
    audio: Shared<AudioArc>,
    gain: Option<GainNode>,
    started: bool,
}

/// Control-side end of the command ring. Commands that do not fit wait in a
/// backlog and are always sent before anything newer.
struct CommandQueue {
    producer: rtrb::Producer<Command>,
    backlog: VecDeque<Command>,
}

impl CommandQueue {
    fn new(producer: rtrb::Producer<Command>) -> Self {
        Self {
            producer,
            backlog: VecDeque::new(),
        }
    }

    fn send(&mut self, command: Command) {
        self.flush();
        if !self.backlog.is_empty() {
            self.backlog.push_back(command);
            return;
        }
        if let Err(rtrb::PushError::Full(command)) = self.producer.push(command) {
            warn!("audio command queue full, deferring");
            self.backlog.push_back(command);
        }
    }

    fn flush(&mut self) {
        while let Some(command) = self.backlog.pop_front() {
            if let Err(rtrb::PushError::Full(command)) = self.producer.push(command) {
                self.backlog.push_front(command);
                break;
            }
        }
    }

    #[cfg(test)]
    fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    samples: usize,
    sample_rate: u32,
    channels: u16,
}

impl CacheKey {
    fn of(audio: &AudioArc) -> Self {
        Self {
            samples: Arc::as_ptr(audio.samples_arc()) as *const f32 as usize,
            sample_rate: audio.sample_rate(),
            channels: audio.channels(),
        }
    }
}

struct CacheEntry {
    /// Holds the source samples so the key's address cannot be reused.
    source: AudioArc,
    resampled: Shared<AudioArc>,
}

/// Segment audio converted to the device rate, keyed by sample buffer.
struct ResampleCache {
    target_rate: u32,
    entries: HashMap<CacheKey, CacheEntry>,
    resamples: usize,
}

impl ResampleCache {
    fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            entries: HashMap::new(),
            resamples: 0,
        }
    }

    /// Device-rate audio for `audio`. Only the first request for a given
    /// sample buffer pays for resampling.
    fn get(&mut self, audio: &AudioArc, handle: &Handle) -> anyhow::Result<Shared<AudioArc>> {
        if audio.sample_rate() == self.target_rate {
            return Ok(Shared::new(handle, audio.clone()));
        }

        let key = CacheKey::of(audio);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.resampled.clone());
        }

        let resampled = Shared::new(handle, audio.resample(self.target_rate)?);
        self.resamples += 1;
        self.entries.insert(
            key,
            CacheEntry {
                source: audio.clone(),
                resampled: resampled.clone(),
            },
        );
        Ok(resampled)
    }

    /// Forget audio that nothing outside the cache refers to any more.
    /// Voices still playing keep their own reference to the resampled data.
    fn prune(&mut self) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| Arc::strong_count(entry.source.samples_arc()) > 1);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!(pruned, "dropped unused resampled audio");
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct CpalGraph {
    commands: CommandQueue,
    ended: rtrb::Consumer<GeneratorNode>,
    generators: HashMap<GeneratorNode, GeneratorState>,
    gains: HashMap<GainNode, f32>,
    resampled: ResampleCache,
    next_node: u64,
    sample_rate: u32,
    collector: Collector,
    handle: Handle,
    _stream: cpal::Stream,
}

impl CpalGraph {
    /// Open the default output device and start its stream (silent until a
    /// generator is started).
    pub fn open(command_capacity: usize) -> anyhow::Result<Self> {
        let collector = Collector::new();
        let handle = collector.handle();

        let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(command_capacity);
        let (ended_tx, ended_rx) =
            rtrb::RingBuffer::<GeneratorNode>::new(command_capacity.max(MAX_VOICES));

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels(),
            "opened audio output"
        );

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config.into(), command_rx, ended_tx)?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config.into(), command_rx, ended_tx)?
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config.into(), command_rx, ended_tx)?
            }
            sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
        };

        stream.play()?;

        Ok(Self {
            commands: CommandQueue::new(command_tx),
            ended: ended_rx,
            generators: HashMap::new(),
            gains: HashMap::new(),
            resampled: ResampleCache::new(sample_rate),
            next_node: 0,
            sample_rate,
            collector,
            handle,
            _stream: stream,
        })
    }

    /// Rate of the output device. Audio already at this rate is never resampled.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_id(&mut self) -> u64 {
        self.next_node += 1;
        self.next_node
    }
}

impl AudioGraph for CpalGraph {
    fn create_generator(&mut self, audio: &AudioArc) -> anyhow::Result<GeneratorNode> {
        let audio = self.resampled.get(audio, &self.handle)?;
        let generator = GeneratorNode(self.next_id());
        self.generators.insert(
            generator,
            GeneratorState {
                audio,
                gain: None,
                started: false,
            },
        );
        Ok(generator)
    }

    fn create_gain(&mut self, value: f32) -> GainNode {
        let gain = GainNode(self.next_id());
        self.gains.insert(gain, value);
        gain
    }

    fn connect(&mut self, generator: GeneratorNode, gain: GainNode) {
        if let Some(state) = self.generators.get_mut(&generator) {
            state.gain = Some(gain);
        }
    }

    fn start(&mut self, generator: GeneratorNode, offset_secs: f64) {
        let Some(state) = self.generators.get_mut(&generator) else {
            warn!(?generator, "start on an unknown generator");
            return;
        };
        if state.started {
            return;
        }
        state.started = true;

        let gain_value = state
            .gain
            .and_then(|gain| self.gains.get(&gain).copied())
            .unwrap_or(1.0);
        let command = Command::Start {
            generator,
            gain: state.gain,
            gain_value,
            audio: state.audio.clone(),
            frame: state.audio.frame_at(offset_secs),
        };
        self.commands.send(command);
    }

    fn set_gain(&mut self, gain: GainNode, value: f32) {
        let Some(current) = self.gains.get_mut(&gain) else {
            return;
        };
        *current = value;
        self.commands.send(Command::SetGain { gain, value });
    }

    fn stop(&mut self, generator: GeneratorNode) {
        if self.generators.get(&generator).is_some_and(|s| s.started) {
            self.commands.send(Command::Stop { generator });
        }
    }

    fn release(&mut self, generator: GeneratorNode, gain: GainNode) {
        self.generators.remove(&generator);
        self.gains.remove(&gain);
    }

    fn drain_ended(&mut self) -> Vec<GeneratorNode> {
        self.commands.flush();
        self.resampled.prune();
        self.collector.collect();
        let mut ended = Vec::new();
        while let Ok(generator) = self.ended.pop() {
            ended.push(generator);
        }
        ended
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut command_rx: rtrb::Consumer<Command>,
    mut ended_tx: rtrb::Producer<GeneratorNode>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;
    let mut voices: Vec<Voice> = Vec::with_capacity(MAX_VOICES);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            render(
                &mut voices,
                &mut command_rx,
                &mut ended_tx,
                data,
                output_channels,
            );
        },
        |err| tracing::error!(%err, "audio stream error"),
        None,
    )?;

    Ok(stream)
}

/// One audio callback: apply pending commands, mix every voice into `data`,
/// then report and drop the voices that ran out.
///
/// `voices` must have been allocated with room for [`MAX_VOICES`]; nothing
/// here allocates.
fn render<T>(
    voices: &mut Vec<Voice>,
    command_rx: &mut rtrb::Consumer<Command>,
    ended_tx: &mut rtrb::Producer<GeneratorNode>,
    data: &mut [T],
    output_channels: usize,
) where
    T: SizedSample + FromSample<f32>,
{
    while let Ok(command) = command_rx.pop() {
        match command {
            Command::Start {
                generator,
                gain,
                gain_value,
                audio,
                frame,
            } => {
                if voices.len() < MAX_VOICES {
                    voices.push(Voice {
                        generator,
                        gain,
                        gain_value,
                        audio,
                        frame,
                    });
                } else {
                    let _ = ended_tx.push(generator);
                }
            }
            Command::SetGain { gain, value } => {
                for voice in voices.iter_mut().filter(|v| v.gain == Some(gain)) {
                    voice.gain_value = value;
                }
            }
            Command::Stop { generator } => {
                voices.retain(|v| v.generator != generator);
            }
        }
    }

    for frame in data.chunks_mut(output_channels) {
        for (ch, sample) in frame.iter_mut().enumerate() {
            let mixed: f32 = voices
                .iter()
                .filter(|v| !v.finished())
                .map(|v| v.sample(ch))
                .sum();
            *sample = T::from_sample(mixed);
        }
        for voice in voices.iter_mut().filter(|v| !v.finished()) {
            voice.frame += 1;
        }
    }

    voices.retain(|voice| {
        if voice.finished() {
            let _ = ended_tx.push(voice.generator);
            false
        } else {
            true
        }
    });
}
