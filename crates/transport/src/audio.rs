use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Decoded, immutable sample data attached to a segment.
///
/// Samples are interleaved and stored in an `Arc<[f32]>`, so handing the same
/// segment audio to several generator nodes (one per start) only bumps a
/// reference count.
///
/// ```
/// use studio_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// let shared = audio.clone();
/// assert_eq!(shared.frames(), 2);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// Wrap owned interleaved samples.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self::from_arc(Arc::from(samples), sample_rate, channels)
    }

    /// Same as [`AudioArc::new`] for data that already lives in an `Arc`.
    pub fn from_arc(samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// `frames` frames of silence.
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_arc(&self) -> &Arc<[f32]> {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_secs() * 1000.0
    }

    /// Frame index for a position given in seconds, clamped to the end of the data.
    pub fn frame_at(&self, offset_secs: f64) -> usize {
        if !offset_secs.is_finite() || offset_secs <= 0.0 {
            return 0;
        }
        ((offset_secs * self.sample_rate as f64) as usize).min(self.frames())
    }

    /// Returns a cheap clone when the rate already matches.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate {
            return Ok(self.clone());
        }
        resample_audio_arc(self, target_sample_rate)
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}

/// Sinc-resample `audio` to `target_sample_rate`.
///
/// Generator nodes play frames 1:1 against the output device, so segment audio
/// decoded at a different rate goes through here before it is handed to the
/// audio thread.
pub fn resample_audio_arc(audio: &AudioArc, target_sample_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate == target_sample_rate {
        return Ok(audio.clone());
    }
    if audio.is_empty() {
        return Ok(AudioArc::new(Vec::new(), target_sample_rate, audio.channels));
    }

    let channels = audio.channels as usize;
    let input_frames = audio.frames();
    let ratio = target_sample_rate as f64 / audio.sample_rate as f64;

    let mut planar = vec![Vec::with_capacity(input_frames); channels];
    for frame in audio.samples().chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_frames, channels)?;
    let delay = resampler.output_delay();
    let output_frames = (input_frames as f64 * ratio).round() as usize;

    // The sinc filter delays its output, so keep flushing until the tail is out.
    let mut output = resampler.process(&planar, None)?;
    while output[0].len() < delay + output_frames {
        let tail = resampler.process_partial::<Vec<f32>>(None, None)?;
        if tail[0].is_empty() {
            break;
        }
        for (channel, rest) in output.iter_mut().zip(tail) {
            channel.extend(rest);
        }
    }

    let mut interleaved = Vec::with_capacity(output_frames * channels);
    for frame_idx in delay..delay + output_frames {
        for channel in &output {
            interleaved.push(channel.get(frame_idx).copied().unwrap_or(0.0));
        }
    }

    tracing::debug!(
        from = audio.sample_rate,
        to = target_sample_rate,
        frames = output_frames,
        "resampled segment audio"
    );

    Ok(AudioArc::new(interleaved, target_sample_rate, audio.channels))
}
