//! Plays audio files laid out on a timeline through the default output device.
//!
//! ```text
//! studio-player intro.wav voice.flac@2500 --from-ms 1800
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use studio_core::{
    CpalGraph, EngineConfig, PlaybackEngine, Segment, SegmentId, Timeline, Transport,
    TransportHandle,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "studio-player")]
#[command(about = "Play audio files laid out on a timeline")]
#[command(version)]
struct Args {
    /// Clips to place, as PATH or PATH@START_MS
    #[arg(required = true)]
    clips: Vec<String>,

    /// Cursor position to start from, in milliseconds
    #[arg(long, default_value_t = 0.0)]
    from_ms: f64,

    /// Stop after this many milliseconds instead of at the end of the timeline
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Playback config file, instead of the one in the user config dir
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Split `PATH@START_MS`. A suffix that is not a finite number is part of the path.
fn parse_clip(spec: &str) -> (PathBuf, f64) {
    let start = spec.rsplit_once('@').and_then(|(path, start)| {
        start
            .parse::<f64>()
            .ok()
            .filter(|ms| ms.is_finite())
            .map(|ms| (path, ms))
    });
    match start {
        Some((path, start_ms)) => (PathBuf::from(path), start_ms),
        None => (PathBuf::from(spec), 0.0),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::load());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path.display()))?;
    Ok(EngineConfig::from_toml_str(&contents)?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studio_player=info,studio_core=info,studio_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let graph = CpalGraph::open(config.command_capacity).context("failed to open audio output")?;

    let mut timeline = Timeline::new();
    for (idx, spec) in args.clips.iter().enumerate() {
        let (path, start_ms) = parse_clip(spec);
        let audio = studio_decode::decode_file(&path)?
            .resample(graph.sample_rate())
            .with_context(|| format!("failed to resample '{}'", path.display()))?;
        info!(
            path = %path.display(),
            start_ms,
            duration_ms = audio.duration_ms(),
            "placed clip"
        );
        timeline.insert(Segment::with_audio(SegmentId(idx as u64), start_ms, audio));
    }

    let play_for = match args.duration_ms {
        Some(ms) => Duration::from_millis(ms),
        None => Duration::from_secs_f64((timeline.end_ms() - args.from_ms).max(0.0) / 1000.0),
    };

    let mut engine = PlaybackEngine::new(graph, timeline, config);

    let transport = TransportHandle::new(Transport::with_system_clock());
    engine.bind(transport.clone());
    engine.jump_at(args.from_ms);
    transport.play();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stopper = async move {
        tokio::select! {
            _ = tokio::time::sleep(play_for) => info!("reached end of playback"),
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
        let _ = shutdown_tx.send(true);
    };

    tokio::join!(engine.run(shutdown_rx), stopper);
    Ok(())
}
