//! Theremin CLI - drive the synthesis engine without the sensor hardware

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use theremin_core::dsp::chain::EffectSettings;
use theremin_core::melody::{self, MelodyOptions};
use theremin_core::sink::AudioSink;
use theremin_core::{AudioEngine, ChannelMode, EngineConfig, SmoothingPreset, Waveform};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "theremin")]
#[command(about = "Theremin synthesis engine", version, long_about = None)]
struct Cli {
    /// JSON engine configuration (missing fields use the stock instrument)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pin the audio producer thread to this CPU core
    #[arg(long, global = true)]
    core: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a performance to a WAV file in real time
    Render {
        /// Output WAV file path
        output: PathBuf,

        /// Duration in seconds (default: 3.0)
        #[arg(short, long, default_value = "3.0")]
        seconds: f32,

        #[command(flatten)]
        performance: Performance,
    },

    /// Play a performance on the default sound card
    Play {
        /// Duration in seconds (default: 3.0)
        #[arg(short, long, default_value = "3.0")]
        seconds: f32,

        #[command(flatten)]
        performance: Performance,
    },

    /// Print the engine status for the loaded configuration as JSON
    Status,

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Channels {
    Both,
    Left,
    Right,
}

impl From<Channels> for ChannelMode {
    fn from(channels: Channels) -> Self {
        match channels {
            Channels::Both => ChannelMode::StereoBoth,
            Channels::Left => ChannelMode::LeftOnly,
            Channels::Right => ChannelMode::RightOnly,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Smoothing {
    None,
    Normal,
    Extra,
}

impl From<Smoothing> for SmoothingPreset {
    fn from(smoothing: Smoothing) -> Self {
        match smoothing {
            Smoothing::None => SmoothingPreset::None,
            Smoothing::Normal => SmoothingPreset::Normal,
            Smoothing::Extra => SmoothingPreset::Extra,
        }
    }
}

#[derive(Args)]
struct Performance {
    /// Waveform for voice 1 (off, square, sine, triangle, saw)
    #[arg(short, long)]
    waveform: Option<Waveform>,

    /// Octave shift for voice 1 (-1, 0, 1)
    #[arg(long, allow_hyphen_values = true)]
    octave: Option<i32>,

    /// Start pitch in Hz
    #[arg(short, long, default_value = "440")]
    frequency: f32,

    /// Glide linearly to this pitch over the whole duration
    #[arg(long)]
    sweep: Option<f32>,

    /// Amplitude in percent (default: 50)
    #[arg(short, long, default_value = "50")]
    amplitude: f32,

    /// Pitch and volume smoothing
    #[arg(long, value_enum)]
    smoothing: Option<Smoothing>,

    /// Output channel routing
    #[arg(long, value_enum)]
    channels: Option<Channels>,

    /// Enable the delay with this time in ms
    #[arg(long)]
    delay: Option<u32>,

    /// Enable the chorus
    #[arg(long)]
    chorus: bool,

    /// Enable the reverb with this room size (0.0-1.0)
    #[arg(long)]
    reverb: Option<f32>,

    /// Play the startup fanfare instead of a held tone
    #[arg(long, conflicts_with = "sweep")]
    melody: bool,

    /// Run the audible self-test instead of a held tone
    #[arg(long, conflicts_with_all = ["sweep", "melody"])]
    self_test: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.core.is_some() {
        config.producer_core = cli.core;
    }

    match cli.command {
        Commands::Render {
            output,
            seconds,
            performance,
        } => {
            #[cfg(feature = "wav")]
            {
                let frames = (duration_from_secs(seconds).as_secs_f64() * config.sample_rate as f64) as u64;
                let sink = theremin_core::sink::PacedSink::new(
                    theremin_core::sink::WavSink::create(&output).with_frame_limit(frames),
                );
                perform(config, sink, seconds, &performance, Finish::WhenSinkCloses)?;
                println!("✅ Wrote {}", output.display());
            }
            #[cfg(not(feature = "wav"))]
            {
                let _ = (output, seconds, performance);
                return Err("WAV output needs the `wav` feature".into());
            }
        }

        Commands::Play {
            seconds,
            performance,
        } => {
            #[cfg(feature = "device")]
            {
                let sink = theremin_core::sink::DeviceSink::new();
                perform(config, sink, seconds, &performance, Finish::AfterDuration)?;
            }
            #[cfg(not(feature = "device"))]
            {
                let _ = (seconds, performance);
                return Err("sound card output needs the `device` feature".into());
            }
        }

        Commands::Status => {
            let engine = AudioEngine::new(config);
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
        }

        Commands::Config => {
            println!("{}", config.normalized().to_json()?);
        }
    }

    Ok(())
}

fn apply_performance(engine: &AudioEngine, performance: &Performance) {
    if let Some(waveform) = performance.waveform {
        engine.set_voice_waveform(1, waveform);
    }
    if let Some(octave) = performance.octave {
        engine.set_voice_octave(1, octave);
    }
    if let Some(smoothing) = performance.smoothing {
        engine.set_pitch_smoothing_preset(smoothing.into());
        engine.set_volume_smoothing_preset(smoothing.into());
    }
    if let Some(channels) = performance.channels {
        engine.set_channel_mode(channels.into());
    }

    let mut effects: EffectSettings = engine.effect_settings();
    if let Some(time_ms) = performance.delay {
        effects.delay.enabled = true;
        effects.delay.time_ms = time_ms;
    }
    if performance.chorus {
        effects.chorus.enabled = true;
    }
    if let Some(room_size) = performance.reverb {
        effects.reverb.enabled = true;
        effects.reverb.room_size = room_size;
    }
    engine.set_effect_settings(effects);

    // Let a sweep cover its full span.
    if let Some(end) = performance.sweep {
        let (lo, hi) = engine.frequency_range();
        let low = performance.frequency.min(end).min(lo);
        let high = performance.frequency.max(end).max(hi);
        engine.set_frequency_range(low, high);
    }
    engine.set_frequency(performance.frequency);
}

enum Finish {
    /// Stop the producer once the duration has elapsed.
    #[cfg(feature = "device")]
    AfterDuration,
    /// Let the producer run until its sink reports closed.
    #[cfg(feature = "wav")]
    WhenSinkCloses,
}

/// Whole-performance length; negative, NaN or unrepresentable input is zero.
fn duration_from_secs(seconds: f32) -> Duration {
    Duration::try_from_secs_f32(seconds).unwrap_or(Duration::ZERO)
}

fn perform<S>(
    config: EngineConfig,
    sink: S,
    seconds: f32,
    performance: &Performance,
    finish: Finish,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: AudioSink + 'static,
{
    let engine = Arc::new(AudioEngine::new(config));
    apply_performance(&engine, performance);
    engine.begin(sink)?;

    let duration = duration_from_secs(seconds);
    let started = Instant::now();

    if performance.melody {
        melody::play_melody(&engine, &melody::STARTUP_FANFARE, &MelodyOptions {
            amplitude: performance.amplitude,
            ..MelodyOptions::default()
        });
    } else if performance.self_test {
        melody::system_test(&engine, Duration::from_millis(1_000));
    } else {
        engine.set_amplitude(performance.amplitude);
        let from = performance.frequency;
        while started.elapsed() < duration && engine.is_running() {
            if let Some(to) = performance.sweep {
                let t = started.elapsed().as_secs_f32() / duration.as_secs_f32();
                engine.set_frequency(from + (to - from) * t.min(1.0));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    engine.set_amplitude(0.0);
    match finish {
        #[cfg(feature = "device")]
        Finish::AfterDuration => {
            let remaining = duration.saturating_sub(started.elapsed());
            if !remaining.is_zero() && engine.is_running() {
                thread::sleep(remaining);
            }
            engine.stop();
        }
        #[cfg(feature = "wav")]
        Finish::WhenSinkCloses => engine.wait(),
    }

    let perf = engine.performance();
    info!(
        "{} buffers, {} missed locks, {} overruns, {:.1}% average load",
        perf.buffers, perf.missed_locks, perf.overruns, perf.load_percent
    );
    Ok(())
}
