//! Audio engine: control plane, lifecycle, and the real-time producer.
//!
//! Two kinds of actor touch the engine:
//!
//! - **Control-plane callers** (sensor mapping, UI, command parsers) call the
//!   setters and getters from any thread. Each call takes the control mutex
//!   with an unbounded wait, changes a few plain fields, and releases it.
//! - **The producer** is one dedicated thread that owns all DSP state via a
//!   [`Renderer`]. Once per buffer it tries the control mutex without
//!   blocking, renders, and then blocks on the sink write, which paces the
//!   loop to real time.
//!
//! Nothing on the producer path allocates or frees: a new delay line is
//! built by the control caller and handed over, and the old line is handed
//! back to be dropped on the control side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::chain::EffectSettings;
use super::chorus::ChorusSettings;
use super::delay::{DelaySettings, allocate_line};
use super::mixer::{ChannelMode, ParameterSmoother, SmoothingPreset};
use super::monitor::{PerformanceMonitor, PerformanceSnapshot};
use super::oscillator::{MAX_FREQUENCY, MIN_FREQUENCY, VoiceSettings, Waveform, clamp_octave};
use super::renderer::Renderer;
use super::reverb::ReverbSettings;
use super::{CHANNELS, VOICE_COUNT, clamp_param};
use crate::config::{EngineConfig, default_voicing};
use crate::error::{EngineError, SinkError};
use crate::sink::{AudioSink, SinkFormat, finish_quietly};

/// Highest accepted amplitude (percent).
pub const MAX_AMPLITUDE: f32 = 100.0;

/// Parameters shared between the control plane and the producer.
#[derive(Debug)]
pub(crate) struct ControlState {
    pub(crate) target_frequency: f32,
    pub(crate) target_amplitude: f32,
    pub(crate) pitch: ParameterSmoother,
    pub(crate) volume: ParameterSmoother,
    pub(crate) min_frequency: f32,
    pub(crate) max_frequency: f32,
    pub(crate) channel_mode: ChannelMode,
    pub(crate) voices: [VoiceSettings; VOICE_COUNT],
    pub(crate) effects: EffectSettings,
    /// Bumped on every voice or effect change; the producer re-applies
    /// settings only when it moves.
    pub(crate) revision: u64,
    pub(crate) reset_requests: u64,
    /// Freshly allocated delay line and its time, waiting for the producer.
    pub(crate) pending_delay_line: Option<(Vec<i16>, u32)>,
    /// Line the producer swapped out, waiting to be dropped off the RT path.
    pub(crate) retired_delay_line: Option<Vec<i16>>,
}

impl ControlState {
    pub(crate) fn from_config(config: &EngineConfig) -> Self {
        Self {
            target_frequency: config.min_frequency,
            target_amplitude: 0.0,
            pitch: ParameterSmoother::new(config.min_frequency, config.pitch_smoothing),
            volume: ParameterSmoother::new(0.0, config.volume_smoothing),
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            channel_mode: config.channel_mode,
            voices: config.voices,
            effects: config.effects,
            revision: 0,
            reset_requests: 0,
            pending_delay_line: None,
            retired_delay_line: None,
        }
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Running,
    Stopped,
}

/// Every read-back value, taken under a single lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub frequency: f32,
    pub smoothed_frequency: f32,
    pub amplitude: f32,
    pub smoothed_amplitude: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    pub pitch_smoothing: f32,
    pub volume_smoothing: f32,
    pub channel_mode: ChannelMode,
    pub voices: [VoiceSettings; VOICE_COUNT],
    pub effects: EffectSettings,
}

struct Lifecycle {
    state: EngineState,
    /// DSP state, parked here until `begin` moves it onto the producer.
    renderer: Option<Renderer>,
    producer: Option<JoinHandle<()>>,
}

/// The theremin engine, shared between the control plane and the producer.
///
/// Wrap it in an [`Arc`] to start it; every control call takes `&self`.
pub struct AudioEngine {
    config: EngineConfig,
    control: Mutex<ControlState>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    monitor: PerformanceMonitor,
}

fn voice_slot(voice: usize) -> Option<usize> {
    if (1..=VOICE_COUNT).contains(&voice) {
        Some(voice - 1)
    } else {
        warn!("invalid voice index {voice} (expected 1..={VOICE_COUNT})");
        None
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl AudioEngine {
    /// Create an engine and allocate all DSP buffers. Nothing runs until
    /// [`begin`](Self::begin).
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let renderer = Renderer::new(&config);
        let format = SinkFormat {
            sample_rate: config.sample_rate,
            channels: CHANNELS,
            buffer_frames: config.buffer_frames,
        };
        Self {
            control: Mutex::new(ControlState::from_config(&config)),
            lifecycle: Mutex::new(Lifecycle {
                state: EngineState::Uninitialized,
                renderer: Some(renderer),
                producer: None,
            }),
            running: AtomicBool::new(false),
            monitor: PerformanceMonitor::new(format.buffer_duration()),
            config,
        }
    }

    /// Configuration the engine was built with, after normalization.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn sink_format(&self) -> SinkFormat {
        SinkFormat {
            sample_rate: self.config.sample_rate,
            channels: CHANNELS,
            buffer_frames: self.config.buffer_frames,
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the control lock. Any delay line handed back by the
    /// producer is dropped after the lock is released.
    fn update<R>(&self, f: impl FnOnce(&mut ControlState) -> R) -> R {
        let (result, retired) = {
            let mut state = self.lock_control();
            let result = f(&mut state);
            (result, state.retired_delay_line.take())
        };
        drop(retired);
        result
    }

    fn read<R>(&self, f: impl FnOnce(&ControlState) -> R) -> R {
        f(&self.lock_control())
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Configure `sink` and start the producer thread.
    ///
    /// On any error the producer is not started and the engine stays
    /// `Uninitialized`, so `begin` may be retried with another sink.
    pub fn begin<S>(self: &Arc<Self>, mut sink: S) -> Result<(), EngineError>
    where
        S: AudioSink + 'static,
    {
        let mut lifecycle = self.lock_lifecycle();
        match lifecycle.state {
            EngineState::Uninitialized => {}
            EngineState::Running if self.running.load(Ordering::Acquire) => {
                return Err(EngineError::AlreadyStarted);
            }
            // A producer that exited on its own leaves the engine stopped.
            EngineState::Running | EngineState::Stopped => {
                lifecycle.state = EngineState::Stopped;
                return Err(EngineError::Stopped);
            }
        }

        let format = self.sink_format();
        if let Err(e) = sink.configure(&format) {
            error!("audio sink setup failed: {e}");
            return Err(e.into());
        }

        let renderer = match lifecycle.renderer.take() {
            Some(renderer) => renderer,
            None => Renderer::new(&self.config),
        };

        self.running.store(true, Ordering::Release);
        let engine = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("audio-producer".into())
            .spawn(move || engine.run_producer(renderer, sink, format));

        match spawned {
            Ok(handle) => {
                lifecycle.producer = Some(handle);
                lifecycle.state = EngineState::Running;
                info!(
                    "audio engine running: {} Hz, {} frames per buffer ({:?})",
                    format.sample_rate,
                    format.buffer_frames,
                    format.buffer_duration()
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                lifecycle.renderer = Some(Renderer::new(&self.config));
                error!("failed to spawn audio producer: {e}");
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Stop the producer and wait for it to exit. The engine cannot be
    /// restarted afterwards.
    pub fn stop(&self) {
        let handle = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.state != EngineState::Running {
                return;
            }
            lifecycle.state = EngineState::Stopped;
            lifecycle.producer.take()
        };
        self.running.store(false, Ordering::Release);
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("audio producer panicked");
            }
        }
        info!("audio engine stopped");
    }

    /// Block until the producer exits on its own (its sink closed or failed).
    pub fn wait(&self) {
        let handle = self.lock_lifecycle().producer.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("audio producer panicked");
            }
        }
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state == EngineState::Running {
            lifecycle.state = EngineState::Stopped;
        }
    }

    /// Current lifecycle state. A producer that exited on a sink error reads as `Stopped`.
    pub fn state(&self) -> EngineState {
        let state = self.lock_lifecycle().state;
        if state == EngineState::Running && !self.running.load(Ordering::Acquire) {
            EngineState::Stopped
        } else {
            state
        }
    }

    /// Whether the producer is currently rendering.
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    fn run_producer<S: AudioSink>(self: Arc<Self>, mut renderer: Renderer, mut sink: S, format: SinkFormat) {
        if let Some(core) = self.config.producer_core {
            let core_ids = core_affinity::get_core_ids().unwrap_or_default();
            match core_ids.get(core) {
                Some(&id) if core_affinity::set_for_current(id) => {
                    debug!("audio producer pinned to core {core}");
                }
                _ => warn!("could not pin audio producer to core {core}"),
            }
        }

        let mut buffer = vec![0i16; format.buffer_frames * format.channels as usize];
        info!("audio producer started");

        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();
            let synced = renderer.render_buffer(&self.control, &mut buffer);
            self.monitor.record(started.elapsed(), synced);

            if let Err(e) = sink.write(&buffer) {
                match e {
                    SinkError::Closed => info!("audio sink closed"),
                    other => error!("audio sink write failed: {other}"),
                }
                break;
            }
        }

        self.running.store(false, Ordering::Release);
        finish_quietly(&mut sink);
        info!("audio producer exited");
    }

    // ── Pitch & amplitude ───────────────────────────────────

    /// Set the target pitch, clamped to the current frequency range.
    pub fn set_frequency(&self, hz: f32) {
        self.update(|s| {
            s.target_frequency = clamp_param(hz, s.min_frequency, s.max_frequency);
        });
    }

    /// Target pitch in Hz, as last set.
    pub fn frequency(&self) -> f32 {
        self.read(|s| s.target_frequency)
    }

    /// Frequency the producer used for the most recent buffer.
    pub fn smoothed_frequency(&self) -> f32 {
        self.read(|s| s.pitch.value())
    }

    /// Set the target amplitude in percent (0–100).
    pub fn set_amplitude(&self, percent: f32) {
        self.update(|s| s.target_amplitude = clamp_param(percent, 0.0, MAX_AMPLITUDE));
    }

    /// Target amplitude in percent, as last set.
    pub fn amplitude(&self) -> f32 {
        self.read(|s| s.target_amplitude)
    }

    /// Amplitude the producer used for the most recent buffer.
    pub fn smoothed_amplitude(&self) -> f32 {
        self.read(|s| s.volume.value())
    }

    /// Change the playable range and pull current and smoothed pitch into it.
    pub fn set_frequency_range(&self, min_hz: f32, max_hz: f32) {
        let lo = clamp_param(min_hz, MIN_FREQUENCY, MAX_FREQUENCY);
        let hi = clamp_param(max_hz, MIN_FREQUENCY, MAX_FREQUENCY);
        let (lo, hi) = if lo <= hi {
            (lo, hi)
        } else {
            warn!("frequency range {min_hz}-{max_hz} is inverted; swapping");
            (hi, lo)
        };
        self.update(|s| {
            s.min_frequency = lo;
            s.max_frequency = hi;
            s.target_frequency = s.target_frequency.clamp(lo, hi);
            s.pitch.clamp_to(lo, hi);
        });
        debug!("frequency range set to {lo}-{hi} Hz");
    }

    /// Playable range as `(min, max)` in Hz.
    pub fn frequency_range(&self) -> (f32, f32) {
        self.read(|s| (s.min_frequency, s.max_frequency))
    }

    // ── Smoothing ───────────────────────────────────────────

    /// Per-buffer pitch smoothing factor, clamped to 0–1 (1.0 follows instantly).
    pub fn set_pitch_smoothing(&self, factor: f32) {
        self.update(|s| s.pitch.set_factor(factor));
        debug!("pitch smoothing set to {factor}");
    }

    /// Current pitch smoothing factor.
    pub fn pitch_smoothing(&self) -> f32 {
        self.read(|s| s.pitch.factor())
    }

    /// Per-buffer volume smoothing factor, clamped to 0–1.
    pub fn set_volume_smoothing(&self, factor: f32) {
        self.update(|s| s.volume.set_factor(factor));
        debug!("volume smoothing set to {factor}");
    }

    /// Current volume smoothing factor.
    pub fn volume_smoothing(&self) -> f32 {
        self.read(|s| s.volume.factor())
    }

    /// Set pitch smoothing from a named preset.
    pub fn set_pitch_smoothing_preset(&self, preset: SmoothingPreset) {
        self.set_pitch_smoothing(preset.factor());
    }

    /// Set volume smoothing from a named preset.
    pub fn set_volume_smoothing_preset(&self, preset: SmoothingPreset) {
        self.set_volume_smoothing(preset.factor());
    }

    // ── Output routing ──────────────────────────────────────

    /// Route the mono mix to both channels or to one side only.
    pub fn set_channel_mode(&self, mode: ChannelMode) {
        self.update(|s| s.channel_mode = mode);
        debug!("channel mode set to {mode}");
    }

    /// Current output routing.
    pub fn channel_mode(&self) -> ChannelMode {
        self.read(|s| s.channel_mode)
    }

    // ── Voices (addressed 1..=3) ────────────────────────────

    /// Set a voice's waveform. `Off` removes it from the mix.
    pub fn set_voice_waveform(&self, voice: usize, waveform: Waveform) {
        let Some(slot) = voice_slot(voice) else { return };
        self.update(|s| {
            s.voices[slot].waveform = waveform;
            s.touch();
        });
        debug!("voice {voice} waveform set to {waveform}");
    }

    /// Waveform of `voice`, or `None` for an invalid index.
    pub fn voice_waveform(&self, voice: usize) -> Option<Waveform> {
        self.voice(voice).map(|v| v.waveform)
    }

    /// Set a voice's octave shift, clamped to -1..=1.
    pub fn set_voice_octave(&self, voice: usize, octave: i32) {
        let Some(slot) = voice_slot(voice) else { return };
        let clamped = clamp_octave(octave);
        if clamped != octave {
            warn!("octave shift {octave} out of range; using {clamped}");
        }
        self.update(|s| {
            s.voices[slot].octave = clamped;
            s.touch();
        });
        debug!("voice {voice} octave set to {clamped}");
    }

    /// Octave shift of `voice`, or `None` for an invalid index.
    pub fn voice_octave(&self, voice: usize) -> Option<i32> {
        self.voice(voice).map(|v| v.octave)
    }

    /// Set a voice's volume, clamped to 0–1.
    pub fn set_voice_volume(&self, voice: usize, volume: f32) {
        let Some(slot) = voice_slot(voice) else { return };
        let volume = clamp_param(volume, 0.0, 1.0);
        self.update(|s| {
            s.voices[slot].volume = volume;
            s.touch();
        });
        debug!("voice {voice} volume set to {volume}");
    }

    /// Volume of `voice`, or `None` for an invalid index.
    pub fn voice_volume(&self, voice: usize) -> Option<f32> {
        self.voice(voice).map(|v| v.volume)
    }

    /// Replace every setting of one voice at once.
    pub fn set_voice(&self, voice: usize, settings: VoiceSettings) {
        let Some(slot) = voice_slot(voice) else { return };
        self.update(|s| {
            s.voices[slot] = settings.clamped();
            s.touch();
        });
    }

    /// All settings of one voice, or `None` for an invalid index.
    pub fn voice(&self, voice: usize) -> Option<VoiceSettings> {
        let slot = voice_slot(voice)?;
        Some(self.read(|s| s.voices[slot]))
    }

    /// Restore the stock voicing and silence the output.
    pub fn set_default_settings(&self) {
        self.update(|s| {
            s.target_amplitude = 0.0;
            s.voices = default_voicing();
            s.touch();
        });
        debug!("default voicing restored");
    }

    // ── Delay ───────────────────────────────────────────────

    /// Switch the delay in or out of the chain.
    pub fn set_delay_enabled(&self, enabled: bool) {
        self.update(|s| {
            s.effects.delay.enabled = enabled;
            s.touch();
        });
        info!("delay {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Change the delay time. The new line is allocated here, on the
    /// caller's thread, and handed to the producer.
    pub fn set_delay_time(&self, time_ms: u32) {
        let mut settings = DelaySettings::default();
        settings.set_time_ms(time_ms);
        let time_ms = settings.time_ms;
        let line = allocate_line(time_ms, self.config.sample_rate);

        let replaced = self.update(|s| {
            s.effects.delay.time_ms = time_ms;
            s.pending_delay_line.replace((line, time_ms))
        });
        drop(replaced);
        debug!("delay time set to {time_ms} ms");
    }

    /// Delay feedback, clamped to 0–0.95.
    pub fn set_delay_feedback(&self, feedback: f32) {
        self.update(|s| {
            s.effects.delay.set_feedback(feedback);
            s.touch();
        });
    }

    /// Delay dry/wet mix, clamped to 0–1.
    pub fn set_delay_mix(&self, mix: f32) {
        self.update(|s| {
            s.effects.delay.set_mix(mix);
            s.touch();
        });
    }

    /// Current delay parameters.
    pub fn delay_settings(&self) -> DelaySettings {
        self.read(|s| s.effects.delay)
    }

    // ── Chorus ──────────────────────────────────────────────

    /// Switch the chorus in or out of the chain.
    pub fn set_chorus_enabled(&self, enabled: bool) {
        self.update(|s| {
            s.effects.chorus.enabled = enabled;
            s.touch();
        });
        info!("chorus {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Chorus LFO rate, clamped to 0.1–10 Hz.
    pub fn set_chorus_rate(&self, rate_hz: f32) {
        self.update(|s| {
            s.effects.chorus.set_rate_hz(rate_hz);
            s.touch();
        });
    }

    /// Chorus sweep depth, clamped to 0–50 ms.
    pub fn set_chorus_depth(&self, depth_ms: f32) {
        self.update(|s| {
            s.effects.chorus.set_depth_ms(depth_ms);
            s.touch();
        });
    }

    /// Chorus dry/wet mix, clamped to 0–1.
    pub fn set_chorus_mix(&self, mix: f32) {
        self.update(|s| {
            s.effects.chorus.set_mix(mix);
            s.touch();
        });
    }

    /// Current chorus parameters.
    pub fn chorus_settings(&self) -> ChorusSettings {
        self.read(|s| s.effects.chorus)
    }

    // ── Reverb ──────────────────────────────────────────────

    /// Switch the reverb in or out of the chain.
    pub fn set_reverb_enabled(&self, enabled: bool) {
        self.update(|s| {
            s.effects.reverb.enabled = enabled;
            s.touch();
        });
        info!("reverb {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Reverb room size, clamped to 0–1; larger rooms ring longer.
    pub fn set_reverb_room_size(&self, room_size: f32) {
        self.update(|s| {
            s.effects.reverb.room_size = clamp_param(room_size, 0.0, 1.0);
            s.touch();
        });
    }

    /// Reverb high-frequency damping, clamped to 0–1.
    pub fn set_reverb_damping(&self, damping: f32) {
        self.update(|s| {
            s.effects.reverb.damping = clamp_param(damping, 0.0, 1.0);
            s.touch();
        });
    }

    /// Reverb dry/wet mix, clamped to 0–1.
    pub fn set_reverb_mix(&self, mix: f32) {
        self.update(|s| {
            s.effects.reverb.mix = clamp_param(mix, 0.0, 1.0);
            s.touch();
        });
    }

    /// Current reverb parameters.
    pub fn reverb_settings(&self) -> ReverbSettings {
        self.read(|s| s.effects.reverb)
    }

    // ── Effects as a whole ──────────────────────────────────

    /// Parameters of all three effects.
    pub fn effect_settings(&self) -> EffectSettings {
        self.read(|s| s.effects)
    }

    /// Apply a full effect preset, including a delay-time change if needed.
    pub fn set_effect_settings(&self, settings: EffectSettings) {
        let settings = settings.clamped();
        if settings.delay.time_ms != self.delay_settings().time_ms {
            self.set_delay_time(settings.delay.time_ms);
        }
        self.update(|s| {
            s.effects = settings;
            s.touch();
        });
    }

    /// Ask the producer to clear every effect buffer before its next buffer.
    pub fn reset_effects(&self) {
        self.update(|s| s.reset_requests = s.reset_requests.wrapping_add(1));
        debug!("effects reset requested");
    }

    // ── Read-back ───────────────────────────────────────────

    /// Snapshot of every read-back value, taken under one lock.
    pub fn status(&self) -> EngineStatus {
        let state = self.state();
        self.read(|s| EngineStatus {
            state,
            frequency: s.target_frequency,
            smoothed_frequency: s.pitch.value(),
            amplitude: s.target_amplitude,
            smoothed_amplitude: s.volume.value(),
            min_frequency: s.min_frequency,
            max_frequency: s.max_frequency,
            pitch_smoothing: s.pitch.factor(),
            volume_smoothing: s.volume.factor(),
            channel_mode: s.channel_mode,
            voices: s.voices,
            effects: s.effects,
        })
    }

    /// Producer timing counters.
    pub fn performance(&self) -> PerformanceSnapshot {
        self.monitor.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, PacedSink};
    use std::time::Duration;

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    struct UnpluggedSink;

    impl AudioSink for UnpluggedSink {
        fn configure(&mut self, _format: &SinkFormat) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("unplugged".into()))
        }

        fn write(&mut self, _samples: &[i16]) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct FailingWriteSink;

    impl AudioSink for FailingWriteSink {
        fn configure(&mut self, _format: &SinkFormat) -> Result<(), SinkError> {
            Ok(())
        }

        fn write(&mut self, _samples: &[i16]) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("bus error")))
        }
    }

    #[test]
    fn new_engine_starts_in_the_stock_state() {
        let engine = AudioEngine::default();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(engine.frequency(), 220.0);
        assert_eq!(engine.amplitude(), 0.0);
        assert_eq!(engine.frequency_range(), (220.0, 880.0));
        assert_eq!(engine.voice_waveform(1), Some(Waveform::Triangle));
        assert_eq!(engine.voice_volume(2), Some(0.6));
        assert_eq!(engine.voice_volume(3), Some(0.5));
        assert_eq!(engine.pitch_smoothing(), 0.8);
        assert!(!engine.effect_settings().any_enabled());
    }

    #[test]
    fn setters_round_trip_in_range_values() {
        let engine = AudioEngine::default();
        engine.set_frequency(440.0);
        engine.set_amplitude(65.0);
        engine.set_voice_waveform(2, Waveform::Saw);
        engine.set_voice_octave(2, -1);
        engine.set_voice_volume(2, 0.25);
        engine.set_channel_mode(ChannelMode::LeftOnly);
        engine.set_volume_smoothing(0.3);
        engine.set_chorus_rate(3.5);
        engine.set_reverb_damping(0.7);
        engine.set_delay_feedback(0.6);

        assert_eq!(engine.frequency(), 440.0);
        assert_eq!(engine.amplitude(), 65.0);
        assert_eq!(engine.voice(2), Some(VoiceSettings::new(Waveform::Saw, -1, 0.25)));
        assert_eq!(engine.channel_mode(), ChannelMode::LeftOnly);
        assert_eq!(engine.volume_smoothing(), 0.3);
        assert_eq!(engine.chorus_settings().rate_hz, 3.5);
        assert_eq!(engine.reverb_settings().damping, 0.7);
        assert_eq!(engine.delay_settings().feedback, 0.6);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let engine = AudioEngine::default();
        engine.set_frequency(5_000.0);
        assert_eq!(engine.frequency(), 880.0);
        engine.set_frequency(10.0);
        assert_eq!(engine.frequency(), 220.0);
        engine.set_amplitude(150.0);
        assert_eq!(engine.amplitude(), 100.0);
        engine.set_amplitude(-5.0);
        assert_eq!(engine.amplitude(), 0.0);
        engine.set_voice_volume(1, 2.5);
        assert_eq!(engine.voice_volume(1), Some(1.0));
        engine.set_voice_octave(1, 3);
        assert_eq!(engine.voice_octave(1), Some(1));
        engine.set_pitch_smoothing(1.5);
        assert_eq!(engine.pitch_smoothing(), 1.0);
        engine.set_delay_feedback(1.2);
        assert_eq!(engine.delay_settings().feedback, 0.95);
        engine.set_delay_time(5_000);
        assert_eq!(engine.delay_settings().time_ms, 2_000);
        engine.set_chorus_depth(99.0);
        assert_eq!(engine.chorus_settings().depth_ms, 50.0);
        engine.set_reverb_room_size(-1.0);
        assert_eq!(engine.reverb_settings().room_size, 0.0);
    }

    #[test]
    fn invalid_voice_index_is_a_no_op() {
        let engine = AudioEngine::default();
        let before = engine.status();
        engine.set_voice_waveform(0, Waveform::Saw);
        engine.set_voice_octave(4, 1);
        engine.set_voice_volume(99, 0.1);
        assert_eq!(engine.status(), before);
        assert_eq!(engine.voice(0), None);
        assert_eq!(engine.voice_waveform(4), None);
    }

    #[test]
    fn frequency_range_reclamps_current_and_smoothed_pitch() {
        let engine = AudioEngine::default();
        engine.set_frequency(800.0);
        engine.set_frequency_range(300.0, 600.0);
        assert_eq!(engine.frequency(), 600.0);
        assert_eq!(engine.smoothed_frequency(), 300.0);

        engine.set_frequency_range(900.0, 700.0);
        assert_eq!(engine.frequency_range(), (700.0, 900.0));
        assert_eq!(engine.frequency(), 700.0);
    }

    #[test]
    fn smoothing_presets_map_to_factors() {
        let engine = AudioEngine::default();
        engine.set_pitch_smoothing_preset(SmoothingPreset::Extra);
        engine.set_volume_smoothing_preset(SmoothingPreset::None);
        assert_eq!(engine.pitch_smoothing(), 0.5);
        assert_eq!(engine.volume_smoothing(), 1.0);
    }

    #[test]
    fn default_settings_restore_stock_voicing() {
        let engine = AudioEngine::default();
        engine.set_amplitude(80.0);
        engine.set_voice_waveform(1, Waveform::Square);
        engine.set_voice_waveform(3, Waveform::Sine);
        engine.set_default_settings();
        assert_eq!(engine.amplitude(), 0.0);
        assert_eq!(engine.voice_waveform(1), Some(Waveform::Triangle));
        assert_eq!(engine.voice_waveform(3), Some(Waveform::Off));
    }

    #[test]
    fn delay_time_change_queues_a_new_line() {
        let engine = AudioEngine::default();
        engine.set_delay_time(100);
        engine.set_delay_time(200);
        let state = engine.lock_control();
        let (line, ms) = state.pending_delay_line.as_ref().unwrap();
        assert_eq!(*ms, 200);
        assert_eq!(line.len(), 4_410);
    }

    #[test]
    fn effect_settings_apply_as_a_whole() {
        let engine = AudioEngine::default();
        let mut preset = EffectSettings::default();
        preset.delay.enabled = true;
        preset.delay.time_ms = 120;
        preset.reverb.enabled = true;
        preset.reverb.mix = 0.5;
        engine.set_effect_settings(preset);
        assert_eq!(engine.effect_settings(), preset);
        assert!(engine.lock_control().pending_delay_line.is_some());
    }

    #[test]
    fn status_serializes_to_json() {
        let engine = AudioEngine::default();
        engine.set_frequency(440.0);
        let json = serde_json::to_value(engine.status()).unwrap();
        assert_eq!(json["state"], "uninitialized");
        assert_eq!(json["frequency"], 440.0);
        assert_eq!(json["channel_mode"], "stereo_both");
        assert_eq!(json["voices"][0]["waveform"], "triangle");
    }

    #[test]
    fn failed_sink_setup_leaves_engine_uninitialized() {
        let engine = Arc::new(AudioEngine::default());
        let err = engine.begin(UnpluggedSink).unwrap_err();
        assert!(matches!(err, EngineError::Sink(SinkError::Unavailable(_))));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(engine.performance().buffers, 0);

        // A working sink can still start it.
        engine.begin(MemorySink::with_frame_limit(512)).unwrap();
        engine.wait();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn producer_renders_into_the_sink() {
        let config = EngineConfig {
            pitch_smoothing: 1.0,
            volume_smoothing: 1.0,
            ..EngineConfig::default()
        };
        let engine = Arc::new(AudioEngine::new(config));
        engine.set_voice_waveform(1, Waveform::Sine);
        engine.set_frequency(440.0);
        engine.set_amplitude(100.0);

        let frames = 256 * 20;
        let sink = MemorySink::with_frame_limit(frames);
        let capture = sink.handle();
        engine.begin(sink).unwrap();
        assert!(wait_until(Duration::from_secs(5), || engine.state() == EngineState::Stopped));
        engine.wait();

        let samples = capture.samples();
        assert_eq!(samples.len(), frames * 2);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        assert!(peak > 30_000, "full-scale sine expected, peak {peak}");
        assert_eq!(engine.smoothed_frequency(), 440.0);
        assert!(engine.performance().buffers >= 20);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let engine = Arc::new(AudioEngine::default());
        engine.begin(PacedSink::new(MemorySink::new())).unwrap();
        let err = engine.begin(MemorySink::new()).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyStarted));
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(engine.begin(MemorySink::new()), Err(EngineError::Stopped)));
    }

    #[test]
    fn write_failure_stops_the_producer() {
        let engine = Arc::new(AudioEngine::default());
        engine.begin(FailingWriteSink).unwrap();
        assert!(wait_until(Duration::from_secs(5), || !engine.is_running()));
        assert_eq!(engine.state(), EngineState::Stopped);

        let err = engine.begin(MemorySink::new()).unwrap_err();
        assert!(matches!(err, EngineError::Stopped), "got {err}");
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn control_calls_do_not_stall_the_producer() {
        let engine = Arc::new(AudioEngine::default());
        engine.set_amplitude(50.0);
        let sink = PacedSink::new(MemorySink::new());
        engine.begin(sink).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..2_000 {
                        engine.set_frequency(220.0 + ((i * 7 + t) % 660) as f32);
                        engine.set_voice_volume(1 + (i % 3), (i % 10) as f32 / 10.0);
                        if i % 500 == 0 {
                            engine.set_delay_time(50 + (i as u32 % 300));
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let rendered = engine.performance().buffers;
        assert!(wait_until(Duration::from_secs(5), || engine.performance().buffers > rendered));
        engine.stop();
        let (lo, hi) = engine.frequency_range();
        let f = engine.smoothed_frequency();
        assert!((lo..=hi).contains(&f), "smoothed pitch {f} outside range");
    }

    #[test]
    fn reset_effects_reaches_the_producer() {
        let engine = Arc::new(AudioEngine::default());
        engine.set_reverb_enabled(true);
        engine.reset_effects();
        assert_eq!(engine.lock_control().reset_requests, 1);
        engine.begin(MemorySink::with_frame_limit(1_024)).unwrap();
        engine.wait();
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
