//! Buffer renderer: everything the producer does for one buffer.
//!
//! The renderer owns all DSP state (oscillators, effect buffers). It only
//! reads the shared control state, and only through a non-blocking lock:
//! when a control-plane writer holds the lock, the buffer is rendered with
//! the previous buffer's values.

use std::sync::{Mutex, TryLockError};

use super::chain::EffectsChain;
use super::engine::ControlState;
use super::mixer::{ChannelMode, MASTER_NOISE_GATE_THRESHOLD, apply_gain, mix_voices};
use super::oscillator::Oscillator;
use super::{VOICE_COUNT, noise_gate};
use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct Renderer {
    voices: [Oscillator; VOICE_COUNT],
    chain: EffectsChain,
    sample_rate: f32,
    frequency: f32,
    amplitude: f32,
    channel_mode: ChannelMode,
    seen_revision: u64,
    seen_resets: u64,
}

impl Renderer {
    /// Build the producer's DSP state. Allocates every effect buffer.
    pub fn new(config: &EngineConfig) -> Self {
        let mut voices = config.voices.map(|v| Oscillator::with_settings(&v));
        for voice in &mut voices {
            voice.set_frequency(config.min_frequency);
        }
        Self {
            voices,
            chain: EffectsChain::with_settings(&config.effects, config.sample_rate),
            sample_rate: config.sample_rate as f32,
            frequency: config.min_frequency,
            amplitude: 0.0,
            channel_mode: config.channel_mode,
            seen_revision: 0,
            seen_resets: 0,
        }
    }

    /// Advance the smoothers and pick up any parameter changes.
    ///
    /// Called with the control lock held; does no allocation or deallocation.
    pub(crate) fn sync(&mut self, state: &mut ControlState) {
        self.frequency = state.pitch.step(state.target_frequency);
        self.amplitude = state.volume.step(state.target_amplitude);
        self.channel_mode = state.channel_mode;

        if state.revision != self.seen_revision {
            for (voice, settings) in self.voices.iter_mut().zip(&state.voices) {
                voice.apply(settings);
            }
            self.chain.apply(&state.effects);
            self.seen_revision = state.revision;
        }

        // One line in flight at a time; the old one must be collected first.
        if state.retired_delay_line.is_none() {
            if let Some((line, time_ms)) = state.pending_delay_line.take() {
                let old = self.chain.delay_mut().install_line(line, time_ms);
                state.retired_delay_line = Some(old);
            }
        }

        if state.reset_requests != self.seen_resets {
            self.chain.reset();
            self.seen_resets = state.reset_requests;
        }
    }

    /// Try to sync with the control state without blocking, then render.
    ///
    /// Returns whether the sync happened.
    pub(crate) fn render_buffer(&mut self, control: &Mutex<ControlState>, out: &mut [i16]) -> bool {
        let synced = match control.try_lock() {
            Ok(mut state) => {
                self.sync(&mut state);
                true
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                self.sync(&mut poisoned.into_inner());
                true
            }
            Err(TryLockError::WouldBlock) => false,
        };
        self.render(out);
        synced
    }

    /// Fill `out` with interleaved stereo frames using the current values.
    pub fn render(&mut self, out: &mut [i16]) {
        for voice in &mut self.voices {
            voice.set_frequency(self.frequency);
        }
        let gain = self.amplitude / 100.0;

        for frame in out.chunks_exact_mut(2) {
            let sample = mix_voices(&mut self.voices, self.sample_rate);
            let sample = apply_gain(sample, gain);
            let sample = self.chain.process(sample);
            let sample = noise_gate(sample, MASTER_NOISE_GATE_THRESHOLD);
            frame.copy_from_slice(&self.channel_mode.route(sample));
        }
    }

    /// Smoothed frequency used for the last buffer.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Smoothed amplitude (0–100) used for the last buffer.
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn voices(&self) -> &[Oscillator; VOICE_COUNT] {
        &self.voices
    }

    pub fn chain(&self) -> &EffectsChain {
        &self.chain
    }
}
