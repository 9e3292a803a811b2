//! Delay effect: single-tap feedback echo over a circular buffer.
//!
//! The line is exactly `delay_time × sample_rate` samples long; the sample
//! read at the write index is therefore the one written one delay period ago.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SAMPLE_RATE, clamp_param, clamp_sample, clamp_sample_f32};

pub const MIN_DELAY_MS: u32 = 10;
pub const MAX_DELAY_MS: u32 = 2_000;
/// Feedback ceiling; anything at or above 1.0 would never decay.
pub const MAX_FEEDBACK: f32 = 0.95;

/// Delay parameters as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    pub enabled: bool,
    /// Delay time in milliseconds.
    pub time_ms: u32,
    /// Feedback amount (0.0 = single echo, 0.95 = long trails).
    pub feedback: f32,
    /// Dry/wet mix (0.0 = fully dry, 1.0 = fully wet).
    pub mix: f32,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            time_ms: 300,
            feedback: 0.5,
            mix: 0.3,
        }
    }
}

impl DelaySettings {
    pub fn set_time_ms(&mut self, time_ms: u32) {
        self.time_ms = time_ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS);
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = clamp_param(feedback, 0.0, MAX_FEEDBACK);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = clamp_param(mix, 0.0, 1.0);
    }

    /// Same settings with every field forced into range.
    pub fn clamped(mut self) -> Self {
        self.set_time_ms(self.time_ms);
        self.set_feedback(self.feedback);
        self.set_mix(self.mix);
        self
    }
}

/// Number of samples in a delay line of `time_ms` at `sample_rate`.
pub fn line_len(time_ms: u32, sample_rate: u32) -> usize {
    ((time_ms as u64 * sample_rate as u64) / 1_000).max(1) as usize
}

/// Allocate a silent delay line. Never call this from the producer thread.
pub fn allocate_line(time_ms: u32, sample_rate: u32) -> Vec<i16> {
    vec![0; line_len(time_ms, sample_rate)]
}

/// A mono feedback delay.
#[derive(Debug, Clone)]
pub struct DelayEffect {
    line: Vec<i16>,
    write_index: usize,
    sample_rate: u32,
    settings: DelaySettings,
}

impl Default for DelayEffect {
    fn default() -> Self {
        Self::new(DelaySettings::default().time_ms, SAMPLE_RATE)
    }
}

impl DelayEffect {
    /// Create a disabled delay with default feedback and mix.
    pub fn new(time_ms: u32, sample_rate: u32) -> Self {
        let mut settings = DelaySettings::default();
        settings.set_time_ms(time_ms);
        Self::with_settings(&settings, sample_rate)
    }

    pub fn with_settings(settings: &DelaySettings, sample_rate: u32) -> Self {
        let settings = settings.clamped();
        let line = allocate_line(settings.time_ms, sample_rate);
        debug!(
            "delay line: {} ms, {} samples ({} KB)",
            settings.time_ms,
            line.len(),
            line.len() * size_of::<i16>() / 1024
        );
        Self {
            line,
            write_index: 0,
            sample_rate,
            settings,
        }
    }

    /// Process one sample. Bypassed input is returned untouched.
    #[inline]
    pub fn process(&mut self, input: i16) -> i16 {
        if !self.settings.enabled {
            return input;
        }

        let delayed = self.line[self.write_index];

        let fed_back = input as f32 + delayed as f32 * self.settings.feedback;
        self.line[self.write_index] = clamp_sample(fed_back as i32);

        self.write_index += 1;
        if self.write_index >= self.line.len() {
            self.write_index = 0;
        }

        let mix = self.settings.mix;
        clamp_sample_f32(input as f32 * (1.0 - mix) + delayed as f32 * mix)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Change the delay time, reallocating the line.
    ///
    /// This allocates; the engine instead builds the line on the control
    /// thread and hands it over with [`DelayEffect::install_line`].
    pub fn set_delay_time(&mut self, time_ms: u32) {
        let mut settings = self.settings;
        settings.set_time_ms(time_ms);
        let new_len = line_len(settings.time_ms, self.sample_rate);
        self.settings = settings;
        if new_len != self.line.len() {
            self.line = vec![0; new_len];
            self.write_index = 0;
        }
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.settings.set_feedback(feedback);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.settings.set_mix(mix);
    }

    pub fn delay_time_ms(&self) -> u32 {
        self.settings.time_ms
    }

    pub fn feedback(&self) -> f32 {
        self.settings.feedback
    }

    pub fn mix(&self) -> f32 {
        self.settings.mix
    }

    pub fn line_len(&self) -> usize {
        self.line.len()
    }

    pub fn settings(&self) -> DelaySettings {
        self.settings
    }

    /// Copy enable, feedback and mix. The delay time only changes through
    /// [`set_delay_time`](Self::set_delay_time) or [`install_line`](Self::install_line).
    pub fn apply(&mut self, settings: &DelaySettings) {
        self.settings.enabled = settings.enabled;
        self.set_feedback(settings.feedback);
        self.set_mix(settings.mix);
    }

    /// Swap in a pre-allocated line for `time_ms` and return the old one.
    ///
    /// No allocation or deallocation happens here, so the producer may call it.
    pub fn install_line(&mut self, mut line: Vec<i16>, time_ms: u32) -> Vec<i16> {
        if line.is_empty() {
            return line;
        }
        line.fill(0);
        self.settings.time_ms = time_ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS);
        self.write_index = 0;
        std::mem::replace(&mut self.line, line)
    }

    /// Clear the delay line (silence).
    pub fn reset(&mut self) {
        self.line.fill(0);
        self.write_index = 0;
    }
}
