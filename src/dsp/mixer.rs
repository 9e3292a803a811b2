//! Mixer: averages the active voices, smooths control targets, and routes
//! the mono result onto the stereo sink layout.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::oscillator::Oscillator;
use super::{clamp_param, clamp_sample_f32};

/// Master output gate; catches quantization residue stacked up by the effects.
pub const MASTER_NOISE_GATE_THRESHOLD: i16 = 150;

/// Sum every active voice and divide by the active count.
///
/// The result never exceeds a single voice's range no matter how many voices
/// are on, so nothing downstream ever has to hard-clip the mix.
#[inline]
pub fn mix_voices(voices: &mut [Oscillator], sample_rate: f32) -> i16 {
    let mut sum: i32 = 0;
    let mut active: i32 = 0;

    for voice in voices.iter_mut().filter(|v| v.is_active()) {
        sum += voice.next_sample(sample_rate) as i32;
        active += 1;
    }

    if active == 0 { 0 } else { (sum / active) as i16 }
}

/// Scale a sample by a linear gain in [0, 1].
#[inline]
pub fn apply_gain(sample: i16, gain: f32) -> i16 {
    clamp_sample_f32(sample as f32 * gain)
}

/// One-pole exponential smoother, stepped once per audio buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSmoother {
    value: f32,
    factor: f32,
}

impl ParameterSmoother {
    pub fn new(initial: f32, factor: f32) -> Self {
        Self {
            value: initial,
            factor: clamp_param(factor, 0.0, 1.0),
        }
    }

    /// Move toward `target` by `factor` of the remaining distance.
    #[inline]
    pub fn step(&mut self, target: f32) -> f32 {
        self.value += (target - self.value) * self.factor;
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn set_factor(&mut self, factor: f32) {
        self.factor = clamp_param(factor, 0.0, 1.0);
    }

    /// Force the current value into `[min, max]`.
    pub fn clamp_to(&mut self, min: f32, max: f32) {
        self.value = self.value.clamp(min, max);
    }
}

/// Named smoothing strengths for the buffer-rate smoothers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingPreset {
    /// Follow the target immediately.
    None,
    /// Balanced response (the default).
    Normal,
    /// Heavy smoothing; slow glides.
    Extra,
}

impl SmoothingPreset {
    pub fn factor(self) -> f32 {
        match self {
            SmoothingPreset::None => 1.0,
            SmoothingPreset::Normal => 0.80,
            SmoothingPreset::Extra => 0.50,
        }
    }
}

/// How the mono signal is placed onto the stereo sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Duplicate onto both channels.
    #[default]
    StereoBoth,
    /// Left carries the signal, right is muted.
    LeftOnly,
    /// Right carries the signal, left is muted.
    RightOnly,
}

impl ChannelMode {
    /// Interleaved `[left, right]` frame for `sample`.
    #[inline]
    pub fn route(self, sample: i16) -> [i16; 2] {
        match self {
            ChannelMode::StereoBoth => [sample, sample],
            ChannelMode::LeftOnly => [sample, 0],
            ChannelMode::RightOnly => [0, sample],
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelMode::StereoBoth => "stereo (L+R)",
            ChannelMode::LeftOnly => "left only",
            ChannelMode::RightOnly => "right only",
        })
    }
}
