//! Phase-accumulator oscillator producing signed 16-bit samples.
//!
//! The same type drives the audible voices and the chorus LFO, which is why
//! the frequency floor sits at 0.1 Hz instead of the audible 20 Hz. Sine
//! output comes from a 256-entry table in read-only memory; the other
//! shapes are closed-form ramps on the phase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SAMPLE_MAX, SAMPLE_MIN, clamp_param, clamp_sample_f32};

/// Lowest accepted frequency (LFO territory).
pub const MIN_FREQUENCY: f32 = 0.1;
/// Highest accepted frequency.
pub const MAX_FREQUENCY: f32 = 20_000.0;

pub const OCTAVE_DOWN: i32 = -1;
pub const OCTAVE_BASE: i32 = 0;
pub const OCTAVE_UP: i32 = 1;

pub const SINE_TABLE_SIZE: usize = 256;

/// One full sine cycle, `round(sin(2πi/256) × 32767)`.
static SINE_TABLE: [i16; SINE_TABLE_SIZE] = [
    0, 804, 1608, 2410, 3212, 4011, 4808, 5602,
    6393, 7179, 7962, 8739, 9512, 10278, 11039, 11793,
    12539, 13279, 14010, 14732, 15446, 16151, 16846, 17530,
    18204, 18868, 19519, 20159, 20787, 21403, 22005, 22594,
    23170, 23731, 24279, 24811, 25329, 25832, 26319, 26790,
    27245, 27683, 28105, 28510, 28898, 29268, 29621, 29956,
    30273, 30571, 30852, 31113, 31356, 31580, 31785, 31971,
    32137, 32285, 32412, 32521, 32609, 32678, 32728, 32757,
    32767, 32757, 32728, 32678, 32609, 32521, 32412, 32285,
    32137, 31971, 31785, 31580, 31356, 31113, 30852, 30571,
    30273, 29956, 29621, 29268, 28898, 28510, 28105, 27683,
    27245, 26790, 26319, 25832, 25329, 24811, 24279, 23731,
    23170, 22594, 22005, 21403, 20787, 20159, 19519, 18868,
    18204, 17530, 16846, 16151, 15446, 14732, 14010, 13279,
    12539, 11793, 11039, 10278, 9512, 8739, 7962, 7179,
    6393, 5602, 4808, 4011, 3212, 2410, 1608, 804,
    0, -804, -1608, -2410, -3212, -4011, -4808, -5602,
    -6393, -7179, -7962, -8739, -9512, -10278, -11039, -11793,
    -12539, -13279, -14010, -14732, -15446, -16151, -16846, -17530,
    -18204, -18868, -19519, -20159, -20787, -21403, -22005, -22594,
    -23170, -23731, -24279, -24811, -25329, -25832, -26319, -26790,
    -27245, -27683, -28105, -28510, -28898, -29268, -29621, -29956,
    -30273, -30571, -30852, -31113, -31356, -31580, -31785, -31971,
    -32137, -32285, -32412, -32521, -32609, -32678, -32728, -32757,
    -32767, -32757, -32728, -32678, -32609, -32521, -32412, -32285,
    -32137, -31971, -31785, -31580, -31356, -31113, -30852, -30571,
    -30273, -29956, -29621, -29268, -28898, -28510, -28105, -27683,
    -27245, -26790, -26319, -25832, -25329, -24811, -24279, -23731,
    -23170, -22594, -22005, -21403, -20787, -20159, -19519, -18868,
    -18204, -17530, -16846, -16151, -15446, -14732, -14010, -13279,
    -12539, -11793, -11039, -10278, -9512, -8739, -7962, -7179,
    -6393, -5602, -4808, -4011, -3212, -2410, -1608, -804,
];

/// Supported waveform shapes. `Off` is the silent fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Off,
    Square,
    Sine,
    Triangle,
    Saw,
}

impl Waveform {
    pub const ALL: [Waveform; 5] = [
        Waveform::Off,
        Waveform::Square,
        Waveform::Sine,
        Waveform::Triangle,
        Waveform::Saw,
    ];

    /// Lowercase name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            Waveform::Off => "off",
            Waveform::Square => "square",
            Waveform::Sine => "sine",
            Waveform::Triangle => "triangle",
            Waveform::Saw => "saw",
        }
    }

    /// Three-letter label for small status displays.
    pub fn short_name(self) -> &'static str {
        match self {
            Waveform::Off => "OFF",
            Waveform::Square => "SQR",
            Waveform::Sine => "SIN",
            Waveform::Triangle => "TRI",
            Waveform::Saw => "SAW",
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Waveform::Off),
            "square" | "sqr" => Ok(Waveform::Square),
            "sine" | "sin" => Ok(Waveform::Sine),
            "triangle" | "tri" => Ok(Waveform::Triangle),
            "saw" | "sawtooth" => Ok(Waveform::Saw),
            other => Err(format!("unknown waveform '{other}'")),
        }
    }
}

/// Clamp an octave shift to -1, 0 or +1.
#[inline]
pub fn clamp_octave(shift: i32) -> i32 {
    shift.clamp(OCTAVE_DOWN, OCTAVE_UP)
}

/// Clamp a voice volume to [0, 1].
#[inline]
pub fn clamp_volume(volume: f32) -> f32 {
    clamp_param(volume, 0.0, 1.0)
}

/// Clamp a frequency to [`MIN_FREQUENCY`, `MAX_FREQUENCY`].
#[inline]
pub fn clamp_frequency(frequency: f32) -> f32 {
    clamp_param(frequency, MIN_FREQUENCY, MAX_FREQUENCY)
}

/// Per-voice settings shared between the control plane and the producer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub waveform: Waveform,
    /// Octave shift (-1, 0, +1).
    pub octave: i32,
    /// Volume in [0, 1].
    pub volume: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Off,
            octave: OCTAVE_BASE,
            volume: 1.0,
        }
    }
}

impl VoiceSettings {
    pub fn new(waveform: Waveform, octave: i32, volume: f32) -> Self {
        Self {
            waveform,
            octave: clamp_octave(octave),
            volume: clamp_volume(volume),
        }
    }

    /// Same settings with every field forced into range.
    pub fn clamped(self) -> Self {
        Self::new(self.waveform, self.octave, self.volume)
    }
}

/// A phase-accumulator oscillator.
#[derive(Debug, Clone)]
pub struct Oscillator {
    phase: f32,
    frequency: f32,
    waveform: Waveform,
    octave_shift: i32,
    volume: f32,
}

impl Default for Oscillator {
    fn default() -> Self {
        Self::new(Waveform::Off)
    }
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Oscillator {
            phase: 0.0,
            frequency: 440.0,
            waveform,
            octave_shift: OCTAVE_BASE,
            volume: 1.0,
        }
    }

    /// Build an oscillator from voice settings.
    pub fn with_settings(settings: &VoiceSettings) -> Self {
        let mut osc = Self::new(settings.waveform);
        osc.apply(settings);
        osc
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = clamp_frequency(frequency);
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn set_octave_shift(&mut self, shift: i32) {
        let clamped = clamp_octave(shift);
        if clamped != shift {
            debug!("octave shift {shift} clamped to {clamped}");
        }
        self.octave_shift = clamped;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
    }

    /// Copy waveform, octave and volume from `settings`. Phase is kept.
    pub fn apply(&mut self, settings: &VoiceSettings) {
        self.set_waveform(settings.waveform);
        self.set_octave_shift(settings.octave);
        self.set_volume(settings.volume);
    }

    pub fn settings(&self) -> VoiceSettings {
        VoiceSettings {
            waveform: self.waveform,
            octave: self.octave_shift,
            volume: self.volume,
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn octave_shift(&self) -> i32 {
        self.octave_shift
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.waveform != Waveform::Off
    }

    /// Base frequency with the octave multiplier applied.
    #[inline]
    pub fn effective_frequency(&self) -> f32 {
        match self.octave_shift {
            OCTAVE_DOWN => self.frequency * 0.5,
            OCTAVE_UP => self.frequency * 2.0,
            _ => self.frequency,
        }
    }

    /// Generate the next sample and advance the phase.
    #[inline]
    pub fn next_sample(&mut self, sample_rate: f32) -> i16 {
        let raw = match self.waveform {
            Waveform::Off => return 0,
            Waveform::Square => {
                if self.phase < 0.5 {
                    SAMPLE_MAX
                } else {
                    SAMPLE_MIN
                }
            }
            Waveform::Sine => sine_lookup(self.phase),
            Waveform::Triangle => triangle(self.phase),
            Waveform::Saw => saw(self.phase),
        };

        self.advance(sample_rate);

        if self.volume >= 1.0 {
            raw
        } else {
            clamp_sample_f32(raw as f32 * self.volume)
        }
    }

    /// Next sample scaled to [-1, 1]; used when the oscillator is an LFO.
    #[inline]
    pub fn next_sample_normalized(&mut self, sample_rate: f32) -> f32 {
        (self.next_sample(sample_rate) as f32 / SAMPLE_MAX as f32).clamp(-1.0, 1.0)
    }

    /// Reset oscillator phase.
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    #[inline]
    fn advance(&mut self, sample_rate: f32) {
        self.phase += self.effective_frequency() / sample_rate;
        if self.phase >= 1.0 {
            self.phase = self.phase.fract();
        }
    }
}

#[inline]
fn sine_lookup(phase: f32) -> i16 {
    let index = (phase * SINE_TABLE_SIZE as f32) as usize;
    SINE_TABLE[index & (SINE_TABLE_SIZE - 1)]
}

/// Rises -1 → +1 over the first half-cycle, falls back over the second.
#[inline]
fn triangle(phase: f32) -> i16 {
    let value = if phase < 0.5 {
        4.0 * phase - 1.0
    } else {
        3.0 - 4.0 * phase
    };
    clamp_sample_f32(value * SAMPLE_MAX as f32)
}

#[inline]
fn saw(phase: f32) -> i16 {
    clamp_sample_f32((2.0 * phase - 1.0) * SAMPLE_MAX as f32)
}
