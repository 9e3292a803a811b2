//! Chorus effect: mono modulated delay for thickening sound.
//!
//! A sine LFO sweeps the read tap of a short delay line around a fixed base
//! delay. The tap falls between samples, so reads interpolate linearly
//! between the two neighbouring entries.

use serde::{Deserialize, Serialize};

use super::oscillator::{Oscillator, Waveform};
use super::{SAMPLE_RATE, clamp_param, clamp_sample_f32};

/// Centre of the modulated delay.
pub const BASE_DELAY_MS: f32 = 10.0;

pub const MIN_RATE_HZ: f32 = 0.1;
pub const MAX_RATE_HZ: f32 = 10.0;
pub const MAX_DEPTH_MS: f32 = 50.0;

/// Longest delay the line has to hold: the base plus a full-depth swing.
pub const MAX_DELAY_MS: f32 = BASE_DELAY_MS + MAX_DEPTH_MS;
/// Extra samples beyond [`MAX_DELAY_MS`] for interpolation headroom.
const LINE_MARGIN: usize = 100;

/// Chorus parameters as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusSettings {
    pub enabled: bool,
    /// LFO rate in Hz.
    pub rate_hz: f32,
    /// Peak delay deviation from [`BASE_DELAY_MS`], in milliseconds.
    pub depth_ms: f32,
    /// Dry/wet mix (0.0 = fully dry, 1.0 = fully wet).
    pub mix: f32,
}

impl Default for ChorusSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_hz: 2.0,
            depth_ms: 7.0,
            mix: 0.4,
        }
    }
}

impl ChorusSettings {
    pub fn set_rate_hz(&mut self, rate_hz: f32) {
        self.rate_hz = clamp_param(rate_hz, MIN_RATE_HZ, MAX_RATE_HZ);
    }

    pub fn set_depth_ms(&mut self, depth_ms: f32) {
        self.depth_ms = clamp_param(depth_ms, 0.0, MAX_DEPTH_MS);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = clamp_param(mix, 0.0, 1.0);
    }

    pub fn clamped(mut self) -> Self {
        self.set_rate_hz(self.rate_hz);
        self.set_depth_ms(self.depth_ms);
        self.set_mix(self.mix);
        self
    }
}

/// A mono chorus with configurable rate, depth, and mix.
#[derive(Debug, Clone)]
pub struct ChorusEffect {
    line: Vec<i16>,
    write_index: usize,
    sample_rate: f32,
    lfo: Oscillator,
    settings: ChorusSettings,
}

impl Default for ChorusEffect {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

impl ChorusEffect {
    /// Create a disabled chorus with default parameters.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_settings(&ChorusSettings::default(), sample_rate)
    }

    pub fn with_settings(settings: &ChorusSettings, sample_rate: u32) -> Self {
        let settings = settings.clamped();
        let len = (MAX_DELAY_MS * sample_rate as f32 / 1_000.0) as usize + LINE_MARGIN;

        let mut lfo = Oscillator::new(Waveform::Sine);
        lfo.set_frequency(settings.rate_hz);

        Self {
            line: vec![0; len],
            write_index: 0,
            sample_rate: sample_rate as f32,
            lfo,
            settings,
        }
    }

    /// Read-tap delay in samples for an LFO value in [-1, 1].
    ///
    /// Never negative, and always leaves room for the interpolation neighbour.
    #[inline]
    fn tap_delay(&self, lfo: f32) -> f32 {
        let delay_ms = BASE_DELAY_MS + lfo * self.settings.depth_ms;
        let max_delay = (self.line.len() - 2) as f32;
        (delay_ms * self.sample_rate / 1_000.0).clamp(0.0, max_delay)
    }

    /// Read `delay_samples` behind the write head with linear interpolation.
    #[inline]
    fn read_interpolated(&self, delay_samples: f32) -> i16 {
        let len = self.line.len() as f32;
        let mut read_pos = self.write_index as f32 - delay_samples;
        if read_pos < 0.0 {
            read_pos += len;
        }

        let base = read_pos.floor();
        let frac = read_pos - base;
        let i0 = (base as usize).min(self.line.len() - 1);
        let i1 = if i0 + 1 >= self.line.len() { 0 } else { i0 + 1 };

        let s0 = self.line[i0] as f32;
        let s1 = self.line[i1] as f32;
        clamp_sample_f32(s0 + frac * (s1 - s0))
    }

    /// Process one sample. Bypassed input is returned untouched.
    #[inline]
    pub fn process(&mut self, input: i16) -> i16 {
        if !self.settings.enabled {
            return input;
        }

        self.line[self.write_index] = input;

        let lfo = self.lfo.next_sample_normalized(self.sample_rate);
        let delay_samples = self.tap_delay(lfo);
        let wet = self.read_interpolated(delay_samples);

        self.write_index += 1;
        if self.write_index >= self.line.len() {
            self.write_index = 0;
        }

        let mix = self.settings.mix;
        clamp_sample_f32(input as f32 * (1.0 - mix) + wet as f32 * mix)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn set_rate(&mut self, rate_hz: f32) {
        self.settings.set_rate_hz(rate_hz);
        self.lfo.set_frequency(self.settings.rate_hz);
    }

    pub fn set_depth(&mut self, depth_ms: f32) {
        self.settings.set_depth_ms(depth_ms);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.settings.set_mix(mix);
    }

    pub fn rate(&self) -> f32 {
        self.settings.rate_hz
    }

    pub fn depth(&self) -> f32 {
        self.settings.depth_ms
    }

    pub fn mix(&self) -> f32 {
        self.settings.mix
    }

    pub fn settings(&self) -> ChorusSettings {
        self.settings
    }

    pub fn apply(&mut self, settings: &ChorusSettings) {
        self.settings.enabled = settings.enabled;
        self.set_rate(settings.rate_hz);
        self.set_depth(settings.depth_ms);
        self.set_mix(settings.mix);
    }

    /// Clear the line. The LFO keeps its phase.
    pub fn reset(&mut self) {
        self.line.fill(0);
        self.write_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(rate_hz: f32, depth_ms: f32, mix: f32) -> ChorusEffect {
        let mut chorus = ChorusEffect::new(1_000);
        chorus.set_rate(rate_hz);
        chorus.set_depth(depth_ms);
        chorus.set_mix(mix);
        chorus.set_enabled(true);
        chorus
    }

    #[test]
    fn disabled_chorus_is_transparent() {
        let mut chorus = ChorusEffect::new(SAMPLE_RATE);
        for input in [0, 100, -100, i16::MAX, i16::MIN] {
            assert_eq!(chorus.process(input), input);
        }
    }

    #[test]
    fn dry_mix_passes_input() {
        let mut chorus = enabled(2.0, 7.0, 0.0);
        for input in [1_000, -2_000, 3_000] {
            assert_eq!(chorus.process(input), input);
        }
    }

    #[test]
    fn zero_depth_is_a_plain_base_delay() {
        // 10 ms at 1 kHz = 10 samples, whatever the LFO is doing
        for rate in [0.1, 2.0, 10.0] {
            let mut chorus = enabled(rate, 0.0, 1.0);
            let input: Vec<i16> = (0..200).map(|i| (i * 97 % 2_000) as i16 - 1_000).collect();
            let output: Vec<i16> = input.iter().map(|&s| chorus.process(s)).collect();

            for n in 0..10 {
                assert_eq!(output[n], 0, "rate {rate}: line starts silent");
            }
            for n in 10..input.len() {
                assert_eq!(output[n], input[n - 10], "rate {rate}, sample {n}");
            }
        }
    }

    #[test]
    fn modulation_changes_the_output() {
        let mut plain = enabled(5.0, 0.0, 1.0);
        let mut swept = enabled(5.0, 7.0, 1.0);
        let ramp: Vec<i16> = (0..500).map(|i| (i * 50) as i16).collect();

        let differs = ramp
            .iter()
            .any(|&s| plain.process(s) != swept.process(s));
        assert!(differs, "depth should move the read tap");
    }

    #[test]
    fn parameters_are_clamped() {
        let mut chorus = ChorusEffect::new(SAMPLE_RATE);
        chorus.set_rate(0.0);
        assert_eq!(chorus.rate(), MIN_RATE_HZ);
        chorus.set_rate(100.0);
        assert_eq!(chorus.rate(), MAX_RATE_HZ);
        chorus.set_depth(-1.0);
        assert_eq!(chorus.depth(), 0.0);
        chorus.set_depth(80.0);
        assert_eq!(chorus.depth(), MAX_DEPTH_MS);
        chorus.set_mix(1.5);
        assert_eq!(chorus.mix(), 1.0);
    }

    #[test]
    fn extreme_depth_stays_inside_the_line() {
        let mut chorus = ChorusEffect::new(SAMPLE_RATE);
        chorus.set_depth(MAX_DEPTH_MS);
        chorus.set_rate(MAX_RATE_HZ);
        chorus.set_enabled(true);
        for i in 0..SAMPLE_RATE {
            chorus.process((i % 3_000) as i16);
        }
    }

    #[test]
    fn reset_clears_the_line() {
        let mut chorus = enabled(2.0, 0.0, 1.0);
        for _ in 0..20 {
            chorus.process(8_000);
        }
        chorus.reset();
        for _ in 0..20 {
            assert_eq!(chorus.process(0), 0);
        }
    }

    #[test]
    fn reset_and_apply_keep_the_lfo_phase() {
        let mut chorus = enabled(2.0, 7.0, 0.5);
        for i in 0..1_000 {
            chorus.process((i % 500) as i16);
        }
        let phase = chorus.lfo.phase();
        assert!(phase > 0.0);

        chorus.reset();
        assert_eq!(chorus.lfo.phase(), phase);

        chorus.apply(&ChorusSettings {
            enabled: true,
            rate_hz: 3.0,
            depth_ms: 12.0,
            mix: 0.3,
        });
        assert_eq!(chorus.lfo.phase(), phase);
    }

    #[test]
    fn line_holds_a_full_depth_swing() {
        let mut chorus = ChorusEffect::new(SAMPLE_RATE);
        chorus.set_depth(MAX_DEPTH_MS);

        // 60 ms at 22.05 kHz
        let peak = chorus.tap_delay(1.0);
        assert!((peak - 1_323.0).abs() < 0.5, "peak delay {peak}");
        assert!(chorus.line.len() >= 1_325, "line len {}", chorus.line.len());
        assert_eq!(chorus.tap_delay(-1.0), 0.0);
    }

    #[test]
    fn max_depth_reaches_the_full_delay_at_the_lfo_peak() {
        let mut chorus = ChorusEffect::new(SAMPLE_RATE);
        chorus.set_rate(MIN_RATE_HZ);
        chorus.set_depth(MAX_DEPTH_MS);
        chorus.set_mix(1.0);
        chorus.set_enabled(true);

        // Ramp that wraps every 30 000 samples; the LFO peaks at 2.5 s.
        let ramp = |n: u32| (n % 30_000) as i16;
        let mut max_lag = 0;
        for n in 0..60_000u32 {
            let out = chorus.process(ramp(n));
            if n >= 32_000 {
                max_lag = max_lag.max(ramp(n) as i32 - out as i32);
            }
        }
        assert!((1_318..=1_328).contains(&max_lag), "delay at peak {max_lag} samples");
    }
}
