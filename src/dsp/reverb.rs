//! Reverb effect: Freeverb-style algorithmic reverb on 16-bit samples.
//!
//! Parallel comb filters followed by series allpass filters. Three noise
//! gates (input, comb filter store, output) keep quantization residue from
//! recirculating, so the tail ends in true digital silence.

use serde::{Deserialize, Serialize};

use super::{SAMPLE_RATE, clamp_param, clamp_sample, clamp_sample_f32, noise_gate};

/// Comb delays in milliseconds; mutually irrational so resonances spread out.
pub const COMB_TUNING_MS: [f32; 8] = [25.31, 26.94, 28.96, 30.75, 32.24, 33.81, 35.31, 36.66];
/// Allpass delays in milliseconds.
pub const ALLPASS_TUNING_MS: [f32; 4] = [12.61, 10.00, 7.73, 5.10];

const FIXED_GAIN: f32 = 0.015;
const SCALE_WET: f32 = 3.0;
const SCALE_DAMPING: f32 = 0.4;
const NOISE_GATE_THRESHOLD: i16 = 100;
const FILTER_STORE_GATE: f32 = 1.0;
/// Fractional bits carried through the comb feedback computation.
const PRECISION_SHIFT: u32 = 8;
const PRECISION_SCALE: i32 = 1 << PRECISION_SHIFT;

const ROOM_OFFSET: f32 = 0.28;
const ROOM_SCALE: f32 = 0.66;
/// Upper bound on comb feedback. Tunable; higher values lengthen the tail.
pub const MAX_COMB_FEEDBACK: f32 = 0.94;

fn ms_to_samples(ms: f32, sample_rate: u32) -> usize {
    ((ms * sample_rate as f32 / 1_000.0) as usize).max(1)
}

/// Feedback coefficient for a room size in [0, 1].
pub fn comb_feedback(room_size: f32) -> f32 {
    (ROOM_OFFSET + room_size * ROOM_SCALE).clamp(0.0, MAX_COMB_FEEDBACK)
}

/// A comb filter with a damped (lowpassed) feedback path.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<i16>,
    index: usize,
    filter_store: f32,
    feedback: f32,
    damp1: f32,
    damp2: f32,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0; size],
            index: 0,
            filter_store: 0.0,
            feedback: 0.5,
            damp1: 0.5,
            damp2: 0.5,
        }
    }

    #[inline]
    fn process(&mut self, input: i16) -> i16 {
        let output = self.buffer[self.index];

        // Lowpass runs at sample scale so the store stays bounded.
        self.filter_store = output as f32 * self.damp2 + self.filter_store * self.damp1;
        if self.filter_store > -FILTER_STORE_GATE && self.filter_store < FILTER_STORE_GATE {
            self.filter_store = 0.0;
        }

        // Widen, add feedback with fractional bits, narrow back.
        let input_wide = (input as i32) << PRECISION_SHIFT;
        let feedback_wide =
            (self.filter_store * self.feedback * PRECISION_SCALE as f32) as i32;
        let max = (i16::MAX as i32) << PRECISION_SHIFT;
        let min = (i16::MIN as i32) << PRECISION_SHIFT;
        let wide = (input_wide + feedback_wide).clamp(min, max);

        // Division truncates toward zero; a floor shift would leave -1 limit cycles.
        self.buffer[self.index] = (wide / PRECISION_SCALE) as i16;

        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }

        output
    }

    fn set_coefficients(&mut self, feedback: f32, damp1: f32, damp2: f32) {
        self.feedback = feedback;
        self.damp1 = damp1;
        self.damp2 = damp2;
    }

    fn is_silent(&self) -> bool {
        self.filter_store == 0.0 && self.buffer.iter().all(|&s| s == 0)
    }

    fn clear(&mut self) {
        self.buffer.fill(0);
        self.index = 0;
        self.filter_store = 0.0;
    }
}

/// A Schroeder allpass with fixed 0.5 feedback.
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<i16>,
    index: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0; size],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: i16) -> i16 {
        let buffered = self.buffer[self.index] as i32;
        let output = buffered - input as i32;

        self.buffer[self.index] = clamp_sample(input as i32 + buffered / 2);

        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }

        clamp_sample(output)
    }

    fn is_silent(&self) -> bool {
        self.buffer.iter().all(|&s| s == 0)
    }

    fn clear(&mut self) {
        self.buffer.fill(0);
        self.index = 0;
    }
}

/// Reverb parameters as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub enabled: bool,
    /// Room size (0.0 to 1.0). Affects decay time.
    pub room_size: f32,
    /// Damping (0.0 to 1.0). Higher = darker tail.
    pub damping: f32,
    /// Dry/wet mix (0.0 = fully dry, 1.0 = fully wet).
    pub mix: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            room_size: 0.5,
            damping: 0.5,
            mix: 0.3,
        }
    }
}

impl ReverbSettings {
    pub fn clamped(self) -> Self {
        Self {
            enabled: self.enabled,
            room_size: clamp_param(self.room_size, 0.0, 1.0),
            damping: clamp_param(self.damping, 0.0, 1.0),
            mix: clamp_param(self.mix, 0.0, 1.0),
        }
    }
}

/// A mono Freeverb.
#[derive(Debug, Clone)]
pub struct ReverbEffect {
    combs: [CombFilter; COMB_TUNING_MS.len()],
    allpasses: [AllpassFilter; ALLPASS_TUNING_MS.len()],
    settings: ReverbSettings,
}

impl Default for ReverbEffect {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

impl ReverbEffect {
    /// Create a disabled reverb with default room, damping and mix.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_settings(&ReverbSettings::default(), sample_rate)
    }

    pub fn with_settings(settings: &ReverbSettings, sample_rate: u32) -> Self {
        let mut reverb = Self {
            combs: COMB_TUNING_MS.map(|ms| CombFilter::new(ms_to_samples(ms, sample_rate))),
            allpasses: ALLPASS_TUNING_MS.map(|ms| AllpassFilter::new(ms_to_samples(ms, sample_rate))),
            settings: settings.clamped(),
        };
        reverb.update_combs();
        reverb
    }

    /// Recompute comb coefficients from room size and damping.
    fn update_combs(&mut self) {
        let feedback = comb_feedback(self.settings.room_size);
        let damp1 = self.settings.damping * SCALE_DAMPING;
        let damp2 = 1.0 - damp1;
        for comb in &mut self.combs {
            comb.set_coefficients(feedback, damp1, damp2);
        }
    }

    /// Process one sample. Bypassed input is returned untouched.
    #[inline]
    pub fn process(&mut self, input: i16) -> i16 {
        if !self.settings.enabled {
            return input;
        }

        let input = noise_gate(input, NOISE_GATE_THRESHOLD);
        let scaled = clamp_sample_f32(input as f32 * FIXED_GAIN);

        let comb_sum: i32 = self
            .combs
            .iter_mut()
            .map(|comb| comb.process(scaled) as i32)
            .sum();

        let mut wet = clamp_sample(comb_sum / COMB_TUNING_MS.len() as i32);
        for allpass in &mut self.allpasses {
            wet = allpass.process(wet);
        }

        let wet = wet as f32 * SCALE_WET;
        let mix = self.settings.mix;
        let output = clamp_sample_f32(input as f32 * (1.0 - mix) + wet * mix);

        noise_gate(output, NOISE_GATE_THRESHOLD)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn set_room_size(&mut self, room_size: f32) {
        self.settings.room_size = clamp_param(room_size, 0.0, 1.0);
        self.update_combs();
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.settings.damping = clamp_param(damping, 0.0, 1.0);
        self.update_combs();
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.settings.mix = clamp_param(mix, 0.0, 1.0);
    }

    pub fn room_size(&self) -> f32 {
        self.settings.room_size
    }

    pub fn damping(&self) -> f32 {
        self.settings.damping
    }

    pub fn mix(&self) -> f32 {
        self.settings.mix
    }

    pub fn settings(&self) -> ReverbSettings {
        self.settings
    }

    /// Copy every parameter, recomputing comb coefficients once.
    pub fn apply(&mut self, settings: &ReverbSettings) {
        let settings = settings.clamped();
        let coefficients_changed = settings.room_size != self.settings.room_size
            || settings.damping != self.settings.damping;
        self.settings = settings;
        if coefficients_changed {
            self.update_combs();
        }
    }

    /// True once every buffer and filter store holds exact zero.
    pub fn is_silent(&self) -> bool {
        self.combs.iter().all(CombFilter::is_silent)
            && self.allpasses.iter().all(AllpassFilter::is_silent)
    }

    /// Clear every comb and allpass buffer.
    pub fn reset(&mut self) {
        for comb in &mut self.combs {
            comb.clear();
        }
        for allpass in &mut self.allpasses {
            allpass.clear();
        }
    }
}
