//! DSP core: oscillators, effects, and the real-time buffer producer.
//!
//! Everything here works on signed 16-bit samples at a fixed sample rate.
//! The producer thread owns all DSP state; the control plane only ever
//! touches parameter values through [`engine::AudioEngine`].

pub mod chain;
pub mod chorus;
pub mod delay;
pub mod engine;
pub mod mixer;
pub mod monitor;
pub mod oscillator;
pub mod renderer;
pub mod reverb;

/// System sample rate in Hz.
pub const SAMPLE_RATE: u32 = 22_050;

/// Stereo frames per producer buffer (≈11.6 ms at [`SAMPLE_RATE`]).
pub const BUFFER_FRAMES: usize = 256;

/// Output channels delivered to the sink (interleaved L/R).
pub const CHANNELS: u16 = 2;

/// Number of oscillator voices in the mix.
pub const VOICE_COUNT: usize = 3;

pub const SAMPLE_MIN: i16 = i16::MIN;
pub const SAMPLE_MAX: i16 = i16::MAX;

/// Saturate a wide intermediate to the 16-bit sample range.
#[inline]
pub fn clamp_sample(value: i32) -> i16 {
    value.clamp(SAMPLE_MIN as i32, SAMPLE_MAX as i32) as i16
}

/// Saturate a float intermediate to the 16-bit sample range (truncating).
#[inline]
pub fn clamp_sample_f32(value: f32) -> i16 {
    // `as` saturates and maps NaN to 0.
    value as i16
}

/// Clamp a control parameter, treating NaN as the lower bound.
#[inline]
pub fn clamp_param(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Zero any sample whose magnitude is below `threshold`.
#[inline]
pub fn noise_gate(sample: i16, threshold: i16) -> i16 {
    if sample > -threshold && sample < threshold {
        0
    } else {
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_sample_saturates() {
        assert_eq!(clamp_sample(40_000), SAMPLE_MAX);
        assert_eq!(clamp_sample(-40_000), SAMPLE_MIN);
        assert_eq!(clamp_sample(123), 123);
    }

    #[test]
    fn clamp_param_handles_nan() {
        assert_eq!(clamp_param(f32::NAN, 0.0, 1.0), 0.0);
        assert_eq!(clamp_param(2.5, 0.0, 1.0), 1.0);
        assert_eq!(clamp_param(-0.5, 0.0, 1.0), 0.0);
    }

    #[test]
    fn noise_gate_is_symmetric() {
        assert_eq!(noise_gate(99, 100), 0);
        assert_eq!(noise_gate(-99, 100), 0);
        assert_eq!(noise_gate(100, 100), 100);
        assert_eq!(noise_gate(-100, 100), -100);
    }
}
