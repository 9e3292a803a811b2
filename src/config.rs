//! Engine configuration.
//!
//! Everything the engine needs before `begin()`: sample rate, producer core,
//! control ranges, and the initial voice and effect settings. Loadable from
//! JSON; every field is optional and falls back to the stock instrument.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::chain::EffectSettings;
use crate::dsp::mixer::{ChannelMode, SmoothingPreset};
use crate::dsp::oscillator::{MAX_FREQUENCY, MIN_FREQUENCY, VoiceSettings, Waveform};
use crate::dsp::{BUFFER_FRAMES, SAMPLE_RATE, VOICE_COUNT, clamp_param};
use crate::error::EngineError;

// ── Defaults ────────────────────────────────────────────────

/// Bottom of the playable range (A3).
pub const DEFAULT_MIN_FREQUENCY: f32 = 220.0;
/// Top of the playable range (A5).
pub const DEFAULT_MAX_FREQUENCY: f32 = 880.0;

/// Stock voicing: a single triangle, with two quieter voices parked.
pub fn default_voicing() -> [VoiceSettings; VOICE_COUNT] {
    [
        VoiceSettings::new(Waveform::Triangle, 0, 1.0),
        VoiceSettings::new(Waveform::Off, 0, 0.6),
        VoiceSettings::new(Waveform::Off, 0, 0.5),
    ]
}

// ── Config ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Stereo frames per producer buffer.
    pub buffer_frames: usize,
    /// Core to pin the producer thread to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_core: Option<usize>,
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// Per-buffer smoothing factor for pitch (1.0 = instant).
    pub pitch_smoothing: f32,
    /// Per-buffer smoothing factor for volume (1.0 = instant).
    pub volume_smoothing: f32,
    pub channel_mode: ChannelMode,
    pub voices: [VoiceSettings; VOICE_COUNT],
    pub effects: EffectSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            buffer_frames: BUFFER_FRAMES,
            producer_core: None,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            max_frequency: DEFAULT_MAX_FREQUENCY,
            pitch_smoothing: SmoothingPreset::Normal.factor(),
            volume_smoothing: SmoothingPreset::Normal.factor(),
            channel_mode: ChannelMode::default(),
            voices: default_voicing(),
            effects: EffectSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp every field into the range the setters would accept.
    ///
    /// An inverted frequency range is swapped rather than rejected.
    pub fn normalized(mut self) -> Self {
        if self.sample_rate == 0 {
            self.sample_rate = SAMPLE_RATE;
        }
        if self.buffer_frames == 0 {
            self.buffer_frames = BUFFER_FRAMES;
        }
        let lo = clamp_param(self.min_frequency, MIN_FREQUENCY, MAX_FREQUENCY);
        let hi = clamp_param(self.max_frequency, MIN_FREQUENCY, MAX_FREQUENCY);
        (self.min_frequency, self.max_frequency) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.pitch_smoothing = clamp_param(self.pitch_smoothing, 0.0, 1.0);
        self.volume_smoothing = clamp_param(self.volume_smoothing, 0.0, 1.0);
        self.voices = self.voices.map(VoiceSettings::clamped);
        self.effects = self.effects.clamped();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_the_stock_instrument() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 22_050);
        assert_eq!(config.buffer_frames, 256);
        assert_eq!(config.min_frequency, 220.0);
        assert_eq!(config.max_frequency, 880.0);
        assert_eq!(config.voices[0].waveform, Waveform::Triangle);
        assert_eq!(config.voices[1].volume, 0.6);
        assert_eq!(config.voices[2].volume, 0.5);
        assert!(!config.effects.any_enabled());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "channel_mode": "left_only",
                "voices": [
                    { "waveform": "sine" },
                    { "waveform": "square", "octave": -1, "volume": 0.25 },
                    {}
                ],
                "effects": { "reverb": { "enabled": true, "room_size": 0.9 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.channel_mode, ChannelMode::LeftOnly);
        assert_eq!(config.voices[0].waveform, Waveform::Sine);
        assert_eq!(config.voices[0].volume, 1.0);
        assert_eq!(config.voices[1].octave, -1);
        assert_eq!(config.voices[2].waveform, Waveform::Off);
        assert!(config.effects.reverb.enabled);
        assert_eq!(config.effects.reverb.room_size, 0.9);
        assert_eq!(config.effects.reverb.mix, 0.3);
        assert_eq!(config.sample_rate, 22_050);
    }

    #[test]
    fn normalization_clamps_out_of_range_values() {
        let config = EngineConfig::from_json_str(
            r#"{
                "min_frequency": 900,
                "max_frequency": 100,
                "pitch_smoothing": 4.0,
                "voices": [ { "octave": 5, "volume": 2.5 }, {}, {} ],
                "effects": { "delay": { "time_ms": 1, "feedback": 3.0 } }
            }"#,
        )
        .unwrap();
        assert_eq!((config.min_frequency, config.max_frequency), (100.0, 900.0));
        assert_eq!(config.pitch_smoothing, 1.0);
        assert_eq!(config.voices[0].octave, 1);
        assert_eq!(config.voices[0].volume, 1.0);
        assert_eq!(config.effects.delay.time_ms, 10);
        assert_eq!(config.effects.delay.feedback, 0.95);
    }

    #[test]
    fn load_reads_from_disk_and_round_trips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut original = EngineConfig::default();
        original.producer_core = Some(1);
        original.effects.chorus.enabled = true;
        file.write_all(original.to_json().unwrap().as_bytes()).unwrap();

        let loaded = EngineConfig::load(file.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn bad_json_is_a_config_error() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::load("/nonexistent/theremin.json").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
