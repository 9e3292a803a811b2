//! Effects chain: delay, then chorus, then reverb.
//!
//! Each stage bypasses itself when disabled, so an all-off chain is an
//! identity on the signal.

use serde::{Deserialize, Serialize};

use super::chorus::{ChorusEffect, ChorusSettings};
use super::delay::{DelayEffect, DelaySettings};
use super::reverb::{ReverbEffect, ReverbSettings};

/// Parameters for every stage of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub delay: DelaySettings,
    pub chorus: ChorusSettings,
    pub reverb: ReverbSettings,
}

impl EffectSettings {
    pub fn clamped(self) -> Self {
        Self {
            delay: self.delay.clamped(),
            chorus: self.chorus.clamped(),
            reverb: self.reverb.clamped(),
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.delay.enabled || self.chorus.enabled || self.reverb.enabled
    }
}

#[derive(Debug, Clone)]
pub struct EffectsChain {
    delay: DelayEffect,
    chorus: ChorusEffect,
    reverb: ReverbEffect,
}

impl EffectsChain {
    /// Build every stage at `sample_rate`. Allocates all effect buffers.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_settings(&EffectSettings::default(), sample_rate)
    }

    pub fn with_settings(settings: &EffectSettings, sample_rate: u32) -> Self {
        Self {
            delay: DelayEffect::with_settings(&settings.delay, sample_rate),
            chorus: ChorusEffect::with_settings(&settings.chorus, sample_rate),
            reverb: ReverbEffect::with_settings(&settings.reverb, sample_rate),
        }
    }

    #[inline]
    pub fn process(&mut self, input: i16) -> i16 {
        let sample = self.delay.process(input);
        let sample = self.chorus.process(sample);
        self.reverb.process(sample)
    }

    pub fn delay(&self) -> &DelayEffect {
        &self.delay
    }

    pub fn delay_mut(&mut self) -> &mut DelayEffect {
        &mut self.delay
    }

    pub fn chorus(&self) -> &ChorusEffect {
        &self.chorus
    }

    pub fn chorus_mut(&mut self) -> &mut ChorusEffect {
        &mut self.chorus
    }

    pub fn reverb(&self) -> &ReverbEffect {
        &self.reverb
    }

    pub fn reverb_mut(&mut self) -> &mut ReverbEffect {
        &mut self.reverb
    }

    /// Apply parameters to every stage. Never reallocates; the delay time
    /// is left to [`DelayEffect::install_line`].
    pub fn apply(&mut self, settings: &EffectSettings) {
        self.delay.apply(&settings.delay);
        self.chorus.apply(&settings.chorus);
        self.reverb.apply(&settings.reverb);
    }

    pub fn settings(&self) -> EffectSettings {
        EffectSettings {
            delay: self.delay.settings(),
            chorus: self.chorus.settings(),
            reverb: self.reverb.settings(),
        }
    }

    /// Clear every stage's buffers so no stale tail survives a preset change.
    pub fn reset(&mut self) {
        self.delay.reset();
        self.chorus.reset();
        self.reverb.reset();
    }
}
