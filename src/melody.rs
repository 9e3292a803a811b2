//! Melody playback and the audible self-test.
//!
//! Both drive the engine purely through its public control API from the
//! calling thread, sleeping between steps; the producer keeps rendering as
//! usual.

use std::thread;
use std::time::Duration;

use tracing::info;

use crate::dsp::VOICE_COUNT;
use crate::dsp::engine::AudioEngine;
use crate::dsp::oscillator::{OCTAVE_BASE, OCTAVE_DOWN, OCTAVE_UP, Waveform};

// ── Notes (Hz, rounded) ─────────────────────────────────────

pub const REST: u32 = 0;

pub const NOTE_C4: u32 = 262;
pub const NOTE_CS4: u32 = 277;
pub const NOTE_D4: u32 = 294;
pub const NOTE_DS4: u32 = 311;
pub const NOTE_E4: u32 = 330;
pub const NOTE_F4: u32 = 349;
pub const NOTE_FS4: u32 = 370;
pub const NOTE_G4: u32 = 392;
pub const NOTE_GS4: u32 = 415;
pub const NOTE_A4: u32 = 440;
pub const NOTE_AS4: u32 = 466;
pub const NOTE_B4: u32 = 494;

pub const NOTE_C5: u32 = 523;
pub const NOTE_CS5: u32 = 554;
pub const NOTE_D5: u32 = 587;
pub const NOTE_DS5: u32 = 622;
pub const NOTE_E5: u32 = 659;
pub const NOTE_F5: u32 = 698;
pub const NOTE_FS5: u32 = 740;
pub const NOTE_G5: u32 = 784;
pub const NOTE_GS5: u32 = 831;
pub const NOTE_A5: u32 = 880;
pub const NOTE_AS5: u32 = 932;
pub const NOTE_B5: u32 = 988;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MelodyNote {
    /// Pitch in Hz; [`REST`] is silence.
    pub frequency: u32,
    pub duration_ms: u32,
}

impl MelodyNote {
    pub const fn new(frequency: u32, duration_ms: u32) -> Self {
        Self { frequency, duration_ms }
    }

    pub const fn rest(duration_ms: u32) -> Self {
        Self::new(REST, duration_ms)
    }

    pub fn is_rest(&self) -> bool {
        self.frequency == REST
    }
}

/// Victory fanfare played at startup.
pub const STARTUP_FANFARE: [MelodyNote; 10] = [
    MelodyNote::new(NOTE_C5, 150),
    MelodyNote::new(NOTE_C5, 150),
    MelodyNote::new(NOTE_C5, 150),
    MelodyNote::new(NOTE_C5, 450),
    MelodyNote::new(NOTE_GS4, 450),
    MelodyNote::new(NOTE_AS4, 450),
    MelodyNote::new(NOTE_C5, 150),
    MelodyNote::rest(150),
    MelodyNote::new(NOTE_AS4, 150),
    MelodyNote::new(NOTE_C5, 600),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MelodyOptions {
    /// Voice (1..=3) that carries the melody; the others are muted.
    pub voice: usize,
    pub waveform: Waveform,
    /// Fraction of each note that sounds (1.0 legato, 0.5 very short).
    pub staccato: f32,
    /// Amplitude in percent while a note sounds.
    pub amplitude: f32,
    /// Multiplies every duration; 1.0 is real time.
    pub tempo_scale: f32,
}

impl Default for MelodyOptions {
    fn default() -> Self {
        Self {
            voice: 1,
            waveform: Waveform::Square,
            staccato: 0.8,
            amplitude: 40.0,
            tempo_scale: 1.0,
        }
    }
}

fn scaled(ms: u32, scale: f32) -> Duration {
    Duration::try_from_secs_f32(ms as f32 * scale / 1_000.0).unwrap_or(Duration::ZERO)
}

/// Play `notes` on one voice, then restore the previous pitch and waveforms.
///
/// Amplitude is left at 0 afterwards.
pub fn play_melody(engine: &AudioEngine, notes: &[MelodyNote], options: &MelodyOptions) {
    info!("playing melody ({} notes)", notes.len());

    let saved_frequency = engine.frequency();
    let saved_waveforms: Vec<Option<Waveform>> =
        (1..=VOICE_COUNT).map(|v| engine.voice_waveform(v)).collect();

    engine.set_amplitude(options.amplitude);
    for voice in 1..=VOICE_COUNT {
        if voice == options.voice {
            engine.set_voice_waveform(voice, options.waveform);
            engine.set_voice_volume(voice, 1.0);
        } else {
            engine.set_voice_waveform(voice, Waveform::Off);
        }
    }

    let staccato = options.staccato.clamp(0.0, 1.0);
    for note in notes {
        if note.is_rest() {
            engine.set_amplitude(0.0);
            thread::sleep(scaled(note.duration_ms, options.tempo_scale));
            continue;
        }

        engine.set_frequency(note.frequency as f32);
        engine.set_amplitude(options.amplitude);

        let sound_ms = (note.duration_ms as f32 * staccato) as u32;
        let gap_ms = note.duration_ms - sound_ms;
        thread::sleep(scaled(sound_ms, options.tempo_scale));
        if gap_ms > 0 {
            engine.set_amplitude(0.0);
            thread::sleep(scaled(gap_ms, options.tempo_scale));
        }
    }

    engine.set_frequency(saved_frequency);
    engine.set_amplitude(0.0);
    for (voice, waveform) in (1..=VOICE_COUNT).zip(saved_waveforms) {
        if let Some(waveform) = waveform {
            engine.set_voice_waveform(voice, waveform);
        }
    }
    info!("melody complete");
}

pub fn play_startup_sound(engine: &AudioEngine) {
    play_melody(engine, &STARTUP_FANFARE, &MelodyOptions::default());
}

/// Audible walk through waveforms, octave shifts and voice volume.
///
/// `step` is the length of one tone; gaps are half of it. Ends silent with
/// the default voicing restored.
pub fn system_test(engine: &AudioEngine, step: Duration) {
    const TEST_AMPLITUDE: f32 = 40.0;
    let gap = step / 2;
    let blip = step / 5;

    info!("system test: default settings");
    engine.set_frequency(NOTE_A4 as f32);
    engine.set_voice_waveform(2, Waveform::Off);
    engine.set_voice_waveform(3, Waveform::Off);
    engine.set_default_settings();
    engine.set_amplitude(TEST_AMPLITUDE);
    thread::sleep(step);

    info!("system test: waveforms");
    for waveform in [Waveform::Triangle, Waveform::Saw, Waveform::Square, Waveform::Sine] {
        engine.set_amplitude(0.0);
        thread::sleep(gap);
        engine.set_amplitude(TEST_AMPLITUDE);
        engine.set_voice_waveform(1, waveform);
        thread::sleep(step);
    }

    info!("system test: octave shifts");
    engine.set_voice_octave(1, OCTAVE_UP);
    thread::sleep(step);
    engine.set_voice_octave(1, OCTAVE_DOWN);
    thread::sleep(step);

    info!("system test: voice volume");
    engine.set_voice_octave(1, OCTAVE_BASE);
    for tenth in 0..=10 {
        engine.set_voice_volume(1, tenth as f32 / 10.0);
        thread::sleep(blip);
    }

    engine.set_amplitude(0.0);
    engine.set_default_settings();
    info!("system test complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> MelodyOptions {
        MelodyOptions {
            tempo_scale: 0.01,
            ..MelodyOptions::default()
        }
    }

    #[test]
    fn scaled_durations_never_panic() {
        assert_eq!(scaled(1_000, 1.0), Duration::from_secs(1));
        assert_eq!(scaled(500, 0.5), Duration::from_millis(250));
        assert_eq!(scaled(200, -1.0), Duration::ZERO);
        assert_eq!(scaled(200, f32::NAN), Duration::ZERO);
        assert_eq!(scaled(200, f32::INFINITY), Duration::ZERO);
        assert_eq!(scaled(u32::MAX, f32::MAX), Duration::ZERO);
    }

    #[test]
    fn fanfare_matches_its_score() {
        let pitches: Vec<u32> = STARTUP_FANFARE.iter().map(|n| n.frequency).collect();
        assert_eq!(
            pitches,
            [NOTE_C5, NOTE_C5, NOTE_C5, NOTE_C5, NOTE_GS4, NOTE_AS4, NOTE_C5, REST, NOTE_AS4, NOTE_C5]
        );
        let total: u32 = STARTUP_FANFARE.iter().map(|n| n.duration_ms).sum();
        assert_eq!(total, 3_000);
        assert!(STARTUP_FANFARE[7].is_rest());
    }

    #[test]
    fn melody_restores_previous_state() {
        let engine = AudioEngine::default();
        engine.set_frequency(300.0);
        engine.set_amplitude(70.0);
        engine.set_voice_waveform(2, Waveform::Saw);

        play_melody(&engine, &STARTUP_FANFARE, &fast());

        assert_eq!(engine.frequency(), 300.0);
        assert_eq!(engine.amplitude(), 0.0);
        assert_eq!(engine.voice_waveform(1), Some(Waveform::Triangle));
        assert_eq!(engine.voice_waveform(2), Some(Waveform::Saw));
        assert_eq!(engine.voice_waveform(3), Some(Waveform::Off));
        // The melody voice was raised to full volume.
        assert_eq!(engine.voice_volume(1), Some(1.0));
    }

    #[test]
    fn legato_note_leaves_amplitude_up_until_the_end() {
        let engine = AudioEngine::default();
        let options = MelodyOptions {
            staccato: 1.0,
            voice: 2,
            waveform: Waveform::Sine,
            ..fast()
        };
        play_melody(&engine, &[MelodyNote::new(NOTE_A4, 10)], &options);
        assert_eq!(engine.amplitude(), 0.0);
        assert_eq!(engine.voice_waveform(2), Some(Waveform::Off));
    }

    #[test]
    fn system_test_ends_silent_with_stock_voicing() {
        let engine = AudioEngine::default();
        system_test(&engine, Duration::from_millis(1));
        assert_eq!(engine.amplitude(), 0.0);
        assert_eq!(engine.voice_waveform(1), Some(Waveform::Triangle));
        assert_eq!(engine.voice_octave(1), Some(0));
        assert_eq!(engine.frequency(), 440.0);
    }
}
