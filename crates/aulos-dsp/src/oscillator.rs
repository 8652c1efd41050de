//! Sine oscillator with loudness compensation.

use std::f32::consts::TAU;

/// MIDI note number of A4.
pub const A4_NOTE: i16 = 69;
/// Frequency of A4 in Hz.
pub const A4_FREQ: f32 = 440.0;

/// Convert a MIDI note number to a frequency in Hz (equal temperament).
pub fn midi_pitch_to_frequency(pitch: i16) -> f32 {
    A4_FREQ * 2.0f32.powf((pitch - A4_NOTE) as f32 / 12.0)
}

/// Amplitude compensation so notes across the keyboard read as equally
/// loud. Pure tones above the reference frequency are perceived
/// louder per unit amplitude, so their gain is rolled off.
pub fn loudness_compensation(frequency: f32) -> f32 {
    const REF_FREQ: f32 = 500.0;
    if frequency <= REF_FREQ {
        1.0
    } else {
        (REF_FREQ / frequency).powf(0.4)
    }
}

/// Phase-accumulating sine oscillator.
#[derive(Debug, Clone, Default)]
pub struct SineOscillator {
    phase: f32,
    incr: f32,
}

impl SineOscillator {
    pub fn set_frequency(&mut self, frequency: f32, sample_rate: f32) {
        self.incr = frequency / sample_rate;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Produce the next sample and advance the phase.
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let s = (self.phase * TAU).sin();
        self.phase += self.incr;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        s
    }
}
