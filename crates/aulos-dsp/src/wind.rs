//! Wind effect voices: filtered white noise with a gate ramp.
//!
//! The wind bank backs the engine's singleton effect voice. Each note
//! is a white-noise source shaped by one or two one-pole lowpass
//! stages whose cutoff tracks the requested pitch; the `program`
//! selects the filter colour. Like [`crate::voice::VoiceBank`], the
//! bank is owned exclusively by the audio thread and is RT-safe after
//! construction.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::oscillator::midi_pitch_to_frequency;
use crate::voice::MAX_CHUNK_FRAMES;

/// Number of simultaneous wind notes.
pub const WIND_VOICES: usize = 8;

/// Filter colour programs. Unknown program numbers map to `Airy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindColor {
    /// Single lowpass stage.
    Airy,
    /// Two cascaded lowpass stages, darker.
    Dark,
    /// Filtered noise mixed with a little raw noise.
    Breathy,
}

impl WindColor {
    fn from_program(program: i32) -> Self {
        match program {
            1 => WindColor::Dark,
            2 => WindColor::Breathy,
            _ => WindColor::Airy,
        }
    }
}

/// Linear gate ramp: attack toward the target gain on start, fall to
/// zero on release.
#[derive(Debug, Clone, Copy, Default)]
struct GateRamp {
    value: f32,
    target: f32,
    step: f32,
}

impl GateRamp {
    fn open(&mut self, target: f32, samples: f32) {
        self.target = target;
        self.step = (target - self.value) / samples.max(1.0);
    }

    fn close(&mut self, samples: f32) {
        self.target = 0.0;
        self.step = -self.value / samples.max(1.0);
    }

    #[inline]
    fn next(&mut self) -> f32 {
        if self.step > 0.0 {
            self.value = (self.value + self.step).min(self.target);
        } else if self.step < 0.0 {
            self.value = (self.value + self.step).max(self.target);
        }
        self.value
    }

    fn is_silent(&self) -> bool {
        self.value == 0.0 && self.target == 0.0
    }
}

#[derive(Debug)]
struct WindNote {
    rng: SmallRng,
    color: WindColor,
    pitch: i16,
    coeff: f32,
    lp_a: f32,
    lp_b: f32,
    gate: GateRamp,
    active: bool,
    releasing: bool,
}

impl Default for WindNote {
    fn default() -> Self {
        Self {
            rng: SmallRng::seed_from_u64(0),
            color: WindColor::Airy,
            pitch: 0,
            coeff: 0.0,
            lp_a: 0.0,
            lp_b: 0.0,
            gate: GateRamp::default(),
            active: false,
            releasing: false,
        }
    }
}

impl WindNote {
    fn start(&mut self, program: i32, pitch: i16, velocity: f32, sample_rate: f32) {
        let cutoff = midi_pitch_to_frequency(pitch).min(sample_rate * 0.45);
        // One-pole coefficient for the requested cutoff.
        self.coeff = 1.0 - (-std::f32::consts::TAU * cutoff / sample_rate).exp();
        self.color = WindColor::from_program(program);
        self.pitch = pitch;
        self.lp_a = 0.0;
        self.lp_b = 0.0;
        self.rng = SmallRng::seed_from_u64(pitch as u64 ^ 0x9e37_79b9_7f4a_7c15);
        self.gate.open(velocity.clamp(0.0, 1.0), sample_rate * 0.05);
        self.active = true;
        self.releasing = false;
    }

    fn release(&mut self, sample_rate: f32) {
        if self.active && !self.releasing {
            self.releasing = true;
            self.gate.close(sample_rate * 0.1);
        }
    }

    /// Render one chunk. Returns true when the gate closed during it.
    fn render(&mut self, out: &mut [f32]) -> bool {
        for sample in out.iter_mut() {
            let white: f32 = self.rng.gen_range(-1.0..=1.0);
            self.lp_a += self.coeff * (white - self.lp_a);
            self.lp_b += self.coeff * (self.lp_a - self.lp_b);
            let shaped = match self.color {
                WindColor::Airy => self.lp_a,
                WindColor::Dark => self.lp_b,
                WindColor::Breathy => 0.8 * self.lp_a + 0.2 * white,
            };
            *sample = shaped * self.gate.next();
        }
        if self.releasing && self.gate.is_silent() {
            self.active = false;
            true
        } else {
            false
        }
    }
}

/// Bank of wind effect notes, addressed by slot index like the tonal
/// voice bank.
#[derive(Debug)]
pub struct WindBank {
    notes: Vec<WindNote>,
    scratch: Vec<f32>,
    sample_rate: f32,
}

impl WindBank {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            notes: (0..WIND_VOICES).map(|_| WindNote::default()).collect(),
            scratch: vec![0.0; MAX_CHUNK_FRAMES],
            sample_rate,
        }
    }

    pub fn start(&mut self, slot: usize, program: i32, pitch: i16, velocity: f32) {
        let sample_rate = self.sample_rate;
        if let Some(note) = self.notes.get_mut(slot) {
            note.start(program, pitch, velocity, sample_rate);
        }
    }

    pub fn release(&mut self, slot: usize) {
        let sample_rate = self.sample_rate;
        if let Some(note) = self.notes.get_mut(slot) {
            note.release(sample_rate);
        }
    }

    /// Mix `frames` frames into the interleaved stereo buffer `out`,
    /// reporting slots whose gate closed through `on_finished`.
    pub fn render_mix(
        &mut self,
        frames: usize,
        out: &mut [f32],
        mut on_finished: impl FnMut(usize),
    ) {
        let mut offset = 0;
        while offset < frames {
            let chunk = (frames - offset).min(MAX_CHUNK_FRAMES);
            for (slot, note) in self.notes.iter_mut().enumerate() {
                if !note.active {
                    continue;
                }
                let buf = &mut self.scratch[..chunk];
                let finished = note.render(buf);
                for (i, s) in buf.iter().enumerate() {
                    let frame = offset + i;
                    out[frame * 2] += s;
                    out[frame * 2 + 1] += s;
                }
                if finished {
                    on_finished(slot);
                }
            }
            offset += chunk;
        }
    }

    pub fn reset(&mut self) {
        for note in &mut self.notes {
            *note = WindNote::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wind_note_sounds_and_dies_after_release() {
        let mut bank = WindBank::new(44100.0);
        bank.start(0, 0, 60, 0.8);

        let mut out = vec![0.0; 4096 * 2];
        bank.render_mix(4096, &mut out, |_| panic!("gate must stay open"));
        assert!(out.iter().any(|&s| s != 0.0));

        bank.release(0);
        let mut finished = Vec::new();
        // 0.1 s release at 44.1 kHz fits well inside 8192 frames.
        let mut out = vec![0.0; 8192 * 2];
        bank.render_mix(8192, &mut out, |slot| finished.push(slot));
        assert_eq!(finished, vec![0]);
    }

    #[test]
    fn output_is_bounded() {
        let mut bank = WindBank::new(44100.0);
        for program in 0..3 {
            bank.start(program as usize, program, 72, 1.0);
        }
        let mut out = vec![0.0; 1024 * 2];
        bank.render_mix(1024, &mut out, |_| {});
        for s in &out {
            assert!(s.abs() <= 3.0);
        }
    }

    #[test]
    fn release_without_start_is_a_no_op() {
        let mut bank = WindBank::new(44100.0);
        bank.release(3);
        let mut out = vec![0.0; 64];
        bank.render_mix(32, &mut out, |_| panic!("nothing to finish"));
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
