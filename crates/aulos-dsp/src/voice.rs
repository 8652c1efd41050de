//! Polyphonic voice bank.
//!
//! A [`VoiceBank`] is the render half of one instrument: a fixed set
//! of enveloped oscillator voices plus one scratch buffer per voice,
//! all allocated at construction. The audio thread owns the bank
//! exclusively; every method is RT-safe (no allocations, no locks).
//! Slot indices are chosen by the control path, which tracks slot
//! occupancy on its side and addresses voices by index.

use crate::envelope::Envelope;
use crate::oscillator::{loudness_compensation, midi_pitch_to_frequency, SineOscillator};

/// Frames rendered per inner chunk; callback blocks larger than this
/// are processed in slices so scratch buffers stay fixed-size.
pub const MAX_CHUNK_FRAMES: usize = 1024;

/// One enveloped oscillator voice.
#[derive(Debug)]
struct Voice<E: Envelope> {
    env: E,
    osc: SineOscillator,
    gain: f32,
}

impl<E: Envelope> Default for Voice<E> {
    fn default() -> Self {
        Self {
            env: E::default(),
            osc: SineOscillator::default(),
            gain: 0.0,
        }
    }
}

impl<E: Envelope> Voice<E> {
    fn start(&mut self, params: &E::Params, pitch: i16, velocity: f32, sample_rate: f32) {
        let frequency = midi_pitch_to_frequency(pitch);
        self.osc.set_frequency(frequency, sample_rate);
        self.osc.reset();
        self.gain = velocity.clamp(0.0, 1.0) * loudness_compensation(frequency);
        self.env.set_params(params);
        self.env.key_pressed();
    }

    fn release(&mut self) {
        self.env.key_released();
    }

    fn is_idle(&self) -> bool {
        self.env.is_idle()
    }

    /// Render one chunk into `out`. Returns true when the envelope
    /// reached its terminal state within this chunk.
    fn render(&mut self, out: &mut [f32]) -> bool {
        for sample in out.iter_mut() {
            if self.env.is_done() {
                *sample = 0.0;
                continue;
            }
            self.env.step();
            *sample = self.osc.next_sample() * self.env.value() * self.gain;
        }
        self.env.is_done()
    }
}

/// Fixed-size bank of voices with per-voice scratch buffers.
#[derive(Debug)]
pub struct VoiceBank<E: Envelope> {
    voices: Vec<Voice<E>>,
    scratch: Vec<Vec<f32>>,
    sample_rate: f32,
}

impl<E: Envelope> VoiceBank<E> {
    pub fn new(n_voices: usize, sample_rate: f32) -> Self {
        Self {
            voices: (0..n_voices).map(|_| Voice::default()).collect(),
            scratch: (0..n_voices).map(|_| vec![0.0; MAX_CHUNK_FRAMES]).collect(),
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Start the voice in `slot`. Out-of-range slots are ignored.
    pub fn start_voice(&mut self, slot: usize, params: &E::Params, pitch: i16, velocity: f32) {
        let sample_rate = self.sample_rate;
        if let Some(voice) = self.voices.get_mut(slot) {
            voice.start(params, pitch, velocity, sample_rate);
        }
    }

    /// Release the voice in `slot` (no-op for families that ignore
    /// note-off, and for out-of-range slots).
    pub fn release_voice(&mut self, slot: usize) {
        if let Some(voice) = self.voices.get_mut(slot) {
            voice.release();
        }
    }

    /// True when every envelope has reached idle or terminal state.
    pub fn all_voices_finished(&self) -> bool {
        self.voices.iter().all(|v| v.is_idle())
    }

    /// Render `frames` frames, mixing every live voice into the
    /// interleaved stereo buffer `out` (which must hold at least
    /// `2 * frames` samples). `on_finished` is invoked once with each
    /// slot whose envelope terminated during this call.
    pub fn render_mix(
        &mut self,
        frames: usize,
        out: &mut [f32],
        mut on_finished: impl FnMut(usize),
    ) {
        let mut offset = 0;
        while offset < frames {
            let chunk = (frames - offset).min(MAX_CHUNK_FRAMES);
            for (slot, voice) in self.voices.iter_mut().enumerate() {
                if voice.is_idle() {
                    continue;
                }
                let buf = &mut self.scratch[slot][..chunk];
                let finished = voice.render(buf);
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

    /// Drop all voice state. Used when an instrument is quiesced.
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            *voice = Voice::default();
        }
    }
}
