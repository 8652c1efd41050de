//! DSP substrate for the aulos synthesizer.
//!
//! This crate holds the small, lock-free pieces the control plane
//! drives: envelope state machines, the offline envelope analyzer, a
//! sine oscillator with loudness compensation, the polyphonic voice
//! bank and the wind-noise effect bank. Everything here is plain
//! single-owner data; the concurrency discipline (registries,
//! latches, realtime handoff) lives in `aulos-core`.

pub mod error;
pub use error::{Error, Result};

mod interp;
pub use interp::Interp;

mod envelope;
pub use envelope::{
    AhdsrEnvelope, AhdsrParams, Envelope, EnvelopeState, LinearEnvelope, LinearParams,
    ReleaseAfterDecay, ReleasePolicy, WaitForKeyRelease,
};

mod analyze;
pub use analyze::{analyze, Trajectory, MAX_ANALYSIS_STEPS};

mod oscillator;
pub use oscillator::{
    loudness_compensation, midi_pitch_to_frequency, SineOscillator, A4_FREQ, A4_NOTE,
};

mod voice;
pub use voice::{VoiceBank, MAX_CHUNK_FRAMES};

mod wind;
pub use wind::{WindBank, WIND_VOICES};
