//! # aulos: polyphonic synthesizer control plane
//!
//! Umbrella crate that coordinates:
//! - **aulos-core**: instrument registry, guarded handles, channel
//!   pool, lifecycle controller, platform audio drivers
//! - **aulos-dsp**: envelope state machines, offline envelope
//!   analysis, oscillator and voice banks
//!
//! The control surface is small and imperative: initialize the
//! output, send note and effect events, analyze envelopes offline,
//! tear the output down. A separate realtime callback, owned by the
//! platform audio subsystem, pulls mixed samples from the channel
//! pool without ever taking a lock.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use aulos::{AudioSystem, CpalDriver};
//!
//! let system = AudioSystem::new(Arc::new(CpalDriver::default()));
//! if system.initialize_output(0.0, 0) {
//!     system.midi_note_on(100, 60, 0.8);
//!     system.midi_note_off(100, 60);
//! }
//! system.teardown_output();
//! ```
//!
//! A process-wide instance behind the same API is exported through
//! the C ABI in [`ffi`], matching the embedding contract of the
//! original engine.

pub use aulos_core as core;
pub use aulos_dsp as dsp;

pub use aulos_core::{
    AudioContext, AudioDriver, AudioSystem, ChannelGroup, ChannelPool, CpalDriver, EnvelopeFamily,
    Error, Event, EventResult, ManualDriver, RemovalFlag, Result, Synths, Using, WindVoice,
    CLOSE_FADE_FRAMES, VOICES_PER_INSTRUMENT,
};

pub use aulos_dsp::{
    analyze, AhdsrEnvelope, AhdsrParams, Envelope, Interp, LinearEnvelope, LinearParams,
    ReleaseAfterDecay, Trajectory, WaitForKeyRelease,
};

pub mod ffi;

use std::sync::{Arc, LazyLock};

/// The process-wide system behind the foreign ABI. Constructed on
/// first use with the default cpal driver.
static SYSTEM: LazyLock<AudioSystem> =
    LazyLock::new(|| AudioSystem::new(Arc::new(CpalDriver::default())));

/// The process-wide [`AudioSystem`] used by the foreign ABI.
pub fn global() -> &'static AudioSystem {
    &SYSTEM
}

/// Analyze an AHDSR parameter set against the family selected by
/// `family`, without touching the registries.
pub fn analyze_ahdsr(family: EnvelopeFamily, params: &AhdsrParams) -> aulos_dsp::Result<Trajectory> {
    match family {
        EnvelopeFamily::WaitForKeyRelease => {
            analyze::<AhdsrEnvelope<WaitForKeyRelease>>(params)
        }
        EnvelopeFamily::ReleaseAfterDecay => {
            analyze::<AhdsrEnvelope<ReleaseAfterDecay>>(params)
        }
    }
}
