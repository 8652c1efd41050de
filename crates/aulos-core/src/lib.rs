//! Control-plane core of the aulos synthesizer.
//!
//! This crate owns the hard part of the engine: a process-wide
//! catalogue of synth instances keyed by envelope parameters, shared
//! between a non-realtime control path and the platform's realtime
//! audio callback.
//!
//! # Concurrency discipline
//!
//! - **Global lock order**: init latch → registry latch → instrument
//!   in-use latch. Every multi-lock path follows it, which rules out
//!   deadlock by construction.
//! - **Try-lock recycling**: dormant instruments are re-keyed in place
//!   without disturbing active voices ([`Synths`]).
//! - **Guarded handles**: a [`Using`] proves its instrument outlives
//!   the handle, without the realtime thread ever taking a lock.
//! - **Realtime handoff**: bounded command queues, an atomic
//!   outstanding-work counter and arc-swapped group snapshots are the
//!   only channels between the control path and the audio thread.
//!
//! # Primary API
//!
//! - [`AudioSystem`]: lifecycle controller and event façade
//! - [`Synths`] / [`Using`]: instrument registry and guarded handle
//! - [`ChannelPool`] / [`ChannelGroup`]: per-voice audio buses
//! - [`AudioDriver`] / [`CpalDriver`] / [`ManualDriver`]: platform
//!   audio abstraction

pub mod error;
pub use error::{Error, Result};

mod event;
pub use event::{EnvelopeFamily, Event, EventResult};

mod latch;

pub mod channels;
pub use channels::{ChannelGroup, ChannelPool, GroupCommand, GroupRenderer, RemovalFlag};

mod instrument;
pub use instrument::{Instrument, VOICES_PER_INSTRUMENT};

mod registry;
pub use registry::{Synths, Using};

mod driver;
pub use driver::{AudioDriver, CpalDriver, ManualDriver, RenderFn, DEFAULT_SAMPLE_RATE};

mod context;
pub use context::{AudioContext, CLOSE_FADE_FRAMES, FALLBACK_CALLBACK_FRAMES};

mod wind;
pub use wind::WindVoice;

mod lifecycle;
pub use lifecycle::AudioSystem;
