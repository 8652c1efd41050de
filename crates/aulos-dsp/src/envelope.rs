//! Envelope state machines.
//!
//! Two envelope shapes drive every voice in the engine:
//!
//! - [`AhdsrEnvelope`]: Attack, Hold, Decay, Sustain, Release, with a
//!   per-segment interpolation curve and a release policy chosen at
//!   the type level ([`WaitForKeyRelease`] holds the sustain level
//!   until the key is released; [`ReleaseAfterDecay`] skips sustain
//!   entirely and fades out on its own).
//! - [`LinearEnvelope`]: a one-knob shape that rises to full level
//!   over a characteristic time, sustains, and falls back over the
//!   same time on key release.
//!
//! All segment times are sample counts. Zero-length segments are
//! skipped at phase entry, so an envelope whose times are all zero
//! reaches sustain on the key press and the terminal state on the key
//! release. The state machines are plain single-threaded values; the
//! engine gives each one exclusively to either the offline analyzer or
//! one realtime voice.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use crate::interp::Interp;

/// Phase of an envelope state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Constructed, no key pressed yet.
    Idle,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    /// Terminal. The voice carrying this envelope is reclaimable.
    Done,
}

/// An envelope shape a voice can be driven by.
///
/// `step()` advances one sample and `value()` reads the level after
/// the most recent step. Parameters are totally ordered so they can
/// key the per-family instrument registries.
pub trait Envelope: Default + Send + Sync + 'static {
    /// Value-typed parameter set, usable as an ordered map key.
    type Params: Copy + Ord + Eq + Send + Sync + fmt::Debug + 'static;

    /// Whether `key_released()` has any effect. Families that release
    /// on their own ignore note-off events entirely.
    const HONORS_NOTE_OFF: bool;

    fn set_params(&mut self, params: &Self::Params);
    fn key_pressed(&mut self);
    fn key_released(&mut self);

    /// Advance the envelope by one sample.
    fn step(&mut self);

    /// Level after the most recent `step()`, in [0, 1].
    fn value(&self) -> f32;

    fn state(&self) -> EnvelopeState;

    /// True while the envelope is between the key press and the point
    /// where only a key release (or, for self-releasing families, the
    /// terminal state) lies ahead. The analyzer uses the falling edge
    /// of this predicate to locate the attack→sustain split.
    fn after_attack_before_sustain(&self) -> bool;

    fn is_done(&self) -> bool {
        self.state() == EnvelopeState::Done
    }

    /// True when the envelope can be (re)started without stealing.
    fn is_idle(&self) -> bool {
        matches!(self.state(), EnvelopeState::Idle | EnvelopeState::Done)
    }
}

/// AHDSR parameter set.
///
/// Times are sample counts and clamp to ≥ 0 at construction; the
/// sustain level clamps to [0, 1]. The ordering is lexicographic over
/// all fields (sustain via `f32::total_cmp`) so the struct can key a
/// `BTreeMap`.
#[derive(Debug, Clone, Copy)]
pub struct AhdsrParams {
    pub attack: i32,
    pub attack_interp: Interp,
    pub hold: i32,
    pub decay: i32,
    pub decay_interp: Interp,
    pub sustain: f32,
    pub release: i32,
    pub release_interp: Interp,
}

impl AhdsrParams {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        attack: i32,
        attack_interp: Interp,
        hold: i32,
        decay: i32,
        decay_interp: Interp,
        sustain: f32,
        release: i32,
        release_interp: Interp,
    ) -> Self {
        Self {
            attack: attack.max(0),
            attack_interp,
            hold: hold.max(0),
            decay: decay.max(0),
            decay_interp,
            sustain: if sustain.is_finite() {
                sustain.clamp(0.0, 1.0)
            } else {
                0.0
            },
            release: release.max(0),
            release_interp,
        }
    }
}

impl PartialEq for AhdsrParams {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AhdsrParams {}

impl PartialOrd for AhdsrParams {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AhdsrParams {
    fn cmp(&self, other: &Self) -> Ordering {
        self.attack
            .cmp(&other.attack)
            .then(self.attack_interp.cmp(&other.attack_interp))
            .then(self.hold.cmp(&other.hold))
            .then(self.decay.cmp(&other.decay))
            .then(self.decay_interp.cmp(&other.decay_interp))
            .then(self.sustain.total_cmp(&other.sustain))
            .then(self.release.cmp(&other.release))
            .then(self.release_interp.cmp(&other.release_interp))
    }
}

impl Default for AhdsrParams {
    fn default() -> Self {
        Self::new(0, Interp::Linear, 0, 0, Interp::Linear, 1.0, 0, Interp::Linear)
    }
}

/// Release policy marker for [`AhdsrEnvelope`].
pub trait ReleasePolicy: Send + Sync + 'static {
    /// Whether the envelope waits in sustain for a key release.
    const HONORS_NOTE_OFF: bool;
}

/// After decay the envelope holds the sustain level until the key is
/// released.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForKeyRelease;

impl ReleasePolicy for WaitForKeyRelease {
    const HONORS_NOTE_OFF: bool = true;
}

/// After decay the envelope releases immediately; note-off events are
/// ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseAfterDecay;

impl ReleasePolicy for ReleaseAfterDecay {
    const HONORS_NOTE_OFF: bool = false;
}

/// AHDSR envelope state machine.
#[derive(Debug)]
pub struct AhdsrEnvelope<R: ReleasePolicy> {
    params: AhdsrParams,
    state: EnvelopeState,
    pos: i32,
    value: f32,
    release_from: f32,
    _release: PhantomData<R>,
}

impl<R: ReleasePolicy> Default for AhdsrEnvelope<R> {
    fn default() -> Self {
        Self {
            params: AhdsrParams::default(),
            state: EnvelopeState::Idle,
            pos: 0,
            value: 0.0,
            release_from: 0.0,
            _release: PhantomData,
        }
    }
}

impl<R: ReleasePolicy> AhdsrEnvelope<R> {
    /// Enter a phase, skipping zero-length ones. The recursion depth
    /// is bounded by the number of phases.
    fn enter(&mut self, state: EnvelopeState) {
        self.pos = 0;
        self.state = state;
        match state {
            EnvelopeState::Idle => self.value = 0.0,
            EnvelopeState::Attack => {
                if self.params.attack == 0 {
                    self.enter(EnvelopeState::Hold);
                } else {
                    self.value = 0.0;
                }
            }
            EnvelopeState::Hold => {
                self.value = 1.0;
                if self.params.hold == 0 {
                    self.enter(EnvelopeState::Decay);
                }
            }
            EnvelopeState::Decay => {
                if self.params.decay == 0 {
                    self.value = self.params.sustain;
                    self.after_decay();
                }
            }
            EnvelopeState::Sustain => self.value = self.params.sustain,
            EnvelopeState::Release => {
                self.release_from = self.value;
                if self.params.release == 0 {
                    self.enter(EnvelopeState::Done);
                }
            }
            EnvelopeState::Done => self.value = 0.0,
        }
    }

    fn after_decay(&mut self) {
        if R::HONORS_NOTE_OFF {
            self.enter(EnvelopeState::Sustain);
        } else {
            self.enter(EnvelopeState::Release);
        }
    }
}

impl<R: ReleasePolicy> Envelope for AhdsrEnvelope<R> {
    type Params = AhdsrParams;

    const HONORS_NOTE_OFF: bool = R::HONORS_NOTE_OFF;

    fn set_params(&mut self, params: &AhdsrParams) {
        self.params = *params;
    }

    fn key_pressed(&mut self) {
        self.enter(EnvelopeState::Attack);
    }

    fn key_released(&mut self) {
        if !R::HONORS_NOTE_OFF {
            return;
        }
        if matches!(
            self.state,
            EnvelopeState::Attack
                | EnvelopeState::Hold
                | EnvelopeState::Decay
                | EnvelopeState::Sustain
        ) {
            self.enter(EnvelopeState::Release);
        }
    }

    fn step(&mut self) {
        match self.state {
            EnvelopeState::Idle | EnvelopeState::Done | EnvelopeState::Sustain => {}
            EnvelopeState::Attack => {
                self.pos += 1;
                let t = self.pos as f32 / self.params.attack as f32;
                self.value = self.params.attack_interp.apply(t);
                if self.pos >= self.params.attack {
                    self.enter(EnvelopeState::Hold);
                }
            }
            EnvelopeState::Hold => {
                self.pos += 1;
                if self.pos >= self.params.hold {
                    self.enter(EnvelopeState::Decay);
                }
            }
            EnvelopeState::Decay => {
                self.pos += 1;
                let t = self.pos as f32 / self.params.decay as f32;
                let shaped = self.params.decay_interp.apply(t);
                self.value = 1.0 + (self.params.sustain - 1.0) * shaped;
                if self.pos >= self.params.decay {
                    self.value = self.params.sustain;
                    self.after_decay();
                }
            }
            EnvelopeState::Release => {
                self.pos += 1;
                let t = self.pos as f32 / self.params.release as f32;
                self.value = self.release_from * (1.0 - self.params.release_interp.apply(t));
                if self.pos >= self.params.release {
                    self.enter(EnvelopeState::Done);
                }
            }
        }
    }

    fn value(&self) -> f32 {
        self.value
    }

    fn state(&self) -> EnvelopeState {
        self.state
    }

    fn after_attack_before_sustain(&self) -> bool {
        match self.state {
            EnvelopeState::Attack | EnvelopeState::Hold | EnvelopeState::Decay => true,
            // A self-releasing envelope has no sustain phase; its
            // release tail still belongs to the pressed-key span.
            EnvelopeState::Release => !R::HONORS_NOTE_OFF,
            _ => false,
        }
    }
}

/// Parameter set for [`LinearEnvelope`]: a single characteristic time
/// in samples, clamped to ≥ 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinearParams {
    pub charac_time: i32,
}

impl LinearParams {
    pub fn new(charac_time: i32) -> Self {
        Self {
            charac_time: charac_time.max(1),
        }
    }
}

impl Default for LinearParams {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Linear rise / sustain / linear fall envelope.
#[derive(Debug, Default)]
pub struct LinearEnvelope {
    params: LinearParams,
    state: EnvelopeStateLinear,
    pos: i32,
    value: f32,
    release_from: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum EnvelopeStateLinear {
    #[default]
    Idle,
    Attack,
    Sustain,
    Release,
    Done,
}

impl Envelope for LinearEnvelope {
    type Params = LinearParams;

    const HONORS_NOTE_OFF: bool = true;

    fn set_params(&mut self, params: &LinearParams) {
        self.params = *params;
    }

    fn key_pressed(&mut self) {
        self.state = EnvelopeStateLinear::Attack;
        self.pos = 0;
        self.value = 0.0;
    }

    fn key_released(&mut self) {
        if matches!(
            self.state,
            EnvelopeStateLinear::Attack | EnvelopeStateLinear::Sustain
        ) {
            self.release_from = self.value;
            self.state = EnvelopeStateLinear::Release;
            self.pos = 0;
        }
    }

    fn step(&mut self) {
        let t_total = self.params.charac_time;
        match self.state {
            EnvelopeStateLinear::Idle
            | EnvelopeStateLinear::Done
            | EnvelopeStateLinear::Sustain => {}
            EnvelopeStateLinear::Attack => {
                self.pos += 1;
                self.value = self.pos as f32 / t_total as f32;
                if self.pos >= t_total {
                    self.value = 1.0;
                    self.state = EnvelopeStateLinear::Sustain;
                }
            }
            EnvelopeStateLinear::Release => {
                self.pos += 1;
                let t = self.pos as f32 / t_total as f32;
                self.value = self.release_from * (1.0 - t);
                if self.pos >= t_total {
                    self.value = 0.0;
                    self.state = EnvelopeStateLinear::Done;
                }
            }
        }
    }

    fn value(&self) -> f32 {
        self.value
    }

    fn state(&self) -> EnvelopeState {
        match self.state {
            EnvelopeStateLinear::Idle => EnvelopeState::Idle,
            EnvelopeStateLinear::Attack => EnvelopeState::Attack,
            EnvelopeStateLinear::Sustain => EnvelopeState::Sustain,
            EnvelopeStateLinear::Release => EnvelopeState::Release,
            EnvelopeStateLinear::Done => EnvelopeState::Done,
        }
    }

    fn after_attack_before_sustain(&self) -> bool {
        self.state == EnvelopeStateLinear::Attack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(a: i32, h: i32, d: i32, s: f32, r: i32) -> AhdsrParams {
        AhdsrParams::new(
            a,
            Interp::Linear,
            h,
            d,
            Interp::Linear,
            s,
            r,
            Interp::Linear,
        )
    }

    #[test]
    fn wait_for_release_walks_all_phases() {
        let mut env = AhdsrEnvelope::<WaitForKeyRelease>::default();
        env.set_params(&params(10, 5, 20, 0.5, 15));
        env.key_pressed();
        assert_eq!(env.state(), EnvelopeState::Attack);

        for _ in 0..10 {
            env.step();
        }
        assert!((env.value() - 1.0).abs() < 1e-6);
        assert_eq!(env.state(), EnvelopeState::Hold);

        for _ in 0..5 {
            env.step();
        }
        assert_eq!(env.state(), EnvelopeState::Decay);

        for _ in 0..20 {
            env.step();
        }
        assert_eq!(env.state(), EnvelopeState::Sustain);
        assert!((env.value() - 0.5).abs() < 1e-6);

        // Sustain holds indefinitely.
        for _ in 0..100 {
            env.step();
        }
        assert_eq!(env.state(), EnvelopeState::Sustain);

        env.key_released();
        for _ in 0..15 {
            env.step();
        }
        assert!(env.is_done());
        assert!(env.value().abs() < 1e-6);
    }

    #[test]
    fn release_after_decay_skips_sustain() {
        let mut env = AhdsrEnvelope::<ReleaseAfterDecay>::default();
        env.set_params(&params(10, 5, 20, 0.5, 15));
        env.key_pressed();

        for _ in 0..35 {
            env.step();
        }
        assert_eq!(env.state(), EnvelopeState::Release);
        assert!(env.after_attack_before_sustain());

        for _ in 0..15 {
            env.step();
        }
        assert!(env.is_done());
    }

    #[test]
    fn note_off_is_ignored_by_self_releasing_family() {
        let mut env = AhdsrEnvelope::<ReleaseAfterDecay>::default();
        env.set_params(&params(10, 0, 10, 0.5, 10));
        env.key_pressed();
        env.step();
        env.key_released();
        assert_eq!(env.state(), EnvelopeState::Attack);
    }

    #[test]
    fn zero_length_phases_are_skipped() {
        let mut env = AhdsrEnvelope::<WaitForKeyRelease>::default();
        env.set_params(&params(0, 0, 0, 1.0, 0));
        env.key_pressed();
        assert_eq!(env.state(), EnvelopeState::Sustain);
        assert!((env.value() - 1.0).abs() < 1e-6);

        env.key_released();
        assert!(env.is_done());
    }

    #[test]
    fn release_during_attack_starts_from_current_level() {
        let mut env = AhdsrEnvelope::<WaitForKeyRelease>::default();
        env.set_params(&params(10, 0, 10, 0.5, 10));
        env.key_pressed();
        for _ in 0..5 {
            env.step();
        }
        let level = env.value();
        assert!(level > 0.0 && level < 1.0);

        env.key_released();
        env.step();
        assert!(env.value() < level);
    }

    #[test]
    fn params_order_discriminates_on_sustain() {
        let a = params(10, 5, 20, 0.5, 15);
        let b = params(10, 5, 20, 0.6, 15);
        assert!(a < b);
        assert_eq!(a, params(10, 5, 20, 0.5, 15));
    }

    #[test]
    fn params_clamp_garbage_input() {
        let p = AhdsrParams::new(
            -3,
            Interp::Linear,
            -1,
            -1,
            Interp::Linear,
            7.5,
            -9,
            Interp::Linear,
        );
        assert_eq!(p.attack, 0);
        assert_eq!(p.hold, 0);
        assert_eq!(p.decay, 0);
        assert_eq!(p.sustain, 1.0);
        assert_eq!(p.release, 0);
    }

    #[test]
    fn linear_envelope_round_trip() {
        let mut env = LinearEnvelope::default();
        env.set_params(&LinearParams::new(100));
        env.key_pressed();
        for _ in 0..100 {
            env.step();
        }
        assert_eq!(env.state(), EnvelopeState::Sustain);
        assert!((env.value() - 1.0).abs() < 1e-6);

        env.key_released();
        for _ in 0..100 {
            env.step();
        }
        assert!(env.is_done());
        assert!(env.value().abs() < 1e-6);
    }
}
