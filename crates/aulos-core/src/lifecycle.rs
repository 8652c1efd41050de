//! Lifecycle controller: user counting, first-user initialization and
//! last-user teardown with crossfade-to-zero.
//!
//! All process state is hoisted into [`AudioSystem`]: the init latch
//! and user count, the audio context, the wind voice and the three
//! per-family instrument registries. The foreign surface talks to one
//! global instance; tests construct private ones around a
//! [`ManualDriver`](crate::driver::ManualDriver).
//!
//! Lock order, globally: init latch → registry latch → instrument
//! in-use latch. `initialize_output`/`teardown_output` take the init
//! latch, the event façade methods take a registry latch (inside
//! `Synths::acquire`), and nothing ever takes them in the other
//! direction.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use aulos_dsp::{
    AhdsrEnvelope, AhdsrParams, Envelope, LinearEnvelope, LinearParams, ReleaseAfterDecay,
    WaitForKeyRelease,
};
use parking_lot::Mutex;

use crate::channels::ChannelGroup;
use crate::context::{AudioContext, CLOSE_FADE_FRAMES, FALLBACK_CALLBACK_FRAMES};
use crate::driver::AudioDriver;
use crate::event::{EnvelopeFamily, Event};
use crate::registry::Synths;
use crate::wind::WindVoice;

/// Extra teardown wait beyond latency and fade, covering the time the
/// teardown code itself takes to run.
const TEARDOWN_MARGIN_SECONDS: f32 = 0.020;

/// The audio engine's control plane.
pub struct AudioSystem {
    /// Guards the user count and init/teardown of the output stream.
    init_latch: Mutex<i32>,
    context: AudioContext,
    /// The single crossfaded group, published while initialized.
    xfade_group: ArcSwapOption<ChannelGroup>,
    wind: WindVoice,
    linear: Synths<LinearEnvelope>,
    ahdsr_wait: Synths<AhdsrEnvelope<WaitForKeyRelease>>,
    ahdsr_release: Synths<AhdsrEnvelope<ReleaseAfterDecay>>,
}

impl AudioSystem {
    pub fn new(driver: Arc<dyn AudioDriver>) -> Self {
        Self {
            init_latch: Mutex::new(0),
            context: AudioContext::new(driver),
            xfade_group: ArcSwapOption::empty(),
            wind: WindVoice::new(),
            linear: Synths::new(),
            ahdsr_wait: Synths::new(),
            ahdsr_release: Synths::new(),
        }
    }

    /// Register a user of the audio output. The first user initializes
    /// the output; later users get the context's current state.
    ///
    /// Every call, successful or not, must be matched by a
    /// [`teardown_output`](Self::teardown_output) call: on failure the
    /// user count is deliberately NOT rolled back here, and the
    /// caller's matching teardown reconciles it.
    pub fn initialize_output(&self, min_latency_seconds: f32, min_latency_millis: i32) -> bool {
        let mut users = self.init_latch.lock();
        *users += 1;
        tracing::info!(users = *users, "initialize audio output");

        if *users > 1 {
            // Not the first user.
            return self.context.is_initialized();
        }
        if *users <= 0 {
            debug_assert!(false, "negative user count");
            tracing::error!(users = *users, "negative user count on initialize");
            return self.context.is_initialized();
        }

        if min_latency_millis > 0
            && !self
                .context
                .driver()
                .override_min_latency_millis(min_latency_millis)
        {
            tracing::error!(min_latency_millis, "latency override rejected");
            return false;
        }

        disable_denormals();

        let (xfade_group, _remover) = self
            .context
            .pool()
            .add_xfade(u8::MAX as usize, 1);
        if !self
            .wind
            .initialize(&xfade_group, self.context.sample_rate() as f32)
        {
            tracing::error!("wind voice initialization failed");
            return false;
        }
        self.xfade_group.store(Some(Arc::clone(&xfade_group)));

        if let Err(e) = self.context.init(min_latency_seconds) {
            tracing::error!(error = %e, "audio context initialization failed");
            return false;
        }

        // Some platforms need a beat between stream start and the
        // first delivered buffer; the driver knows how long.
        std::thread::sleep(self.context.driver().startup_settle());
        true
    }

    /// Unregister a user. The last user crossfades all output to zero,
    /// waits out the fade, then finalizes the wind voice, every
    /// registry family, the context and both channel families.
    pub fn teardown_output(&self) {
        let mut users = self.init_latch.lock();
        *users -= 1;
        tracing::info!(users = *users, "teardown audio output");
        if *users > 0 {
            // Not the last user.
            return;
        }

        if self.context.is_initialized() {
            self.context.on_application_should_close();

            let frames = match self.context.callback_frames() {
                // The callback never ran; assume a very large buffer.
                0 => FALLBACK_CALLBACK_FRAMES,
                n => n,
            };
            let sample_rate = self.context.sample_rate() as f32;
            let latency_seconds = frames as f32 / sample_rate;
            let fade_seconds = CLOSE_FADE_FRAMES as f32 / sample_rate;
            let wait =
                2.0 * latency_seconds + 2.0 * fade_seconds + TEARDOWN_MARGIN_SECONDS;
            std::thread::sleep(Duration::from_millis(1 + (wait * 1000.0) as u64));
        }

        // All channels have crossfaded to zero by now.
        self.wind.finalize();
        self.xfade_group.store(None);

        self.linear.finalize();
        self.ahdsr_wait.finalize();
        self.ahdsr_release.finalize();

        self.context.teardown();
        self.context.pool().clear_all();
    }

    /// Simple-linear note on.
    pub fn midi_note_on(&self, charac_time: i32, pitch: i16, velocity: f32) -> bool {
        self.midi_event(
            &self.linear,
            LinearParams::new(charac_time),
            Event::note_on(pitch, velocity),
        )
    }

    /// Simple-linear note off.
    pub fn midi_note_off(&self, charac_time: i32, pitch: i16) -> bool {
        self.midi_event(
            &self.linear,
            LinearParams::new(charac_time),
            Event::note_off(pitch),
        )
    }

    /// AHDSR note on, dispatched to the family selected by `family`.
    pub fn midi_note_on_ahdsr(
        &self,
        family: EnvelopeFamily,
        params: AhdsrParams,
        pitch: i16,
        velocity: f32,
    ) -> bool {
        let event = Event::note_on(pitch, velocity);
        match family {
            EnvelopeFamily::WaitForKeyRelease => self.midi_event(&self.ahdsr_wait, params, event),
            EnvelopeFamily::ReleaseAfterDecay => self.midi_event(&self.ahdsr_release, params, event),
        }
    }

    /// AHDSR note off.
    pub fn midi_note_off_ahdsr(
        &self,
        family: EnvelopeFamily,
        params: AhdsrParams,
        pitch: i16,
    ) -> bool {
        let event = Event::note_off(pitch);
        match family {
            EnvelopeFamily::WaitForKeyRelease => self.midi_event(&self.ahdsr_wait, params, event),
            EnvelopeFamily::ReleaseAfterDecay => self.midi_event(&self.ahdsr_release, params, event),
        }
    }

    /// Start a wind effect note.
    pub fn effect_on(&self, program: i32, pitch: i16, velocity: f32) -> bool {
        if !self.context.is_initialized() {
            return false;
        }
        self.wind.effect_on(program, pitch, velocity).is_ok()
    }

    /// Stop a wind effect note.
    pub fn effect_off(&self, pitch: i16) -> bool {
        if !self.context.is_initialized() {
            return false;
        }
        self.wind.effect_off(pitch).is_ok()
    }

    fn midi_event<E: Envelope>(
        &self,
        synths: &Synths<E>,
        params: E::Params,
        event: Event,
    ) -> bool {
        if !self.context.is_initialized() {
            return false;
        }
        let handle = synths.acquire(params, self.context.pool(), self.context.sample_rate());
        handle.on_event(event).is_ok()
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    /// Current user count. Diagnostic; racy by nature.
    pub fn user_count(&self) -> i32 {
        *self.init_latch.lock()
    }

    pub fn linear_synths(&self) -> &Synths<LinearEnvelope> {
        &self.linear
    }

    pub fn ahdsr_wait_synths(&self) -> &Synths<AhdsrEnvelope<WaitForKeyRelease>> {
        &self.ahdsr_wait
    }

    pub fn ahdsr_release_synths(&self) -> &Synths<AhdsrEnvelope<ReleaseAfterDecay>> {
        &self.ahdsr_release
    }
}

impl std::fmt::Debug for AudioSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSystem")
            .field("users", &self.user_count())
            .field("context", &self.context)
            .finish()
    }
}

/// Flush denormal floats to zero on architectures where they carry a
/// heavy per-operation cost in the audio callback.
#[allow(deprecated)]
fn disable_denormals() {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: setting FTZ/DAZ only changes how this thread rounds
    // subnormal floats.
    unsafe {
        use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};
        const FLUSH_TO_ZERO: u32 = 1 << 15;
        const DENORMALS_ARE_ZERO: u32 = 1 << 6;
        _mm_setcsr(_mm_getcsr() | FLUSH_TO_ZERO | DENORMALS_ARE_ZERO);
    }
}
