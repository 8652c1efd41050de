//! Foreign ABI.
//!
//! The exact exported names are the observable contract with the
//! embedding host. Every call routes through the process-wide
//! [`AudioSystem`](crate::AudioSystem); no panic crosses the
//! boundary, and every operation returns a boolean or a pointer.
//!
//! `analyzeAHDSREnvelope_` hands ownership of a float buffer to the
//! caller, who must return it through [`freeAnalyzedEnvelope`].

// The exported names are the ABI; they are not ours to restyle.
#![allow(non_snake_case)]

use aulos_dsp::{AhdsrParams, Interp};

use crate::{global, EnvelopeFamily};

/// Register a user of the audio output; the first user initializes it.
///
/// `min_latency_seconds` is the minimum platform latency (0.0 for the
/// smallest possible); a strictly positive `min_latency_millis`
/// overrides the platform minimum for the stream about to open.
/// Every call, successful or not, must be matched by a
/// `teardownAudioOutput` call.
#[no_mangle]
pub extern "C" fn initializeAudioOutput(min_latency_seconds: f32, min_latency_millis: i32) -> bool {
    catch_bool(|| global().initialize_output(min_latency_seconds, min_latency_millis))
}

/// Unregister a user of the audio output; the last user shuts it down
/// after crossfading the signal to zero.
#[no_mangle]
pub extern "C" fn teardownAudioOutput() {
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        global().teardown_output()
    }));
}

/// Simple-linear envelope note on.
#[no_mangle]
pub extern "C" fn midiNoteOn(envel_charac_time: i32, pitch: i16, velocity: f32) -> bool {
    catch_bool(|| global().midi_note_on(envel_charac_time, pitch, velocity))
}

/// Simple-linear envelope note off.
#[no_mangle]
pub extern "C" fn midiNoteOff(envel_charac_time: i32, pitch: i16) -> bool {
    catch_bool(|| global().midi_note_off(envel_charac_time, pitch))
}

/// AHDSR note on. `t` selects the release semantics (0 = wait for key
/// release, 1 = release after decay); interpolation discriminants
/// outside the known range fall back to linear.
#[allow(clippy::too_many_arguments)]
#[no_mangle]
pub extern "C" fn midiNoteOnAHDSR_(
    t: i32,
    a: i32,
    ai: i32,
    h: i32,
    d: i32,
    di: i32,
    s: f32,
    r: i32,
    ri: i32,
    pitch: i16,
    velocity: f32,
) -> bool {
    let Some(family) = EnvelopeFamily::from_i32(t) else {
        return false;
    };
    let params = ahdsr_params(a, ai, h, d, di, s, r, ri);
    catch_bool(|| global().midi_note_on_ahdsr(family, params, pitch, velocity))
}

/// AHDSR note off.
#[allow(clippy::too_many_arguments)]
#[no_mangle]
pub extern "C" fn midiNoteOffAHDSR_(
    t: i32,
    a: i32,
    ai: i32,
    h: i32,
    d: i32,
    di: i32,
    s: f32,
    r: i32,
    ri: i32,
    pitch: i16,
) -> bool {
    let Some(family) = EnvelopeFamily::from_i32(t) else {
        return false;
    };
    let params = ahdsr_params(a, ai, h, d, di, s, r, ri);
    catch_bool(|| global().midi_note_off_ahdsr(family, params, pitch))
}

/// Simulate the AHDSR envelope offline and return its sampled
/// trajectory.
///
/// Writes the sample count through `n_elems` and the attack→sustain
/// split index (or −1) through `split_at`. Returns a buffer the
/// caller owns and must release with [`freeAnalyzedEnvelope`], or
/// null (with `n_elems` = 0) when the family discriminant is unknown
/// or the analysis failed.
///
/// # Safety
///
/// `n_elems` and `split_at` must be valid for writes.
#[allow(clippy::too_many_arguments)]
#[no_mangle]
pub unsafe extern "C" fn analyzeAHDSREnvelope_(
    t: i32,
    a: i32,
    ai: i32,
    h: i32,
    d: i32,
    di: i32,
    s: f32,
    r: i32,
    ri: i32,
    n_elems: *mut i32,
    split_at: *mut i32,
) -> *mut f32 {
    if n_elems.is_null() || split_at.is_null() {
        return std::ptr::null_mut();
    }
    *n_elems = 0;
    *split_at = -1;

    let Some(family) = EnvelopeFamily::from_i32(t) else {
        return std::ptr::null_mut();
    };
    let params = ahdsr_params(a, ai, h, d, di, s, r, ri);

    let trajectory = match std::panic::catch_unwind(|| crate::analyze_ahdsr(family, &params)) {
        Ok(Ok(trajectory)) => trajectory,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "envelope analysis failed");
            return std::ptr::null_mut();
        }
        Err(_) => return std::ptr::null_mut(),
    };

    if trajectory.samples.is_empty() {
        *split_at = trajectory.split_at;
        return std::ptr::null_mut();
    }

    *n_elems = trajectory.samples.len() as i32;
    *split_at = trajectory.split_at;

    let mut samples = trajectory.samples.into_boxed_slice();
    let pointer = samples.as_mut_ptr();
    std::mem::forget(samples);
    pointer
}

/// Release a buffer returned by [`analyzeAHDSREnvelope_`].
///
/// # Safety
///
/// `pointer` must be a buffer previously returned by
/// `analyzeAHDSREnvelope_` together with its reported `n_elems`, and
/// must not be used afterwards. Null is accepted and ignored.
#[no_mangle]
pub unsafe extern "C" fn freeAnalyzedEnvelope(pointer: *mut f32, n_elems: i32) {
    if pointer.is_null() || n_elems <= 0 {
        return;
    }
    let len = n_elems as usize;
    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
        pointer, len,
    )));
}

/// Start a wind effect note.
#[no_mangle]
pub extern "C" fn effectOn(program: i32, pitch: i16, velocity: f32) -> bool {
    catch_bool(|| global().effect_on(program, pitch, velocity))
}

/// Stop a wind effect note.
#[no_mangle]
pub extern "C" fn effectOff(pitch: i16) -> bool {
    catch_bool(|| global().effect_off(pitch))
}

#[allow(clippy::too_many_arguments)]
fn ahdsr_params(a: i32, ai: i32, h: i32, d: i32, di: i32, s: f32, r: i32, ri: i32) -> AhdsrParams {
    AhdsrParams::new(
        a,
        Interp::from_i32(ai),
        h,
        d,
        Interp::from_i32(di),
        s,
        r,
        Interp::from_i32(ri),
    )
}

fn catch_bool(f: impl FnOnce() -> bool) -> bool {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).unwrap_or(false)
}
