//! End-to-end lifecycle scenarios against a manual driver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aulos::{AhdsrParams, AudioSystem, EnvelopeFamily, Interp, ManualDriver};

const SR: f64 = 44100.0;

fn system() -> (Arc<ManualDriver>, AudioSystem) {
    let driver = Arc::new(ManualDriver::new(SR));
    let system = AudioSystem::new(driver.clone());
    (driver, system)
}

fn short_release_params() -> AhdsrParams {
    AhdsrParams::new(
        4,
        Interp::Linear,
        2,
        4,
        Interp::Linear,
        0.5,
        4,
        Interp::Linear,
    )
}

#[test]
fn note_round_trip() {
    let (driver, system) = system();

    assert!(system.initialize_output(0.0, 0));
    assert!(system.midi_note_on(100, 60, 0.8));
    assert!(system.midi_note_off(100, 60));

    // The rendered block carries the note.
    let block = driver.pump(512);
    assert!(block.iter().any(|&s| s != 0.0));

    system.teardown_output();
    assert!(!system.context().is_initialized());
}

#[test]
fn nested_users_share_one_output() {
    let (driver, system) = system();

    assert!(system.initialize_output(0.0, 0));
    assert!(system.initialize_output(0.0, 0));
    driver.pump(256);

    // Middle teardown: a decrement, nothing else.
    system.teardown_output();
    assert!(system.context().is_initialized());
    assert!(system.midi_note_on(100, 60, 0.8));
    driver.pump(256);

    // Final teardown waits out the crossfade before shutting down.
    let start = Instant::now();
    system.teardown_output();
    let elapsed = start.elapsed();
    assert!(!system.context().is_initialized());
    assert!(
        elapsed >= Duration::from_millis(150),
        "teardown skipped the crossfade wait: {elapsed:?}"
    );
    assert_eq!(system.user_count(), 0);
}

#[test]
fn events_before_init_fail_and_succeed_after() {
    let (_driver, system) = system();

    assert!(!system.midi_note_on(100, 60, 0.8));
    assert!(system.initialize_output(0.0, 0));
    assert!(system.midi_note_on(100, 60, 0.8));
    system.teardown_output();
}

#[test]
fn dormant_instrument_is_rekeyed_for_a_new_parameter_set() {
    let (driver, system) = system();
    assert!(system.initialize_output(0.0, 0));

    let key_a = short_release_params();
    assert!(system.midi_note_on_ahdsr(EnvelopeFamily::ReleaseAfterDecay, key_a, 60, 0.8));
    assert_eq!(system.ahdsr_release_synths().len(), 1);

    // The self-releasing envelope (14 steps) finishes well within one
    // block; afterwards the slot is dormant.
    driver.pump(256);

    let key_b = AhdsrParams::new(
        8,
        Interp::Linear,
        2,
        4,
        Interp::Linear,
        0.25,
        4,
        Interp::Linear,
    );
    assert!(system.midi_note_on_ahdsr(EnvelopeFamily::ReleaseAfterDecay, key_b, 64, 0.8));

    let registry = system.ahdsr_release_synths();
    assert_eq!(registry.len(), 1, "the dormant slot must be recycled");
    assert!(!registry.contains_key(&key_a));
    assert!(registry.contains_key(&key_b));

    driver.pump(256);
    system.teardown_output();
}

#[test]
fn sounding_instrument_is_not_recycled() {
    let (driver, system) = system();
    assert!(system.initialize_output(0.0, 0));

    // Wait-for-release without a note-off: the voice keeps sounding.
    let key_a = AhdsrParams::new(
        4,
        Interp::Linear,
        0,
        4,
        Interp::Linear,
        0.7,
        4,
        Interp::Linear,
    );
    assert!(system.midi_note_on_ahdsr(EnvelopeFamily::WaitForKeyRelease, key_a, 60, 0.8));
    driver.pump(256);

    let key_b = AhdsrParams::new(
        9,
        Interp::Linear,
        0,
        4,
        Interp::Linear,
        0.7,
        4,
        Interp::Linear,
    );
    assert!(system.midi_note_on_ahdsr(EnvelopeFamily::WaitForKeyRelease, key_b, 64, 0.8));
    assert_eq!(system.ahdsr_wait_synths().len(), 2);

    assert!(system.midi_note_off_ahdsr(EnvelopeFamily::WaitForKeyRelease, key_a, 60));
    assert!(system.midi_note_off_ahdsr(EnvelopeFamily::WaitForKeyRelease, key_b, 64));
    driver.pump(256);
    system.teardown_output();
}

#[test]
fn matched_pairs_return_the_system_to_zero() {
    let (driver, system) = system();

    for round in 0..3 {
        // Fresh parameters each round.
        let latency = round as f32 * 0.01;
        assert!(system.initialize_output(latency, 0), "round {round}");
        assert!(system.midi_note_on(50 + round, 60, 0.5));
        driver.pump(128);
        system.teardown_output();

        assert_eq!(system.user_count(), 0);
        assert!(!system.context().is_initialized());
        assert!(!driver.is_running());
        assert_eq!(system.linear_synths().len(), 0);
        assert_eq!(system.context().pool().no_xfade_len(), 0);
        assert_eq!(system.context().pool().xfade_len(), 0);
    }
}

#[test]
fn effects_ride_the_crossfaded_group() {
    let (driver, system) = system();
    assert!(!system.effect_on(0, 60, 0.8));

    assert!(system.initialize_output(0.0, 0));
    assert!(system.effect_on(0, 60, 0.8));

    let block = driver.pump(2048);
    assert!(block.iter().any(|&s| s != 0.0));

    assert!(system.effect_off(60));
    assert!(!system.effect_off(61));

    // Drain the release so teardown sees a quiet group.
    driver.pump(8192);
    system.teardown_output();
    assert!(!system.effect_on(0, 60, 0.8));
}

#[test]
fn failed_first_init_reconciles_through_matching_teardown() {
    let (driver, system) = system();

    driver.fail_next_init();
    assert!(!system.initialize_output(0.0, 0));
    // The count is intentionally left at 1 (see the lifecycle
    // contract); the caller's matching teardown settles it.
    assert_eq!(system.user_count(), 1);
    system.teardown_output();
    assert_eq!(system.user_count(), 0);

    assert!(system.initialize_output(0.0, 0));
    assert!(system.midi_note_on(100, 60, 0.8));
    system.teardown_output();
}
