//! Concurrency scenarios: the lock discipline under real thread
//! interleavings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aulos::{
    AhdsrParams, AudioSystem, EnvelopeFamily, Interp, LinearEnvelope, LinearParams, ManualDriver,
    Synths,
};

const SR: f64 = 44100.0;

fn system() -> (Arc<ManualDriver>, Arc<AudioSystem>) {
    let driver = Arc::new(ManualDriver::new(SR));
    let system = Arc::new(AudioSystem::new(driver.clone()));
    (driver, system)
}

fn ahdsr(attack: i32) -> AhdsrParams {
    AhdsrParams::new(
        attack,
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
fn concurrent_note_ons_on_distinct_keys_complete() {
    let (_driver, system) = system();
    assert!(system.initialize_output(0.0, 0));

    std::thread::scope(|scope| {
        for worker in 0..2 {
            let system = Arc::clone(&system);
            scope.spawn(move || {
                for i in 0..50 {
                    let key = ahdsr(10 + worker * 100 + i);
                    assert!(system.midi_note_on_ahdsr(
                        EnvelopeFamily::WaitForKeyRelease,
                        key,
                        60,
                        0.5
                    ));
                }
            });
        }
    });

    // Both threads allocated under the same registry without deadlock
    // or lost entries (no slot was dormant, so nothing was recycled).
    assert_eq!(system.ahdsr_wait_synths().len(), 100);
    system.teardown_output();
}

#[test]
fn handle_liveness_blocks_concurrent_finalize() {
    let pool = aulos::ChannelPool::new();
    let synths = Arc::new(Synths::<LinearEnvelope>::new());
    let finalized = Arc::new(AtomicBool::new(false));

    let handle = synths.acquire(LinearParams::new(100), &pool, SR);

    std::thread::scope(|scope| {
        let synths2 = Arc::clone(&synths);
        let finalized2 = Arc::clone(&finalized);
        let worker = scope.spawn(move || {
            synths2.finalize();
            finalized2.store(true, Ordering::Release);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(
            !finalized.load(Ordering::Acquire),
            "finalize completed while a handle was live"
        );

        drop(handle);
        worker.join().expect("finalize thread panicked");
    });
    assert!(finalized.load(Ordering::Acquire));
    assert!(synths.is_empty());
}

#[test]
fn control_and_render_paths_run_concurrently() {
    let (driver, system) = system();
    assert!(system.initialize_output(0.0, 0));

    let stop = Arc::new(AtomicBool::new(false));

    std::thread::scope(|scope| {
        // A stand-in for the platform's realtime thread.
        let render_driver = Arc::clone(&driver);
        let render_stop = Arc::clone(&stop);
        scope.spawn(move || {
            while !render_stop.load(Ordering::Acquire) {
                render_driver.pump(64);
            }
        });

        for worker in 0..3 {
            let system = Arc::clone(&system);
            scope.spawn(move || {
                for i in 0..100 {
                    let pitch = (40 + (worker * 20 + i) % 60) as i16;
                    system.midi_note_on(50 + worker, pitch, 0.5);
                    system.midi_note_off(50 + worker, pitch);
                }
            });
        }

        std::thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Release);
    });

    system.teardown_output();
    assert_eq!(system.user_count(), 0);
    assert!(!system.context().is_initialized());
}

#[test]
fn interleaved_user_pairs_balance_the_count() {
    let (_driver, system) = system();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let system = Arc::clone(&system);
            scope.spawn(move || {
                for _ in 0..3 {
                    system.initialize_output(0.0, 0);
                    std::thread::sleep(Duration::from_millis(5));
                    system.teardown_output();
                }
            });
        }
    });

    assert_eq!(system.user_count(), 0);
    assert!(!system.context().is_initialized());

    // The system comes back up cleanly with fresh parameters.
    assert!(system.initialize_output(0.01, 0));
    assert!(system.midi_note_on(100, 60, 0.8));
    system.teardown_output();
}

#[test]
fn teardown_waits_while_a_note_is_dispatched() {
    let (driver, system) = system();
    assert!(system.initialize_output(0.0, 0));
    driver.pump(64);

    std::thread::scope(|scope| {
        let system2 = Arc::clone(&system);
        let noter = scope.spawn(move || {
            for i in 0..200 {
                system2.midi_note_on(60 + (i % 5), 60, 0.5);
            }
        });
        noter.join().expect("note thread panicked");
    });

    // Teardown after a burst of dispatches: the registry latches and
    // the init latch compose without deadlock.
    system.teardown_output();
    assert_eq!(system.linear_synths().len(), 0);
}
