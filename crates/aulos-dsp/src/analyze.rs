//! Offline envelope analysis.
//!
//! Simulates a key press against a fresh envelope and records the
//! sampled trajectory, one value per step, until the envelope reaches
//! its terminal state. Used by editors to draw the shape a parameter
//! set will produce, without touching the instrument registries or
//! taking any lock.

use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Safety bound on the number of simulated steps. A well-formed
/// parameter set terminates far below this; hitting the bound is
/// reported as an error rather than looping forever.
pub const MAX_ANALYSIS_STEPS: usize = 1_000_000;

/// Sampled envelope trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// One envelope value per simulated sample.
    pub samples: Vec<f32>,
    /// Length of the pressed-key span: the sample count at which the
    /// attack→sustain boundary was observed, or −1 when the envelope
    /// releases on its own and no boundary exists.
    pub split_at: i32,
}

/// Simulate `params` through a key press (and, for families that
/// honour it, a key release) and return the sampled trajectory.
pub fn analyze<E: Envelope>(params: &E::Params) -> Result<Trajectory> {
    let mut env = E::default();
    env.set_params(params);
    env.key_pressed();

    let mut samples = Vec::with_capacity(256);
    let mut split_at = -1;
    let mut steps = 0usize;

    while !env.is_done() {
        bounded_step(&mut env, &mut steps)?;
        samples.push(env.value());
        if !env.after_attack_before_sustain() && !env.is_done() {
            // The pressed-key span just ended; everything from here on
            // is sustain-or-release.
            split_at = samples.len() as i32;
            if E::HONORS_NOTE_OFF {
                env.key_released();
            }
            break;
        }
    }

    while !env.is_done() {
        bounded_step(&mut env, &mut steps)?;
        samples.push(env.value());
    }

    Ok(Trajectory { samples, split_at })
}

fn bounded_step<E: Envelope>(env: &mut E, steps: &mut usize) -> Result<()> {
    *steps += 1;
    if *steps > MAX_ANALYSIS_STEPS {
        return Err(Error::StepLimitExceeded(MAX_ANALYSIS_STEPS));
    }
    env.step();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{
        AhdsrEnvelope, AhdsrParams, LinearEnvelope, LinearParams, ReleaseAfterDecay,
        WaitForKeyRelease,
    };
    use crate::interp::Interp;

    fn reference_params() -> AhdsrParams {
        AhdsrParams::new(
            10,
            Interp::Linear,
            5,
            20,
            Interp::Linear,
            0.5,
            15,
            Interp::Linear,
        )
    }

    #[test]
    fn wait_for_release_trajectory() {
        let traj = analyze::<AhdsrEnvelope<WaitForKeyRelease>>(&reference_params()).unwrap();

        // attack + hold + decay + release samples
        assert_eq!(traj.samples.len(), 10 + 5 + 20 + 15);
        assert_eq!(traj.split_at, 35);

        // Peak at the end of the attack (1-based sample 10).
        assert!((traj.samples[9] - 1.0).abs() < 1e-6);
        // Sustain level where the split was recorded.
        assert!((traj.samples[34] - 0.5).abs() < 1e-6);
        // Fully released at the end.
        assert!(traj.samples.last().unwrap().abs() < 1e-6);
    }

    #[test]
    fn release_after_decay_has_no_split() {
        let traj = analyze::<AhdsrEnvelope<ReleaseAfterDecay>>(&reference_params()).unwrap();

        assert_eq!(traj.split_at, -1);
        assert_eq!(traj.samples.len(), 10 + 5 + 20 + 15);
        assert!(traj.samples.last().unwrap().abs() < 1e-6);
    }

    #[test]
    fn degenerate_params_split_at_vector_end() {
        let params = AhdsrParams::new(
            0,
            Interp::Linear,
            0,
            0,
            Interp::Linear,
            1.0,
            0,
            Interp::Linear,
        );
        let traj = analyze::<AhdsrEnvelope<WaitForKeyRelease>>(&params).unwrap();

        assert!(traj.samples.len() <= 1);
        assert_eq!(traj.split_at, traj.samples.len() as i32);
    }

    #[test]
    fn linear_trajectory_is_symmetric() {
        let traj = analyze::<LinearEnvelope>(&LinearParams::new(50)).unwrap();

        assert_eq!(traj.samples.len(), 100);
        assert_eq!(traj.split_at, 50);
        assert!((traj.samples[49] - 1.0).abs() < 1e-6);
        assert!(traj.samples.last().unwrap().abs() < 1e-6);
    }

    #[test]
    fn trajectory_values_stay_normalized() {
        let traj = analyze::<AhdsrEnvelope<WaitForKeyRelease>>(&AhdsrParams::new(
            7,
            Interp::EaseInCubic,
            3,
            11,
            Interp::EaseOutQuad,
            0.25,
            9,
            Interp::EaseInOutQuad,
        ))
        .unwrap();

        for v in &traj.samples {
            assert!((0.0..=1.0).contains(v));
        }
    }
}
