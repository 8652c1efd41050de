//! Interpolation curves for envelope segment shaping.
//!
//! A curve maps a normalized phase position [0, 1] to a normalized
//! output [0, 1]. Envelope parameters carry one curve per timed
//! segment (attack, decay, release). The foreign surface selects
//! curves by an integer discriminant; unknown values fall back to
//! [`Interp::Linear`].

/// Interpolation curve for one envelope segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Interp {
    /// Constant rate of change.
    #[default]
    Linear,
    /// Slow start, fast finish (t²).
    EaseInQuad,
    /// Fast start, slow finish (1 − (1−t)²).
    EaseOutQuad,
    /// Smooth start and finish, quadratic halves.
    EaseInOutQuad,
    /// Slow start, fast finish (t³).
    EaseInCubic,
    /// Fast start, slow finish (1 − (1−t)³).
    EaseOutCubic,
    /// Smooth start and finish, cubic halves.
    EaseInOutCubic,
}

impl Interp {
    /// Map an integer discriminant to a curve.
    ///
    /// Out-of-range values select [`Interp::Linear`] so that callers
    /// sending arbitrary integers get a well-defined envelope rather
    /// than a failure.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Interp::EaseInQuad,
            2 => Interp::EaseOutQuad,
            3 => Interp::EaseInOutQuad,
            4 => Interp::EaseInCubic,
            5 => Interp::EaseOutCubic,
            6 => Interp::EaseInOutCubic,
            _ => Interp::Linear,
        }
    }

    /// Apply the curve to a normalized value.
    ///
    /// The input is clamped to [0, 1]; the output stays in [0, 1] with
    /// `apply(0) == 0` and `apply(1) == 1` for every variant.
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Interp::Linear => t,
            Interp::EaseInQuad => t * t,
            Interp::EaseOutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Interp::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - 2.0 * (1.0 - t) * (1.0 - t)
                }
            }
            Interp::EaseInCubic => t * t * t,
            Interp::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
            Interp::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - 4.0 * (1.0 - t).powi(3)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Interp; 7] = [
        Interp::Linear,
        Interp::EaseInQuad,
        Interp::EaseOutQuad,
        Interp::EaseInOutQuad,
        Interp::EaseInCubic,
        Interp::EaseOutCubic,
        Interp::EaseInOutCubic,
    ];

    #[test]
    fn endpoints_are_fixed() {
        for curve in ALL {
            assert_eq!(curve.apply(0.0), 0.0, "{curve:?}");
            assert!((curve.apply(1.0) - 1.0).abs() < 1e-6, "{curve:?}");
        }
    }

    #[test]
    fn output_stays_normalized() {
        for curve in ALL {
            for i in 0..=100 {
                let t = i as f32 / 100.0;
                let v = curve.apply(t);
                assert!((0.0..=1.0).contains(&v), "{curve:?} at {t}");
            }
        }
    }

    #[test]
    fn clamps_out_of_range_input() {
        assert_eq!(Interp::Linear.apply(-1.0), 0.0);
        assert_eq!(Interp::Linear.apply(2.0), 1.0);
    }

    #[test]
    fn ease_in_is_below_linear() {
        assert!(Interp::EaseInQuad.apply(0.5) < 0.5);
        assert!(Interp::EaseInCubic.apply(0.5) < Interp::EaseInQuad.apply(0.5));
    }

    #[test]
    fn unknown_discriminant_falls_back_to_linear() {
        assert_eq!(Interp::from_i32(0), Interp::Linear);
        assert_eq!(Interp::from_i32(-3), Interp::Linear);
        assert_eq!(Interp::from_i32(999), Interp::Linear);
        assert_eq!(Interp::from_i32(4), Interp::EaseInCubic);
    }
}
