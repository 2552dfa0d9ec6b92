use nalgebra as na;

use crate::error::{ConfigurationFault, Result};
use crate::state::IcpState;

/// Standard gravity (m/s^2)
pub const DEFAULT_GRAVITY: f64 = 9.81;

/// Anything that can report the current center of mass height once per tick.
///
/// The state estimator owns the actual estimate; the ICP core only reads it.
pub trait ComHeightSource {
    /// Height of the center of mass above the ground plane (m)
    fn com_height(&self) -> f64;
}

/// Natural frequency of the linear inverted pendulum, `omega0 = sqrt(g / z)`.
///
/// Always finite and strictly positive once constructed, so every function
/// taking a `NaturalFrequency` can skip the check.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct NaturalFrequency(f64);

impl NaturalFrequency {
    pub fn new(omega: f64) -> Result<Self> {
        if omega.is_finite() && omega > 0.0 {
            Ok(Self(omega))
        } else {
            Err(ConfigurationFault::InvalidNaturalFrequency(omega))
        }
    }

    /// Derive the natural frequency from gravity and a constant COM height
    pub fn from_com_height(gravity: f64, com_height: f64) -> Result<Self> {
        if !(gravity.is_finite() && gravity > 0.0) {
            return Err(ConfigurationFault::InvalidGravity(gravity));
        }
        if !(com_height.is_finite() && com_height > 0.0) {
            return Err(ConfigurationFault::InvalidComHeight(com_height));
        }
        Self::new((gravity / com_height).sqrt())
    }

    pub fn from_source<S: ComHeightSource + ?Sized>(source: &S, gravity: f64) -> Result<Self> {
        Self::from_com_height(gravity, source.com_height())
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    /// `exp(omega0 * t)`
    #[inline]
    pub fn growth(self, t: f64) -> f64 {
        (self.0 * t).exp()
    }

    /// `exp(-omega0 * t)`, the factor applied when recursing backward over `t`
    #[inline]
    pub fn decay(self, t: f64) -> f64 {
        (-self.0 * t).exp()
    }
}

/// Closed-form LIP propagation of an ICP offset: `x(t) = exp(omega0 t) x0`
#[inline]
pub fn propagate(x0: f64, omega: NaturalFrequency, t: f64) -> f64 {
    omega.growth(t) * x0
}

/// Time derivative of [`propagate`]: `omega0 exp(omega0 t) x0`
#[inline]
pub fn propagate_derivative(x0: f64, omega: NaturalFrequency, t: f64) -> f64 {
    omega.value() * omega.growth(t) * x0
}

/// Propagate an ICP for `t` seconds while the CMP stays at `cmp`.
///
/// The ICP diverges away from a stationary CMP:
/// `xi(t) = cmp + exp(omega0 t) (xi0 - cmp)`. Negative `t` runs backward.
pub fn propagate_with_cmp(
    icp: &na::Vector2<f64>,
    cmp: &na::Vector2<f64>,
    omega: NaturalFrequency,
    t: f64,
) -> IcpState {
    let offset = (icp - cmp) * omega.growth(t);
    IcpState {
        position: cmp + offset,
        velocity: offset * omega.value(),
    }
}

/// Capture point of a COM state: `xi = x + x_dot / omega0`
pub fn capture_point(
    com: &na::Vector2<f64>,
    com_velocity: &na::Vector2<f64>,
    omega: NaturalFrequency,
) -> na::Vector2<f64> {
    com + com_velocity / omega.value()
}

/// CMP that produces the given ICP velocity: `r = xi - xi_dot / omega0`
pub fn cmp_from_icp(state: &IcpState, omega: NaturalFrequency) -> na::Vector2<f64> {
    state.position - state.velocity / omega.value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct FixedHeight(f64);

    impl ComHeightSource for FixedHeight {
        fn com_height(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_natural_frequency_from_height() {
        let omega = NaturalFrequency::from_com_height(9.81, 0.81).unwrap();
        assert_relative_eq!(omega.value(), (9.81f64 / 0.81).sqrt(), epsilon = 1e-12);

        let from_source = NaturalFrequency::from_source(&FixedHeight(0.81), 9.81).unwrap();
        assert_eq!(omega, from_source);
    }

    #[test]
    fn test_rejects_non_positive_frequency() {
        assert_eq!(
            NaturalFrequency::new(0.0),
            Err(ConfigurationFault::InvalidNaturalFrequency(0.0))
        );
        assert!(NaturalFrequency::new(-1.0).is_err());
        assert!(NaturalFrequency::new(f64::NAN).is_err());
        assert!(NaturalFrequency::new(f64::INFINITY).is_err());
        assert!(matches!(
            NaturalFrequency::from_com_height(9.81, 0.0),
            Err(ConfigurationFault::InvalidComHeight(_))
        ));
        assert!(matches!(
            NaturalFrequency::from_com_height(-9.81, 1.0),
            Err(ConfigurationFault::InvalidGravity(_))
        ));
    }

    #[test]
    fn test_propagation_composes() {
        let omega = NaturalFrequency::new(3.1).unwrap();
        for &(t1, t2) in &[(0.0, 0.0), (0.1, 0.25), (0.4, 0.05), (1.2, 0.7)] {
            let stepwise = propagate(propagate(0.37, omega, t1), omega, t2);
            let once = propagate(0.37, omega, t1 + t2);
            assert_relative_eq!(stepwise, once, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let omega = NaturalFrequency::new(2.0).unwrap();
        let h = 1e-6;
        let numeric = (propagate(1.5, omega, 0.5 + h) - propagate(1.5, omega, 0.5 - h)) / (2.0 * h);
        assert_relative_eq!(propagate_derivative(1.5, omega, 0.5), numeric, epsilon = 1e-5);
    }

    #[test]
    fn test_icp_diverges_from_stationary_cmp() {
        let omega = NaturalFrequency::new(3.0).unwrap();
        let icp = na::Vector2::new(0.05, 0.0);
        let cmp = na::Vector2::zeros();

        let later = propagate_with_cmp(&icp, &cmp, omega, 0.2);
        assert!(later.position.x > icp.x);
        assert_relative_eq!(cmp_from_icp(&later, omega), cmp, epsilon = 1e-12);

        // Running backward recovers the starting point
        let back = propagate_with_cmp(&later.position, &cmp, omega, -0.2);
        assert_relative_eq!(back.position, icp, epsilon = 1e-12);
    }

    #[test]
    fn test_capture_point_of_resting_com() {
        let omega = NaturalFrequency::new(3.5).unwrap();
        let com = na::Vector2::new(0.1, -0.2);
        assert_eq!(capture_point(&com, &na::Vector2::zeros(), omega), com);

        let moving = capture_point(&com, &na::Vector2::new(0.35, 0.0), omega);
        assert_relative_eq!(moving.x, 0.2, epsilon = 1e-12);
    }
}
