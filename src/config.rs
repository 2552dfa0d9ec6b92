use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::dynamics::DEFAULT_GRAVITY;
use crate::error::{ConfigurationFault, Result};

/// Upper bound on the look-ahead horizon. Storage for the recursion is sized
/// from this at compile time, so the per-tick path never allocates.
pub const MAX_HORIZON: usize = 4;

/// Parameters of the capture point planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpPlannerConfig {
    /// Gravitational acceleration (m/s^2)
    pub gravity: f64,

    /// Number of upcoming steps folded into the recursion
    pub horizon: usize,

    /// Fraction of double support spent on the trailing foot's exit CMP
    pub transfer_split_fraction: f64,

    /// Length of the window around the entry-to-exit CMP switch in which the
    /// swing reference follows a cubic spline (s). Zero disables blending.
    pub swing_spline_duration: f64,

    /// Entry CMP offset in the sole frame [forward, inward] (m)
    pub entry_cmp_offset: na::Vector2<f64>,

    /// Exit CMP offset in the sole frame [forward, inward] (m)
    pub exit_cmp_offset: na::Vector2<f64>,

    /// Longest swing or transfer accepted from a plan (s)
    pub max_step_duration: f64,
}

impl Default for IcpPlannerConfig {
    fn default() -> Self {
        Self {
            gravity: DEFAULT_GRAVITY,
            horizon: 3,
            transfer_split_fraction: 0.5,
            swing_spline_duration: 0.1,
            entry_cmp_offset: na::Vector2::new(-0.02, 0.01),
            exit_cmp_offset: na::Vector2::new(0.04, 0.0),
            max_step_duration: 5.0,
        }
    }
}

impl IcpPlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.gravity.is_finite() && self.gravity > 0.0) {
            return Err(ConfigurationFault::InvalidGravity(self.gravity));
        }
        if self.horizon == 0 || self.horizon > MAX_HORIZON {
            return Err(ConfigurationFault::InvalidHorizon {
                requested: self.horizon,
                max: MAX_HORIZON,
            });
        }
        if !(self.transfer_split_fraction > 0.0 && self.transfer_split_fraction < 1.0) {
            return Err(ConfigurationFault::InvalidSplitFraction {
                name: "transfer_split_fraction",
                value: self.transfer_split_fraction,
            });
        }
        if !(self.swing_spline_duration.is_finite() && self.swing_spline_duration >= 0.0) {
            return Err(ConfigurationFault::InvalidConfig(format!(
                "swing_spline_duration must be finite and non-negative, got {}",
                self.swing_spline_duration
            )));
        }
        if !(self.max_step_duration.is_finite() && self.max_step_duration > 0.0) {
            return Err(ConfigurationFault::InvalidConfig(format!(
                "max_step_duration must be finite and positive, got {}",
                self.max_step_duration
            )));
        }
        if !(self.entry_cmp_offset.iter().all(|v| v.is_finite())
            && self.exit_cmp_offset.iter().all(|v| v.is_finite()))
        {
            return Err(ConfigurationFault::InvalidConfig(
                "CMP offsets must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(IcpPlannerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_horizon_bounds() {
        let mut config = IcpPlannerConfig::default();
        config.horizon = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationFault::InvalidHorizon { requested: 0, .. })
        ));

        config.horizon = MAX_HORIZON + 1;
        assert!(config.validate().is_err());

        config.horizon = MAX_HORIZON;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_fractions_and_durations() {
        let config = IcpPlannerConfig {
            transfer_split_fraction: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationFault::InvalidSplitFraction { .. })
        ));

        let config = IcpPlannerConfig {
            swing_spline_duration: -0.1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigurationFault::InvalidConfig(_))));

        let config = IcpPlannerConfig {
            gravity: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigurationFault::InvalidGravity(_))));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: IcpPlannerConfig =
            serde_json::from_str(r#"{ "horizon": 2, "swing_spline_duration": 0.0 }"#).unwrap();
        assert_eq!(config.horizon, 2);
        assert_eq!(config.swing_spline_duration, 0.0);
        assert_eq!(config.gravity, DEFAULT_GRAVITY);
        assert!(config.validate().is_ok());

        let json = serde_json::to_string(&config).unwrap();
        let back: IcpPlannerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
