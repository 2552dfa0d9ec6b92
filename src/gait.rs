use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::config::IcpPlannerConfig;
use crate::error::{ConfigurationFault, Result};

/// Phase of the step cycle as reported by the walking state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupportPhase {
    /// Both feet on the ground, weight moving onto the support foot
    Transfer,
    /// Single support, the trailing foot swinging to the next foothold
    Swing,
}

/// Which foot is which
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Foot {
    Left,
    Right,
}

impl Foot {
    pub fn opposite(self) -> Self {
        match self {
            Foot::Left => Foot::Right,
            Foot::Right => Foot::Left,
        }
    }
}

/// A committed foothold: planar pose plus the side it supports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footstep {
    pub foot: Foot,
    /// [x, y] on the ground plane
    pub position: na::Vector2<f64>,
    /// Heading about the vertical axis (rad)
    pub yaw: f64,
}

impl Footstep {
    pub fn new(foot: Foot, position: na::Vector2<f64>, yaw: f64) -> Self {
        Self { foot, position, yaw }
    }

    /// World position of a CMP given as [forward, inward] in the sole frame.
    ///
    /// Inward is -y for the left foot and +y for the right foot, so a single
    /// offset serves both sides.
    pub fn cmp(&self, offset: &na::Vector2<f64>) -> na::Vector2<f64> {
        let lateral = match self.foot {
            Foot::Left => -offset.y,
            Foot::Right => offset.y,
        };
        self.position + na::Rotation2::new(self.yaw) * na::Vector2::new(offset.x, lateral)
    }

    fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite()) && self.yaw.is_finite()
    }
}

/// Timing of one step cycle (transfer followed by swing)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    /// Single support duration (s)
    pub swing_duration: f64,
    /// Double support duration preceding the swing (s)
    pub transfer_duration: f64,
    /// Fraction of swing spent on the entry CMP before switching to the exit CMP
    pub swing_split_fraction: f64,
}

impl StepTiming {
    pub fn new(swing_duration: f64, transfer_duration: f64) -> Self {
        Self {
            swing_duration,
            transfer_duration,
            swing_split_fraction: 0.5,
        }
    }

    /// Total duration of the step cycle
    pub fn step_duration(&self) -> f64 {
        self.transfer_duration + self.swing_duration
    }

    pub fn validate(&self, step: usize, max_duration: f64) -> Result<()> {
        let swing = self.swing_duration;
        if !(swing.is_finite() && swing > 0.0 && swing <= max_duration) {
            return Err(ConfigurationFault::InvalidTiming {
                step,
                field: "swing_duration",
                expected: "positive and within max_step_duration",
                value: swing,
            });
        }
        let transfer = self.transfer_duration;
        if !(transfer.is_finite() && transfer >= 0.0 && transfer <= max_duration) {
            return Err(ConfigurationFault::InvalidTiming {
                step,
                field: "transfer_duration",
                expected: "non-negative and within max_step_duration",
                value: transfer,
            });
        }
        if !(self.swing_split_fraction > 0.0 && self.swing_split_fraction < 1.0) {
            return Err(ConfigurationFault::InvalidSplitFraction {
                name: "swing_split_fraction",
                value: self.swing_split_fraction,
            });
        }
        Ok(())
    }
}

/// A footstep together with the timing of the step cycle that places it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub footstep: Footstep,
    pub timing: StepTiming,
}

/// Immutable snapshot of the footstep plan handed over by the planner.
///
/// Footholds are numbered in time order: `0` is the trailing foot, `1` the
/// support foot, and `k + 2` is where step `k` lands. Step `k` transfers
/// weight from foothold `k` onto foothold `k + 1`, then swings the foot from
/// foothold `k` to foothold `k + 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootstepPlan {
    pub trailing: Footstep,
    pub support: Footstep,
    pub steps: Vec<PlannedStep>,
    /// Capture point to come to rest at once the last step lands. Defaults to
    /// the midpoint between the last two footholds.
    pub final_icp: Option<na::Vector2<f64>>,
}

impl FootstepPlan {
    /// Both feet down, nothing planned
    pub fn standing(trailing: Footstep, support: Footstep) -> Self {
        Self {
            trailing,
            support,
            steps: Vec::new(),
            final_icp: None,
        }
    }

    pub fn with_steps(mut self, steps: Vec<PlannedStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_final_icp(mut self, final_icp: na::Vector2<f64>) -> Self {
        self.final_icp = Some(final_icp);
        self
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Foothold by time-ordered index (see the type docs)
    pub fn foothold(&self, index: usize) -> Option<&Footstep> {
        match index {
            0 => Some(&self.trailing),
            1 => Some(&self.support),
            k => self.steps.get(k - 2).map(|s| &s.footstep),
        }
    }

    /// The step currently being executed
    pub fn next_step(&self) -> Result<&PlannedStep> {
        self.steps.first().ok_or(ConfigurationFault::EmptyPlan)
    }

    /// Steady-state capture point once every planned step has landed
    pub fn resting_icp(&self) -> na::Vector2<f64> {
        if let Some(icp) = self.final_icp {
            return icp;
        }
        let n = self.steps.len();
        let (a, b) = match n {
            0 => (&self.trailing, &self.support),
            1 => (&self.support, &self.steps[0].footstep),
            _ => (&self.steps[n - 2].footstep, &self.steps[n - 1].footstep),
        };
        (a.position + b.position) / 2.0
    }

    /// Plan after the current step has landed. Used by the walking state
    /// machine to publish the next snapshot at touchdown.
    pub fn advanced(&self) -> Self {
        match self.steps.first() {
            Some(first) => Self {
                trailing: self.support,
                support: first.footstep,
                steps: self.steps[1..].to_vec(),
                final_icp: self.final_icp,
            },
            None => self.clone(),
        }
    }

    pub fn validate(&self, config: &IcpPlannerConfig) -> Result<()> {
        if !self.trailing.is_finite() || !self.support.is_finite() {
            return Err(ConfigurationFault::NonFinitePlan("support foothold"));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if !step.footstep.is_finite() {
                return Err(ConfigurationFault::NonFinitePlan("footstep pose"));
            }
            step.timing.validate(index, config.max_step_duration)?;
        }
        if let Some(icp) = self.final_icp {
            if !icp.iter().all(|v| v.is_finite()) {
                return Err(ConfigurationFault::NonFinitePlan("final ICP"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn straight_plan(num_steps: usize) -> FootstepPlan {
        let left = Footstep::new(Foot::Left, na::Vector2::new(0.0, 0.1), 0.0);
        let right = Footstep::new(Foot::Right, na::Vector2::new(0.0, -0.1), 0.0);
        let steps = (0..num_steps)
            .map(|i| {
                let foot = if i % 2 == 0 { Foot::Left } else { Foot::Right };
                let y = if foot == Foot::Left { 0.1 } else { -0.1 };
                PlannedStep {
                    footstep: Footstep::new(foot, na::Vector2::new(0.3 * (i + 1) as f64, y), 0.0),
                    timing: StepTiming::new(0.6, 0.2),
                }
            })
            .collect();
        FootstepPlan::standing(left, right).with_steps(steps)
    }

    #[test]
    fn test_cmp_offsets_point_inward() {
        let offset = na::Vector2::new(0.04, 0.01);
        let left = Footstep::new(Foot::Left, na::Vector2::new(0.0, 0.1), 0.0);
        let right = Footstep::new(Foot::Right, na::Vector2::new(0.0, -0.1), 0.0);

        assert_relative_eq!(left.cmp(&offset), na::Vector2::new(0.04, 0.09), epsilon = 1e-12);
        assert_relative_eq!(right.cmp(&offset), na::Vector2::new(0.04, -0.09), epsilon = 1e-12);

        // Turned 90 degrees left: forward is +y, inward for the left foot is +x
        let turned = Footstep::new(Foot::Left, na::Vector2::zeros(), FRAC_PI_2);
        assert_relative_eq!(turned.cmp(&offset), na::Vector2::new(0.01, 0.04), epsilon = 1e-12);
    }

    #[test]
    fn test_foothold_indexing() {
        let plan = straight_plan(2);
        assert_eq!(plan.foothold(0), Some(&plan.trailing));
        assert_eq!(plan.foothold(1), Some(&plan.support));
        assert_eq!(plan.foothold(3), Some(&plan.steps[1].footstep));
        assert_eq!(plan.foothold(4), None);
    }

    #[test]
    fn test_resting_icp_between_last_footholds() {
        assert_eq!(straight_plan(0).resting_icp(), na::Vector2::new(0.0, 0.0));
        assert_relative_eq!(
            straight_plan(3).resting_icp(),
            na::Vector2::new(0.75, 0.0),
            epsilon = 1e-12
        );

        let pinned = straight_plan(3).with_final_icp(na::Vector2::new(1.0, 0.02));
        assert_eq!(pinned.resting_icp(), na::Vector2::new(1.0, 0.02));
    }

    #[test]
    fn test_advanced_plan_shifts_footholds() {
        let plan = straight_plan(3);
        let next = plan.advanced();

        assert_eq!(next.trailing, plan.support);
        assert_eq!(next.support, plan.steps[0].footstep);
        assert_eq!(next.num_steps(), 2);
        assert_eq!(next.resting_icp(), plan.resting_icp());

        let standing = straight_plan(0);
        assert_eq!(standing.advanced(), standing);
        assert_eq!(standing.next_step(), Err(ConfigurationFault::EmptyPlan));
    }

    #[test]
    fn test_validate_rejects_bad_timing() {
        let config = IcpPlannerConfig::default();
        assert!(straight_plan(3).validate(&config).is_ok());

        let mut plan = straight_plan(3);
        plan.steps[1].timing.swing_duration = 0.0;
        assert!(matches!(
            plan.validate(&config),
            Err(ConfigurationFault::InvalidTiming { step: 1, field: "swing_duration", .. })
        ));

        let mut plan = straight_plan(2);
        plan.steps[0].timing.transfer_duration = -0.1;
        assert!(matches!(
            plan.validate(&config),
            Err(ConfigurationFault::InvalidTiming { field: "transfer_duration", .. })
        ));

        // Longer than max_step_duration
        let mut plan = straight_plan(2);
        plan.steps[1].timing.swing_duration = 6.0;
        assert!(matches!(
            plan.validate(&config),
            Err(ConfigurationFault::InvalidTiming { step: 1, field: "swing_duration", .. })
        ));

        let mut plan = straight_plan(2);
        plan.steps[0].timing.transfer_duration = 6.0;
        assert!(matches!(
            plan.validate(&config),
            Err(ConfigurationFault::InvalidTiming { step: 0, field: "transfer_duration", .. })
        ));

        // The bound itself is accepted
        let mut plan = straight_plan(1);
        plan.steps[0].timing.swing_duration = config.max_step_duration;
        assert!(plan.validate(&config).is_ok());

        // Zero-length double support is a boundary, not a fault
        let mut plan = straight_plan(2);
        plan.steps[0].timing.transfer_duration = 0.0;
        assert!(plan.validate(&config).is_ok());

        let mut plan = straight_plan(1);
        plan.steps[0].timing.swing_split_fraction = 1.0;
        assert!(matches!(
            plan.validate(&config),
            Err(ConfigurationFault::InvalidSplitFraction { .. })
        ));

        let mut plan = straight_plan(1);
        plan.steps[0].footstep.position.x = f64::NAN;
        assert!(matches!(plan.validate(&config), Err(ConfigurationFault::NonFinitePlan(_))));
    }
}
