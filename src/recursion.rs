//! Backward recursion of the required capture point over the step horizon.
//!
//! Each step cycle is approximated by four constant-CMP intervals, in time
//! order:
//!
//! ```text
//! beta * T_transfer         trailing foothold, exit CMP
//! (1 - beta) * T_transfer   support foothold, entry CMP
//! alpha * T_swing           support foothold, entry CMP
//! (1 - alpha) * T_swing     support foothold, exit CMP
//! ```
//!
//! Over an interval of length `tau` on CMP `r` the ICP satisfies
//! `xi_start = exp(-w tau) xi_end + (1 - exp(-w tau)) r`, so the ICP at the
//! start of any step is an affine combination of the CMPs that follow it and
//! of the terminal capture point. The chain starts from the terminal ICP and
//! folds the steps in backward.

use nalgebra as na;
use tracing::debug;

use crate::config::{IcpPlannerConfig, MAX_HORIZON};
use crate::dynamics::NaturalFrequency;
use crate::error::Result;
use crate::gait::{FootstepPlan, StepTiming};

/// CMP slots: the trailing foothold's exit CMP, then entry and exit CMPs of
/// every support foothold in the horizon.
pub const MAX_CMP_SLOTS: usize = 1 + 2 * MAX_HORIZON;

/// Backward map of one step cycle, from the ICP at touchdown to the ICP at
/// the start of the preceding transfer. The four weights sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepMultipliers {
    /// Weight of the ICP at the end of the swing
    pub projection: f64,
    /// Weight of the trailing foothold's exit CMP
    pub previous_exit: f64,
    /// Weight of the support foothold's entry CMP
    pub entry: f64,
    /// Weight of the support foothold's exit CMP
    pub exit: f64,

    /// Same map restricted to the swing: touchdown ICP to liftoff ICP
    pub swing_projection: f64,
    pub swing_entry: f64,
    pub swing_exit: f64,
}

impl StepMultipliers {
    pub fn compute(omega: NaturalFrequency, timing: &StepTiming, transfer_split_fraction: f64) -> Self {
        let d1 = omega.decay(transfer_split_fraction * timing.transfer_duration);
        let d2 = omega.decay((1.0 - transfer_split_fraction) * timing.transfer_duration);
        let d3 = omega.decay(timing.swing_split_fraction * timing.swing_duration);
        let d4 = omega.decay((1.0 - timing.swing_split_fraction) * timing.swing_duration);

        Self {
            projection: d1 * d2 * d3 * d4,
            previous_exit: 1.0 - d1,
            entry: d1 * (1.0 - d2 * d3),
            exit: d1 * d2 * d3 * (1.0 - d4),
            swing_projection: d3 * d4,
            swing_entry: 1.0 - d3,
            swing_exit: d3 * (1.0 - d4),
        }
    }
}

#[inline]
fn previous_exit_slot(step: usize) -> usize {
    2 * step
}

#[inline]
fn entry_slot(step: usize) -> usize {
    2 * step + 1
}

#[inline]
fn exit_slot(step: usize) -> usize {
    2 * step + 2
}

/// Recursion multipliers and required capture points for the steps in the
/// horizon.
///
/// Row `k` of the multipliers expresses the ICP required at the start of step
/// `k` (start of its transfer) as
/// `sum_s cmp_multipliers[k][s] * cmp[s] + final_multiplier[k] * final_icp`.
/// Row `num_steps` is the terminal condition itself.
#[derive(Debug, Clone)]
pub struct RecursionMultiplierChain {
    omega: Option<NaturalFrequency>,
    num_steps: usize,
    truncated: bool,
    steps: [StepMultipliers; MAX_HORIZON],
    cmp_multipliers: [[f64; MAX_CMP_SLOTS]; MAX_HORIZON + 1],
    final_multipliers: [f64; MAX_HORIZON + 1],
    cmps: [na::Vector2<f64>; MAX_CMP_SLOTS],
    final_icp: na::Vector2<f64>,
    required: [na::Vector2<f64>; MAX_HORIZON + 1],
}

impl Default for RecursionMultiplierChain {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursionMultiplierChain {
    pub fn new() -> Self {
        Self {
            omega: None,
            num_steps: 0,
            truncated: false,
            steps: [StepMultipliers::default(); MAX_HORIZON],
            cmp_multipliers: [[0.0; MAX_CMP_SLOTS]; MAX_HORIZON + 1],
            final_multipliers: [0.0; MAX_HORIZON + 1],
            cmps: [na::Vector2::zeros(); MAX_CMP_SLOTS],
            final_icp: na::Vector2::zeros(),
            required: [na::Vector2::zeros(); MAX_HORIZON + 1],
        }
    }

    /// Rebuild for `plan`. On a configuration fault nothing is modified.
    pub fn build(
        &mut self,
        omega: NaturalFrequency,
        plan: &FootstepPlan,
        config: &IcpPlannerConfig,
    ) -> Result<()> {
        config.validate()?;
        plan.validate(config)?;

        let n = plan.num_steps().min(config.horizon);
        self.omega = Some(omega);
        self.num_steps = n;
        self.truncated = plan.num_steps() > config.horizon;

        self.load_cmps(plan, config, n);
        self.final_icp = if self.truncated {
            // Steady state over the last foothold in the horizon
            plan.foothold(n + 1)
                .map(|f| f.cmp(&config.entry_cmp_offset))
                .unwrap_or_else(|| plan.resting_icp())
        } else {
            plan.resting_icp()
        };

        for (k, step) in plan.steps.iter().take(n).enumerate() {
            self.steps[k] = StepMultipliers::compute(omega, &step.timing, config.transfer_split_fraction);
        }
        self.steps[n..].fill(StepMultipliers::default());

        self.recurse_backward();
        self.evaluate_required();

        debug!(
            steps = n,
            truncated = self.truncated,
            omega = omega.value(),
            final_x = self.final_icp.x,
            final_y = self.final_icp.y,
            "rebuilt recursion multipliers"
        );
        Ok(())
    }

    fn load_cmps(&mut self, plan: &FootstepPlan, config: &IcpPlannerConfig, n: usize) {
        self.cmps = [na::Vector2::zeros(); MAX_CMP_SLOTS];
        self.cmps[0] = plan.trailing.cmp(&config.exit_cmp_offset);
        for k in 0..n {
            if let Some(support) = plan.foothold(k + 1) {
                self.cmps[entry_slot(k)] = support.cmp(&config.entry_cmp_offset);
                self.cmps[exit_slot(k)] = support.cmp(&config.exit_cmp_offset);
            }
        }
    }

    fn recurse_backward(&mut self) {
        let n = self.num_steps;
        self.cmp_multipliers = [[0.0; MAX_CMP_SLOTS]; MAX_HORIZON + 1];
        self.final_multipliers = [0.0; MAX_HORIZON + 1];
        self.final_multipliers[n] = 1.0;

        for k in (0..n).rev() {
            let step = self.steps[k];
            let (head, tail) = self.cmp_multipliers.split_at_mut(k + 1);
            let row = &mut head[k];
            for (weight, later) in row.iter_mut().zip(tail[0].iter()) {
                *weight = step.projection * later;
            }
            row[previous_exit_slot(k)] += step.previous_exit;
            row[entry_slot(k)] += step.entry;
            row[exit_slot(k)] += step.exit;
            self.final_multipliers[k] = step.projection * self.final_multipliers[k + 1];
        }
    }

    fn evaluate_required(&mut self) {
        let slots = self.active_slots();
        for k in 0..=self.num_steps {
            let mut icp = self.final_multipliers[k] * self.final_icp;
            for s in 0..slots {
                icp += self.cmp_multipliers[k][s] * self.cmps[s];
            }
            self.required[k] = icp;
        }
    }

    fn active_slots(&self) -> usize {
        if self.num_steps == 0 {
            0
        } else {
            1 + 2 * self.num_steps
        }
    }

    /// Natural frequency the chain was built for, `None` before the first build
    pub fn omega(&self) -> Option<NaturalFrequency> {
        self.omega
    }

    /// Steps folded into the recursion (at most the horizon)
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// True when the plan is longer than the horizon and the terminal ICP is
    /// the steady state over the last foothold in the horizon
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn final_icp(&self) -> na::Vector2<f64> {
        self.final_icp
    }

    pub fn step_multipliers(&self, step: usize) -> Option<&StepMultipliers> {
        self.steps[..self.num_steps].get(step)
    }

    /// CMP weights of the ICP required at the start of `step`
    pub fn cmp_multipliers(&self, step: usize) -> Option<&[f64]> {
        let slots = self.active_slots();
        self.cmp_multipliers[..=self.num_steps]
            .get(step)
            .map(|row| &row[..slots])
    }

    /// Terminal ICP weight of the ICP required at the start of `step`
    pub fn final_multiplier(&self, step: usize) -> Option<f64> {
        self.final_multipliers[..=self.num_steps].get(step).copied()
    }

    /// CMP positions in slot order
    pub fn cmps(&self) -> &[na::Vector2<f64>] {
        &self.cmps[..self.active_slots()]
    }

    /// ICP required at the start of `step`'s transfer. `step == num_steps()`
    /// gives the terminal ICP.
    pub fn transfer_start_icp(&self, step: usize) -> Option<na::Vector2<f64>> {
        self.required[..=self.num_steps].get(step).copied()
    }

    /// ICP required at liftoff of `step`
    pub fn swing_start_icp(&self, step: usize) -> Option<na::Vector2<f64>> {
        let multipliers = self.step_multipliers(step)?;
        Some(
            multipliers.swing_projection * self.required[step + 1]
                + multipliers.swing_entry * self.cmps[entry_slot(step)]
                + multipliers.swing_exit * self.cmps[exit_slot(step)],
        )
    }

    /// ICP required at touchdown of `step`
    pub fn swing_end_icp(&self, step: usize) -> Option<na::Vector2<f64>> {
        if step < self.num_steps {
            Some(self.required[step + 1])
        } else {
            None
        }
    }

    pub fn trailing_exit_cmp(&self, step: usize) -> Option<na::Vector2<f64>> {
        (step < self.num_steps).then(|| self.cmps[previous_exit_slot(step)])
    }

    pub fn entry_cmp(&self, step: usize) -> Option<na::Vector2<f64>> {
        (step < self.num_steps).then(|| self.cmps[entry_slot(step)])
    }

    pub fn exit_cmp(&self, step: usize) -> Option<na::Vector2<f64>> {
        (step < self.num_steps).then(|| self.cmps[exit_slot(step)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::propagate_with_cmp;
    use crate::error::ConfigurationFault;
    use crate::gait::{Foot, Footstep, PlannedStep};
    use approx::assert_relative_eq;

    fn walking_plan(num_steps: usize) -> FootstepPlan {
        let left = Footstep::new(Foot::Left, na::Vector2::new(0.0, 0.1), 0.0);
        let right = Footstep::new(Foot::Right, na::Vector2::new(0.0, -0.1), 0.0);
        let steps = (0..num_steps)
            .map(|i| {
                let foot = if i % 2 == 0 { Foot::Left } else { Foot::Right };
                let y = if foot == Foot::Left { 0.1 } else { -0.1 };
                PlannedStep {
                    footstep: Footstep::new(foot, na::Vector2::new(0.25 * (i + 1) as f64, y), 0.05 * i as f64),
                    timing: StepTiming {
                        swing_duration: 0.6 + 0.05 * i as f64,
                        transfer_duration: 0.15,
                        swing_split_fraction: 0.4,
                    },
                }
            })
            .collect();
        FootstepPlan::standing(left, right).with_steps(steps)
    }

    fn chain_for(plan: &FootstepPlan, horizon: usize, omega: f64) -> RecursionMultiplierChain {
        let config = IcpPlannerConfig {
            horizon,
            ..Default::default()
        };
        let mut chain = RecursionMultiplierChain::new();
        chain
            .build(NaturalFrequency::new(omega).unwrap(), plan, &config)
            .unwrap();
        chain
    }

    #[test]
    fn test_standing_plan_is_fixed_point() {
        let plan = walking_plan(0).with_final_icp(na::Vector2::new(0.013, -0.004));
        let chain = chain_for(&plan, 3, 3.3);

        assert_eq!(chain.num_steps(), 0);
        assert_eq!(chain.transfer_start_icp(0), Some(na::Vector2::new(0.013, -0.004)));
        assert_eq!(chain.final_multiplier(0), Some(1.0));
        assert_eq!(chain.cmp_multipliers(0), Some(&[][..]));
        assert_eq!(chain.swing_start_icp(0), None);
    }

    #[test]
    fn test_step_weights_sum_to_one() {
        let omega = NaturalFrequency::new(3.1).unwrap();
        let timing = StepTiming {
            swing_duration: 0.7,
            transfer_duration: 0.25,
            swing_split_fraction: 0.3,
        };
        let m = StepMultipliers::compute(omega, &timing, 0.5);
        assert_relative_eq!(m.projection + m.previous_exit + m.entry + m.exit, 1.0, epsilon = 1e-12);
        assert_relative_eq!(m.swing_projection + m.swing_entry + m.swing_exit, 1.0, epsilon = 1e-12);
        assert_relative_eq!(m.projection, omega.decay(0.95), epsilon = 1e-12);

        let chain = chain_for(&walking_plan(3), 3, 3.1);
        for k in 0..=3 {
            let total: f64 = chain.cmp_multipliers(k).unwrap().iter().sum::<f64>()
                + chain.final_multiplier(k).unwrap();
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_recursion_agrees_with_forward_propagation() {
        let plan = walking_plan(3);
        let config = IcpPlannerConfig::default();
        let chain = chain_for(&plan, 3, 3.3);
        let omega = chain.omega().unwrap();
        let beta = config.transfer_split_fraction;

        for k in 0..chain.num_steps() {
            let timing = plan.steps[k].timing;
            let trailing = chain.trailing_exit_cmp(k).unwrap();
            let entry = chain.entry_cmp(k).unwrap();
            let exit = chain.exit_cmp(k).unwrap();

            let mut icp = chain.transfer_start_icp(k).unwrap();
            icp = propagate_with_cmp(&icp, &trailing, omega, beta * timing.transfer_duration).position;
            icp = propagate_with_cmp(&icp, &entry, omega, (1.0 - beta) * timing.transfer_duration).position;
            assert_relative_eq!(icp, chain.swing_start_icp(k).unwrap(), epsilon = 1e-9);

            let alpha = timing.swing_split_fraction;
            icp = propagate_with_cmp(&icp, &entry, omega, alpha * timing.swing_duration).position;
            icp = propagate_with_cmp(&icp, &exit, omega, (1.0 - alpha) * timing.swing_duration).position;
            assert_relative_eq!(icp, chain.swing_end_icp(k).unwrap(), epsilon = 1e-9);
            assert_relative_eq!(icp, chain.transfer_start_icp(k + 1).unwrap(), epsilon = 1e-9);
        }
        assert_eq!(chain.transfer_start_icp(3), Some(plan.resting_icp()));
    }

    #[test]
    fn test_horizon_padding_changes_nothing() {
        let plan = walking_plan(2);
        let reference = chain_for(&plan, 2, 3.3);
        for horizon in 3..=MAX_HORIZON {
            let padded = chain_for(&plan, horizon, 3.3);
            assert_eq!(padded.num_steps(), reference.num_steps());
            assert!(!padded.is_truncated());
            for k in 0..=2 {
                assert_eq!(padded.cmp_multipliers(k), reference.cmp_multipliers(k));
                assert_eq!(padded.final_multiplier(k), reference.final_multiplier(k));
                assert_eq!(padded.transfer_start_icp(k), reference.transfer_start_icp(k));
            }
        }
    }

    #[test]
    fn test_truncated_horizon_ends_on_last_foothold() {
        let plan = walking_plan(4);
        let config = IcpPlannerConfig {
            horizon: 2,
            ..Default::default()
        };
        let chain = chain_for(&plan, 2, 3.3);

        assert!(chain.is_truncated());
        assert_eq!(chain.num_steps(), 2);
        // Trailing exit plus entry and exit of the two support footholds
        assert_eq!(chain.cmps().len(), 5);
        assert_eq!(chain.cmps()[0], plan.trailing.cmp(&config.exit_cmp_offset));
        assert_eq!(chain.cmps()[3], plan.steps[0].footstep.cmp(&config.entry_cmp_offset));
        let expected = plan.steps[1].footstep.cmp(&config.entry_cmp_offset);
        assert_eq!(chain.final_icp(), expected);
        assert_eq!(chain.transfer_start_icp(2), Some(expected));
    }

    #[test]
    fn test_far_cmps_weigh_less() {
        let chain = chain_for(&walking_plan(3), 3, 3.3);
        let row = chain.cmp_multipliers(0).unwrap();
        // Entry CMPs of successive footholds
        assert!(row[entry_slot(0)] > row[entry_slot(1)]);
        assert!(row[entry_slot(1)] > row[entry_slot(2)]);
        assert!(chain.final_multiplier(0).unwrap() < chain.final_multiplier(1).unwrap());
    }

    #[test]
    fn test_new_frequency_changes_coefficients() {
        let plan = walking_plan(2);
        let slow = chain_for(&plan, 3, 2.5);
        let fast = chain_for(&plan, 3, 4.0);
        assert!(fast.final_multiplier(0).unwrap() < slow.final_multiplier(0).unwrap());
        assert_ne!(fast.transfer_start_icp(0), slow.transfer_start_icp(0));
    }

    #[test]
    fn test_invalid_plan_leaves_chain_untouched() {
        let good = walking_plan(2);
        let mut chain = chain_for(&good, 3, 3.3);
        let before = chain.transfer_start_icp(0);

        let mut bad = walking_plan(3);
        bad.steps[2].timing.swing_duration = -0.4;
        let result = chain.build(
            NaturalFrequency::new(3.3).unwrap(),
            &bad,
            &IcpPlannerConfig::default(),
        );
        assert!(matches!(result, Err(ConfigurationFault::InvalidTiming { step: 2, .. })));
        assert_eq!(chain.num_steps(), 2);
        assert_eq!(chain.transfer_start_icp(0), before);
    }
}
