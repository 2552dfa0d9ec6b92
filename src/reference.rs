use std::sync::Arc;

use nalgebra as na;
use tracing::{debug, info, warn};

use crate::config::IcpPlannerConfig;
use crate::dynamics::{cmp_from_icp, ComHeightSource, NaturalFrequency};
use crate::error::Result;
use crate::gait::{Footstep, FootstepPlan, SupportPhase};
use crate::recursion::RecursionMultiplierChain;
use crate::segment::{IcpSegment, SegmentAnchors, SwingSegmentMatrices, TransferSegmentMatrices};
use crate::state::IcpState;

/// Output of one control tick, consumed by the balance controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpReference {
    /// Desired ICP position [x, y]
    pub position: na::Vector2<f64>,
    /// Desired ICP velocity [vx, vy]
    pub velocity: na::Vector2<f64>,
    /// CMP that reproduces the desired ICP velocity (feed-forward)
    pub cmp: na::Vector2<f64>,
    /// Part of the step cycle the reference came from
    pub segment: IcpSegment,
}

impl IcpReference {
    fn at_rest(position: na::Vector2<f64>) -> Self {
        Self {
            position,
            velocity: na::Vector2::zeros(),
            cmp: position,
            segment: IcpSegment::Standstill,
        }
    }

    pub fn state(&self) -> IcpState {
        IcpState::new(self.position, self.velocity)
    }

    /// Same reference expressed in the sole frame of `foothold`
    pub fn relative_to(&self, foothold: &Footstep) -> Self {
        let local = self.state().relative_to(foothold);
        let to_sole = na::Rotation2::new(-foothold.yaw);
        Self {
            position: local.position,
            velocity: local.velocity,
            cmp: to_sole * (self.cmp - foothold.position),
            segment: self.segment,
        }
    }
}

/// Generates the ICP reference trajectory from the current footstep plan.
///
/// Plan snapshots are ingested with [`submit_plan`](Self::submit_plan), which
/// validates them and rebuilds the recursion only when something changed.
/// [`compute`](Self::compute) is called every control tick; it never fails,
/// never allocates, and only evaluates the segment matrices prepared at the
/// last rebuild.
pub struct IcpReferenceGenerator {
    config: IcpPlannerConfig,
    omega: NaturalFrequency,
    plan: Arc<FootstepPlan>,

    chain: RecursionMultiplierChain,
    transfer: TransferSegmentMatrices,
    swing: SwingSegmentMatrices,
    transfer_anchors: SegmentAnchors,
    swing_anchors: SegmentAnchors,

    segment: IcpSegment,
    rebuilds: u64,
}

impl IcpReferenceGenerator {
    pub fn new(
        config: IcpPlannerConfig,
        plan: Arc<FootstepPlan>,
        omega: NaturalFrequency,
    ) -> Result<Self> {
        config.validate()?;

        let mut generator = Self {
            config,
            omega,
            plan: Arc::clone(&plan),
            chain: RecursionMultiplierChain::new(),
            transfer: TransferSegmentMatrices::new(),
            swing: SwingSegmentMatrices::new(),
            transfer_anchors: SegmentAnchors::zeros(),
            swing_anchors: SegmentAnchors::zeros(),
            segment: IcpSegment::Transfer,
            rebuilds: 0,
        };
        generator.rebuild(plan, omega)?;
        Ok(generator)
    }

    /// Hand over a new plan snapshot.
    ///
    /// Returns `Ok(true)` when the recursion was rebuilt and `Ok(false)` when
    /// neither the plan nor the natural frequency changed. On a fault the
    /// previous plan stays in service.
    pub fn submit_plan(&mut self, plan: Arc<FootstepPlan>, omega: NaturalFrequency) -> Result<bool> {
        let same_plan = Arc::ptr_eq(&self.plan, &plan) || *self.plan == *plan;
        if same_plan && omega == self.omega {
            return Ok(false);
        }

        self.rebuild(plan, omega).map(|_| true)
    }

    /// Switch to a new natural frequency, keeping the current plan
    pub fn set_natural_frequency(&mut self, omega: NaturalFrequency) -> Result<bool> {
        if omega == self.omega {
            return Ok(false);
        }
        let plan = Arc::clone(&self.plan);
        self.rebuild(plan, omega).map(|_| true)
    }

    /// Re-derive the natural frequency from the estimator's COM height
    pub fn update_natural_frequency<S: ComHeightSource + ?Sized>(&mut self, source: &S) -> Result<bool> {
        let omega = NaturalFrequency::from_source(source, self.config.gravity)?;
        self.set_natural_frequency(omega)
    }

    fn rebuild(&mut self, plan: Arc<FootstepPlan>, omega: NaturalFrequency) -> Result<()> {
        // Leaving standstill: start walking from where the reference rests
        let resume_from = (self.segment == IcpSegment::Standstill)
            .then(|| IcpReference::at_rest(self.chain.final_icp()));

        if let Err(fault) = self.chain.build(omega, &plan, &self.config) {
            warn!(%fault, "rejected footstep plan, keeping the last valid reference");
            return Err(fault);
        }

        self.plan = plan;
        self.omega = omega;
        self.prepare_current_step(resume_from);
        self.segment = if self.chain.num_steps() == 0 {
            IcpSegment::Standstill
        } else {
            IcpSegment::Transfer
        };
        self.rebuilds += 1;

        info!(
            steps = self.plan.num_steps(),
            horizon = self.chain.num_steps(),
            omega = omega.value(),
            "accepted footstep plan"
        );
        Ok(())
    }

    /// Anchor the transfer and swing matrices of the step being executed.
    ///
    /// With `resume_from` set the transfer starts at that reference instead of
    /// the recursion's transfer-start ICP.
    fn prepare_current_step(&mut self, resume_from: Option<IcpReference>) {
        self.transfer.reset();
        self.swing.reset();

        let anchors = (
            self.plan.steps.first().map(|step| step.timing),
            self.chain.transfer_start_icp(0),
            self.chain.swing_start_icp(0),
            self.chain.swing_end_icp(0),
            self.chain.trailing_exit_cmp(0),
            self.chain.entry_cmp(0),
            self.chain.exit_cmp(0),
        );
        let (
            Some(timing),
            Some(transfer_start),
            Some(swing_start),
            Some(swing_end),
            Some(trailing),
            Some(entry),
            Some(exit),
        ) = anchors
        else {
            debug!("no upcoming step, holding the final capture point");
            return;
        };

        let (start_icp, start_cmp) = match resume_from {
            Some(rest) => (rest.position, cmp_from_icp(&rest.state(), self.omega)),
            None => (transfer_start, trailing),
        };
        self.transfer_anchors = SegmentAnchors {
            start_icp,
            end_icp: swing_start,
            start_cmp,
            end_cmp: entry,
        };
        self.swing_anchors = SegmentAnchors {
            start_icp: swing_start,
            end_icp: swing_end,
            start_cmp: entry,
            end_cmp: exit,
        };

        self.transfer
            .compute(self.omega, timing.transfer_duration, &self.transfer_anchors);
        self.swing
            .compute(self.omega, &timing, self.config.swing_spline_duration);

        debug!(
            transfer = timing.transfer_duration,
            swing = timing.swing_duration,
            start_of_spline = self.swing.start_of_spline(),
            end_of_spline = self.swing.end_of_spline(),
            "prepared step segments"
        );
    }

    /// Reference for the current tick.
    ///
    /// `time_in_phase` is clamped into the phase duration. With no step
    /// planned the reference rests at the final capture point whatever the
    /// phase.
    pub fn compute(&mut self, phase: SupportPhase, time_in_phase: f64) -> IcpReference {
        if self.chain.num_steps() == 0 {
            self.segment = IcpSegment::Standstill;
            return IcpReference::at_rest(self.chain.final_icp());
        }

        let t = time_in_phase.max(0.0);
        let state = match phase {
            SupportPhase::Transfer => {
                self.segment = IcpSegment::Transfer;
                self.transfer.evaluate(t)
            }
            SupportPhase::Swing => {
                let segment = self.swing.subsegment(t.min(self.swing.duration()));
                if segment == IcpSegment::SwingSpline && self.segment != IcpSegment::SwingSpline {
                    self.swing.invalidate_spline();
                }
                self.segment = segment;
                self.swing.evaluate(self.omega, t, &self.swing_anchors)
            }
        };

        IcpReference {
            position: state.position,
            velocity: state.velocity,
            cmp: cmp_from_icp(&state, self.omega),
            segment: self.segment,
        }
    }

    pub fn config(&self) -> &IcpPlannerConfig {
        &self.config
    }

    pub fn omega(&self) -> NaturalFrequency {
        self.omega
    }

    pub fn plan(&self) -> &Arc<FootstepPlan> {
        &self.plan
    }

    pub fn chain(&self) -> &RecursionMultiplierChain {
        &self.chain
    }

    /// Segment reported by the last call to [`compute`](Self::compute)
    pub fn segment(&self) -> IcpSegment {
        self.segment
    }

    /// Number of times the recursion has been (re)built
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Foothold the swing foot is heading for
    pub fn upcoming_footstep(&self) -> Result<&Footstep> {
        self.plan.next_step().map(|step| &step.footstep)
    }

    /// Duration of the given phase of the current step, zero when standing
    pub fn phase_duration(&self, phase: SupportPhase) -> f64 {
        match (phase, self.plan.steps.first()) {
            (SupportPhase::Transfer, Some(step)) => step.timing.transfer_duration,
            (SupportPhase::Swing, Some(step)) => step.timing.swing_duration,
            (_, None) => 0.0,
        }
    }
}
