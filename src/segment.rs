//! Segment matrices of the capture point trajectory.
//!
//! Every matrix here uses the same four-row layout:
//!
//! ```text
//! row 0: ICP position at the start of the window
//! row 1: ICP velocity at the start of the window
//! row 2: ICP position at the end of the window
//! row 3: ICP velocity at the end of the window
//! ```
//!
//! A window is either a whole segment (transfer) or the spline-blended part of
//! a swing. Each matrix maps one of the segment's boundary inputs (initial
//! ICP, final ICP, start/end CMP) onto those four rows, so the boundary block
//! of a window is the sum of the individual contributions. The coefficients
//! are scalar: the same weights apply to the x and y axes.
//!
//! Matrices are fixed-size and recomputed from scratch (`reset` then
//! `compute`), never incrementally updated. Each remembers the scalar inputs
//! it was last computed with and skips the work when they did not change.

use nalgebra as na;

use crate::dynamics::NaturalFrequency;
use crate::gait::StepTiming;
use crate::state::IcpState;

const START_POSITION: usize = 0;
const START_VELOCITY: usize = 1;
const END_POSITION: usize = 2;
const END_VELOCITY: usize = 3;

/// Part of the step cycle the reference is currently following
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpSegment {
    /// Double support, cubic spline between the transfer boundary states
    Transfer,
    /// Single support on the entry CMP, closed-form exponential
    SwingPreSpline,
    /// Single support, cubic spline blending entry into exit CMP
    SwingSpline,
    /// Single support on the exit CMP, closed-form exponential
    SwingPostSpline,
    /// No step planned, the ICP rests at the final capture point
    Standstill,
}

/// Boundary inputs of one segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentAnchors {
    /// ICP when the segment starts
    pub start_icp: na::Vector2<f64>,
    /// ICP required when the segment ends
    pub end_icp: na::Vector2<f64>,
    /// CMP held at the start of the segment
    pub start_cmp: na::Vector2<f64>,
    /// CMP held at the end of the segment
    pub end_cmp: na::Vector2<f64>,
}

impl SegmentAnchors {
    pub fn zeros() -> Self {
        Self {
            start_icp: na::Vector2::zeros(),
            end_icp: na::Vector2::zeros(),
            start_cmp: na::Vector2::zeros(),
            end_cmp: na::Vector2::zeros(),
        }
    }
}

/// Projection of the segment's initial ICP forward to a time after segment
/// start: `[exp(w t), w exp(w t), 0, 0]`.
#[derive(Debug, Clone)]
pub struct InitialIcpProjection {
    matrix: na::Vector4<f64>,
    inputs: Option<(f64, f64)>,
}

impl Default for InitialIcpProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl InitialIcpProjection {
    pub fn new() -> Self {
        Self {
            matrix: na::Vector4::zeros(),
            inputs: None,
        }
    }

    pub fn reset(&mut self) {
        self.matrix.fill(0.0);
        self.inputs = None;
    }

    pub fn compute(&mut self, omega: NaturalFrequency, time_from_start: f64) {
        let inputs = Some((omega.value(), time_from_start));
        if self.inputs == inputs {
            return;
        }

        let projection = omega.growth(time_from_start);

        self.matrix.fill(0.0);
        self.matrix[START_POSITION] = projection;
        self.matrix[START_VELOCITY] = omega.value() * projection;
        self.inputs = inputs;
    }

    pub fn matrix(&self) -> &na::Vector4<f64> {
        &self.matrix
    }

    pub fn position(&self) -> f64 {
        self.matrix[START_POSITION]
    }

    pub fn velocity(&self) -> f64 {
        self.matrix[START_VELOCITY]
    }

    /// Projection over `time_from_start` followed by `other`: position
    /// factors multiply, the velocity row picks up the later factor.
    pub fn then(&self, other: &Self) -> na::Vector2<f64> {
        na::Vector2::new(
            self.position() * other.position(),
            self.position() * other.velocity(),
        )
    }
}

/// Projection of the segment's final ICP backward to a time before segment
/// end: `[0, 0, exp(-w tau), w exp(-w tau)]`.
#[derive(Debug, Clone)]
pub struct FinalIcpProjection {
    matrix: na::Vector4<f64>,
    inputs: Option<(f64, f64)>,
}

impl Default for FinalIcpProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalIcpProjection {
    pub fn new() -> Self {
        Self {
            matrix: na::Vector4::zeros(),
            inputs: None,
        }
    }

    pub fn reset(&mut self) {
        self.matrix.fill(0.0);
        self.inputs = None;
    }

    pub fn compute(&mut self, omega: NaturalFrequency, time_to_end: f64) {
        let inputs = Some((omega.value(), time_to_end));
        if self.inputs == inputs {
            return;
        }

        let projection = omega.decay(time_to_end);

        self.matrix.fill(0.0);
        self.matrix[END_POSITION] = projection;
        self.matrix[END_VELOCITY] = omega.value() * projection;
        self.inputs = inputs;
    }

    pub fn matrix(&self) -> &na::Vector4<f64> {
        &self.matrix
    }

    pub fn position(&self) -> f64 {
        self.matrix[END_POSITION]
    }

    pub fn velocity(&self) -> f64 {
        self.matrix[END_VELOCITY]
    }
}

/// Pull of the segment's CMPs on the ICP.
///
/// Column 0 carries the start CMP forward, `[1 - exp(w t), -w exp(w t)]` in
/// rows 0..2. Column 1 carries the end CMP backward, `[1 - exp(-w tau),
/// -w exp(-w tau)]` in rows 2..4.
#[derive(Debug, Clone)]
pub struct CmpProjection {
    matrix: na::Matrix4x2<f64>,
    inputs: Option<(f64, f64, f64)>,
}

impl Default for CmpProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl CmpProjection {
    pub fn new() -> Self {
        Self {
            matrix: na::Matrix4x2::zeros(),
            inputs: None,
        }
    }

    pub fn reset(&mut self) {
        self.matrix.fill(0.0);
        self.inputs = None;
    }

    pub fn compute(&mut self, omega: NaturalFrequency, time_from_start: f64, time_to_end: f64) {
        let inputs = Some((omega.value(), time_from_start, time_to_end));
        if self.inputs == inputs {
            return;
        }

        let growth = omega.growth(time_from_start);
        let decay = omega.decay(time_to_end);

        self.matrix.fill(0.0);
        self.matrix[(START_POSITION, 0)] = 1.0 - growth;
        self.matrix[(START_VELOCITY, 0)] = -omega.value() * growth;
        self.matrix[(END_POSITION, 1)] = 1.0 - decay;
        self.matrix[(END_VELOCITY, 1)] = -omega.value() * decay;
        self.inputs = inputs;
    }

    pub fn matrix(&self) -> &na::Matrix4x2<f64> {
        &self.matrix
    }
}

/// Sum the contributions of a segment's boundary inputs into a 4x2 block
/// whose columns are the x and y axes.
pub fn boundary_block(
    initial: &InitialIcpProjection,
    terminal: &FinalIcpProjection,
    cmp: &CmpProjection,
    anchors: &SegmentAnchors,
) -> na::Matrix4x2<f64> {
    let cmps = na::Matrix2::from_rows(&[anchors.start_cmp.transpose(), anchors.end_cmp.transpose()]);
    initial.matrix() * anchors.start_icp.transpose()
        + terminal.matrix() * anchors.end_icp.transpose()
        + cmp.matrix() * cmps
}

fn start_state(block: &na::Matrix4x2<f64>) -> IcpState {
    IcpState::new(
        block.row(START_POSITION).transpose(),
        block.row(START_VELOCITY).transpose(),
    )
}

fn end_state(block: &na::Matrix4x2<f64>) -> IcpState {
    IcpState::new(
        block.row(END_POSITION).transpose(),
        block.row(END_VELOCITY).transpose(),
    )
}

/// Cubic Hermite spline through a window's boundary states.
///
/// Computed once when the window is entered; per tick only the time
/// polynomial is evaluated.
#[derive(Debug, Clone)]
pub struct SplineBoundary {
    boundary: na::Matrix4x2<f64>,
    coefficients: na::Matrix4x2<f64>,
    duration: f64,
    ready: bool,
}

impl Default for SplineBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl SplineBoundary {
    pub fn new() -> Self {
        Self {
            boundary: na::Matrix4x2::zeros(),
            coefficients: na::Matrix4x2::zeros(),
            duration: 0.0,
            ready: false,
        }
    }

    pub fn reset(&mut self) {
        self.boundary.fill(0.0);
        self.coefficients.fill(0.0);
        self.duration = 0.0;
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn boundary(&self) -> &na::Matrix4x2<f64> {
        &self.boundary
    }

    /// Fit the spline to `boundary` over `duration` seconds
    pub fn compute(&mut self, boundary: na::Matrix4x2<f64>, duration: f64) {
        self.boundary = boundary;
        self.duration = duration.max(0.0);
        self.coefficients = if self.duration > 0.0 {
            hermite_to_cubic(self.duration) * boundary
        } else {
            na::Matrix4x2::zeros()
        };
        self.ready = true;
    }

    /// ICP state `time_in_window` seconds after the window start. A window of
    /// zero length is crossed instantly and reports its end state.
    pub fn evaluate(&self, time_in_window: f64) -> IcpState {
        if self.duration <= 0.0 {
            return end_state(&self.boundary);
        }

        let s = time_in_window.clamp(0.0, self.duration);
        let s2 = s * s;
        let position = na::RowVector4::new(1.0, s, s2, s2 * s) * self.coefficients;
        let velocity = na::RowVector4::new(0.0, 1.0, 2.0 * s, 3.0 * s2) * self.coefficients;
        IcpState::new(position.transpose(), velocity.transpose())
    }
}

/// Maps `[p0, v0, p1, v1]` onto the coefficients `[a0, a1, a2, a3]` of
/// `p(s) = a0 + a1 s + a2 s^2 + a3 s^3` on `s in [0, duration]`.
#[rustfmt::skip]
fn hermite_to_cubic(duration: f64) -> na::Matrix4<f64> {
    let l = duration;
    let l2 = l * l;
    let l3 = l2 * l;
    na::Matrix4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        -3.0 / l2, -2.0 / l, 3.0 / l2, -1.0 / l,
        2.0 / l3, 1.0 / l2, -2.0 / l3, 1.0 / l2,
    )
}

/// Matrices of a swing segment.
///
/// The swing holds the entry CMP until `start_of_spline`, blends into the
/// exit CMP along a cubic spline until `end_of_spline`, then holds the exit
/// CMP until touchdown. The spline window is centred on the CMP switch at
/// `swing_split_fraction * swing_duration` and clipped to the swing.
#[derive(Debug, Clone, Default)]
pub struct SwingSegmentMatrices {
    duration: f64,
    start_of_spline: f64,
    end_of_spline: f64,

    spline_initial: InitialIcpProjection,
    spline_final: FinalIcpProjection,
    spline_cmp: CmpProjection,
    spline: SplineBoundary,

    query_initial: InitialIcpProjection,
    query_final: FinalIcpProjection,
    query_cmp: CmpProjection,
}

impl SwingSegmentMatrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.duration = 0.0;
        self.start_of_spline = 0.0;
        self.end_of_spline = 0.0;
        self.spline_initial.reset();
        self.spline_final.reset();
        self.spline_cmp.reset();
        self.spline.reset();
        self.query_initial.reset();
        self.query_final.reset();
        self.query_cmp.reset();
    }

    /// Place the spline window and project the boundary inputs onto it
    pub fn compute(&mut self, omega: NaturalFrequency, timing: &StepTiming, spline_duration: f64) {
        self.reset();

        let duration = timing.swing_duration;
        let switch_time = timing.swing_split_fraction * duration;
        let half_window = 0.5 * spline_duration;

        self.duration = duration;
        self.start_of_spline = (switch_time - half_window).max(0.0);
        self.end_of_spline = (switch_time + half_window).min(duration);

        self.spline_initial.compute(omega, self.start_of_spline);
        self.spline_final.compute(omega, duration - self.end_of_spline);
        self.spline_cmp
            .compute(omega, self.start_of_spline, duration - self.end_of_spline);
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn start_of_spline(&self) -> f64 {
        self.start_of_spline
    }

    pub fn end_of_spline(&self) -> f64 {
        self.end_of_spline
    }

    pub fn spline_initial_projection(&self) -> &InitialIcpProjection {
        &self.spline_initial
    }

    pub fn spline_final_projection(&self) -> &FinalIcpProjection {
        &self.spline_final
    }

    pub fn spline_cmp_projection(&self) -> &CmpProjection {
        &self.spline_cmp
    }

    /// Subsegment containing `time_in_swing`
    pub fn subsegment(&self, time_in_swing: f64) -> IcpSegment {
        if time_in_swing < self.start_of_spline {
            IcpSegment::SwingPreSpline
        } else if time_in_swing < self.end_of_spline {
            IcpSegment::SwingSpline
        } else {
            IcpSegment::SwingPostSpline
        }
    }

    /// Drop the fitted spline so the next spline query refits it
    pub fn invalidate_spline(&mut self) {
        self.spline.reset();
    }

    /// ICP state `time_in_swing` seconds after liftoff
    pub fn evaluate(
        &mut self,
        omega: NaturalFrequency,
        time_in_swing: f64,
        anchors: &SegmentAnchors,
    ) -> IcpState {
        let t = time_in_swing.clamp(0.0, self.duration);
        match self.subsegment(t) {
            IcpSegment::SwingSpline => {
                if !self.spline.is_ready() {
                    let block = boundary_block(
                        &self.spline_initial,
                        &self.spline_final,
                        &self.spline_cmp,
                        anchors,
                    );
                    self.spline
                        .compute(block, self.end_of_spline - self.start_of_spline);
                }
                self.spline.evaluate(t - self.start_of_spline)
            }
            segment => {
                self.query_initial.compute(omega, t);
                self.query_final.compute(omega, self.duration - t);
                self.query_cmp.compute(omega, t, self.duration - t);
                let block = boundary_block(
                    &self.query_initial,
                    &self.query_final,
                    &self.query_cmp,
                    anchors,
                );
                if segment == IcpSegment::SwingPreSpline {
                    start_state(&block)
                } else {
                    end_state(&block)
                }
            }
        }
    }
}

/// Matrices of a transfer segment: a single spline spanning double support.
///
/// The boundary states are the recursion's transfer-start and swing-start
/// ICPs, each with the velocity its own CMP induces, which is the projection
/// family evaluated at zero time.
#[derive(Debug, Clone, Default)]
pub struct TransferSegmentMatrices {
    initial: InitialIcpProjection,
    terminal: FinalIcpProjection,
    cmp: CmpProjection,
    spline: SplineBoundary,
}

impl TransferSegmentMatrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.initial.reset();
        self.terminal.reset();
        self.cmp.reset();
        self.spline.reset();
    }

    pub fn compute(&mut self, omega: NaturalFrequency, duration: f64, anchors: &SegmentAnchors) {
        self.reset();
        self.initial.compute(omega, 0.0);
        self.terminal.compute(omega, 0.0);
        self.cmp.compute(omega, 0.0, 0.0);
        let block = boundary_block(&self.initial, &self.terminal, &self.cmp, anchors);
        self.spline.compute(block, duration);
    }

    pub fn duration(&self) -> f64 {
        self.spline.duration()
    }

    pub fn evaluate(&self, time_in_transfer: f64) -> IcpState {
        self.spline.evaluate(time_in_transfer)
    }
}
