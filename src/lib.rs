//! Capture point dynamics for biped walking.
//!
//! Turns a footstep plan and its step timing into the instantaneous capture
//! point (ICP) reference a balance controller tracks:
//!
//! 1. **Dynamics**: the linear inverted pendulum's exponential ICP law
//! 2. **Segment matrices**: ICP state inside a transfer or swing segment as a
//!    linear function of the segment's boundary inputs
//! 3. **Recursion**: required ICP at every step in a bounded horizon, folded
//!    backward from a terminal steady-state capture point
//! 4. **Reference generator**: per-tick evaluation that rebuilds only when the
//!    plan or the natural frequency changes and never allocates otherwise

pub mod config;
pub mod dynamics;
pub mod error;
pub mod gait;
pub mod recursion;
pub mod reference;
pub mod segment;
pub mod state;

pub use config::{IcpPlannerConfig, MAX_HORIZON};
pub use dynamics::{
    capture_point, cmp_from_icp, propagate, propagate_derivative, propagate_with_cmp,
    ComHeightSource, NaturalFrequency, DEFAULT_GRAVITY,
};
pub use error::{ConfigurationFault, Result};
pub use gait::{Foot, Footstep, FootstepPlan, PlannedStep, StepTiming, SupportPhase};
pub use recursion::{RecursionMultiplierChain, StepMultipliers};
pub use reference::{IcpReference, IcpReferenceGenerator};
pub use segment::{
    CmpProjection, FinalIcpProjection, IcpSegment, InitialIcpProjection, SegmentAnchors,
    SplineBoundary, SwingSegmentMatrices, TransferSegmentMatrices,
};
pub use state::{IcpState, StateEstimate};
