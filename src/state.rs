use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::dynamics::ComHeightSource;
use crate::gait::Footstep;

/// Instantaneous capture point position and velocity on the ground plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IcpState {
    /// ICP position [x, y] (m)
    pub position: na::Vector2<f64>,

    /// ICP velocity [vx, vy] (m/s)
    pub velocity: na::Vector2<f64>,
}

impl IcpState {
    pub fn new(position: na::Vector2<f64>, velocity: na::Vector2<f64>) -> Self {
        Self { position, velocity }
    }

    /// A capture point that is not moving
    pub fn at_rest(position: na::Vector2<f64>) -> Self {
        Self {
            position,
            velocity: na::Vector2::zeros(),
        }
    }

    /// Express this state in the sole frame of `foothold` (x forward along the foot yaw)
    pub fn relative_to(&self, foothold: &Footstep) -> Self {
        let to_sole = na::Rotation2::new(-foothold.yaw);
        Self {
            position: to_sole * (self.position - foothold.position),
            velocity: to_sole * self.velocity,
        }
    }
}

/// Snapshot of the estimated robot state, refreshed once per control tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEstimate {
    /// Center of Mass position [x, y, z]
    pub com_position: na::Vector3<f64>,

    /// Center of Mass velocity [vx, vy, vz]
    pub com_velocity: na::Vector3<f64>,

    /// Pelvis orientation in world
    pub orientation: na::UnitQuaternion<f64>,
}

impl StateEstimate {
    pub fn standing(com_height: f64) -> Self {
        Self {
            com_position: na::Vector3::new(0.0, 0.0, com_height),
            com_velocity: na::Vector3::zeros(),
            orientation: na::UnitQuaternion::identity(),
        }
    }

    pub fn com_xy(&self) -> na::Vector2<f64> {
        self.com_position.xy()
    }

    pub fn com_velocity_xy(&self) -> na::Vector2<f64> {
        self.com_velocity.xy()
    }

    /// Heading of the pelvis about the vertical axis (rad)
    pub fn yaw(&self) -> f64 {
        self.orientation.euler_angles().2
    }
}

impl ComHeightSource for StateEstimate {
    fn com_height(&self) -> f64 {
        self.com_position.z
    }
}
