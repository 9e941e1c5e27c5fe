//! The fixed chain of frames between the session's world and the camera.
//!
//! ```text
//! World (ENU) ──M──▶ DroneNed ──yaw/pitch/roll──▶ GimbalFrd ──D──▶ Camera (RDF)
//! ```
//!
//! `M` and `D` are axis permutations that never change during a session. Only the middle link
//! comes from telemetry.

use crate::coordinate_systems::{Camera, DroneNed, GimbalFrd, World};
use crate::math::Rotation;
use crate::Matrix3;
use uom::si::f64::Angle;

/// Returns the gimbal attitude reported by telemetry as a rotation out of the drone's level frame.
///
/// Angles are applied intrinsically, yaw first, so the gimbal-to-level matrix is
/// `Rz(yaw) · Ry(pitch) · Rx(roll)`. Pitch is negative when the camera looks below the horizon.
#[must_use]
pub fn yaw_pitch_roll_to_rotation(
    yaw: impl Into<Angle>,
    pitch: impl Into<Angle>,
    roll: impl Into<Angle>,
) -> Rotation<DroneNed, GimbalFrd> {
    // SAFETY: `GimbalFrd` is defined as the frame these angles orient relative to `DroneNed`.
    unsafe { Rotation::from_yaw_pitch_roll(yaw, pitch, roll) }
}

/// The session-constant links of the frame chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameChain {
    world_to_level: Rotation<World, DroneNed>,
    gimbal_to_camera: Rotation<GimbalFrd, Camera>,
}

impl Default for FrameChain {
    /// The standard mounting: ENU world with an NED level frame, and a camera whose optical axis
    /// is the gimbal's front.
    fn default() -> Self {
        // (e, n, u) -> (n, e, -u)
        let world_to_level = Matrix3::new(0., 1., 0., 1., 0., 0., 0., 0., -1.);
        // (f, r, d) -> (r, d, f)
        let gimbal_to_camera = Matrix3::new(0., 1., 0., 0., 0., 1., 1., 0., 0.);

        // SAFETY: these are the axis relations named by the conventions of each system.
        unsafe {
            Self::new(
                Rotation::from_matrix(&world_to_level),
                Rotation::from_matrix(&gimbal_to_camera),
            )
        }
    }
}

impl FrameChain {
    /// Constructs a chain with custom fixed links, eg for a camera mounted off the gimbal's
    /// front axis.
    #[must_use]
    pub fn new(
        world_to_level: Rotation<World, DroneNed>,
        gimbal_to_camera: Rotation<GimbalFrd, Camera>,
    ) -> Self {
        Self {
            world_to_level,
            gimbal_to_camera,
        }
    }

    #[must_use]
    pub fn world_to_level(&self) -> Rotation<World, DroneNed> {
        self.world_to_level
    }

    #[must_use]
    pub fn gimbal_to_camera(&self) -> Rotation<GimbalFrd, Camera> {
        self.gimbal_to_camera
    }

    /// Composes the full world-to-camera rotation for one frame's gimbal attitude.
    ///
    /// ```rust
    /// use sightline::{rig::{yaw_pitch_roll_to_rotation, FrameChain}, systems::Camera, Vector};
    /// use uom::si::{angle::degree, f64::{Angle, Length}, length::meter};
    ///
    /// let d = Angle::new::<degree>;
    /// let m = Length::new::<meter>;
    /// let attitude = yaw_pitch_roll_to_rotation(d(0.), d(-90.), d(0.));
    /// let world_to_camera = FrameChain::default().compose(attitude);
    ///
    /// // looking straight down, the optical axis points at the ground
    /// let optical_axis = Vector::<Camera>::from_cartesian(m(0.), m(0.), m(1.));
    /// let in_world = world_to_camera * optical_axis;
    /// assert!((in_world.enu_up().get::<meter>() + 1.).abs() < 1e-12);
    /// ```
    #[must_use]
    pub fn compose(&self, attitude: Rotation<DroneNed, GimbalFrd>) -> Rotation<World, Camera> {
        self.world_to_level * attitude * self.gimbal_to_camera
    }
}
