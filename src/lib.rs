//! This library turns drone video into geography: given where a drone was and where its gimbal
//! pointed when a frame was captured, it tells you where on the ground any pixel of that frame
//! lies, and it can sharpen that answer using landmarks whose true positions are known.
//!
//! Like any geometry code, most of the work is moving between coordinate systems, and most of the
//! bugs come from mixing them up. So, as in the rest of the crate, points and directions are
//! [`Coordinate`]s and [`Vector`]s generic over a [`CoordinateSystem`], and the transforms between
//! them ([`Rotation`](math::Rotation) and [`RigidBodyTransform`](math::RigidBodyTransform)) only
//! compose when their systems line up. The systems used throughout are in [`systems`]:
//!
//! - [`World`](systems::World): the session's local East-North-Up frame, anchored at a fixed
//!   [`LocalOrigin`](frames::LocalOrigin) on the ground.
//! - [`DroneNed`](systems::DroneNed) and [`GimbalFrd`](systems::GimbalFrd): where the gimbal's
//!   yaw, pitch, and roll are measured from and to.
//! - [`Camera`](systems::Camera): the optical frame (right, down, forward) of the
//!   [pinhole model](camera::CameraIntrinsics).
//!
//! A frame is processed in four steps:
//!
//! 1. [`rig`] composes the gimbal angles from [`telemetry`] into the camera's
//!    [`Pose`](camera::Pose) in the world.
//! 2. [`ray`] casts the ray through a pixel of interest.
//! 3. [`intersect`] finds where that ray meets the ground, which may be a plane, a sphere, or an
//!    elevation raster from [`terrain`].
//! 4. [`projection`] builds the matrices to draw world geometry back over the frame.
//!
//! [`correction`] fixes up the pose when landmarks are visible, and [`session`] wraps all of the
//! above into the one [`SessionContext`](session::SessionContext) you'll usually want.
//!
//! # Examples
//!
//! A drone hovers 50 m above the origin with its camera pointing straight down. The center pixel
//! shows the ground directly below it:
//!
//! ```
//! use sightline::camera::{CameraIntrinsics, Pixel, Pose};
//! use sightline::frames::LocalOrigin;
//! use sightline::intersect::{intersect, GroundModel};
//! use sightline::ray::cast_ray;
//! use sightline::rig::{yaw_pitch_roll_to_rotation, FrameChain};
//! use sightline::systems::Wgs84;
//! use uom::si::{angle::degree, f64::{Angle, Length}, length::meter};
//!
//! let origin = LocalOrigin::new(Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456)?)?;
//! let k = CameraIntrinsics::new(1000., 1000., 960., 540.).expect("valid intrinsics");
//!
//! // what the flight controller reported
//! let drone = Wgs84::try_from_degrees(-22.905812, -43.221329, 62.456)?;
//! let gimbal = yaw_pitch_roll_to_rotation(
//!     Angle::new::<degree>(0.),
//!     Angle::new::<degree>(-90.),
//!     Angle::new::<degree>(0.),
//! );
//! let pose = Pose::new(
//!     origin.geodetic_to_enu(&drone)?,
//!     FrameChain::default().compose(gimbal),
//! );
//!
//! let ray = cast_ray(&k, &pose, Pixel::new(960., 540.))?;
//! let ground = GroundModel::FlatLocal { ground_up: Length::new::<meter>(0.) };
//! let hit = intersect(&ray, &ground, &origin)?;
//!
//! assert!((hit.geodetic.latitude().get::<degree>() + 22.905812).abs() < 1e-9);
//! assert!((hit.geodetic.longitude().get::<degree>() + 43.221329).abs() < 1e-9);
//! # Ok::<(), sightline::GeolocationError>(())
//! ```

#[macro_use]
mod coordinate_systems;

mod coordinates;
mod error;
mod geodetic;
mod util;
mod vectors;

pub mod camera;
pub mod correction;
pub mod frames;
pub mod intersect;
pub mod math;
pub mod projection;
pub mod ray;
pub mod rig;
pub mod session;
pub mod telemetry;
pub mod terrain;
pub mod utm;

pub(crate) type Point3 = nalgebra::Point3<f64>;
pub(crate) type Vector3 = nalgebra::Vector3<f64>;
pub(crate) type Matrix3 = nalgebra::Matrix3<f64>;
pub(crate) type UnitQuaternion = nalgebra::UnitQuaternion<f64>;
pub(crate) type Isometry3 = nalgebra::Isometry3<f64>;

/// Coordinate systems, their conventions, and geodetic positions.
pub mod systems {
    pub use super::coordinate_systems::{
        Camera, DroneNed, Ecef, EnuComponents, EnuLike, FrdComponents, FrdLike, GimbalFrd, GlEye,
        HasComponents, NedComponents, NedLike, RdfComponents, RdfLike, RightHandedXyzLike, World,
        XyzComponents,
    };
    pub use super::geodetic::{Components as Wgs84Components, Wgs84};
}
pub use coordinate_systems::CoordinateSystem;
pub use coordinates::Coordinate;
pub use error::{GeolocationError, LoadError, Result, TelemetryError};
pub use vectors::Vector;
