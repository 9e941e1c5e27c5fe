//! Rays cast from the camera through a pixel.

use crate::camera::{CameraIntrinsics, Pixel, Pose};
use crate::coordinate_systems::{Camera, World};
use crate::coordinates::Coordinate;
use crate::error::{GeolocationError, Result};
use crate::math::{RigidBodyTransform, Rotation};
use crate::vectors::Vector;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::Mul;

/// A half-line starting at `origin` and running along `direction` in the coordinate system `In`.
///
/// The direction need not be unit length; solvers normalize it before use.
#[derive(Debug)]
pub struct Ray<In> {
    pub origin: Coordinate<In>,
    pub direction: Vector<In>,
}

impl<In> Clone for Ray<In> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<In> Copy for Ray<In> {}

impl<In> PartialEq for Ray<In> {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin && self.direction == other.direction
    }
}

impl<In> Ray<In> {
    #[must_use]
    pub fn new(origin: Coordinate<In>, direction: Vector<In>) -> Self {
        Self { origin, direction }
    }

    /// Returns the unit-length direction of this ray.
    pub fn unit_direction(&self) -> Result<Vector<In>> {
        self.direction.normalized()
    }

    /// Returns the point `origin + t · direction`.
    #[must_use]
    pub fn point_at(&self, t: f64) -> Coordinate<In> {
        self.origin + self.direction * t
    }
}

impl<In> Display for Ray<In> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "from {} along {}", self.origin, self.direction)
    }
}

// Ray<From> * RigidBodyTransform<From, To> -> Ray<To>
impl<From, To> Mul<RigidBodyTransform<From, To>> for Ray<From> {
    type Output = Ray<To>;

    fn mul(self, rhs: RigidBodyTransform<From, To>) -> Self::Output {
        Ray::new(self.origin * rhs, self.direction * rhs)
    }
}

// RigidBodyTransform<From, To> * Ray<To> -> Ray<From>
impl<From, To> Mul<Ray<To>> for RigidBodyTransform<From, To> {
    type Output = Ray<From>;

    fn mul(self, rhs: Ray<To>) -> Self::Output {
        Ray::new(self * rhs.origin, self * rhs.direction)
    }
}

impl<From, To> Mul<Rotation<From, To>> for Ray<From> {
    type Output = Ray<To>;

    fn mul(self, rhs: Rotation<From, To>) -> Self::Output {
        Ray::new(self.origin * rhs, self.direction * rhs)
    }
}

impl<From, To> Mul<Ray<To>> for Rotation<From, To> {
    type Output = Ray<From>;

    fn mul(self, rhs: Ray<To>) -> Self::Output {
        Ray::new(self * rhs.origin, self * rhs.direction)
    }
}

/// Casts the ray that the camera at `pose` sees `pixel` along.
///
/// The ray starts at the camera center and has direction `Rᵗ · K⁻¹ · [u, v, 1]` in the world.
///
/// Fails with [`GeolocationError::InvalidCoordinate`] if the pixel is not finite.
pub fn cast_ray(intrinsics: &CameraIntrinsics, pose: &Pose, pixel: Pixel) -> Result<Ray<World>> {
    if !pixel.is_finite() {
        return Err(GeolocationError::InvalidCoordinate("pixel must be finite"));
    }
    let in_camera = Ray::<Camera>::new(Coordinate::origin(), intrinsics.unproject(pixel));
    let ray = pose.world_to_camera().inverse_transform(in_camera);
    tracing::trace!(%pixel, %ray, "cast ray");
    Ok(ray)
}

#[cfg(test)]
mod tests {
    use super::{cast_ray, Ray};
    use crate::camera::{CameraIntrinsics, Pixel, Pose};
    use crate::coordinate_systems::World;
    use crate::coordinates::Coordinate;
    use crate::error::GeolocationError;
    use crate::rig::{yaw_pitch_roll_to_rotation, FrameChain};
    use crate::vectors::Vector;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use uom::si::f64::{Angle, Length};
    use uom::si::{angle::degree, length::meter};

    fn m(meters: f64) -> Length {
        Length::new::<meter>(meters)
    }
    fn d(degrees: f64) -> Angle {
        Angle::new::<degree>(degrees)
    }

    fn pose(yaw: f64, pitch: f64, roll: f64) -> Pose {
        Pose::new(
            Coordinate::from_cartesian(m(3.), m(-7.), m(50.)),
            FrameChain::default().compose(yaw_pitch_roll_to_rotation(d(yaw), d(pitch), d(roll))),
        )
    }

    #[test]
    fn nadir_center_pixel_points_down() {
        let k = CameraIntrinsics::new(1000., 1000., 960., 540.).unwrap();
        let ray = cast_ray(&k, &pose(0., -90., 0.), Pixel::new(960., 540.)).unwrap();
        assert_relative_eq!(
            ray.origin,
            Coordinate::<World>::from_cartesian(m(3.), m(-7.), m(50.))
        );
        assert_relative_eq!(
            ray.unit_direction().unwrap(),
            Vector::<World>::from_cartesian(m(0.), m(0.), m(-1.))
        );
    }

    #[rstest]
    #[case(0., -90., 0., Pixel::new(100., 900.))]
    #[case(45., -30., 0., Pixel::new(1200., 700.))]
    #[case(-120., -60., 5., Pixel::new(13., 1070.))]
    fn rays_reproject_onto_their_pixel(
        #[case] yaw: f64,
        #[case] pitch: f64,
        #[case] roll: f64,
        #[case] pixel: Pixel,
    ) {
        let k = CameraIntrinsics::new(1450., 1440., 955., 545.).unwrap();
        let pose = pose(yaw, pitch, roll);
        let ray = cast_ray(&k, &pose, pixel).unwrap();
        let back = pose.project(&k, &ray.point_at(42.)).unwrap();
        assert_relative_eq!(back.u, pixel.u, epsilon = 1e-6);
        assert_relative_eq!(back.v, pixel.v, epsilon = 1e-6);
    }

    #[test]
    fn non_finite_pixels_are_rejected() {
        let k = CameraIntrinsics::new(1000., 1000., 960., 540.).unwrap();
        assert!(matches!(
            cast_ray(&k, &pose(0., -90., 0.), Pixel::new(f64::NAN, 3.)),
            Err(GeolocationError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn zero_direction_has_no_unit_direction() {
        let ray = Ray::<World>::new(Coordinate::origin(), Vector::zero());
        assert!(matches!(
            ray.unit_direction(),
            Err(GeolocationError::DegenerateVectors(_))
        ));
    }

    #[test]
    fn rays_move_between_frames() {
        let pose = pose(10., -45., 0.);
        let in_world = Ray::<World>::new(
            Coordinate::from_cartesian(m(1.), m(2.), m(3.)),
            Vector::from_cartesian(m(0.), m(1.), m(-1.)),
        );
        let in_camera = in_world * pose.world_to_camera();
        assert_relative_eq!(pose.world_to_camera() * in_camera.origin, in_world.origin);
        let back = pose.world_to_camera() * in_camera;
        assert_relative_eq!(back.direction, in_world.direction);
    }

    #[test]
    fn display() {
        let ray = Ray::<World>::new(
            Coordinate::from_cartesian(m(0.), m(0.), m(50.)),
            Vector::from_cartesian(m(0.), m(0.5), m(-1.)),
        );
        insta::assert_snapshot!(ray, @"from (0.000, 0.000, 50.000) along [0.000, 0.500, -1.000]");
    }
}
