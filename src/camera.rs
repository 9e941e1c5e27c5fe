//! Pinhole camera intrinsics, pixels, and camera poses.

use crate::coordinate_systems::{Camera, World};
use crate::coordinates::Coordinate;
use crate::error::LoadError;
use crate::math::{RigidBodyTransform, Rotation};
use crate::vectors::Vector;
use crate::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::Path;
use uom::si::f64::Length;
use uom::si::length::meter;

/// Largest magnitude tolerated for entries of the intrinsics matrix that must be zero.
const ZERO_TOLERANCE: f64 = 1e-9;

/// A position in the image, in pixels.
///
/// `u` grows to the right and `v` grows downwards, with (0, 0) at the top-left corner of the
/// top-left pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    pub u: f64,
    pub v: f64,
}

impl Pixel {
    #[must_use]
    pub fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }

    /// Returns the straight-line distance to another pixel.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.u - other.u).hypot(self.v - other.v)
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.u.is_finite() && self.v.is_finite()
    }
}

impl Display for Pixel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.u, self.v)
    }
}

/// The intrinsic parameters of a pinhole camera without skew.
///
/// Serialized as the row-major 3×3 matrix `K`:
///
/// ```text
/// ⎡fx  0 cx⎤
/// ⎢ 0 fy cy⎥
/// ⎣ 0  0  1⎦
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct CameraIntrinsics {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
}

impl CameraIntrinsics {
    /// Constructs intrinsics from focal lengths and principal point, all in pixels.
    ///
    /// Fails if a focal length is not strictly positive or any value is not finite.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, LoadError> {
        if ![fx, fy, cx, cy].iter().all(|v| v.is_finite()) {
            return Err(LoadError::Intrinsics("all entries must be finite"));
        }
        if fx <= 0. || fy <= 0. {
            return Err(LoadError::Intrinsics("focal lengths must be positive"));
        }
        Ok(Self { fx, fy, cx, cy })
    }

    /// Constructs intrinsics from a row-major matrix, as stored in calibration files.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Result<Self, LoadError> {
        Self::from_matrix(&Matrix3::from_fn(|r, c| rows[r][c]))
    }

    /// Constructs intrinsics from the matrix `K`.
    ///
    /// Fails if `K` has skew or its last row is not `[0, 0, 1]`.
    pub fn from_matrix(k: &Matrix3) -> Result<Self, LoadError> {
        let zero = |v: f64| v.abs() <= ZERO_TOLERANCE;
        if !zero(k[(0, 1)]) {
            return Err(LoadError::Intrinsics("skewed cameras are not supported"));
        }
        if !(zero(k[(1, 0)]) && zero(k[(2, 0)]) && zero(k[(2, 1)]) && zero(k[(2, 2)] - 1.)) {
            return Err(LoadError::Intrinsics(
                "matrix must be upper triangular with a last row of [0, 0, 1]",
            ));
        }
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    /// Reads intrinsics from a JSON file holding the row-major matrix.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        let rows: [[f64; 3]; 3] = serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let intrinsics = Self::from_rows(rows)?;
        tracing::info!(path = %path.display(), %intrinsics, "loaded camera intrinsics");
        Ok(intrinsics)
    }

    #[must_use]
    pub fn fx(&self) -> f64 {
        self.fx
    }

    #[must_use]
    pub fn fy(&self) -> f64 {
        self.fy
    }

    #[must_use]
    pub fn cx(&self) -> f64 {
        self.cx
    }

    #[must_use]
    pub fn cy(&self) -> f64 {
        self.cy
    }

    /// Returns `K`.
    #[must_use]
    pub fn matrix(&self) -> Matrix3 {
        Matrix3::new(self.fx, 0., self.cx, 0., self.fy, self.cy, 0., 0., 1.)
    }

    /// Returns `K⁻¹`, in closed form.
    #[must_use]
    pub fn inverse_matrix(&self) -> Matrix3 {
        Matrix3::new(
            1. / self.fx,
            0.,
            -self.cx / self.fx,
            0.,
            1. / self.fy,
            -self.cy / self.fy,
            0.,
            0.,
            1.,
        )
    }

    /// Returns the direction through `pixel`, as `K⁻¹ · [u, v, 1]`.
    ///
    /// The result lies on the plane one meter in front of the camera; it is not unit length.
    #[must_use]
    pub fn unproject(&self, pixel: Pixel) -> Vector<Camera> {
        Vector::from_cartesian(
            Length::new::<meter>((pixel.u - self.cx) / self.fx),
            Length::new::<meter>((pixel.v - self.cy) / self.fy),
            Length::new::<meter>(1.),
        )
    }

    /// Returns the pixel that `point` is imaged at.
    ///
    /// Returns `None` for points on or behind the image plane, which are not visible.
    #[must_use]
    pub fn project(&self, point: &Coordinate<Camera>) -> Option<Pixel> {
        let forward = point.rdf_forward().get::<meter>();
        if forward <= 0. || !point.is_finite() {
            return None;
        }
        Some(Pixel {
            u: self.fx * point.rdf_right().get::<meter>() / forward + self.cx,
            v: self.fy * point.rdf_down().get::<meter>() / forward + self.cy,
        })
    }
}

impl TryFrom<[[f64; 3]; 3]> for CameraIntrinsics {
    type Error = LoadError;

    fn try_from(rows: [[f64; 3]; 3]) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<CameraIntrinsics> for [[f64; 3]; 3] {
    fn from(k: CameraIntrinsics) -> Self {
        [[k.fx, 0., k.cx], [0., k.fy, k.cy], [0., 0., 1.]]
    }
}

impl Display for CameraIntrinsics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
            self.fx, self.fy, self.cx, self.cy
        )
    }
}

/// Where the camera is and which way it looks, for one video frame.
///
/// A pose takes world points into the camera frame: `x_cam = R · x_world + t`, where the
/// translation `t = −R · C` follows from the camera center `C`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pose {
    world_to_camera: RigidBodyTransform<World, Camera>,
}

impl Pose {
    /// Constructs the pose of a camera centered at `position` and oriented by `rotation`.
    #[must_use]
    pub fn new(position: Coordinate<World>, rotation: Rotation<World, Camera>) -> Self {
        // SAFETY: the `Camera` frame of a frame's pose is, by definition, centered at the camera
        // position and aligned with its orientation.
        let world_to_camera = unsafe { RigidBodyTransform::new(Vector::from(position), rotation) };
        Self { world_to_camera }
    }

    /// Returns `R`, the rotation from world to camera axes.
    #[must_use]
    pub fn rotation(&self) -> Rotation<World, Camera> {
        self.world_to_camera.rotation()
    }

    /// Returns `t = −R · C`, the world origin as seen from the camera.
    #[must_use]
    pub fn translation(&self) -> Vector<Camera> {
        -(self.world_to_camera.translation() * self.rotation())
    }

    /// Returns `C`, the camera center in the world.
    #[must_use]
    pub fn position(&self) -> Coordinate<World> {
        Coordinate::origin() + self.world_to_camera.translation()
    }

    /// Returns the transform from world into camera coordinates.
    #[must_use]
    pub fn world_to_camera(&self) -> RigidBodyTransform<World, Camera> {
        self.world_to_camera
    }

    /// Returns the same camera center looking along a different rotation.
    #[must_use]
    pub fn with_rotation(&self, rotation: Rotation<World, Camera>) -> Self {
        Self::new(self.position(), rotation)
    }

    /// Returns the pixel that a world point is imaged at, or `None` if it is behind the camera.
    #[must_use]
    pub fn project(&self, intrinsics: &CameraIntrinsics, point: &Coordinate<World>) -> Option<Pixel> {
        intrinsics.project(&(*point * self.world_to_camera))
    }
}

impl Display for Pose {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "camera at {}, rotated {}",
            self.position(),
            self.rotation()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{CameraIntrinsics, Pixel, Pose};
    use crate::coordinate_systems::{Camera, World};
    use crate::coordinates::Coordinate;
    use crate::error::LoadError;
    use crate::math::Rotation;
    use crate::rig::{yaw_pitch_roll_to_rotation, FrameChain};
    use crate::vectors::Vector;
    use crate::Matrix3;
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

    fn k() -> CameraIntrinsics {
        CameraIntrinsics::new(1000., 1000., 960., 540.).unwrap()
    }

    #[test]
    fn inverse_matrix_is_the_inverse() {
        let k = CameraIntrinsics::new(1450.5, 1432., 955.25, 547.75).unwrap();
        assert_relative_eq!(
            k.matrix() * k.inverse_matrix(),
            Matrix3::identity(),
            epsilon = 1e-12
        );
    }

    #[rstest]
    #[case([[0., 0., 960.], [0., 1000., 540.], [0., 0., 1.]])]
    #[case([[-1000., 0., 960.], [0., 1000., 540.], [0., 0., 1.]])]
    #[case([[1000., 0., 960.], [0., f64::NAN, 540.], [0., 0., 1.]])]
    #[case([[1000., 2., 960.], [0., 1000., 540.], [0., 0., 1.]])]
    #[case([[1000., 0., 960.], [0., 1000., 540.], [0., 0., 2.]])]
    fn invalid_intrinsics_are_rejected(#[case] rows: [[f64; 3]; 3]) {
        assert!(matches!(
            CameraIntrinsics::from_rows(rows),
            Err(LoadError::Intrinsics(_))
        ));
    }

    #[rstest]
    #[case(Pixel::new(960., 540.))]
    #[case(Pixel::new(0., 0.))]
    #[case(Pixel::new(1919.5, 3.25))]
    fn unproject_then_project(#[case] pixel: Pixel) {
        let k = k();
        let ray = k.unproject(pixel);
        let point = Coordinate::<Camera>::origin() + ray * 37.;
        let back = k.project(&point).unwrap();
        assert_relative_eq!(back.u, pixel.u, epsilon = 1e-9);
        assert_relative_eq!(back.v, pixel.v, epsilon = 1e-9);
    }

    #[test]
    fn center_pixel_is_the_optical_axis() {
        assert_relative_eq!(
            k().unproject(Pixel::new(960., 540.)),
            Vector::<Camera>::from_cartesian(m(0.), m(0.), m(1.))
        );
    }

    #[test]
    fn points_behind_the_camera_are_not_projected() {
        let behind = Coordinate::<Camera>::from_cartesian(m(1.), m(1.), m(-5.));
        assert_eq!(k().project(&behind), None);
        assert_eq!(k().project(&Coordinate::origin()), None);
    }

    #[test]
    fn intrinsics_serialize_as_row_major_matrix() {
        let json = serde_json::to_string(&k()).unwrap();
        assert_eq!(json, "[[1000.0,0.0,960.0],[0.0,1000.0,540.0],[0.0,0.0,1.0]]");
        let yaml = serde_yaml::to_string(&k()).unwrap();
        assert_eq!(serde_yaml::from_str::<CameraIntrinsics>(&yaml).unwrap(), k());
        assert!(serde_json::from_str::<CameraIntrinsics>("[[0,0,1],[0,1,1],[0,0,1]]").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = CameraIntrinsics::load("/nonexistent/K.json").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn pose_translation_is_minus_r_c() {
        let rotation = FrameChain::default().compose(yaw_pitch_roll_to_rotation(d(30.), d(-45.), d(2.)));
        let center = Coordinate::<World>::from_cartesian(m(10.), m(-4.), m(50.));
        let pose = Pose::new(center, rotation);

        let expected = -(rotation.matrix() * Vector::<World>::from(center).inner);
        assert_relative_eq!(pose.translation().inner, expected, epsilon = 1e-9);
        assert_relative_eq!(pose.position(), center);

        // the camera center is the camera frame's origin
        assert_relative_eq!(center * pose.world_to_camera(), Coordinate::<Camera>::origin());
    }

    #[test]
    fn nadir_pose_projects_ground_points() {
        let rotation = FrameChain::default().compose(yaw_pitch_roll_to_rotation(d(0.), d(-90.), d(0.)));
        let pose = Pose::new(Coordinate::from_cartesian(m(0.), m(0.), m(50.)), rotation);

        let below = pose.project(&k(), &Coordinate::origin()).unwrap();
        assert_relative_eq!(below.u, 960., epsilon = 1e-9);
        assert_relative_eq!(below.v, 540., epsilon = 1e-9);

        // 5 m north of nadir is 100 px towards the top of the image
        let north = pose
            .project(&k(), &Coordinate::from_cartesian(m(0.), m(5.), m(0.)))
            .unwrap();
        assert_relative_eq!(north.u, 960., epsilon = 1e-9);
        assert_relative_eq!(north.v, 440., epsilon = 1e-9);

        assert_eq!(pose.project(&k(), &Coordinate::from_cartesian(m(0.), m(0.), m(80.))), None);
    }

    #[test]
    fn with_rotation_keeps_the_center() {
        let center = Coordinate::<World>::from_cartesian(m(1.), m(2.), m(3.));
        let pose = Pose::new(center, FrameChain::default().compose(yaw_pitch_roll_to_rotation(d(0.), d(0.), d(0.))));
        // SAFETY: test only.
        let other = pose.with_rotation(unsafe { Rotation::identity() });
        assert_relative_eq!(other.position(), center);
    }

    #[test]
    fn display() {
        insta::assert_snapshot!(k(), @"fx=1000.000 fy=1000.000 cx=960.000 cy=540.000");
        insta::assert_snapshot!(Pixel::new(12.3456, 6.), @"(12.35, 6.00)");
    }
}
