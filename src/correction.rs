//! Refining the telemetry rotation of a pose with landmarks of known position.
//!
//! Gimbal attitude from telemetry drifts. When the tracker reports where in the image a surveyed
//! landmark appears, the camera rotation can be corrected so that the landmark is seen where it
//! actually is. One landmark fixes the rotation up to a twist about the line of sight, for which
//! the smallest correction is used. Two landmarks fix it completely.

use crate::camera::{CameraIntrinsics, Pixel, Pose};
use crate::coordinate_systems::{Camera, World};
use crate::coordinates::Coordinate;
use crate::error::{GeolocationError, Result};
use crate::frames::LocalOrigin;
use crate::geodetic::Wgs84;
use crate::math::{estimate_minimal_rotation, Rotation};
use crate::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use uom::si::angle::degree;
use uom::si::f64::Angle;

/// A position of known location, and where it was observed in the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    position: Wgs84,
    pixel: Pixel,
    confidence: f64,
}

impl Landmark {
    /// Returns `None` unless `confidence` is in [0, 1] and the position and pixel are finite.
    #[must_use]
    pub fn new(position: Wgs84, pixel: Pixel, confidence: f64) -> Option<Self> {
        ((0.0..=1.0).contains(&confidence) && position.is_finite() && pixel.is_finite()).then_some(
            Self {
                position,
                pixel,
                confidence,
            },
        )
    }

    #[must_use]
    pub fn position(&self) -> Wgs84 {
        self.position
    }

    #[must_use]
    pub fn pixel(&self) -> Pixel {
        self.pixel
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Decides which landmarks take part in a correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkPolicy {
    /// Landmarks must be strictly more confident than this.
    pub min_confidence: f64,
}

impl Default for LandmarkPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.65,
        }
    }
}

impl LandmarkPolicy {
    /// Returns the landmarks confident enough to use, most confident first. Ties keep their input
    /// order.
    #[must_use]
    pub fn select<'a>(&self, landmarks: &'a [Landmark]) -> Vec<&'a Landmark> {
        let mut selected: Vec<_> = landmarks
            .iter()
            .filter(|landmark| landmark.confidence > self.min_confidence)
            .collect();
        selected.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        selected
    }
}

/// Rotates the camera as little as possible so that it sees `landmark` at `pixel`.
///
/// Both the direction to the landmark and its opposite are aligned with the pixel's ray, and the
/// smaller of the two corrections is applied. Returns the correction angle with the corrected
/// rotation.
///
/// Fails with [`GeolocationError::DegenerateVectors`] if the landmark is at the camera center.
pub fn correct_with_one(
    intrinsics: &CameraIntrinsics,
    pose: &Pose,
    landmark: &Coordinate<World>,
    pixel: Pixel,
) -> Result<(Angle, Rotation<World, Camera>)> {
    let seen = intrinsics.unproject(pixel);
    let expected = (*landmark - pose.position()) * pose.rotation();

    let towards = estimate_minimal_rotation(&expected, &seen)?;
    let away = estimate_minimal_rotation(&-expected, &seen)?;
    let (angle, correction) = if away.0 < towards.0 { away } else { towards };

    tracing::debug!(
        angle = angle.get::<degree>(),
        %pixel,
        "corrected rotation with one landmark"
    );
    Ok((angle, pose.rotation() * correction))
}

/// Returns the rotation under which both landmarks are seen exactly at their pixels.
///
/// An orthonormal basis is built from the two directions to the landmarks, and another from the
/// two rays through the pixels; the rotation maps the first basis onto the second.
///
/// Fails with [`GeolocationError::DegenerateVectors`] if either pair of directions is parallel.
pub fn correct_with_two(
    intrinsics: &CameraIntrinsics,
    pose: &Pose,
    landmarks: [(&Coordinate<World>, Pixel); 2],
) -> Result<Rotation<World, Camera>> {
    let [(first, first_pixel), (second, second_pixel)] = landmarks;
    let in_world = basis(
        (*first - pose.position()).inner,
        (*second - pose.position()).inner,
    )?;
    let in_camera = basis(
        intrinsics.unproject(first_pixel).inner,
        intrinsics.unproject(second_pixel).inner,
    )?;

    // SAFETY: the matrix takes the landmark directions in the world onto the rays they were
    // observed along in the camera, which is what the world-to-camera rotation does.
    let rotation = unsafe { Rotation::from_matrix(&(in_camera * in_world.transpose())) };

    tracing::debug!(
        angle = (pose.rotation().inverse() * rotation).angle().get::<degree>(),
        "corrected rotation with two landmarks"
    );
    Ok(rotation)
}

/// Gram-Schmidt: the columns are `a`, the part of `b` orthogonal to it, and their cross product.
fn basis(a: Vector3, b: Vector3) -> Result<Matrix3> {
    let first = a
        .try_normalize(f64::EPSILON)
        .ok_or(GeolocationError::DegenerateVectors("landmark direction is zero"))?;
    let second = (b - first * first.dot(&b))
        .try_normalize(1e-9 * b.norm())
        .ok_or(GeolocationError::DegenerateVectors(
            "landmark directions are parallel",
        ))?;
    Ok(Matrix3::from_columns(&[first, second, first.cross(&second)]))
}

/// Corrects the rotation of `pose` with the landmarks that `policy` selects.
///
/// With no usable landmarks the pose is returned unchanged. With more than two, only the two most
/// confident are used.
///
/// ```rust
/// use sightline::camera::{CameraIntrinsics, Pixel, Pose};
/// use sightline::correction::{correct_pose, Landmark, LandmarkPolicy};
/// use sightline::{frames::LocalOrigin, rig::{yaw_pitch_roll_to_rotation, FrameChain}};
/// use sightline::{systems::Wgs84, Coordinate};
/// use uom::si::{angle::degree, f64::{Angle, Length}, length::meter};
///
/// let (d, m) = (Angle::new::<degree>, Length::new::<meter>);
/// let origin = LocalOrigin::new(Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456)?)?;
/// let k = CameraIntrinsics::new(1000., 1000., 960., 540.).expect("valid intrinsics");
/// let pose = Pose::new(
///     Coordinate::from_cartesian(m(0.), m(0.), m(50.)),
///     FrameChain::default().compose(yaw_pitch_roll_to_rotation(d(2.), d(-88.), d(0.))),
/// );
///
/// // a landmark right below the drone, seen at the center of the image
/// let below = origin.enu_to_geodetic(&Coordinate::from_cartesian(m(0.), m(0.), m(0.)))?;
/// let landmark = Landmark::new(below, Pixel::new(960., 540.), 0.9).expect("valid landmark");
///
/// let corrected = correct_pose(&k, &pose, &origin, &[landmark], &LandmarkPolicy::default())?;
/// let seen = corrected.project(&k, &Coordinate::from_cartesian(m(0.), m(0.), m(0.))).unwrap();
/// assert!(seen.distance_to(&Pixel::new(960., 540.)) < 0.1);
/// # Ok::<(), sightline::GeolocationError>(())
/// ```
pub fn correct_pose(
    intrinsics: &CameraIntrinsics,
    pose: &Pose,
    origin: &LocalOrigin,
    landmarks: &[Landmark],
    policy: &LandmarkPolicy,
) -> Result<Pose> {
    let selected = policy.select(landmarks);
    let rotation = match selected.as_slice() {
        [] => {
            tracing::debug!(
                offered = landmarks.len(),
                "no landmark is confident enough; keeping telemetry rotation"
            );
            return Ok(*pose);
        }
        [only] => {
            let position = origin.geodetic_to_enu(&only.position)?;
            correct_with_one(intrinsics, pose, &position, only.pixel)?.1
        }
        [first, second, rest @ ..] => {
            if !rest.is_empty() {
                tracing::warn!(
                    usable = selected.len(),
                    "only the two most confident landmarks are used for pose correction"
                );
            }
            let first_position = origin.geodetic_to_enu(&first.position)?;
            let second_position = origin.geodetic_to_enu(&second.position)?;
            correct_with_two(
                intrinsics,
                pose,
                [
                    (&first_position, first.pixel),
                    (&second_position, second.pixel),
                ],
            )?
        }
    };
    Ok(pose.with_rotation(rotation))
}
