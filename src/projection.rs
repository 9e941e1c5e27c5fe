//! Projection and view matrices for OpenGL-style renderers drawing over the video.
//!
//! The renderer's eye frame ([`GlEye`]) looks down its negative Z axis with Y up, whereas the
//! [`Camera`] frame looks down positive Z with Y down. [`camera_to_gl`] is the fixed flip between
//! the two.

use crate::camera::{CameraIntrinsics, Pose};
use crate::coordinate_systems::{Camera, GlEye};
use crate::math::Rotation;
use crate::{Matrix3, Vector3};
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

/// The size of the rendered image and the depth range of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Distance to the near clipping plane; must be less than `far`.
    pub near: f64,
    pub far: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            near: 0.1,
            far: 1000.,
        }
    }
}

/// The matrices a renderer needs to draw world-space geometry over one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderMatrices {
    /// From the eye frame to clip space.
    pub projection: Matrix4<f64>,
    /// From world coordinates to the eye frame.
    pub view: Matrix4<f64>,
}

/// Builds the clip-space projection of a pinhole camera.
///
/// Pixel (u, v) of a `width` × `height` image maps to normalized device coordinates
/// `(2u/width − 1, 1 − 2v/height)`, and eye depths `near` and `far` to −1 and 1.
#[must_use]
pub fn build_projection(
    intrinsics: &CameraIntrinsics,
    width: u32,
    height: u32,
    near: f64,
    far: f64,
) -> Matrix4<f64> {
    let (width, height) = (f64::from(width), f64::from(height));
    let mut projection = Matrix4::zeros();
    projection[(0, 0)] = 2. * intrinsics.fx() / width;
    projection[(1, 1)] = 2. * intrinsics.fy() / height;
    projection[(0, 2)] = 1. - 2. * intrinsics.cx() / width;
    projection[(1, 2)] = 2. * intrinsics.cy() / height - 1.;
    projection[(2, 2)] = -(far + near) / (far - near);
    projection[(2, 3)] = -2. * far * near / (far - near);
    projection[(3, 2)] = -1.;
    projection
}

/// Builds the view matrix `[Rᵗ | −Rᵗ·t]` of an eye whose axes are the columns of `rotation` and
/// which sits at `translation`.
#[must_use]
pub fn build_view(rotation: &Matrix3, translation: &Vector3) -> Matrix4<f64> {
    let inverse = rotation.transpose();
    let mut view = Matrix4::identity();
    view.fixed_view_mut::<3, 3>(0, 0).copy_from(&inverse);
    view.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-inverse * translation));
    view
}

/// The half turn about X that takes [`Camera`] axes to [`GlEye`] axes.
#[must_use]
pub fn camera_to_gl() -> Rotation<Camera, GlEye> {
    // SAFETY: both frames share X and origin; GlEye's Y and Z are Camera's negated.
    unsafe { Rotation::from_matrix(&Matrix3::from_diagonal(&Vector3::new(1., -1., -1.))) }
}

/// Builds the projection and view matrices for drawing over the frame seen from `pose`.
///
/// ```rust
/// use sightline::camera::{CameraIntrinsics, Pose};
/// use sightline::projection::{render_matrices, Viewport};
/// use sightline::rig::{yaw_pitch_roll_to_rotation, FrameChain};
/// use sightline::Coordinate;
/// use uom::si::{angle::degree, f64::{Angle, Length}, length::meter};
///
/// let (d, m) = (Angle::new::<degree>, Length::new::<meter>);
/// let k = CameraIntrinsics::new(1000., 1000., 960., 540.).expect("valid intrinsics");
/// let pose = Pose::new(
///     Coordinate::from_cartesian(m(0.), m(0.), m(50.)),
///     FrameChain::default().compose(yaw_pitch_roll_to_rotation(d(0.), d(-90.), d(0.))),
/// );
/// let matrices = render_matrices(&k, &pose, &Viewport::default());
///
/// // the point below the drone is 50 m in front of the eye
/// let eye = matrices.view * nalgebra::Vector4::new(0., 0., 0., 1.);
/// assert!((eye.z + 50.).abs() < 1e-9);
/// ```
#[must_use]
pub fn render_matrices(
    intrinsics: &CameraIntrinsics,
    pose: &Pose,
    viewport: &Viewport,
) -> RenderMatrices {
    let world_to_eye = pose.rotation() * camera_to_gl();
    let view = build_view(
        &world_to_eye.matrix().transpose(),
        &pose.position().point.coords,
    );
    let projection = build_projection(
        intrinsics,
        viewport.width,
        viewport.height,
        viewport.near,
        viewport.far,
    );
    tracing::trace!(%pose, "built render matrices");
    RenderMatrices { projection, view }
}
