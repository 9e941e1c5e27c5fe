//! Rotations and rigid body transforms between typed coordinate systems.
//!
//! [`Rotation`] and [`RigidBodyTransform`] are type-safe wrappers around a unit quaternion and a
//! Euclidean isometry respectively. They are generic over the [`CoordinateSystem`] they take
//! values _from_ and the one they take values _to_, so a ray cast in the [`Camera`] frame can only
//! be moved into the [`World`] frame through a transform that claims to do exactly that.
//!
//! Values are moved by multiplication with the value on the left and the transform on the right:
//!
//! ```rust,ignore
//! let in_camera: Coordinate<Camera> = in_world * world_to_camera;
//! let world_to_gl: Rotation<World, GlEye> = world_to_camera * camera_to_gl;
//! ```
//!
//! This module also hosts [`estimate_minimal_rotation`], the smallest rotation carrying one
//! direction onto another, which the landmark-based pose correction is built on.
//!
//! [`Camera`]: crate::systems::Camera
//! [`World`]: crate::systems::World

use crate::coordinate_systems::{Ecef, EnuLike};
use crate::coordinates::Coordinate;
use crate::error::{GeolocationError, Result};
use crate::vectors::Vector;
use crate::{CoordinateSystem, Isometry3, Matrix3, UnitQuaternion, Vector3};
use nalgebra::{Rotation3, Translation3, Unit};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::ops::{Mul, Neg};
use uom::si::angle::radian;
use uom::si::f64::Angle;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};
use serde::{Deserialize, Serialize};

/// A rotation that takes values in the [`CoordinateSystem`] `From` into `To`.
///
/// Constructors that claim a relationship between two coordinate systems are `unsafe`: nothing
/// stops you from claiming that the gimbal is mounted upside down, and the types will happily
/// carry that claim through every subsequent computation.
///
/// <div class="warning">
///
/// When deserializing, the coordinate systems of the deserialized value are _not_ checked.
///
/// </div>
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
#[serde(transparent)]
pub struct Rotation<From, To> {
    /// The rotation that takes `To` components back into `From`.
    ///
    /// Storing the inverse makes chaining read left-to-right: for `Rotation<From, Over>` times
    /// `Rotation<Over, To>` the stored quaternions simply multiply in operand order.
    pub(crate) inner: UnitQuaternion,
    #[serde(skip)]
    from: PhantomData<From>,
    #[serde(skip)]
    to: PhantomData<To>,
}

// manual impls of Clone and Copy to avoid requiring From/To: Copy + Clone
impl<From, To> Clone for Rotation<From, To> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<From, To> Copy for Rotation<From, To> {}

impl<From, To> PartialEq<Self> for Rotation<From, To> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.eq(&other.inner)
    }
}

impl<From, To> Display for Rotation<From, To> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.inner.axis() {
            Some(axis) => write!(
                f,
                "{:.3}° about [{:.3}, {:.3}, {:.3}]",
                self.inner.angle().to_degrees(),
                axis.x,
                axis.y,
                axis.z
            ),
            None => write!(f, "identity"),
        }
    }
}

impl<To> Rotation<Ecef, To>
where
    To: CoordinateSystem<Convention = EnuLike>,
{
    /// Rotation from [`Ecef`] axes to the East, North, and Up axes at the given latitude and
    /// longitude.
    ///
    /// <https://en.wikipedia.org/wiki/Local_tangent_plane_coordinates#Local_east,_north,_up_(ENU)_coordinates>
    ///
    /// # Safety
    ///
    /// Only valid if the origin of `To` lies at the given latitude and longitude. This applies no
    /// translation; see [`RigidBodyTransform::ecef_to_enu_at`].
    unsafe fn ecef_to_enu_at(latitude: Angle, longitude: Angle) -> Self {
        let (sin_phi, cos_phi) = latitude.get::<radian>().sin_cos();
        let (sin_lambda, cos_lambda) = longitude.get::<radian>().sin_cos();

        // columns are the E, N, U axes expressed in ECEF
        let enu_in_ecef = Matrix3::new(
            -sin_lambda,
            -cos_lambda * sin_phi,
            cos_lambda * cos_phi,
            cos_lambda,
            -sin_lambda * sin_phi,
            sin_lambda * cos_phi,
            0.,
            cos_phi,
            sin_phi,
        );

        Self::from_inner(UnitQuaternion::from_rotation_matrix(
            &Rotation3::from_matrix_unchecked(enu_in_ecef),
        ))
    }
}

impl<From, To> Rotation<From, To> {
    fn from_inner(inner: UnitQuaternion) -> Self {
        Self {
            inner,
            from: PhantomData,
            to: PhantomData,
        }
    }

    /// Constructs the rotation whose `To` axes are reached from the `From` axes by intrinsic
    /// yaw (about Z), then pitch (about the new Y), then roll (about the newest X).
    ///
    /// Equivalently, the matrix `Rz(yaw) · Ry(pitch) · Rx(roll)` takes `To` components into
    /// `From` components. This is how attitude is reported by flight controllers and gimbals: the
    /// body frame's orientation as seen from the level frame.
    ///
    /// # Safety
    ///
    /// Calling this asserts that the angles describe how `To` is oriented in `From`, and that the
    /// two share an origin. If they do not, values will be moved between coordinate system types
    /// without the correct conversion.
    #[doc(alias = "from_tait_bryan_angles")]
    #[must_use]
    pub unsafe fn from_yaw_pitch_roll(
        yaw: impl Into<Angle>,
        pitch: impl Into<Angle>,
        roll: impl Into<Angle>,
    ) -> Self {
        // nalgebra's euler angles are the 3-2-1 (z-y'-x'') sequence, ie Rz * Ry * Rx.
        Self::from_inner(UnitQuaternion::from_euler_angles(
            roll.into().get::<radian>(),
            pitch.into().get::<radian>(),
            yaw.into().get::<radian>(),
        ))
    }

    /// Constructs the rotation from the 3×3 matrix that maps `From` components to `To`
    /// components (ie, `x_to = m · x_from`).
    ///
    /// The matrix is projected onto the nearest rotation, so small numerical drift away from
    /// orthonormality is tolerated.
    ///
    /// # Safety
    ///
    /// Calling this asserts that `m` is the correct change of basis from `From` to `To` and that
    /// no translation is needed between them.
    #[must_use]
    pub unsafe fn from_matrix(m: &Matrix3) -> Self {
        let to_from = m.transpose();
        // seeded from the closed form; refining from the identity stalls on half turns
        let guess = UnitQuaternion::new_normalize(
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(to_from))
                .into_inner(),
        );
        Self::from_inner(UnitQuaternion::from_matrix_eps(
            &to_from,
            1e-12,
            16,
            guess,
        ))
    }

    /// Asserts that `From` and `To` have identical axes.
    ///
    /// # Safety
    ///
    /// Like [`RigidBodyTransform::identity`], this claims that no conversion at all is needed
    /// between the two coordinate systems.
    #[must_use]
    pub unsafe fn identity() -> Self {
        Self::from_inner(UnitQuaternion::identity())
    }

    /// Returns the 3×3 matrix that maps `From` components to `To` components.
    #[must_use]
    pub fn matrix(&self) -> Matrix3 {
        self.inner.inverse().to_rotation_matrix().into_inner()
    }

    /// Returns the angle of this rotation, in [0°, 180°].
    #[must_use]
    pub fn angle(&self) -> Angle {
        Angle::new::<radian>(self.inner.angle())
    }

    /// Returns the yaw, pitch, and roll that [`Rotation::from_yaw_pitch_roll`] would need to
    /// produce this rotation.
    #[must_use]
    pub fn to_yaw_pitch_roll(&self) -> (Angle, Angle, Angle) {
        let (roll, pitch, yaw) = self.inner.euler_angles();
        (
            Angle::new::<radian>(yaw),
            Angle::new::<radian>(pitch),
            Angle::new::<radian>(roll),
        )
    }

    /// Returns the equal-but-opposite rotation, from `To` into `From`.
    #[must_use]
    pub fn inverse(&self) -> Rotation<To, From> {
        Rotation::from_inner(self.inner.inverse())
    }

    /// Transforms an element in `From` into `To`.
    #[doc(alias = "apply")]
    pub fn transform<T>(&self, in_from: T) -> <T as Mul<Self>>::Output
    where
        T: Mul<Self>,
    {
        in_from * *self
    }

    /// Transforms an element in `To` into `From`.
    #[doc(alias = "undo")]
    pub fn inverse_transform<T>(&self, in_to: T) -> <Self as Mul<T>>::Output
    where
        Self: Mul<T>,
    {
        *self * in_to
    }
}

#[cfg(any(test, feature = "approx"))]
impl<From, To> AbsDiffEq<Self> for Rotation<From, To> {
    type Epsilon = <f64 as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        UnitQuaternion::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        // q and -q are the same rotation
        self.inner.abs_diff_eq(&other.inner, epsilon)
            || self
                .inner
                .as_ref()
                .abs_diff_eq(&(-other.inner.into_inner()), epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl<From, To> RelativeEq for Rotation<From, To> {
    fn default_max_relative() -> Self::Epsilon {
        UnitQuaternion::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.inner.relative_eq(&other.inner, epsilon, max_relative)
            || self.inner.as_ref().relative_eq(
                &(-other.inner.into_inner()),
                epsilon,
                max_relative,
            )
    }
}

impl<From, To> Neg for Rotation<From, To> {
    type Output = Rotation<To, From>;

    fn neg(self) -> Self::Output {
        self.inverse()
    }
}

// Rotation<From, Over> * Rotation<Over, To> -> Rotation<From, To>
impl<From, Over, To> Mul<Rotation<Over, To>> for Rotation<From, Over> {
    type Output = Rotation<From, To>;

    fn mul(self, rhs: Rotation<Over, To>) -> Self::Output {
        Rotation::from_inner(self.inner * rhs.inner)
    }
}

/// Returns the rotation of smallest angle that turns the direction of `x` onto the direction of
/// `b`, along with that angle.
///
/// The axis-angle construction `axis = x̂ × b̂`, `θ = acos(x̂ · b̂)` has two solutions, θ about the
/// axis and 2π − θ about the opposite axis. Both are evaluated and the one with the smaller angle
/// is returned, so the result never depends on the incidental sign of the cross product.
///
/// - Parallel inputs give `(0, identity)`.
/// - Antiparallel inputs give an angle of exactly π about an arbitrary perpendicular axis.
///
/// Fails with [`GeolocationError::DegenerateVectors`] if either input is the zero vector.
///
/// ```rust
/// use sightline::{math::estimate_minimal_rotation, systems::Camera, Vector};
/// use uom::si::{angle::degree, f64::Length, length::meter};
///
/// let m = Length::new::<meter>;
/// let x = Vector::<Camera>::from_cartesian(m(1.), m(0.), m(0.));
/// let b = Vector::<Camera>::from_cartesian(m(0.), m(0.), m(3.));
///
/// let (angle, rotation) = estimate_minimal_rotation(&x, &b)?;
/// assert!((angle.get::<degree>() - 90.).abs() < 1e-9);
/// assert!(((x * rotation).rdf_forward().get::<meter>() - 1.).abs() < 1e-9);
/// # Ok::<(), sightline::GeolocationError>(())
/// ```
pub fn estimate_minimal_rotation<In>(
    x: &Vector<In>,
    b: &Vector<In>,
) -> Result<(Angle, Rotation<In, In>)> {
    let x = x.normalized()?.inner;
    let b = b.normalized()?.inner;

    let cross = x.cross(&b);
    let cos = x.dot(&b).clamp(-1., 1.);

    if cross.norm() <= f64::EPSILON {
        if cos > 0. {
            return Ok((Angle::new::<radian>(0.), Rotation::from_inner(UnitQuaternion::identity())));
        }
        let axis = Unit::new_normalize(x.cross(&least_aligned_axis(&x)));
        let half_turn = Rotation::from_inner(
            UnitQuaternion::from_axis_angle(&axis, std::f64::consts::PI).inverse(),
        );
        return Ok((Angle::HALF_TURN, half_turn));
    }

    let axis = Unit::new_normalize(cross);
    let theta = cos.acos();
    // (θ, axis) and (2π − θ, −axis) are the same rotation; the smaller angle wins, θ on a tie
    let complement = std::f64::consts::TAU - theta;
    let (angle, axis) = if complement < theta {
        (complement, -axis)
    } else {
        (theta, axis)
    };

    // stored inverted, see `Rotation::inner`
    let rotation = Rotation::from_inner(UnitQuaternion::from_axis_angle(&axis, angle).inverse());
    Ok((Angle::new::<radian>(angle), rotation))
}

/// The unit axis that is closest to perpendicular to `v`.
fn least_aligned_axis(v: &Vector3) -> Vector3 {
    let abs = v.abs();
    if abs.x <= abs.y && abs.x <= abs.z {
        Vector3::x()
    } else if abs.y <= abs.z {
        Vector3::y()
    } else {
        Vector3::z()
    }
}

/// A [rigid body transform][isometry] (rotation and translation) from `From` into `To`.
///
/// The camera pose is one of these: it takes points in the session's world frame into the
/// camera's optical frame.
///
/// [isometry]: https://en.wikipedia.org/wiki/Rigid_transformation
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
#[serde(transparent)]
pub struct RigidBodyTransform<From, To> {
    /// The isometry from `To` back into `From`; see `Rotation::inner`.
    pub(crate) inner: Isometry3,
    #[serde(skip)]
    from: PhantomData<From>,
    #[serde(skip)]
    to: PhantomData<To>,
}

impl<From, To> Clone for RigidBodyTransform<From, To> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<From, To> Copy for RigidBodyTransform<From, To> {}

impl<To> RigidBodyTransform<Ecef, To>
where
    To: CoordinateSystem<Convention = EnuLike>,
{
    /// Constructs the transform from [`Ecef`] into an East-North-Up frame anchored at `position`.
    ///
    /// # Safety
    ///
    /// Only valid if [`Coordinate::<To>::origin()`](Coordinate::origin) lies at `position` and
    /// `To` is aligned with the local East, North, and Up there.
    #[must_use]
    pub unsafe fn ecef_to_enu_at(position: &crate::systems::Wgs84) -> Self {
        let translation = Vector::from(position.to_ecef());

        // SAFETY: same claim as ours; the translation is applied below.
        let rotation = unsafe { Rotation::ecef_to_enu_at(position.latitude, position.longitude) };

        // SAFETY: rotation to ENU axes at `position` plus the offset of `position` from the
        // earth's center is exactly the ECEF -> ENU transform there.
        unsafe { Self::new(translation, rotation) }
    }
}

impl<From, To> RigidBodyTransform<From, To> {
    /// Constructs a transform from the position of `To`'s origin in `From` and the rotation from
    /// `From` into `To`.
    ///
    /// A point is moved into `To` as `rotation · (point − translation)`.
    ///
    /// # Safety
    ///
    /// Calling this asserts that the origin and axes of `To` are indeed where the arguments say
    /// they are. If not, values will be moved between coordinate system types incorrectly.
    #[must_use]
    pub unsafe fn new(translation: Vector<From>, rotation: Rotation<From, To>) -> Self {
        Self {
            inner: Isometry3::from_parts(Translation3::from(translation.inner), rotation.inner),
            from: PhantomData,
            to: PhantomData,
        }
    }

    /// Asserts that `From` and `To` are the same coordinate system under different names.
    ///
    /// # Safety
    ///
    /// See [`Rotation::identity`].
    #[must_use]
    pub unsafe fn identity() -> Self {
        Self::new(Vector::zero(), Rotation::identity())
    }

    /// Returns the equal-but-opposite transform, from `To` into `From`.
    #[must_use]
    pub fn inverse(&self) -> RigidBodyTransform<To, From> {
        RigidBodyTransform {
            inner: self.inner.inverse(),
            from: PhantomData,
            to: PhantomData,
        }
    }

    /// Returns where the origin of `To` lies, as a displacement from the origin of `From`.
    #[must_use]
    pub fn translation(&self) -> Vector<From> {
        Vector::from_nalgebra_vector(self.inner.translation.vector)
    }

    /// Returns the rotation from `From` into `To`.
    #[must_use]
    pub fn rotation(&self) -> Rotation<From, To> {
        Rotation::from_inner(self.inner.rotation)
    }

    /// Transforms an element in `From` into `To`.
    ///
    /// Vectors are displacements without an origin, so they only receive the rotation.
    #[doc(alias = "apply")]
    pub fn transform<T>(&self, in_from: T) -> <T as Mul<Self>>::Output
    where
        T: Mul<Self>,
    {
        in_from * *self
    }

    /// Transforms an element in `To` into `From`.
    #[doc(alias = "undo")]
    pub fn inverse_transform<T>(&self, in_to: T) -> <Self as Mul<T>>::Output
    where
        Self: Mul<T>,
    {
        *self * in_to
    }
}

impl<From, To> PartialEq<Self> for RigidBodyTransform<From, To> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.eq(&other.inner)
    }
}

impl<From, To> Display for RigidBodyTransform<From, To> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "origin at {}, rotated {}",
            self.translation(),
            self.rotation()
        )
    }
}

impl<From, To> Neg for RigidBodyTransform<From, To> {
    type Output = RigidBodyTransform<To, From>;

    fn neg(self) -> Self::Output {
        self.inverse()
    }
}

#[cfg(any(test, feature = "approx"))]
impl<From, To> AbsDiffEq<Self> for RigidBodyTransform<From, To> {
    type Epsilon = <f64 as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        Isometry3::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.translation()
            .inner
            .abs_diff_eq(&other.translation().inner, epsilon)
            && self.rotation().abs_diff_eq(&other.rotation(), epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl<From, To> RelativeEq for RigidBodyTransform<From, To> {
    fn default_max_relative() -> Self::Epsilon {
        Isometry3::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.translation()
            .inner
            .relative_eq(&other.translation().inner, epsilon, max_relative)
            && self
                .rotation()
                .relative_eq(&other.rotation(), epsilon, max_relative)
    }
}

// the stored transforms go To -> From, so moving a value From -> To applies the inverse.

// Coordinate<From> * Rotation<From, To> -> Coordinate<To>
impl<From, To> Mul<Rotation<From, To>> for Coordinate<From> {
    type Output = Coordinate<To>;

    fn mul(self, rhs: Rotation<From, To>) -> Self::Output {
        Coordinate::from_nalgebra_point(rhs.inner.inverse_transform_point(&self.point))
    }
}

// Rotation<From, To> * Coordinate<To> -> Coordinate<From>
impl<From, To> Mul<Coordinate<To>> for Rotation<From, To> {
    type Output = Coordinate<From>;

    fn mul(self, rhs: Coordinate<To>) -> Self::Output {
        Coordinate::from_nalgebra_point(self.inner.transform_point(&rhs.point))
    }
}

impl<From, To> Mul<Rotation<From, To>> for Vector<From> {
    type Output = Vector<To>;

    fn mul(self, rhs: Rotation<From, To>) -> Self::Output {
        Vector::from_nalgebra_vector(rhs.inner.inverse_transform_vector(&self.inner))
    }
}

impl<From, To> Mul<Vector<To>> for Rotation<From, To> {
    type Output = Vector<From>;

    fn mul(self, rhs: Vector<To>) -> Self::Output {
        Vector::from_nalgebra_vector(self.inner.transform_vector(&rhs.inner))
    }
}

impl<From, To> Mul<RigidBodyTransform<From, To>> for Coordinate<From> {
    type Output = Coordinate<To>;

    fn mul(self, rhs: RigidBodyTransform<From, To>) -> Self::Output {
        Coordinate::from_nalgebra_point(rhs.inner.inverse_transform_point(&self.point))
    }
}

impl<From, To> Mul<Coordinate<To>> for RigidBodyTransform<From, To> {
    type Output = Coordinate<From>;

    fn mul(self, rhs: Coordinate<To>) -> Self::Output {
        Coordinate::from_nalgebra_point(self.inner.transform_point(&rhs.point))
    }
}

impl<From, To> Mul<RigidBodyTransform<From, To>> for Vector<From> {
    type Output = Vector<To>;

    fn mul(self, rhs: RigidBodyTransform<From, To>) -> Self::Output {
        Vector::from_nalgebra_vector(rhs.inner.inverse_transform_vector(&self.inner))
    }
}

impl<From, To> Mul<Vector<To>> for RigidBodyTransform<From, To> {
    type Output = Vector<From>;

    fn mul(self, rhs: Vector<To>) -> Self::Output {
        Vector::from_nalgebra_vector(self.inner.transform_vector(&rhs.inner))
    }
}

// RigidBodyTransform<From, Over> * RigidBodyTransform<Over, To> -> RigidBodyTransform<From, To>
impl<From, Over, To> Mul<RigidBodyTransform<Over, To>> for RigidBodyTransform<From, Over> {
    type Output = RigidBodyTransform<From, To>;

    fn mul(self, rhs: RigidBodyTransform<Over, To>) -> Self::Output {
        RigidBodyTransform {
            inner: self.inner * rhs.inner,
            from: PhantomData,
            to: PhantomData,
        }
    }
}

// RigidBodyTransform<From, Over> * Rotation<Over, To> -> RigidBodyTransform<From, To>
impl<From, Over, To> Mul<Rotation<Over, To>> for RigidBodyTransform<From, Over> {
    type Output = RigidBodyTransform<From, To>;

    fn mul(self, rhs: Rotation<Over, To>) -> Self::Output {
        RigidBodyTransform {
            inner: self.inner * rhs.inner,
            from: PhantomData,
            to: PhantomData,
        }
    }
}
