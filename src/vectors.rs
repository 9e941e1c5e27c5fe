use crate::coordinate_systems::{CoordinateSystem, EnuLike, HasComponents, RdfLike};
use crate::coordinates::Coordinate;
use crate::error::{GeolocationError, Result};
use crate::Vector3;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::ops::{Add, Mul, Neg, Sub};
use uom::si::f64::{Angle, Length};
use uom::si::{angle::radian, length::meter};

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

use serde::{Deserialize, Serialize};

/// Defines a vector (ie, direction with magnitude) in the coordinate system specified by `In`.
///
/// Following the convention in computer vision, a vector is a displacement _without an explicit
/// origin_. When moved into another coordinate system it is only rotated, never translated.
///
/// Ray directions are vectors; they need not be unit length, but every solver normalizes them
/// before use (see [`Vector::normalized`]).
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
#[serde(transparent)]
pub struct Vector<In> {
    /// X, Y, Z in meters
    pub(crate) inner: Vector3,
    #[serde(skip)]
    system: PhantomData<In>,
}

// manual impls of Clone and Copy to avoid requiring In: Copy + Clone
impl<In> Clone for Vector<In> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<In> Copy for Vector<In> {}

impl<In> Vector<In> {
    pub(crate) fn from_nalgebra_vector(v: Vector3) -> Self {
        Self {
            inner: v,
            system: PhantomData,
        }
    }

    /// Constructs a vector from named components.
    pub fn build(components: <In::Convention as HasComponents>::Components) -> Self
    where
        In: CoordinateSystem,
        In::Convention: HasComponents,
    {
        let [x, y, z]: [Length; 3] = components.into();
        Self::from_cartesian(x, y, z)
    }

    /// Constructs a vector with the given (x, y, z) cartesian components in `In`.
    pub fn from_cartesian(
        x: impl Into<Length>,
        y: impl Into<Length>,
        z: impl Into<Length>,
    ) -> Self {
        Self::from_nalgebra_vector(Vector3::new(
            x.into().get::<meter>(),
            y.into().get::<meter>(),
            z.into().get::<meter>(),
        ))
    }

    /// Constructs the zero-length vector.
    #[must_use]
    pub fn zero() -> Self {
        Self::from_nalgebra_vector(Vector3::zeros())
    }

    /// Returns the cartesian components of this vector in meters, in `In`'s axis order.
    #[must_use]
    pub fn to_cartesian(&self) -> [Length; 3] {
        [
            Length::new::<meter>(self.inner.x),
            Length::new::<meter>(self.inner.y),
            Length::new::<meter>(self.inner.z),
        ]
    }

    /// Returns the length of this vector.
    #[must_use]
    pub fn magnitude(&self) -> Length {
        Length::new::<meter>(self.inner.norm())
    }

    /// Returns a unit-length vector pointing the same way.
    ///
    /// Fails with [`GeolocationError::DegenerateVectors`] for the zero vector and for vectors with
    /// non-finite components, since neither has a direction.
    pub fn normalized(&self) -> Result<Self> {
        let norm = self.inner.norm();
        if !norm.is_finite() {
            return Err(GeolocationError::InvalidCoordinate(
                "vector has non-finite components",
            ));
        }
        if norm <= f64::EPSILON {
            return Err(GeolocationError::DegenerateVectors(
                "cannot normalize a zero-length vector",
            ));
        }
        Ok(Self::from_nalgebra_vector(self.inner / norm))
    }

    /// Returns the dot product with another vector, in square meters as a raw scalar.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.inner.dot(&other.inner)
    }

    /// Returns the cross product with another vector (right-handed).
    #[must_use]
    pub fn cross(&self, other: &Self) -> Self {
        Self::from_nalgebra_vector(self.inner.cross(&other.inner))
    }

    /// Returns the unsigned angle between two vectors, in [0°, 180°].
    ///
    /// Returns `None` if either vector is zero-length.
    #[must_use]
    pub fn angle_to(&self, other: &Self) -> Option<Angle> {
        let denom = self.inner.norm() * other.inner.norm();
        if denom <= f64::EPSILON {
            return None;
        }
        let cos = (self.inner.dot(&other.inner) / denom).clamp(-1., 1.);
        Some(Angle::new::<radian>(cos.acos()))
    }

    /// Returns `true` if every component is finite (neither NaN nor infinite).
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.inner.iter().all(|c| c.is_finite())
    }
}

impl<In> Vector<In>
where
    In: CoordinateSystem<Convention = EnuLike>,
{
    /// Returns the East component of this vector.
    #[must_use]
    pub fn enu_east(&self) -> Length {
        Length::new::<meter>(self.inner.x)
    }

    /// Returns the North component of this vector.
    #[must_use]
    pub fn enu_north(&self) -> Length {
        Length::new::<meter>(self.inner.y)
    }

    /// Returns the Up component of this vector.
    #[must_use]
    pub fn enu_up(&self) -> Length {
        Length::new::<meter>(self.inner.z)
    }
}

impl<In> Vector<In>
where
    In: CoordinateSystem<Convention = RdfLike>,
{
    /// Returns the component along the optical axis.
    #[must_use]
    pub fn rdf_forward(&self) -> Length {
        Length::new::<meter>(self.inner.z)
    }
}

impl<In> From<Coordinate<In>> for Vector<In> {
    fn from(value: Coordinate<In>) -> Self {
        value - Coordinate::origin()
    }
}

impl<In> PartialEq<Self> for Vector<In> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.eq(&other.inner)
    }
}

#[cfg(any(test, feature = "approx"))]
impl<In> AbsDiffEq<Self> for Vector<In> {
    type Epsilon = Length;

    fn default_epsilon() -> Self::Epsilon {
        Length::new::<meter>(1e-9)
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.inner.abs_diff_eq(&other.inner, epsilon.get::<meter>())
    }
}

#[cfg(any(test, feature = "approx"))]
impl<In> RelativeEq for Vector<In> {
    fn default_max_relative() -> Self::Epsilon {
        Length::new::<meter>(Vector3::default_max_relative())
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.inner.relative_eq(
            &other.inner,
            epsilon.get::<meter>(),
            max_relative.get::<meter>(),
        )
    }
}

impl<In> Display for Vector<In> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.3}, {:.3}, {:.3}]",
            self.inner.x, self.inner.y, self.inner.z
        )
    }
}

impl<In> Neg for Vector<In> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::from_nalgebra_vector(-self.inner)
    }
}

impl<In> Add<Self> for Vector<In> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::from_nalgebra_vector(self.inner + rhs.inner)
    }
}

impl<In> Sub<Self> for Vector<In> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::from_nalgebra_vector(self.inner - rhs.inner)
    }
}

impl<In> Mul<f64> for Vector<In> {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self::from_nalgebra_vector(self.inner * rhs)
    }
}

#[cfg(test)]
mod tests {
    use crate::coordinate_systems::{Camera, World};
    use crate::error::GeolocationError;
    use crate::vectors::Vector;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use uom::si::f64::Length;
    use uom::si::{angle::degree, length::meter};

    fn m(meters: f64) -> Length {
        Length::new::<meter>(meters)
    }

    fn v(x: f64, y: f64, z: f64) -> Vector<World> {
        Vector::from_cartesian(m(x), m(y), m(z))
    }

    #[rstest]
    #[case(v(3., 0., 4.), v(0.6, 0., 0.8))]
    #[case(v(0., -2., 0.), v(0., -1., 0.))]
    #[case(v(1e-3, 1e-3, 0.), v(std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2, 0.))]
    fn normalizes(#[case] input: Vector<World>, #[case] expected: Vector<World>) {
        assert_relative_eq!(input.normalized().unwrap(), expected);
    }

    #[test]
    fn zero_vector_cannot_be_normalized() {
        assert!(matches!(
            Vector::<Camera>::zero().normalized(),
            Err(GeolocationError::DegenerateVectors(_))
        ));
    }

    #[test]
    fn nan_vector_cannot_be_normalized() {
        assert!(matches!(
            v(f64::NAN, 0., 1.).normalized(),
            Err(GeolocationError::InvalidCoordinate(_))
        ));
    }

    #[rstest]
    #[case(v(1., 0., 0.), v(0., 1., 0.), 90.)]
    #[case(v(1., 0., 0.), v(1., 1., 0.), 45.)]
    #[case(v(1., 0., 0.), v(-2., 0., 0.), 180.)]
    #[case(v(0., 0., 5.), v(0., 0., 1.), 0.)]
    fn angles_between(#[case] a: Vector<World>, #[case] b: Vector<World>, #[case] expected: f64) {
        let angle = a.angle_to(&b).unwrap();
        assert_relative_eq!(angle.get::<degree>(), expected, epsilon = 1e-9);
    }

    #[test]
    fn cross_is_right_handed() {
        assert_relative_eq!(v(1., 0., 0.).cross(&v(0., 1., 0.)), v(0., 0., 1.));
    }
}
