use crate::coordinate_systems::{
    CoordinateSystem, EnuLike, FrdLike, HasComponents, NedLike, RdfLike, RightHandedXyzLike,
};
use crate::vectors::Vector;
use crate::Point3;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use uom::si::f64::Length;
use uom::si::length::meter;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

use serde::{Deserialize, Serialize};

/// Defines a point (ie, position) in the coordinate system specified by `In`.
///
/// Depending on the convention of the coordinate system (eg, [`EnuLike`] or [`RdfLike`]), you'll
/// have different appropriately-named accessors for the coordinate's cartesian components like
/// [`Coordinate::enu_east`] or [`Coordinate::rdf_forward`].
///
/// <div class="warning">
///
/// When deserializing, the coordinate system of the deserialized value is _not_ checked.
///
/// </div>
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
#[serde(transparent)]
pub struct Coordinate<In> {
    /// X, Y, Z in meters
    pub(crate) point: Point3,
    #[serde(skip)]
    system: PhantomData<In>,
}

// manual impls of Clone and Copy to avoid requiring In: Copy + Clone
impl<In> Clone for Coordinate<In> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<In> Copy for Coordinate<In> {}

impl<In> Coordinate<In> {
    pub(crate) fn from_nalgebra_point(p: Point3) -> Self {
        Self {
            point: p,
            system: PhantomData,
        }
    }

    /// Constructs a coordinate from named components.
    ///
    /// ```rust
    /// use sightline::{systems::{EnuComponents, World}, Coordinate};
    /// use uom::si::{f64::Length, length::meter};
    ///
    /// let drone = Coordinate::<World>::build(EnuComponents {
    ///     east: Length::new::<meter>(12.),
    ///     north: Length::new::<meter>(-3.),
    ///     up: Length::new::<meter>(50.),
    /// });
    /// assert_eq!(drone.enu_up(), Length::new::<meter>(50.));
    /// ```
    pub fn build(components: <In::Convention as HasComponents>::Components) -> Self
    where
        In: CoordinateSystem,
        In::Convention: HasComponents,
    {
        let [x, y, z]: [Length; 3] = components.into();
        Self::from_cartesian(x, y, z)
    }

    /// Constructs a coordinate at the given (x, y, z) cartesian point in the [`CoordinateSystem`]
    /// `In`.
    ///
    /// The meaning of `x`, `y`, and `z` is dictated by the [`CoordinateSystem::Convention`] of
    /// `In`. For example, in [`EnuLike`], `x` is East, `y` is North, and `z` is Up.
    pub fn from_cartesian(
        x: impl Into<Length>,
        y: impl Into<Length>,
        z: impl Into<Length>,
    ) -> Self {
        Self::from_nalgebra_point(Point3::new(
            x.into().get::<meter>(),
            y.into().get::<meter>(),
            z.into().get::<meter>(),
        ))
    }

    /// Constructs a coordinate at the origin of the coordinate system `In`.
    #[must_use]
    pub fn origin() -> Self {
        Self::from_nalgebra_point(Point3::origin())
    }

    /// Returns the cartesian components of this coordinate in meters, in `In`'s axis order.
    #[must_use]
    pub fn to_cartesian(&self) -> [Length; 3] {
        [
            Length::new::<meter>(self.point.x),
            Length::new::<meter>(self.point.y),
            Length::new::<meter>(self.point.z),
        ]
    }

    /// Returns the straight-line distance from [`Coordinate::origin`].
    #[must_use]
    pub fn distance_from_origin(&self) -> Length {
        Length::new::<meter>(self.point.coords.norm())
    }

    /// Returns the straight-line distance to another coordinate in the same system.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> Length {
        (*self - *other).magnitude()
    }

    /// Returns `true` if every component is finite (neither NaN nor infinite).
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.point.iter().all(|c| c.is_finite())
    }
}

macro_rules! accessors {
    {convention = $convention:ident, $($field:ident => $idx:ident),+ $(,)?} => {
        impl<In> Coordinate<In>
        where
            In: CoordinateSystem<Convention = $convention>,
        {
            $(
                #[doc = concat!("Returns the `", stringify!($field), "` component of this coordinate.")]
                #[must_use]
                pub fn $field(&self) -> Length {
                    Length::new::<meter>(self.point.$idx)
                }
            )+
        }
    };
}

accessors! {convention = EnuLike, enu_east => x, enu_north => y, enu_up => z}
accessors! {convention = NedLike, ned_north => x, ned_east => y, ned_down => z}
accessors! {convention = FrdLike, frd_front => x, frd_right => y, frd_down => z}
accessors! {convention = RdfLike, rdf_right => x, rdf_down => y, rdf_forward => z}
accessors! {convention = RightHandedXyzLike, x => x, y => y, z => z}

impl<In> PartialEq<Self> for Coordinate<In> {
    fn eq(&self, other: &Self) -> bool {
        self.point.eq(&other.point)
    }
}

#[cfg(any(test, feature = "approx"))]
impl<In> AbsDiffEq<Self> for Coordinate<In> {
    type Epsilon = Length;

    fn default_epsilon() -> Self::Epsilon {
        // centimeter precision is plenty for ground positions
        Length::new::<meter>(0.01)
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        // NOTE: per-component, not distance between the points.
        self.point.abs_diff_eq(&other.point, epsilon.get::<meter>())
    }
}

#[cfg(any(test, feature = "approx"))]
impl<In> RelativeEq for Coordinate<In> {
    fn default_max_relative() -> Self::Epsilon {
        Length::new::<meter>(Point3::default_max_relative())
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.point.relative_eq(
            &other.point,
            epsilon.get::<meter>(),
            max_relative.get::<meter>(),
        )
    }
}

impl<In> Display for Coordinate<In> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.3}, {:.3}, {:.3})",
            self.point.x, self.point.y, self.point.z
        )
    }
}

impl<In> Sub<Self> for Coordinate<In> {
    type Output = Vector<In>;

    fn sub(self, rhs: Self) -> Self::Output {
        Vector::from_nalgebra_vector(self.point - rhs.point)
    }
}

impl<In> Add<Vector<In>> for Coordinate<In> {
    type Output = Coordinate<In>;

    fn add(self, rhs: Vector<In>) -> Self::Output {
        Coordinate::from_nalgebra_point(self.point + rhs.inner)
    }
}

impl<In> AddAssign<Vector<In>> for Coordinate<In> {
    fn add_assign(&mut self, rhs: Vector<In>) {
        self.point += rhs.inner;
    }
}

impl<In> Sub<Vector<In>> for Coordinate<In> {
    type Output = Coordinate<In>;

    fn sub(self, rhs: Vector<In>) -> Self::Output {
        Coordinate::from_nalgebra_point(self.point - rhs.inner)
    }
}

impl<In> SubAssign<Vector<In>> for Coordinate<In> {
    fn sub_assign(&mut self, rhs: Vector<In>) {
        self.point -= rhs.inner;
    }
}
