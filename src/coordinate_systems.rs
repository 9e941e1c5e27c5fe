use uom::si::f64::Length;

#[cfg(doc)]
use crate::{Coordinate, Vector};

/// A frame that points and vectors can be expressed in.
///
/// The `Convention` says how the axes are laid out: any system with `Convention = EnuLike` is
/// built from [`EnuComponents`] and read back through the `enu_*` accessors of [`Coordinate`] and
/// [`Vector`]. Declare systems with [`system!`](crate::system) rather than implementing this by
/// hand.
pub trait CoordinateSystem {
    type Convention;
}

/// Names the three axes of a convention, for building points and vectors component-wise.
pub trait HasComponents {
    type Components: Into<[Length; 3]>;
}

/// Declares a convention marker together with its named components.
macro_rules! convention {
    (
        $(#[$doc:meta])*
        $convention:ident => $components:ident { $x:ident, $y:ident, $z:ident }
    ) => {
        $(#[$doc])*
        pub struct $convention;

        #[doc = concat!("The named axes of an [`", stringify!($convention), "`] system.")]
        #[derive(Debug, Clone, Copy)]
        #[must_use]
        pub struct $components {
            pub $x: Length,
            pub $y: Length,
            pub $z: Length,
        }

        impl From<$components> for [Length; 3] {
            fn from(components: $components) -> [Length; 3] {
                [components.$x, components.$y, components.$z]
            }
        }

        impl HasComponents for $convention {
            type Components = $components;
        }
    };
}

convention! {
    /// East, North, and Up, in that order.
    ///
    /// Z points away from the center of the earth. The session [`World`] frame is ENU-like and
    /// anchored at the session origin.
    ///
    /// <https://en.wikipedia.org/wiki/Local_tangent_plane_coordinates#Local_east,_north,_up_(ENU)_coordinates>
    EnuLike => EnuComponents { east, north, up }
}

convention! {
    /// North, East, and Down, in that order.
    ///
    /// The drone's level frame is NED-like: the gimbal yaw, pitch, and roll reported in telemetry
    /// are measured from it.
    ///
    /// <https://en.wikipedia.org/wiki/Local_tangent_plane_coordinates#Local_north,_east,_down_(NED)_coordinates>
    NedLike => NedComponents { north, east, down }
}

convention! {
    /// Front, Right, and Down of whatever body the system is attached to.
    ///
    /// Turn the body and the same point gets different coordinates. The gimbal body is FRD-like.
    ///
    /// <https://en.wikipedia.org/wiki/Aircraft_principal_axes>
    FrdLike => FrdComponents { front, right, down }
}

convention! {
    /// Right, Down, and Forward, the pinhole camera convention.
    ///
    /// X grows with the pixel column, Y with the pixel row, and Z runs along the optical axis, so
    /// pixels are `K · (x/z, y/z, 1)`.
    RdfLike => RdfComponents { right, down, forward }
}

convention! {
    /// Plain right-handed X, Y, and Z with no further meaning attached.
    RightHandedXyzLike => XyzComponents { x, y, z }
}

/// Declares a coordinate system following one of the conventions.
///
/// The result is a zero-sized marker type. It only tags [`Coordinate`]s and [`Vector`]s; how it
/// relates to other systems is up to the rotations and transforms built between them.
///
/// ```rust
/// # use sightline::system;
/// system!(pub struct SiteEnu using ENU);
/// system!(pub struct PayloadFrd using FRD);
/// system!(pub struct ThermalCamera using RDF);
/// system!(pub struct Scratch using right-handed XYZ);
/// ```
///
/// Doc comments and attributes are passed through:
///
/// ```rust
/// sightline::system! {
///     /// The left camera of a stereo pair.
///     #[derive(Hash)]
///     pub(crate) struct LeftCamera using RDF
/// }
/// ```
#[macro_export]
macro_rules! system {
    ($(#[$attr:meta])* $vis:vis struct $name:ident using right-handed XYZ) => {
        $crate::system!($(#[$attr])* $vis struct $name as RightHandedXyzLike);
    };
    ($(#[$attr:meta])* $vis:vis struct $name:ident using ENU) => {
        $crate::system!($(#[$attr])* $vis struct $name as EnuLike);
    };
    ($(#[$attr:meta])* $vis:vis struct $name:ident using NED) => {
        $crate::system!($(#[$attr])* $vis struct $name as NedLike);
    };
    ($(#[$attr:meta])* $vis:vis struct $name:ident using FRD) => {
        $crate::system!($(#[$attr])* $vis struct $name as FrdLike);
    };
    ($(#[$attr:meta])* $vis:vis struct $name:ident using RDF) => {
        $crate::system!($(#[$attr])* $vis struct $name as RdfLike);
    };
    {
        $(#[$attr:meta])*
        $vis:vis struct $name:ident
        as $convention:ident
    } => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        $vis struct $name;

        impl $crate::CoordinateSystem for $name {
            type Convention = $crate::systems::$convention;
        }
    };
}

system! {
    /// The [Earth-centered, Earth-fixed (ECEF)][ecef] coordinate system.
    ///
    /// - Positive Z is towards the North pole.
    /// - Positive X is towards the prime meridian on the equator.
    /// - Positive Y is towards 90°E on the equator.
    ///
    /// [ecef]: https://en.wikipedia.org/wiki/Earth-centered,_Earth-fixed_coordinate_system
    #[allow(clippy::upper_case_acronyms)]
    pub struct Ecef using right-handed XYZ
}

system! {
    /// The session's world frame: East-North-Up anchored at the fixed session origin.
    ///
    /// Poses, rays, and ground hits are all expressed here.
    pub struct World using ENU
}

system! {
    /// The drone's level frame, centered on the drone, with North-East-Down axes.
    pub struct DroneNed using NED
}

system! {
    /// The gimbal body frame. Its orientation relative to [`DroneNed`] is the gimbal yaw, pitch,
    /// and roll reported by telemetry.
    pub struct GimbalFrd using FRD
}

system! {
    /// The optical frame of the camera mounted on the gimbal.
    pub struct Camera using RDF
}

system! {
    /// The eye frame used by OpenGL-style renderers (X right, Y up, looking down negative Z).
    pub struct GlEye using right-handed XYZ
}
