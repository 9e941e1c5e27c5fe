use uom::si::angle::radian;
use uom::si::f64::Angle;

/// An angle that is only ever observed modulo a full turn.
///
/// Used to bring longitudes read back from [`Wgs84`](crate::systems::Wgs84) into signed range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct BoundedAngle {
    radians: f64,
}

impl BoundedAngle {
    pub(crate) fn new(angle: impl Into<Angle>) -> Self {
        Self {
            radians: Self::into_bounds(angle.into().get::<radian>()),
        }
    }

    /// Returns the angle in [-180°, 180°) in radians.
    pub(crate) fn to_signed_range(self) -> f64 {
        if self.radians < std::f64::consts::PI {
            self.radians
        } else {
            self.radians - std::f64::consts::TAU
        }
    }

    fn into_bounds(radians: f64) -> f64 {
        let bounded = radians.rem_euclid(std::f64::consts::TAU);
        // rem_euclid can round up to exactly TAU for tiny negative inputs
        if bounded >= std::f64::consts::TAU {
            0.
        } else {
            bounded
        }
    }
}
