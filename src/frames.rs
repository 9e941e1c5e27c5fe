//! The session's local tangent frame and conversions into and out of it.
//!
//! A [`LocalOrigin`] fixes the geodetic anchor of the [`World`] frame for the lifetime of a
//! session. Conversions between geodetic and local coordinates go through ECEF, so they are exact
//! rather than a tangent-plane approximation. Conversions to and from UTM use the zone of the
//! origin and plain offsets: `utm = utm0 + (east, north)` and `altitude = h0 + up`.

use crate::coordinate_systems::{Ecef, World};
use crate::coordinates::Coordinate;
use crate::error::{GeolocationError, Result};
use crate::geodetic::Wgs84;
use crate::math::RigidBodyTransform;
use crate::utm::{Utm, UtmZone};
use std::fmt;
use std::fmt::{Display, Formatter};
use uom::si::f64::Length;
use uom::si::length::meter;

/// The fixed geodetic anchor of the session's [`World`] frame.
#[derive(Debug, Clone, Copy)]
pub struct LocalOrigin {
    position: Wgs84,
    ecef_to_world: RigidBodyTransform<Ecef, World>,
    utm: Utm,
}

impl LocalOrigin {
    /// Anchors the [`World`] frame at `position`.
    ///
    /// Fails with [`GeolocationError::InvalidCoordinate`] if the position is not finite or lies
    /// outside the UTM latitude limits.
    ///
    /// ```rust
    /// use sightline::{frames::LocalOrigin, systems::Wgs84};
    /// use uom::si::length::meter;
    ///
    /// let origin = LocalOrigin::new(Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456)?)?;
    /// let here = origin.geodetic_to_enu(&origin.position())?;
    /// assert!(here.distance_from_origin().get::<meter>() < 1e-6);
    /// # Ok::<(), sightline::GeolocationError>(())
    /// ```
    pub fn new(position: Wgs84) -> Result<Self> {
        if !position.is_finite() {
            return Err(GeolocationError::InvalidCoordinate(
                "session origin must be finite",
            ));
        }
        let utm = Utm::from_wgs84(&position)?;

        // SAFETY: `World` is, by definition, the ENU frame anchored at the session origin.
        let ecef_to_world = unsafe { RigidBodyTransform::ecef_to_enu_at(&position) };

        tracing::debug!(origin = %position, zone = %utm.zone, "anchored world frame");
        Ok(Self {
            position,
            ecef_to_world,
            utm,
        })
    }

    /// Returns the geodetic position of the [`World`] origin.
    #[must_use]
    pub fn position(&self) -> Wgs84 {
        self.position
    }

    /// Returns the projected position of the [`World`] origin.
    #[must_use]
    pub fn utm(&self) -> Utm {
        self.utm
    }

    /// Returns the UTM zone every projected position of this session is expressed in.
    #[must_use]
    pub fn zone(&self) -> UtmZone {
        self.utm.zone
    }

    /// Returns the transform from [`Ecef`] into [`World`].
    #[must_use]
    pub fn ecef_to_world(&self) -> RigidBodyTransform<Ecef, World> {
        self.ecef_to_world
    }

    /// Expresses a geodetic position as East, North, and Up of the origin.
    pub fn geodetic_to_enu(&self, position: &Wgs84) -> Result<Coordinate<World>> {
        if !position.is_finite() {
            return Err(GeolocationError::InvalidCoordinate(
                "geodetic position must be finite",
            ));
        }
        Ok(position.to_ecef() * self.ecef_to_world)
    }

    /// Converts a local East, North, Up position back into a geodetic one.
    pub fn enu_to_geodetic(&self, position: &Coordinate<World>) -> Result<Wgs84> {
        if !position.is_finite() {
            return Err(GeolocationError::InvalidCoordinate(
                "local position must be finite",
            ));
        }
        Ok(self.ecef_to_world.inverse_transform(*position).to_wgs84())
    }

    /// Offsets a local position into the origin's UTM zone, returning the projected position and
    /// the altitude.
    pub fn enu_to_utm(&self, position: &Coordinate<World>) -> Result<(Utm, Length)> {
        if !position.is_finite() {
            return Err(GeolocationError::InvalidCoordinate(
                "local position must be finite",
            ));
        }
        let utm = Utm {
            easting: self.utm.easting + position.enu_east(),
            northing: self.utm.northing + position.enu_north(),
            zone: self.utm.zone,
        };
        Ok((utm, self.position.altitude() + position.enu_up()))
    }

    /// Inverse of [`LocalOrigin::enu_to_utm`].
    ///
    /// Fails with [`GeolocationError::InvalidCoordinate`] if `utm` is in a different zone than
    /// the origin; positions are never re-zoned within a session.
    pub fn utm_to_enu(&self, utm: &Utm, altitude: Length) -> Result<Coordinate<World>> {
        if utm.zone != self.utm.zone {
            return Err(GeolocationError::InvalidCoordinate(
                "UTM position is not in the session's zone",
            ));
        }
        let position = Coordinate::from_cartesian(
            utm.easting - self.utm.easting,
            utm.northing - self.utm.northing,
            altitude - self.position.altitude(),
        );
        if !position.is_finite() {
            return Err(GeolocationError::InvalidCoordinate(
                "UTM position must be finite",
            ));
        }
        Ok(position)
    }

    /// Projects a geodetic position into the origin's UTM zone.
    pub fn geodetic_to_utm(&self, position: &Wgs84) -> Result<Utm> {
        Utm::from_wgs84_in_zone(position, self.utm.zone)
    }

    /// Altitude of the origin in meters; used by solvers that work in raw numbers.
    pub(crate) fn altitude_m(&self) -> f64 {
        self.position.altitude().get::<meter>()
    }
}

impl Display for LocalOrigin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.position, self.utm)
    }
}
