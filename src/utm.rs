//! Universal Transverse Mercator projection.
//!
//! Forward and inverse projection use Krüger's series to third order in the third flattening,
//! which is accurate to well below a millimeter within a zone. Zone numbers follow the standard
//! 6° grid, including the Norway and Svalbard exceptions.
//!
//! A session fixes its UTM zone to the zone of its origin. [`Utm::from_wgs84_in_zone`] therefore
//! projects into a _given_ zone even when the position itself lies across a zone boundary.

use crate::error::{GeolocationError, Result};
use crate::geodetic::{Wgs84, FLATTENING, SEMI_MAJOR_AXIS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use uom::si::f64::{Angle, Length};
use uom::si::{
    angle::{degree, radian},
    length::meter,
};

const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

const BAND_LETTERS: &[u8; 20] = b"CDEFGHJKLMNPQRSTUVWX";

/// Series coefficients that only depend on the ellipsoid.
struct Kruger {
    /// Rectifying radius times the scale factor.
    k0_a: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
    /// `2√n / (1 + n)`, the eccentricity.
    e: f64,
}

impl Kruger {
    fn wgs84() -> Self {
        let n = FLATTENING / (2. - FLATTENING);
        let (n2, n3) = (n * n, n * n * n);
        let a = SEMI_MAJOR_AXIS / (1. + n) * (1. + n2 / 4. + n2 * n2 / 64.);
        Self {
            k0_a: SCALE_FACTOR * a,
            alpha: [
                n / 2. - 2. * n2 / 3. + 5. * n3 / 16.,
                13. * n2 / 48. - 3. * n3 / 5.,
                61. * n3 / 240.,
            ],
            beta: [
                n / 2. - 2. * n2 / 3. + 37. * n3 / 96.,
                n2 / 48. + n3 / 15.,
                17. * n3 / 480.,
            ],
            delta: [
                2. * n - 2. * n2 / 3. - 2. * n3,
                7. * n2 / 3. - 8. * n3 / 5.,
                56. * n3 / 15.,
            ],
            e: 2. * n.sqrt() / (1. + n),
        }
    }
}

/// A UTM zone: the 6° longitude strip number and the 8° latitude band letter.
/// Tolerance, in degrees, on the latitude limits of UTM.
const LIMIT_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtmZone {
    number: u8,
    band: char,
}

impl UtmZone {
    /// Returns the zone that contains `position`.
    ///
    /// Fails with [`GeolocationError::InvalidCoordinate`] outside the UTM latitude limits
    /// (80°S to 84°N), where polar stereographic projections take over.
    pub fn containing(position: &Wgs84) -> Result<Self> {
        if !position.is_finite() {
            return Err(GeolocationError::InvalidCoordinate(
                "position must be finite to have a UTM zone",
            ));
        }
        let latitude = position.latitude().get::<degree>();
        let longitude = position.longitude().get::<degree>();
        // angles come back from radians a few ulps off, so the limits themselves must still pass
        if !(-80.0 - LIMIT_SLACK..=84.0 + LIMIT_SLACK).contains(&latitude) {
            return Err(GeolocationError::InvalidCoordinate(
                "UTM is only defined between 80°S and 84°N",
            ));
        }
        let latitude = latitude.clamp(-80., 84.);

        let mut number = ((longitude + 180.) / 6.).floor().clamp(0., 59.) as u8 + 1;
        if (56.0..64.0).contains(&latitude) && (3.0..12.0).contains(&longitude) {
            number = 32;
        }
        if (72.0..=84.0).contains(&latitude) {
            number = match longitude {
                l if (0.0..9.0).contains(&l) => 31,
                l if (9.0..21.0).contains(&l) => 33,
                l if (21.0..33.0).contains(&l) => 35,
                l if (33.0..42.0).contains(&l) => 37,
                _ => number,
            };
        }

        // band X is 12° tall, so 84°N still lands in it
        let band_index = (((latitude + 80.) / 8.).floor() as usize).min(BAND_LETTERS.len() - 1);
        Ok(Self {
            number,
            band: char::from(BAND_LETTERS[band_index]),
        })
    }

    /// Constructs a zone from its number (1 to 60) and band letter (C to X, without I and O).
    #[must_use]
    pub fn new(number: u8, band: char) -> Option<Self> {
        let band = band.to_ascii_uppercase();
        ((1..=60).contains(&number) && BAND_LETTERS.contains(&(band as u8)))
            .then_some(Self { number, band })
    }

    #[must_use]
    pub fn number(&self) -> u8 {
        self.number
    }

    #[must_use]
    pub fn band(&self) -> char {
        self.band
    }

    /// Bands N and up lie north of the equator.
    #[must_use]
    pub fn is_northern(&self) -> bool {
        self.band >= 'N'
    }

    /// Returns the longitude of this zone's central meridian.
    #[must_use]
    pub fn central_meridian(&self) -> Angle {
        Angle::new::<degree>(f64::from(self.number) * 6. - 183.)
    }

    fn false_northing(&self) -> f64 {
        if self.is_northern() {
            0.
        } else {
            FALSE_NORTHING_SOUTH
        }
    }
}

impl Display for UtmZone {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.band)
    }
}

/// A projected position in a UTM zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Utm {
    pub easting: Length,
    pub northing: Length,
    pub zone: UtmZone,
}

impl Utm {
    /// Projects `position` into its own zone.
    ///
    /// ```rust
    /// use sightline::{systems::Wgs84, utm::Utm};
    /// use uom::si::length::meter;
    ///
    /// let origin = Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456)?;
    /// let utm = Utm::from_wgs84(&origin)?;
    /// assert_eq!(utm.zone.to_string(), "23K");
    /// assert!((utm.easting.get::<meter>() - 682_427.711).abs() < 1e-3);
    /// # Ok::<(), sightline::GeolocationError>(())
    /// ```
    pub fn from_wgs84(position: &Wgs84) -> Result<Self> {
        Self::from_wgs84_in_zone(position, UtmZone::containing(position)?)
    }

    /// Projects `position` into the given zone, whether or not the position lies inside it.
    pub fn from_wgs84_in_zone(position: &Wgs84, zone: UtmZone) -> Result<Self> {
        let k = Kruger::wgs84();
        let phi = position.latitude().get::<radian>();
        let dl = position.longitude().get::<radian>() - zone.central_meridian().get::<radian>();

        let t = (phi.sin().atanh() - k.e * (k.e * phi.sin()).atanh()).sinh();
        let xi_p = t.atan2(dl.cos());
        let eta_p = (dl.sin() / (1. + t * t).sqrt()).atanh();

        let (mut xi, mut eta) = (xi_p, eta_p);
        for (j, alpha) in (1..=3).zip(k.alpha) {
            let j2 = f64::from(2 * j);
            xi += alpha * (j2 * xi_p).sin() * (j2 * eta_p).cosh();
            eta += alpha * (j2 * xi_p).cos() * (j2 * eta_p).sinh();
        }

        let easting = FALSE_EASTING + k.k0_a * eta;
        let northing = zone.false_northing() + k.k0_a * xi;
        if !(easting.is_finite() && northing.is_finite()) {
            return Err(GeolocationError::InvalidCoordinate(
                "position cannot be projected into this UTM zone",
            ));
        }

        Ok(Self {
            easting: Length::new::<meter>(easting),
            northing: Length::new::<meter>(northing),
            zone,
        })
    }

    /// Unprojects back to a geodetic position at the given altitude.
    pub fn to_wgs84(&self, altitude: impl Into<Length>) -> Result<Wgs84> {
        let k = Kruger::wgs84();
        let xi = (self.northing.get::<meter>() - self.zone.false_northing()) / k.k0_a;
        let eta = (self.easting.get::<meter>() - FALSE_EASTING) / k.k0_a;

        let (mut xi_p, mut eta_p) = (xi, eta);
        for (j, beta) in (1..=3).zip(k.beta) {
            let j2 = f64::from(2 * j);
            xi_p -= beta * (j2 * xi).sin() * (j2 * eta).cosh();
            eta_p -= beta * (j2 * xi).cos() * (j2 * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, delta) in (1..=3).zip(k.delta) {
            phi += delta * (f64::from(2 * j) * chi).sin();
        }
        let lambda = self.zone.central_meridian().get::<radian>() + eta_p.sinh().atan2(xi_p.cos());

        if !(phi.is_finite() && lambda.is_finite()) {
            return Err(GeolocationError::InvalidCoordinate(
                "UTM easting/northing must be finite",
            ));
        }
        Wgs84::builder()
            .latitude(Angle::new::<radian>(phi))
            .ok_or(GeolocationError::InvalidCoordinate(
                "UTM northing is beyond the pole",
            ))
            .map(|b| {
                b.longitude(Angle::new::<radian>(lambda))
                    .altitude(altitude)
                    .build()
            })
    }
}

impl Display for Utm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.3}E {:.3}N",
            self.zone,
            self.easting.get::<meter>(),
            self.northing.get::<meter>()
        )
    }
}
