use crate::error::{GeolocationError, Result};
use crate::{systems::Ecef, util::BoundedAngle, Coordinate, Point3};
use std::fmt;
use std::fmt::Display;
use std::marker::PhantomData;
use uom::si::f64::{Angle, Length};
use uom::si::{
    angle::{degree, radian},
    length::meter,
};
use uom::ConstZero;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};
use serde::{Deserialize, Serialize};

// WGS84 defining parameters, https://nsgreg.nga.mil/doc/view?i=4085 table 3.1
#[doc(alias = "a")]
pub(crate) const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
#[doc(alias = "1/f")]
const INVERSE_FLATTENING: f64 = 298.257_223_563;
#[doc(alias = "f")]
pub(crate) const FLATTENING: f64 = 1.0 / INVERSE_FLATTENING;
#[doc(alias = "b")]
const SEMI_MINOR_AXIS: f64 = SEMI_MAJOR_AXIS * (1.0 - FLATTENING);
#[doc(alias = "e^2")]
const ECCENTRICITY_SQ: f64 = FLATTENING * (2.0 - FLATTENING);

/// A geodetic position on the [WGS84] ellipsoid.
///
/// This is what the engine hands back for every resolved pixel, and what landmarks are given in.
/// Latitude and longitude are kept as [`Angle`]s; the altitude is the height above the reference
/// ellipsoid (or whatever vertical reference the telemetry uses, as long as it is used
/// consistently within a session).
///
/// [WGS84]: https://en.wikipedia.org/wiki/World_Geodetic_System#WGS_84
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wgs84 {
    // uom may store these in any normalization; the accessors bring them into signed range.
    pub(crate) latitude: Angle,
    pub(crate) longitude: Angle,
    altitude: Length,
}

impl Wgs84 {
    /// Constructs a position from named components.
    ///
    /// Returns `None` if the latitude is not in [-90°, 90°] (modulo full turns).
    #[must_use]
    pub fn build(
        Components {
            latitude,
            longitude,
            altitude,
        }: Components,
    ) -> Option<Self> {
        Some(
            Self::builder()
                .latitude(latitude)?
                .longitude(longitude)
                .altitude(altitude)
                .build(),
        )
    }

    /// Provides a step-wise constructor that cannot mix up the argument order.
    pub fn builder() -> Builder<MissingLatitude, MissingLongitude, MissingAltitude> {
        Builder {
            under_construction: Wgs84 {
                latitude: Angle::ZERO,
                longitude: Angle::ZERO,
                altitude: Length::ZERO,
            },
            has: (PhantomData, PhantomData, PhantomData),
        }
    }

    /// Constructs a position from plain degrees and meters, as found in telemetry and config.
    ///
    /// ```rust
    /// use sightline::systems::Wgs84;
    /// use uom::si::angle::degree;
    ///
    /// let origin = Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456)?;
    /// assert!((origin.latitude().get::<degree>() + 22.905812).abs() < 1e-9);
    ///
    /// assert!(Wgs84::try_from_degrees(f64::NAN, 0., 0.).is_err());
    /// assert!(Wgs84::try_from_degrees(91., 0., 0.).is_err());
    /// # Ok::<(), sightline::GeolocationError>(())
    /// ```
    pub fn try_from_degrees(latitude: f64, longitude: f64, altitude: f64) -> Result<Self> {
        if !(latitude.is_finite() && longitude.is_finite() && altitude.is_finite()) {
            return Err(GeolocationError::InvalidCoordinate(
                "latitude, longitude, and altitude must be finite",
            ));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(GeolocationError::InvalidCoordinate(
                "latitude must be within [-90°, 90°]",
            ));
        }
        Ok(Self {
            latitude: Angle::new::<degree>(latitude),
            longitude: Angle::new::<degree>(longitude),
            altitude: Length::new::<meter>(altitude),
        })
    }

    /// Returns the latitude, in [-90°, 90°].
    #[must_use]
    pub fn latitude(&self) -> Angle {
        Angle::new::<radian>(BoundedAngle::new(self.latitude).to_signed_range())
    }

    /// Returns the longitude east of the reference meridian, in [-180°, 180°).
    #[must_use]
    pub fn longitude(&self) -> Angle {
        Angle::new::<radian>(BoundedAngle::new(self.longitude).to_signed_range())
    }

    /// Returns the altitude above the reference ellipsoid.
    #[must_use]
    pub fn altitude(&self) -> Length {
        self.altitude
    }

    /// Returns a copy of this position moved to a different altitude.
    #[must_use]
    pub fn with_altitude(mut self, altitude: impl Into<Length>) -> Self {
        self.altitude = altitude.into();
        self
    }

    /// Returns `true` if latitude, longitude, and altitude are all finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.latitude.get::<radian>().is_finite()
            && self.longitude.get::<radian>().is_finite()
            && self.altitude.get::<meter>().is_finite()
    }

    /// Returns the [great-circle distance] between the two positions, ignoring altitude.
    ///
    /// This treats the earth as a sphere with the equatorial radius, so it is an approximation.
    ///
    /// [great-circle distance]: https://en.wikipedia.org/wiki/Haversine_formula
    #[doc(alias = "great_circle_distance")]
    #[must_use]
    pub fn haversine_distance_on_surface(&self, other: &Wgs84) -> Length {
        central_angle(
            self.latitude,
            other.latitude,
            self.longitude,
            other.longitude,
        ) * Length::new::<meter>(SEMI_MAJOR_AXIS)
    }

    /// Converts this position into Earth-centered, Earth-fixed cartesian coordinates.
    #[must_use]
    pub fn to_ecef(&self) -> Coordinate<Ecef> {
        Coordinate::<Ecef>::from_wgs84(self)
    }
}

impl Display for Wgs84 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lat = self.latitude().get::<degree>();
        let lon = self.longitude().get::<degree>();
        let ns = if lat.is_sign_negative() { 'S' } else { 'N' };
        let ew = if lon.is_sign_negative() { 'W' } else { 'E' };
        write!(
            f,
            "{:.6}°{ns}, {:.6}°{ew}, {:.3}m",
            lat.abs(),
            lon.abs(),
            self.altitude.get::<meter>()
        )
    }
}

impl Coordinate<Ecef> {
    /// Converts a geodetic position to ECEF.
    ///
    /// <https://en.wikipedia.org/wiki/Geographic_coordinate_conversion#From_geodetic_to_ECEF_coordinates>
    #[must_use]
    pub fn from_wgs84(wgs84: &Wgs84) -> Self {
        let h = wgs84.altitude.get::<meter>();
        let (sin_phi, cos_phi) = wgs84.latitude.get::<radian>().sin_cos();
        let (sin_lambda, cos_lambda) = wgs84.longitude.get::<radian>().sin_cos();

        // prime vertical radius of curvature
        let n = SEMI_MAJOR_AXIS / (1. - ECCENTRICITY_SQ * sin_phi * sin_phi).sqrt();

        Self::from_nalgebra_point(Point3::new(
            (n + h) * cos_phi * cos_lambda,
            (n + h) * cos_phi * sin_lambda,
            ((1. - ECCENTRICITY_SQ) * n + h) * sin_phi,
        ))
    }

    /// Converts an ECEF coordinate back to a geodetic position.
    ///
    /// There is no closed form that behaves well everywhere, so this uses the Newton iteration
    /// from Shu & Li, "An iterative algorithm to compute geodetic coordinates" (2010), which
    /// converges in a handful of steps for all points off the earth's center.
    #[must_use]
    pub fn to_wgs84(&self) -> Wgs84 {
        let lon = self.point.y.atan2(self.point.x);

        let a = SEMI_MAJOR_AXIS;
        let b = SEMI_MINOR_AXIS;
        let a2 = a * a;
        let b2 = b * b;
        let z2 = self.point.z.powi(2);
        let r2 = self.point.x.powi(2) + self.point.y.powi(2);
        let r = r2.sqrt();
        let big_r2 = r2 + z2;

        let denom = a2 * z2 + b2 * r2;
        let mut k = ((denom.sqrt() - a * b) * big_r2) / denom;
        for _ in 0..32 {
            let p = a + b * k;
            let q = b + a * k;
            let f = p * p * q * q - r2 * q * q - z2 * p * p;
            let f_k = 2. * (b * p * q * q + a * p * p * q - a * r2 * q - b * z2 * p);
            let dk = -f / f_k;
            if !dk.is_finite() || dk.abs() < f64::EPSILON {
                break;
            }
            k += dk;
        }

        let p = a + b * k;
        let q = b + a * k;
        let lat = ((a * p * self.point.z) / (b * q * r)).atan();
        let altitude = k * ((b2 * r2 / (p * p)) + (a2 * z2 / (q * q))).sqrt();

        Wgs84 {
            latitude: Angle::new::<radian>(lat),
            longitude: Angle::new::<radian>(lon),
            altitude: Length::new::<meter>(altitude),
        }
    }
}

impl From<Coordinate<Ecef>> for Wgs84 {
    fn from(ecef: Coordinate<Ecef>) -> Self {
        ecef.to_wgs84()
    }
}

impl From<Wgs84> for Coordinate<Ecef> {
    fn from(wgs84: Wgs84) -> Self {
        Self::from_wgs84(&wgs84)
    }
}

/// Central angle between two lat/lon pairs by the inverse haversine.
fn central_angle(lat_a: Angle, lat_b: Angle, lon_a: Angle, lon_b: Angle) -> Angle {
    let phi1 = lat_a.get::<radian>();
    let phi2 = lat_b.get::<radian>();
    let d_phi = phi2 - phi1;
    let d_lambda = lon_b.get::<radian>() - lon_a.get::<radian>();

    let hav = (d_phi / 2.).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.).sin().powi(2);
    Angle::new::<radian>(2. * hav.sqrt().clamp(0., 1.).asin())
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for Wgs84 {
    type Epsilon = Length;

    fn default_epsilon() -> Self::Epsilon {
        // sub-meter; the ECEF -> geodetic direction cannot do much better in f64
        Length::new::<meter>(0.75)
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.haversine_distance_on_surface(other) <= epsilon
            && self
                .altitude
                .get::<meter>()
                .abs_diff_eq(&other.altitude.get::<meter>(), epsilon.get::<meter>())
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for Wgs84 {
    fn default_max_relative() -> Self::Epsilon {
        Length::new::<meter>(f64::default_max_relative())
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.haversine_distance_on_surface(other).get::<meter>() <= epsilon.get::<meter>()
            && self.altitude.get::<meter>().relative_eq(
                &other.altitude.get::<meter>(),
                epsilon.get::<meter>(),
                max_relative.get::<meter>(),
            )
    }
}

/// Argument type for [`Wgs84::build`].
#[derive(Debug, Default)]
#[must_use]
pub struct Components {
    /// Must be in [-90°, 90°] (modulo full turns).
    pub latitude: Angle,
    pub longitude: Angle,
    /// Height above the reference ellipsoid.
    pub altitude: Length,
}

/// Marks a [`Builder`] that still needs a latitude.
pub struct MissingLatitude;
/// Marks a [`Builder`] that has a latitude.
pub struct HasLatitude;
/// Marks a [`Builder`] that still needs a longitude.
pub struct MissingLongitude;
/// Marks a [`Builder`] that has a longitude.
pub struct HasLongitude;
/// Marks a [`Builder`] that still needs an altitude.
pub struct MissingAltitude;
/// Marks a [`Builder`] that has an altitude.
pub struct HasAltitude;

/// Step-wise constructor for [`Wgs84`]; only the fully-populated builder can [`Builder::build`].
#[derive(Debug)]
#[must_use]
pub struct Builder<Latitude, Longitude, Altitude> {
    under_construction: Wgs84,
    has: (
        PhantomData<Latitude>,
        PhantomData<Longitude>,
        PhantomData<Altitude>,
    ),
}

impl<L1, L2, A> Clone for Builder<L1, L2, A> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<L1, L2, A> Copy for Builder<L1, L2, A> {}

impl<L1, L2, A> Builder<L1, L2, A> {
    /// Sets the latitude. Returns `None` if it is not in [-90°, 90°] (modulo full turns).
    pub fn latitude(mut self, latitude: impl Into<Angle>) -> Option<Builder<HasLatitude, L2, A>> {
        let latitude = latitude.into();
        let signed = BoundedAngle::new(latitude).to_signed_range();
        if !(-std::f64::consts::FRAC_PI_2..=std::f64::consts::FRAC_PI_2).contains(&signed) {
            return None;
        }
        self.under_construction.latitude = latitude;
        Some(Builder {
            under_construction: self.under_construction,
            has: (PhantomData, self.has.1, self.has.2),
        })
    }

    /// Sets the longitude.
    pub fn longitude(mut self, longitude: impl Into<Angle>) -> Builder<L1, HasLongitude, A> {
        self.under_construction.longitude = longitude.into();
        Builder {
            under_construction: self.under_construction,
            has: (self.has.0, PhantomData, self.has.2),
        }
    }

    /// Sets the altitude above the reference ellipsoid.
    pub fn altitude(mut self, altitude: impl Into<Length>) -> Builder<L1, L2, HasAltitude> {
        self.under_construction.altitude = altitude.into();
        Builder {
            under_construction: self.under_construction,
            has: (self.has.0, self.has.1, PhantomData),
        }
    }
}

impl Builder<HasLatitude, HasLongitude, HasAltitude> {
    #[must_use]
    pub fn build(self) -> Wgs84 {
        self.under_construction
    }
}

#[cfg(test)]
mod tests {
    use super::{Components, Wgs84};
    use crate::coordinate_systems::Ecef;
    use crate::coordinates::Coordinate;
    use crate::error::GeolocationError;
    use crate::util::BoundedAngle;
    use approx::{assert_relative_eq, AbsDiffEq};
    use quickcheck::quickcheck;
    use rstest::rstest;
    use uom::si::f64::{Angle, Length};
    use uom::si::{
        angle::{degree, radian},
        length::meter,
    };

    fn m(meters: f64) -> Length {
        Length::new::<meter>(meters)
    }
    fn d(degrees: f64) -> Angle {
        Angle::new::<degree>(degrees)
    }

    fn finite(g: &mut quickcheck::Gen) -> f64 {
        loop {
            match f64::arbitrary(g) {
                0. => break 0.,
                f if f.is_normal() => break f,
                _ => {}
            }
        }
    }

    use quickcheck::Arbitrary;

    impl Arbitrary for Wgs84 {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            Self {
                latitude: Angle::new::<radian>(
                    finite(g).rem_euclid(std::f64::consts::PI) - std::f64::consts::FRAC_PI_2,
                ),
                longitude: Angle::new::<radian>(finite(g).rem_euclid(std::f64::consts::TAU)),
                altitude: m(finite(g).rem_euclid(20_000.) - 1_000.),
            }
        }
    }

    #[rstest]
    #[case(d(90.9948211), d(7.8211606), m(1000.))]
    #[case(d(190.112282), d(19.880389), m(0.))]
    fn build_rejects_bad_latitude(
        #[case] latitude: Angle,
        #[case] longitude: Angle,
        #[case] altitude: Length,
    ) {
        assert_eq!(
            Wgs84::build(Components {
                latitude,
                longitude,
                altitude
            }),
            None
        );
    }

    #[rstest]
    #[case(f64::NAN, 0., 0.)]
    #[case(0., f64::INFINITY, 0.)]
    #[case(0., 0., f64::NEG_INFINITY)]
    #[case(90.5, 0., 0.)]
    #[case(-91., 10., 0.)]
    fn try_from_degrees_rejects_invalid(#[case] lat: f64, #[case] lon: f64, #[case] alt: f64) {
        assert!(matches!(
            Wgs84::try_from_degrees(lat, lon, alt),
            Err(GeolocationError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn display() {
        let origin = Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456).unwrap();
        insta::assert_snapshot!(origin, @"22.905812°S, 43.221329°W, 12.456m");
        let fuji = Wgs84::try_from_degrees(35.3619, 138.728, 2294.).unwrap();
        insta::assert_snapshot!(fuji, @"35.361900°N, 138.728000°E, 2294.000m");
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let a = Wgs84::try_from_degrees(0., 10., 0.).unwrap();
        let b = Wgs84::try_from_degrees(1., 10., 0.).unwrap();
        // one degree on a sphere with the equatorial radius
        assert_relative_eq!(
            a.haversine_distance_on_surface(&b).get::<meter>(),
            6_378_137. * 1f64.to_radians(),
            epsilon = 1e-6
        );
    }

    fn try_wgs_ecef_roundtrip(wgs84: Wgs84) {
        let ecef = wgs84.to_ecef();

        let lat = BoundedAngle::new(wgs84.latitude).to_signed_range().to_degrees();
        let lon = BoundedAngle::new(wgs84.longitude).to_signed_range().to_degrees();
        let reference = nav_types::ECEF::from(nav_types::WGS84::from_degrees_and_meters(
            lat,
            lon,
            wgs84.altitude.get::<meter>(),
        ));
        let expected =
            Coordinate::<Ecef>::from_cartesian(m(reference.x()), m(reference.y()), m(reference.z()));
        assert_relative_eq!(ecef, expected, epsilon = Wgs84::default_epsilon());

        assert_relative_eq!(Wgs84::from(ecef), wgs84);
    }

    quickcheck! {
        fn wgs_ecef_roundtrip(wgs84: Wgs84) -> () {
            try_wgs_ecef_roundtrip(wgs84);
        }
    }

    #[rstest]
    #[case(0., 0., 1000.)]
    #[case(90., 0., 1000.)]
    #[case(-90., 180., 1000.)]
    #[case(89.999999, -179.99999, 1000.)]
    #[case(-22.905812, -43.221329, 12.456)]
    fn hard_wgs_to_ecef(#[case] lat: f64, #[case] lon: f64, #[case] alt: f64) {
        try_wgs_ecef_roundtrip(Wgs84::try_from_degrees(lat, lon, alt).unwrap());
    }

    #[test]
    fn known_wgs_to_ecef() {
        for ((lat, lon, alt), (x, y, z)) in [
            ((0., 0., 0.), (6378137., 0., 0.)),
            (
                (35.3619, 138.7280, 2294.0),
                (-3915138.118709466, 3436144.354064903, 3672011.028417511),
            ),
        ] {
            let ecef = Wgs84::try_from_degrees(lat, lon, alt).unwrap().to_ecef();
            assert_relative_eq!(ecef, Coordinate::<Ecef>::from_cartesian(m(x), m(y), m(z)));
        }
    }
}
