//! Resolving a camera ray to a point on the ground.
//!
//! Four ground models are supported, and [`intersect`] dispatches between them:
//!
//! - [`GroundModel::FlatGeodetic`]: the plane at altitude zero, solved in degrees with a
//!   meters-per-degree approximation. Only valid over short ranges.
//! - [`GroundModel::FlatLocal`]: a horizontal plane of the session's [`World`] frame. This is the
//!   same algebra without the degree approximation, and is the flat-terrain fallback.
//! - [`GroundModel::Spherical`]: a sphere around the earth's center, for rays that travel far
//!   enough for curvature to matter.
//! - [`GroundModel::Raster`]: terrain from a [`DigitalElevationModel`], found by walking along the
//!   ray until the altitude gap to the terrain closes.
//!
//! The flat solvers intersect the full line through the ray, so a ray pointing up still meets the
//! ground "behind" the camera. The spherical solver only accepts forward intersections.

use crate::coordinate_systems::{Ecef, World};
use crate::coordinates::Coordinate;
use crate::error::{GeolocationError, Result};
use crate::frames::LocalOrigin;
use crate::geodetic::Wgs84;
use crate::math::RigidBodyTransform;
use crate::ray::Ray;
use crate::terrain::{DigitalElevationModel, TerrainSearch};
use crate::utm::Utm;
use crate::vectors::Vector;
use crate::Vector3;
use std::fmt;
use std::fmt::{Display, Formatter};
use uom::si::f64::{Angle, Length};
use uom::si::{angle::radian, length::meter};

/// Meters per degree of latitude, as used by [`flat_geodetic`].
const METERS_PER_DEGREE: f64 = 111_320.;

/// Mean earth radius used by [`GroundModel::Spherical`] unless configured otherwise.
pub const MEAN_EARTH_RADIUS: f64 = 6_371_000.;

system!(
    /// East, North, and Up at the geodetic position of a ray's origin.
    struct RayEnu using ENU
);

/// The surface a ray is intersected with.
#[derive(Debug, Clone, Copy)]
pub enum GroundModel<'a> {
    /// The plane at altitude zero, in degrees.
    FlatGeodetic,
    /// The horizontal plane of [`World`] at `ground_up`.
    FlatLocal { ground_up: Length },
    /// A sphere of the given radius centered on the earth's center.
    Spherical { radius: Length },
    /// Terrain from an elevation raster.
    ///
    /// `vertical_offset` is added to every raster elevation to bring it into the session's
    /// vertical reference; see [`DigitalElevationModel::datum_offset`].
    Raster {
        dem: &'a DigitalElevationModel,
        vertical_offset: Length,
        search: TerrainSearch,
    },
}

impl Display for GroundModel<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlatGeodetic => write!(f, "flat (geodetic)"),
            Self::FlatLocal { ground_up } => write!(f, "flat at {:.3} m up", ground_up.get::<meter>()),
            Self::Spherical { radius } => write!(f, "sphere of radius {:.0} m", radius.get::<meter>()),
            Self::Raster { dem, .. } => write!(f, "raster of {}x{} cells", dem.columns(), dem.rows()),
        }
    }
}

/// Where a ray met the ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundHit {
    pub position: Coordinate<World>,
    pub geodetic: Wgs84,
    /// Elevation samples taken by the terrain search; zero for the closed-form models.
    pub iterations: usize,
}

/// Intersects `ray` with the ground described by `model`.
///
/// ```rust
/// use sightline::{frames::LocalOrigin, intersect::{intersect, GroundModel}, ray::Ray};
/// use sightline::{systems::{Wgs84, World}, Coordinate, Vector};
/// use uom::si::{f64::Length, length::meter};
///
/// let m = Length::new::<meter>;
/// let origin = LocalOrigin::new(Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456)?)?;
/// let ray = Ray::<World>::new(
///     Coordinate::from_cartesian(m(0.), m(0.), m(50.)),
///     Vector::from_cartesian(m(3.), m(4.), m(-10.)),
/// );
/// let hit = intersect(&ray, &GroundModel::FlatLocal { ground_up: m(0.) }, &origin)?;
/// assert!((hit.position.enu_east().get::<meter>() - 15.).abs() < 1e-9);
/// assert!((hit.position.enu_north().get::<meter>() - 20.).abs() < 1e-9);
/// # Ok::<(), sightline::GeolocationError>(())
/// ```
pub fn intersect(
    ray: &Ray<World>,
    model: &GroundModel<'_>,
    origin: &LocalOrigin,
) -> Result<GroundHit> {
    match *model {
        GroundModel::FlatGeodetic => {
            let start = origin.enu_to_geodetic(&ray.origin)?;
            let geodetic = flat_geodetic(&start, &ray.direction)?;
            Ok(GroundHit {
                position: origin.geodetic_to_enu(&geodetic)?,
                geodetic,
                iterations: 0,
            })
        }
        GroundModel::FlatLocal { ground_up } => {
            let position = flat_local(ray, ground_up)?;
            Ok(GroundHit {
                position,
                geodetic: origin.enu_to_geodetic(&position)?,
                iterations: 0,
            })
        }
        GroundModel::Spherical { radius } => {
            let geodetic = spherical(ray, origin, radius)?;
            Ok(GroundHit {
                position: origin.geodetic_to_enu(&geodetic)?,
                geodetic,
                iterations: 0,
            })
        }
        GroundModel::Raster {
            dem,
            vertical_offset,
            search,
        } => raster(ray, origin, dem, vertical_offset, &search),
    }
}

/// Intersects the line from `start` along `direction` with the plane at altitude zero.
///
/// East and north displacements are turned into degrees with a fixed 111 320 m per degree of
/// latitude (scaled by the cosine of the latitude for longitude).
///
/// Fails with [`GeolocationError::DegenerateRay`] if `direction` has no vertical component.
pub fn flat_geodetic(start: &Wgs84, direction: &Vector<World>) -> Result<Wgs84> {
    if !start.is_finite() || !direction.is_finite() {
        return Err(GeolocationError::InvalidCoordinate(
            "ray must be finite",
        ));
    }
    let [east, north, up] = direction.to_cartesian().map(|c| c.get::<meter>());
    if up == 0. {
        return Err(GeolocationError::DegenerateRay);
    }

    let t = -start.altitude().get::<meter>() / up;
    log_backwards(t);
    let latitude = start.latitude().get::<radian>().to_degrees();
    let longitude = start.longitude().get::<radian>().to_degrees();
    let hit_latitude = latitude + north * t / METERS_PER_DEGREE;
    let hit_longitude = longitude + east * t / (METERS_PER_DEGREE * latitude.to_radians().cos());

    let hit = Wgs84::try_from_degrees(hit_latitude, hit_longitude, 0.)?;
    tracing::debug!(%start, %hit, "flat geodetic intersection");
    Ok(hit)
}

/// Intersects the line through `ray` with the horizontal plane of [`World`] at `ground_up`.
///
/// Fails with [`GeolocationError::DegenerateRay`] if the ray has no vertical component.
pub fn flat_local(ray: &Ray<World>, ground_up: Length) -> Result<Coordinate<World>> {
    if !ray.origin.is_finite() || !ray.direction.is_finite() {
        return Err(GeolocationError::InvalidCoordinate(
            "ray must be finite",
        ));
    }
    let up = ray.direction.enu_up().get::<meter>();
    if up == 0. {
        return Err(GeolocationError::DegenerateRay);
    }

    let t = -(ray.origin.enu_up() - ground_up).get::<meter>() / up;
    log_backwards(t);
    let hit = ray.point_at(t);
    tracing::debug!(%ray, %hit, "flat local intersection");
    Ok(hit)
}

/// Intersects the line from a UTM position along `direction` with the ground below it.
///
/// `height_above_ground` is the height of the start over the ground plane, and `altitude` its
/// absolute altitude. Returns the projected position of the hit and its altitude, which is
/// `altitude - height_above_ground`.
///
/// Fails with [`GeolocationError::DegenerateRay`] if `direction` has no vertical component.
pub fn flat_utm(
    start: &Utm,
    height_above_ground: Length,
    altitude: Length,
    direction: &Vector<World>,
) -> Result<(Utm, Length)> {
    let up = direction.enu_up().get::<meter>();
    if !direction.is_finite() || !height_above_ground.is_finite() || !altitude.is_finite() {
        return Err(GeolocationError::InvalidCoordinate(
            "ray must be finite",
        ));
    }
    if up == 0. {
        return Err(GeolocationError::DegenerateRay);
    }

    let t = -height_above_ground.get::<meter>() / up;
    log_backwards(t);
    let hit = Utm {
        easting: start.easting + direction.enu_east() * t,
        northing: start.northing + direction.enu_north() * t,
        zone: start.zone,
    };
    tracing::debug!(%start, %hit, "flat UTM intersection");
    Ok((hit, altitude - height_above_ground))
}

/// Intersects `ray` with a sphere of the given radius around the earth's center.
///
/// The ray's origin is placed on the sphere model at its geodetic latitude, longitude, and
/// altitude, and its direction is carried over through the local East, North, and Up axes there.
/// The nearest intersection in front of the origin is returned, at altitude zero.
///
/// Fails with [`GeolocationError::NoIntersection`] if the ray misses the sphere, and with
/// [`GeolocationError::RayPointsAway`] if the sphere is only behind it.
pub fn spherical(ray: &Ray<World>, origin: &LocalOrigin, radius: Length) -> Result<Wgs84> {
    let start = origin.enu_to_geodetic(&ray.origin)?;
    let direction = ray.unit_direction()?;

    let in_ecef: Vector<Ecef> = direction * origin.ecef_to_world().inverse();
    // SAFETY: `RayEnu` is defined as the ENU frame at the ray's origin.
    let ecef_to_ray_enu = unsafe { RigidBodyTransform::<Ecef, RayEnu>::ecef_to_enu_at(&start) };
    let local = in_ecef * ecef_to_ray_enu;

    let (sin_phi, cos_phi) = start.latitude().get::<radian>().sin_cos();
    let (sin_lambda, cos_lambda) = start.longitude().get::<radian>().sin_cos();
    let east = Vector3::new(-sin_lambda, cos_lambda, 0.);
    let north = Vector3::new(-sin_phi * cos_lambda, -sin_phi * sin_lambda, cos_phi);
    let up = Vector3::new(cos_phi * cos_lambda, cos_phi * sin_lambda, sin_phi);

    let r = radius.get::<meter>();
    let p = up * (r + start.altitude().get::<meter>());
    let d = east * local.enu_east().get::<meter>()
        + north * local.enu_north().get::<meter>()
        + up * local.enu_up().get::<meter>();

    let a = d.dot(&d);
    let b = 2. * p.dot(&d);
    let c = p.dot(&p) - r * r;
    let discriminant = b * b - 4. * a * c;
    if discriminant < 0. {
        return Err(GeolocationError::NoIntersection);
    }
    let sqrt = discriminant.sqrt();
    let (near, far) = ((-b - sqrt) / (2. * a), (-b + sqrt) / (2. * a));
    let t = if near >= 0. {
        near
    } else if far >= 0. {
        far
    } else {
        return Err(GeolocationError::RayPointsAway);
    };

    let hit = p + d * t;
    let latitude = Angle::new::<radian>(hit.z.atan2(hit.x.hypot(hit.y)));
    let longitude = Angle::new::<radian>(hit.y.atan2(hit.x));
    let hit = Wgs84::builder()
        .latitude(latitude)
        .ok_or(GeolocationError::InvalidCoordinate("latitude out of range"))?
        .longitude(longitude)
        .altitude(Length::new::<meter>(0.))
        .build();
    tracing::debug!(%start, %hit, range = t, "spherical intersection");
    Ok(hit)
}

/// Walks along `ray` until it meets the terrain of `dem`.
///
/// Starting at the ray's origin, each step samples the terrain under the current position and
/// moves along the ray by the altitude gap to it, until the gap is at most `search.epsilon`. The
/// ray is oriented towards the terrain first.
///
/// This converges quickly for rays that are steep compared to the slope of the terrain, but may
/// not converge at all for rays close to the horizon. Failures mean the intersection is
/// undetermined, not that none exists:
///
/// - [`GeolocationError::DemOutOfBounds`] if the walk leaves the raster (or starts outside it).
/// - [`GeolocationError::DemNonConvergence`] if the gap has not closed after
///   `search.max_iterations` steps.
pub fn raster(
    ray: &Ray<World>,
    origin: &LocalOrigin,
    dem: &DigitalElevationModel,
    vertical_offset: Length,
    search: &TerrainSearch,
) -> Result<GroundHit> {
    if !ray.origin.is_finite() {
        return Err(GeolocationError::InvalidCoordinate(
            "ray must be finite",
        ));
    }
    let mut direction = ray.unit_direction()?;
    if direction.enu_up().get::<meter>() > 0. {
        direction = -direction;
    }
    let [dx, dy, dz] = direction.to_cartesian().map(|c| c.get::<meter>());

    let utm0 = origin.utm();
    let h0 = origin.altitude_m();
    let offset = vertical_offset.get::<meter>();
    let epsilon = search.epsilon.get::<meter>();

    let mut easting = utm0.easting.get::<meter>() + ray.origin.enu_east().get::<meter>();
    let mut northing = utm0.northing.get::<meter>() + ray.origin.enu_north().get::<meter>();
    // raster altitude, before the datum offset is applied
    let mut altitude = h0 + ray.origin.enu_up().get::<meter>() - offset;

    let mut samples = 0;
    loop {
        let elevation = dem
            .elevation_at(easting, northing)
            .ok_or(GeolocationError::DemOutOfBounds { easting, northing })?;
        samples += 1;

        let gap = altitude - elevation;
        tracing::trace!(samples, easting, northing, gap, "terrain step");
        if gap.abs() <= epsilon {
            break;
        }
        if samples > search.max_iterations {
            tracing::debug!(samples, gap, "terrain search gave up");
            return Err(GeolocationError::DemNonConvergence {
                iterations: samples,
                gap,
            });
        }
        easting += gap * dx;
        northing += gap * dy;
        altitude += gap * dz;
    }

    let m = Length::new::<meter>;
    let position = Coordinate::from_cartesian(
        m(easting) - utm0.easting,
        m(northing) - utm0.northing,
        m(altitude + offset - h0),
    );
    let geodetic = origin.enu_to_geodetic(&position)?;
    tracing::debug!(%position, iterations = samples, "terrain intersection");
    Ok(GroundHit {
        position,
        geodetic,
        iterations: samples,
    })
}

fn log_backwards(t: f64) {
    if t < 0. {
        tracing::debug!(t, "ground lies behind the ray origin");
    }
}
