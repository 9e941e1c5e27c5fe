//! Everything that stays fixed while one video is processed, and the per-frame queries on it.
//!
//! A [`SessionContext`] is built once from a [`SessionConfig`] and never changes afterwards: the
//! local origin, the camera intrinsics, the optional elevation raster, and the tuning of the
//! solvers. Each video frame then goes through it as
//!
//! 1. [`SessionContext::pose_from_telemetry`] to place and orient the camera,
//! 2. [`SessionContext::correct_pose`] if landmarks are visible,
//! 3. [`SessionContext::pixel_to_geodetic`] for every pixel of interest, and
//! 4. [`SessionContext::build_render_matrices`] to draw the results over the frame.

use crate::camera::{CameraIntrinsics, Pixel, Pose};
use crate::coordinate_systems::World;
use crate::correction::{self, Landmark, LandmarkPolicy};
use crate::error::{LoadError, Result};
use crate::frames::LocalOrigin;
use crate::geodetic::Wgs84;
use crate::intersect::{self, GroundHit, GroundModel, MEAN_EARTH_RADIUS};
use crate::projection::{self, RenderMatrices, Viewport};
use crate::ray::{self, Ray};
use crate::rig::{yaw_pitch_roll_to_rotation, FrameChain};
use crate::telemetry::FrameTelemetry;
use crate::terrain::{DigitalElevationModel, TerrainSearch};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uom::si::f64::Length;
use uom::si::length::meter;

/// The geodetic anchor of the session's local frame, in degrees and meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Where to find the elevation raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemConfig {
    pub path: PathBuf,
    /// Coordinate reference system of the raster, eg `"EPSG:32723"`.
    #[serde(default)]
    pub crs: Option<String>,
}

/// Session configuration, as read from JSON.
///
/// ```json
/// {
///   "origin": { "latitude": -22.905812, "longitude": -43.221329, "altitude": 12.456 },
///   "intrinsics": "K.json",
///   "dem": { "path": "terrain.asc", "crs": "EPSG:32723" },
///   "terrain_search": { "epsilon": 0.01, "max_iterations": 50 },
///   "landmarks": { "min_confidence": 0.65 }
/// }
/// ```
///
/// Everything but `origin` and `intrinsics` may be left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub origin: OriginConfig,
    pub intrinsics: PathBuf,
    #[serde(default)]
    pub dem: Option<DemConfig>,
    #[serde(default)]
    pub terrain_search: TerrainSearch,
    #[serde(default)]
    pub landmarks: LandmarkPolicy,
    #[serde(default = "default_earth_radius")]
    pub earth_radius: Length,
    #[serde(default)]
    pub viewport: Viewport,
}

fn default_earth_radius() -> Length {
    Length::new::<meter>(MEAN_EARTH_RADIUS)
}

impl SessionConfig {
    /// Reads a configuration file. Relative paths in it are taken relative to the file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_owned(),
            source,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.intrinsics = base.join(&config.intrinsics);
        if let Some(dem) = &mut config.dem {
            dem.path = base.join(&dem.path);
        }
        Ok(config)
    }

    /// Returns the configured origin as a geodetic position.
    pub fn origin(&self) -> Result<Wgs84> {
        let OriginConfig {
            latitude,
            longitude,
            altitude,
        } = self.origin;
        Wgs84::try_from_degrees(latitude, longitude, altitude)
    }
}

#[derive(Debug, Clone)]
struct Terrain {
    dem: DigitalElevationModel,
    vertical_offset: Length,
}

/// The immutable state of one processing session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    origin: LocalOrigin,
    intrinsics: CameraIntrinsics,
    chain: FrameChain,
    terrain: Option<Terrain>,
    search: TerrainSearch,
    policy: LandmarkPolicy,
    earth_radius: Length,
    viewport: Viewport,
}

impl SessionContext {
    /// Assembles a session from already loaded inputs.
    ///
    /// Fails with [`GeolocationError::OriginOutsideDem`](crate::GeolocationError::OriginOutsideDem)
    /// if a raster is given but has no elevation under the origin.
    pub fn new(
        config: &SessionConfig,
        intrinsics: CameraIntrinsics,
        dem: Option<DigitalElevationModel>,
    ) -> Result<Self> {
        let origin = LocalOrigin::new(config.origin()?)?;
        let terrain = match dem {
            Some(dem) => {
                if dem.crs_matches_zone(&origin.zone()) == Some(false) {
                    tracing::warn!(
                        crs = dem.crs(),
                        zone = %origin.zone(),
                        "elevation raster is not in the session's UTM zone"
                    );
                }
                let vertical_offset = dem.datum_offset(&origin)?;
                tracing::info!(
                    offset = vertical_offset.get::<meter>(),
                    "aligned elevation raster with the session origin"
                );
                Some(Terrain {
                    dem,
                    vertical_offset,
                })
            }
            None => None,
        };

        tracing::info!(%origin, %intrinsics, terrain = terrain.is_some(), "session ready");
        Ok(Self {
            origin,
            intrinsics,
            chain: FrameChain::default(),
            terrain,
            search: config.terrain_search,
            policy: config.landmarks,
            earth_radius: config.earth_radius,
            viewport: config.viewport,
        })
    }

    /// Loads the configuration at `path` and everything it refers to.
    ///
    /// The intrinsics are required. The elevation raster is not: if it cannot be read, a warning
    /// is logged and the session uses flat terrain.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, LoadError> {
        let config = SessionConfig::load(path)?;
        let intrinsics = CameraIntrinsics::load(&config.intrinsics)?;
        let dem = config.dem.as_ref().and_then(|dem| {
            DigitalElevationModel::load(&dem.path, dem.crs.clone())
                .map_err(|error| {
                    tracing::warn!(%error, "continuing with flat terrain");
                })
                .ok()
        });
        Ok(Self::new(&config, intrinsics, dem)?)
    }

    /// Replaces the fixed links between world, drone, gimbal, and camera.
    #[must_use]
    pub fn with_frame_chain(mut self, chain: FrameChain) -> Self {
        self.chain = chain;
        self
    }

    #[must_use]
    pub fn origin(&self) -> &LocalOrigin {
        &self.origin
    }

    #[must_use]
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    #[must_use]
    pub fn dem(&self) -> Option<&DigitalElevationModel> {
        self.terrain.as_ref().map(|terrain| &terrain.dem)
    }

    #[must_use]
    pub fn landmark_policy(&self) -> &LandmarkPolicy {
        &self.policy
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// The spherical ground model with the configured earth radius.
    #[must_use]
    pub fn spherical_model(&self) -> GroundModel<'_> {
        GroundModel::Spherical {
            radius: self.earth_radius,
        }
    }

    /// Places and orients the camera from one frame of telemetry.
    pub fn pose_from_telemetry(&self, frame: &FrameTelemetry) -> Result<Pose> {
        let position = self.origin.geodetic_to_enu(&frame.position)?;
        let attitude =
            yaw_pitch_roll_to_rotation(frame.gimbal_yaw, frame.gimbal_pitch, frame.gimbal_roll);
        Ok(Pose::new(position, self.chain.compose(attitude)))
    }

    pub fn cast_ray(&self, pose: &Pose, pixel: Pixel) -> Result<Ray<World>> {
        ray::cast_ray(&self.intrinsics, pose, pixel)
    }

    /// Picks the ground model for `ray`: the elevation raster if there is one and the ray starts
    /// above it, otherwise the flat plane through the origin.
    #[must_use]
    pub fn ground_model_for(&self, ray: &Ray<World>) -> GroundModel<'_> {
        if let Some(terrain) = &self.terrain {
            let covered = self.origin.enu_to_utm(&ray.origin).is_ok_and(|(utm, _)| {
                terrain
                    .dem
                    .elevation_at(utm.easting.get::<meter>(), utm.northing.get::<meter>())
                    .is_some()
            });
            if covered {
                return GroundModel::Raster {
                    dem: &terrain.dem,
                    vertical_offset: terrain.vertical_offset,
                    search: self.search,
                };
            }
            tracing::debug!(origin = %ray.origin, "ray starts outside the elevation raster");
        }
        GroundModel::FlatLocal {
            ground_up: Length::new::<meter>(0.),
        }
    }

    /// Resolves `pixel` to where it lies on the ground.
    pub fn locate_pixel(&self, pose: &Pose, pixel: Pixel) -> Result<GroundHit> {
        let ray = self.cast_ray(pose, pixel)?;
        let model = self.ground_model_for(&ray);
        let hit = intersect::intersect(&ray, &model, &self.origin)?;
        tracing::debug!(%pixel, %model, position = %hit.geodetic, "located pixel");
        Ok(hit)
    }

    /// Resolves `pixel` to the geodetic position it shows.
    ///
    /// ```rust
    /// use sightline::camera::{CameraIntrinsics, Pixel};
    /// use sightline::session::{SessionConfig, SessionContext};
    /// use sightline::telemetry::Telemetry;
    /// use uom::si::angle::degree;
    ///
    /// let config: SessionConfig = serde_json::from_str(r#"{
    ///     "origin": { "latitude": -22.905812, "longitude": -43.221329, "altitude": 12.456 },
    ///     "intrinsics": "unused.json"
    /// }"#).expect("valid config");
    /// let k = CameraIntrinsics::new(1000., 1000., 960., 540.).expect("valid intrinsics");
    /// let session = SessionContext::new(&config, k, None)?;
    ///
    /// let telemetry = Telemetry::parse(
    ///     "1\n00:00:00,000 --> 00:00:00,033\nDiffTime: 33ms\n2024-03-02 10:41:07.262\n\
    ///      [latitude: -22.905812] [longitude: -43.221329] [rel_alt: 50 abs_alt: 62.456] \
    ///      [gb_yaw: 0 gb_pitch: -90 gb_roll: 0]\n",
    /// ).expect("valid telemetry");
    /// let pose = session.pose_from_telemetry(&telemetry.frames()[0])?;
    ///
    /// let below = session.pixel_to_geodetic(&pose, Pixel::new(960., 540.))?;
    /// assert!((below.latitude().get::<degree>() + 22.905812).abs() < 1e-9);
    /// # Ok::<(), sightline::GeolocationError>(())
    /// ```
    pub fn pixel_to_geodetic(&self, pose: &Pose, pixel: Pixel) -> Result<Wgs84> {
        Ok(self.locate_pixel(pose, pixel)?.geodetic)
    }

    /// Corrects the rotation of `pose` with the landmarks the session's policy accepts.
    pub fn correct_pose(&self, pose: &Pose, landmarks: &[Landmark]) -> Result<Pose> {
        correction::correct_pose(&self.intrinsics, pose, &self.origin, landmarks, &self.policy)
    }

    pub fn build_render_matrices(&self, pose: &Pose, viewport: &Viewport) -> RenderMatrices {
        projection::render_matrices(&self.intrinsics, pose, viewport)
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionConfig, SessionContext};
    use crate::camera::{CameraIntrinsics, Pixel};
    use crate::coordinate_systems::World;
    use crate::coordinates::Coordinate;
    use crate::correction::Landmark;
    use crate::error::{GeolocationError, LoadError};
    use crate::geodetic::Wgs84;
    use crate::intersect::GroundModel;
    use crate::projection::Viewport;
    use crate::ray::Ray;
    use crate::telemetry::FrameTelemetry;
    use crate::terrain::DigitalElevationModel;
    use crate::vectors::Vector;
    use approx::assert_relative_eq;
    use std::path::{Path, PathBuf};
    use uom::si::f64::{Angle, Length};
    use uom::si::{angle::degree, length::meter};

    const CONFIG: &str = r#"{
        "origin": { "latitude": -22.905812, "longitude": -43.221329, "altitude": 12.456 },
        "intrinsics": "K.json"
    }"#;

    fn m(meters: f64) -> Length {
        Length::new::<meter>(meters)
    }

    fn k() -> CameraIntrinsics {
        CameraIntrinsics::new(1000., 1000., 960., 540.).unwrap()
    }

    fn config() -> SessionConfig {
        serde_json::from_str(CONFIG).unwrap()
    }

    /// 400 m square around the origin, 3 m below it.
    fn dem_text(origin_easting: f64, origin_northing: f64) -> String {
        format!(
            "ncols 40\nnrows 40\nxllcorner {}\nyllcorner {}\ncellsize 10\n{}\n",
            origin_easting - 200.,
            origin_northing - 200.,
            vec!["9.456"; 40 * 40].join(" ")
        )
    }

    fn dem(flat: &SessionContext) -> DigitalElevationModel {
        let utm = flat.origin().utm();
        DigitalElevationModel::parse_esri_ascii(&dem_text(
            utm.easting.get::<meter>(),
            utm.northing.get::<meter>(),
        ))
        .unwrap()
    }

    fn frame(latitude: f64, longitude: f64, altitude: f64, pitch: f64) -> FrameTelemetry {
        FrameTelemetry {
            frame: 1,
            gimbal_yaw: Angle::new::<degree>(0.),
            gimbal_pitch: Angle::new::<degree>(pitch),
            gimbal_roll: Angle::new::<degree>(0.),
            relative_altitude: m(altitude - 12.456),
            absolute_altitude: m(altitude),
            position: Wgs84::try_from_degrees(latitude, longitude, altitude).unwrap(),
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sightline-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.dem, None);
        assert_eq!(config.terrain_search.max_iterations, 50);
        assert_relative_eq!(config.terrain_search.epsilon.get::<meter>(), 0.01);
        assert_relative_eq!(config.landmarks.min_confidence, 0.65);
        assert_relative_eq!(config.earth_radius.get::<meter>(), 6_371_000.);
        assert_eq!(config.viewport, Viewport::default());
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let config = config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(serde_yaml::from_str::<SessionConfig>(&yaml).unwrap(), config);
    }

    #[test]
    fn config_paths_are_relative_to_the_file() {
        let dir = scratch_dir("relative");
        let path = dir.join("session.json");
        std::fs::write(
            &path,
            CONFIG.replace(
                r#""intrinsics": "K.json""#,
                r#""intrinsics": "K.json", "dem": { "path": "/abs/terrain.asc" }"#,
            ),
        )
        .unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.intrinsics, dir.join("K.json"));
        assert_eq!(config.dem.unwrap().path, Path::new("/abs/terrain.asc"));
    }

    #[test]
    fn broken_config_reports_its_path() {
        let dir = scratch_dir("broken");
        let path = dir.join("session.json");
        std::fs::write(&path, "{ \"origin\": ").unwrap();
        match SessionConfig::load(&path) {
            Err(LoadError::Json { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected a JSON error, got {other:?}"),
        }
    }

    #[test]
    fn nadir_center_pixel_resolves_below_the_drone() {
        let session = SessionContext::new(&config(), k(), None).unwrap();
        let pose = session
            .pose_from_telemetry(&frame(-22.905812, -43.221329, 62.456, -90.))
            .unwrap();
        assert_relative_eq!(
            pose.position(),
            Coordinate::<World>::from_cartesian(m(0.), m(0.), m(50.))
        );

        let hit = session.locate_pixel(&pose, Pixel::new(960., 540.)).unwrap();
        assert_relative_eq!(hit.position, Coordinate::<World>::origin());
        let geodetic = session.pixel_to_geodetic(&pose, Pixel::new(960., 540.)).unwrap();
        assert_relative_eq!(geodetic.altitude().get::<meter>(), 12.456, epsilon = 1e-6);
    }

    #[test]
    fn terrain_is_used_where_it_covers_the_ray() {
        let flat = SessionContext::new(&config(), k(), None).unwrap();
        let session = SessionContext::new(&config(), k(), Some(dem(&flat))).unwrap();
        let down = Vector::<World>::from_cartesian(m(0.), m(0.), m(-1.));

        let above = Ray::new(Coordinate::from_cartesian(m(20.), m(30.), m(50.)), down);
        assert!(matches!(session.ground_model_for(&above), GroundModel::Raster { .. }));
        assert!(matches!(flat.ground_model_for(&above), GroundModel::FlatLocal { .. }));

        let elsewhere = Ray::new(Coordinate::from_cartesian(m(5_000.), m(0.), m(50.)), down);
        assert!(matches!(
            session.ground_model_for(&elsewhere),
            GroundModel::FlatLocal { .. }
        ));
    }

    #[test]
    fn raster_is_aligned_to_the_origin_altitude() {
        let flat = SessionContext::new(&config(), k(), None).unwrap();
        let session = SessionContext::new(&config(), k(), Some(dem(&flat))).unwrap();
        let pose = session
            .pose_from_telemetry(&frame(-22.905812, -43.221329, 62.456, -70.))
            .unwrap();
        let on_terrain = session.locate_pixel(&pose, Pixel::new(700., 300.)).unwrap();
        let on_plane = flat.locate_pixel(&pose, Pixel::new(700., 300.)).unwrap();
        assert!(on_terrain.iterations > 0);
        assert!(on_terrain.position.distance_to(&on_plane.position).get::<meter>() < 0.05);
    }

    #[test]
    fn origin_outside_the_raster_is_fatal() {
        let far_away = DigitalElevationModel::parse_esri_ascii(
            "ncols 1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 10\n1\n",
        )
        .unwrap();
        assert!(matches!(
            SessionContext::new(&config(), k(), Some(far_away)),
            Err(GeolocationError::OriginOutsideDem)
        ));
    }

    #[test]
    fn load_falls_back_to_flat_terrain() {
        let dir = scratch_dir("fallback");
        std::fs::write(
            dir.join("K.json"),
            "[[1000.0, 0.0, 960.0], [0.0, 1000.0, 540.0], [0.0, 0.0, 1.0]]",
        )
        .unwrap();
        let path = dir.join("session.json");
        std::fs::write(
            &path,
            CONFIG.replace(
                r#""intrinsics": "K.json""#,
                r#""intrinsics": "K.json", "dem": { "path": "missing.asc" }"#,
            ),
        )
        .unwrap();

        let session = SessionContext::load(&path).unwrap();
        assert!(session.dem().is_none());
        assert_eq!(session.intrinsics(), &k());
    }

    #[test]
    fn load_reads_the_raster() {
        let dir = scratch_dir("raster");
        std::fs::write(
            dir.join("K.json"),
            "[[1000.0, 0.0, 960.0], [0.0, 1000.0, 540.0], [0.0, 0.0, 1.0]]",
        )
        .unwrap();
        let flat = SessionContext::new(&config(), k(), None).unwrap();
        let utm = flat.origin().utm();
        std::fs::write(
            dir.join("terrain.asc"),
            dem_text(utm.easting.get::<meter>(), utm.northing.get::<meter>()),
        )
        .unwrap();
        let path = dir.join("session.json");
        std::fs::write(
            &path,
            CONFIG.replace(
                r#""intrinsics": "K.json""#,
                r#""intrinsics": "K.json", "dem": { "path": "terrain.asc", "crs": "EPSG:32723" }"#,
            ),
        )
        .unwrap();

        let session = SessionContext::load(&path).unwrap();
        assert_eq!(session.dem().and_then(DigitalElevationModel::crs), Some("EPSG:32723"));
    }

    #[test]
    fn missing_intrinsics_are_fatal() {
        let dir = scratch_dir("no-intrinsics");
        let path = dir.join("session.json");
        std::fs::write(&path, CONFIG.replace("K.json", "nope.json")).unwrap();
        assert!(matches!(
            SessionContext::load(&path),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn correction_and_rendering_use_the_session() {
        let session = SessionContext::new(&config(), k(), None).unwrap();
        let pose = session
            .pose_from_telemetry(&frame(-22.905812, -43.221329, 62.456, -88.))
            .unwrap();
        let below = session.origin().position();
        let landmark = Landmark::new(below, Pixel::new(960., 540.), 0.9).unwrap();

        let corrected = session.correct_pose(&pose, &[landmark]).unwrap();
        let seen = corrected
            .project(session.intrinsics(), &Coordinate::origin())
            .unwrap();
        assert!(seen.distance_to(&Pixel::new(960., 540.)) < 1e-6);

        let matrices = session.build_render_matrices(&corrected, session.viewport());
        let eye = matrices.view * nalgebra::Vector4::new(0., 0., 0., 1.);
        assert_relative_eq!(eye.z, -50., epsilon = 1e-6);
    }
}
