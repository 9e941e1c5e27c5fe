//! Error types for geolocation queries and for loading session inputs.
//!
//! [`GeolocationError`] is what every geometric operation returns on failure. It is small, `Copy`,
//! and comparable so that callers can match on the precise failure kind and decide for
//! themselves whether to fall back to a different ground model, skip an annotation, or abort.
//!
//! [`LoadError`] covers everything that can go wrong while reading configuration, intrinsics,
//! elevation rasters, or telemetry from disk.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used by the geometric operations in this crate.
pub type Result<T, E = GeolocationError> = std::result::Result<T, E>;

/// A failed geometric query.
///
/// All variants except [`GeolocationError::OriginOutsideDem`] are local and recoverable by the
/// caller. No variant is ever silently replaced by a default geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeolocationError {
    /// A coordinate was NaN, infinite, or outside its valid range (eg, latitude beyond ±90°).
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(&'static str),

    /// An input vector was zero-length, or two directions that must span a plane were parallel.
    #[error("degenerate vectors: {0}")]
    DegenerateVectors(&'static str),

    /// The ray runs parallel to the ground plane and never reaches it.
    #[error("ray is parallel to the ground plane")]
    DegenerateRay,

    /// The ray misses the earth sphere entirely.
    #[error("ray does not intersect the earth")]
    NoIntersection,

    /// The ray only intersects the earth sphere behind its origin.
    #[error("ray points away from the earth")]
    RayPointsAway,

    /// A horizontal query fell outside the extent of the elevation raster (or on a nodata cell).
    #[error("position (E {easting:.3}, N {northing:.3}) lies outside the elevation raster")]
    DemOutOfBounds { easting: f64, northing: f64 },

    /// The iterative terrain search hit its iteration cap before the altitude gap closed.
    ///
    /// This means "intersection undetermined", not "no intersection exists".
    #[error("terrain search did not converge within {iterations} iterations (gap {gap:.3} m)")]
    DemNonConvergence { iterations: usize, gap: f64 },

    /// The session origin has no elevation in the loaded raster. Fatal at start-up.
    #[error("session origin lies outside the elevation raster")]
    OriginOutsideDem,
}

/// Telemetry parsing failures. Any of these fails the whole file.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    #[error("record {record}: expected at least {expected} lines, found {found}")]
    TruncatedRecord {
        record: usize,
        expected: usize,
        found: usize,
    },

    #[error("record {record}: {what} is malformed: {text:?}")]
    Malformed {
        record: usize,
        what: &'static str,
        text: String,
    },

    #[error("frame {frame}: missing telemetry field `{field}`")]
    MissingField { frame: u32, field: &'static str },

    #[error("frame {frame}: field `{field}` is not a number: {value:?}")]
    InvalidValue {
        frame: u32,
        field: &'static str,
        value: String,
    },

    #[error("telemetry stream contains no records")]
    Empty,
}

/// Failures while reading session inputs from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid camera intrinsics: {0}")]
    Intrinsics(&'static str),

    #[error("elevation raster, line {line}: {message}")]
    Raster { line: usize, message: String },

    #[error("failed to decode GeoTIFF: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("GeoTIFF elevation raster: {0}")]
    Georeference(&'static str),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Geolocation(#[from] GeolocationError),
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn raster(line: usize, message: impl Into<String>) -> Self {
        Self::Raster {
            line,
            message: message.into(),
        }
    }
}
