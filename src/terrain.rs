//! Digital elevation models and the parameters of the terrain search.
//!
//! A [`DigitalElevationModel`] is a single-band raster of elevations in a projected (UTM)
//! coordinate reference system, georeferenced by a [`GeoTransform`]. Lookups read the cell that
//! contains the position; cells holding the raster's nodata value read as "no elevation", exactly
//! like positions outside the raster.
//!
//! Rasters are read from single-band GeoTIFFs or from the [ESRI ASCII grid] format:
//!
//! ```text
//! ncols        4
//! nrows        3
//! xllcorner    682400.0
//! yllcorner    7465780.0
//! cellsize     10.0
//! NODATA_value -9999
//! 12.1 12.3 12.6 13.0
//! 12.0 12.2 12.5 -9999
//! 11.9 12.1 12.4 12.8
//! ```
//!
//! [ESRI ASCII grid]: https://en.wikipedia.org/wiki/Esri_grid

use crate::error::{GeolocationError, LoadError, Result};
use crate::frames::LocalOrigin;
use crate::utm::UtmZone;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::{ColorType, TiffResult};
use uom::si::f64::Length;
use uom::si::length::meter;

/// An affine map from raster (column, row) to projected (easting, northing), in GDAL
/// coefficient order.
///
/// `x = c0 + col · c1 + row · c2` and `y = c3 + col · c4 + row · c5`, where (0, 0) is the outer
/// corner of the first cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    coefficients: [f64; 6],
    inverse: [f64; 6],
}

impl GeoTransform {
    /// Returns `None` if the linear part is singular or any coefficient is not finite.
    #[must_use]
    pub fn new(coefficients: [f64; 6]) -> Option<Self> {
        let [c0, c1, c2, c3, c4, c5] = coefficients;
        let det = c1 * c5 - c2 * c4;
        if !coefficients.iter().all(|c| c.is_finite()) || det.abs() <= f64::EPSILON {
            return None;
        }
        let (i1, i2, i4, i5) = (c5 / det, -c2 / det, -c4 / det, c1 / det);
        let inverse = [-(i1 * c0 + i2 * c3), i1, i2, -(i4 * c0 + i5 * c3), i4, i5];
        Some(Self {
            coefficients,
            inverse,
        })
    }

    /// The common north-up layout: `(left, top)` is the outer corner of the first cell, and rows
    /// run southwards.
    #[must_use]
    pub fn north_up(left: f64, top: f64, cell_width: f64, cell_height: f64) -> Option<Self> {
        Self::new([left, cell_width, 0., top, 0., -cell_height])
    }

    #[must_use]
    pub fn coefficients(&self) -> [f64; 6] {
        self.coefficients
    }

    /// Maps raster (column, row) to projected (easting, northing).
    #[must_use]
    pub fn apply(&self, column: f64, row: f64) -> (f64, f64) {
        let [c0, c1, c2, c3, c4, c5] = self.coefficients;
        (c0 + column * c1 + row * c2, c3 + column * c4 + row * c5)
    }

    /// Maps projected (easting, northing) to fractional raster (column, row).
    #[must_use]
    pub fn invert(&self, easting: f64, northing: f64) -> (f64, f64) {
        let [i0, i1, i2, i3, i4, i5] = self.inverse;
        (i0 + easting * i1 + northing * i2, i3 + easting * i4 + northing * i5)
    }
}

/// Controls the iterative walk along a ray towards the terrain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSearch {
    /// The walk stops once the altitude gap to the terrain is at most this.
    pub epsilon: Length,
    /// The walk gives up after this many steps.
    pub max_iterations: usize,
}

impl Default for TerrainSearch {
    fn default() -> Self {
        Self {
            epsilon: Length::new::<meter>(0.01),
            max_iterations: 50,
        }
    }
}

/// A raster of terrain elevations over a projected coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalElevationModel {
    /// Row-major grid; the first row is the one at `transform.apply(_, 0)`. Nodata is NaN.
    elevations: DMatrix<f64>,
    transform: GeoTransform,
    crs: Option<String>,
}

impl DigitalElevationModel {
    /// Constructs a raster from its grid and georeferencing. Non-finite cells mean "no data".
    #[must_use]
    pub fn new(elevations: DMatrix<f64>, transform: GeoTransform, crs: Option<String>) -> Self {
        Self {
            elevations,
            transform,
            crs,
        }
    }

    /// Reads a raster from disk: a GeoTIFF if the extension is `.tif` or `.tiff`, an ESRI ASCII
    /// grid otherwise.
    ///
    /// `crs` (eg `"EPSG:32723"`) tags the raster with its coordinate reference system. For
    /// GeoTIFFs it may be `None`, in which case the EPSG code in the file's GeoKey directory is
    /// used if there is one.
    pub fn load(path: impl AsRef<Path>, crs: Option<String>) -> std::result::Result<Self, LoadError> {
        let path = path.as_ref();
        let is_tiff = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"));

        let mut dem = if is_tiff {
            let bytes = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
            Self::parse_geotiff(&bytes)?
        } else {
            let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
            Self::parse_esri_ascii(&text)?
        };
        if crs.is_some() {
            dem.crs = crs;
        }
        tracing::info!(
            path = %path.display(),
            rows = dem.rows(),
            columns = dem.columns(),
            crs = dem.crs.as_deref().unwrap_or("unknown"),
            "loaded elevation raster"
        );
        Ok(dem)
    }

    /// Parses a single-band GeoTIFF.
    ///
    /// Georeferencing comes from ModelTiepoint plus ModelPixelScale, or from
    /// ModelTransformation. The GDAL nodata tag is honoured, and the CRS is taken from the
    /// projected (or else geographic) EPSG code in the GeoKey directory.
    pub fn parse_geotiff(bytes: &[u8]) -> std::result::Result<Self, LoadError> {
        let mut decoder = Decoder::new(Cursor::new(bytes))?;
        if !matches!(decoder.colortype()?, ColorType::Gray(_)) {
            return Err(LoadError::Georeference("only single-band rasters hold elevations"));
        }
        let (width, height) = decoder.dimensions()?;

        let keys = match decoder.find_tag(geotiff_tag(GEO_KEY_DIRECTORY))? {
            Some(value) => GeoKeys::parse(&value.into_u32_vec()?),
            None => GeoKeys::default(),
        };
        let scale = f64_tag(&mut decoder, MODEL_PIXEL_SCALE)?;
        let tiepoint = f64_tag(&mut decoder, MODEL_TIEPOINT)?;
        let matrix = f64_tag(&mut decoder, MODEL_TRANSFORMATION)?;
        let nodata = decoder
            .find_tag(geotiff_tag(GDAL_NODATA))?
            .map(|v| v.into_string())
            .transpose()?
            .and_then(|text| text.trim_matches(char::from(0)).trim().parse::<f64>().ok());

        let mut coefficients = match (matrix, tiepoint, scale) {
            (Some(m), _, _) if m.len() >= 8 => [m[3], m[0], m[1], m[7], m[4], m[5]],
            (_, Some(t), Some(s)) if t.len() >= 6 && s.len() >= 2 => {
                let (column, row, easting, northing) = (t[0], t[1], t[3], t[4]);
                [easting - column * s[0], s[0], 0., northing + row * s[1], 0., -s[1]]
            }
            _ => {
                return Err(LoadError::Georeference(
                    "needs ModelTransformation, or ModelTiepoint with ModelPixelScale",
                ))
            }
        };
        if keys.pixel_is_point {
            // tie points name cell centers; move to the outer corner of the first cell
            coefficients[0] -= (coefficients[1] + coefficients[2]) / 2.;
            coefficients[3] -= (coefficients[4] + coefficients[5]) / 2.;
        }
        let transform = GeoTransform::new(coefficients)
            .ok_or(LoadError::Georeference("pixel-to-map transform is singular"))?;

        let values: Vec<f64> = match decoder.read_image()? {
            DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::F64(v) => v,
            _ => return Err(LoadError::Georeference("unsupported elevation sample type")),
        };
        let (rows, columns) = (height as usize, width as usize);
        if values.len() != rows * columns {
            return Err(LoadError::Georeference("sample count does not match the raster size"));
        }

        let mut elevations = DMatrix::from_row_slice(rows, columns, &values);
        if let Some(nodata) = nodata {
            elevations.apply(|v| {
                if *v == nodata {
                    *v = f64::NAN;
                }
            });
        }
        let crs = keys.epsg.map(|code| format!("EPSG:{code}"));
        Ok(Self::new(elevations, transform, crs))
    }

    /// Parses the contents of an ESRI ASCII grid.
    pub fn parse_esri_ascii(text: &str) -> std::result::Result<Self, LoadError> {
        let mut header = EsriHeader::default();
        let mut values = Vec::new();
        let mut in_header = true;
        let mut last_line = 0;

        for (line_num, line) in text.lines().enumerate().map(|(i, l)| (i + 1, l.trim())) {
            if line.is_empty() {
                continue;
            }
            last_line = line_num;

            if in_header && line.starts_with(|c: char| c.is_ascii_alphabetic()) {
                header.parse_line(line, line_num)?;
                continue;
            }
            in_header = false;

            for token in line.split_whitespace() {
                let value = token.parse::<f64>().map_err(|_| {
                    LoadError::raster(line_num, format!("elevation {token:?} is not a number"))
                })?;
                values.push(value);
            }
        }

        let (columns, rows, transform) = header.finish(last_line)?;
        if values.len() != rows * columns {
            return Err(LoadError::raster(
                last_line,
                format!(
                    "expected {} elevations for {rows}×{columns} cells, found {}",
                    rows * columns,
                    values.len()
                ),
            ));
        }

        let mut elevations = DMatrix::from_row_slice(rows, columns, &values);
        if let Some(nodata) = header.nodata {
            elevations.apply(|v| {
                if *v == nodata {
                    *v = f64::NAN;
                }
            });
        }
        Ok(Self::new(elevations, transform, None))
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.elevations.nrows()
    }

    #[must_use]
    pub fn columns(&self) -> usize {
        self.elevations.ncols()
    }

    #[must_use]
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    #[must_use]
    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }

    /// Returns the elevation of the cell containing (easting, northing), or `None` outside the
    /// raster and on nodata cells.
    #[must_use]
    pub fn elevation_at(&self, easting: f64, northing: f64) -> Option<f64> {
        let (column, row) = self.transform.invert(easting, northing);
        let (column, row) = (column.floor(), row.floor());
        if !(column >= 0. && row >= 0.) {
            return None;
        }
        // the casts saturate, and the bounds check in `get` handles the rest
        let elevation = *self.elevations.get((row as usize, column as usize))?;
        elevation.is_finite().then_some(elevation)
    }

    /// Returns the offset that brings raster elevations into the session's vertical reference:
    /// the origin's altitude minus the raster elevation under the origin.
    ///
    /// Fails with [`GeolocationError::OriginOutsideDem`] if the raster has no elevation there.
    pub fn datum_offset(&self, origin: &LocalOrigin) -> Result<Length> {
        let utm = origin.utm();
        let under_origin = self
            .elevation_at(utm.easting.get::<meter>(), utm.northing.get::<meter>())
            .ok_or(GeolocationError::OriginOutsideDem)?;
        Ok(origin.position().altitude() - Length::new::<meter>(under_origin))
    }

    /// Returns whether the raster's coordinate reference system is the given UTM zone, or `None`
    /// if the CRS tag is missing or not a WGS84 UTM EPSG code.
    #[must_use]
    pub fn crs_matches_zone(&self, zone: &UtmZone) -> Option<bool> {
        let (number, northern) = utm_zone_of_epsg(self.crs.as_deref()?)?;
        Some(number == zone.number() && northern == zone.is_northern())
    }
}

/// Parses `EPSG:326zz` (north) and `EPSG:327zz` (south).
fn utm_zone_of_epsg(crs: &str) -> Option<(u8, bool)> {
    let code = crs.trim();
    let code = code
        .strip_prefix("EPSG:")
        .or_else(|| code.strip_prefix("epsg:"))
        .unwrap_or(code);
    let code: u32 = code.parse().ok()?;
    let (northern, zone) = match code {
        32601..=32660 => (true, code - 32600),
        32701..=32760 => (false, code - 32700),
        _ => return None,
    };
    Some((u8::try_from(zone).ok()?, northern))
}

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

/// The tag with the given code, named or not depending on what `tiff` knows about.
fn geotiff_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn f64_tag<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> TiffResult<Option<Vec<f64>>> {
    decoder
        .find_tag(geotiff_tag(code))?
        .map(|value| value.into_f64_vec())
        .transpose()
}

/// The GeoKeys this crate cares about.
#[derive(Debug, Default, PartialEq)]
struct GeoKeys {
    epsg: Option<u32>,
    /// GTRasterTypeGeoKey is RasterPixelIsPoint.
    pixel_is_point: bool,
}

impl GeoKeys {
    const RASTER_TYPE: u32 = 1025;
    const GEOGRAPHIC_TYPE: u32 = 2048;
    const PROJECTED_TYPE: u32 = 3072;
    const USER_DEFINED: u32 = 32767;

    /// Reads the directory: a 4-entry header whose last entry is the key count, then one
    /// `[id, location, count, value]` entry per key. Only keys stored inline (location 0) are
    /// read.
    fn parse(directory: &[u32]) -> Self {
        let mut keys = Self::default();
        let count = directory.get(3).map_or(0, |&n| n as usize);
        let mut geographic = None;
        for entry in directory.get(4..).unwrap_or_default().chunks_exact(4).take(count) {
            let &[id, location, _, value] = entry else {
                continue;
            };
            if location != 0 || value == Self::USER_DEFINED {
                continue;
            }
            match id {
                Self::RASTER_TYPE => keys.pixel_is_point = value == 2,
                Self::GEOGRAPHIC_TYPE => geographic = Some(value),
                Self::PROJECTED_TYPE => keys.epsg = Some(value),
                _ => {}
            }
        }
        keys.epsg = keys.epsg.or(geographic);
        keys
    }
}

#[derive(Debug, Default)]
struct EsriHeader {
    columns: Option<usize>,
    rows: Option<usize>,
    /// Lower-left corner, or lower-left cell center when `centered`.
    x: Option<(f64, bool)>,
    y: Option<(f64, bool)>,
    cell_size: Option<f64>,
    nodata: Option<f64>,
}

impl EsriHeader {
    fn parse_line(&mut self, line: &str, line_num: usize) -> std::result::Result<(), LoadError> {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(LoadError::raster(line_num, "header entries are `key value`"));
        };
        let number = || {
            value
                .parse::<f64>()
                .map_err(|_| LoadError::raster(line_num, format!("{key} {value:?} is not a number")))
        };
        let count = || {
            value
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| LoadError::raster(line_num, format!("{key} must be a positive integer")))
        };

        match key.to_ascii_lowercase().as_str() {
            "ncols" => self.columns = Some(count()?),
            "nrows" => self.rows = Some(count()?),
            "xllcorner" => self.x = Some((number()?, false)),
            "xllcenter" => self.x = Some((number()?, true)),
            "yllcorner" => self.y = Some((number()?, false)),
            "yllcenter" => self.y = Some((number()?, true)),
            "cellsize" => self.cell_size = Some(number()?),
            "nodata_value" => self.nodata = Some(number()?),
            _ => {
                return Err(LoadError::raster(
                    line_num,
                    format!("unknown header entry {key:?}"),
                ))
            }
        }
        Ok(())
    }

    fn finish(&self, line_num: usize) -> std::result::Result<(usize, usize, GeoTransform), LoadError> {
        let missing = |what: &str| LoadError::raster(line_num, format!("header is missing {what}"));
        let columns = self.columns.ok_or_else(|| missing("ncols"))?;
        let rows = self.rows.ok_or_else(|| missing("nrows"))?;
        let cell_size = self.cell_size.ok_or_else(|| missing("cellsize"))?;
        let (x, x_centered) = self.x.ok_or_else(|| missing("xllcorner"))?;
        let (y, y_centered) = self.y.ok_or_else(|| missing("yllcorner"))?;

        let half = cell_size / 2.;
        let left = if x_centered { x - half } else { x };
        let bottom = if y_centered { y - half } else { y };
        let top = bottom + rows as f64 * cell_size;

        let invalid_cell_size = || LoadError::raster(line_num, "cellsize must be positive and finite");
        if !(cell_size > 0.) {
            return Err(invalid_cell_size());
        }
        let transform =
            GeoTransform::north_up(left, top, cell_size, cell_size).ok_or_else(invalid_cell_size)?;
        Ok((columns, rows, transform))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        geotiff_tag, utm_zone_of_epsg, DigitalElevationModel, GeoKeys, GeoTransform,
        TerrainSearch, GDAL_NODATA, GEO_KEY_DIRECTORY, MODEL_PIXEL_SCALE, MODEL_TIEPOINT,
        MODEL_TRANSFORMATION,
    };
    use crate::error::{GeolocationError, LoadError};
    use crate::frames::LocalOrigin;
    use crate::geodetic::Wgs84;
    use crate::utm::UtmZone;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use std::io::Cursor;
    use tiff::encoder::{colortype, TiffEncoder};
    use uom::si::length::meter;

    const GRID: &str = "\
ncols        4
nrows        3
xllcorner    100.0
yllcorner    200.0
cellsize     10.0
NODATA_value -9999
12.1 12.3 12.6 13.0
12.0 12.2 12.5 -9999
11.9 12.1 12.4 12.8
";

    #[test]
    fn geo_transform_inverts() {
        let t = GeoTransform::new([500., 2., 0.5, 900., -0.25, -3.]).unwrap();
        let (x, y) = t.apply(7.5, 12.);
        let (col, row) = t.invert(x, y);
        assert_relative_eq!(col, 7.5, epsilon = 1e-9);
        assert_relative_eq!(row, 12., epsilon = 1e-9);
        assert!(GeoTransform::new([0., 1., 1., 0., 1., 1.]).is_none());
    }

    #[test]
    fn parses_esri_ascii() {
        let dem = DigitalElevationModel::parse_esri_ascii(GRID).unwrap();
        assert_eq!((dem.rows(), dem.columns()), (3, 4));
        assert_eq!(dem.transform().coefficients(), [100., 10., 0., 230., 0., -10.]);
    }

    #[rstest]
    #[case(101., 229., Some(12.1))]
    #[case(121., 228., Some(12.6))]
    #[case(139.9, 200.1, Some(12.8))]
    #[case(135., 215., None)] // nodata
    #[case(94., 230., None)]
    #[case(100., 236., None)]
    #[case(100., 195., None)]
    #[case(145., 210., None)]
    fn containing_cell_lookup(#[case] easting: f64, #[case] northing: f64, #[case] expected: Option<f64>) {
        let dem = DigitalElevationModel::parse_esri_ascii(GRID).unwrap();
        assert_eq!(dem.elevation_at(easting, northing), expected);
    }

    #[test]
    fn cell_centered_header_shifts_by_half_a_cell() {
        let grid = GRID
            .replace("xllcorner    100.0", "xllcenter    105.0")
            .replace("yllcorner    200.0", "yllcenter    205.0");
        let dem = DigitalElevationModel::parse_esri_ascii(&grid).unwrap();
        assert_eq!(dem.transform().coefficients(), [100., 10., 0., 230., 0., -10.]);
    }

    #[rstest]
    #[case(GRID.replace("ncols        4\n", ""), 8)]
    #[case(GRID.replace("12.8\n", "\n"), 9)]
    #[case(GRID.replace("12.2", "twelve"), 8)]
    #[case(GRID.replace("cellsize     10.0", "cellsize     -1"), 9)]
    #[case(GRID.replace("nrows        3", "nrows        three"), 2)]
    #[case(GRID.replace("NODATA_value", "nodata_value_x"), 6)]
    fn malformed_grids_are_rejected(#[case] grid: String, #[case] line: usize) {
        match DigitalElevationModel::parse_esri_ascii(&grid) {
            Err(LoadError::Raster { line: l, .. }) => assert_eq!(l, line),
            other => panic!("expected a raster error, got {other:?}"),
        }
    }

    /// The same cells as `GRID`, as 32-bit floats.
    const ELEVATIONS: [f32; 12] = [
        12.1, 12.3, 12.6, 13.0, //
        12.0, 12.2, 12.5, -9999., //
        11.9, 12.1, 12.4, 12.8,
    ];

    #[derive(Default)]
    struct Georeferencing {
        tiepoint: Option<[f64; 6]>,
        scale: Option<[f64; 3]>,
        matrix: Option<[f64; 16]>,
        keys: Vec<u16>,
    }

    /// `GRID` georeferenced like a typical GDAL export in UTM 23S.
    fn utm_23s() -> Georeferencing {
        Georeferencing {
            tiepoint: Some([0., 0., 0., 100., 230., 0.]),
            scale: Some([10., 10., 0.]),
            keys: vec![1, 1, 0, 2, 1025, 0, 1, 1, 3072, 0, 1, 32723],
            ..Georeferencing::default()
        }
    }

    fn geotiff(georeferencing: &Georeferencing) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buffer).unwrap();
            let mut image = encoder.new_image::<colortype::Gray32Float>(4, 3).unwrap();
            let directory = image.encoder();
            if let Some(tiepoint) = &georeferencing.tiepoint {
                directory.write_tag(geotiff_tag(MODEL_TIEPOINT), &tiepoint[..]).unwrap();
            }
            if let Some(scale) = &georeferencing.scale {
                directory.write_tag(geotiff_tag(MODEL_PIXEL_SCALE), &scale[..]).unwrap();
            }
            if let Some(matrix) = &georeferencing.matrix {
                directory.write_tag(geotiff_tag(MODEL_TRANSFORMATION), &matrix[..]).unwrap();
            }
            if !georeferencing.keys.is_empty() {
                directory
                    .write_tag(geotiff_tag(GEO_KEY_DIRECTORY), &georeferencing.keys[..])
                    .unwrap();
            }
            directory.write_tag(geotiff_tag(GDAL_NODATA), "-9999").unwrap();
            image.write_data(&ELEVATIONS).unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn parses_geotiff() {
        let dem = DigitalElevationModel::parse_geotiff(&geotiff(&utm_23s())).unwrap();
        assert_eq!((dem.rows(), dem.columns()), (3, 4));
        assert_eq!(dem.transform().coefficients(), [100., 10., 0., 230., 0., -10.]);
        assert_eq!(dem.crs(), Some("EPSG:32723"));
    }

    #[rstest]
    #[case(101., 229., Some(12.1))]
    #[case(121., 228., Some(12.6))]
    #[case(139.9, 200.1, Some(12.8))]
    #[case(135., 215., None)] // nodata
    #[case(145., 210., None)]
    fn geotiff_lookup_matches_the_ascii_grid(
        #[case] easting: f64,
        #[case] northing: f64,
        #[case] expected: Option<f64>,
    ) {
        let dem = DigitalElevationModel::parse_geotiff(&geotiff(&utm_23s())).unwrap();
        match (dem.elevation_at(easting, northing), expected) {
            (Some(got), Some(expected)) => assert_relative_eq!(got, expected, epsilon = 1e-5),
            (got, expected) => assert_eq!(got, expected),
        }
    }

    #[test]
    fn geotiff_point_tiepoints_name_cell_centers() {
        let mut georeferencing = utm_23s();
        georeferencing.tiepoint = Some([0., 0., 0., 105., 225., 0.]);
        georeferencing.keys = vec![1, 1, 0, 1, 1025, 0, 1, 2];
        let dem = DigitalElevationModel::parse_geotiff(&geotiff(&georeferencing)).unwrap();
        assert_eq!(dem.transform().coefficients(), [100., 10., 0., 230., 0., -10.]);
        assert_eq!(dem.crs(), None);
    }

    #[test]
    fn geotiff_model_transformation() {
        #[rustfmt::skip]
        let matrix = [
            10., 0., 0., 100.,
            0., -10., 0., 230.,
            0., 0., 0., 0.,
            0., 0., 0., 1.,
        ];
        let georeferencing = Georeferencing {
            matrix: Some(matrix),
            ..Georeferencing::default()
        };
        let dem = DigitalElevationModel::parse_geotiff(&geotiff(&georeferencing)).unwrap();
        assert_eq!(dem.transform().coefficients(), [100., 10., 0., 230., 0., -10.]);
    }

    #[test]
    fn geotiff_without_georeferencing_is_rejected() {
        let georeferencing = Georeferencing {
            scale: Some([10., 10., 0.]),
            ..Georeferencing::default()
        };
        assert!(matches!(
            DigitalElevationModel::parse_geotiff(&geotiff(&georeferencing)),
            Err(LoadError::Georeference(_))
        ));
    }

    #[test]
    fn multiband_geotiff_is_rejected() {
        let mut buffer = Cursor::new(Vec::new());
        TiffEncoder::new(&mut buffer)
            .unwrap()
            .write_image::<colortype::RGB8>(2, 1, &[0; 6])
            .unwrap();
        assert!(matches!(
            DigitalElevationModel::parse_geotiff(buffer.get_ref()),
            Err(LoadError::Georeference(_))
        ));
        assert!(matches!(
            DigitalElevationModel::parse_geotiff(b"not a tiff"),
            Err(LoadError::Tiff(_))
        ));
    }

    #[rstest]
    #[case(&[1, 1, 0, 1, 3072, 0, 1, 32723], Some(32723), false)]
    #[case(&[1, 1, 0, 1, 2048, 0, 1, 4326], Some(4326), false)]
    #[case(&[1, 1, 0, 2, 2048, 0, 1, 4326, 3072, 0, 1, 32633], Some(32633), false)]
    #[case(&[1, 1, 0, 1, 3072, 0, 1, 32767], None, false)] // user-defined
    #[case(&[1, 1, 0, 1, 3072, 34737, 1, 0], None, false)] // stored elsewhere
    #[case(&[1, 1, 0, 1, 1025, 0, 1, 2], None, true)]
    #[case(&[1, 1, 0, 3, 1025, 0, 1, 1], None, false)] // fewer keys than announced
    #[case(&[], None, false)]
    fn geo_keys(#[case] directory: &[u32], #[case] epsg: Option<u32>, #[case] pixel_is_point: bool) {
        assert_eq!(
            GeoKeys::parse(directory),
            GeoKeys {
                epsg,
                pixel_is_point
            }
        );
    }

    #[test]
    fn load_picks_the_format_from_the_extension() {
        let dir = std::env::temp_dir().join(format!("sightline-{}-terrain", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let (tiff, ascii) = (dir.join("terrain.TIF"), dir.join("terrain.asc"));
        std::fs::write(&tiff, geotiff(&utm_23s())).unwrap();
        std::fs::write(&ascii, GRID).unwrap();

        let from_tiff = DigitalElevationModel::load(&tiff, None).unwrap();
        assert_eq!(from_tiff.crs(), Some("EPSG:32723"));
        let overridden = DigitalElevationModel::load(&tiff, Some("EPSG:32623".into())).unwrap();
        assert_eq!(overridden.crs(), Some("EPSG:32623"));

        let from_ascii = DigitalElevationModel::load(&ascii, None).unwrap();
        assert_eq!(from_ascii.transform(), from_tiff.transform());
        assert_eq!(from_ascii.crs(), None);
    }

    #[test]
    fn datum_offset_at_origin() {
        let origin =
            LocalOrigin::new(Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456).unwrap())
                .unwrap();
        let utm = origin.utm();
        let (e, n) = (utm.easting.get::<meter>(), utm.northing.get::<meter>());
        let grid = format!(
            "ncols 3\nnrows 3\nxllcenter {}\nyllcenter {}\ncellsize 5\n9 9 9\n9 10 9\n9 9 9\n",
            e - 5.,
            n - 5.
        );
        let dem = DigitalElevationModel::parse_esri_ascii(&grid).unwrap();
        assert_relative_eq!(
            dem.datum_offset(&origin).unwrap().get::<meter>(),
            2.456,
            epsilon = 1e-9
        );

        let elsewhere = DigitalElevationModel::parse_esri_ascii(GRID).unwrap();
        assert_eq!(
            elsewhere.datum_offset(&origin),
            Err(GeolocationError::OriginOutsideDem)
        );
    }

    #[rstest]
    #[case("EPSG:32723", Some((23, false)))]
    #[case("epsg:32723", Some((23, false)))]
    #[case("32623", Some((23, true)))]
    #[case(" EPSG:32601 ", Some((1, true)))]
    #[case("EPSG:32761", None)]
    #[case("EPSG:4326", None)]
    #[case("WGS 84 / UTM zone 23S", None)]
    fn epsg_codes(#[case] crs: &str, #[case] expected: Option<(u8, bool)>) {
        assert_eq!(utm_zone_of_epsg(crs), expected);
    }

    #[test]
    fn crs_zone_check() {
        let mut dem = DigitalElevationModel::parse_esri_ascii(GRID).unwrap();
        let zone = UtmZone::new(23, 'K').unwrap();
        assert_eq!(dem.crs_matches_zone(&zone), None);
        dem.crs = Some("EPSG:32723".into());
        assert_eq!(dem.crs_matches_zone(&zone), Some(true));
        dem.crs = Some("EPSG:32623".into());
        assert_eq!(dem.crs_matches_zone(&zone), Some(false));
    }

    #[test]
    fn search_defaults() {
        let search: TerrainSearch = serde_json::from_str("{}").unwrap();
        assert_eq!(search, TerrainSearch::default());
        assert_eq!(search.max_iterations, 50);
        assert_relative_eq!(search.epsilon.get::<meter>(), 0.01);
    }
}
