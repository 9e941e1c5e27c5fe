//! Per-frame drone telemetry, as recorded next to the video in a subtitle stream.
//!
//! Each record is a block of lines separated from the next by a blank line:
//!
//! ```text
//! 1
//! 00:00:00,000 --> 00:00:00,033
//! <font size="28">FrameCnt: 1, DiffTime: 33ms
//! 2024-03-02 10:41:07.262
//! [iso : 100] [latitude: -22.905812] [longitude: -43.221329] [rel_alt: 50.000 abs_alt: 62.456] [gb_yaw: 0.0 gb_pitch: -90.0 gb_roll: 0.0]</font>
//! ```
//!
//! The lines are the frame index, the display interval, the time since the previous frame, the
//! capture time, and bracketed `key: value` pairs. Markup tags are ignored. The whole stream is
//! rejected if any record is malformed or lacks the fields needed to place the camera.

use crate::error::{LoadError, TelemetryError};
use crate::geodetic::Wgs84;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use uom::si::f64::{Angle, Length};
use uom::si::{angle::degree, length::meter};

const LINES_PER_RECORD: usize = 5;

/// One record of the telemetry stream, with every field it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub frame: u32,
    pub start: Duration,
    pub end: Duration,
    /// Time since the previous frame.
    pub delta: Duration,
    /// Capture date and time, verbatim.
    pub captured_at: String,
    /// The bracketed `key: value` pairs, verbatim.
    pub fields: BTreeMap<String, String>,
}

impl TelemetryRecord {
    /// Returns the bracketed field `key` as a number.
    pub fn number(&self, key: &'static str) -> Result<f64, TelemetryError> {
        let value = self.fields.get(key).ok_or(TelemetryError::MissingField {
            frame: self.frame,
            field: key,
        })?;
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| TelemetryError::InvalidValue {
                frame: self.frame,
                field: key,
                value: value.clone(),
            })
    }
}

/// The telemetry needed to place and orient the camera for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTelemetry {
    pub frame: u32,
    pub gimbal_yaw: Angle,
    pub gimbal_pitch: Angle,
    pub gimbal_roll: Angle,
    /// Height above the take-off point.
    pub relative_altitude: Length,
    pub absolute_altitude: Length,
    /// Drone position, at the absolute altitude.
    pub position: Wgs84,
}

impl TryFrom<&TelemetryRecord> for FrameTelemetry {
    type Error = TelemetryError;

    fn try_from(record: &TelemetryRecord) -> Result<Self, Self::Error> {
        let latitude = record.number("latitude")?;
        let longitude = record.number("longitude")?;
        let absolute_altitude = record.number("abs_alt")?;
        let position = Wgs84::try_from_degrees(latitude, longitude, absolute_altitude).map_err(
            |_| TelemetryError::InvalidValue {
                frame: record.frame,
                field: "latitude",
                value: latitude.to_string(),
            },
        )?;

        Ok(Self {
            frame: record.frame,
            gimbal_yaw: Angle::new::<degree>(record.number("gb_yaw")?),
            gimbal_pitch: Angle::new::<degree>(record.number("gb_pitch")?),
            gimbal_roll: Angle::new::<degree>(record.number("gb_roll")?),
            relative_altitude: Length::new::<meter>(record.number("rel_alt")?),
            absolute_altitude: Length::new::<meter>(absolute_altitude),
            position,
        })
    }
}

/// A parsed telemetry stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    records: Vec<TelemetryRecord>,
    frames: Vec<FrameTelemetry>,
}

impl Telemetry {
    /// Parses a whole telemetry stream.
    ///
    /// ```rust
    /// use sightline::telemetry::Telemetry;
    /// use uom::si::angle::degree;
    ///
    /// let telemetry = Telemetry::parse(
    ///     "1\n00:00:00,000 --> 00:00:00,033\nDiffTime: 33ms\n2024-03-02 10:41:07.262\n\
    ///      [latitude: -22.9] [longitude: -43.2] [rel_alt: 50.0 abs_alt: 62.4] \
    ///      [gb_yaw: 12.5 gb_pitch: -90.0 gb_roll: 0.0]\n",
    /// )?;
    /// let frame = telemetry.frame(1).expect("frame 1 exists");
    /// assert!((frame.gimbal_yaw.get::<degree>() - 12.5).abs() < 1e-9);
    /// # Ok::<(), sightline::TelemetryError>(())
    /// ```
    pub fn parse(text: &str) -> Result<Self, TelemetryError> {
        let records = parse_records(text)?;
        if records.is_empty() {
            return Err(TelemetryError::Empty);
        }
        let frames = records
            .iter()
            .map(FrameTelemetry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records, frames })
    }

    /// Reads and parses the telemetry stream at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        let telemetry = Self::parse(&text)?;
        tracing::info!(
            path = %path.display(),
            frames = telemetry.frames.len(),
            "loaded telemetry"
        );
        Ok(telemetry)
    }

    #[must_use]
    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    /// Returns the typed telemetry of every record, in stream order.
    #[must_use]
    pub fn frames(&self) -> &[FrameTelemetry] {
        &self.frames
    }

    /// Returns the telemetry of the record with the given frame index.
    #[must_use]
    pub fn frame(&self, frame: u32) -> Option<&FrameTelemetry> {
        self.frames.iter().find(|f| f.frame == frame)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Splits a stream into records and parses each, without checking for required fields.
pub fn parse_records(text: &str) -> Result<Vec<TelemetryRecord>, TelemetryError> {
    let mut records = Vec::new();
    let mut block = Vec::new();
    for line in text.lines().chain(std::iter::once("")) {
        let line = line.trim();
        if !line.is_empty() {
            block.push(line);
        } else if !block.is_empty() {
            records.push(parse_record(records.len() + 1, &block)?);
            block.clear();
        }
    }
    Ok(records)
}

fn parse_record(record: usize, lines: &[&str]) -> Result<TelemetryRecord, TelemetryError> {
    let &[index, interval, delta, captured_at, data, ..] = lines else {
        return Err(TelemetryError::TruncatedRecord {
            record,
            expected: LINES_PER_RECORD,
            found: lines.len(),
        });
    };
    let malformed = |what: &'static str, text: &str| TelemetryError::Malformed {
        record,
        what,
        text: text.to_owned(),
    };

    let frame = strip_tags(index)
        .trim()
        .parse()
        .map_err(|_| malformed("frame index", index))?;

    let (start, end) = interval
        .split_once("-->")
        .and_then(|(start, end)| Some((parse_timestamp(start)?, parse_timestamp(end)?)))
        .ok_or_else(|| malformed("display interval", interval))?;

    let delta_ms = strip_tags(delta)
        .split_once("DiffTime:")
        .and_then(|(_, rest)| rest.trim_start().split_once("ms"))
        .and_then(|(ms, _)| ms.trim().parse::<u64>().ok())
        .ok_or_else(|| malformed("frame delta", delta))?;

    let fields = parse_brackets(&strip_tags(data)).ok_or_else(|| malformed("bracketed fields", data))?;

    Ok(TelemetryRecord {
        frame,
        start,
        end,
        delta: Duration::from_millis(delta_ms),
        captured_at: strip_tags(captured_at).trim().to_owned(),
        fields,
    })
}

/// Parses `HH:MM:SS,mmm`.
fn parse_timestamp(text: &str) -> Option<Duration> {
    let (clock, millis) = text.trim().split_once(',')?;
    let mut parts = clock.split(':').map(|part| part.parse::<u64>().ok());
    let (hours, minutes, seconds) = (parts.next()??, parts.next()??, parts.next()??);
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 || millis.len() != 3 {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;
    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + seconds)?
        .checked_mul(1000)?
        .checked_add(millis)?;
    Some(Duration::from_millis(total))
}

/// Removes `<...>` markup.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Parses `[key: value key2: value2] [key3 : value3]`. Text between brackets is ignored.
fn parse_brackets(text: &str) -> Option<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let close = open + rest[open..].find(']')?;
        // `key:value`, `key: value`, and `key : value` all become `key : value`
        let inner = rest[open + 1..close].replace(':', " : ");
        let mut tokens = inner.split_whitespace();
        while let Some(key) = tokens.next() {
            match (key, tokens.next(), tokens.next()) {
                (key, Some(":"), Some(value)) if key != ":" && value != ":" => {
                    fields.insert(key.to_owned(), value.to_owned());
                }
                _ => return None,
            }
        }
        rest = &rest[close + 1..];
    }
    (!fields.is_empty()).then_some(fields)
}

#[cfg(test)]
mod tests {
    use super::{parse_brackets, parse_records, parse_timestamp, strip_tags, Telemetry};
    use crate::error::{LoadError, TelemetryError};
    use approx::assert_relative_eq;
    use rstest::rstest;
    use std::time::Duration;
    use uom::si::{angle::degree, length::meter};

    const STREAM: &str = "\
1
00:00:00,000 --> 00:00:00,033
<font size=\"28\">FrameCnt: 1, DiffTime: 33ms
2024-03-02 10:41:07.262
[iso : 100] [shutter : 1/1000.0] [fnum : 2.8] [latitude: -22.905551] [longitude: -43.221218] [rel_alt: 2.847 abs_alt: 15.331] [gb_yaw : 12.3 gb_pitch : -45.6 gb_roll : 0.0] </font>

2
00:00:00,033 --> 00:00:00,066
<font size=\"28\">FrameCnt: 2, DiffTime: 34ms
2024-03-02 10:41:07.296
[iso : 100] [shutter : 1/1000.0] [fnum : 2.8] [latitude:-22.905560] [longitude:-43.221220] [rel_alt:2.900 abs_alt:15.384] [gb_yaw:12.4 gb_pitch:-45.5 gb_roll:0.1] </font>
";

    #[test]
    fn parses_a_stream() {
        let telemetry = Telemetry::parse(STREAM).unwrap();
        assert_eq!(telemetry.len(), 2);

        let first = &telemetry.records()[0];
        assert_eq!(first.frame, 1);
        assert_eq!(first.start, Duration::ZERO);
        assert_eq!(first.end, Duration::from_millis(33));
        assert_eq!(first.delta, Duration::from_millis(33));
        assert_eq!(first.captured_at, "2024-03-02 10:41:07.262");
        assert_eq!(first.fields["shutter"], "1/1000.0");
        assert_eq!(first.fields.len(), 10);

        let second = telemetry.frame(2).unwrap();
        assert_relative_eq!(second.gimbal_pitch.get::<degree>(), -45.5, epsilon = 1e-12);
        assert_relative_eq!(second.gimbal_roll.get::<degree>(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(second.relative_altitude.get::<meter>(), 2.9, epsilon = 1e-12);
        assert_relative_eq!(second.absolute_altitude.get::<meter>(), 15.384, epsilon = 1e-12);
        assert_relative_eq!(second.position.latitude().get::<degree>(), -22.90556, epsilon = 1e-12);
        assert_relative_eq!(second.position.longitude().get::<degree>(), -43.22122, epsilon = 1e-12);
        assert_eq!(second.position.altitude(), second.absolute_altitude);

        assert!(telemetry.frame(3).is_none());
    }

    #[test]
    fn windows_line_endings_and_extra_blank_lines() {
        let crlf = format!("\r\n\r\n{}\r\n\r\n\r\n", STREAM.replace('\n', "\r\n"));
        assert_eq!(Telemetry::parse(&crlf).unwrap(), Telemetry::parse(STREAM).unwrap());
    }

    #[rstest]
    #[case("00:00:00,000", Some(0))]
    #[case("01:02:03,004", Some(3_723_004))]
    #[case(" 00:00:01,500 ", Some(1_500))]
    #[case("00:61:00,000", None)]
    #[case("00:00:00.000", None)]
    #[case("00:00,000", None)]
    #[case("00:00:00,5", None)]
    #[case("18446744073709551615:00:00,000", None)]
    #[case("5124095576030431:00:00,000", None)]
    fn timestamps(#[case] text: &str, #[case] millis: Option<u64>) {
        assert_eq!(parse_timestamp(text), millis.map(Duration::from_millis));
    }

    #[rstest]
    #[case("[a: 1] [b:2] [c : 3]", &[("a", "1"), ("b", "2"), ("c", "3")])]
    #[case("[rel_alt: 2.847 abs_alt: 15.331]", &[("abs_alt", "15.331"), ("rel_alt", "2.847")])]
    #[case("noise [a: 1] noise", &[("a", "1")])]
    fn brackets(#[case] text: &str, #[case] expected: &[(&str, &str)]) {
        let fields = parse_brackets(text).unwrap();
        let fields: Vec<_> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(fields, expected);
    }

    #[rstest]
    #[case("[a: 1 b]")]
    #[case("[a 1]")]
    #[case("[: 1]")]
    #[case("[a: 1")]
    #[case("no brackets at all")]
    fn malformed_brackets(#[case] text: &str) {
        assert_eq!(parse_brackets(text), None);
    }

    #[test]
    fn tags_are_stripped() {
        assert_eq!(strip_tags("<font size=\"28\">a <b>b</b></font>"), "a b");
    }

    #[test]
    fn truncated_records_fail_the_stream() {
        let text = "1\n00:00:00,000 --> 00:00:00,033\nDiffTime: 33ms\n";
        assert_eq!(
            parse_records(text),
            Err(TelemetryError::TruncatedRecord {
                record: 1,
                expected: 5,
                found: 3
            })
        );
    }

    #[rstest]
    #[case(0, "x", "frame index")]
    #[case(1, "00:00:00,000 -> 00:00:00,033", "display interval")]
    #[case(1, "18446744073709551615:00:00,000 --> 00:00:00,033", "display interval")]
    #[case(2, "DiffTime: fast", "frame delta")]
    #[case(4, "latitude: 3", "bracketed fields")]
    fn malformed_lines_fail_the_stream(
        #[case] line: usize,
        #[case] replacement: &str,
        #[case] what: &str,
    ) {
        let mut second: Vec<&str> = STREAM.split("\n\n").nth(1).unwrap().lines().collect();
        second[line] = replacement;
        let text = format!("{}\n\n{}", STREAM.split("\n\n").next().unwrap(), second.join("\n"));
        match Telemetry::parse(&text) {
            Err(TelemetryError::Malformed { record, what: got, .. }) => {
                assert_eq!(record, 2);
                assert_eq!(got, what);
            }
            other => panic!("expected a malformed record, got {other:?}"),
        }
    }

    #[test]
    fn missing_and_invalid_fields() {
        let record = |data: &str| {
            format!("7\n00:00:00,000 --> 00:00:00,033\nDiffTime: 33ms\nnow\n{data}\n")
        };
        let complete = "[latitude: -22.9] [longitude: -43.2] [rel_alt: 1 abs_alt: 2] [gb_yaw: 0 gb_pitch: -90 gb_roll: 0]";
        assert!(Telemetry::parse(&record(complete)).is_ok());

        assert_eq!(
            Telemetry::parse(&record(&complete.replace("gb_roll: 0", "roll: 0"))),
            Err(TelemetryError::MissingField {
                frame: 7,
                field: "gb_roll"
            })
        );
        assert_eq!(
            Telemetry::parse(&record(&complete.replace("abs_alt: 2", "abs_alt: high"))),
            Err(TelemetryError::InvalidValue {
                frame: 7,
                field: "abs_alt",
                value: "high".into()
            })
        );
        assert!(matches!(
            Telemetry::parse(&record(&complete.replace("-22.9", "-95.0"))),
            Err(TelemetryError::InvalidValue {
                field: "latitude",
                ..
            })
        ));
    }

    #[test]
    fn empty_stream() {
        assert_eq!(Telemetry::parse("\n\n  \n"), Err(TelemetryError::Empty));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            Telemetry::load("/definitely/not/here.srt"),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn records_serialize() {
        let telemetry = Telemetry::parse(STREAM).unwrap();
        let yaml = serde_yaml::to_string(&telemetry.records()[0]).unwrap();
        let back: super::TelemetryRecord = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, telemetry.records()[0]);
    }
}
