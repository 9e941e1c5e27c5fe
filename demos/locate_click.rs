use sightline::camera::{CameraIntrinsics, Pixel};
use sightline::intersect::intersect;
use sightline::session::{SessionConfig, SessionContext};
use sightline::telemetry::Telemetry;
use sightline::terrain::DigitalElevationModel;
use std::error::Error;
use uom::si::angle::degree;
use uom::si::length::meter;

const CONFIG: &str = r#"{
    "origin": { "latitude": -22.905812, "longitude": -43.221329, "altitude": 12.456 },
    "intrinsics": "K.json",
    "dem": { "path": "terrain.asc", "crs": "EPSG:32723" }
}"#;

// two frames of a drone climbing away from the origin while panning its gimbal
const TELEMETRY: &str = "\
1
00:00:00,000 --> 00:00:00,033
<font size=\"28\">FrameCnt: 1, DiffTime: 33ms
2024-03-02 10:41:07.262
[iso : 100] [latitude: -22.905812] [longitude: -43.221329] [rel_alt: 50.000 abs_alt: 62.456] [gb_yaw : 0.0 gb_pitch : -90.0 gb_roll : 0.0] </font>

2
00:00:00,033 --> 00:00:00,066
<font size=\"28\">FrameCnt: 2, DiffTime: 33ms
2024-03-02 10:41:07.295
[iso : 100] [latitude: -22.905700] [longitude: -43.221200] [rel_alt: 80.000 abs_alt: 92.456] [gb_yaw : 35.0 gb_pitch : -45.0 gb_roll : 0.0] </font>
";

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config: SessionConfig = serde_json::from_str(CONFIG)?;
    let k = CameraIntrinsics::new(1450., 1450., 960., 540.)?;

    // a gentle slope rising towards the east, 2 km on a side, around the origin
    let flat = SessionContext::new(&config, k, None)?;
    let utm = flat.origin().utm();
    let (easting, northing) = (utm.easting.get::<meter>(), utm.northing.get::<meter>());
    let mut grid = format!(
        "ncols 200\nnrows 200\nxllcorner {}\nyllcorner {}\ncellsize 10\nNODATA_value -9999\n",
        easting - 1000.,
        northing - 1000.
    );
    for _row in 0..200 {
        let row: Vec<String> = (0..200)
            .map(|column| format!("{:.2}", 8. + 0.05 * f64::from(column)))
            .collect();
        grid.push_str(&row.join(" "));
        grid.push('\n');
    }
    let dem = DigitalElevationModel::parse_esri_ascii(&grid)?;
    let session = SessionContext::new(&config, k, Some(dem))?;

    let telemetry = Telemetry::parse(TELEMETRY)?;
    let clicks = [
        Pixel::new(960., 540.),
        Pixel::new(200., 900.),
        Pixel::new(1700., 300.),
    ];

    for frame in telemetry.frames() {
        let pose = session.pose_from_telemetry(frame)?;
        println!("frame {}: camera at {}", frame.frame, pose.position());

        for pixel in clicks {
            match session.locate_pixel(&pose, pixel) {
                Ok(hit) => println!(
                    "  {pixel} -> {:.7}, {:.7} at {:.2} m ({} terrain samples)",
                    hit.geodetic.latitude().get::<degree>(),
                    hit.geodetic.longitude().get::<degree>(),
                    hit.geodetic.altitude().get::<meter>(),
                    hit.iterations,
                ),
                Err(error) => println!("  {pixel} -> not on the ground: {error}"),
            }

            // for comparison, the same click on a spherical earth
            let ray = session.cast_ray(&pose, pixel)?;
            if let Ok(hit) = intersect(&ray, &session.spherical_model(), session.origin()) {
                println!(
                    "  {pixel} on a sphere -> {:.7}, {:.7}",
                    hit.geodetic.latitude().get::<degree>(),
                    hit.geodetic.longitude().get::<degree>(),
                );
            }
        }
    }

    Ok(())
}
