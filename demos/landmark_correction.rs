use sightline::camera::{CameraIntrinsics, Pixel, Pose};
use sightline::correction::Landmark;
use sightline::math::Rotation;
use sightline::rig::{yaw_pitch_roll_to_rotation, FrameChain};
use sightline::session::{SessionConfig, SessionContext};
use sightline::systems::Wgs84;
use std::error::Error;
use uom::si::angle::degree;
use uom::si::f64::Angle;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config: SessionConfig = serde_json::from_str(
        r#"{
            "origin": { "latitude": -22.905812, "longitude": -43.221329, "altitude": 12.456 },
            "intrinsics": "K.json",
            "landmarks": { "min_confidence": 0.7 }
        }"#,
    )?;
    let k = CameraIntrinsics::new(1450., 1450., 960., 540.)?;
    let session = SessionContext::new(&config, k, None)?;
    let origin = session.origin();

    let drone = Wgs84::try_from_degrees(-22.9061, -43.2216, 72.456)?;
    let (yaw, pitch, roll) = (
        Angle::new::<degree>(40.),
        Angle::new::<degree>(-55.),
        Angle::new::<degree>(0.),
    );
    let position = origin.geodetic_to_enu(&drone)?;
    let truth = Pose::new(
        position,
        FrameChain::default().compose(yaw_pitch_roll_to_rotation(yaw, pitch, roll)),
    );

    // the gimbal reports angles that are a couple of degrees off
    let reported = Pose::new(
        position,
        FrameChain::default().compose(yaw_pitch_roll_to_rotation(
            yaw + Angle::new::<degree>(2.5),
            pitch - Angle::new::<degree>(1.5),
            roll + Angle::new::<degree>(0.8),
        )),
    );

    // landmarks with surveyed positions, detected where the true camera sees them
    let surveyed = [
        (Wgs84::try_from_degrees(-22.905812, -43.221329, 12.456)?, 0.95),
        (Wgs84::try_from_degrees(-22.905650, -43.221200, 12.456)?, 0.9),
        (Wgs84::try_from_degrees(-22.905600, -43.220800, 12.456)?, 0.6),
    ];
    let mut landmarks = Vec::new();
    for (position, confidence) in surveyed {
        let Some(pixel) = truth.project(session.intrinsics(), &origin.geodetic_to_enu(&position)?)
        else {
            println!("{position} is not in view");
            continue;
        };
        landmarks.extend(Landmark::new(position, pixel, confidence));
    }

    let reprojection_error = |pose: &Pose| -> Result<f64, Box<dyn Error>> {
        let mut worst = 0f64;
        for landmark in &landmarks {
            let world = origin.geodetic_to_enu(&landmark.position())?;
            let seen = pose
                .project(session.intrinsics(), &world)
                .map_or(f64::INFINITY, |pixel| pixel.distance_to(&landmark.pixel()));
            worst = worst.max(seen);
        }
        Ok(worst)
    };

    // the most confident landmark alone only pins down two of the three rotation axes
    let with_one = session.correct_pose(&reported, &landmarks[..landmarks.len().min(1)])?;
    let corrected = session.correct_pose(&reported, &landmarks)?;
    println!(
        "worst landmark error: {:.2} px reported, {:.2} px with one landmark, {:.4} px with two",
        reprojection_error(&reported)?,
        reprojection_error(&with_one)?,
        reprojection_error(&corrected)?,
    );

    let residual: Rotation<_, _> = truth.rotation().inverse() * corrected.rotation();
    println!(
        "rotation left over: {:.5}° (was {:.5}°)",
        residual.angle().get::<degree>(),
        (truth.rotation().inverse() * reported.rotation())
            .angle()
            .get::<degree>(),
    );

    let click = Pixel::new(1200., 700.);
    for (label, pose) in [("reported", &reported), ("corrected", &corrected)] {
        let hit = session.pixel_to_geodetic(pose, click)?;
        println!("{click} with the {label} pose -> {hit}");
    }

    let matrices = session.build_render_matrices(&corrected, session.viewport());
    println!("projection: {}", matrices.projection);
    println!("view: {}", matrices.view);

    Ok(())
}
