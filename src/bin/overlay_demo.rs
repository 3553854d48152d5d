//! Session lifecycle demo: runs the estimation loop against a synthetic
//! camera and a scripted estimator, no model or capture hardware required.

use std::f32::consts::PI;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use pose_assistant::camera::{CameraFacing, FacingController, FrameDimensions, VideoSource};
use pose_assistant::config::Config;
use pose_assistant::error::PoseError;
use pose_assistant::estimation::EstimationSession;
use pose_assistant::pose::{EstimateOptions, Keypoint, KeypointIndex, Pose, PoseEstimator};
use pose_assistant::render::{Overlay, OverlaySurface};

const CONFIG_PATH: &str = "config.toml";

/// Counts frames and reports a fixed resolution.
struct SyntheticCamera {
    dims: FrameDimensions,
    facing: CameraFacing,
    frames: u64,
}

impl SyntheticCamera {
    fn new(dims: FrameDimensions) -> Self {
        Self {
            dims,
            facing: CameraFacing::default(),
            frames: 0,
        }
    }
}

impl VideoSource for SyntheticCamera {
    type Frame = u64;

    fn is_ready(&self) -> bool {
        true
    }

    fn dimensions(&self) -> FrameDimensions {
        self.dims
    }

    fn current_frame(&mut self) -> Result<u64, PoseError> {
        self.frames += 1;
        Ok(self.frames)
    }

    fn set_facing(&mut self, facing: CameraFacing) -> Result<(), PoseError> {
        self.facing = facing;
        Ok(())
    }
}

/// Produces a swaying stick figure from the frame counter.
struct SwayEstimator {
    dims: FrameDimensions,
}

impl SwayEstimator {
    fn pose_at(&self, frame: u64) -> Pose {
        let w = self.dims.width as f32;
        let h = self.dims.height as f32;
        let sway = (frame as f32 * PI / 8.0).sin() * w * 0.05;
        let cx = w / 2.0 + sway;

        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        let mut put = |idx: KeypointIndex, x: f32, y: f32| {
            keypoints[idx as usize] = Keypoint::new(x, y, 0.9);
        };

        put(KeypointIndex::Nose, cx, h * 0.15);
        put(KeypointIndex::LeftEye, cx - w * 0.02, h * 0.13);
        put(KeypointIndex::RightEye, cx + w * 0.02, h * 0.13);
        put(KeypointIndex::LeftEar, cx - w * 0.04, h * 0.14);
        put(KeypointIndex::RightEar, cx + w * 0.04, h * 0.14);
        put(KeypointIndex::LeftShoulder, cx - w * 0.1, h * 0.3);
        put(KeypointIndex::RightShoulder, cx + w * 0.1, h * 0.3);
        put(KeypointIndex::LeftElbow, cx - w * 0.15, h * 0.45);
        put(KeypointIndex::RightElbow, cx + w * 0.15, h * 0.45);
        put(KeypointIndex::LeftWrist, cx - w * 0.17, h * 0.58);
        put(KeypointIndex::RightWrist, cx + w * 0.17, h * 0.58);
        put(KeypointIndex::LeftHip, cx - w * 0.06, h * 0.55);
        put(KeypointIndex::RightHip, cx + w * 0.06, h * 0.55);
        put(KeypointIndex::LeftKnee, cx - w * 0.07, h * 0.72);
        put(KeypointIndex::RightKnee, cx + w * 0.07, h * 0.72);
        put(KeypointIndex::LeftAnkle, cx - w * 0.07, h * 0.9);
        put(KeypointIndex::RightAnkle, cx + w * 0.07, h * 0.9);

        Pose::new(keypoints)
    }
}

#[async_trait]
impl PoseEstimator for SwayEstimator {
    type Frame = u64;

    fn is_ready(&self) -> bool {
        true
    }

    async fn estimate(&self, frame: u64, options: EstimateOptions) -> Result<Pose, PoseError> {
        // simulated inference latency
        tokio::time::sleep(Duration::from_millis(60)).await;

        let pose = self.pose_at(frame);
        if options.mirror_horizontally {
            Ok(pose.mirrored(self.dims.width))
        } else {
            Ok(pose)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);

    let dims = FrameDimensions::new(
        config.camera.width.unwrap_or(640),
        config.camera.height.unwrap_or(480),
    );
    let overlay = Overlay::attached(OverlaySurface::new(dims));
    let mut session = EstimationSession::new(
        SyntheticCamera::new(dims),
        SwayEstimator { dims },
        overlay.clone(),
        config.estimation.clone(),
    );
    let mut facing = FacingController::new(session.video_handle());

    println!("=== Pose Assistant {} - Overlay Demo ===", env!("GIT_VERSION"));
    println!(
        "interval: {} ms, min confidence: {}",
        config.estimation.interval_ms, config.estimation.min_confidence
    );

    session.start()?;
    println!("estimation started ({:?})", session.state());

    for step in 1..=6u32 {
        tokio::time::sleep(Duration::from_millis(config.estimation.interval_ms)).await;

        let surface = overlay.snapshot()?;
        let lit = surface.buffer().iter().filter(|&&p| p != 0).count();
        println!(
            "tick {}: overlay {}x{}, {} pixels drawn",
            step,
            surface.dimensions().width,
            surface.dimensions().height,
            lit
        );

        if step == 3 {
            let new_facing = facing.toggle()?;
            let camera_facing = session.video_handle().lock().unwrap().facing;
            println!(
                "switched camera facing to {} (camera reports {})",
                new_facing.as_str(),
                camera_facing.as_str()
            );
        }
    }

    session.stop().await;
    println!("estimation stopped ({:?})", session.state());
    println!(
        "overlay cleared: {}",
        overlay.snapshot()?.is_blank()
    );

    Ok(())
}
