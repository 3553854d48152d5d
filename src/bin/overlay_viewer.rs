//! Live viewer: OpenCV capture + MoveNet inference + minifb window.
//!
//! Keys: Space = start/stop estimation, F = switch camera facing, ESC = exit.

use anyhow::{Context, Result};
use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

use pose_assistant::camera::{FacingController, OpenCvCamera, VideoSource};
use pose_assistant::config::Config;
use pose_assistant::estimation::{EstimationSession, SessionState};
use pose_assistant::pose::MoveNetEstimator;
use pose_assistant::render::{Overlay, OverlaySurface};

const CONFIG_PATH: &str = "config.toml";

/// モデルファイルのパス
const MODEL_PATH: &str = "models/movenet_lightning.onnx";

fn main() -> Result<()> {
    env_logger::init();
    let runtime = tokio::runtime::Runtime::new()?;

    let config = Config::load_or_default(CONFIG_PATH);

    println!("Pose Assistant {}", env!("GIT_VERSION"));
    println!("Opening camera...");
    let camera = OpenCvCamera::open(config.camera.clone())?;
    let dims = camera.dimensions();
    println!("Camera resolution: {}x{}", dims.width, dims.height);

    println!("Loading model from {}...", MODEL_PATH);
    let estimator = MoveNetEstimator::load(MODEL_PATH, config.model.clone())?;
    println!("Model loaded");

    let overlay = Overlay::attached(OverlaySurface::new(dims));
    let mut session =
        EstimationSession::new(camera, estimator, overlay.clone(), config.estimation.clone());
    let video = session.video_handle();
    let mut facing = FacingController::new(video.clone());

    let mut window = Window::new(
        "Pose Assistant",
        dims.width as usize,
        dims.height as usize,
        WindowOptions {
            resize: false,
            ..WindowOptions::default()
        },
    )
    .context("Failed to create window")?;
    window.set_target_fps(30);

    runtime.block_on(async { session.start() })?;
    println!("Estimation running. Space = start/stop, F = switch camera, ESC = exit.");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if window.is_key_pressed(Key::Space, KeyRepeat::No) {
            match session.state() {
                SessionState::Running => {
                    runtime.block_on(session.stop());
                    println!("Estimation stopped");
                }
                SessionState::Idle => {
                    runtime.block_on(async { session.start() })?;
                    println!("Estimation started");
                }
            }
        }
        if window.is_key_pressed(Key::F, KeyRepeat::No) {
            match facing.toggle() {
                Ok(new_facing) => println!("Camera facing: {}", new_facing.as_str()),
                Err(e) => eprintln!("Camera switch failed: {}", e),
            }
        }

        // Grab the latest camera frame for the backdrop.
        let frame = {
            let mut video = video.lock().unwrap();
            match video.current_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    eprintln!("Frame capture error: {}", e);
                    continue;
                }
            }
        };

        let buffer = compose(&frame, &overlay);
        window.update_with_buffer(&buffer, frame.width() as usize, frame.height() as usize)?;
    }

    println!("Shutting down...");
    runtime.block_on(session.stop());
    Ok(())
}

/// Camera frame as backdrop with non-empty overlay pixels on top.
fn compose(frame: &RgbImage, overlay: &Overlay) -> Vec<u32> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let mut buffer = vec![0u32; width * height];

    for (x, y, pixel) in frame.enumerate_pixels() {
        let rgb =
            ((pixel[0] as u32) << 16) | ((pixel[1] as u32) << 8) | pixel[2] as u32;
        buffer[y as usize * width + x as usize] = rgb;
    }

    if let Ok(surface) = overlay.snapshot() {
        let ow = surface.dimensions().width as usize;
        let oh = surface.dimensions().height as usize;
        for y in 0..height.min(oh) {
            for x in 0..width.min(ow) {
                if let Some(color) = surface.pixel(x as i32, y as i32) {
                    if color != 0 {
                        buffer[y * width + x] = color;
                    }
                }
            }
        }
    }

    buffer
}
