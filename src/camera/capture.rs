use image::RgbImage;
use log::{info, warn};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs, VideoCaptureTrait},
};

use crate::camera::source::{CameraFacing, FrameDimensions, VideoSource};
use crate::config::CameraConfig;
use crate::error::PoseError;

/// OpenCVを使用したカメラキャプチャ
///
/// 向きごとにデバイスインデックスを対応付け、`set_facing` で
/// ストリームを開き直す。再取得に失敗した場合は元のストリームを
/// 保持したままエラーを返す。
pub struct OpenCvCamera {
    capture: VideoCapture,
    facing: CameraFacing,
    config: CameraConfig,
    width: u32,
    height: u32,
}

impl OpenCvCamera {
    /// 設定された向きでカメラを開く
    pub fn open(config: CameraConfig) -> Result<Self, PoseError> {
        let facing = config.facing;
        let (capture, width, height) = Self::acquire(&config, facing)?;
        Ok(Self {
            capture,
            facing,
            config,
            width,
            height,
        })
    }

    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// 指定の向きに対応するデバイスを開く
    fn acquire(
        config: &CameraConfig,
        facing: CameraFacing,
    ) -> Result<(VideoCapture, u32, u32), PoseError> {
        let index = config.device_index(facing);
        let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
            .map_err(|e| PoseError::CameraUnavailable(e.to_string()))?;

        let opened = capture
            .is_opened()
            .map_err(|e| PoseError::CameraUnavailable(e.to_string()))?;
        if !opened {
            return Err(PoseError::CameraUnavailable(format!(
                "camera {} ({}) is not available",
                index,
                facing.as_str()
            )));
        }

        // 解像度を設定
        let set = |cap: &mut VideoCapture, prop: i32, value: f64| {
            cap.set(prop, value)
                .map_err(|e| PoseError::CameraUnavailable(e.to_string()))
        };
        if let Some(w) = config.width {
            set(&mut capture, videoio::CAP_PROP_FRAME_WIDTH, w as f64)?;
        }
        if let Some(h) = config.height {
            set(&mut capture, videoio::CAP_PROP_FRAME_HEIGHT, h as f64)?;
        }
        set(&mut capture, videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let get = |cap: &VideoCapture, prop: i32| {
            cap.get(prop)
                .map_err(|e| PoseError::CameraUnavailable(e.to_string()))
        };
        let actual_width = get(&capture, videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let actual_height = get(&capture, videoio::CAP_PROP_FRAME_HEIGHT)? as u32;

        info!(
            "camera {} ({}) opened at {}x{}",
            index,
            facing.as_str(),
            actual_width,
            actual_height
        );
        Ok((capture, actual_width, actual_height))
    }

    /// BGR Mat を RGB イメージに変換
    fn mat_to_rgb(frame: &Mat) -> Result<RgbImage, PoseError> {
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(frame, &mut rgb, imgproc::COLOR_BGR2RGB)
            .map_err(|e| PoseError::CameraUnavailable(e.to_string()))?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb
            .data_bytes()
            .map_err(|e| PoseError::CameraUnavailable(e.to_string()))?;

        RgbImage::from_raw(width, height, data.to_vec())
            .ok_or_else(|| PoseError::CameraUnavailable("frame buffer size mismatch".to_string()))
    }
}

impl VideoSource for OpenCvCamera {
    type Frame = RgbImage;

    fn is_ready(&self) -> bool {
        self.capture.is_opened().unwrap_or(false) && self.width > 0 && self.height > 0
    }

    fn dimensions(&self) -> FrameDimensions {
        FrameDimensions::new(self.width, self.height)
    }

    fn current_frame(&mut self) -> Result<Self::Frame, PoseError> {
        let mut frame = Mat::default();
        self.capture
            .read(&mut frame)
            .map_err(|e| PoseError::CameraUnavailable(e.to_string()))?;

        if frame.empty() {
            return Err(PoseError::CameraUnavailable("empty frame received".to_string()));
        }

        Self::mat_to_rgb(&frame)
    }

    fn set_facing(&mut self, facing: CameraFacing) -> Result<(), PoseError> {
        if facing == self.facing {
            return Ok(());
        }

        // 新しいストリームを先に開き、成功した場合のみ置き換える
        match Self::acquire(&self.config, facing) {
            Ok((capture, width, height)) => {
                self.capture = capture;
                self.facing = facing;
                self.width = width;
                self.height = height;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "failed to switch camera to {}: {}, keeping {}",
                    facing.as_str(),
                    e,
                    self.facing.as_str()
                );
                Err(e)
            }
        }
    }
}
