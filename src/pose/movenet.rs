use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{imageops, RgbImage};
use log::info;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::PoseError;
use crate::pose::estimator::{EstimateOptions, ModelConfig, PoseEstimator};
use crate::pose::keypoint::{Keypoint, KeypointIndex, Pose};

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: u32 = 192;

/// MoveNet を使用した姿勢推定器
///
/// セッションの生成が完了した時点でロード済みとなる。
pub struct MoveNetEstimator {
    session: Mutex<Session>,
    config: ModelConfig,
}

impl MoveNetEstimator {
    /// ONNXモデルを読み込んで初期化
    pub fn load<P: AsRef<Path>>(model_path: P, config: ModelConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path.as_ref())
            .context("Failed to load ONNX model")?;

        info!(
            "pose model loaded: {} (stride {}, input {}x{}, multiplier {})",
            config.architecture,
            config.output_stride,
            config.input_resolution.width,
            config.input_resolution.height,
            config.multiplier
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// RGB イメージを MoveNet用の入力テンソルに変換
    ///
    /// - 192x192 にリサイズ
    /// - [1, 192, 192, 3] の f32 テンソルに変換 (0.0-255.0)
    fn preprocess(frame: &RgbImage) -> Array4<f32> {
        let resized = imageops::resize(
            frame,
            MOVENET_INPUT_SIZE,
            MOVENET_INPUT_SIZE,
            imageops::FilterType::Triangle,
        );

        let size = MOVENET_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            tensor[[0, y as usize, x as usize, 0]] = pixel[0] as f32;
            tensor[[0, y as usize, x as usize, 1]] = pixel[1] as f32;
            tensor[[0, y as usize, x as usize, 2]] = pixel[2] as f32;
        }
        tensor
    }
}

#[async_trait]
impl PoseEstimator for MoveNetEstimator {
    type Frame = RgbImage;

    fn is_ready(&self) -> bool {
        true
    }

    async fn estimate(
        &self,
        frame: RgbImage,
        options: EstimateOptions,
    ) -> Result<Pose, PoseError> {
        let frame_width = frame.width();
        let frame_height = frame.height();
        let input = Self::preprocess(&frame);

        let input_tensor =
            Tensor::from_array(input).map_err(|e| PoseError::InferenceFailed(e.to_string()))?;

        let mut session = self.session.lock().unwrap();
        let outputs = session
            .run(ort::inputs!["serving_default_input_0" => input_tensor])
            .map_err(|e| PoseError::InferenceFailed(e.to_string()))?;

        // MoveNet の出力は [1, 1, 17, 3] (y, x, confidence)、座標は 0.0〜1.0
        let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
            .try_extract_array()
            .map_err(|e| PoseError::InferenceFailed(e.to_string()))?;

        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for i in 0..KeypointIndex::COUNT {
            let y = output[[0, 0, i, 0]];
            let x = output[[0, 0, i, 1]];
            let confidence = output[[0, 0, i, 2]];

            // ピクセル空間に変換
            keypoints[i] = Keypoint::new(x * frame_width as f32, y * frame_height as f32, confidence);
        }

        let pose = Pose::new(keypoints);
        if options.mirror_horizontally {
            Ok(pose.mirrored(frame_width))
        } else {
            Ok(pose)
        }
    }
}
