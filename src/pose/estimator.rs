use async_trait::async_trait;
use serde::Deserialize;

use crate::camera::source::FrameDimensions;
use crate::error::PoseError;
use crate::pose::keypoint::Pose;

/// 推論1回分のオプション
#[derive(Debug, Clone, Copy)]
pub struct EstimateOptions {
    /// 結果をフレーム幅基準で左右反転するか
    pub mirror_horizontally: bool,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            mirror_horizontally: true,
        }
    }
}

/// モデルロード時の設定
///
/// アーキテクチャ選択・出力ストライド・入力解像度・品質係数は
/// 認識済みオプションとしてバックエンドへそのまま渡す。
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default = "default_output_stride")]
    pub output_stride: u32,
    #[serde(default = "default_input_resolution")]
    pub input_resolution: FrameDimensions,
    #[serde(default = "default_multiplier")]
    pub multiplier: f32,
}

fn default_architecture() -> String {
    "MobileNetV1".to_string()
}
fn default_output_stride() -> u32 {
    16
}
fn default_input_resolution() -> FrameDimensions {
    FrameDimensions::new(800, 600)
}
fn default_multiplier() -> f32 {
    0.75
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: default_architecture(),
            output_stride: default_output_stride(),
            input_resolution: default_input_resolution(),
            multiplier: default_multiplier(),
        }
    }
}

/// 姿勢推定器
///
/// レイテンシは可変（数十〜数百ミリ秒）で、呼び出しは失敗しうる。
/// 失敗は `InferenceFailed` として該当ティックのスキップで回復する。
/// モデルのロードは推定ループ開始前に完了している外部セットアップで、
/// `is_ready` が false の間はループを開始できない。
#[async_trait]
pub trait PoseEstimator {
    type Frame: Send + 'static;

    /// モデルがロード済みで呼び出し可能か
    fn is_ready(&self) -> bool;

    /// 1フレーム分の姿勢を推定する
    ///
    /// 返される座標はフレームのピクセル空間。`mirror_horizontally`
    /// 指定時は反転済みの座標を返す。
    async fn estimate(
        &self,
        frame: Self::Frame,
        options: EstimateOptions,
    ) -> Result<Pose, PoseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.architecture, "MobileNetV1");
        assert_eq!(config.output_stride, 16);
        assert_eq!(config.input_resolution, FrameDimensions::new(800, 600));
        assert!((config.multiplier - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_estimate_options_default_mirrors() {
        assert!(EstimateOptions::default().mirror_horizontally);
    }
}
