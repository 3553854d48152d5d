use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::camera::source::CameraFacing;
use crate::pose::estimator::ModelConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub estimation: EstimationConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

/// 推定ループの設定
#[derive(Debug, Deserialize, Clone)]
pub struct EstimationConfig {
    /// 推定ティックの周期（ミリ秒）
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// 描画対象とする最小信頼度
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// 推定結果を左右反転するか
    #[serde(default = "default_mirror")]
    pub mirror: bool,
}

fn default_interval_ms() -> u64 { 500 }
fn default_min_confidence() -> f32 { 0.5 }
fn default_mirror() -> bool { true }

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            min_confidence: default_min_confidence(),
            mirror: default_mirror(),
        }
    }
}

/// カメラの設定
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// 起動時の向き
    #[serde(default)]
    pub facing: CameraFacing,
    /// フロントカメラのデバイスインデックス
    #[serde(default = "default_user_index")]
    pub user_index: i32,
    /// 背面カメラのデバイスインデックス
    #[serde(default = "default_environment_index")]
    pub environment_index: i32,
    /// 要求する解像度（省略時はデバイス既定）
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

fn default_user_index() -> i32 { 0 }
fn default_environment_index() -> i32 { 1 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: CameraFacing::default(),
            user_index: default_user_index(),
            environment_index: default_environment_index(),
            width: None,
            height: None,
        }
    }
}

impl CameraConfig {
    /// 向きに対応するデバイスインデックス
    pub fn device_index(&self, facing: CameraFacing) -> i32 {
        match facing {
            CameraFacing::User => self.user_index,
            CameraFacing::Environment => self.environment_index,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 設定ファイルがなければデフォルト値で起動する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }
}
