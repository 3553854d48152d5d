use serde::Deserialize;

use crate::error::PoseError;

/// カメラの向き
///
/// `User` は自撮り側（フロント）、`Environment` は背面側。
/// 生成時のデフォルトは `User`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    User,
    Environment,
}

impl CameraFacing {
    /// 反対側の向き
    pub fn toggled(self) -> Self {
        match self {
            Self::User => Self::Environment,
            Self::Environment => Self::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Environment => "environment",
        }
    }
}

impl Default for CameraFacing {
    fn default() -> Self {
        Self::User
    }
}

/// ビデオフレームの寸法（ピクセル）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// ライブ映像ソース
///
/// 推定ループはティックごとに `dimensions` と `current_frame` を読む。
/// フレームは推定器が消費する不透明ハンドルで、ソース実装と推定器
/// 実装がペアで型を決める。
pub trait VideoSource {
    type Frame: Send + 'static;

    /// ストリームがデコード済み寸法を持ち、フレームを供給できるか
    fn is_ready(&self) -> bool;

    /// 現在のフレーム寸法
    fn dimensions(&self) -> FrameDimensions;

    /// 現在のフレームを取得
    fn current_frame(&mut self) -> Result<Self::Frame, PoseError>;

    /// ストリームを破棄して指定の向きで再取得する
    ///
    /// 失敗した場合ソースは元のストリームと向きを保ったまま
    /// `CameraUnavailable` を返す。
    fn set_facing(&mut self, facing: CameraFacing) -> Result<(), PoseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_toggled() {
        assert_eq!(CameraFacing::User.toggled(), CameraFacing::Environment);
        assert_eq!(CameraFacing::Environment.toggled(), CameraFacing::User);
    }

    #[test]
    fn test_facing_default_is_user() {
        assert_eq!(CameraFacing::default(), CameraFacing::User);
    }

    #[test]
    fn test_facing_as_str() {
        assert_eq!(CameraFacing::User.as_str(), "user");
        assert_eq!(CameraFacing::Environment.as_str(), "environment");
    }
}
