use std::sync::{Arc, Mutex};

use crate::camera::source::{CameraFacing, VideoSource};
use crate::error::PoseError;

/// カメラの向きを切り替えるコントローラ
///
/// 推定ループと共有しているビデオソースに対して `set_facing` を呼ぶ。
/// 履歴は持たず、`User` と `Environment` の2状態のみ。
pub struct FacingController<V: VideoSource> {
    video: Arc<Mutex<V>>,
    facing: CameraFacing,
}

impl<V: VideoSource> FacingController<V> {
    pub fn new(video: Arc<Mutex<V>>) -> Self {
        Self {
            video,
            facing: CameraFacing::default(),
        }
    }

    /// 現在の向き
    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// 向きを反転してビデオソースに適用し、新しい向きを返す
    ///
    /// 再取得に失敗した場合、ソースは元のストリームを保持している。
    /// コントローラも元の向きに戻し、エラーをそのまま返す。
    pub fn toggle(&mut self) -> Result<CameraFacing, PoseError> {
        let next = self.facing.toggled();
        self.video.lock().unwrap().set_facing(next)?;
        self.facing = next;
        Ok(next)
    }
}
