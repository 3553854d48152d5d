use thiserror::Error;

/// 推定ループで発生するエラー
///
/// いずれもプロセスを終了させない。`ModelNotLoaded` は開始要求の拒否、
/// それ以外は該当ティックまたは該当呼び出しのみのスキップで回復する。
#[derive(Debug, Error)]
pub enum PoseError {
    /// カメラの取得・再取得に失敗
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// モデル未ロードの状態で開始要求された
    #[error("pose model is not loaded")]
    ModelNotLoaded,

    /// 1ティック分の推論が失敗
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// 描画サーフェスが未アタッチ
    #[error("overlay surface is not attached")]
    SurfaceUnavailable,
}
