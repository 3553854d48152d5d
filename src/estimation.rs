use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::camera::source::{FrameDimensions, VideoSource};
use crate::config::EstimationConfig;
use crate::error::PoseError;
use crate::pose::estimator::{EstimateOptions, PoseEstimator};
use crate::pose::Pose;
use crate::render::overlay::Overlay;

/// 推定セッションの状態
///
/// `Idle` と `Running` の2状態のみ。一時停止等の中間状態は持たない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// 周期的な姿勢推定セッション
///
/// タイマーと実行中フラグを所有し、ティックごとに共有ビデオソースから
/// フレームを取り出して推定器に渡し、結果をオーバーレイに描画する。
/// 同時に実行される推論は常に1件以下。
pub struct EstimationSession<V, M>
where
    V: VideoSource + Send + 'static,
    M: PoseEstimator<Frame = V::Frame> + Send + Sync + 'static,
{
    video: Arc<Mutex<V>>,
    estimator: Arc<M>,
    overlay: Overlay,
    config: EstimationConfig,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl<V, M> EstimationSession<V, M>
where
    V: VideoSource + Send + 'static,
    M: PoseEstimator<Frame = V::Frame> + Send + Sync + 'static,
{
    pub fn new(video: V, estimator: M, overlay: Overlay, config: EstimationConfig) -> Self {
        Self {
            video: Arc::new(Mutex::new(video)),
            estimator: Arc::new(estimator),
            overlay,
            config,
            cancel: None,
            task: None,
        }
    }

    /// ビデオソースの共有ハンドル
    ///
    /// 向き切り替えコントローラ等、ループの外からソースを操作する
    /// 側に渡す。
    pub fn video_handle(&self) -> Arc<Mutex<V>> {
        self.video.clone()
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay.clone()
    }

    pub fn state(&self) -> SessionState {
        if self.task.is_some() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// 推定ループを開始する
    ///
    /// `Idle` からのみ有効。モデル未ロードなら `ModelNotLoaded`、
    /// ビデオソースが未準備なら `CameraUnavailable` を返し、状態は
    /// 変わらない。既に `Running` の場合は何もせず `Ok` を返す。
    pub fn start(&mut self) -> Result<(), PoseError> {
        if self.task.is_some() {
            return Ok(());
        }
        if !self.estimator.is_ready() {
            return Err(PoseError::ModelNotLoaded);
        }
        if !self.video.lock().unwrap().is_ready() {
            return Err(PoseError::CameraUnavailable(
                "video source is not ready".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.video.clone(),
            self.estimator.clone(),
            self.overlay.clone(),
            self.config.clone(),
            cancel.clone(),
        ));
        self.cancel = Some(cancel);
        self.task = Some(task);
        Ok(())
    }

    /// 推定ループを停止してオーバーレイを消去する
    ///
    /// `Idle` からは何もしない。実行中の推論はそのまま完了させるが、
    /// 結果は破棄され描画されない。
    pub async fn stop(&mut self) {
        let (Some(cancel), Some(task)) = (self.cancel.take(), self.task.take()) else {
            return;
        };
        cancel.cancel();
        let _ = task.await;

        if self.overlay.with_surface(|surface| surface.clear()).is_err() {
            debug!("overlay surface not attached at stop");
        }
    }
}

/// ティックループ本体
///
/// 停止トークン・タイマーティック・実行中の推論完了の3つを select し、
/// 推論が未完了の間に来たティックは丸ごとスキップする。
async fn run_loop<V, M>(
    video: Arc<Mutex<V>>,
    estimator: Arc<M>,
    overlay: Overlay,
    config: EstimationConfig,
    cancel: CancellationToken,
) where
    V: VideoSource + Send + 'static,
    M: PoseEstimator<Frame = V::Frame> + Send + Sync + 'static,
{
    let mut ticker = time::interval(Duration::from_millis(config.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<(FrameDimensions, Instant, JoinHandle<Result<Pose, PoseError>>)> =
        None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                // 前ティックの推論が未完了ならこのティックはスキップ
                if in_flight.is_some() {
                    debug!("inference still in flight, skipping tick");
                    continue;
                }

                // フレームと寸法は呼び出し時点のものを対で保持する
                let (frame, dims) = {
                    let mut video = video.lock().unwrap();
                    if !video.is_ready() {
                        warn!("video source not ready, skipping tick");
                        continue;
                    }
                    let dims = video.dimensions();
                    match video.current_frame() {
                        Ok(frame) => (frame, dims),
                        Err(e) => {
                            warn!("frame capture failed: {e}");
                            continue;
                        }
                    }
                };

                let estimator = estimator.clone();
                let options = EstimateOptions {
                    mirror_horizontally: config.mirror,
                };
                let task = tokio::spawn(async move { estimator.estimate(frame, options).await });
                in_flight = Some((dims, Instant::now(), task));
            }

            result = async { (&mut in_flight.as_mut().unwrap().2).await }, if in_flight.is_some() => {
                let (dims, started, _) = in_flight.take().unwrap();
                match result {
                    Ok(Ok(pose)) => {
                        debug!("inference took {} ms", started.elapsed().as_millis());
                        render_tick(&overlay, &pose, dims, config.min_confidence);
                    }
                    Ok(Err(e)) => warn!("inference failed: {e}"),
                    Err(e) => warn!("inference task aborted: {e}"),
                }
            }
        }
    }
}

/// 推論結果をオーバーレイに反映する
///
/// 寸法合わせ・消去・描画を1ティック分まとめて行う。サーフェスが
/// 未アタッチの場合はこのティックの描画だけを諦める。
fn render_tick(overlay: &Overlay, pose: &Pose, dims: FrameDimensions, min_confidence: f32) {
    let drawn = overlay.with_surface(|surface| {
        surface.resize(dims);
        surface.clear();
        surface.draw_pose(pose, min_confidence);
    });
    if drawn.is_err() {
        warn!("overlay surface not attached, skipping draw");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::camera::source::CameraFacing;
    use crate::pose::{Keypoint, KeypointIndex};
    use crate::render::overlay::OverlaySurface;
    use crate::render::skeleton::KEYPOINT_COLOR;

    /// フレーム番号だけを返すテスト用ソース
    struct TestSource {
        dims: FrameDimensions,
        ready: bool,
        fail_grab: bool,
        frames: u64,
    }

    impl TestSource {
        fn new() -> Self {
            Self {
                dims: FrameDimensions::new(640, 480),
                ready: true,
                fail_grab: false,
                frames: 0,
            }
        }
    }

    impl VideoSource for TestSource {
        type Frame = u64;

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn dimensions(&self) -> FrameDimensions {
            self.dims
        }

        fn current_frame(&mut self) -> Result<u64, PoseError> {
            if self.fail_grab {
                return Err(PoseError::CameraUnavailable("grab failed".to_string()));
            }
            self.frames += 1;
            Ok(self.frames)
        }

        fn set_facing(&mut self, _facing: CameraFacing) -> Result<(), PoseError> {
            Ok(())
        }
    }

    /// レイテンシと同時実行数を記録するテスト用推定器
    ///
    /// フレーム番号 n に対して x = n * 50 の鼻キーポイントを返す。
    struct TestEstimator {
        ready: bool,
        latency: Duration,
        fail: AtomicBool,
        completed: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl TestEstimator {
        fn with_latency(latency: Duration) -> Self {
            Self {
                ready: true,
                latency,
                fail: AtomicBool::new(false),
                completed: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn not_loaded() -> Self {
            let mut estimator = Self::with_latency(Duration::ZERO);
            estimator.ready = false;
            estimator
        }
    }

    #[async_trait]
    impl PoseEstimator for TestEstimator {
        type Frame = u64;

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn estimate(&self, frame: u64, _options: EstimateOptions) -> Result<Pose, PoseError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            time::sleep(self.latency).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(PoseError::InferenceFailed("model error".to_string()));
            }

            self.completed.fetch_add(1, Ordering::SeqCst);
            let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
            keypoints[KeypointIndex::Nose as usize] =
                Keypoint::new(frame as f32 * 50.0, 10.0, 1.0);
            Ok(Pose::new(keypoints))
        }
    }

    fn test_config() -> EstimationConfig {
        EstimationConfig {
            interval_ms: 500,
            min_confidence: 0.5,
            mirror: false,
        }
    }

    fn attached_overlay() -> Overlay {
        Overlay::attached(OverlaySurface::new(FrameDimensions::new(640, 480)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_when_model_not_loaded() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::not_loaded(),
            attached_overlay(),
            test_config(),
        );

        assert!(matches!(session.start(), Err(PoseError::ModelNotLoaded)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_when_video_not_ready() {
        let mut source = TestSource::new();
        source.ready = false;
        let mut session = EstimationSession::new(
            source,
            TestEstimator::with_latency(Duration::from_millis(50)),
            attached_overlay(),
            test_config(),
        );

        assert!(matches!(
            session.start(),
            Err(PoseError::CameraUnavailable(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_noop() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(50)),
            attached_overlay(),
            test_config(),
        );

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.start().is_ok());
        assert_eq!(session.state(), SessionState::Running);

        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_inference_in_flight() {
        // 推論レイテンシ(1200ms)がティック周期(500ms)を超えるケース
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(1200)),
            attached_overlay(),
            test_config(),
        );
        let estimator = session.estimator.clone();

        session.start().unwrap();
        time::sleep(Duration::from_millis(4000)).await;
        session.stop().await;

        assert_eq!(estimator.max_active.load(Ordering::SeqCst), 1);
        // 8ティック分の時間で完了する推論は3件程度（スキップが効いている）
        assert!(estimator.completed.load(Ordering::SeqCst) <= 4);
        assert!(estimator.completed.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renders_apply_in_initiation_order() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(100)),
            attached_overlay(),
            test_config(),
        );
        let overlay = session.overlay();

        session.start().unwrap();

        // 最初のティックは即時発火。フレーム1の描画はレイテンシ後。
        time::sleep(Duration::from_millis(150)).await;
        let surface = overlay.snapshot().unwrap();
        assert_eq!(surface.pixel(50, 10), Some(KEYPOINT_COLOR));

        // 2ティック目(t=500ms)の結果が1ティック目の描画を置き換える
        time::sleep(Duration::from_millis(500)).await;
        let surface = overlay.snapshot().unwrap();
        assert_eq!(surface.pixel(100, 10), Some(KEYPOINT_COLOR));
        assert_eq!(surface.pixel(50, 10), Some(0));

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_and_discards_stale_inference() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(10_000)),
            attached_overlay(),
            test_config(),
        );
        let overlay = session.overlay();
        let estimator = session.estimator.clone();

        session.start().unwrap();
        // 最初の推論が実行中のまま停止する
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(estimator.active.load(Ordering::SeqCst), 1);
        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(overlay.snapshot().unwrap().is_blank());

        // 停止後に完了した推論は描画されない
        time::sleep(Duration::from_millis(20_000)).await;
        assert!(overlay.snapshot().unwrap().is_blank());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_idle_is_noop() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::ZERO),
            attached_overlay(),
            test_config(),
        );

        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_inference_skips_tick_and_continues() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(50)),
            attached_overlay(),
            test_config(),
        );
        let overlay = session.overlay();
        let estimator = session.estimator.clone();
        estimator.fail.store(true, Ordering::SeqCst);

        session.start().unwrap();
        time::sleep(Duration::from_millis(700)).await;

        // 失敗ティックは描画されず、ループは止まらない
        assert!(overlay.snapshot().unwrap().is_blank());
        assert_eq!(session.state(), SessionState::Running);

        // 回復後のティックから描画される
        estimator.fail.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_millis(600)).await;
        assert!(!overlay.snapshot().unwrap().is_blank());

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_grab_failure_skips_tick() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(50)),
            attached_overlay(),
            test_config(),
        );
        let video = session.video_handle();
        let estimator = session.estimator.clone();
        video.lock().unwrap().fail_grab = true;

        session.start().unwrap();
        time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(estimator.completed.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Running);

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_draw_uses_dimensions_captured_at_call_time() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(200)),
            attached_overlay(),
            test_config(),
        );
        let overlay = session.overlay();
        let video = session.video_handle();

        session.start().unwrap();

        // 推論実行中にフレームサイズが変わる
        time::sleep(Duration::from_millis(100)).await;
        video.lock().unwrap().dims = FrameDimensions::new(1280, 720);

        // 完了した描画は呼び出し時点の寸法で行われる
        time::sleep(Duration::from_millis(150)).await;
        let surface = overlay.snapshot().unwrap();
        assert_eq!(surface.dimensions(), FrameDimensions::new(640, 480));

        // 次のティックから新しい寸法に追従する
        time::sleep(Duration::from_millis(500)).await;
        let surface = overlay.snapshot().unwrap();
        assert_eq!(surface.dimensions(), FrameDimensions::new(1280, 720));

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_surface_does_not_stop_loop() {
        let mut session = EstimationSession::new(
            TestSource::new(),
            TestEstimator::with_latency(Duration::from_millis(50)),
            Overlay::new(),
            test_config(),
        );
        let overlay = session.overlay();
        let estimator = session.estimator.clone();

        session.start().unwrap();
        time::sleep(Duration::from_millis(1100)).await;

        // サーフェス未アタッチでも推論は続く
        assert!(estimator.completed.load(Ordering::SeqCst) >= 2);
        assert_eq!(session.state(), SessionState::Running);

        // アタッチ後のティックから描画される
        overlay.attach(OverlaySurface::new(FrameDimensions::new(640, 480)));
        time::sleep(Duration::from_millis(600)).await;
        assert!(!overlay.snapshot().unwrap().is_blank());

        session.stop().await;
    }
}
