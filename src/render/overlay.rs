use std::sync::{Arc, Mutex};

use crate::camera::source::FrameDimensions;
use crate::error::PoseError;
use crate::pose::Pose;
use crate::render::skeleton::{
    KEYPOINT_COLOR, KEYPOINT_RADIUS, SKELETON_COLOR, SKELETON_CONNECTIONS,
};

/// 姿勢を描画するラスタサーフェス
///
/// ビデオフレームと同じピクセル寸法を持ち、キーポイントマーカーと
/// 骨格線のみを保持する。
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    buffer: Vec<u32>,
    width: u32,
    height: u32,
}

impl OverlaySurface {
    pub fn new(dims: FrameDimensions) -> Self {
        Self {
            buffer: vec![0u32; (dims.width * dims.height) as usize],
            width: dims.width,
            height: dims.height,
        }
    }

    pub fn dimensions(&self) -> FrameDimensions {
        FrameDimensions::new(self.width, self.height)
    }

    pub fn buffer(&self) -> &[u32] {
        &self.buffer
    }

    /// サーフェスをビデオ寸法に合わせる
    ///
    /// 寸法が変わらない場合は何もしない。変わる場合はバッファを
    /// 作り直すため、描画内容は消える。
    pub fn resize(&mut self, dims: FrameDimensions) {
        if dims.width == self.width && dims.height == self.height {
            return;
        }
        self.width = dims.width;
        self.height = dims.height;
        self.buffer = vec![0u32; (dims.width * dims.height) as usize];
    }

    /// 描画内容をすべて消す。寸法は変わらない。
    pub fn clear(&mut self) {
        self.buffer.fill(0);
    }

    /// 何も描画されていないか
    pub fn is_blank(&self) -> bool {
        self.buffer.iter().all(|&p| p == 0)
    }

    /// ピクセルを取得（範囲外は None）
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            Some(self.buffer[y as usize * self.width as usize + x as usize])
        } else {
            None
        }
    }

    /// 姿勢を描画
    ///
    /// 信頼度が閾値以上のキーポイントにマーカーを打ち、両端とも
    /// 閾値以上の骨格接続のみ線を引く。片端が閾値未満の接続は
    /// 描画されない。
    pub fn draw_pose(&mut self, pose: &Pose, min_confidence: f32) {
        // 骨格線を描画
        for (start_idx, end_idx) in SKELETON_CONNECTIONS.iter() {
            let start = pose.get(*start_idx);
            let end = pose.get(*end_idx);

            if start.is_valid(min_confidence) && end.is_valid(min_confidence) {
                let (x1, y1) = start.pixel();
                let (x2, y2) = end.pixel();
                self.draw_line(x1, y1, x2, y2, SKELETON_COLOR);
            }
        }

        // キーポイントを描画
        for kp in pose.keypoints.iter() {
            if kp.is_valid(min_confidence) {
                let (px, py) = kp.pixel();
                self.draw_circle(px, py, KEYPOINT_RADIUS, KEYPOINT_COLOR);
            }
        }
    }

    /// Bresenhamのアルゴリズムで線を描画
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            self.set_pixel(x, y, color);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// 円を描画（塗りつぶし）
    fn draw_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u32) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// ピクセルをセット（境界チェック付き）
    fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.buffer[y as usize * self.width as usize + x as usize] = color;
        }
    }
}

/// 共有オーバーレイハンドル
///
/// サーフェス本体は表示側（ウィンドウ等）が所有を差し替えられる。
/// 未アタッチの間の描画呼び出しは `SurfaceUnavailable` になるが、
/// 推定ループ自体は継続する。
#[derive(Clone, Default)]
pub struct Overlay {
    inner: Arc<Mutex<Option<OverlaySurface>>>,
}

impl Overlay {
    /// 未アタッチのハンドルを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// サーフェスをアタッチ済みのハンドルを作成
    pub fn attached(surface: OverlaySurface) -> Self {
        let overlay = Self::new();
        overlay.attach(surface);
        overlay
    }

    pub fn attach(&self, surface: OverlaySurface) {
        *self.inner.lock().unwrap() = Some(surface);
    }

    pub fn detach(&self) -> Option<OverlaySurface> {
        self.inner.lock().unwrap().take()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// アタッチ中のサーフェスに対して描画操作を行う
    pub fn with_surface<R>(
        &self,
        f: impl FnOnce(&mut OverlaySurface) -> R,
    ) -> Result<R, PoseError> {
        let mut guard = self.inner.lock().unwrap();
        match guard.as_mut() {
            Some(surface) => Ok(f(surface)),
            None => Err(PoseError::SurfaceUnavailable),
        }
    }

    /// 表示用にサーフェスの複製を取得
    pub fn snapshot(&self) -> Result<OverlaySurface, PoseError> {
        let guard = self.inner.lock().unwrap();
        guard.clone().ok_or(PoseError::SurfaceUnavailable)
    }
}
