//! スケッチの描画面と画素スナップショット
//!
//! 固定サイズの白いキャンバスに黒インクでストロークを描き、
//! ストローク終了時に RGBA 画素バッファ（[`RawSketch`]）を取り出します。
//! リビジョン番号が変わるとすべてのストロークを破棄します。

use std::path::Path;

use base64::Engine;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{RecognizerError, Result};

/// 背景色（白）
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
/// インク色（黒）
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// キャンバスから取り出した RGBA 画素バッファ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSketch {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl RawSketch {
    /// RGBA 画素列からスケッチを作成
    ///
    /// 画素列の長さは `width * height * 4` でなければなりません。
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(RecognizerError::InvalidPixelBuffer {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self { width, height, rgba })
    }

    /// 単色で塗りつぶしたスケッチ
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let image = RgbaImage::from_pixel(width, height, Rgba(color));
        Self::from_raster(image)
    }

    /// 画像からスケッチを作成
    ///
    /// 透明部分は白背景に合成します。
    pub fn from_image(image: &DynamicImage) -> Self {
        let mut rgba = image.to_rgba8();
        for pixel in rgba.pixels_mut() {
            let alpha = pixel[3] as u32;
            for c in 0..3 {
                let value = pixel[c] as u32;
                pixel[c] = ((value * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
            }
            pixel[3] = 255;
        }
        Self::from_raster(rgba)
    }

    /// 画像ファイルを読み込む
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = image::open(path)?;
        Ok(Self::from_image(&image))
    }

    /// PNG などのエンコード済みバイト列から作成
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::from_image(&image))
    }

    /// `data:image/png;base64,...` 形式の data URL から作成
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| RecognizerError::DataUrl("`data:` で始まっていません".to_string()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| RecognizerError::DataUrl("`,` が見つかりません".to_string()))?;
        if !meta.ends_with(";base64") {
            return Err(RecognizerError::DataUrl(format!(
                "base64 以外のエンコーディングには対応していません: {}",
                meta
            )));
        }
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
        Self::from_encoded(&bytes)
    }

    fn from_raster(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            rgba: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// (x, y) の画素
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]])
    }
}

/// キャンバス上の座標
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

pub type Stroke = Vec<Point>;

/// ストロークを描画するキャンバス
#[derive(Debug, Clone)]
pub struct SketchCanvas {
    width: u32,
    height: u32,
    line_width: u32,
    revision: u64,
    strokes: Vec<Stroke>,
    current: Option<Stroke>,
    raster: RgbaImage,
}

impl SketchCanvas {
    pub fn new(width: u32, height: u32, line_width: u32) -> Self {
        Self {
            width,
            height,
            line_width: line_width.max(1),
            revision: 0,
            strokes: Vec::new(),
            current: None,
            raster: RgbaImage::from_pixel(width, height, BACKGROUND),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 確定済みストローク
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.current.is_none()
    }

    /// リビジョンが変わっていればキャンバスを破棄して作り直す
    ///
    /// 破棄した場合は `true` を返します。
    pub fn sync_revision(&mut self, revision: u64) -> bool {
        if revision == self.revision {
            return false;
        }
        self.revision = revision;
        self.strokes.clear();
        self.current = None;
        self.raster = RgbaImage::from_pixel(self.width, self.height, BACKGROUND);
        true
    }

    /// ストローク開始（pointer down）
    pub fn begin_stroke(&mut self, point: Point) {
        // 終了していないストロークは確定させる
        if let Some(stroke) = self.current.take() {
            self.strokes.push(stroke);
        }
        self.stamp(point);
        self.current = Some(vec![point]);
    }

    /// ストロークを延長（pointer move）
    pub fn extend_stroke(&mut self, point: Point) {
        let Some(last) = self.current.as_ref().and_then(|s| s.last().copied()) else {
            return;
        };
        self.draw_line(last, point);
        if let Some(stroke) = self.current.as_mut() {
            stroke.push(point);
        }
    }

    /// ストローク終了（pointer up）
    ///
    /// 描画中のストロークがあれば確定し、現在の画素を返します。
    pub fn end_stroke(&mut self) -> Option<RawSketch> {
        let stroke = self.current.take()?;
        self.strokes.push(stroke);
        Some(self.snapshot())
    }

    /// 複数ストロークをまとめて描画し、最後のストローク終了時の画素を返す
    pub fn draw_strokes(&mut self, strokes: &[Stroke]) -> Option<RawSketch> {
        let mut snapshot = None;
        for stroke in strokes {
            let mut points = stroke.iter();
            let Some(&first) = points.next() else {
                continue;
            };
            self.begin_stroke(first);
            for &point in points {
                self.extend_stroke(point);
            }
            snapshot = self.end_stroke();
        }
        snapshot
    }

    /// 現在の画素バッファ
    pub fn snapshot(&self) -> RawSketch {
        RawSketch::from_raster(self.raster.clone())
    }

    // Bresenham
    fn draw_line(&mut self, from: Point, to: Point) {
        let (mut x0, mut y0) = (from.x.round() as i64, from.y.round() as i64);
        let (x1, y1) = (to.x.round() as i64, to.y.round() as i64);

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.stamp_at(x0, y0);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn stamp(&mut self, point: Point) {
        self.stamp_at(point.x.round() as i64, point.y.round() as i64);
    }

    /// 線幅を直径とし `(cx, cy)` を中心とする円形ブラシで塗る
    fn stamp_at(&mut self, cx: i64, cy: i64) {
        let radius = self.line_width as f32 / 2.0;
        let reach = radius.floor() as i64;
        let r2 = radius * radius;

        for oy in -reach..=reach {
            for ox in -reach..=reach {
                if (ox * ox + oy * oy) as f32 > r2 {
                    continue;
                }
                let (x, y) = (cx + ox, cy + oy);
                if x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64 {
                    self.raster.put_pixel(x as u32, y as u32, INK);
                }
            }
        }
    }
}

/// ストローク群をキャンバスに収まるよう拡大縮小する
///
/// バウンディングボックスを求め、縦横比を保ったまま余白 `margin` を残して
/// 中央に配置します。点が1つしかない場合などは中央に寄せるだけです。
pub fn fit_strokes(strokes: &[Stroke], width: u32, height: u32, margin: f32) -> Vec<Stroke> {
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;

    for point in strokes.iter().flatten() {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }

    if !min_x.is_finite() || !min_y.is_finite() {
        return Vec::new();
    }

    let box_w = max_x - min_x;
    let box_h = max_y - min_y;
    let avail_w = (width as f32 - 2.0 * margin).max(1.0);
    let avail_h = (height as f32 - 2.0 * margin).max(1.0);

    let scale = match (box_w > 0.0, box_h > 0.0) {
        (true, true) => (avail_w / box_w).min(avail_h / box_h),
        (true, false) => avail_w / box_w,
        (false, true) => avail_h / box_h,
        (false, false) => 1.0,
    };

    let offset_x = (width as f32 - box_w * scale) / 2.0;
    let offset_y = (height as f32 - box_h * scale) / 2.0;

    strokes
        .iter()
        .map(|stroke| {
            stroke
                .iter()
                .map(|p| Point::new((p.x - min_x) * scale + offset_x, (p.y - min_y) * scale + offset_y))
                .collect()
        })
        .collect()
}
