//! スケッチ画像からモデル入力テンソルへの前処理
//!
//! 以下の純粋関数を順に適用します（順序を変えると結果が変わります）。
//!
//! 1. [`from_pixels`] - RGBA を `[rows, cols, 3]` の画像として解釈（アルファは捨てる）
//! 2. [`resize_nearest_neighbor`] - 最近傍補間でモデル入力サイズへ縮小
//! 3. [`grayscale`] - チャネル方向の平均でグレースケール化
//! 4. [`invert`] - `255 - v` で色を反転（背景 0、線 255）
//! 5. [`normalize`] - `v / 255` で `[0, 1]` に正規化
//! 6. [`reshape`] - `[1, width, height, 1]` に整形
//!
//! 補間は必ず最近傍で行います。バイリニアにすると線の輪郭がぼけ、
//! 学習時の入力分布と一致しなくなります。

use serde::{Deserialize, Serialize};

use crate::canvas::RawSketch;
use crate::error::{RecognizerError, Result};

/// RGB のチャネル数
const COLOR_CHANNELS: usize = 3;

/// モデルが要求する入力サイズ
///
/// `width` はモデル入力の第1軸（画像の行方向）、`height` は第2軸（列方向）に対応します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub width: usize,
    pub height: usize,
}

impl InputShape {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// 1枚あたりの要素数
    pub fn num_elements(&self) -> usize {
        self.width * self.height
    }
}

/// `[rows, cols, channels]` の画素テンソル（値は 0〜255 の f32）
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTensor {
    rows: usize,
    cols: usize,
    channels: usize,
    data: Vec<f32>,
}

impl PixelTensor {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn at(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.data[(row * self.cols + col) * self.channels + channel]
    }
}

/// `[rows, cols]` の単一チャネルテンソル
#[derive(Debug, Clone, PartialEq)]
pub struct GrayTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl GrayTensor {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// モデル入力テンソル `[1, width, height, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    shape: InputShape,
    data: Vec<f32>,
}

impl InputTensor {
    /// 全要素 0 のテンソル（ウォームアップ用）
    pub fn zeros(shape: InputShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.num_elements()],
        }
    }

    /// `[batch, width, height, channel]`
    pub fn dims(&self) -> [usize; 4] {
        [1, self.shape.width, self.shape.height, 1]
    }

    pub fn input_shape(&self) -> InputShape {
        self.shape
    }

    /// 行優先で平坦化された値
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// RGBA 画素を `[rows, cols, 3]` の画像として解釈
pub fn from_pixels(sketch: &RawSketch) -> PixelTensor {
    let rows = sketch.height() as usize;
    let cols = sketch.width() as usize;
    let data = sketch
        .as_rgba()
        .chunks_exact(4)
        .flat_map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
        .collect();

    PixelTensor {
        rows,
        cols,
        channels: COLOR_CHANNELS,
        data,
    }
}

/// 最近傍補間で `[new_rows, new_cols]` にリサイズ
///
/// コーナー揃え・ハーフピクセル中心なしで、出力位置 `d` に対して
/// `min(floor(d * src / dst), src - 1)` の入力画素を選びます。
pub fn resize_nearest_neighbor(
    image: &PixelTensor,
    new_rows: usize,
    new_cols: usize,
) -> Result<PixelTensor> {
    if new_rows == 0 || new_cols == 0 {
        return Err(RecognizerError::InvalidInputShape(format!(
            "リサイズ先のサイズが0です: {}x{}",
            new_rows, new_cols
        )));
    }
    if image.rows == 0 || image.cols == 0 {
        return Err(RecognizerError::InvalidInputShape(
            "入力画像が空です".to_string(),
        ));
    }

    let row_scale = image.rows as f64 / new_rows as f64;
    let col_scale = image.cols as f64 / new_cols as f64;
    let source_index = |dst: usize, scale: f64, len: usize| -> usize {
        ((dst as f64 * scale).floor() as usize).min(len - 1)
    };

    let mut data = Vec::with_capacity(new_rows * new_cols * image.channels);
    for row in 0..new_rows {
        let src_row = source_index(row, row_scale, image.rows);
        for col in 0..new_cols {
            let src_col = source_index(col, col_scale, image.cols);
            for channel in 0..image.channels {
                data.push(image.at(src_row, src_col, channel));
            }
        }
    }

    Ok(PixelTensor {
        rows: new_rows,
        cols: new_cols,
        channels: image.channels,
        data,
    })
}

/// チャネル方向の平均
pub fn grayscale(image: &PixelTensor) -> GrayTensor {
    let channels = image.channels.max(1);
    let data = image
        .data
        .chunks_exact(channels)
        .map(|pixel| pixel.iter().sum::<f32>() / channels as f32)
        .collect();

    GrayTensor {
        rows: image.rows,
        cols: image.cols,
        data,
    }
}

/// `255 - v`
pub fn invert(mut image: GrayTensor) -> GrayTensor {
    for value in image.data.iter_mut() {
        *value = *value * -1.0 + 255.0;
    }
    image
}

/// `v / 255`
pub fn normalize(mut image: GrayTensor) -> GrayTensor {
    for value in image.data.iter_mut() {
        *value /= 255.0;
    }
    image
}

/// `[1, rows, cols, 1]` に整形
pub fn reshape(image: GrayTensor) -> InputTensor {
    InputTensor {
        shape: InputShape::new(image.rows, image.cols),
        data: image.data,
    }
}

/// スケッチをモデル入力テンソルに変換
pub fn preprocess(sketch: &RawSketch, shape: InputShape) -> Result<InputTensor> {
    let pixels = from_pixels(sketch);
    let resized = resize_nearest_neighbor(&pixels, shape.width, shape.height)?;
    let gray = grayscale(&resized);
    let tensor = reshape(normalize(invert(gray)));

    log::debug!(
        "[preprocess] {}x{} -> {:?}",
        sketch.width(),
        sketch.height(),
        tensor.dims()
    );

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Point, SketchCanvas};
    use rand::{Rng, SeedableRng};

    fn sketch_from_gray(width: u32, height: u32, values: &[u8]) -> RawSketch {
        let rgba = values.iter().flat_map(|&v| [v, v, v, 255]).collect();
        RawSketch::from_rgba(width, height, rgba).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let sketch = RawSketch::filled(200, 200, [255, 255, 255, 255]);
        for (w, h) in [(28, 28), (1, 1), (32, 16), (200, 200), (300, 7)] {
            let tensor = preprocess(&sketch, InputShape::new(w, h)).unwrap();
            assert_eq!(tensor.dims(), [1, w, h, 1]);
            assert_eq!(tensor.data().len(), w * h);
        }
    }

    #[test]
    fn test_values_in_unit_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..8 {
            let width = rng.gen_range(1..64);
            let height = rng.gen_range(1..64);
            let rgba: Vec<u8> = (0..width * height * 4).map(|_| rng.gen()).collect();
            let sketch = RawSketch::from_rgba(width, height, rgba).unwrap();

            let tensor = preprocess(&sketch, InputShape::new(28, 28)).unwrap();
            assert!(tensor.data().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_blank_canvas_is_zero() {
        let canvas = SketchCanvas::new(200, 200, 6);
        let tensor = preprocess(&canvas.snapshot(), InputShape::new(28, 28)).unwrap();
        assert!(tensor.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_ink_becomes_one() {
        let sketch = RawSketch::filled(10, 10, [0, 0, 0, 255]);
        let tensor = preprocess(&sketch, InputShape::new(5, 5)).unwrap();
        assert!(tensor.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_alpha_is_ignored() {
        let sketch = RawSketch::from_rgba(1, 1, vec![255, 255, 255, 0]).unwrap();
        let tensor = preprocess(&sketch, InputShape::new(1, 1)).unwrap();
        assert_eq!(tensor.data(), &[0.0]);
    }

    #[test]
    fn test_nearest_neighbor_picks_floor() {
        // 4x1 -> 2x1: 出力0 <- 入力0, 出力1 <- 入力2
        let sketch = sketch_from_gray(4, 1, &[0, 50, 100, 150]);
        let resized = resize_nearest_neighbor(&from_pixels(&sketch), 1, 2).unwrap();
        assert_eq!((resized.rows(), resized.cols(), resized.channels()), (1, 2, 3));
        let gray = grayscale(&resized);
        assert_eq!((gray.rows(), gray.cols()), (1, 2));
        assert_eq!(gray.data(), &[0.0, 100.0]);
    }

    #[test]
    fn test_nearest_neighbor_upscale_repeats() {
        let sketch = sketch_from_gray(2, 1, &[10, 20]);
        let resized = resize_nearest_neighbor(&from_pixels(&sketch), 1, 5).unwrap();
        let gray = grayscale(&resized);
        // scale=0.4: floor(0, 0.4, 0.8, 1.2, 1.6)
        assert_eq!(gray.data(), &[10.0, 10.0, 10.0, 20.0, 20.0]);
    }

    #[test]
    fn test_nearest_neighbor_keeps_hard_edges() {
        let mut canvas = SketchCanvas::new(200, 200, 6);
        canvas.draw_strokes(&[vec![Point::new(0.0, 100.0), Point::new(199.0, 100.0)]]);
        let tensor = preprocess(&canvas.snapshot(), InputShape::new(28, 28)).unwrap();
        assert!(tensor.data().iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(tensor.data().iter().any(|&v| v == 1.0));
    }

    #[test]
    fn test_rows_map_to_first_axis() {
        // 1列2行: 上が黒、下が白
        let sketch = sketch_from_gray(1, 2, &[0, 255]);
        let tensor = preprocess(&sketch, InputShape::new(2, 1)).unwrap();
        assert_eq!(tensor.dims(), [1, 2, 1, 1]);
        assert_eq!(tensor.data(), &[1.0, 0.0]);
    }

    #[test]
    fn test_grayscale_averages_channels() {
        let sketch = RawSketch::from_rgba(1, 1, vec![30, 60, 90, 255]).unwrap();
        let pixels = from_pixels(&sketch);
        assert_eq!(pixels.data(), &[30.0, 60.0, 90.0]);
        let gray = grayscale(&pixels);
        assert_eq!(gray.data(), &[60.0]);
    }

    #[test]
    fn test_invert_and_normalize() {
        let sketch = sketch_from_gray(3, 1, &[0, 51, 255]);
        let gray = normalize(invert(grayscale(&from_pixels(&sketch))));
        assert_eq!(gray.data(), &[1.0, 204.0 / 255.0, 0.0]);
    }

    #[test]
    fn test_zero_target_is_error() {
        let sketch = RawSketch::filled(4, 4, [255, 255, 255, 255]);
        assert!(matches!(
            preprocess(&sketch, InputShape::new(0, 28)),
            Err(RecognizerError::InvalidInputShape(_))
        ));
    }
}
