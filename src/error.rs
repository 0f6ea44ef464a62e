//! 認識パイプラインのエラー定義

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecognizerError>;

#[derive(Debug, Error)]
pub enum RecognizerError {
    /// 画素バッファ長が幅・高さと一致しない
    #[error("画素バッファのサイズが不正です: {width}x{height} には {expected} バイト必要ですが {actual} バイトでした")]
    InvalidPixelBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("入力サイズが不正です: {0}")]
    InvalidInputShape(String),

    /// ラベル表の長さとモデル出力次元の不一致
    #[error("ラベル数 ({labels}) がモデルの出力クラス数 ({outputs}) と一致しません")]
    LabelMismatch { labels: usize, outputs: usize },

    #[error("画像のデコードに失敗しました: {0}")]
    Image(#[from] image::ImageError),

    #[error("data URLの形式が不正です: {0}")]
    DataUrl(String),

    #[error("モデルの読み込みに失敗しました: {0}")]
    ModelLoad(String),

    #[error("推論に失敗しました: {0}")]
    Inference(String),
}

impl From<base64::DecodeError> for RecognizerError {
    fn from(e: base64::DecodeError) -> Self {
        RecognizerError::DataUrl(e.to_string())
    }
}
