//! 手描きスケッチ認識ライブラリ
//!
//! キャンバスの画素を前処理し、多層パーセプトロンで 345 カテゴリのいずれかに分類します。
#![recursion_limit = "256"]


pub mod canvas;
pub mod error;
pub mod labels;
pub mod loader;
pub mod model;
pub mod ml;
pub mod preprocess;
pub mod resolver;
pub mod session;

pub use canvas::{fit_strokes, Point, RawSketch, SketchCanvas, Stroke};
pub use error::{RecognizerError, Result};
pub use labels::{LabelTable, DEFAULT_LABELS, NUM_DEFAULT_LABELS};
pub use loader::{LoaderSettings, ModelLoader, ModelState, SharedClassifier};
pub use preprocess::{preprocess, InputShape, InputTensor};
pub use resolver::{resolve, Resolution, ResolvedLabels};
pub use session::{RecognizeOutcome, SketchSession, SkipReason};
