//! 画面状態と2つのユーザー操作（認識・クリア）
//!
//! 描画終了ごとにスケッチを差し替え、認識時に前処理 -> 推論 -> 結果決定を行います。
//! スケッチ未描画やモデル未準備のときは何もせず、その理由を返します。

use serde::Serialize;

use crate::canvas::RawSketch;
use crate::error::{RecognizerError, Result};
use crate::labels::LabelTable;
use crate::loader::ModelState;
use crate::preprocess::preprocess;
use crate::resolver::{resolve, Resolution};

/// 認識を行わなかった理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// スケッチが描かれていない
    NoSketch,
    /// モデルが読み込み中、または読み込みに失敗した
    ModelNotReady,
}

/// 認識操作の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecognizeOutcome {
    Recognized(Resolution),
    Skipped(SkipReason),
}

/// スケッチ認識の画面状態
#[derive(Debug, Clone, Default)]
pub struct SketchSession {
    recognized_category_index: Option<usize>,
    guess_indices: Option<Vec<usize>>,
    sketch: Option<RawSketch>,
    canvas_revision: u64,
    additional_guesses: usize,
}

impl SketchSession {
    /// `additional_guesses` 個の追加候補を保持するセッション
    ///
    /// 0 の場合、追加候補は設定されません。
    pub fn new(additional_guesses: usize) -> Self {
        Self {
            additional_guesses,
            ..Self::default()
        }
    }

    pub fn recognized_category_index(&self) -> Option<usize> {
        self.recognized_category_index
    }

    pub fn guess_indices(&self) -> Option<&[usize]> {
        self.guess_indices.as_deref()
    }

    pub fn sketch(&self) -> Option<&RawSketch> {
        self.sketch.as_ref()
    }

    /// キャンバスに渡すリビジョン番号
    pub fn canvas_revision(&self) -> u64 {
        self.canvas_revision
    }

    /// 描画終了イベント
    ///
    /// 画素データがない場合は無視します。
    pub fn on_draw_end(&mut self, sketch: Option<RawSketch>) {
        if let Some(sketch) = sketch {
            self.sketch = Some(sketch);
        }
    }

    /// 認識ボタンを有効にできるか
    pub fn can_recognize(&self, model: &ModelState) -> bool {
        self.sketch.is_some() && model.is_ready()
    }

    /// クリアボタンを有効にできるか
    pub fn can_clear(&self) -> bool {
        self.sketch.is_some()
    }

    /// 認識結果と描画をすべて破棄し、キャンバスを作り直させる
    pub fn clear(&mut self) {
        self.recognized_category_index = None;
        self.guess_indices = None;
        self.sketch = None;
        self.canvas_revision += 1;
    }

    /// 現在のスケッチを認識する
    ///
    /// スキップした場合と失敗した場合は状態を変更しません。
    pub fn recognize(&mut self, model: &ModelState) -> Result<RecognizeOutcome> {
        let Some(sketch) = self.sketch.as_ref() else {
            log::debug!("[session] スケッチがないため認識をスキップします");
            return Ok(RecognizeOutcome::Skipped(SkipReason::NoSketch));
        };
        let Some(classifier) = model.classifier() else {
            log::debug!("[session] モデルが未準備のため認識をスキップします");
            return Ok(RecognizeOutcome::Skipped(SkipReason::ModelNotReady));
        };

        let resolution = {
            let classifier = classifier
                .lock()
                .map_err(|_| RecognizerError::Inference("分類器のロックに失敗しました".to_string()))?;
            let input = preprocess(sketch, classifier.input_shape())?;
            let probs = classifier.predict(&input)?;
            resolve(&probs, self.additional_guesses)
        };

        log::info!(
            "[session] 認識結果: {:?} (候補: {:?})",
            resolution.primary,
            resolution.guesses
        );

        self.recognized_category_index = resolution.primary;
        if self.additional_guesses > 0 {
            self.guess_indices = Some(resolution.guesses.clone());
        }

        Ok(RecognizeOutcome::Recognized(resolution))
    }

    /// 表示するカテゴリ名（範囲外のインデックスは表示しない）
    pub fn recognized_category<'a>(&self, labels: &'a LabelTable) -> Option<&'a str> {
        self.recognized_category_index.and_then(|i| labels.get(i))
    }

    /// 表示する追加候補名
    pub fn additional_guess_labels<'a>(&self, labels: &'a LabelTable) -> Vec<&'a str> {
        self.guess_indices
            .iter()
            .flatten()
            .filter_map(|&i| labels.get(i))
            .collect()
    }
}
