//! モデルメタデータの定義
//!
//! tar.gz形式のモデルファイルに `metadata.json` として格納されます。
//! 各層の入出力形状（バッチ次元は `null`）とラベル表を保持し、
//! 推論側は第1層の入力形状 `[null, width, height, 1]` から前処理のサイズを決めます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::labels::LabelTable;
use crate::preprocess::InputShape;

/// 層ごとの形状情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub name: String,
    /// 入力形状（`None` はバッチ次元）
    pub input_shape: Vec<Option<usize>>,
    /// 出力形状
    pub output_shape: Vec<Option<usize>>,
}

impl LayerMetadata {
    fn flatten(shape: InputShape) -> Self {
        Self {
            name: "flatten".to_string(),
            input_shape: vec![None, Some(shape.width), Some(shape.height), Some(1)],
            output_shape: vec![None, Some(shape.num_elements())],
        }
    }

    fn dense(index: usize, units_in: usize, units_out: usize) -> Self {
        Self {
            name: format!("dense_{}", index),
            input_shape: vec![None, Some(units_in)],
            output_shape: vec![None, Some(units_out)],
        }
    }

    /// 全結合層のユニット数（出力形状の最終次元）
    pub fn units(&self) -> Option<usize> {
        self.output_shape.last().copied().flatten()
    }
}

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 出力インデックス順のラベル
    pub labels: LabelTable,

    /// 層の一覧（先頭が入力層）
    pub layers: Vec<LayerMetadata>,

    /// モデルの作成時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// MLP 構成から新しいメタデータを作成
    ///
    /// 層構成: flatten -> dense(hidden...) -> dense(ラベル数)
    pub fn new(labels: LabelTable, input_shape: InputShape, hidden_sizes: &[usize]) -> Self {
        let num_classes = labels.len();
        let mut layers = vec![LayerMetadata::flatten(input_shape)];
        let mut units_in = input_shape.num_elements();
        for (i, &units) in hidden_sizes.iter().chain([num_classes].iter()).enumerate() {
            layers.push(LayerMetadata::dense(i + 1, units_in, units));
            units_in = units;
        }

        Self {
            labels,
            layers,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 第1層の入力形状から前処理サイズを取得
    pub fn input_shape(&self) -> Result<InputShape> {
        let first = self.layers.first().context("layers が空です")?;
        let width = first.input_shape.get(1).copied().flatten();
        let height = first.input_shape.get(2).copied().flatten();
        match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Ok(InputShape::new(w, h)),
            _ => anyhow::bail!("第1層の入力形状が不正です: {:?}", first.input_shape),
        }
    }

    /// 隠れ層のユニット数（入力層と出力層を除く）
    pub fn hidden_sizes(&self) -> Vec<usize> {
        let dense = self.layers.iter().skip(1).filter_map(LayerMetadata::units);
        let mut sizes: Vec<usize> = dense.collect();
        sizes.pop();
        sizes
    }

    /// 出力クラス数（最終層のユニット数）
    pub fn num_classes(&self) -> Option<usize> {
        self.layers.last().and_then(LayerMetadata::units)
    }

    /// ラベル数と出力次元の整合性を確認
    pub fn validate(&self) -> Result<()> {
        self.input_shape()?;
        let outputs = self.num_classes().context("最終層の出力形状がありません")?;
        if self.layers.len() < 2 {
            anyhow::bail!("全結合層がありません");
        }
        if self.labels.len() != outputs {
            anyhow::bail!(crate::error::RecognizerError::LabelMismatch {
                labels: self.labels.len(),
                outputs,
            });
        }
        Ok(())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelTable {
        ["cat", "dog", "bird"].into_iter().collect()
    }

    #[test]
    fn test_layers_from_config() {
        let metadata = ModelMetadata::new(labels(), InputShape::new(28, 28), &[128, 64]);
        assert_eq!(metadata.layers.len(), 4);
        assert_eq!(metadata.layers[0].input_shape, vec![None, Some(28), Some(28), Some(1)]);
        assert_eq!(metadata.layers[1].input_shape, vec![None, Some(784)]);
        assert_eq!(metadata.hidden_sizes(), vec![128, 64]);
        assert_eq!(metadata.num_classes(), Some(3));
        assert_eq!(metadata.input_shape().unwrap(), InputShape::new(28, 28));
        metadata.validate().unwrap();
    }

    #[test]
    fn test_json_roundtrip_uses_null_batch() {
        let metadata = ModelMetadata::new(labels(), InputShape::new(16, 8), &[]);
        let json = metadata.to_json_string().unwrap();
        assert!(json.contains("null"));

        let parsed = ModelMetadata::from_json_string(&json).unwrap();
        assert_eq!(parsed.layers, metadata.layers);
        assert_eq!(parsed.labels, metadata.labels);
        assert!(parsed.hidden_sizes().is_empty());
    }

    #[test]
    fn test_label_mismatch() {
        let mut metadata = ModelMetadata::new(labels(), InputShape::new(28, 28), &[32]);
        metadata.labels = ["cat", "dog"].into_iter().collect();
        let err = metadata.validate().unwrap_err();
        assert!(err.to_string().contains("一致しません"));
    }

    #[test]
    fn test_invalid_input_shape() {
        let mut metadata = ModelMetadata::new(labels(), InputShape::new(28, 28), &[32]);
        metadata.layers[0].input_shape = vec![None, Some(28)];
        assert!(metadata.input_shape().is_err());
        assert!(metadata.validate().is_err());
    }
}
