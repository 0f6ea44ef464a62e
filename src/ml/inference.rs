//! モデル推論機能

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use std::path::{Path, PathBuf};

use crate::error::RecognizerError;
use crate::labels::LabelTable;
use crate::ml::{SketchMlp, SketchMlpConfig};
use crate::model::{load_model_with_metadata, save_model_with_metadata, DeviceType, ModelMetadata};
use crate::preprocess::{InputShape, InputTensor};

/// 読み込み済みモデルへのハンドル
///
/// バックエンドの型を隠して、ローダーやセッションから共通に扱えるようにします。
pub trait SketchClassifier: Send {
    /// 第1層の入力形状
    fn input_shape(&self) -> InputShape;

    fn labels(&self) -> &LabelTable;

    fn metadata(&self) -> &ModelMetadata;

    /// 入力テンソルからクラスごとの確率を求める
    fn predict(&self, input: &InputTensor) -> crate::error::Result<Vec<f32>>;

    /// ダミー入力で1回推論し、初回の遅延初期化を済ませる
    fn warmup(&self) -> crate::error::Result<()> {
        self.predict(&InputTensor::zeros(self.input_shape()))?;
        Ok(())
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: SketchMlp<B>,
    metadata: ModelMetadata,
    input_shape: InputShape,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルファイルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;
        metadata.validate().context("モデルメタデータが不正です")?;

        let config = mlp_config(&metadata)?;
        let model = config.init::<B>(&device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        // レコード読み込みでは形状が検査されない
        let expected = config.layer_shapes();
        let actual = model.layer_shapes();
        if actual != expected {
            return Err(RecognizerError::ModelLoad(format!(
                "重みの形状がメタデータと一致しません: メタデータ {:?}, 重み {:?}",
                expected, actual
            ))
            .into());
        }

        log::info!(
            "[InferenceEngine] モデルを読み込みました: {} ({}クラス, {}パラメータ)",
            model_path.display(),
            metadata.labels.len(),
            model.num_params()
        );

        Self::from_model(model, metadata, device)
    }

    /// 初期化済みのモデルから推論エンジンを作成
    pub fn from_model(model: SketchMlp<B>, metadata: ModelMetadata, device: B::Device) -> Result<Self> {
        metadata.validate()?;
        let input_shape = metadata.input_shape()?;
        Ok(Self {
            model,
            metadata,
            input_shape,
            device,
        })
    }

    /// モデルとメタデータをtar.gzに保存
    pub fn save(&self, output_path: &Path) -> Result<PathBuf> {
        export_model(&self.model, &self.metadata, output_path)
    }
}

impl<B: Backend> SketchClassifier for InferenceEngine<B> {
    fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    fn labels(&self) -> &LabelTable {
        &self.metadata.labels
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn predict(&self, input: &InputTensor) -> crate::error::Result<Vec<f32>> {
        if input.input_shape() != self.input_shape {
            return Err(RecognizerError::InvalidInputShape(format!(
                "モデル入力は {:?} ですが {:?} が渡されました",
                self.input_shape,
                input.input_shape()
            )));
        }

        let data = TensorData::new(input.data().to_vec(), input.dims());
        let tensor = Tensor::<B, 4>::from_data(data, &self.device);

        let probs = self
            .model
            .predict(tensor)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| RecognizerError::Inference(format!("推論結果の取得エラー: {:?}", e)))?;

        if probs.len() != self.metadata.labels.len() {
            return Err(RecognizerError::LabelMismatch {
                labels: self.metadata.labels.len(),
                outputs: probs.len(),
            });
        }
        Ok(probs)
    }
}

/// メタデータからモデル設定を作成
pub fn mlp_config(metadata: &ModelMetadata) -> Result<SketchMlpConfig> {
    let shape = metadata.input_shape()?;
    let num_classes = metadata
        .num_classes()
        .context("最終層の出力形状がありません")?;
    Ok(SketchMlpConfig::new(
        shape.width,
        shape.height,
        metadata.hidden_sizes(),
        num_classes,
    ))
}

/// モデルの重みをメタデータと共に保存
pub fn export_model<B: Backend>(
    model: &SketchMlp<B>,
    metadata: &ModelMetadata,
    output_path: &Path,
) -> Result<PathBuf> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = recorder
        .record(model.clone().into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;
    save_model_with_metadata(output_path, metadata, &model_binary)
}

/// デバイス種別に応じたバックエンドで推論エンジンを読み込む
pub fn load_classifier(model_path: &Path, device_type: DeviceType) -> Result<Box<dyn SketchClassifier>> {
    match device_type {
        DeviceType::Cpu => {
            let engine = InferenceEngine::<burn_ndarray::NdArray<f32>>::load(
                model_path,
                burn_ndarray::NdArrayDevice::Cpu,
            )?;
            Ok(Box::new(engine))
        }
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            let engine = InferenceEngine::<burn::backend::Wgpu>::load(
                model_path,
                burn::backend::wgpu::WgpuDevice::default(),
            )?;
            Ok(Box::new(engine))
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            log::warn!("[InferenceEngine] wgpu 機能が無効なため CPU で推論します");
            load_classifier(model_path, DeviceType::Cpu)
        }
    }
}
