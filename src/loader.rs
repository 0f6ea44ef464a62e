//! モデルの非同期読み込み
//!
//! 読み込みはブロッキングタスクで行い、状態を `watch` チャネルで公開します。
//! 利用側は [`ModelLoader::state`] でポーリングするか、
//! [`ModelLoader::subscribe`] / [`ModelLoader::wait`] で完了を待ちます。
//! 失敗しても再試行はしません。

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ml::{load_classifier, SketchClassifier};
use crate::model::{AppConfig, DeviceType};

/// 複数の呼び出し元で共有する分類器
pub type SharedClassifier = Arc<Mutex<Box<dyn SketchClassifier>>>;

/// モデルの読み込み状態
#[derive(Clone)]
pub enum ModelState {
    Loading,
    Ready(SharedClassifier),
    Failed(String),
}

impl ModelState {
    pub fn ready(classifier: Box<dyn SketchClassifier>) -> Self {
        ModelState::Ready(Arc::new(Mutex::new(classifier)))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ModelState::Loading)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready(_))
    }

    pub fn classifier(&self) -> Option<&SharedClassifier> {
        match self {
            ModelState::Ready(classifier) => Some(classifier),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ModelState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Loading => write!(f, "Loading"),
            ModelState::Ready(_) => write!(f, "Ready"),
            ModelState::Failed(message) => f.debug_tuple("Failed").field(message).finish(),
        }
    }
}

/// 読み込み設定
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub model_path: PathBuf,
    pub device_type: DeviceType,
    /// 読み込み直後にダミー推論を行う
    pub warmup: bool,
}

impl LoaderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model_path: PathBuf::from(&config.model.model_path),
            device_type: config.device_type,
            warmup: config.model.warmup,
        }
    }
}

/// モデルローダー
pub struct ModelLoader {
    state: watch::Receiver<ModelState>,
    task: Option<JoinHandle<()>>,
}

impl ModelLoader {
    /// 設定に従ってモデルの読み込みを開始
    ///
    /// tokio ランタイム内で呼び出す必要があります。
    pub fn spawn(settings: LoaderSettings) -> Self {
        Self::spawn_with(move || {
            log::info!(
                "[ModelLoader] モデルを読み込み中: {} ({})",
                settings.model_path.display(),
                settings.device_type
            );
            let classifier = load_classifier(&settings.model_path, settings.device_type)?;
            if settings.warmup {
                classifier.warmup()?;
                log::info!("[ModelLoader] ウォームアップ完了");
            }
            Ok(classifier)
        })
    }

    /// 任意の読み込み処理をブロッキングタスクで実行
    pub fn spawn_with<F>(load: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Box<dyn SketchClassifier>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(ModelState::Loading);

        let task = tokio::spawn(async move {
            let state = match tokio::task::spawn_blocking(load).await {
                Ok(Ok(classifier)) => ModelState::ready(classifier),
                Ok(Err(e)) => ModelState::Failed(format!("{:#}", e)),
                Err(e) => ModelState::Failed(format!("読み込みタスクが異常終了しました: {}", e)),
            };

            match &state {
                ModelState::Failed(message) => {
                    log::error!("[ModelLoader] モデルの読み込みに失敗しました: {}", message)
                }
                _ => log::info!("[ModelLoader] モデルの準備ができました"),
            }

            // 受信側がすべて破棄されていても問題ない
            let _ = tx.send(state);
        });

        Self {
            state: rx,
            task: Some(task),
        }
    }

    /// 固定の状態を持つローダー
    pub fn with_state(state: ModelState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self {
            state: rx,
            task: None,
        }
    }

    /// 現在の状態
    pub fn state(&self) -> ModelState {
        self.state.borrow().clone()
    }

    /// 状態変化の購読
    pub fn subscribe(&self) -> watch::Receiver<ModelState> {
        self.state.clone()
    }

    /// 読み込みが終わる（Ready か Failed になる）まで待つ
    pub async fn wait(&mut self) -> ModelState {
        loop {
            let current = self.state();
            if !current.is_loading() {
                return current;
            }
            if self.state.changed().await.is_err() {
                return self.state();
            }
        }
    }
}

impl Drop for ModelLoader {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelTable;
    use crate::ml::{export_model, mlp_config};
    use crate::model::ModelMetadata;
    use crate::preprocess::InputShape;

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn write_model(dir: &std::path::Path) -> PathBuf {
        let labels: LabelTable = ["cat", "dog", "bird"].into_iter().collect();
        let metadata = ModelMetadata::new(labels, InputShape::new(28, 28), &[8]);
        let model = mlp_config(&metadata).unwrap().init::<TestBackend>(&Default::default());
        export_model(&model, &metadata, &dir.join("mlp.tar.gz")).unwrap()
    }

    #[tokio::test]
    async fn test_load_ready() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = write_model(dir.path());

        let mut loader = ModelLoader::spawn(LoaderSettings {
            model_path,
            device_type: DeviceType::Cpu,
            warmup: true,
        });
        let state = loader.wait().await;
        assert!(state.is_ready());

        let classifier = state.classifier().unwrap().lock().unwrap();
        assert_eq!(classifier.input_shape(), InputShape::new(28, 28));
        assert_eq!(classifier.labels().len(), 3);
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ModelLoader::spawn(LoaderSettings {
            model_path: dir.path().join("missing.tar.gz"),
            device_type: DeviceType::Cpu,
            warmup: false,
        });

        let state = loader.wait().await;
        let message = state.error_message().unwrap();
        assert!(message.contains("missing.tar.gz"));
        assert!(loader.state().error_message().is_some());
    }

    #[tokio::test]
    async fn test_weight_shape_mismatch_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let binary = crate::model::load_model_binary(&write_model(dir.path())).unwrap();
        let labels: LabelTable = ["cat", "dog", "bird"].into_iter().collect();
        let metadata = ModelMetadata::new(labels, InputShape::new(20, 20), &[8]);
        let model_path = crate::model::save_model_with_metadata(
            &dir.path().join("mismatch.tar.gz"),
            &metadata,
            &binary,
        )
        .unwrap();

        let mut loader = ModelLoader::spawn(LoaderSettings {
            model_path,
            device_type: DeviceType::Cpu,
            warmup: false,
        });
        let state = loader.wait().await;
        assert!(state.error_message().unwrap().contains("一致しません"));
    }

    #[tokio::test]
    async fn test_subscribe_sees_transition() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let loader = ModelLoader::spawn_with(move || {
            release_rx.recv().ok();
            Err(anyhow::anyhow!("boom"))
        });

        let mut rx = loader.subscribe();
        assert!(loader.state().is_loading());

        release_tx.send(()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().error_message(), Some("boom"));
    }

    #[tokio::test]
    async fn test_fixed_state() {
        let mut loader = ModelLoader::with_state(ModelState::Failed("x".to_string()));
        assert_eq!(loader.wait().await.error_message(), Some("x"));

        let mut loading = ModelLoader::with_state(ModelState::Loading);
        // 送信側がないので Loading のまま返る
        assert!(loading.wait().await.is_loading());
    }
}
