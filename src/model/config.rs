//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデルファイル、キャンバスサイズなどをJSON形式で保存・読み込みします。
//! 各値はパイプラインやローダーの生成時に明示的に渡されます。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルファイル（tar.gz）のパス
    pub model_path: String,
    /// 読み込み直後にダミー推論を1回実行するか
    #[serde(default = "default_warmup")]
    pub warmup: bool,
}

fn default_warmup() -> bool {
    true
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/sketch_recognition_mlp.tar.gz".to_string(),
            warmup: true,
        }
    }
}

/// キャンバス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSettings {
    pub width: u32,
    pub height: u32,
    /// 線幅（ピクセル）
    pub line_width: u32,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            line_width: 6,
        }
    }
}

/// 認識結果設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// 第1候補以外に表示する候補数（0で表示しない）
    pub additional_guesses: usize,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            additional_guesses: 3,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// キャンバス設定
    #[serde(default)]
    pub canvas: CanvasSettings,
    /// 認識結果設定
    #[serde(default)]
    pub recognition: RecognitionSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("[config] 設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                log::info!("[config] 設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                log::warn!(
                    "[config] 設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// モデルパスを設定
    pub fn set_model_path(&mut self, path: String) {
        self.model.model_path = path;
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("モデルパス: {}", self.model.model_path);
        println!("ウォームアップ: {}", self.model.warmup);
        println!("\n--- キャンバス設定 ---");
        println!("サイズ: {}x{}", self.canvas.width, self.canvas.height);
        println!("線幅: {}", self.canvas.line_width);
        println!("\n--- 認識設定 ---");
        println!("追加候補数: {}", self.recognition.additional_guesses);
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.canvas.width, 200);
        assert_eq!(config.canvas.height, 200);
        assert_eq!(config.canvas.line_width, 6);
        assert_eq!(config.recognition.additional_guesses, 3);
        assert!(config.model.warmup);
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut config = AppConfig::default();
        config.set_device_type(DeviceType::Wgpu);
        config.set_model_path("other.tar.gz".to_string());
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.device_type, DeviceType::Wgpu);
        assert_eq!(deserialized.model.model_path, "other.tar.gz");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "recognition": { "additional_guesses": 0 } }"#).unwrap();
        assert_eq!(config.recognition.additional_guesses, 0);
        assert_eq!(config.canvas.width, 200);
        assert_eq!(config.device_type, DeviceType::Cpu);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.canvas.line_width = 9;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.canvas.line_width, 9);
    }

    #[test]
    fn test_load_or_default_on_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_or_default_from(&path);
        assert_eq!(config.canvas.width, 200);

        let missing = AppConfig::load_or_default_from(dir.path().join("missing.json"));
        assert_eq!(missing.recognition.additional_guesses, 3);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
