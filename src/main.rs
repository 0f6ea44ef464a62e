//! スケッチ認識 CLI
//!
//! 画像・ストローク・data URL のいずれかを読み込み、描画終了 -> 認識の流れで結果を表示します。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sketch_recognizer_lib::canvas::{fit_strokes, Point, RawSketch, SketchCanvas, Stroke};
use sketch_recognizer_lib::labels::LabelTable;
use sketch_recognizer_lib::loader::{LoaderSettings, ModelLoader, ModelState};
use sketch_recognizer_lib::ml::{export_model, mlp_config};
use sketch_recognizer_lib::model::{load_metadata, print_metadata_info, AppConfig, DeviceType, ModelMetadata};
use sketch_recognizer_lib::preprocess::InputShape;
use sketch_recognizer_lib::resolver::ResolvedLabels;
use sketch_recognizer_lib::session::{RecognizeOutcome, SketchSession, SkipReason};

/// ストロークをキャンバスに合わせるときの余白
const STROKE_MARGIN: f32 = 10.0;

#[derive(Parser, Debug)]
#[command(name = "sketch_recognizer", version, about = "Hand-drawn sketch recognition")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// スケッチを認識する
    Recognize {
        /// 画像ファイル、ストロークの .json、data URL の .txt
        input: PathBuf,
        /// モデルファイル（tar.gz）
        #[arg(long)]
        model: Option<PathBuf>,
        /// 設定ファイル
        #[arg(long)]
        config: Option<PathBuf>,
        /// CPU バックエンドを使う
        #[arg(long)]
        cpu: bool,
        /// 追加候補数
        #[arg(long)]
        guesses: Option<usize>,
        /// 結果を JSON で出力する
        #[arg(long)]
        json: bool,
    },
    /// モデルのメタデータを表示する
    Inspect {
        model: PathBuf,
    },
    /// 初期化直後の重みでモデルファイルを作成する
    InitModel {
        output: PathBuf,
        /// 隠れ層のユニット数
        #[arg(long, value_delimiter = ',', default_value = "128,128")]
        hidden: Vec<usize>,
        /// 入力画像の一辺
        #[arg(long, default_value_t = 28)]
        input_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Recognize {
            input,
            model,
            config,
            cpu,
            guesses,
            json,
        } => {
            let mut config = match config {
                Some(path) => AppConfig::load(&path)
                    .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?,
                None => AppConfig::load_or_default(),
            };
            if let Some(model) = model {
                config.set_model_path(model.display().to_string());
            }
            if cpu {
                config.set_device_type(DeviceType::Cpu);
            }
            if let Some(n) = guesses {
                config.recognition.additional_guesses = n;
            }
            recognize(&input, &config, json).await
        }
        Command::Inspect { model } => {
            let metadata = load_metadata(&model)?;
            print_metadata_info(&metadata);
            Ok(())
        }
        Command::InitModel {
            output,
            hidden,
            input_size,
        } => init_model(&output, &hidden, input_size),
    }
}

/// `--json` 指定時の出力
#[derive(Serialize)]
struct RecognitionReport<'a> {
    outcome: &'a RecognizeOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<ResolvedLabels<'a>>,
}

impl<'a> RecognitionReport<'a> {
    fn new(outcome: &'a RecognizeOutcome, labels: &'a LabelTable) -> Self {
        let labels = match outcome {
            RecognizeOutcome::Recognized(resolution) => Some(resolution.labels(labels)),
            RecognizeOutcome::Skipped(_) => None,
        };
        Self { outcome, labels }
    }
}

async fn recognize(input: &Path, config: &AppConfig, json: bool) -> Result<()> {
    let mut loader = ModelLoader::spawn(LoaderSettings::from_config(config));
    let mut session = SketchSession::new(config.recognition.additional_guesses);

    // モデルの読み込みと並行してスケッチを準備する
    session.on_draw_end(load_sketch(input, config)?);

    if !json && loader.state().is_loading() {
        println!("Loading the model");
    }
    let model = loader.wait().await;
    if let ModelState::Failed(message) = &model {
        anyhow::bail!("モデルを読み込めませんでした: {}", message);
    }

    let labels = match model.classifier() {
        Some(classifier) => classifier
            .lock()
            .map_err(|_| anyhow::anyhow!("分類器のロックに失敗しました"))?
            .labels()
            .clone(),
        None => LabelTable::default(),
    };

    let outcome = session.recognize(&model)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&RecognitionReport::new(&outcome, &labels))?);
        return Ok(());
    }

    match outcome {
        RecognizeOutcome::Recognized(_) => {
            match session.recognized_category(&labels) {
                Some(category) => println!("It looks like {}", category),
                None => println!("It looks like ..."),
            }
            for guess in session.additional_guess_labels(&labels) {
                println!("  or {}", guess);
            }
        }
        RecognizeOutcome::Skipped(SkipReason::NoSketch) => println!("Nothing to recognize"),
        RecognizeOutcome::Skipped(SkipReason::ModelNotReady) => println!("The model is not ready"),
    }
    Ok(())
}

/// 拡張子に応じてスケッチを読み込む
fn load_sketch(input: &Path, config: &AppConfig) -> Result<Option<RawSketch>> {
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => {
            let content = std::fs::read_to_string(input)
                .with_context(|| format!("ストロークファイルを読み込めません: {}", input.display()))?;
            let strokes = parse_strokes(&content)?;
            let canvas_settings = &config.canvas;
            let strokes = fit_strokes(&strokes, canvas_settings.width, canvas_settings.height, STROKE_MARGIN);
            let mut canvas = SketchCanvas::new(canvas_settings.width, canvas_settings.height, canvas_settings.line_width);
            Ok(canvas.draw_strokes(&strokes))
        }
        Some("txt") => {
            let content = std::fs::read_to_string(input)
                .with_context(|| format!("data URL を読み込めません: {}", input.display()))?;
            Ok(Some(RawSketch::from_data_url(content.trim())?))
        }
        _ => Ok(Some(RawSketch::open(input)?)),
    }
}

/// `[[[x...], [y...]], ...]` 形式のストロークを読み込む
fn parse_strokes(content: &str) -> Result<Vec<Stroke>> {
    let raw: Vec<[Vec<f32>; 2]> = serde_json::from_str(content).context("ストロークの形式が不正です")?;
    Ok(raw
        .into_iter()
        .map(|[xs, ys]| xs.into_iter().zip(ys).map(|(x, y)| Point::new(x, y)).collect())
        .collect())
}

fn init_model(output: &Path, hidden: &[usize], input_size: usize) -> Result<()> {
    let metadata = ModelMetadata::new(LabelTable::default(), InputShape::new(input_size, input_size), hidden);
    let device = burn_ndarray::NdArrayDevice::Cpu;
    let model = mlp_config(&metadata)?.init::<burn_ndarray::NdArray<f32>>(&device);
    let path = export_model(&model, &metadata, output)?;
    println!("モデルを保存しました: {}", path.display());
    print_metadata_info(&metadata);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strokes() {
        let strokes = parse_strokes("[[[0, 10, 20], [5, 5, 6]], [[1], [2]]]").unwrap();
        assert_eq!(strokes.len(), 2);
        assert_eq!(strokes[0][2], Point::new(20.0, 6.0));
        assert_eq!(strokes[1], vec![Point::new(1.0, 2.0)]);
    }

    #[test]
    fn test_parse_strokes_rejects_bad_shape() {
        assert!(parse_strokes("[[1, 2, 3]]").is_err());
    }

    #[test]
    fn test_load_sketch_from_strokes_is_canvas_sized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.json");
        std::fs::write(&path, "[[[0, 100], [0, 100]]]").unwrap();

        let sketch = load_sketch(&path, &AppConfig::default()).unwrap().unwrap();
        assert_eq!((sketch.width(), sketch.height()), (200, 200));
        assert_eq!(sketch.pixel(100, 100), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_json_report() {
        use sketch_recognizer_lib::resolver::Resolution;

        let labels: LabelTable = ["cat", "dog", "bird"].into_iter().collect();
        let outcome = RecognizeOutcome::Recognized(Resolution {
            primary: Some(1),
            guesses: vec![2],
        });
        let value = serde_json::to_value(RecognitionReport::new(&outcome, &labels)).unwrap();
        assert_eq!(value["outcome"]["Recognized"]["primary"], 1);
        assert_eq!(value["labels"]["primary"], "dog");
        assert_eq!(value["labels"]["guesses"][0], "bird");

        let skipped = RecognizeOutcome::Skipped(SkipReason::NoSketch);
        let value = serde_json::to_value(RecognitionReport::new(&skipped, &labels)).unwrap();
        assert_eq!(value["outcome"]["Skipped"], "NoSketch");
        assert!(value.get("labels").is_none());
    }

    #[test]
    fn test_cli_parses_hidden_list() {
        let cli = Cli::parse_from(["sketch_recognizer", "init-model", "out.tar.gz", "--hidden", "64,32"]);
        match cli.command {
            Command::InitModel { hidden, input_size, .. } => {
                assert_eq!(hidden, vec![64, 32]);
                assert_eq!(input_size, 28);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
