//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（ラベル表、層ごとの形状）
//! - model.bin       - モデルの重み（burn の BinBytesRecorder 形式）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを `.tar.gz` に揃える
fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 拡張子が `.gz` でなければ `.tar.gz` を付けます。実際に書き込んだパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to flush gzip stream")?;

    log::info!("[model_storage] モデルを保存しました: {}", tar_gz_path.display());
    Ok(tar_gz_path)
}

/// アーカイブを走査して `wanted` に含まれるエントリを読み出す
///
/// 返り値は `wanted` と同じ順序で、見つからなかったものは `None`。
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));
    let mut found: Vec<Option<Vec<u8>>> = vec![None; wanted.len()];

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();

        if let Some(slot) = wanted.iter().position(|w| *w == path) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found[slot] = Some(buffer);
            if found.iter().all(Option::is_some) {
                break;
            }
        }
    }

    Ok(found)
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    let bytes = entries
        .pop()
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("metadata.json not found in tar.gz archive"))?;
    parse_metadata(bytes)
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let mut entries = read_entries(tar_gz_path, &[MODEL_ENTRY])?;
    entries
        .pop()
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?.into_iter();
    match (entries.next().flatten(), entries.next().flatten()) {
        (Some(metadata), Some(binary)) => Ok((parse_metadata(metadata)?, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    match metadata.input_shape() {
        Ok(shape) => println!("入力サイズ: {}x{}", shape.width, shape.height),
        Err(e) => println!("入力サイズ: 不明 ({})", e),
    }
    println!("層構成:");
    for layer in &metadata.layers {
        println!("  {}: {:?} -> {:?}", layer.name, layer.input_shape, layer.output_shape);
    }
    println!("クラス数: {}", metadata.labels.len());
    let preview: Vec<&str> = metadata.labels.iter().take(10).collect();
    println!("ラベル（先頭10件）: {}", preview.join(", "));
    println!("作成日時: {}", metadata.trained_at);
    println!("========================");
}
