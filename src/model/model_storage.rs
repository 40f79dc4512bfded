//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（ラベル順序、入力サイズ、ヘッド構成など）
//! - model.bin       - モデルの重み（バイナリ）
//!
//! 既定では同じパスに上書き保存します。`versioned` を有効にすると
//! `<stem>-<日時>.tar.gz` として保存し、過去のモデルを残します。

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};
use tracing::info;

use crate::error::WasteSorterError;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";
const ARCHIVE_SUFFIX: &str = ".tar.gz";
const VERSION_FORMAT: &str = "%Y%m%d-%H%M%S%3f";
const VERSION_STAMP_LEN: usize = 18;

fn format_error(path: &Path, reason: impl ToString) -> anyhow::Error {
    WasteSorterError::ArtifactFormat {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
    .into()
}

/// 拡張子を除いたファイル名（`.tar.gz` もまとめて除く）
fn artifact_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "model".to_string());
    match name.strip_suffix(ARCHIVE_SUFFIX) {
        Some(stem) => stem.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or(name),
    }
}

/// `%Y%m%d-%H%M%S%3f` で書いた日時か（例: `20261019-153045123`）
fn is_version_stamp(stamp: &str) -> bool {
    let bytes = stamp.as_bytes();
    bytes.len() == VERSION_STAMP_LEN
        && bytes.iter().enumerate().all(|(i, b)| {
            if i == 8 {
                *b == b'-'
            } else {
                b.is_ascii_digit()
            }
        })
}

/// 保存先パスを決定
///
/// `versioned` が false なら `base`（拡張子が無ければ `.tar.gz` を付与）をそのまま返します。
pub fn resolve_output_path(base: &Path, versioned: bool) -> PathBuf {
    let parent = base.parent().map(Path::to_path_buf).unwrap_or_default();
    if versioned {
        let stamp = chrono::Local::now().format(VERSION_FORMAT);
        parent.join(format!("{}-{}{}", artifact_stem(base), stamp, ARCHIVE_SUFFIX))
    } else if base.extension().and_then(|s| s.to_str()) == Some("gz") {
        base.to_path_buf()
    } else {
        base.with_extension("tar.gz")
    }
}

/// 読み込むモデルファイルを決定
///
/// `versioned` の場合は同じディレクトリにある `<stem>-*.tar.gz` のうち最新のものを返し、
/// 見つからなければ `base` を返します。
pub fn latest_artifact(base: &Path, versioned: bool) -> Result<PathBuf> {
    if !versioned {
        return Ok(resolve_output_path(base, false));
    }

    let parent = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!("{}-", artifact_stem(base));

    let mut candidates: Vec<PathBuf> = match fs::read_dir(&parent) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .and_then(|n| {
                        n.strip_prefix(&prefix)
                            .and_then(|rest| rest.strip_suffix(ARCHIVE_SUFFIX))
                            .map(is_version_stamp)
                    })
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    // 日時はゼロ埋めなので辞書順 = 時刻順
    candidates.sort();

    Ok(candidates
        .pop()
        .unwrap_or_else(|| resolve_output_path(base, false)))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 既存のファイルは丸ごと置き換えます。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let tar_gz_file = File::create(output_path)
        .context(format!("Failed to create tar.gz file: {:?}", output_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    let json_bytes = json_str.as_bytes();

    let mut header = tar::Header::new_gnu();
    header.set_path(METADATA_ENTRY)?;
    header.set_size(json_bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar_builder
        .append(&header, json_bytes)
        .context("Failed to add metadata.json to tar")?;

    let mut header = tar::Header::new_gnu();
    header.set_path(MODEL_ENTRY)?;
    header.set_size(model_binary.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar_builder
        .append(&header, model_binary)
        .context("Failed to add model.bin to tar")?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    info!(
        "モデルを保存しました: {} ({:.2} MB)",
        output_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    Ok(())
}

/// アーカイブ内のエントリを読み込む
fn read_entries(
    tar_gz_path: &Path,
    want_metadata: bool,
    want_model: bool,
) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    if !tar_gz_path.is_file() {
        return Err(WasteSorterError::ArtifactNotFound(tar_gz_path.to_path_buf()).into());
    }

    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata = None;
    let mut model_binary = None;

    for entry in archive.entries().map_err(|e| format_error(tar_gz_path, e))? {
        let mut entry = entry.map_err(|e| format_error(tar_gz_path, e))?;
        let entry_path = entry
            .path()
            .map_err(|e| format_error(tar_gz_path, e))?
            .to_string_lossy()
            .to_string();

        match entry_path.as_str() {
            METADATA_ENTRY if want_metadata => {
                let mut json_str = String::new();
                entry
                    .read_to_string(&mut json_str)
                    .map_err(|e| format_error(tar_gz_path, e))?;
                let parsed = ModelMetadata::from_json_string(&json_str)
                    .map_err(|e| format_error(tar_gz_path, format!("{:#}", e)))?;
                metadata = Some(parsed);
            }
            MODEL_ENTRY if want_model => {
                let mut buffer = Vec::new();
                entry
                    .read_to_end(&mut buffer)
                    .map_err(|e| format_error(tar_gz_path, e))?;
                model_binary = Some(buffer);
            }
            _ => {}
        }

        if (metadata.is_some() || !want_metadata) && (model_binary.is_some() || !want_model) {
            break;
        }
    }

    if want_metadata && metadata.is_none() {
        return Err(format_error(tar_gz_path, "metadata.json not found in tar.gz archive"));
    }
    if want_model && model_binary.is_none() {
        return Err(format_error(tar_gz_path, "model.bin not found in tar.gz archive"));
    }

    Ok((metadata, model_binary))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let (metadata, _) = read_entries(tar_gz_path, true, false)?;
    metadata.ok_or_else(|| format_error(tar_gz_path, "metadata.json not found in tar.gz archive"))
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let (_, binary) = read_entries(tar_gz_path, false, true)?;
    binary.ok_or_else(|| format_error(tar_gz_path, "model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_entries(tar_gz_path, true, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        _ => Err(format_error(tar_gz_path, "incomplete tar.gz archive")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(
            vec!["cardboard".into(), "glass".into()],
            32,
            8,
            0.5,
            [2, 4, 4, 4, 4],
            false,
            1,
            0,
        )
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("m.tar.gz");
        let binary = vec![1u8, 2, 3, 4, 5];

        save_model_with_metadata(&path, &metadata(), &binary).unwrap();

        let (loaded_meta, loaded_bin) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded_meta, metadata_with_time(&loaded_meta));
        assert_eq!(loaded_bin, binary);
        assert_eq!(load_model_binary(&path).unwrap(), binary);
        assert_eq!(load_metadata(&path).unwrap().image_size, 32);
    }

    fn metadata_with_time(loaded: &ModelMetadata) -> ModelMetadata {
        ModelMetadata {
            trained_at: loaded.trained_at.clone(),
            ..metadata()
        }
    }

    #[test]
    fn test_save_overwrites_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.tar.gz");

        save_model_with_metadata(&path, &metadata(), &[9; 100]).unwrap();
        save_model_with_metadata(&path, &metadata(), &[7; 3]).unwrap();

        assert_eq!(load_model_binary(&path).unwrap(), vec![7; 3]);
    }

    #[test]
    fn test_missing_artifact_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_metadata(&dir.path().join("absent.tar.gz")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WasteSorterError>(),
            Some(WasteSorterError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn test_garbage_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar.gz");
        fs::write(&path, b"definitely not gzip").unwrap();

        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WasteSorterError>(),
            Some(WasteSorterError::ArtifactFormat { .. })
        ));
    }

    #[test]
    fn test_resolve_output_path() {
        let base = Path::new("models/waste_classifier.tar.gz");
        assert_eq!(resolve_output_path(base, false), base);
        assert_eq!(
            resolve_output_path(Path::new("models/knn"), false),
            PathBuf::from("models/knn.tar.gz")
        );

        let versioned = resolve_output_path(base, true);
        let name = versioned.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("waste_classifier-"));
        assert!(name.ends_with(".tar.gz"));
        assert_eq!(versioned.parent(), base.parent());
    }

    #[test]
    fn test_latest_artifact_picks_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("wc.tar.gz");
        for stamp in ["20240101-000000000", "20250101-000000000", "20230101-000000000"] {
            fs::write(dir.path().join(format!("wc-{}.tar.gz", stamp)), b"x").unwrap();
        }
        fs::write(dir.path().join("other-20990101-000000000.tar.gz"), b"x").unwrap();

        let latest = latest_artifact(&base, true).unwrap();
        assert_eq!(latest, dir.path().join("wc-20250101-000000000.tar.gz"));
        assert_eq!(latest_artifact(&base, false).unwrap(), base);
    }

    #[test]
    fn test_latest_artifact_ignores_other_models_sharing_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("wc.tar.gz");
        fs::write(dir.path().join("wc-20240101-000000000.tar.gz"), b"x").unwrap();
        fs::write(dir.path().join("wc-small-20990101-000000000.tar.gz"), b"x").unwrap();
        fs::write(dir.path().join("wc-20990101.tar.gz"), b"x").unwrap();
        fs::write(dir.path().join("wc-2099010a-000000000.tar.gz"), b"x").unwrap();

        let latest = latest_artifact(&base, true).unwrap();
        assert_eq!(latest, dir.path().join("wc-20240101-000000000.tar.gz"));
    }

    #[test]
    fn test_versioned_name_round_trips_through_stamp_check() {
        let path = resolve_output_path(Path::new("models/wc.tar.gz"), true);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let stamp = name
            .strip_prefix("wc-")
            .and_then(|rest| rest.strip_suffix(ARCHIVE_SUFFIX))
            .unwrap();
        assert!(is_version_stamp(stamp));
        assert!(!is_version_stamp("small-20990101-000000000"));
    }
}
