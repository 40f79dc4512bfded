//! 呼び出し側が判別する必要のあるエラー
//!
//! 通常は `anyhow::Error` に包んで返し、必要な箇所で `downcast_ref` で取り出します。

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WasteSorterError {
    /// データセットのディレクトリが存在しない
    #[error("dataset directory does not exist: {0}")]
    DatasetNotFound(PathBuf),

    /// 固定クラスのサブディレクトリが欠けている
    #[error("class directory '{label}' is missing under {root}")]
    MissingClassDirectory { root: PathBuf, label: String },

    /// 固定クラス以外のサブディレクトリがある
    #[error("unknown class directory '{name}' under {root}")]
    UnknownClassDirectory { root: PathBuf, name: String },

    /// 画像が1枚もない
    #[error("no images found under {0}")]
    EmptyDataset(PathBuf),

    /// 事前学習済み重みファイルが存在しない
    #[error("pretrained backbone weights not found: {0}")]
    PretrainedWeightsNotFound(PathBuf),

    /// モデルファイルが存在しない
    #[error("model artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    /// モデルファイルの形式が不正
    #[error("incompatible model artifact {path}: {reason}")]
    ArtifactFormat { path: PathBuf, reason: String },

    /// 保存されたラベル順序が固定ラベルと一致しない
    #[error("label mapping in artifact does not match: expected {expected:?}, found {found:?}")]
    LabelMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// 画像のデコード失敗
    #[error("failed to decode image {path}: {reason}")]
    ImageDecode { path: PathBuf, reason: String },
}
