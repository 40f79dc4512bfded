//! モデルメタデータの定義
//!
//! モデルファイル (tar.gz) に `metadata.json` として保存され、
//! 読み込み時にモデル構造の復元とラベル順序の検証に使われます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// メタデータ形式のバージョン
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// モデルメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// メタデータ形式のバージョン
    pub format_version: u32,

    /// クラスラベル（インデックス順）
    /// 例: ["cardboard", "glass", "metal", "paper", "plastic", "trash"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 分類ヘッドの中間層ユニット数
    pub hidden_units: usize,

    /// ドロップアウト率
    pub dropout: f64,

    /// バックボーンのブロックごとのチャネル数
    pub backbone_channels: [usize; 5],

    /// 事前学習済みバックボーンから学習したか
    #[serde(default)]
    pub pretrained_backbone: bool,

    /// 学習エポック数
    pub num_epochs: usize,

    /// 分割に使ったシード
    pub seed: u64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        class_labels: Vec<String>,
        image_size: usize,
        hidden_units: usize,
        dropout: f64,
        backbone_channels: [usize; 5],
        pretrained_backbone: bool,
        num_epochs: usize,
        seed: u64,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            format_version: METADATA_FORMAT_VERSION,
            class_labels,
            image_size,
            hidden_units,
            dropout,
            backbone_channels,
            pretrained_backbone,
            num_epochs,
            seed,
            trained_at,
        }
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
