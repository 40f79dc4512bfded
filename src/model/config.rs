//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、データセット、学習パラメータなどをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

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
        DeviceType::Wgpu
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

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSettings {
    /// クラスごとのサブディレクトリを持つデータセットのルート
    pub data_dir: PathBuf,
    /// 検証用に回す割合
    pub validation_split: f64,
    /// 分割・シャッフル用のシード
    pub seed: u64,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// バッチサイズ
    pub batch_size: usize,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/dataset"),
            validation_split: 0.1,
            seed: 0,
            image_size: 150,
            batch_size: 32,
        }
    }
}

/// データ拡張設定（学習データのみに適用）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AugmentationSettings {
    /// せん断角の最大値（度）
    pub shear_range: f32,
    /// 拡大縮小の幅 [1 - zoom, 1 + zoom]
    pub zoom_range: f32,
    /// 水平方向の移動幅（画像幅に対する割合）
    pub width_shift_range: f32,
    /// 垂直方向の移動幅（画像高さに対する割合）
    pub height_shift_range: f32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            shear_range: 0.1,
            zoom_range: 0.1,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            horizontal_flip: true,
            vertical_flip: true,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// 分類ヘッドの中間層ユニット数
    pub hidden_units: usize,
    /// ドロップアウト率
    pub dropout: f64,
    /// VGG16 各ブロックの出力チャネル数
    pub backbone_channels: [usize; 5],
    /// torchvision の vgg16 重み (.pth)。ファイルが無ければエラー。
    /// `null` を明示した場合のみランダム初期化
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            hidden_units: 256,
            dropout: 0.5,
            backbone_channels: [64, 128, 256, 512, 512],
            pretrained_weights: Some(PathBuf::from("models/vgg16.pth")),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// 学習率
    pub learning_rate: f64,
    /// モーメンタム係数
    pub momentum: f64,
    /// 1エポックあたりのステップ数。未指定なら学習データ数 / バッチサイズ
    pub steps_per_epoch: Option<usize>,
    /// 検証ステップ数。未指定なら検証データ数 / バッチサイズ
    pub validation_steps: Option<usize>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            learning_rate: 1e-3,
            momentum: 0.9,
            steps_per_epoch: None,
            validation_steps: None,
        }
    }
}

/// モデルファイルの保存設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactSettings {
    /// モデルファイルのパス (tar.gz)
    pub model_path: PathBuf,
    /// true なら学習ごとに日時付きのファイル名で保存する
    pub versioned: bool,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/waste_classifier.tar.gz"),
            versioned: false,
        }
    }
}

/// 予測結果の可視化設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplaySettings {
    /// 出力するSVGのパス
    pub output_path: PathBuf,
    /// 可視化する検証バッチの番号
    pub batch_index: usize,
    /// 表示する最大枚数
    pub max_images: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("models/predictions.svg"),
            batch_index: 1,
            max_images: 16,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    pub data: DataSettings,
    pub augmentation: AugmentationSettings,
    pub model: ModelSettings,
    pub training: TrainingSettings,
    pub artifact: ArtifactSettings,
    pub display: DisplaySettings,
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

    /// 指定パスから設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
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
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        info!("=== アプリケーション設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("データセット: {}", self.data.data_dir.display());
        info!(
            "検証割合: {}, シード: {}",
            self.data.validation_split, self.data.seed
        );
        info!(
            "画像サイズ: {}x{}, バッチサイズ: {}",
            self.data.image_size, self.data.image_size, self.data.batch_size
        );
        info!(
            "ヘッド: {} ユニット, dropout={}",
            self.model.hidden_units, self.model.dropout
        );
        match &self.model.pretrained_weights {
            Some(path) => info!("事前学習済み重み: {}", path.display()),
            None => info!("事前学習済み重み: なし（ランダム初期化）"),
        }
        info!(
            "エポック数: {}, 学習率: {}, モーメンタム: {}",
            self.training.num_epochs, self.training.learning_rate, self.training.momentum
        );
        info!(
            "モデルパス: {} (versioned={})",
            self.artifact.model_path.display(),
            self.artifact.versioned
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.data.image_size, 150);
        assert_eq!(config.data.batch_size, 32);
        assert_eq!(config.data.seed, 0);
        assert!((config.data.validation_split - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.model.hidden_units, 256);
        assert_eq!(config.training.num_epochs, 10);
        assert!(!config.artifact.versioned);
        assert_eq!(
            config.model.pretrained_weights,
            Some(PathBuf::from("models/vgg16.pth"))
        );
    }

    #[test]
    fn test_random_init_requires_explicit_null() {
        let json = r#"{ "model": { "hidden_units": 8 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(config.model.pretrained_weights.is_some());

        let json = r#"{ "model": { "pretrained_weights": null } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model.pretrained_weights, None);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "data": { "batch_size": 4 }, "device_type": "Cpu" }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.data.batch_size, 4);
        assert_eq!(config.data.image_size, 150);
        assert_eq!(config.training, TrainingSettings::default());
    }

    #[test]
    fn test_load_or_default_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default_from(dir.path().join("nope.json"));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.training.num_epochs = 3;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.training.num_epochs, 3);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
