//! 分類モデルとモデルファイルの相互変換
//!
//! 重みは `BinBytesRecorder`（f32精度）でバイト列にし、メタデータと一緒に tar.gz に格納します。

use std::path::Path;

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::error::WasteSorterError;
use crate::ml::backbone::Vgg16Config;
use crate::ml::{ModelConfig, WasteClassifier, CLASS_NAMES, NUM_CLASSES};
use crate::model::{load_model_with_metadata, save_model_with_metadata, ModelMetadata};

/// 固定ラベル順序
pub fn class_labels() -> Vec<String> {
    CLASS_NAMES.iter().map(|s| s.to_string()).collect()
}

/// メタデータから学習時と同じモデル設定を復元
pub fn model_config_from_metadata(metadata: &ModelMetadata) -> ModelConfig {
    ModelConfig::new()
        .with_num_classes(metadata.class_labels.len())
        .with_hidden_units(metadata.hidden_units)
        .with_dropout(metadata.dropout)
        .with_image_size(metadata.image_size)
        .with_backbone(Vgg16Config::new().with_channels(metadata.backbone_channels))
}

/// 保存されたラベル順序が固定ラベルと一致するか検証
pub fn check_labels(metadata: &ModelMetadata) -> Result<()> {
    let expected = class_labels();
    if metadata.class_labels != expected || metadata.class_labels.len() != NUM_CLASSES {
        return Err(WasteSorterError::LabelMismatch {
            expected,
            found: metadata.class_labels.clone(),
        }
        .into());
    }
    Ok(())
}

/// モデルをファイルに保存（既存ファイルは置き換え）
pub fn save_classifier<B: Backend>(
    path: &Path,
    metadata: &ModelMetadata,
    model: &WasteClassifier<B>,
) -> Result<()> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = recorder
        .record(model.clone().into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))?;

    save_model_with_metadata(path, metadata, &model_binary)
}

/// モデルファイルから分類モデルを復元
pub fn load_classifier<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(WasteClassifier<B>, ModelMetadata)> {
    let (metadata, model_binary) = load_model_with_metadata(path)?;
    check_labels(&metadata)?;

    let config = model_config_from_metadata(&metadata);
    config.validate().map_err(|e| WasteSorterError::ArtifactFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(model_binary, device)
        .map_err(|e| WasteSorterError::ArtifactFormat {
            path: path.to_path_buf(),
            reason: format!("{:?}", e),
        })?;

    let model = config.init::<B>(device).load_record(record);
    Ok((model, metadata))
}
