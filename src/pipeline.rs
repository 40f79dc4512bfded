//! 学習パイプライン
//!
//! データ読み込み -> モデル構築 -> 学習 -> 評価 -> 可視化 を順に実行します。

use anyhow::Result;
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::Serialize;
use tracing::info;

use crate::ml::augmentation::Augmenter;
use crate::ml::backbone::Vgg16Config;
use crate::ml::batcher::{BatchSequence, WasteBatcher};
use crate::ml::dataset::WasteDataset;
use crate::ml::display::display_saved_predictions;
use crate::ml::evaluation::{evaluate_model, EvaluationReport};
use crate::ml::training::{train_model, TrainingPlan, TrainingReport};
use crate::ml::{ModelConfig, WasteClassifier};
use crate::model::AppConfig;

/// 学習用と検証用のバッチ列
pub struct DataPipeline {
    pub train: BatchSequence,
    pub valid: BatchSequence,
}

/// データセットを読み込み、分割してバッチ列を作る
///
/// 学習側だけデータ拡張を行います。
pub fn load_data(config: &AppConfig) -> Result<DataPipeline> {
    let data = &config.data;
    info!("データセットを読み込んでいます: {}", data.data_dir.display());

    let dataset = WasteDataset::from_directory(&data.data_dir)?;
    let (train, valid) = dataset.split(data.validation_split, data.seed)?;

    let train_batcher = WasteBatcher::with_augmentation(
        data.image_size,
        Augmenter::new(config.augmentation.clone()),
        data.seed,
    );
    let valid_batcher = WasteBatcher::new(data.image_size);

    Ok(DataPipeline {
        train: BatchSequence::new(train, train_batcher, data.batch_size, data.seed),
        valid: BatchSequence::new(valid, valid_batcher, data.batch_size, data.seed),
    })
}

/// 設定からモデル設定を作る
pub fn model_config(config: &AppConfig) -> ModelConfig {
    ModelConfig::new()
        .with_image_size(config.data.image_size)
        .with_hidden_units(config.model.hidden_units)
        .with_dropout(config.model.dropout)
        .with_backbone(Vgg16Config::new().with_channels(config.model.backbone_channels))
}

/// 分類モデルを構築
pub fn build_model<B: Backend>(config: &AppConfig, device: &B::Device) -> Result<WasteClassifier<B>> {
    model_config(config).init_with_pretrained(config.model.pretrained_weights.as_deref(), device)
}

/// 学習のみ実行
pub fn train<B: AutodiffBackend>(
    config: &AppConfig,
    data: &DataPipeline,
    device: &B::Device,
) -> Result<(WasteClassifier<B>, TrainingReport)> {
    let model_config = model_config(config);
    let model = build_model::<B>(config, device)?;

    let plan = TrainingPlan {
        settings: &config.training,
        model_config: &model_config,
        pretrained_backbone: config.model.pretrained_weights.is_some(),
        seed: config.data.seed,
        model_path: config.artifact.model_path.clone(),
        versioned: config.artifact.versioned,
    };
    train_model(&plan, &data.train, &data.valid, model, device)
}

/// パイプライン全体の結果
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub training: TrainingReport,
    pub evaluation: EvaluationReport,
    /// SVGに書き出した枚数
    pub displayed: usize,
}

/// 読み込み -> 構築 -> 学習 -> 評価 -> 可視化
pub fn run_pipeline<B: AutodiffBackend>(config: &AppConfig, device: &B::Device) -> Result<PipelineReport> {
    let data = load_data(config)?;
    let (_, training) = train::<B>(config, &data, device)?;

    info!("=== 評価 ===");
    let evaluation = evaluate_model::<B::InnerBackend>(
        &training.artifact_path,
        &data.valid,
        config.training.validation_steps,
        device,
    )?;

    info!("=== 予測結果の可視化 ===");
    let entries = display_saved_predictions::<B::InnerBackend>(
        &training.artifact_path,
        &data.valid,
        &config.display,
        device,
    )?;

    Ok(PipelineReport {
        training,
        evaluation,
        displayed: entries.len(),
    })
}
