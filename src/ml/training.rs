//! モデル学習
//!
//! SGD（モーメンタム付き）とクロスエントロピーで、決まったエポック数・ステップ数だけ学習し、
//! 各エポックの後に検証を行います。学習が終わったらモデルファイルを1回だけ保存します。
//! 途中のチェックポイントや早期終了はありません。

use std::path::PathBuf;

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ml::artifact::{class_labels, save_classifier};
use crate::ml::batcher::BatchSequence;
use crate::ml::evaluation::evaluate_batches;
use crate::ml::{count_correct, ModelConfig, WasteClassifier};
use crate::model::{resolve_output_path, ModelMetadata, TrainingSettings};

/// 1エポック分の指標
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1始まり
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

/// 学習結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochMetrics>,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
    /// 保存したモデルファイル
    pub artifact_path: PathBuf,
}

/// 学習の入力一式
pub struct TrainingPlan<'a> {
    pub settings: &'a TrainingSettings,
    pub model_config: &'a ModelConfig,
    pub pretrained_backbone: bool,
    pub seed: u64,
    pub model_path: PathBuf,
    pub versioned: bool,
}

/// モデル学習を実行
///
/// 戻り値のモデルは学習済みの重みを持ちます。保存先は `plan.model_path`
/// （`versioned` なら日時付きのファイル名）で、既存のファイルは上書きされます。
pub fn train_model<B: AutodiffBackend>(
    plan: &TrainingPlan<'_>,
    train: &BatchSequence,
    valid: &BatchSequence,
    model: WasteClassifier<B>,
    device: &B::Device,
) -> Result<(WasteClassifier<B>, TrainingReport)> {
    let settings = plan.settings;
    let steps_per_epoch = settings
        .steps_per_epoch
        .unwrap_or_else(|| train.default_steps());
    let validation_steps = settings
        .validation_steps
        .unwrap_or_else(|| valid.default_steps());

    info!("学習を開始します...");
    info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}, モーメンタム: {}",
        settings.num_epochs,
        train.batch_size(),
        settings.learning_rate,
        settings.momentum
    );
    info!(
        "ステップ数: 学習 {} / 検証 {} (学習 {} 枚, 検証 {} 枚)",
        steps_per_epoch,
        validation_steps,
        train.len(),
        valid.len()
    );

    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(settings.momentum)
                .with_dampening(0.0)
                .with_nesterov(false),
        ))
        .init();

    let mut model = model;
    let mut epochs = Vec::with_capacity(settings.num_epochs);

    for epoch in 0..settings.num_epochs {
        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        let mut samples = 0usize;

        for (step, batch) in train.epoch::<B>(epoch, steps_per_epoch, device).enumerate() {
            let batch = batch?;
            let batch_size = batch.len();

            let output = model.forward_classification(batch.images, batch.targets);
            let loss_value: f64 = output.loss.clone().into_scalar().elem();
            correct += count_correct(output.output.clone(), output.targets.clone());
            loss_sum += loss_value * batch_size as f64;
            samples += batch_size;

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(settings.learning_rate, model, grads);

            debug!(
                "  エポック {} ステップ {}/{}: loss = {:.4}",
                epoch + 1,
                step + 1,
                steps_per_epoch,
                loss_value
            );
        }

        let (train_loss, train_accuracy) = if samples == 0 {
            (0.0, 0.0)
        } else {
            (loss_sum / samples as f64, correct as f64 / samples as f64)
        };

        // 検証（ドロップアウトなし、勾配なし）
        let valid_model = model.valid();
        let valid_report = evaluate_batches(
            &valid_model,
            valid.epoch::<B::InnerBackend>(epoch, validation_steps, device),
        )?;

        let metrics = EpochMetrics {
            epoch: epoch + 1,
            train_loss,
            train_accuracy,
            valid_loss: valid_report.loss,
            valid_accuracy: valid_report.accuracy,
        };
        info!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
            metrics.epoch,
            settings.num_epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.valid_loss,
            metrics.valid_accuracy
        );
        epochs.push(metrics);
    }

    let artifact_path = resolve_output_path(&plan.model_path, plan.versioned);
    let metadata = ModelMetadata::new(
        class_labels(),
        plan.model_config.image_size,
        plan.model_config.hidden_units,
        plan.model_config.dropout,
        plan.model_config.backbone.channels,
        plan.pretrained_backbone,
        settings.num_epochs,
        plan.seed,
    );
    save_classifier(&artifact_path, &metadata, &model.valid())?;

    info!("学習完了: {} に保存しました", artifact_path.display());

    Ok((
        model,
        TrainingReport {
            epochs,
            steps_per_epoch,
            validation_steps,
            artifact_path,
        },
    ))
}
