//! モデル評価
//!
//! 保存済みモデルを読み込み、検証データでの損失と正解率を求めます。

use std::path::Path;

use anyhow::Result;
use burn::tensor::{backend::Backend, ElementConversion};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ml::artifact::load_classifier;
use crate::ml::batcher::{BatchSequence, WasteBatch};
use crate::ml::{count_correct, WasteClassifier};

/// 評価結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// サンプル数で重み付けした平均クロスエントロピー
    pub loss: f64,
    /// top-1 正解率 [0, 1]
    pub accuracy: f64,
    pub samples: usize,
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loss: {:.2}, Accuracy: {:.2}% ({} samples)",
            self.loss,
            self.accuracy * 100.0,
            self.samples
        )
    }
}

/// バッチ列に対して損失と正解率を集計
///
/// バッチが1つもない場合は損失0・正解率0を返します。
pub fn evaluate_batches<B, I>(model: &WasteClassifier<B>, batches: I) -> Result<EvaluationReport>
where
    B: Backend,
    I: IntoIterator<Item = Result<WasteBatch<B>>>,
{
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;
    let mut samples = 0usize;

    for batch in batches {
        let batch = batch?;
        let batch_size = batch.len();
        if batch_size == 0 {
            continue;
        }

        let output = model.forward_classification(batch.images, batch.targets);
        let loss: f64 = output.loss.into_scalar().elem();

        loss_sum += loss * batch_size as f64;
        correct += count_correct(output.output, output.targets);
        samples += batch_size;
    }

    if samples == 0 {
        return Ok(EvaluationReport {
            loss: 0.0,
            accuracy: 0.0,
            samples: 0,
        });
    }

    Ok(EvaluationReport {
        loss: loss_sum / samples as f64,
        accuracy: correct as f64 / samples as f64,
        samples,
    })
}

/// 保存済みモデルを検証データで評価
///
/// `steps` が `None` なら検証データ全体を1回ずつ評価します。
pub fn evaluate_model<B: Backend>(
    model_path: &Path,
    valid: &BatchSequence,
    steps: Option<usize>,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let (model, _) = load_classifier::<B>(model_path, device)?;
    let report = match steps {
        Some(steps) => evaluate_batches(&model, valid.epoch::<B>(0, steps, device))?,
        None => evaluate_batches(&model, valid.full_pass::<B>(device))?,
    };
    info!("{}", report);
    Ok(report)
}
