//! モデル推論機能

use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::tensor::backend::Backend;
use image::DynamicImage;
use serde::Serialize;

use crate::error::WasteSorterError;
use crate::ml::artifact::load_classifier;
use crate::ml::{class_name, image_to_tensor, WasteClassifier};
use crate::model::ModelMetadata;

/// 1枚の画像に対する予測
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub index: usize,
    pub label: &'static str,
    /// 予測クラスの確率
    pub confidence: f32,
    /// 全クラスの確率（インデックス順）
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// 確率ベクトルから予測を作成（同値なら小さいインデックスを優先）
    pub fn from_probabilities(probabilities: Vec<f32>) -> Result<Self> {
        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| anyhow::anyhow!("推論結果が空です"))?;

        let label = class_name(index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", index))?;

        Ok(Self {
            index,
            label,
            confidence,
            probabilities,
        })
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: WasteClassifier<B>,
    metadata: ModelMetadata,
    model_path: PathBuf,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        let (model, metadata) = load_classifier::<B>(&model_path, &device)?;

        Ok(Self {
            model,
            metadata,
            model_path,
            device,
        })
    }

    /// デコード済みの画像を分類
    pub fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        if image.width() == 0 || image.height() == 0 {
            return Err(WasteSorterError::ImageDecode {
                path: self.model_path.clone(),
                reason: "input image has zero size".to_string(),
            }
            .into());
        }

        let tensor = image_to_tensor::<B>(image, self.metadata.image_size, &self.device);
        let probabilities = self
            .model
            .forward(tensor)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        Prediction::from_probabilities(probabilities)
    }

    /// ラベル名だけを返す
    pub fn predict_label(&self, image: &DynamicImage) -> Result<&'static str> {
        Ok(self.predict(image)?.label)
    }

    /// 画像ファイルを読み込んで分類
    pub fn predict_path<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let path = image_path.as_ref();
        let image = image::open(path).map_err(|e| WasteSorterError::ImageDecode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.predict(&image)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// モデルを読み込み、1枚の画像のラベルを返す
pub fn predict<B: Backend>(
    image: &DynamicImage,
    model_path: &Path,
    device: B::Device,
) -> Result<&'static str> {
    InferenceEngine::<B>::load(model_path, device)?.predict_label(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_takes_highest_probability() {
        let prediction =
            Prediction::from_probabilities(vec![0.05, 0.1, 0.6, 0.1, 0.1, 0.05]).unwrap();
        assert_eq!(prediction.index, 2);
        assert_eq!(prediction.label, "metal");
        assert!((prediction.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_prediction_tie_prefers_first_index() {
        let prediction = Prediction::from_probabilities(vec![0.0, 0.5, 0.0, 0.0, 0.5, 0.0]).unwrap();
        assert_eq!(prediction.label, "glass");
    }

    #[test]
    fn test_prediction_rejects_empty_or_out_of_range() {
        assert!(Prediction::from_probabilities(Vec::new()).is_err());
        assert!(Prediction::from_probabilities(vec![0.0; 7].into_iter().chain([1.0]).collect()).is_err());
    }
}
