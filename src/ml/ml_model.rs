//! 機械学習モデルの共通定義
//!
//! 固定の6クラス、VGG16 バックボーンと分類ヘッドからなる分類モデル、
//! 画像を入力テンソル用に整える関数を提供します。

use std::path::Path;

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, ElementConversion, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use tracing::{info, warn};

use crate::ml::backbone::{Vgg16Config, Vgg16Features};

/// クラス数
pub const NUM_CLASSES: usize = 6;

/// 画像サイズ
pub const IMAGE_SIZE: usize = 150;

/// 画素値を [0, 1] に収める係数
pub const RESCALE: f32 = 1.0 / 255.0;

/// クラス名の定義（インデックス順）
pub const CLASS_NAMES: [&str; NUM_CLASSES] =
    ["cardboard", "glass", "metal", "paper", "plastic", "trash"];

/// クラス名からインデックスを取得
pub fn class_index(label: &str) -> Option<usize> {
    CLASS_NAMES.iter().position(|name| *name == label)
}

/// インデックスからクラス名を取得
pub fn class_name(index: usize) -> Option<&'static str> {
    CLASS_NAMES.get(index).copied()
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 6)]
    pub num_classes: usize,
    /// 分類ヘッドの中間層ユニット数
    #[config(default = 256)]
    pub hidden_units: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 150)]
    pub image_size: usize,
    /// バックボーン設定
    #[config(default = "Vgg16Config::new()")]
    pub backbone: Vgg16Config,
}

impl ModelConfig {
    /// 入力サイズとヘッドの形が成立するか検証
    pub fn validate(&self) -> Result<()> {
        if self.backbone.output_size(self.image_size) == 0 {
            anyhow::bail!(
                "入力サイズが小さすぎます: {} (最小32x32が必要)",
                self.image_size
            );
        }
        if self.num_classes == 0 || self.hidden_units == 0 {
            anyhow::bail!("クラス数とユニット数は1以上である必要があります");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("ドロップアウト率は [0, 1) の範囲で指定してください: {}", self.dropout);
        }
        Ok(())
    }

    /// Flatten 後の特徴次元
    pub fn feature_dim(&self) -> usize {
        let size = self.backbone.output_size(self.image_size);
        self.backbone.out_channels() * size * size
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> WasteClassifier<B> {
        let d = self.feature_dim();
        if d == 0 {
            panic!("入力サイズが小さすぎます: {}", self.image_size);
        }

        WasteClassifier {
            backbone: self.backbone.init(device),
            fc1: LinearConfig::new(d, self.hidden_units).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// モデルを初期化し、バックボーンに事前学習済み重みを読み込む
    ///
    /// `pretrained` が `None` の場合だけランダム初期化のまま返します。
    /// 指定されたファイルが無ければ `PretrainedWeightsNotFound` です。
    pub fn init_with_pretrained<B: Backend>(
        &self,
        pretrained: Option<&Path>,
        device: &B::Device,
    ) -> Result<WasteClassifier<B>> {
        self.validate()?;

        let d = self.feature_dim();
        info!(
            "[Model] 入力: {}x{}, 特徴次元: {}, FC1: {} -> {}, FC2: {} -> {}",
            self.image_size, self.image_size, d, d, self.hidden_units, self.hidden_units, self.num_classes
        );

        let model = self.init::<B>(device);
        match pretrained {
            Some(path) => {
                let backbone = model.backbone.clone().load_pretrained(path, device)?;
                info!("[Model] 事前学習済みバックボーンを読み込みました: {}", path.display());
                Ok(model.with_backbone(backbone))
            }
            None => {
                warn!("[Model] 事前学習済み重みを使いません。バックボーンはランダム初期化です");
                Ok(model)
            }
        }
    }
}

/// ゴミ画像分類モデル
///
/// # アーキテクチャ
/// - VGG16 畳み込み部（全結合層なし）
/// - Flatten
/// - FC: d -> hidden + ReLU
/// - Dropout（学習時のみ）
/// - FC: hidden -> num_classes
/// - Softmax (`forward` のみ)
///
/// バックボーンとヘッドはどちらも学習対象です。
#[derive(Module, Debug)]
pub struct WasteClassifier<B: Backend> {
    backbone: Vgg16Features<B>,
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> WasteClassifier<B> {
    /// バックボーンを差し替える
    pub fn with_backbone(mut self, backbone: Vgg16Features<B>) -> Self {
        self.backbone = backbone;
        self
    }

    /// ロジットを計算
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.backbone.forward(images);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]（各行の和は1）
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(images), 1)
    }

    /// 順伝播と損失計算
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward_logits(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 最大スコアのクラスが正解と一致した数
pub fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = output.dims();
    let predictions = output.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// 画像を正方形にリサイズ
///
/// 学習・検証・推論で同じ補間方法を使います。
pub fn resize_image(image: &DynamicImage, size: usize) -> RgbImage {
    image
        .resize_exact(size as u32, size as u32, FilterType::Nearest)
        .to_rgb8()
}

/// RGB画像を [0, 1] に正規化し (C, H, W) の順で平坦化
pub fn rescale_image(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(3 * width as usize * height as usize);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let pixel = image.get_pixel(x, y);
                data.push(pixel[channel] as f32 * RESCALE);
            }
        }
    }

    data
}

/// 1枚の画像を入力テンソル [1, 3, size, size] に変換
pub fn image_to_tensor<B: Backend>(
    image: &DynamicImage,
    size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let data = rescale_image(&resize_image(image, size));
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([1, 3, size, size])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> ModelConfig {
        ModelConfig::new()
            .with_hidden_units(8)
            .with_image_size(32)
            .with_backbone(Vgg16Config::new().with_channels([2, 4, 4, 4, 4]))
    }

    #[test]
    fn test_label_mapping_is_bijective() {
        for (index, name) in CLASS_NAMES.iter().enumerate() {
            assert_eq!(class_index(name), Some(index));
            assert_eq!(class_name(index), Some(*name));
        }
        assert_eq!(class_index("styrofoam"), None);
        assert_eq!(class_name(NUM_CLASSES), None);
    }

    #[test]
    fn test_default_feature_dim_matches_vgg16() {
        let config = ModelConfig::new();
        assert_eq!(config.feature_dim(), 512 * 4 * 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_input() {
        let config = ModelConfig::new().with_image_size(16);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_forward_returns_probabilities() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);

        let probs = model.forward(images);
        assert_eq!(probs.dims(), [2, NUM_CLASSES]);

        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_rescale_image_is_channel_major() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 51]));

        let data = rescale_image(&image);
        assert_eq!(data.len(), 6);
        assert_eq!(data[0], 1.0);
        assert_eq!(data[1], 0.0);
        assert_eq!(data[3], 1.0);
        assert!((data[5] - 0.2).abs() < 1e-6);
    }
}
