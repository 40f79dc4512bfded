//! VGG16 畳み込み部
//!
//! 全結合層を持たない VGG16 の特徴抽出部分です。事前学習済み重みは
//! torchvision の `vgg16` state dict (`features.N.weight` / `features.N.bias`) から読み込みます。

use std::path::Path;

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::MaxPool2dConfig,
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::error::WasteSorterError;

/// ブロックごとの畳み込み層数
pub const BLOCK_DEPTHS: [usize; 5] = [2, 2, 3, 3, 3];

/// torchvision の `features` 内での畳み込み層の位置（ReLU と MaxPool を挟むため飛び番）
#[cfg_attr(not(feature = "pretrained"), allow(dead_code))]
const TORCH_CONV_INDICES: [usize; 13] = [0, 2, 5, 7, 10, 12, 14, 17, 19, 21, 24, 26, 28];

/// バックボーン設定
#[derive(Config, Debug)]
pub struct Vgg16Config {
    /// ブロックごとの出力チャネル数
    #[config(default = "[64, 128, 256, 512, 512]")]
    pub channels: [usize; 5],
}

impl Vgg16Config {
    /// 最終ブロックの出力チャネル数
    pub fn out_channels(&self) -> usize {
        self.channels[4]
    }

    /// 入力サイズに対する出力特徴マップの一辺（2x2プーリング5回、切り捨て）
    pub fn output_size(&self, image_size: usize) -> usize {
        BLOCK_DEPTHS.iter().fold(image_size, |size, _| size / 2)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg16Features<B> {
        let mut convs = Vec::with_capacity(BLOCK_DEPTHS.iter().sum());
        let mut in_channels = 3;

        for (block, depth) in BLOCK_DEPTHS.iter().enumerate() {
            let out_channels = self.channels[block];
            for _ in 0..*depth {
                convs.push(
                    Conv2dConfig::new([in_channels, out_channels], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                );
                in_channels = out_channels;
            }
        }

        Vgg16Features { convs }
    }
}

/// VGG16 特徴抽出部
///
/// {Conv 3x3 (padding 1) + ReLU} x N + MaxPool 2x2 を5ブロック。
/// 150x150 入力なら 512 x 4 x 4 を出力します。
#[derive(Module, Debug)]
pub struct Vgg16Features<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

impl<B: Backend> Vgg16Features<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let activation = Relu::new();

        let mut x = images;
        let mut layer = 0;
        for depth in BLOCK_DEPTHS {
            for _ in 0..depth {
                x = activation.forward(self.convs[layer].forward(x));
                layer += 1;
            }
            x = pool.forward(x);
        }
        x
    }

    /// torchvision の vgg16 重みファイル (.pth) を読み込む
    #[cfg(feature = "pretrained")]
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        use burn::record::{FullPrecisionSettings, Recorder};
        use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

        if !path.is_file() {
            return Err(WasteSorterError::PretrainedWeightsNotFound(path.to_path_buf()).into());
        }

        let mut args = LoadArgs::new(path.to_path_buf());
        for (layer, torch_index) in TORCH_CONV_INDICES.iter().enumerate() {
            args = args.with_key_remap(
                &format!(r"^features\.{}\.(.+)$", torch_index),
                &format!("convs.{}.$1", layer),
            );
        }

        let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(args, device)
            .map_err(|e| anyhow::anyhow!("事前学習済み重みの読み込みエラー: {:?}", e))?;

        Ok(self.load_record(record))
    }

    #[cfg(not(feature = "pretrained"))]
    pub fn load_pretrained(self, path: &Path, _device: &B::Device) -> Result<Self> {
        if !path.is_file() {
            return Err(WasteSorterError::PretrainedWeightsNotFound(path.to_path_buf()).into());
        }
        anyhow::bail!(
            "事前学習済み重みを読み込むには `pretrained` フィーチャが必要です: {}",
            path.display()
        )
    }
}
