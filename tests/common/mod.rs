#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use waste_sorter_lib::ml::CLASS_NAMES;
use waste_sorter_lib::model::{AppConfig, DeviceType};

pub type TestBackend = burn::backend::NdArray<f32>;
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

pub const PER_CLASS: usize = 6;

/// クラスごとに色の違う単色画像を書き出す
pub fn write_dataset(root: &Path, per_class: usize) -> PathBuf {
    let data_dir = root.join("dataset");
    for (label, name) in CLASS_NAMES.iter().enumerate() {
        let class_dir = data_dir.join(name);
        fs::create_dir_all(&class_dir).unwrap();
        for i in 0..per_class {
            let shade = (label * 40) as u8;
            let image = RgbImage::from_fn(40, 40, |x, y| {
                Rgb([shade, 255 - shade, ((x + y + i as u32) % 256) as u8])
            });
            image.save(class_dir.join(format!("{}{}.png", name, i))).unwrap();
        }
    }
    data_dir
}

/// NdArray で数秒で終わる小さな設定
pub fn tiny_config(root: &Path, data_dir: PathBuf) -> AppConfig {
    let mut config = AppConfig::default();
    config.device_type = DeviceType::Cpu;
    config.data.data_dir = data_dir;
    config.data.image_size = 32;
    config.data.batch_size = 4;
    config.data.validation_split = 0.34;
    config.model.hidden_units = 8;
    config.model.backbone_channels = [2, 4, 4, 4, 4];
    config.model.pretrained_weights = None;
    config.training.num_epochs = 1;
    config.training.learning_rate = 0.01;
    config.artifact.model_path = root.join("models").join("waste_classifier.tar.gz");
    config.display.output_path = root.join("models").join("predictions.svg");
    config
}
