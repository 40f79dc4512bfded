//! データセット読み込みと学習/検証分割
//!
//! ディレクトリ構成:
//! ```text
//! data_dir/
//! ├── cardboard/
//! │   ├── cardboard1.jpg
//! │   └── ...
//! ├── glass/
//! ├── metal/
//! ├── paper/
//! ├── plastic/
//! └── trash/
//! ```
//! クラスIDは `CLASS_NAMES` の順序で割り当てるため、学習と推論で常に一致します。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::error::WasteSorterError;
use crate::ml::{CLASS_NAMES, NUM_CLASSES};

/// 読み込む画像の拡張子
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WasteItem {
    pub path: PathBuf,
    pub label: usize,
}

/// 学習データセット
#[derive(Clone, Debug, Default)]
pub struct WasteDataset {
    samples: Vec<WasteItem>,
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

impl WasteDataset {
    /// ディレクトリから学習データを読み込む
    ///
    /// 6クラスすべてのディレクトリが必要です。未知のディレクトリがある場合もエラーにします
    /// （クラスIDのずれを防ぐため）。
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        if !data_dir.is_dir() {
            return Err(WasteSorterError::DatasetNotFound(data_dir.to_path_buf()).into());
        }

        for entry in fs::read_dir(data_dir)
            .with_context(|| format!("Failed to read dataset directory: {}", data_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if !CLASS_NAMES.contains(&name.as_str()) {
                return Err(WasteSorterError::UnknownClassDirectory {
                    root: data_dir.to_path_buf(),
                    name,
                }
                .into());
            }
        }

        let mut samples = Vec::new();
        for (label, class_name) in CLASS_NAMES.iter().enumerate() {
            let class_dir = data_dir.join(class_name);
            if !class_dir.is_dir() {
                return Err(WasteSorterError::MissingClassDirectory {
                    root: data_dir.to_path_buf(),
                    label: class_name.to_string(),
                }
                .into());
            }

            let mut paths: Vec<PathBuf> = fs::read_dir(&class_dir)
                .with_context(|| format!("Failed to read class directory: {}", class_dir.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            paths.sort();

            info!("  クラス {}: {} ({} 枚)", label, class_name, paths.len());
            samples.extend(paths.into_iter().map(|path| WasteItem { path, label }));
        }

        if samples.is_empty() {
            return Err(WasteSorterError::EmptyDataset(data_dir.to_path_buf()).into());
        }

        info!("{} 枚の画像を {} クラスから読み込みました", samples.len(), NUM_CLASSES);

        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<WasteItem>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[WasteItem] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// クラスごとの枚数
    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for item in &self.samples {
            counts[item.label] += 1;
        }
        counts
    }

    /// データセットを学習用と検証用に分割
    ///
    /// クラスごとにシャッフルし、先頭 `floor(n * validation_split)` 枚を検証用にします。
    /// 同じシードなら同じ分割になります。
    pub fn split(self, validation_split: f64, seed: u64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&validation_split) {
            anyhow::bail!(
                "validation_split は [0, 1) の範囲で指定してください: {}",
                validation_split
            );
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut valid = Vec::new();

        for label in 0..NUM_CLASSES {
            let mut class_samples: Vec<WasteItem> = self
                .samples
                .iter()
                .filter(|item| item.label == label)
                .cloned()
                .collect();
            class_samples.shuffle(&mut rng);

            let num_valid = (class_samples.len() as f64 * validation_split) as usize;
            let rest = class_samples.split_off(num_valid);
            valid.extend(class_samples);
            train.extend(rest);
        }

        info!("学習データ: {} 枚, 検証データ: {} 枚", train.len(), valid.len());

        Ok((Self { samples: train }, Self { samples: valid }))
    }
}

impl Dataset<WasteItem> for WasteDataset {
    fn get(&self, index: usize) -> Option<WasteItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn synthetic(per_class: usize) -> WasteDataset {
        let samples = (0..NUM_CLASSES)
            .flat_map(|label| {
                (0..per_class).map(move |i| WasteItem {
                    path: PathBuf::from(format!("{}/{}.jpg", CLASS_NAMES[label], i)),
                    label,
                })
            })
            .collect();
        WasteDataset::from_samples(samples)
    }

    #[test]
    fn test_split_is_disjoint_and_complete() {
        let dataset = synthetic(25);
        let all: HashSet<WasteItem> = dataset.samples().iter().cloned().collect();

        let (train, valid) = dataset.split(0.1, 0).unwrap();
        let train_set: HashSet<WasteItem> = train.samples().iter().cloned().collect();
        let valid_set: HashSet<WasteItem> = valid.samples().iter().cloned().collect();

        assert!(train_set.is_disjoint(&valid_set));
        let union: HashSet<WasteItem> = train_set.union(&valid_set).cloned().collect();
        assert_eq!(union, all);
        assert_eq!(valid.len(), 6 * 2);
        assert_eq!(train.len(), 6 * 23);
    }

    #[test]
    fn test_split_is_reproducible() {
        let (_, a) = synthetic(30).split(0.1, 7).unwrap();
        let (_, b) = synthetic(30).split(0.1, 7).unwrap();
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn test_split_with_small_classes_leaves_validation_empty() {
        let (train, valid) = synthetic(1).split(0.1, 0).unwrap();
        assert_eq!(train.len(), 6);
        assert!(valid.is_empty());
    }

    #[test]
    fn test_split_rejects_invalid_fraction() {
        assert!(synthetic(2).split(1.0, 0).is_err());
        assert!(synthetic(2).split(-0.1, 0).is_err());
    }

    #[test]
    fn test_class_counts() {
        let counts = synthetic(3).class_counts();
        assert_eq!(counts, [3; NUM_CLASSES]);
    }

    #[test]
    fn test_missing_directory_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let err = WasteDataset::from_directory(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WasteSorterError>(),
            Some(WasteSorterError::DatasetNotFound(_))
        ));
    }
}
