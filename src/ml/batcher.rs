//! バッチ生成
//!
//! 画像の読み込み・リサイズ・正規化（学習時はデータ拡張も）を行い、
//! `[B, 3, H, W]` の画像テンソル、整数ラベル、one-hot ラベルをまとめます。

use std::sync::{Arc, Mutex};

use anyhow::Result;
use burn::data::dataset::Dataset;
use burn::tensor::{backend::Backend, Int, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::error::WasteSorterError;
use crate::ml::augmentation::Augmenter;
use crate::ml::dataset::{WasteDataset, WasteItem};
use crate::ml::{rescale_image, resize_image, NUM_CLASSES};

/// バッチデータ
#[derive(Clone, Debug)]
pub struct WasteBatch<B: Backend> {
    /// [batch_size, 3, size, size]、値は [0, 1]
    pub images: Tensor<B, 4>,
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
    /// [batch_size, NUM_CLASSES]
    pub one_hot: Tensor<B, 2>,
}

impl<B: Backend> WasteBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// one-hot ベクトルを平坦化して生成
pub fn one_hot(labels: &[usize]) -> Vec<f32> {
    let mut data = vec![0.0f32; labels.len() * NUM_CLASSES];
    for (row, label) in labels.iter().enumerate() {
        data[row * NUM_CLASSES + label] = 1.0;
    }
    data
}

/// バッチャー
///
/// 画像のデコード失敗はそのままエラーとして返します。
#[derive(Clone)]
pub struct WasteBatcher {
    image_size: usize,
    augmenter: Option<Augmenter>,
    rng: Arc<Mutex<StdRng>>,
}

impl WasteBatcher {
    /// データ拡張なし（検証用）
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            augmenter: None,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(0))),
        }
    }

    /// データ拡張あり（学習用）
    pub fn with_augmentation(image_size: usize, augmenter: Augmenter, seed: u64) -> Self {
        Self {
            image_size,
            augmenter: Some(augmenter),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn is_augmenting(&self) -> bool {
        self.augmenter.is_some()
    }

    fn load_item(&self, item: &WasteItem) -> Result<Vec<f32>> {
        let image = image::open(&item.path).map_err(|e| WasteSorterError::ImageDecode {
            path: item.path.clone(),
            reason: e.to_string(),
        })?;
        let mut rgb = resize_image(&image, self.image_size);

        if let Some(augmenter) = &self.augmenter {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| anyhow::anyhow!("augmentation rng lock poisoned"))?;
            rgb = augmenter.augment(&rgb, &mut *rng);
        }

        Ok(rescale_image(&rgb))
    }

    pub fn batch<B: Backend>(&self, items: &[WasteItem], device: &B::Device) -> Result<WasteBatch<B>> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut labels = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&self.load_item(item)?);
            labels.push(item.label);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 3, size, size]);
        let targets_vec: Vec<i64> = labels.iter().map(|&label| label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);
        let one_hot = Tensor::<B, 1>::from_floats(one_hot(&labels).as_slice(), device)
            .reshape([batch_size, NUM_CLASSES]);

        Ok(WasteBatch {
            images,
            targets,
            one_hot,
        })
    }
}

/// 再開可能なバッチ列
///
/// エポックごとにシードを変えてシャッフルし、指定されたステップ数だけバッチを返します。
/// ステップ数が1周分を超える場合は先頭に戻って続けます。
#[derive(Clone)]
pub struct BatchSequence {
    dataset: WasteDataset,
    batcher: WasteBatcher,
    batch_size: usize,
    seed: u64,
    shuffle: bool,
}

impl BatchSequence {
    pub fn new(dataset: WasteDataset, batcher: WasteBatcher, batch_size: usize, seed: u64) -> Self {
        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            seed,
            shuffle: true,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn dataset(&self) -> &WasteDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn image_size(&self) -> usize {
        self.batcher.image_size()
    }

    /// サンプル数
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// 1周分のバッチ数（端数バッチを含む）
    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// 既定のステップ数: サンプル数 / バッチサイズ（切り捨て、空でなければ最低1）
    pub fn default_steps(&self) -> usize {
        match self.len() {
            0 => 0,
            len => (len / self.batch_size).max(1),
        }
    }

    /// エポックごとのサンプル順序
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }
        indices
    }

    /// エポック内の各ステップで使うサンプル番号
    pub fn epoch_plan(&self, epoch: usize, steps: usize) -> Vec<Vec<usize>> {
        let len = self.len();
        if len == 0 {
            return Vec::new();
        }

        let order = self.order(epoch);
        let take = self.batch_size.min(len);
        let mut cursor = 0;
        let mut plan = Vec::with_capacity(steps);
        for _ in 0..steps {
            plan.push((0..take).map(|k| order[(cursor + k) % len]).collect());
            cursor = (cursor + take) % len;
        }
        plan
    }

    fn items(&self, indices: &[usize]) -> Vec<WasteItem> {
        indices
            .iter()
            .filter_map(|&index| self.dataset.get(index))
            .collect()
    }

    /// 最初のエポック順序で `index` 番目のバッチを返す。範囲外なら `None`
    pub fn batch<B: Backend>(&self, index: usize, device: &B::Device) -> Result<Option<WasteBatch<B>>> {
        if index >= self.num_batches() {
            return Ok(None);
        }

        let order = self.order(0);
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(order.len());
        let items = self.items(&order[start..end]);
        self.batcher.batch(&items, device).map(Some)
    }

    /// 全サンプルを1回ずつ（端数バッチを含めて）返す
    pub fn full_pass<'a, B: Backend>(
        &'a self,
        device: &'a B::Device,
    ) -> impl Iterator<Item = Result<WasteBatch<B>>> + 'a {
        (0..self.num_batches()).filter_map(move |index| self.batch(index, device).transpose())
    }

    /// 1エポック分のバッチを遅延生成
    pub fn epoch<'a, B: Backend>(
        &'a self,
        epoch: usize,
        steps: usize,
        device: &'a B::Device,
    ) -> impl Iterator<Item = Result<WasteBatch<B>>> + 'a {
        let plan = self.epoch_plan(epoch, steps);
        debug!(
            "エポック {}: {} ステップ (augment={})",
            epoch,
            plan.len(),
            self.batcher.is_augmenting()
        );
        plan.into_iter()
            .map(move |indices| self.batcher.batch(&self.items(&indices), device))
    }
}
