//! 予測結果の可視化
//!
//! 検証データの1バッチを予測し、画像と `pred:<予測> / truth:<正解>` を並べたSVGを書き出します。
//! 予測には画像テンソルを入力します（ラベルテンソルではありません）。

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use burn::tensor::backend::Backend;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use tracing::{info, warn};

use crate::ml::artifact::load_classifier;
use crate::ml::batcher::BatchSequence;
use crate::ml::{class_name, WasteClassifier};
use crate::model::DisplaySettings;

const COLUMNS: usize = 4;
const CAPTION_HEIGHT: usize = 24;
const CELL_PADDING: usize = 8;
const COLOR_CORRECT: &str = "#2ecc71";
const COLOR_WRONG: &str = "#e74c3c";
const COLOR_TEXT: &str = "#2c3e50";

/// 1枚分の表示内容
#[derive(Debug, Clone, Serialize)]
pub struct DisplayEntry {
    pub predicted: &'static str,
    pub truth: &'static str,
    #[serde(skip)]
    pub thumbnail: RgbImage,
}

impl DisplayEntry {
    pub fn is_correct(&self) -> bool {
        self.predicted == self.truth
    }

    pub fn caption(&self) -> String {
        format!("pred:{} / truth:{}", self.predicted, self.truth)
    }
}

fn argmax_rows(values: &[f32], columns: usize) -> Vec<usize> {
    values
        .chunks(columns)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

/// [C, H, W] の [0, 1] 値から画像を復元
fn thumbnail(pixels: &[f32], size: usize) -> RgbImage {
    let plane = size * size;
    RgbImage::from_fn(size as u32, size as u32, |x, y| {
        let i = y as usize * size + x as usize;
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgb([
            to_u8(pixels[i]),
            to_u8(pixels[plane + i]),
            to_u8(pixels[2 * plane + i]),
        ])
    })
}

/// 検証データの1バッチを予測して表示内容を作る
///
/// 指定されたバッチ番号が範囲外なら最後のバッチを使います。検証データが空なら空を返します。
pub fn predict_batch<B: Backend>(
    model: &WasteClassifier<B>,
    valid: &BatchSequence,
    batch_index: usize,
    max_images: usize,
    device: &B::Device,
) -> Result<Vec<DisplayEntry>> {
    let num_batches = valid.num_batches();
    if num_batches == 0 {
        warn!("検証データが空のため、可視化をスキップします");
        return Ok(Vec::new());
    }

    let index = if batch_index < num_batches {
        batch_index
    } else {
        warn!(
            "バッチ {} は範囲外です ({} バッチ)。最後のバッチを表示します",
            batch_index, num_batches
        );
        num_batches - 1
    };

    let batch = match valid.batch::<B>(index, device)? {
        Some(batch) => batch,
        None => return Ok(Vec::new()),
    };

    let size = valid.image_size();
    let batch_len = batch.len();
    let count = batch_len.min(max_images);

    let probabilities = model
        .forward(batch.images.clone())
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;
    let truths = batch
        .one_hot
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("ラベルの取得エラー: {:?}", e))?;
    let pixels = batch
        .images
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("画像の取得エラー: {:?}", e))?;

    let num_classes = probabilities.len() / batch_len.max(1);
    let predicted = argmax_rows(&probabilities, num_classes);
    let truth = argmax_rows(&truths, num_classes);
    let per_image = 3 * size * size;

    let entries = (0..count)
        .map(|i| DisplayEntry {
            predicted: class_name(predicted[i]).unwrap_or("unknown"),
            truth: class_name(truth[i]).unwrap_or("unknown"),
            thumbnail: thumbnail(&pixels[i * per_image..(i + 1) * per_image], size),
        })
        .collect();

    Ok(entries)
}

fn png_base64(image: &RgbImage) -> Result<String> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .context("Failed to encode thumbnail as PNG")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&buffer))
}

/// 表示内容をSVGとして組み立てる
pub fn render_svg(entries: &[DisplayEntry], size: usize) -> Result<String> {
    let columns = COLUMNS.min(entries.len().max(1));
    let rows = entries.len().div_ceil(COLUMNS).max(1);
    let cell_width = size + 2 * CELL_PADDING;
    let cell_height = size + CAPTION_HEIGHT + 2 * CELL_PADDING;
    let width = columns * cell_width;
    let height = rows * cell_height;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        width, height, width, height
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        width, height
    ));

    for (i, entry) in entries.iter().enumerate() {
        let x = (i % COLUMNS) * cell_width + CELL_PADDING;
        let y = (i / COLUMNS) * cell_height + CELL_PADDING;
        let color = if entry.is_correct() {
            COLOR_CORRECT
        } else {
            COLOR_WRONG
        };

        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
            x + size / 2,
            y + CAPTION_HEIGHT / 2 + 4,
            COLOR_TEXT,
            entry.caption()
        ));
        svg.push_str(&format!(
            r#"<image x="{}" y="{}" width="{}" height="{}" href="data:image/png;base64,{}"/>"#,
            x,
            y + CAPTION_HEIGHT,
            size,
            size,
            png_base64(&entry.thumbnail)?
        ));
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            x,
            y + CAPTION_HEIGHT,
            size,
            size,
            color
        ));
    }

    svg.push_str("</svg>");
    Ok(svg)
}

/// 検証データの1バッチの予測を可視化してSVGに保存
pub fn display_predictions<B: Backend>(
    model: &WasteClassifier<B>,
    valid: &BatchSequence,
    settings: &DisplaySettings,
    device: &B::Device,
) -> Result<Vec<DisplayEntry>> {
    let entries = predict_batch(model, valid, settings.batch_index, settings.max_images, device)?;
    if entries.is_empty() {
        return Ok(entries);
    }

    for entry in &entries {
        info!("  {}", entry.caption());
    }

    let svg = render_svg(&entries, valid.image_size())?;
    write_svg(&settings.output_path, &svg)?;

    let correct = entries.iter().filter(|e| e.is_correct()).count();
    info!(
        "予測結果を保存しました: {} ({}/{} 正解)",
        settings.output_path.display(),
        correct,
        entries.len()
    );

    Ok(entries)
}

/// 保存済みモデルを読み込んで検証バッチの予測を可視化
pub fn display_saved_predictions<B: Backend>(
    model_path: &Path,
    valid: &BatchSequence,
    settings: &DisplaySettings,
    device: &B::Device,
) -> Result<Vec<DisplayEntry>> {
    let (model, _) = load_classifier::<B>(model_path, device)?;
    display_predictions(&model, valid, settings, device)
}

fn write_svg(path: &Path, svg: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
    }
    fs::write(path, svg).context(format!("Failed to write SVG: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::backbone::Vgg16Config;
    use crate::ml::batcher::WasteBatcher;
    use crate::ml::dataset::{WasteDataset, WasteItem};
    use crate::ml::{ModelConfig, CLASS_NAMES};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn labelled_images(dir: &Path, count: usize) -> BatchSequence {
        let samples = (0..count)
            .map(|i| {
                let path = dir.join(format!("{}.png", i));
                RgbImage::from_pixel(8, 8, Rgb([(i * 30) as u8, 90, 200]))
                    .save(&path)
                    .unwrap();
                WasteItem { path, label: i % 6 }
            })
            .collect();
        BatchSequence::new(WasteDataset::from_samples(samples), WasteBatcher::new(32), 4, 0)
    }

    #[test]
    fn test_argmax_rows() {
        let values = [0.1, 0.7, 0.2, 0.9, 0.05, 0.05];
        assert_eq!(argmax_rows(&values, 3), vec![1, 0]);
    }

    #[test]
    fn test_thumbnail_restores_pixels() {
        // 1x1 画像: R=1.0, G=0.0, B=0.2
        let image = thumbnail(&[1.0, 0.0, 0.2], 1);
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 51]));
    }

    #[test]
    fn test_render_svg_contains_captions() {
        let entries = vec![
            DisplayEntry {
                predicted: "glass",
                truth: "glass",
                thumbnail: RgbImage::new(4, 4),
            },
            DisplayEntry {
                predicted: "paper",
                truth: "trash",
                thumbnail: RgbImage::new(4, 4),
            },
        ];
        let svg = render_svg(&entries, 4).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("pred:glass / truth:glass"));
        assert!(svg.contains("pred:paper / truth:trash"));
        assert!(svg.contains(COLOR_WRONG));
        assert_eq!(svg.matches("data:image/png;base64,").count(), 2);
    }

    #[test]
    fn test_predict_batch_labels_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let valid = labelled_images(dir.path(), 6);
        let device = Default::default();
        let model = ModelConfig::new()
            .with_hidden_units(8)
            .with_image_size(32)
            .with_backbone(Vgg16Config::new().with_channels([2, 4, 4, 4, 4]))
            .init::<TestBackend>(&device);

        // 2番目のバッチは端数の2枚
        let entries = predict_batch(&model, &valid, 1, 16, &device).unwrap();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert!(CLASS_NAMES.contains(&entry.predicted));
            assert!(CLASS_NAMES.contains(&entry.truth));
            assert_eq!(entry.thumbnail.dimensions(), (32, 32));
        }

        let first = predict_batch(&model, &valid, 0, 3, &device).unwrap();
        assert_eq!(first.len(), 3);
    }
}
