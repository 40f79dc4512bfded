//! データ拡張
//!
//! 学習データにだけ、ランダムなせん断・拡大縮小・平行移動・反転を適用します。
//! 出力画素ごとに逆写像で元画像の座標を求め、範囲外は端の画素で埋めます。

use image::{imageops, RgbImage};
use rand::Rng;

use crate::model::AugmentationSettings;

/// 1回分の変換パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// せん断角（ラジアン）
    pub shear: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    /// 平行移動（ピクセル）
    pub shift_x: f32,
    pub shift_y: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            shear: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            shift_x: 0.0,
            shift_y: 0.0,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct Augmenter {
    settings: AugmentationSettings,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AugmentationSettings {
        &self.settings
    }

    /// 変換パラメータをサンプリング
    pub fn sample<R: Rng>(&self, width: u32, height: u32, rng: &mut R) -> AffineParams {
        let s = &self.settings;
        AffineParams {
            shear: symmetric(rng, s.shear_range).to_radians(),
            zoom_x: 1.0 + symmetric(rng, s.zoom_range),
            zoom_y: 1.0 + symmetric(rng, s.zoom_range),
            shift_x: symmetric(rng, s.width_shift_range) * width as f32,
            shift_y: symmetric(rng, s.height_shift_range) * height as f32,
            flip_horizontal: s.horizontal_flip && rng.gen_bool(0.5),
            flip_vertical: s.vertical_flip && rng.gen_bool(0.5),
        }
    }

    /// ランダムな変換を1回適用
    pub fn augment<R: Rng>(&self, image: &RgbImage, rng: &mut R) -> RgbImage {
        let params = self.sample(image.width(), image.height(), rng);
        apply(image, &params)
    }
}

/// 変換パラメータを画像に適用
pub fn apply(image: &RgbImage, params: &AffineParams) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mut out = if *params == AffineParams::identity() {
        image.clone()
    } else {
        // 出力座標 -> 入力座標: src = Shear * Zoom * (dst - center) + center + shift
        let (sin, cos) = params.shear.sin_cos();
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;

        RgbImage::from_fn(width, height, |x, y| {
            let u = x as f32 - cx;
            let v = y as f32 - cy;
            let src_x = params.zoom_x * u - sin * params.zoom_y * v + cx + params.shift_x;
            let src_y = cos * params.zoom_y * v + cy + params.shift_y;

            let sx = src_x.round().clamp(0.0, max_x) as u32;
            let sy = src_y.round().clamp(0.0, max_y) as u32;
            *image.get_pixel(sx, sy)
        })
    };

    if params.flip_horizontal {
        imageops::flip_horizontal_in_place(&mut out);
    }
    if params.flip_vertical {
        imageops::flip_vertical_in_place(&mut out);
    }
    out
}
