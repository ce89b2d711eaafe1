//! 热力图着色与叠加

use image::{Rgb, RgbImage};
use ndarray::Array2;

/// JET 色表，输入 [0, 1]，输出 RGB 各分量 [0, 1]
pub fn jet(value: f32) -> [f32; 3] {
    let x = value.clamp(0.0, 1.0);
    let channel = |offset: f32| (1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// 将归一化显著图着色后与原图等权叠加
///
/// 结果除以自身最大值后映射回 0-255。`mask` 尺寸需与图像一致，越界部分按0处理。
pub fn show_cam_on_image(image: &RgbImage, mask: &Array2<f32>) -> RgbImage {
    const IMAGE_WEIGHT: f32 = 0.5;

    let (width, height) = image.dimensions();
    let mut blended = Vec::with_capacity((width * height) as usize);
    let mut max_value = 0.0f32;

    for (x, y, pixel) in image.enumerate_pixels() {
        let level = mask.get([y as usize, x as usize]).copied().unwrap_or(0.0);
        // 与 8 位色表一致，先量化
        let heat = jet((level * 255.0).floor() / 255.0);
        let mut out = [0.0f32; 3];
        for c in 0..3 {
            out[c] = heat[c] * (1.0 - IMAGE_WEIGHT) + pixel[c] as f32 / 255.0 * IMAGE_WEIGHT;
            max_value = max_value.max(out[c]);
        }
        blended.push(out);
    }

    let scale = if max_value > 0.0 { 255.0 / max_value } else { 0.0 };
    let mut result = RgbImage::new(width, height);
    for (pixel, out) in result.pixels_mut().zip(blended) {
        *pixel = Rgb(out.map(|v| (v * scale) as u8));
    }
    result
}
