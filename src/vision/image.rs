use image::{DynamicImage, GenericImageView, Rgb, RgbImage, imageops, imageops::FilterType};
use ndarray::{Array, Array4};
use std::path::Path;

use crate::config::LETTERBOX_COLOR;
use crate::error::{Error, Result};

/// 加载图像文件
///
/// # 参数
/// * `path` - 图像文件路径
///
/// # 错误处理
/// 文件不存在或解码失败时返回Err
pub fn load_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref();
    image::open(path).map_err(|e| Error::image(path, e))
}

/// 保存图像，格式由扩展名决定
pub fn save_image(image: &DynamicImage, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    image.save(path).map_err(|e| Error::image(path, e))
}

/// Letterbox 参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// 目标尺寸 (height, width)
    pub new_shape: (u32, u32),
    /// 为true时只把填充补到stride的整数倍
    pub auto: bool,
    /// 为false时只缩小不放大
    pub scaleup: bool,
    pub stride: u32,
}

impl Letterbox {
    pub fn new(height: u32, width: u32) -> Self {
        Self {
            new_shape: (height, width),
            auto: false,
            scaleup: true,
            stride: 32,
        }
    }

    pub fn with_auto(mut self, stride: u32) -> Self {
        self.auto = true;
        self.stride = stride;
        self
    }

    pub fn with_scaleup(mut self, scaleup: bool) -> Self {
        self.scaleup = scaleup;
        self
    }

    /// 执行缩放与填充
    ///
    /// 保持宽高比缩放后用灰色(114)填充两侧。
    pub fn apply(&self, img: &DynamicImage) -> (RgbImage, LetterboxInfo) {
        let (w, h) = img.dimensions();
        let (new_h, new_w) = self.new_shape;
        let mut r = (new_h as f32 / h as f32).min(new_w as f32 / w as f32);
        if !self.scaleup {
            r = r.min(1.0);
        }

        let unpad_w = (w as f32 * r).round() as u32;
        let unpad_h = (h as f32 * r).round() as u32;
        let mut dw = new_w.saturating_sub(unpad_w) as f32;
        let mut dh = new_h.saturating_sub(unpad_h) as f32;
        if self.auto {
            dw %= self.stride as f32;
            dh %= self.stride as f32;
        }
        dw /= 2.0;
        dh /= 2.0;

        let rgb = img.to_rgb8();
        let resized = if (w, h) != (unpad_w, unpad_h) {
            imageops::resize(&rgb, unpad_w, unpad_h, FilterType::Triangle)
        } else {
            rgb
        };

        let top = (dh - 0.1).round().max(0.0) as u32;
        let bottom = (dh + 0.1).round().max(0.0) as u32;
        let left = (dw - 0.1).round().max(0.0) as u32;
        let right = (dw + 0.1).round().max(0.0) as u32;

        let color = Rgb([LETTERBOX_COLOR; 3]);
        let mut canvas = RgbImage::from_pixel(unpad_w + left + right, unpad_h + top + bottom, color);
        imageops::replace(&mut canvas, &resized, left as i64, top as i64);

        (
            canvas,
            LetterboxInfo {
                ratio: r,
                pad: (left as f32, top as f32),
            },
        )
    }
}

/// Letterbox 变换信息，用于把模型坐标还原到原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
    /// 缩放比例
    pub ratio: f32,
    /// 左侧和上侧的填充 (x, y)
    pub pad: (f32, f32),
}

impl LetterboxInfo {
    /// 将输入空间坐标映射回原图
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad.0) / self.ratio, (y - self.pad.1) / self.ratio)
    }

    /// 将原图坐标映射到输入空间
    pub fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.ratio + self.pad.0, y * self.ratio + self.pad.1)
    }
}

/// 将图像转换为模型输入张量
///
/// 1. 归一化像素值到[0, 1]范围
/// 2. 通道顺序为RGB
/// 3. 维度顺序为NCHW
///
/// # 返回值
/// 返回形状为(1, 3, height, width)的四维张量
pub fn image_to_tensor(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    let mut tensor = Array::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;

        tensor[[0, 0, y, x]] = (r as f32) / 255.0;
        tensor[[0, 1, y, x]] = (g as f32) / 255.0;
        tensor[[0, 2, y, x]] = (b as f32) / 255.0;
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_short_side_to_target() {
        let img = DynamicImage::new_rgb8(200, 100);
        let (out, info) = Letterbox::new(64, 64).apply(&img);
        assert_eq!(out.dimensions(), (64, 64));
        assert!((info.ratio - 0.32).abs() < 1e-6);
        assert_eq!(info.pad, (0.0, 16.0));
        assert_eq!(out.get_pixel(0, 0), &Rgb([LETTERBOX_COLOR; 3]));
        assert_eq!(out.get_pixel(10, 32), &Rgb([0, 0, 0]));
    }

    #[test]
    fn auto_letterbox_pads_to_stride_multiple() {
        let img = DynamicImage::new_rgb8(640, 400);
        let (out, info) = Letterbox::new(640, 640).with_auto(32).apply(&img);
        assert_eq!(out.dimensions(), (640, 416));
        assert_eq!(info.pad, (0.0, 8.0));
    }

    #[test]
    fn unmap_inverts_map() {
        let info = LetterboxInfo {
            ratio: 0.5,
            pad: (4.0, 12.0),
        };
        let (x, y) = info.map(100.0, 40.0);
        assert_eq!(info.unmap(x, y), (100.0, 40.0));
    }

    #[test]
    fn tensor_is_nchw_and_normalized() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([255, 0, 51]));
        let t = image_to_tensor(&img);
        assert_eq!(t.shape(), &[1, 3, 2, 3]);
        assert_eq!(t[[0, 0, 1, 2]], 1.0);
        assert_eq!(t[[0, 1, 1, 2]], 0.0);
        assert!((t[[0, 2, 1, 2]] - 0.2).abs() < 1e-6);
    }
}
