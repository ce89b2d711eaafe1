use image::{DynamicImage, GenericImageView, Rgb};
use ort::session::Session;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use raqote::{DrawOptions, DrawTarget, LineJoin, PathBuilder, SolidSource, Source, StrokeStyle};
use std::path::Path;
use std::time::Instant;

use crate::config::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD, DetectorConfig};
use crate::error::Result;
use crate::net::NetDetector;
use crate::vision::bounds::Detection;
use crate::vision::image::{Letterbox, image_to_tensor};
use crate::vision::infer::run_inference;
use crate::vision::model::{load_model, model_class_names};
use crate::vision::posts::process_detections;

/// 目标检测器
///
/// 输入一张图像，输出按置信度降序排列的检测结果，坐标相对原图。
pub trait Detector {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>>;

    /// 类别名，按类别号排列
    fn class_names(&self) -> &[String];
}

/// 基于ONNX Runtime的YOLO检测器
///
/// 封装了完整的检测流程，包括letterbox预处理、模型推理和结果后处理。
///
/// # 示例
///
/// ```no_run
/// use celldet::vision::{Detector, YoloDetector, load_image, load_model};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let model = load_model("best.onnx")?;
/// let mut detector = YoloDetector::new(model, 640, 640)
///     .with_confidence_threshold(0.5)
///     .with_nms_threshold(0.7);
/// let image = load_image("cells.bmp")?;
/// let detections = detector.detect(&image)?;
/// # Ok(())
/// # }
/// ```
pub struct YoloDetector {
    /// ONNX模型会话
    model: Session,
    /// 模型输入宽度
    input_width: usize,
    /// 模型输入高度
    input_height: usize,
    /// 置信度阈值，低于此值的检测结果将被过滤
    confidence_threshold: f32,
    /// NMS（非极大值抑制）阈值，用于去除重复检测
    nms_threshold: f32,
    /// 类别名
    names: Vec<String>,
}

impl YoloDetector {
    /// 创建新的YoloDetector实例
    ///
    /// 类别名优先读取模型元数据。
    pub fn new(model: Session, input_width: usize, input_height: usize) -> Self {
        let names = model_class_names(&model).unwrap_or_default();
        Self {
            model,
            input_width,
            input_height,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            names,
        }
    }

    /// 设置置信度阈值 (0.0 - 1.0)
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// 设置NMS阈值 (0.0 - 1.0)
    pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }

    /// 模型未携带类别名时补充
    pub fn with_class_names(mut self, names: Vec<String>) -> Self {
        if self.names.is_empty() {
            self.names = names;
        }
        self
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let (letterboxed, info) =
            Letterbox::new(self.input_height as u32, self.input_width as u32).apply(img);
        let input_tensor = image_to_tensor(&letterboxed);

        let start_time = Instant::now();
        let output = run_inference(&mut self.model, &input_tensor)?;
        tracing::debug!("模型推理耗时: {:?}", start_time.elapsed());

        Ok(process_detections(
            &output,
            &info,
            &self.names,
            self.confidence_threshold,
            self.nms_threshold,
        ))
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }
}

/// 按权重文件类型创建检测器
///
/// `.onnx` 走ONNX Runtime，其余按检查点加载自有网络。
pub fn build_detector(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    let is_onnx = config
        .weights
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));

    if is_onnx {
        tracing::info!("加载ONNX模型 {:?}", config.weights);
        let model = load_model(&config.weights)?;
        let detector = YoloDetector::new(model, config.imgsz, config.imgsz)
            .with_confidence_threshold(config.confidence_threshold)
            .with_nms_threshold(config.nms_threshold)
            .with_class_names(config.class_names.clone());
        Ok(Box::new(detector))
    } else {
        tracing::info!("加载检查点 {:?}", config.weights);
        let detector = NetDetector::from_checkpoint(Path::new(&config.weights), config.imgsz)?
            .with_confidence_threshold(config.confidence_threshold)
            .with_nms_threshold(config.nms_threshold);
        Ok(Box::new(detector))
    }
}

/// 为每个类别生成固定的随机颜色
pub fn class_colors(num_classes: usize) -> Vec<Rgb<u8>> {
    let mut rng = ChaCha8Rng::seed_from_u64(num_classes as u64);
    (0..num_classes)
        .map(|_| Rgb([rng.gen_range(0..=255), rng.gen_range(0..=255), rng.gen_range(0..=255)]))
        .collect()
}

/// 在图像上绘制检测结果
///
/// 每个类别使用 `colors` 中对应的颜色，缺失时用红色。
pub fn draw_detections(image: &DynamicImage, detections: &[Detection], colors: &[Rgb<u8>]) -> DynamicImage {
    let (img_width, img_height) = image.dimensions();
    let mut dt = DrawTarget::new(img_width as i32, img_height as i32);

    // 将原始图像绘制到DrawTarget上
    let rgba_image = image.to_rgba8();
    let image_data: Vec<u32> = rgba_image
        .chunks(4)
        .map(|pixel| u32::from_le_bytes([pixel[2], pixel[1], pixel[0], pixel[3]]))
        .collect();

    let img = raqote::Image {
        width: img_width as i32,
        height: img_height as i32,
        data: &image_data,
    };

    dt.draw_image_at(0.0, 0.0, &img, &DrawOptions::new());

    for detection in detections {
        let bbox = &detection.bbox;

        let mut pb = PathBuilder::new();
        pb.rect(bbox.x1, bbox.y1, bbox.x2 - bbox.x1, bbox.y2 - bbox.y1);
        let path = pb.finish();

        let Rgb([r, g, b]) = colors.get(detection.class_id).copied().unwrap_or(Rgb([0xFF, 0x00, 0x00]));
        let color = SolidSource { r, g, b, a: 0xFF };

        dt.stroke(
            &path,
            &Source::Solid(color),
            &StrokeStyle {
                join: LineJoin::Round,
                width: 2.0,
                ..StrokeStyle::default()
            },
            &DrawOptions::default(),
        );
    }

    // BGRA to RGBA
    let pixels: Vec<u8> = dt
        .get_data()
        .iter()
        .flat_map(|&pixel| {
            let bytes = pixel.to_le_bytes();
            [bytes[2], bytes[1], bytes[0], bytes[3]]
        })
        .collect();

    match image::RgbaImage::from_raw(img_width, img_height, pixels) {
        Some(buffer) => DynamicImage::ImageRgba8(buffer),
        None => image.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::bounds::BoundingBox;
    use image::Rgba;

    #[test]
    fn class_colors_are_stable() {
        assert_eq!(class_colors(3), class_colors(3));
        assert_eq!(class_colors(3).len(), 3);
    }

    #[test]
    fn draws_box_outline_in_class_color() {
        let image = DynamicImage::new_rgb8(40, 40);
        let detections = vec![Detection::new(
            BoundingBox::new(10.0, 10.0, 30.0, 30.0),
            0,
            "U87".to_string(),
            0.9,
        )];
        let drawn = draw_detections(&image, &detections, &[Rgb([0, 255, 0])]).to_rgba8();
        assert_eq!(drawn.dimensions(), (40, 40));
        assert_eq!(drawn.get_pixel(20, 10), &Rgba([0, 255, 0, 255]));
        assert_eq!(drawn.get_pixel(20, 20), &Rgba([0, 0, 0, 255]));
    }
}
