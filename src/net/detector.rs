use std::path::Path;
use std::time::Instant;

use burn::tensor::backend::Backend;
use image::DynamicImage;

use crate::config::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD};
use crate::error::Result;
use crate::net::checkpoint::load_checkpoint;
use crate::net::model::{CellNet, STRIDE};
use crate::net::{InferenceBackend, array_to_tensor, predictions_to_array};
use crate::vision::bounds::Detection;
use crate::vision::detect::Detector;
use crate::vision::image::{Letterbox, image_to_tensor};
use crate::vision::posts::process_detections;

/// 使用自有网络检查点的检测器
pub struct NetDetector {
    net: CellNet<InferenceBackend>,
    device: <InferenceBackend as Backend>::Device,
    /// 输入边长，向上取整到 [`STRIDE`] 的倍数
    imgsz: usize,
    confidence_threshold: f32,
    nms_threshold: f32,
    names: Vec<String>,
}

impl NetDetector {
    pub fn new(net: CellNet<InferenceBackend>, names: Vec<String>, imgsz: usize) -> Self {
        Self {
            net,
            device: Default::default(),
            imgsz: imgsz.max(1).div_ceil(STRIDE) * STRIDE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            names,
        }
    }

    /// 从 `.mpk` 检查点创建
    pub fn from_checkpoint(path: &Path, imgsz: usize) -> Result<Self> {
        let device = Default::default();
        let (net, meta) = load_checkpoint::<InferenceBackend>(path, &device)?;
        Ok(Self::new(net, meta.names, imgsz))
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }
}

impl Detector for NetDetector {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let size = self.imgsz as u32;
        let (letterboxed, info) = Letterbox::new(size, size).apply(img);
        let input = array_to_tensor::<InferenceBackend>(&image_to_tensor(&letterboxed), &self.device);

        let start_time = Instant::now();
        let output = predictions_to_array(self.net.forward(input))?;
        tracing::debug!("网络推理耗时: {:?}", start_time.elapsed());

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
