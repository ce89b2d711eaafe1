//! 细胞裁剪
//!
//! 对每张图像检测一次，收集 Cross 框，再把中心不落在任何 Cross 框内的目标细胞
//! 裁剪保存为 `<output_dir>/<LABEL>/<LABEL>_NNNN.bmp`，编号按类别跨图像递增。

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use image::GenericImageView;

use crate::config::CropConfig;
use crate::dataset::list_files;
use crate::error::{Error, Result};
use crate::vision::bounds::{Detection, PixelBox};
use crate::vision::detect::Detector;
use crate::vision::image::{load_image, save_image};

/// 裁剪结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CropReport {
    pub images: usize,
    /// 按类别统计的输出数量
    pub saved: HashMap<String, usize>,
    /// 中心落在 Cross 框内而排除的目标
    pub excluded: usize,
    /// 截断到图像后为空而跳过的目标
    pub empty: usize,
    pub files: Vec<PathBuf>,
}

impl CropReport {
    pub fn total_saved(&self) -> usize {
        self.saved.values().sum()
    }
}

/// 中心是否落在任一框内（含边界）
pub fn inside_any(center: (i64, i64), boxes: &[PixelBox]) -> bool {
    boxes.iter().any(|b| b.contains(center.0, center.1))
}

/// 从一组检测中选出需要裁剪的目标
///
/// 返回 (标签, 像素框)，保持检测顺序，同时返回被 Cross 排除的数量。
pub fn select_targets(detections: &[Detection], config: &CropConfig) -> (Vec<(String, PixelBox)>, usize) {
    let cross_boxes: Vec<PixelBox> = detections
        .iter()
        .filter(|d| d.class_name == config.cross_label)
        .map(|d| d.bbox.to_pixels())
        .collect();

    let mut excluded = 0;
    let mut targets = Vec::new();
    for detection in detections {
        if !config.target_labels.contains(&detection.class_name) {
            continue;
        }
        let pixels = detection.bbox.to_pixels();
        if inside_any(pixels.center(), &cross_boxes) {
            excluded += 1;
            continue;
        }
        targets.push((detection.class_name.clone(), pixels));
    }
    (targets, excluded)
}

/// 按配置裁剪目录下所有图像
pub fn extract_cells(config: &CropConfig, detector: &mut dyn Detector) -> Result<CropReport> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    for label in &config.target_labels {
        let dir = config.output_dir.join(label);
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        counters.insert(label.clone(), 0);
    }

    let files = list_files(&config.input_dir, &[config.extension.as_str()])?;
    tracing::info!("{:?} 中共 {} 张图像", config.input_dir, files.len());

    let mut report = CropReport::default();
    for path in &files {
        let image = load_image(path)?;
        let detections = detector.detect(&image)?;
        let (targets, excluded) = select_targets(&detections, config);
        report.excluded += excluded;

        let (width, height) = image.dimensions();
        for (label, pixels) in targets {
            let Some((x, y, w, h)) = pixels.clamp_to(width, height) else {
                tracing::warn!("{:?} 中的 {} 框 {:?} 截断后为空，跳过", path, label, pixels);
                report.empty += 1;
                continue;
            };

            let count = counters.entry(label.clone()).or_insert(0);
            *count += 1;
            let save_path = config
                .output_dir
                .join(&label)
                .join(format!("{label}_{:04}.{}", count, config.extension));
            save_image(&image.crop_imm(x, y, w, h), &save_path)?;
            report.files.push(save_path);
        }

        tracing::debug!("{:?}: {} 个检测, 排除 {}", path, detections.len(), excluded);
        report.images += 1;
    }

    report.saved = counters;
    tracing::info!(
        "裁剪完成: {:?}, 排除 {}, 空框 {}",
        report.saved,
        report.excluded,
        report.empty
    );
    Ok(report)
}
