//! 热力图生成流程

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};
use ndarray::Axis;

use crate::cam::methods::CamMethod;
use crate::cam::overlay::show_cam_on_image;
use crate::cam::runner::{BackwardType, GradientSource, NetGradients};
use crate::cam::saliency::{normalize, resize_bilinear, saliency_map};
use crate::config::{HeatmapConfig, LETTERBOX_STRIDE};
use crate::error::{Error, Result};
use crate::net::{TargetLayer, TrainBackend, load_checkpoint};
use crate::vision::bounds::{BoundingBox, Detection};
use crate::vision::detect::{class_colors, draw_detections};
use crate::vision::image::{Letterbox, image_to_tensor, load_image};
use crate::vision::posts::best_class;

/// 单个目标层的生成结果
#[derive(Debug, Clone, PartialEq)]
pub struct LayerReport {
    pub layer: String,
    pub output_dir: PathBuf,
    /// 按比例计算出的候选上限
    pub candidates: usize,
    pub written: usize,
    /// 显著图为常数而跳过的候选
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatmapReport {
    pub layers: Vec<LayerReport>,
}

impl HeatmapReport {
    pub fn written(&self) -> usize {
        self.layers.iter().map(|l| l.written).sum()
    }
}

/// 逐候选生成热力图的参数
pub struct CamRenderer<'a> {
    pub method: &'a dyn CamMethod,
    pub backward: BackwardType,
    pub conf_threshold: f32,
    pub ratio: f32,
    /// 非空时在热力图上画出候选框与类别
    pub names: Option<&'a [String]>,
}

impl CamRenderer<'_> {
    /// 参与生成的候选数，向下取整
    pub fn candidate_count(&self, anchors: usize) -> usize {
        (anchors as f64 * self.ratio as f64).floor() as usize
    }

    /// 为 `source` 中得分最高的若干候选生成热力图，写入 `save_dir/{i}.png`
    ///
    /// `image` 为送入网络的预处理图像。
    pub fn render<S: GradientSource>(&self, source: &mut S, image: &RgbImage, save_dir: &Path) -> Result<LayerReport> {
        let predictions = source.predictions().clone();
        let anchors = predictions.nrows();
        let candidates = self.candidate_count(anchors);
        if candidates == 0 {
            tracing::warn!("候选数 {} 乘以比例 {} 向下取整为0，不生成热力图", anchors, self.ratio);
        }

        let mut order: Vec<(usize, f32)> = predictions
            .axis_iter(Axis(0))
            .map(|row| best_class(row).1)
            .enumerate()
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1));

        let colors = self.names.map(|names| class_colors(names.len()));
        let (width, height) = image.dimensions();
        let mut written = 0;
        let mut skipped = 0;

        for (i, &(anchor, score)) in order.iter().take(candidates).enumerate() {
            if score < self.conf_threshold {
                break;
            }

            let gradients = source.gradients(anchor, self.backward)?;
            let activations = source.activations();
            let weights = self.method.weights(activations, &gradients);
            let map = saliency_map(&weights, activations)?;
            let map = resize_bilinear(&map, width as usize, height as usize);
            let Some(mask) = normalize(&map) else {
                tracing::debug!("候选 {} 的显著图为常数，跳过", i);
                skipped += 1;
                continue;
            };

            let mut cam = DynamicImage::ImageRgb8(show_cam_on_image(image, &mask));
            if let (Some(names), Some(colors)) = (self.names, colors.as_deref()) {
                let row = predictions.row(anchor);
                let (class_id, confidence) = best_class(row);
                let name = names.get(class_id).cloned().unwrap_or_else(|| format!("class{class_id}"));
                let bbox = BoundingBox::from_xywh(row[0], row[1], row[2], row[3]);
                cam = draw_detections(&cam, &[Detection::new(bbox, class_id, name, confidence)], colors);
            }

            let path = save_dir.join(format!("{i}.png"));
            cam.save(&path).map_err(|e| Error::image(&path, e))?;
            written += 1;
        }

        Ok(LayerReport {
            layer: String::new(),
            output_dir: save_dir.to_path_buf(),
            candidates,
            written,
            skipped,
        })
    }
}

/// 清空并重建输出目录
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
}

/// 按配置对每个目标层生成热力图
///
/// 每层写入 `output_dir/<层名>/`，该子目录会先被清空。
pub fn run_heatmap(config: &HeatmapConfig) -> Result<HeatmapReport> {
    if !(0.0..=1.0).contains(&config.ratio) {
        return Err(Error::InvalidConfig {
            field: "heatmap.ratio",
            reason: format!("{} 不在 [0, 1] 内", config.ratio),
        });
    }
    if !config.conf_threshold.is_finite() {
        return Err(Error::InvalidConfig {
            field: "heatmap.conf_threshold",
            reason: format!("{} 不是有限数", config.conf_threshold),
        });
    }
    let layers = config
        .layers
        .iter()
        .map(|name| name.parse::<TargetLayer>())
        .collect::<Result<Vec<_>>>()?;

    let device = Default::default();
    let (net, meta) = load_checkpoint::<TrainBackend>(&config.weights, &device)?;

    let image = load_image(&config.image)?;
    let stride = LETTERBOX_STRIDE as usize;
    let size = (config.imgsz.max(1).div_ceil(stride) * stride) as u32;
    let (letterboxed, _) = Letterbox::new(size, size).with_auto(LETTERBOX_STRIDE).apply(&image);
    let input = image_to_tensor(&letterboxed);

    let method = config.method.build();
    let renderer = CamRenderer {
        method: method.as_ref(),
        backward: config.backward_type,
        conf_threshold: config.conf_threshold,
        ratio: config.ratio,
        names: config.draw_boxes.then_some(meta.names.as_slice()),
    };

    fs::create_dir_all(&config.output_dir).map_err(|e| Error::io(&config.output_dir, e))?;

    let mut report = HeatmapReport::default();
    for layer in layers {
        let save_dir = config.output_dir.join(layer.name());
        reset_dir(&save_dir)?;

        let mut source = NetGradients::new(net.clone(), layer, &input)?;
        let mut layer_report = renderer.render(&mut source, &letterboxed, &save_dir)?;
        layer_report.layer = layer.name().to_string();

        tracing::info!(
            "{} 层 {}: 写出 {} 张，跳过 {} 张 -> {:?}",
            config.method,
            layer,
            layer_report.written,
            layer_report.skipped,
            save_dir
        );
        report.layers.push(layer_report);
    }

    Ok(report)
}
