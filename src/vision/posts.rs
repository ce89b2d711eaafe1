//! 后处理模块
//!
//! 负责处理模型输出，进行坐标转换、置信度过滤和非极大值抑制(NMS)等后处理操作。

use ndarray::{Array2, ArrayView1, Axis};

use crate::vision::bounds::{BoundingBox, Detection};
use crate::vision::image::LetterboxInfo;

/// 取一行预测中得分最高的类别
///
/// 行格式为 `[cx, cy, w, h, class scores...]`。
pub fn best_class(row: ArrayView1<'_, f32>) -> (usize, f32) {
    row.iter()
        .skip(4)
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, score)| {
            if score > best.1 { (i, score) } else { best }
        })
}

/// 处理模型输出，应用置信度和NMS阈值
///
/// # 参数
/// * `output` - 模型输出，形状为(num_anchors, 4 + num_classes)
/// * `letterbox` - 预处理时的缩放信息，用于还原到原图坐标
/// * `names` - 类别名，缺失的类别用 `class{id}` 表示
/// * `confidence_threshold` - 置信度阈值
/// * `nms_threshold` - NMS阈值
///
/// # 返回值
/// 按置信度降序排列的检测结果
pub fn process_detections(
    output: &Array2<f32>,
    letterbox: &LetterboxInfo,
    names: &[String],
    confidence_threshold: f32,
    nms_threshold: f32,
) -> Vec<Detection> {
    let mut detections = Vec::with_capacity(output.len_of(Axis(0)));

    for row in output.axis_iter(Axis(0)) {
        let (class_id, confidence) = best_class(row);
        if confidence < confidence_threshold {
            continue;
        }

        let bbox = BoundingBox::from_xywh(row[0], row[1], row[2], row[3]);
        let (x1, y1) = letterbox.unmap(bbox.x1, bbox.y1);
        let (x2, y2) = letterbox.unmap(bbox.x2, bbox.y2);

        let class_name = names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{class_id}"));

        detections.push(Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            class_id,
            class_name,
            confidence,
        });
    }

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    apply_nms(detections, nms_threshold)
}

/// 应用非极大值抑制
///
/// 同类别中与更高置信度框重叠度超过阈值的框被去除。输入需已按置信度降序排列。
pub fn apply_nms(detections: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    let mut result: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        if !detections[i].bbox.is_valid() {
            suppressed[i] = true;
            continue;
        }

        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[j].class_id != detections[i].class_id {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) >= nms_threshold {
                suppressed[j] = true;
            }
        }
        result.push(detections[i].clone());
    }

    result
}
