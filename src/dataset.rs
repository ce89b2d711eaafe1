//! 数据集描述、标签读取与批处理
//!
//! 目录约定：
//! - 图像：`<root>/images/{train,val}/xxx.bmp`
//! - 标签：`<root>/labels/{train,val}/xxx.txt`，每行 `class cx cy w h`，坐标相对图像归一化

use std::fs;
use std::path::{Component, Path, PathBuf};

use burn::tensor::{Tensor, TensorData, backend::Backend};
use image::GenericImageView;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::net::{STRIDE, array_to_tensor};
use crate::vision::image::{Letterbox, image_to_tensor, load_image};

/// 训练时识别的图像扩展名
pub const IMAGE_EXTENSIONS: [&str; 6] = ["bmp", "png", "jpg", "jpeg", "tif", "tiff"];

/// 数据集描述文件（`data.toml`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// 数据集根目录，相对路径按描述文件所在目录解析
    pub path: PathBuf,
    pub train: PathBuf,
    pub val: PathBuf,
    /// 类别名，按类别号排列
    pub names: Vec<String>,
}

impl DatasetDescriptor {
    /// 以 `root` 为根的标准划分
    pub fn new(root: impl Into<PathBuf>, names: Vec<String>) -> Self {
        Self {
            path: root.into(),
            train: PathBuf::from("images/train"),
            val: PathBuf::from("images/val"),
            names,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut descriptor: Self = toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

        if descriptor.path.is_relative() {
            let base = path.parent().unwrap_or(Path::new(""));
            descriptor.path = base.join(&descriptor.path);
        }
        if descriptor.names.is_empty() {
            return Err(Error::InvalidConfig {
                field: "names",
                reason: format!("{path:?} 中没有类别名"),
            });
        }
        Ok(descriptor)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig {
            field: "dataset",
            reason: e.to_string(),
        })?;
        fs::write(path, text).map_err(|e| Error::io(path, e))
    }

    pub fn train_dir(&self) -> PathBuf {
        self.path.join(&self.train)
    }

    pub fn val_dir(&self) -> PathBuf {
        self.path.join(&self.val)
    }
}

/// 一个标注框，坐标相对图像归一化
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelBox {
    pub class_id: usize,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

/// 解析标签文本，空行忽略
pub fn parse_labels(text: &str, path: &Path) -> Result<Vec<LabelBox>> {
    let mut boxes = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let label_error = |reason: String| Error::Label {
            path: path.to_path_buf(),
            line: i + 1,
            reason,
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(label_error(format!("需要5个字段，实际 {}", fields.len())));
        }
        let class_id = fields[0]
            .parse::<usize>()
            .map_err(|e| label_error(format!("类别号 `{}`: {e}", fields[0])))?;
        let mut coords = [0.0f32; 4];
        for (slot, field) in coords.iter_mut().zip(&fields[1..]) {
            *slot = field
                .parse::<f32>()
                .map_err(|e| label_error(format!("坐标 `{field}`: {e}")))?;
        }
        let [cx, cy, w, h] = coords;
        boxes.push(LabelBox { class_id, cx, cy, w, h });
    }
    Ok(boxes)
}

/// 图像对应的标签路径：最后一个 `images` 目录换成 `labels`，扩展名换成 `.txt`
pub fn label_path_for(image: &Path) -> PathBuf {
    let components: Vec<Component> = image.components().collect();
    let swap_at = components
        .iter()
        .rposition(|c| c.as_os_str() == "images");

    let mut path = PathBuf::new();
    for (i, component) in components.iter().enumerate() {
        if Some(i) == swap_at {
            path.push("labels");
        } else {
            path.push(component.as_os_str());
        }
    }
    path.set_extension("txt");
    path
}

/// 读取图像的标注，没有标签文件视为背景图
pub fn read_labels(image: &Path) -> Result<Vec<LabelBox>> {
    let path = label_path_for(image);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    parse_labels(&text, &path)
}

/// 列出目录下指定扩展名的文件，按文件名排序
pub fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        let matched = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if matched {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// 一张训练图像及其标注
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: PathBuf,
    pub labels: Vec<LabelBox>,
}

/// 目录中的全部样本
#[derive(Debug, Clone, Default)]
pub struct DetectionDataset {
    pub samples: Vec<Sample>,
}

impl DetectionDataset {
    /// 读取 `images_dir` 下的图像与对应标签
    ///
    /// 类别号不小于 `num_classes` 的标注视为错误。
    pub fn from_dir(images_dir: &Path, num_classes: usize) -> Result<Self> {
        let mut samples = Vec::new();
        for image in list_files(images_dir, &IMAGE_EXTENSIONS)? {
            let labels = read_labels(&image)?;
            if let Some(bad) = labels.iter().find(|b| b.class_id >= num_classes) {
                return Err(Error::Label {
                    path: label_path_for(&image),
                    line: 0,
                    reason: format!("类别号 {} 超出类别数 {}", bad.class_id, num_classes),
                });
            }
            samples.push(Sample { image, labels });
        }
        tracing::debug!("{:?}: {} 张图像", images_dir, samples.len());
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// 网络输入与逐网格目标
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    /// `[B, 3, S, S]`
    pub images: Tensor<B, 4>,
    /// `[B, nc, A]`，中心所在网格处对应类别为1
    pub target_scores: Tensor<B, 3>,
    /// `[B, 4, A]`，相对输入尺寸归一化的 `cx, cy, w, h`
    pub target_boxes: Tensor<B, 3>,
    /// `[B, 4, A]`，有目标的网格为1
    pub box_mask: Tensor<B, 3>,
}

/// 把标注分配到中心所在的网格
///
/// 坐标为输入空间像素，同一网格后出现的框覆盖先出现的。
/// 返回 (scores `[nc * A]`, boxes `[4 * A]`, mask `[4 * A]`)，按通道优先排列。
pub fn assign_targets_to_grid(
    boxes: &[(usize, [f32; 4])],
    num_classes: usize,
    input_size: usize,
) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let grid = input_size / STRIDE;
    let anchors = grid * grid;
    let mut scores = vec![0.0f32; num_classes * anchors];
    let mut targets = vec![0.0f32; 4 * anchors];
    let mut mask = vec![0.0f32; 4 * anchors];
    if grid == 0 {
        return (scores, targets, mask);
    }

    let max_cell = (grid - 1) as f32;
    let size = input_size as f32;
    for &(class_id, [cx, cy, w, h]) in boxes {
        let gx = (cx / STRIDE as f32).clamp(0.0, max_cell) as usize;
        let gy = (cy / STRIDE as f32).clamp(0.0, max_cell) as usize;
        let idx = gy * grid + gx;

        for c in 0..num_classes {
            scores[c * anchors + idx] = if c == class_id { 1.0 } else { 0.0 };
        }
        for (c, value) in [cx, cy, w, h].into_iter().enumerate() {
            targets[c * anchors + idx] = value / size;
            mask[c * anchors + idx] = 1.0;
        }
    }

    (scores, targets, mask)
}

/// 读取一批样本：letterbox 到 `input_size` 正方形并生成目标
pub fn collate<B: Backend>(
    samples: &[Sample],
    num_classes: usize,
    input_size: usize,
    device: &B::Device,
) -> Result<Batch<B>> {
    let anchors = (input_size / STRIDE).pow(2);
    let mut images = Vec::with_capacity(samples.len());
    let mut scores = Vec::new();
    let mut targets = Vec::new();
    let mut masks = Vec::new();

    for sample in samples {
        let image = load_image(&sample.image)?;
        let (w0, h0) = image.dimensions();
        let (w0, h0) = (w0 as f32, h0 as f32);
        let (letterboxed, info) = Letterbox::new(input_size as u32, input_size as u32).apply(&image);
        images.push(array_to_tensor::<B>(&image_to_tensor(&letterboxed), device));

        let boxes: Vec<(usize, [f32; 4])> = sample
            .labels
            .iter()
            .map(|b| {
                let (cx, cy) = info.map(b.cx * w0, b.cy * h0);
                (b.class_id, [cx, cy, b.w * w0 * info.ratio, b.h * h0 * info.ratio])
            })
            .collect();
        let (s, t, m) = assign_targets_to_grid(&boxes, num_classes, input_size);
        scores.extend(s);
        targets.extend(t);
        masks.extend(m);
    }

    let batch = samples.len();
    let tensor3 = |data: Vec<f32>, channels: usize| {
        Tensor::<B, 3>::from_data(TensorData::new(data, [batch, channels, anchors]), device)
    };

    Ok(Batch {
        images: Tensor::cat(images, 0),
        target_scores: tensor3(scores, num_classes),
        target_boxes: tensor3(targets, 4),
        box_mask: tensor3(masks, 4),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_label_lines() {
        let text = "0 0.5 0.5 0.2 0.1\n\n2 0.1 0.2 0.3 0.4\n";
        let boxes = parse_labels(text, Path::new("a.txt")).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[1].class_id, 2);
        assert_eq!(boxes[1].h, 0.4);
    }

    #[test]
    fn reports_bad_label_line() {
        let err = parse_labels("0 0.5 0.5 0.2\n", Path::new("a.txt")).unwrap_err();
        assert!(matches!(err, Error::Label { line: 1, .. }));
        let err = parse_labels("0 0.5 0.5 0.2 0.1\nx 1 1 1 1", Path::new("a.txt")).unwrap_err();
        assert!(matches!(err, Error::Label { line: 2, .. }));
    }

    #[test]
    fn label_path_swaps_images_directory() {
        assert_eq!(
            label_path_for(Path::new("data/images/train/File_1.bmp")),
            PathBuf::from("data/labels/train/File_1.txt")
        );
        assert_eq!(label_path_for(Path::new("raw/a.bmp")), PathBuf::from("raw/a.txt"));
    }

    #[test]
    fn relative_root_resolves_against_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.toml");
        DatasetDescriptor::new(".", vec!["Cross".into(), "U87".into()])
            .save(&path)
            .unwrap();
        let loaded = DatasetDescriptor::load(&path).unwrap();
        assert_eq!(loaded.train_dir(), dir.path().join(".").join("images/train"));
        assert_eq!(loaded.names, vec!["Cross", "U87"]);
    }

    #[test]
    fn boxes_land_in_center_cell() {
        // 64 输入，4x4 网格
        let (scores, targets, mask) = assign_targets_to_grid(&[(1, [40.0, 20.0, 16.0, 8.0])], 2, 64);
        let idx = 4 + 2;
        assert_eq!(scores[16 + idx], 1.0);
        assert_eq!(scores[idx], 0.0);
        assert_eq!(targets[idx], 40.0 / 64.0);
        assert_eq!(targets[3 * 16 + idx], 8.0 / 64.0);
        assert_eq!(mask.iter().sum::<f32>(), 4.0);
    }
}
