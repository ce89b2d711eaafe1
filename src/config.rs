//! 运行配置
//!
//! 所有路径与比例都作为具名字段集中在 [`Config`] 中，按流程分段：
//! `[split]`、`[train]`、`[heatmap]`、`[detector]`、`[crop]`。
//! 未出现在配置文件中的字段使用默认值。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cam::{BackwardType, CamMethodKind};
use crate::error::{Error, Result};
use crate::net::NetConfig;

// 目标检测超参数配置
pub const DEFAULT_INPUT_SIZE: usize = 640;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.7;

// 预处理
pub const LETTERBOX_COLOR: u8 = 114;
pub const LETTERBOX_STRIDE: u32 = 32;

pub const DEFAULT_IMAGE_EXTENSION: &str = "bmp";
pub const CROSS_CLASS_LABEL: &str = "Cross";

/// 全部流程的配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub split: SplitConfig,
    pub train: TrainConfig,
    pub heatmap: HeatmapConfig,
    pub detector: DetectorConfig,
    pub crop: CropConfig,
}

impl Config {
    /// 从 TOML 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// 数据集划分配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// 原始图像目录
    pub images: PathBuf,
    /// 标签目录（与图像同名的 `.txt`）
    pub labels: PathBuf,
    /// 输出根目录，其下生成 `images/{train,val}` 与 `labels/{train,val}`
    pub output: PathBuf,
    /// 参与划分的图像扩展名
    pub extension: String,
    pub train_ratio: f64,
    pub val_ratio: f64,
    /// 指定后划分结果可复现
    pub seed: Option<u64>,
    /// 非空时在输出目录写出 `data.toml`
    pub names: Vec<String>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            images: PathBuf::from("images"),
            labels: PathBuf::from("labels"),
            output: PathBuf::from("dataset"),
            extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            train_ratio: 0.8,
            val_ratio: 0.2,
            seed: None,
            names: Vec::new(),
        }
    }
}

/// 训练配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// 数据集描述文件
    pub data: PathBuf,
    /// 网络结构
    pub model: NetConfig,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// 训练输入尺寸（正方形）
    pub imgsz: usize,
    pub seed: Option<u64>,
    /// 检查点写入 `<project>/<name>/weights/`
    pub project: PathBuf,
    pub name: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::from("dataset/data.toml"),
            model: NetConfig::default(),
            epochs: 100,
            batch_size: 8,
            learning_rate: 1e-3,
            imgsz: DEFAULT_INPUT_SIZE,
            seed: None,
            project: PathBuf::from("runs/train"),
            name: "exp".to_string(),
        }
    }
}

impl TrainConfig {
    pub fn weights_dir(&self) -> PathBuf {
        self.project.join(&self.name).join("weights")
    }
}

/// 热力图配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// 检查点路径（`.mpk`，同名 `.json` 存放元数据）
    pub weights: PathBuf,
    pub image: PathBuf,
    /// 每个目标层在其下单独建子目录
    pub output_dir: PathBuf,
    pub method: CamMethodKind,
    /// 目标层名称，如 `sppf`、`c3` 或层序号
    pub layers: Vec<String>,
    pub backward_type: BackwardType,
    pub conf_threshold: f32,
    /// 参与生成的候选比例
    pub ratio: f32,
    pub imgsz: usize,
    /// 是否在热力图上绘制检测框
    pub draw_boxes: bool,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("runs/train/exp/weights/best.mpk"),
            image: PathBuf::from("image.bmp"),
            output_dir: PathBuf::from("heatmaps"),
            method: CamMethodKind::GradCam,
            layers: vec!["sppf".to_string()],
            backward_type: BackwardType::All,
            conf_threshold: 0.0,
            ratio: 0.02,
            imgsz: DEFAULT_INPUT_SIZE,
            draw_boxes: false,
        }
    }
}

/// 检测器配置，供 `crop` 与 `detect` 共用
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// `.onnx` 使用 ONNX Runtime，其余按检查点加载
    pub weights: PathBuf,
    pub imgsz: usize,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// ONNX 模型未携带类别名时使用
    pub class_names: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("runs/train/exp/weights/best.mpk"),
            imgsz: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            class_names: Vec::new(),
        }
    }
}

/// 细胞裁剪配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    pub input_dir: PathBuf,
    /// 每个目标类别写入 `<output_dir>/<label>/`
    pub output_dir: PathBuf,
    pub extension: String,
    pub cross_label: String,
    pub target_labels: Vec<String>,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("output"),
            extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            cross_label: CROSS_CLASS_LABEL.to_string(),
            target_labels: vec!["U87".to_string(), "NHA".to_string()],
        }
    }
}
