//! Vision模块 - 基于YOLO的目标检测
//!
//! 该模块提供一整套目标检测功能，包括：
//! - 模型加载（ONNX Runtime）
//! - 图像预处理（letterbox、张量化）
//! - 模型推理
//! - 结果后处理（坐标还原、NMS）
//! - 可视化绘制
//!
//! # 工作流程
//!
//! 1. 使用 [`build_detector`] 按配置加载 ONNX 模型或自有网络检查点
//! 2. 使用 [`load_image`] 加载待检测图像
//! 3. 调用 [`Detector::detect`] 执行检测
//! 4. 使用 [`draw_detections`] 绘制检测结果

pub mod bounds;
pub mod detect;
pub mod image;
pub mod infer;
pub mod model;
pub mod posts;

pub use bounds::{BoundingBox, Detection, PixelBox};
pub use detect::{Detector, YoloDetector, build_detector, class_colors, draw_detections};
pub use image::{Letterbox, LetterboxInfo, image_to_tensor, load_image, save_image};
pub use model::load_model;
