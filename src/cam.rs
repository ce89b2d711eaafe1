//! 类激活热力图
//!
//! 对检测网络某一层，按候选的目标分数反向传播得到梯度，
//! 再用 [`CamMethod`] 计算通道权重，合成显著图并叠加到输入图像上。
//!
//! # 工作流程
//!
//! 1. [`NetGradients`] 前向一次，缓存目标层激活与全部候选
//! 2. 候选按最大类别得分降序，取前 `floor(候选数 * ratio)` 个
//! 3. 每个候选反向传播，计算权重与显著图，写出 `{i}.png`

pub mod heatmap;
pub mod methods;
pub mod overlay;
pub mod runner;
pub mod saliency;

pub use heatmap::{CamRenderer, HeatmapReport, LayerReport, run_heatmap};
pub use methods::{CamMethod, CamMethodKind, GradCam, GradCamPlusPlus, XGradCam};
pub use overlay::{jet, show_cam_on_image};
pub use runner::{BackwardType, GradientSource, NetGradients};
pub use saliency::{normalize, resize_bilinear, saliency_map};
