pub mod cam;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod net;
pub mod split;
pub mod train;
pub mod vision;

// 重新导出各流程的入口
pub use cam::{HeatmapReport, run_heatmap};
pub use config::Config;
pub use error::{Error, Result};
pub use extract::{CropReport, extract_cells};
pub use split::{SplitReport, split_dataset};
pub use train::{TrainReport, train};
pub use vision::{BoundingBox, Detection, Detector, build_detector, draw_detections, load_image};
