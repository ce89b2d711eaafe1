//! 错误类型
//!
//! 库内所有流程统一返回 [`Result`]，由命令行入口决定如何呈现。

use std::path::PathBuf;

use thiserror::Error;

/// 使用 [`Error`] 的结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// celldet 各流程可能出现的错误
#[derive(Error, Debug)]
pub enum Error {
    /// 带路径的文件系统错误
    #[error("文件操作失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 图像读写或编解码错误
    #[error("图像处理失败 {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// ONNX Runtime 错误
    #[error(transparent)]
    Ort(#[from] ort::Error),

    /// 数组形状构造错误
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    /// 检查点读写失败
    #[error("检查点错误 {path:?}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    /// 配置文件解析失败
    #[error("无法解析配置 {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// 配置项取值不合法
    #[error("配置项 `{field}` 不合法: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// 无法识别的目标层名称
    #[error("未知的目标层: {0}")]
    UnknownLayer(String),

    /// 无法识别的 CAM 方法
    #[error("未知的 CAM 方法: {0}")]
    UnknownMethod(String),

    /// 张量形状不一致
    #[error("形状不匹配: 期望 {expected:?}, 实际 {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// 模型输出不符合预期
    #[error("模型输出不符合预期: {0}")]
    ModelOutput(String),

    /// 数据集标签格式错误
    #[error("标签格式错误 {path:?} 第 {line} 行: {reason}")]
    Label {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl Error {
    /// 为 I/O 错误附加路径
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// 为图像错误附加路径
    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Error::Image {
            path: path.into(),
            source,
        }
    }

    pub fn checkpoint(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::Checkpoint {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
