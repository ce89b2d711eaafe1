//! 检查点读写
//!
//! 参数保存为 NamedMpk（`.mpk`），类别名与网络结构写在同名 `.json` 中。

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::net::model::{CellNet, NetConfig};

/// 检查点元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// 类别名，按类别号排列
    pub names: Vec<String>,
    pub config: NetConfig,
    /// 保存时已完成的轮数
    pub epoch: usize,
    #[serde(default)]
    pub val_loss: Option<f32>,
}

/// 元数据文件路径
pub fn meta_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// 保存参数与元数据
pub fn save_checkpoint<B: Backend>(net: &CellNet<B>, meta: &CheckpointMeta, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    net.clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| Error::checkpoint(path, e))?;

    let json = serde_json::to_string_pretty(meta).map_err(|e| Error::checkpoint(path, e))?;
    let meta_file = meta_path(path);
    fs::write(&meta_file, json).map_err(|e| Error::io(&meta_file, e))?;

    tracing::debug!("检查点已保存 {:?}", path);
    Ok(())
}

/// 读取元数据
pub fn load_meta(path: &Path) -> Result<CheckpointMeta> {
    let meta_file = meta_path(path);
    let text = fs::read_to_string(&meta_file).map_err(|e| Error::io(&meta_file, e))?;
    let meta: CheckpointMeta = serde_json::from_str(&text).map_err(|e| Error::checkpoint(&meta_file, e))?;

    if meta.names.len() != meta.config.num_classes {
        return Err(Error::checkpoint(
            &meta_file,
            format!(
                "类别名数量 {} 与网络类别数 {} 不一致",
                meta.names.len(),
                meta.config.num_classes
            ),
        ));
    }
    Ok(meta)
}

/// 按元数据重建网络并载入参数
pub fn load_checkpoint<B: Backend>(path: &Path, device: &B::Device) -> Result<(CellNet<B>, CheckpointMeta)> {
    let meta = load_meta(path)?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let net = CellNet::<B>::new(meta.config, device)
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| Error::checkpoint(path, e))?;

    tracing::info!(
        "载入检查点 {:?}: {} 个参数, {} 个类别, 第 {} 轮",
        path,
        net.num_params(),
        meta.names.len(),
        meta.epoch
    );
    Ok((net, meta))
}
