//! 数据集划分
//!
//! 把图像与同名标签按比例复制到 `images/{train,val}` 与 `labels/{train,val}`。

use std::fs;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::config::SplitConfig;
use crate::dataset::{DatasetDescriptor, list_files};
use crate::error::{Error, Result};

/// 划分结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitReport {
    /// 划入训练集的图像文件名（含无标签而跳过的）
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
    /// 实际复制的图像-标签对
    pub copied_train: usize,
    pub copied_val: usize,
    /// 缺少标签而跳过的图像
    pub missing_labels: Vec<PathBuf>,
}

/// 训练集数量，向下取整
pub fn train_size(total: usize, train_ratio: f64) -> usize {
    (total as f64 * train_ratio).floor() as usize
}

fn validate(config: &SplitConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&config.train_ratio) {
        return Err(Error::InvalidConfig {
            field: "split.train_ratio",
            reason: format!("{} 不在 [0, 1] 内", config.train_ratio),
        });
    }
    if (config.train_ratio + config.val_ratio - 1.0).abs() > 1e-6 {
        tracing::warn!(
            "train_ratio({}) + val_ratio({}) 不等于1，剩余部分全部划入验证集",
            config.train_ratio,
            config.val_ratio
        );
    }
    Ok(())
}

/// 按配置划分数据集
pub fn split_dataset(config: &SplitConfig) -> Result<SplitReport> {
    validate(config)?;

    let dirs = ["images/train", "images/val", "labels/train", "labels/val"].map(|d| config.output.join(d));
    for dir in &dirs {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    let [train_img_dir, val_img_dir, train_label_dir, val_label_dir] = dirs;

    let mut files = list_files(&config.images, &[config.extension.as_str()])?;
    match config.seed {
        Some(seed) => files.shuffle(&mut ChaCha8Rng::seed_from_u64(seed)),
        None => files.shuffle(&mut rand::thread_rng()),
    }

    let n_train = train_size(files.len(), config.train_ratio);
    let (train_files, val_files) = files.split_at(n_train);
    tracing::info!("共 {} 张图像: 训练 {}, 验证 {}", files.len(), train_files.len(), val_files.len());

    let mut report = SplitReport::default();

    tracing::info!("开始复制训练集文件...");
    report.copied_train = copy_pairs(
        train_files,
        &config.labels,
        &train_img_dir,
        &train_label_dir,
        &mut report.missing_labels,
    )?;
    tracing::info!("开始复制验证集文件...");
    report.copied_val = copy_pairs(
        val_files,
        &config.labels,
        &val_img_dir,
        &val_label_dir,
        &mut report.missing_labels,
    )?;

    report.train = train_files.iter().filter_map(|p| p.file_name().map(PathBuf::from)).collect();
    report.val = val_files.iter().filter_map(|p| p.file_name().map(PathBuf::from)).collect();

    if !config.names.is_empty() {
        let descriptor_path = config.output.join("data.toml");
        DatasetDescriptor::new(".", config.names.clone()).save(&descriptor_path)?;
        tracing::info!("数据集描述已写入 {:?}", descriptor_path);
    }

    Ok(report)
}

/// 复制有标签的图像，返回复制的数量
fn copy_pairs(
    images: &[PathBuf],
    label_dir: &Path,
    image_dest: &Path,
    label_dest: &Path,
    missing: &mut Vec<PathBuf>,
) -> Result<usize> {
    let mut copied = 0;
    for image in images {
        let (Some(file_name), Some(stem)) = (image.file_name(), image.file_stem()) else {
            continue;
        };
        // 只追加 `.txt`，`a.v2.bmp` 对应 `a.v2.txt`
        let mut label_name = stem.to_os_string();
        label_name.push(".txt");
        let label_src = label_dir.join(&label_name);

        if !label_src.exists() {
            tracing::warn!("未找到对应的标签文件: {:?}", label_src);
            missing.push(image.clone());
            continue;
        }

        let image_to = image_dest.join(file_name);
        fs::copy(image, &image_to).map_err(|e| Error::io(image, e))?;
        let label_to = label_dest.join(&label_name);
        fs::copy(&label_src, &label_to).map_err(|e| Error::io(&label_src, e))?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_size_floors() {
        assert_eq!(train_size(10, 0.8), 8);
        assert_eq!(train_size(7, 0.8), 5);
        assert_eq!(train_size(3, 0.0), 0);
        assert_eq!(train_size(3, 1.0), 3);
    }

    #[test]
    fn ratio_outside_unit_interval_is_rejected() {
        let config = SplitConfig {
            train_ratio: 1.5,
            ..SplitConfig::default()
        };
        assert!(matches!(validate(&config), Err(Error::InvalidConfig { .. })));
    }
}
