//! 训练 [`CellNet`]
//!
//! 读取数据集描述，按中心网格分配目标，Adam 优化类别 BCE 与框 L1 之和。
//! 每轮结束计算验证损失，写出 `last.mpk` 与 `best.mpk`。

use std::path::PathBuf;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::config::TrainConfig;
use crate::dataset::{Batch, DatasetDescriptor, DetectionDataset, Sample, collate};
use crate::error::{Error, Result};
use crate::net::{CellNet, CheckpointMeta, InferenceBackend, NetConfig, STRIDE, TrainBackend, save_checkpoint};

/// 框损失的权重
const BOX_GAIN: f32 = 5.0;
const EPS: f32 = 1e-6;

/// 训练结果
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs: usize,
    /// 每轮训练集平均损失
    pub train_losses: Vec<f32>,
    /// 每轮验证集平均损失，没有验证集时为空
    pub val_losses: Vec<f32>,
    pub best_epoch: usize,
    pub last_checkpoint: PathBuf,
    pub best_checkpoint: PathBuf,
}

/// 检测损失：全部网格的类别 BCE 加有目标网格的框 L1
pub fn detection_loss<B: Backend>(predictions: Tensor<B, 3>, batch: &Batch<B>, input_size: usize) -> Tensor<B, 1> {
    let [b, channels, anchors] = predictions.dims();

    let boxes = predictions.clone().slice([0..b, 0..4, 0..anchors]) / input_size as f32;
    let scores = predictions.slice([0..b, 4..channels, 0..anchors]).clamp(EPS, 1.0 - EPS);

    let targets = batch.target_scores.clone();
    let bce = (targets.clone() * scores.clone().log()
        + (targets.neg() + 1.0) * (scores.neg() + 1.0).log())
    .neg()
    .mean();

    let mask = batch.box_mask.clone();
    let l1 = ((boxes - batch.target_boxes.clone()).abs() * mask.clone()).sum() / (mask.sum() + 1.0);

    bce + l1 * BOX_GAIN
}

/// 取单元素损失张量的值
fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32> {
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::ModelOutput(format!("{e:?}")))?;
    values
        .first()
        .copied()
        .ok_or_else(|| Error::ModelOutput("损失张量为空".to_string()))
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// 按配置训练并保存检查点
pub fn train(config: &TrainConfig) -> Result<TrainReport> {
    if config.epochs == 0 {
        return Err(Error::InvalidConfig {
            field: "train.epochs",
            reason: "至少训练1轮".to_string(),
        });
    }
    if !(config.learning_rate > 0.0) {
        return Err(Error::InvalidConfig {
            field: "train.learning_rate",
            reason: format!("{} 不是正数", config.learning_rate),
        });
    }

    let descriptor = DatasetDescriptor::load(&config.data)?;
    let num_classes = descriptor.names.len();
    if config.model.num_classes != num_classes {
        tracing::warn!(
            "网络类别数 {} 与数据集类别数 {} 不一致，按数据集设置",
            config.model.num_classes,
            num_classes
        );
    }
    let net_config = NetConfig {
        num_classes,
        ..config.model
    };

    let train_set = DetectionDataset::from_dir(&descriptor.train_dir(), num_classes)?;
    if train_set.is_empty() {
        return Err(Error::InvalidConfig {
            field: "train.data",
            reason: format!("训练集 {:?} 中没有图像", descriptor.train_dir()),
        });
    }
    let val_set = match descriptor.val_dir() {
        dir if dir.is_dir() => DetectionDataset::from_dir(&dir, num_classes)?,
        dir => {
            tracing::warn!("验证集目录 {:?} 不存在，按训练损失选择最优检查点", dir);
            DetectionDataset::default()
        }
    };

    let input_size = config.imgsz.max(1).div_ceil(STRIDE) * STRIDE;
    let batch_size = config.batch_size.max(1);
    let seed = config.seed.unwrap_or_else(rand::random);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    TrainBackend::seed(seed);

    let device = <TrainBackend as Backend>::Device::default();
    let mut model = CellNet::<TrainBackend>::new(net_config, &device);
    let mut optim = AdamConfig::new().init();

    let weights_dir = config.weights_dir();
    let last_checkpoint = weights_dir.join("last.mpk");
    let best_checkpoint = weights_dir.join("best.mpk");

    tracing::info!(
        "开始训练: {} 张训练图像, {} 张验证图像, {} 个类别, 输入 {}, {} 轮",
        train_set.len(),
        val_set.len(),
        num_classes,
        input_size,
        config.epochs
    );

    let mut samples: Vec<Sample> = train_set.samples.clone();
    let mut report = TrainReport {
        epochs: config.epochs,
        train_losses: Vec::with_capacity(config.epochs),
        val_losses: Vec::with_capacity(config.epochs),
        best_epoch: 0,
        last_checkpoint: last_checkpoint.clone(),
        best_checkpoint: best_checkpoint.clone(),
    };
    let mut best_loss = f32::INFINITY;

    for epoch in 1..=config.epochs {
        let start = Instant::now();
        samples.shuffle(&mut rng);

        let mut losses = Vec::new();
        for chunk in samples.chunks(batch_size) {
            let batch = collate::<TrainBackend>(chunk, num_classes, input_size, &device)?;
            let predictions = model.forward(batch.images.clone());
            let loss = detection_loss(predictions, &batch, input_size);
            losses.push(scalar(loss.clone().detach())?);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);
        }
        let train_loss = mean(&losses);
        report.train_losses.push(train_loss);

        let valid = model.valid();
        let metric = if val_set.is_empty() {
            train_loss
        } else {
            let val_loss = evaluate(&valid, &val_set, num_classes, input_size, batch_size)?;
            report.val_losses.push(val_loss);
            val_loss
        };

        let meta = CheckpointMeta {
            names: descriptor.names.clone(),
            config: net_config,
            epoch,
            val_loss: (!val_set.is_empty()).then_some(metric),
        };
        save_checkpoint(&valid, &meta, &last_checkpoint)?;
        if metric < best_loss || report.best_epoch == 0 {
            best_loss = metric;
            report.best_epoch = epoch;
            save_checkpoint(&valid, &meta, &best_checkpoint)?;
        }

        tracing::info!(
            "epoch {}/{}: train loss {:.4}, val loss {:.4}, {:?}",
            epoch,
            config.epochs,
            train_loss,
            metric,
            start.elapsed()
        );
    }

    tracing::info!("训练完成，最优第 {} 轮 -> {:?}", report.best_epoch, best_checkpoint);
    Ok(report)
}

/// 验证集平均损失
fn evaluate(
    model: &CellNet<InferenceBackend>,
    dataset: &DetectionDataset,
    num_classes: usize,
    input_size: usize,
    batch_size: usize,
) -> Result<f32> {
    let device = <InferenceBackend as Backend>::Device::default();
    let mut losses = Vec::new();
    for chunk in dataset.samples.chunks(batch_size) {
        let batch = collate::<InferenceBackend>(chunk, num_classes, input_size, &device)?;
        let predictions = model.forward(batch.images.clone());
        losses.push(scalar(detection_loss(predictions, &batch, input_size))?);
    }
    Ok(mean(&losses))
}
