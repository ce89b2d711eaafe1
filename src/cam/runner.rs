//! 目标层激活与梯度
//!
//! 前向只做一次并缓存目标层输出；每个候选重新从目标层向后计算并反向传播，
//! 得到该候选的目标分数对目标层激活的梯度。

use std::fmt;
use std::str::FromStr;

use burn::module::Module;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::net::{CellNet, TargetLayer, TrainBackend, array_to_tensor, predictions_to_array, tensor_to_array};

/// 参与反向传播的目标分数
///
/// 多项分数分别反向传播时，梯度之和等于它们的和的梯度，这里直接对和求导。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackwardType {
    /// 最大类别得分
    Class,
    /// 4个框坐标
    Box,
    /// 两者之和
    #[default]
    All,
}

impl BackwardType {
    fn uses_class(self) -> bool {
        matches!(self, BackwardType::Class | BackwardType::All)
    }

    fn uses_box(self) -> bool {
        matches!(self, BackwardType::Box | BackwardType::All)
    }
}

impl fmt::Display for BackwardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackwardType::Class => "class",
            BackwardType::Box => "box",
            BackwardType::All => "all",
        })
    }
}

impl FromStr for BackwardType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Ok(BackwardType::Class),
            "box" => Ok(BackwardType::Box),
            "all" => Ok(BackwardType::All),
            _ => Err(Error::InvalidConfig {
                field: "backward_type",
                reason: format!("`{s}` 不是 class、box 或 all"),
            }),
        }
    }
}

/// 能给出目标层激活与逐候选梯度的模型
pub trait GradientSource {
    /// 目标层激活 `[1, k, u, v]`
    fn activations(&self) -> &Array4<f32>;

    /// 每行一个候选 `[cx, cy, w, h, class scores...]`
    fn predictions(&self) -> &Array2<f32>;

    /// 第 `anchor` 个候选的目标分数对激活的梯度，形状同 [`GradientSource::activations`]
    fn gradients(&mut self, anchor: usize, backward: BackwardType) -> Result<Array4<f32>>;
}

/// [`CellNet`] 上的梯度计算
pub struct NetGradients {
    net: CellNet<TrainBackend>,
    layer: TargetLayer,
    /// 目标层输出，已断开与前面各层的联系
    cached: Tensor<TrainBackend, 4>,
    activations: Array4<f32>,
    predictions: Array2<f32>,
}

impl NetGradients {
    /// 执行一次前向，缓存目标层激活与全部候选
    pub fn new(net: CellNet<TrainBackend>, layer: TargetLayer, input: &Array4<f32>) -> Result<Self> {
        let net = net.no_grad();
        let device = <TrainBackend as Backend>::Device::default();
        let input = array_to_tensor::<TrainBackend>(input, &device);

        let cached = net.forward_until(input, layer).detach();
        let activations = tensor_to_array(cached.clone())?;
        let predictions = predictions_to_array(net.forward_from(layer, cached.clone()))?;

        tracing::debug!(
            "目标层 {} 激活形状 {:?}, 候选数 {}",
            layer,
            activations.shape(),
            predictions.nrows()
        );

        Ok(Self {
            net,
            layer,
            cached,
            activations,
            predictions,
        })
    }
}

impl GradientSource for NetGradients {
    fn activations(&self) -> &Array4<f32> {
        &self.activations
    }

    fn predictions(&self) -> &Array2<f32> {
        &self.predictions
    }

    fn gradients(&mut self, anchor: usize, backward: BackwardType) -> Result<Array4<f32>> {
        let (anchors, channels) = self.predictions.dim();
        if anchor >= anchors {
            return Err(Error::ModelOutput(format!("候选序号 {anchor} 超出范围 {anchors}")));
        }

        let leaf = self.cached.clone().require_grad();
        let output = self.net.forward_from(self.layer, leaf.clone());
        let column = output
            .slice([0..1, 0..channels, anchor..anchor + 1])
            .reshape([channels]);

        let class_score = || column.clone().slice([4..channels]).max();
        let box_score = || column.clone().slice([0..4]).sum();
        let target = match (backward.uses_class(), backward.uses_box()) {
            (true, true) => class_score() + box_score(),
            (true, false) => class_score(),
            _ => box_score(),
        };

        let grads = target.backward();
        let gradient = leaf
            .grad(&grads)
            .ok_or_else(|| Error::ModelOutput(format!("目标层 {} 没有梯度", self.layer)))?;
        tensor_to_array(gradient)
    }
}
