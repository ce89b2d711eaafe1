//! 单尺度无锚框检测网络
//!
//! 形状约定：
//! - 输入图像：`[B, 3, H, W]`，H、W 为 [`STRIDE`] 的整数倍
//! - 输出：`[B, 4 + num_classes, A]`，A = (H / 16) * (W / 16)；
//!   前4通道为输入像素坐标下的 `cx, cy, w, h`，其余为各类别得分（sigmoid 后）

use burn::module::{Ignored, Module};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::tensor::activation::{sigmoid, silu};
use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

use crate::net::layer::TargetLayer;

/// 输出特征图相对输入的下采样倍数
pub const STRIDE: usize = 16;

/// 网络结构配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub num_classes: usize,
    /// 第一层通道数，之后每次下采样翻倍
    pub width: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            num_classes: 3,
            width: 16,
        }
    }
}

/// 卷积 + SiLU
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(channels: [usize; 2], kernel: usize, stride: usize, device: &B::Device) -> Self {
        let pad = kernel / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .init(device);
        Self { conv }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        silu(self.conv.forward(x))
    }
}

/// 空间金字塔池化（串联的3次5x5最大池化）
#[derive(Module, Debug)]
pub struct Sppf<B: Backend> {
    cv1: ConvBlock<B>,
    cv2: ConvBlock<B>,
    pool: MaxPool2d,
}

impl<B: Backend> Sppf<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        let hidden = channels / 2;
        Self {
            cv1: ConvBlock::new([channels, hidden], 1, 1, device),
            cv2: ConvBlock::new([hidden * 4, channels], 1, 1, device),
            pool: MaxPool2dConfig::new([5, 5])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(2, 2))
                .init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.cv1.forward(x);
        let y1 = self.pool.forward(x.clone());
        let y2 = self.pool.forward(y1.clone());
        let y3 = self.pool.forward(y2.clone());
        self.cv2.forward(Tensor::cat(vec![x, y1, y2, y3], 1))
    }
}

/// 细胞检测网络
#[derive(Module, Debug)]
pub struct CellNet<B: Backend> {
    /// stem .. c4，对应 [`TargetLayer`] 的 0..=6
    convs: Vec<ConvBlock<B>>,
    sppf: Sppf<B>,
    neck: ConvBlock<B>,
    box_head: Conv2d<B>,
    cls_head: Conv2d<B>,
    pub config: Ignored<NetConfig>,
}

impl<B: Backend> CellNet<B> {
    pub fn new(config: NetConfig, device: &B::Device) -> Self {
        let c1 = config.width.max(2);
        let (c2, c3, c4) = (c1 * 2, c1 * 4, c1 * 8);
        let convs = vec![
            ConvBlock::new([3, c1], 3, 2, device),
            ConvBlock::new([c1, c2], 3, 2, device),
            ConvBlock::new([c2, c2], 3, 1, device),
            ConvBlock::new([c2, c3], 3, 2, device),
            ConvBlock::new([c3, c3], 3, 1, device),
            ConvBlock::new([c3, c4], 3, 2, device),
            ConvBlock::new([c4, c4], 3, 1, device),
        ];
        let box_head = Conv2dConfig::new([c4, 4], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let cls_head = Conv2dConfig::new([c4, config.num_classes.max(1)], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        Self {
            convs,
            sppf: Sppf::new(c4, device),
            neck: ConvBlock::new([c4, c4], 3, 1, device),
            box_head,
            cls_head,
            config: Ignored(config),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes.max(1)
    }

    fn layer_forward(&self, index: usize, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match index {
            i if i < self.convs.len() => self.convs[i].forward(x),
            7 => self.sppf.forward(x),
            _ => self.neck.forward(x),
        }
    }

    /// 前向到目标层（含）为止，返回该层输出
    pub fn forward_until(&self, input: Tensor<B, 4>, layer: TargetLayer) -> Tensor<B, 4> {
        (0..=layer.index()).fold(input, |x, i| self.layer_forward(i, x))
    }

    /// 从目标层输出继续前向，得到检测输出
    pub fn forward_from(&self, layer: TargetLayer, activations: Tensor<B, 4>) -> Tensor<B, 3> {
        let features =
            ((layer.index() + 1)..=TargetLayer::LAST).fold(activations, |x, i| self.layer_forward(i, x));
        self.head(features)
    }

    /// 完整前向，输出 `[B, 4 + num_classes, A]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 3> {
        self.forward_from(TargetLayer::Neck, self.forward_until(input, TargetLayer::Neck))
    }

    /// 解码检测头
    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, _, grid_h, grid_w] = features.dims();
        let device = features.device();
        let anchors = grid_h * grid_w;
        let stride = STRIDE as f32;

        let (gx, gy) = grid_offsets::<B>(grid_h, grid_w, batch, &device);
        let boxes = sigmoid(self.box_head.forward(features.clone()));
        let part = |c: usize| boxes.clone().slice([0..batch, c..c + 1, 0..grid_h, 0..grid_w]);

        let cx = (part(0) + gx) * stride;
        let cy = (part(1) + gy) * stride;
        let w = part(2) * (grid_w as f32 * stride);
        let h = part(3) * (grid_h as f32 * stride);
        let boxes = Tensor::cat(vec![cx, cy, w, h], 1).reshape([batch, 4, anchors]);

        let scores = sigmoid(self.cls_head.forward(features)).reshape([batch, self.num_classes(), anchors]);

        Tensor::cat(vec![boxes, scores], 1)
    }
}

/// 网格左上角坐标，形状 `[batch, 1, h, w]`
fn grid_offsets<B: Backend>(
    grid_h: usize,
    grid_w: usize,
    batch: usize,
    device: &B::Device,
) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let xs: Vec<f32> = (0..grid_h * grid_w).map(|i| (i % grid_w) as f32).collect();
    let ys: Vec<f32> = (0..grid_h * grid_w).map(|i| (i / grid_w) as f32).collect();
    let gx = Tensor::<B, 1>::from_floats(xs.as_slice(), device)
        .reshape([1, 1, grid_h, grid_w])
        .repeat_dim(0, batch);
    let gy = Tensor::<B, 1>::from_floats(ys.as_slice(), device)
        .reshape([1, 1, grid_h, grid_w])
        .repeat_dim(0, batch);
    (gx, gy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny() -> CellNet<TestBackend> {
        let config = NetConfig {
            num_classes: 3,
            width: 4,
        };
        CellNet::new(config, &Default::default())
    }

    #[test]
    fn output_has_one_column_per_anchor() {
        let net = tiny();
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 96], &Default::default());
        let out = net.forward(input);
        assert_eq!(out.dims(), [2, 7, 4 * 6]);
    }

    #[test]
    fn split_forward_matches_full_forward() {
        let net = tiny();
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &Default::default()) * 0.5;
        let full = net.forward(input.clone());
        let acts = net.forward_until(input, TargetLayer::C3);
        assert_eq!(acts.dims(), [1, 16, 8, 8]);
        let resumed = net.forward_from(TargetLayer::C3, acts);
        let diff: Vec<f32> = (full - resumed).abs().into_data().to_vec().unwrap();
        assert!(diff.iter().all(|d| *d < 1e-5));
    }

    #[test]
    fn boxes_lie_in_input_space() {
        let net = tiny();
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &Default::default());
        let out = net.forward(input);
        let values: Vec<f32> = out.slice([0..1, 0..4, 0..4]).into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=32.0).contains(v)));
    }
}
