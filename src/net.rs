//! 自有检测网络
//!
//! 基于 burn 实现，可训练，并支持在任意 [`TargetLayer`] 处截断前向，
//! 供热力图计算该层的激活与梯度。

pub mod checkpoint;
pub mod detector;
pub mod layer;
pub mod model;

use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Tensor, TensorData, backend::Backend};
use ndarray::{Array2, Array4};

use crate::error::{Error, Result};

pub use checkpoint::{CheckpointMeta, load_checkpoint, load_meta, save_checkpoint};
pub use detector::NetDetector;
pub use layer::TargetLayer;
pub use model::{CellNet, NetConfig, STRIDE};

/// 推理后端
pub type InferenceBackend = NdArray<f32>;
/// 训练与梯度计算后端
pub type TrainBackend = Autodiff<InferenceBackend>;

/// ndarray 张量转 burn 张量
pub fn array_to_tensor<B: Backend>(array: &Array4<f32>, device: &B::Device) -> Tensor<B, 4> {
    let (n, c, h, w) = array.dim();
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_data(TensorData::new(data, [n, c, h, w]), device)
}

/// burn 张量转 ndarray 张量
pub fn tensor_to_array<B: Backend>(tensor: Tensor<B, 4>) -> Result<Array4<f32>> {
    let [n, c, h, w] = tensor.dims();
    let data = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::ModelOutput(format!("{e:?}")))?;
    Ok(Array4::from_shape_vec((n, c, h, w), data)?)
}

/// 将 `[1, 4 + nc, A]` 的网络输出转为每行一个候选的 `(A, 4 + nc)`
pub fn predictions_to_array<B: Backend>(tensor: Tensor<B, 3>) -> Result<Array2<f32>> {
    let [batch, channels, anchors] = tensor.dims();
    if batch != 1 {
        return Err(Error::ShapeMismatch {
            expected: vec![1, channels, anchors],
            got: vec![batch, channels, anchors],
        });
    }
    let data = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::ModelOutput(format!("{e:?}")))?;
    let output = Array2::from_shape_vec((channels, anchors), data)?;
    Ok(output.reversed_axes().as_standard_layout().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn array_roundtrip_keeps_layout() {
        let array = Array::from_shape_fn((1, 3, 2, 4), |(_, c, y, x)| (c * 100 + y * 10 + x) as f32);
        let tensor = array_to_tensor::<InferenceBackend>(&array, &Default::default());
        assert_eq!(tensor.dims(), [1, 3, 2, 4]);
        let back = tensor_to_array(tensor).unwrap();
        assert_eq!(back, array);
    }

    #[test]
    fn predictions_are_transposed_per_anchor() {
        let data = TensorData::new(vec![0.0f32, 1.0, 2.0, 10.0, 11.0, 12.0], [1, 2, 3]);
        let tensor = Tensor::<InferenceBackend, 3>::from_data(data, &Default::default());
        let output = predictions_to_array(tensor).unwrap();
        assert_eq!(output.dim(), (3, 2));
        assert_eq!(output[[1, 0]], 1.0);
        assert_eq!(output[[1, 1]], 11.0);
    }
}
