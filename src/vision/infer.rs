use ndarray::{Array2, Array4};
use ort::{inputs, session::Session, value::Tensor};

use crate::error::{Error, Result};

/// 运行模型推理
///
/// # 参数
/// * `model` - ONNX模型Session
/// * `input` - 输入张量，形状应为(1, 3, height, width)
///
/// # 返回值
/// 返回形状为(num_anchors, 4 + num_classes)的预测，每行为 `[cx, cy, w, h, class scores...]`
pub fn run_inference(model: &mut Session, input: &Array4<f32>) -> Result<Array2<f32>> {
    let shape: Vec<usize> = input.shape().to_vec();
    let (data, _offset) = input.clone().into_raw_vec_and_offset();
    let input_tensor = Tensor::from_array(([shape[0], shape[1], shape[2], shape[3]], data))?;
    let outputs = model.run(inputs!["images" => input_tensor])?;

    let output = outputs[0].try_extract_tensor::<f32>()?;
    let shape = output.0.clone();

    // YOLO输出形状为 [1, 4 + num_classes, num_anchors]
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(Error::ModelOutput(format!("输出形状 {:?}", &shape[..])));
    }

    let data = output.1.to_vec();
    let channels_first = Array2::from_shape_vec((shape[1] as usize, shape[2] as usize), data)?;

    Ok(channels_first.reversed_axes().as_standard_layout().to_owned())
}
