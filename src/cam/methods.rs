//! 通道权重计算
//!
//! 输入目标层激活与梯度（均为 `[b, k, u, v]`），输出每个通道的权重 `[b, k]`。

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array4, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// 由激活与梯度得到通道权重的方法
pub trait CamMethod {
    fn weights(&self, activations: &Array4<f32>, gradients: &Array4<f32>) -> Array2<f32>;
}

/// 梯度在空间维上的均值
#[derive(Debug, Clone, Copy, Default)]
pub struct GradCam;

impl CamMethod for GradCam {
    fn weights(&self, _activations: &Array4<f32>, gradients: &Array4<f32>) -> Array2<f32> {
        let (b, k, u, v) = gradients.dim();
        if u * v == 0 {
            return Array2::zeros((b, k));
        }
        gradients.sum_axis(Axis(3)).sum_axis(Axis(2)) / (u * v) as f32
    }
}

/// 用二阶、三阶梯度加权正梯度
#[derive(Debug, Clone, Copy, Default)]
pub struct GradCamPlusPlus;

impl GradCamPlusPlus {
    const EPS: f32 = 1e-6;
}

impl CamMethod for GradCamPlusPlus {
    fn weights(&self, activations: &Array4<f32>, gradients: &Array4<f32>) -> Array2<f32> {
        let sum_activations = activations.sum_axis(Axis(3)).sum_axis(Axis(2));
        let mut weights = Array2::zeros(sum_activations.dim());

        for ((bi, ki), w) in weights.indexed_iter_mut() {
            let s = sum_activations[[bi, ki]];
            let grads = gradients.slice(ndarray::s![bi, ki, .., ..]);
            *w = grads
                .iter()
                .filter(|&&g| g != 0.0)
                .map(|&g| {
                    let g2 = g * g;
                    let aij = g2 / (2.0 * g2 + s * g2 * g + Self::EPS);
                    g.max(0.0) * aij
                })
                .sum();
        }
        weights
    }
}

/// 以激活占比加权梯度
#[derive(Debug, Clone, Copy, Default)]
pub struct XGradCam;

impl XGradCam {
    const EPS: f32 = 1e-7;
}

impl CamMethod for XGradCam {
    fn weights(&self, activations: &Array4<f32>, gradients: &Array4<f32>) -> Array2<f32> {
        let sum_activations = activations.sum_axis(Axis(3)).sum_axis(Axis(2));
        let mut weighted = gradients * activations;
        Zip::indexed(&mut weighted).for_each(|(bi, ki, _, _), w| {
            *w /= sum_activations[[bi, ki]] + Self::EPS;
        });
        weighted.sum_axis(Axis(3)).sum_axis(Axis(2))
    }
}

/// 可在配置中选择的方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CamMethodKind {
    #[default]
    #[serde(rename = "GradCAM")]
    GradCam,
    #[serde(rename = "GradCAMPlusPlus", alias = "GradCAM++")]
    GradCamPlusPlus,
    #[serde(rename = "XGradCAM")]
    XGradCam,
}

impl CamMethodKind {
    pub fn build(self) -> Box<dyn CamMethod> {
        match self {
            CamMethodKind::GradCam => Box::new(GradCam),
            CamMethodKind::GradCamPlusPlus => Box::new(GradCamPlusPlus),
            CamMethodKind::XGradCam => Box::new(XGradCam),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CamMethodKind::GradCam => "GradCAM",
            CamMethodKind::GradCamPlusPlus => "GradCAMPlusPlus",
            CamMethodKind::XGradCam => "XGradCAM",
        }
    }
}

impl fmt::Display for CamMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CamMethodKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gradcam" => Ok(CamMethodKind::GradCam),
            "gradcamplusplus" | "gradcam++" => Ok(CamMethodKind::GradCamPlusPlus),
            "xgradcam" => Ok(CamMethodKind::XGradCam),
            _ => Err(Error::UnknownMethod(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn maps() -> (Array4<f32>, Array4<f32>) {
        let activations = Array::from_shape_vec((1, 2, 2, 2), vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let gradients = Array::from_shape_vec((1, 2, 2, 2), vec![1.0, 1.0, 1.0, 1.0, -2.0, 0.0, 0.0, 2.0]).unwrap();
        (activations, gradients)
    }

    #[test]
    fn gradcam_is_spatial_mean() {
        let (a, g) = maps();
        let w = GradCam.weights(&a, &g);
        assert_eq!(w.dim(), (1, 2));
        assert_eq!(w[[0, 0]], 1.0);
        assert_eq!(w[[0, 1]], 0.0);
    }

    #[test]
    fn xgradcam_weights_by_activation_share() {
        let (a, g) = maps();
        let w = XGradCam.weights(&a, &g);
        // sum(g * a) / sum(a) = 10 / 10
        assert!((w[[0, 0]] - 1.0).abs() < 1e-5);
        assert_eq!(w[[0, 1]], 0.0);
    }

    #[test]
    fn gradcam_plus_plus_ignores_negative_gradients() {
        let (a, g) = maps();
        let w = GradCamPlusPlus.weights(&a, &g);
        // 通道0: 每个位置 aij = 1 / (2 + 10)
        assert!((w[[0, 0]] - 4.0 / 12.0).abs() < 1e-5);
        // 通道1: 激活和为0，正梯度处 aij = 1/2
        assert!((w[[0, 1]] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("GradCAM".parse::<CamMethodKind>().unwrap(), CamMethodKind::GradCam);
        assert_eq!("GradCAM++".parse::<CamMethodKind>().unwrap(), CamMethodKind::GradCamPlusPlus);
        assert_eq!("xgradcam".parse::<CamMethodKind>().unwrap(), CamMethodKind::XGradCam);
        assert!("EigenCAM".parse::<CamMethodKind>().is_err());
    }
}
