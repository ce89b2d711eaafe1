//! 显著图合成、缩放与归一化

use ndarray::{Array2, Array4, Axis};

use crate::error::{Error, Result};

/// 按通道权重累加激活并截去负值
///
/// `weights` 为 `[b, k]`，`activations` 为 `[b, k, u, v]`，只取第一张图，输出 `[u, v]`。
pub fn saliency_map(weights: &Array2<f32>, activations: &Array4<f32>) -> Result<Array2<f32>> {
    let (b, k, u, v) = activations.dim();
    if weights.dim() != (b, k) || b == 0 {
        return Err(Error::ShapeMismatch {
            expected: vec![b, k],
            got: weights.shape().to_vec(),
        });
    }

    let mut map = Array2::<f32>::zeros((u, v));
    for (ki, channel) in activations.index_axis(Axis(0), 0).axis_iter(Axis(0)).enumerate() {
        map.scaled_add(weights[[0, ki]], &channel);
    }
    map.mapv_inplace(|x| x.max(0.0));
    Ok(map)
}

/// 双线性缩放到 `width x height`
///
/// 像素中心对齐，边缘采样截断到边界。
pub fn resize_bilinear(map: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (src_h, src_w) = map.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((height, width));
    }

    let scale_x = src_w as f32 / width as f32;
    let scale_y = src_h as f32 / height as f32;
    let max_x = (src_w - 1) as f32;
    let max_y = (src_h - 1) as f32;

    Array2::from_shape_fn((height, width), |(y, x)| {
        let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
        let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
        let x0 = sx.floor() as usize;
        let y0 = sy.floor() as usize;
        let x1 = (x0 + 1).min(src_w - 1);
        let y1 = (y0 + 1).min(src_h - 1);
        let dx = sx - x0 as f32;
        let dy = sy - y0 as f32;

        let f0 = map[[y0, x0]] * (1.0 - dx) + map[[y0, x1]] * dx;
        let f1 = map[[y1, x0]] * (1.0 - dx) + map[[y1, x1]] * dx;
        f0 * (1.0 - dy) + f1 * dy
    })
}

/// 线性拉伸到 [0, 1]
///
/// 最大值等于最小值时返回 `None`。
pub fn normalize(map: &Array2<f32>) -> Option<Array2<f32>> {
    let (lo, hi) = map
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi <= lo {
        return None;
    }
    Some(map.mapv(|v| (v - lo) / (hi - lo)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    #[test]
    fn negative_contributions_are_clipped() {
        let activations = Array::from_shape_vec((1, 2, 1, 2), vec![1.0, 2.0, 3.0, 0.0]).unwrap();
        let weights = array![[1.0, -1.0]];
        let map = saliency_map(&weights, &activations).unwrap();
        assert_eq!(map, array![[0.0, 2.0]]);
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let activations = Array4::<f32>::zeros((1, 3, 2, 2));
        let weights = Array2::<f32>::zeros((1, 2));
        assert!(saliency_map(&weights, &activations).is_err());
    }

    #[test]
    fn resize_keeps_constant_maps_constant() {
        let map = Array2::from_elem((4, 4), 0.5);
        let resized = resize_bilinear(&map, 16, 8);
        assert_eq!(resized.dim(), (8, 16));
        assert!(resized.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn resize_interpolates_between_pixels() {
        let map = array![[0.0, 1.0]];
        let resized = resize_bilinear(&map, 4, 1);
        assert_eq!(resized.row(0).to_vec(), vec![0.0, 0.25, 0.75, 1.0]);
    }

    #[test]
    fn normalize_spans_unit_range() {
        let map = array![[2.0, 4.0], [3.0, 6.0]];
        let norm = normalize(&map).unwrap();
        assert_eq!(norm, array![[0.0, 0.5], [0.25, 1.0]]);
    }

    #[test]
    fn flat_map_cannot_be_normalized() {
        assert!(normalize(&Array2::from_elem((3, 3), 0.0)).is_none());
    }
}
