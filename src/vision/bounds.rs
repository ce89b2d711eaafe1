/// 边界框结构
///
/// 表示一个矩形边界框，坐标为像素，`(x1, y1)` 为左上角，`(x2, y2)` 为右下角。
#[derive(Debug, Clone, Default, Copy, PartialEq)]
pub struct BoundingBox {
    /// 左上角x坐标
    pub x1: f32,
    /// 左上角y坐标
    pub y1: f32,
    /// 右下角x坐标
    pub x2: f32,
    /// 右下角y坐标
    pub y2: f32,
}

impl BoundingBox {
    /// 创建一个新的边界框
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 由中心点和宽高构造
    pub fn from_xywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    /// 计算边界框的宽度
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).abs()
    }

    /// 计算边界框的高度
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).abs()
    }

    /// 计算边界框的面积
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 检查边界框是否有效（宽度和高度都大于0）
    pub fn is_valid(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    /// 坐标截断为整数后的框，与像素裁剪保持一致
    pub fn to_pixels(&self) -> PixelBox {
        PixelBox {
            x1: self.x1 as i64,
            y1: self.y1 as i64,
            x2: self.x2 as i64,
            y2: self.y2 as i64,
        }
    }

    /// 与另一个框的交并比
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = intersection(self, other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// 整数像素坐标的边界框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl PixelBox {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 中心点（整除）
    pub fn center(&self) -> (i64, i64) {
        ((self.x1 + self.x2).div_euclid(2), (self.y1 + self.y2).div_euclid(2))
    }

    /// 点是否落在框内，边界算作框内
    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    /// 截断到图像范围内，返回 `(x, y, width, height)`；区域为空时返回 `None`
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.clamp(0, width as i64);
        let x2 = self.x2.clamp(0, width as i64);
        let y1 = self.y1.clamp(0, height as i64);
        let y2 = self.y2.clamp(0, height as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

/// 检测结果结构
///
/// 包含检测到的目标的完整信息。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// 目标的边界框
    pub bbox: BoundingBox,
    /// 类别ID
    pub class_id: usize,
    /// 类别名称
    pub class_name: String,
    /// 置信度
    pub confidence: f32,
}

impl Detection {
    /// 创建一个新的检测结果
    pub fn new(bbox: BoundingBox, class_id: usize, class_name: String, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            class_name,
            confidence,
        }
    }
}

/// 计算两个边界框的交集面积
fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let x_left = box1.x1.max(box2.x1);
    let y_top = box1.y1.max(box2.y1);
    let x_right = box1.x2.min(box2.x2);
    let y_bottom = box1.y2.min(box2.y2);

    if x_right <= x_left || y_bottom <= y_top {
        0.0
    } else {
        (x_right - x_left) * (y_bottom - y_top)
    }
}
