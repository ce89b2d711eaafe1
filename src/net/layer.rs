use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// 可作为热力图目标的网络层
///
/// 按名称或序号选取，序号与前向顺序一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetLayer {
    Stem,
    Down1,
    C2,
    Down2,
    C3,
    Down3,
    C4,
    Sppf,
    Neck,
}

impl TargetLayer {
    pub const ALL: [TargetLayer; 9] = [
        TargetLayer::Stem,
        TargetLayer::Down1,
        TargetLayer::C2,
        TargetLayer::Down2,
        TargetLayer::C3,
        TargetLayer::Down3,
        TargetLayer::C4,
        TargetLayer::Sppf,
        TargetLayer::Neck,
    ];

    /// 最后一层序号
    pub const LAST: usize = 8;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetLayer::Stem => "stem",
            TargetLayer::Down1 => "down1",
            TargetLayer::C2 => "c2",
            TargetLayer::Down2 => "down2",
            TargetLayer::C3 => "c3",
            TargetLayer::Down3 => "down3",
            TargetLayer::C4 => "c4",
            TargetLayer::Sppf => "sppf",
            TargetLayer::Neck => "neck",
        }
    }
}

impl fmt::Display for TargetLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TargetLayer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<usize>() {
            return Self::from_index(index).ok_or_else(|| Error::UnknownLayer(s.to_string()));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|layer| layer.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownLayer(s.to_string()))
    }
}
