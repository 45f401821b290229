use std::iter::Sum;
use std::ops::{Add, Div};

use ndarray::ArrayView1;
use serde::Serialize;

/// 一批图片对的混淆矩阵，各项为占批大小的比例
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConfusionMetrics {
    /// 不同宠物，判断为不同
    pub different: f32,
    /// 不同宠物，误判为同一只
    pub false_same: f32,
    /// 同一只宠物，误判为不同
    pub false_different: f32,
    /// 同一只宠物，判断为同一只
    pub same: f32,
}

impl ConfusionMetrics {
    /// 距离不超过 `margin` 视为预测同一只宠物
    pub fn from_batch(labels: &[bool], distance: ArrayView1<f32>, margin: f32) -> Self {
        assert_eq!(labels.len(), distance.len(), "labels and distances must have the same length");
        let mut counts = [0usize; 4];
        for (&label, &d) in labels.iter().zip(distance.iter()) {
            counts[2 * label as usize + (d <= margin) as usize] += 1;
        }

        let n = labels.len().max(1) as f32;
        Self {
            different: counts[0] as f32 / n,
            false_same: counts[1] as f32 / n,
            false_different: counts[2] as f32 / n,
            same: counts[3] as f32 / n,
        }
    }

    pub fn accuracy(&self) -> f32 {
        self.different + self.same
    }
}

impl Add for ConfusionMetrics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            different: self.different + rhs.different,
            false_same: self.false_same + rhs.false_same,
            false_different: self.false_different + rhs.false_different,
            same: self.same + rhs.same,
        }
    }
}

impl Div<f32> for ConfusionMetrics {
    type Output = Self;

    fn div(self, rhs: f32) -> Self {
        Self {
            different: self.different / rhs,
            false_same: self.false_same / rhs,
            false_different: self.false_different / rhs,
            same: self.same / rhs,
        }
    }
}

impl Sum for ConfusionMetrics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// 多批结果的平均值，没有数据时返回全零
pub fn average(metrics: &[ConfusionMetrics]) -> ConfusionMetrics {
    if metrics.is_empty() {
        return ConfusionMetrics::default();
    }
    metrics.iter().copied().sum::<ConfusionMetrics>() / metrics.len() as f32
}
