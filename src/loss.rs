use ndarray::{Array1, ArrayView1, ArrayView3, Axis};

/// 根据图片对的特征向量计算距离和损失
pub trait PairScorer {
    /// 计算每对特征之间的距离
    ///
    /// # Arguments
    ///
    /// * `features` - 形状为 `[N, 2, D]` 的特征
    fn distance(&self, features: ArrayView3<f32>) -> Array1<f32>;

    /// 计算一批图片对的平均损失
    ///
    /// # Arguments
    ///
    /// * `features` - 形状为 `[N, 2, D]` 的特征
    /// * `labels` - 是否为同一只宠物
    /// * `distance` - [`PairScorer::distance`] 的结果
    fn loss(&self, features: ArrayView3<f32>, labels: &[bool], distance: ArrayView1<f32>) -> f32;

    /// 距离不超过该值时认为是同一只宠物
    fn margin(&self) -> f32;
}

/// 对比损失：`0.5 * (y * d^2 + (1 - y) * max(0, m - d)^2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastiveLoss {
    pub margin: f32,
    pub eps: f32,
}

impl Default for ContrastiveLoss {
    fn default() -> Self {
        Self { margin: 1.25, eps: 1e-8 }
    }
}

impl PairScorer for ContrastiveLoss {
    fn distance(&self, features: ArrayView3<f32>) -> Array1<f32> {
        let first = features.index_axis(Axis(1), 0);
        let second = features.index_axis(Axis(1), 1);
        let diff = &first - &second;
        diff.map_axis(Axis(1), |row| (row.dot(&row) + self.eps).sqrt())
    }

    fn loss(&self, _features: ArrayView3<f32>, labels: &[bool], distance: ArrayView1<f32>) -> f32 {
        assert_eq!(labels.len(), distance.len(), "labels and distances must have the same length");
        if labels.is_empty() {
            return 0.0;
        }

        let total: f32 = labels
            .iter()
            .zip(distance.iter())
            .map(|(&same, &d)| {
                if same {
                    0.5 * d * d
                } else {
                    let m = (self.margin - d).max(0.0);
                    0.5 * m * m
                }
            })
            .sum();
        total / labels.len() as f32
    }

    fn margin(&self) -> f32 {
        self.margin
    }
}
