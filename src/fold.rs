/// k 折交叉验证的下标映射
///
/// 不对数据做物理切分，而是把逻辑下标按 `count` 为周期交错划分：
/// 每个周期中第 `current` 个位置留作测试，其余位置作为训练。
///
/// 只能在 `count >= 2` 时创建，未启用 k 折用 `Option<KFold>::None` 表示，
/// 这样 `count - 1` 永远不会为 0。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    count: u64,
    current: u64,
}

impl KFold {
    /// `count <= 1` 时返回 None，表示不启用 k 折
    pub fn new(count: usize) -> Option<Self> {
        (count > 1).then_some(Self { count: count as u64, current: 0 })
    }

    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn current(&self) -> usize {
        self.current as usize
    }

    /// 切换到下一折
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }

    /// 训练集第 `i` 项对应的逻辑下标，跳过当前折保留的位置
    #[inline]
    pub fn train_index(&self, i: u64) -> u64 {
        let stride = self.count - 1;
        i + u64::from(i % stride >= self.current) + i / stride
    }

    /// 测试集第 `i` 项对应的逻辑下标
    #[inline]
    pub fn test_index(&self, i: u64) -> u64 {
        self.current + i * self.count
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn fold(count: usize, current: usize) -> KFold {
        let mut fold = KFold::new(count).unwrap();
        for _ in 0..current {
            fold.advance();
        }
        fold
    }

    #[test]
    fn test_disabled() {
        assert!(KFold::new(0).is_none());
        assert!(KFold::new(1).is_none());
        assert!(KFold::new(2).is_some());
    }

    #[test]
    fn test_advance_wraps() {
        let mut fold = KFold::new(3).unwrap();
        let seen: Vec<_> = (0..4)
            .map(|_| {
                let current = fold.current();
                fold.advance();
                current
            })
            .collect();
        assert_eq!(seen, [0, 1, 2, 0]);
    }

    #[test]
    fn test_partition_k5_fold2() {
        let fold = fold(5, 2);
        let train: BTreeSet<u64> = (0..1000).map(|i| fold.train_index(i)).collect();
        let test: BTreeSet<u64> = (0..200).map(|i| fold.test_index(i)).collect();

        assert_eq!(train.len(), 1000);
        assert_eq!(test.len(), 200);
        assert!(train.is_disjoint(&test));

        // 测试下标只到 997，其后的测试位置 1002, 1007, ... 未被访问
        let union: BTreeSet<u64> = train.union(&test).copied().collect();
        let expected: BTreeSet<u64> =
            (0..1250).filter(|i| !(i % 5 == 2 && *i > 997)).collect();
        assert_eq!(union, expected);
        assert_eq!(test.last(), Some(&997));
        assert_eq!(train.last(), Some(&1249));

        // 合并后相邻下标的间隔不超过折数
        let union: Vec<u64> = union.into_iter().collect();
        assert!(union.windows(2).all(|w| w[1] - w[0] <= 5));
    }

    #[test]
    fn test_partition_every_fold() {
        for count in 2..=6 {
            for current in 0..count {
                let fold = fold(count, current);
                let n = 60 * (count as u64 - 1);
                let train: BTreeSet<u64> = (0..n).map(|i| fold.train_index(i)).collect();
                let test: BTreeSet<u64> = (0..60).map(|i| fold.test_index(i)).collect();
                assert!(train.is_disjoint(&test), "k={count} fold={current}");
                let union: Vec<u64> = train.union(&test).copied().collect();
                assert_eq!(union, (0..60 * count as u64).collect::<Vec<_>>());
                assert!(test.iter().all(|i| i % count as u64 == current as u64));
            }
        }
    }

    #[test]
    fn test_train_index_is_monotonic() {
        let fold = fold(4, 0);
        let indices: Vec<u64> = (0..8).map(|i| fold.train_index(i)).collect();
        assert_eq!(indices, [1, 2, 3, 5, 6, 7, 9, 10]);
    }
}
