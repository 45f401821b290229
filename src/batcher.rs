/// 将数据流按固定大小分批
///
/// 只产出完整的批次，有限数据源末尾不足一批的数据会被丢弃。
/// 数据源中的错误会立即返回，当前未凑满的批次随之丢弃。
#[derive(Debug, Clone)]
pub struct Batches<I> {
    source: I,
    batch_size: usize,
}

impl<I> Batches<I> {
    pub fn new(source: I, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self { source, batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<I, T, E> Iterator for Batches<I>
where
    I: Iterator<Item = Result<T, E>>,
{
    type Item = Result<Vec<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.batch_size);
        for item in self.source.by_ref() {
            match item {
                Ok(item) => {
                    batch.push(item);
                    if batch.len() == self.batch_size {
                        return Some(Ok(batch));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

pub trait BatchExt: Iterator + Sized {
    fn batches(self, batch_size: usize) -> Batches<Self> {
        Batches::new(self, batch_size)
    }
}

impl<I: Iterator> BatchExt for I {}

/// 一批图片对，三个列表长度相同
#[derive(Debug, Clone, PartialEq)]
pub struct PairBatch<T> {
    pub first: Vec<T>,
    pub second: Vec<T>,
    /// 是否为同一只宠物
    pub labels: Vec<bool>,
}

impl<T> PairBatch<T> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<T> From<Vec<(T, T, bool)>> for PairBatch<T> {
    fn from(items: Vec<(T, T, bool)>) -> Self {
        let mut batch = PairBatch {
            first: Vec::with_capacity(items.len()),
            second: Vec::with_capacity(items.len()),
            labels: Vec::with_capacity(items.len()),
        };
        for (a, b, label) in items {
            batch.first.push(a);
            batch.second.push(b);
            batch.labels.push(label);
        }
        batch
    }
}
