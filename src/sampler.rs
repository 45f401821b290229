use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{debug, info};
use rand::seq::{IndexedRandom, index};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::batcher::{BatchExt, PairBatch};
use crate::collection::{PetCollection, PetRecord};
use crate::error::{DatasetError, Result};
use crate::fold::KFold;
use crate::utils::imread;

/// 一次抽样的结果
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PairDraw {
    /// 抽样使用的逻辑下标
    pub index: u64,
    pub first: PathBuf,
    pub second: PathBuf,
    pub is_same: bool,
}

impl PairDraw {
    /// 读取两张图片
    pub fn open(&self) -> Result<(RgbImage, RgbImage, bool)> {
        Ok((imread(&self.first)?, imread(&self.second)?, self.is_same))
    }

    pub fn into_paths(self) -> (PathBuf, PathBuf, bool) {
        (self.first, self.second, self.is_same)
    }
}

/// 从哪一部分数据中抽样
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// 训练数据，启用 k 折时跳过当前折保留的下标
    Train,
    /// 当前折保留的测试数据，要求启用 k 折
    Test,
}

#[derive(Debug, Clone)]
struct EligiblePet {
    pet_id: i64,
    groups: Vec<Vec<PathBuf>>,
}

#[derive(Debug, Clone)]
pub struct PairSamplerBuilder {
    same_probability: f64,
    fold_count: Option<usize>,
    seed: Option<u64>,
}

impl Default for PairSamplerBuilder {
    fn default() -> Self {
        Self { same_probability: 0.5, fold_count: None, seed: None }
    }
}

impl PairSamplerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 抽到同一只宠物的概率
    pub fn same_probability(mut self, same_probability: f64) -> Self {
        self.same_probability = same_probability;
        self
    }

    /// k 折交叉验证的折数，小于等于 1 时不启用
    pub fn fold_count(mut self, fold_count: impl Into<Option<usize>>) -> Self {
        self.fold_count = fold_count.into();
        self
    }

    /// 随机种子，不指定时随机生成
    pub fn seed(mut self, seed: impl Into<Option<u64>>) -> Self {
        self.seed = seed.into();
        self
    }

    /// 从图片集合构建，记录中的路径会相对集合目录解析
    pub fn build(self, collection: &PetCollection) -> Result<PairSampler> {
        self.build_with(collection.records(), |path| collection.resolve(path))
    }

    /// 直接从记录构建，路径原样使用
    pub fn build_from_records(self, records: &[PetRecord]) -> Result<PairSampler> {
        self.build_with(records, |path| Path::new(path).to_path_buf())
    }

    fn build_with<F>(self, records: &[PetRecord], resolve: F) -> Result<PairSampler>
    where
        F: Fn(&str) -> PathBuf,
    {
        if !(0.0..=1.0).contains(&self.same_probability) {
            return Err(DatasetError::InvalidConfiguration(format!(
                "same pet probability must be within [0, 1], got {}",
                self.same_probability
            )));
        }

        // 按 pet_id 分组，空的照片组不参与抽样
        let mut grouped = BTreeMap::<i64, Vec<Vec<PathBuf>>>::new();
        for record in records {
            let groups = grouped.entry(record.pet_id).or_default();
            for group in record.paths.iter().filter(|group| !group.is_empty()) {
                groups.push(group.iter().map(|path| resolve(path.as_str())).collect());
            }
        }

        // 只有一组照片的宠物无法组成同一宠物的图片对
        let total = grouped.len();
        let pets: Vec<EligiblePet> = grouped
            .into_iter()
            .filter(|(_, groups)| groups.len() > 1)
            .map(|(pet_id, groups)| EligiblePet { pet_id, groups })
            .collect();
        info!("{} of {} pets are eligible for pairing", pets.len(), total);

        if pets.len() < 2 {
            return Err(DatasetError::InvalidConfiguration(format!(
                "at least 2 pets with multiple photo groups are required, found {}",
                pets.len()
            )));
        }

        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        debug!("pair sampler seed: {seed}");

        Ok(PairSampler {
            pets,
            seed,
            same_probability: self.same_probability,
            fold: self.fold_count.and_then(KFold::new),
        })
    }
}

/// 图片对抽样器
///
/// 每个逻辑下标 `idx` 都确定地对应一次抽样：以 `idx ^ seed` 为种子创建私有的随机数生成器，
/// 因此同样的下标总是得到同样的结果，也不会影响其他地方的随机数序列。
#[derive(Debug, Clone)]
pub struct PairSampler {
    pets: Vec<EligiblePet>,
    seed: u64,
    same_probability: f64,
    fold: Option<KFold>,
}

impl PairSampler {
    pub fn builder() -> PairSamplerBuilder {
        PairSamplerBuilder::new()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn same_probability(&self) -> f64 {
        self.same_probability
    }

    /// 参与抽样的宠物数量
    pub fn pool_size(&self) -> usize {
        self.pets.len()
    }

    /// 参与抽样的宠物 id，按升序排列
    pub fn pet_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.pets.iter().map(|pet| pet.pet_id)
    }

    pub fn fold(&self) -> Option<&KFold> {
        self.fold.as_ref()
    }

    pub fn fold_count(&self) -> Option<usize> {
        self.fold.map(|fold| fold.count())
    }

    /// 当前折，未启用 k 折时为 0
    pub fn current_fold(&self) -> usize {
        self.fold.map_or(0, |fold| fold.current())
    }

    /// 切换到下一折，未启用 k 折时不做任何事
    pub fn advance_fold(&mut self) {
        if let Some(fold) = self.fold.as_mut() {
            fold.advance();
            debug!("advanced to fold {}/{}", fold.current(), fold.count());
        }
    }

    /// 按逻辑下标抽取一对图片
    pub fn draw(&self, idx: u64) -> Result<PairDraw> {
        let mut rng = ChaCha8Rng::seed_from_u64(idx ^ self.seed);
        let n = self.pets.len();

        let first = rng.random_range(0..n);
        let is_same = rng.random::<f64>() < self.same_probability;
        let pet = &self.pets[first];

        let (group1, group2) = if is_same {
            if pet.groups.len() < 2 {
                return Err(DatasetError::Logic(format!(
                    "pet {} has a single photo group but was drawn for a same pair",
                    pet.pet_id
                )));
            }
            let picked = index::sample(&mut rng, pet.groups.len(), 2);
            (&pet.groups[picked.index(0)], &pet.groups[picked.index(1)])
        } else {
            let group1 = choose(&pet.groups, &mut rng, pet.pet_id)?;

            let mut second = rng.random_range(0..n);
            while second == first {
                second = rng.random_range(0..n);
            }
            let other = &self.pets[second];
            (group1, choose(&other.groups, &mut rng, other.pet_id)?)
        };

        let first_path = choose(group1, &mut rng, pet.pet_id)?;
        let second_path = choose(group2, &mut rng, pet.pet_id)?;
        // NOTE: 以上随机数的抽取顺序决定了每个下标的结果，不能随意调整

        Ok(PairDraw {
            index: idx,
            first: first_path.clone(),
            second: second_path.clone(),
            is_same,
        })
    }

    /// 训练集第 `i` 项，启用 k 折时会跳过当前折保留的下标
    pub fn train_item(&self, i: u64) -> Result<PairDraw> {
        match &self.fold {
            Some(fold) => self.draw(fold.train_index(i)),
            None => self.draw(i),
        }
    }

    /// 当前折测试集的第 `i` 项
    pub fn test_item(&self, i: u64) -> Result<PairDraw> {
        match &self.fold {
            Some(fold) => self.draw(fold.test_index(i)),
            None => Err(no_test_split()),
        }
    }

    /// 逻辑上无限的抽样序列
    pub fn pairs(&self, split: Split) -> Result<PairStream<'_>> {
        let end = match (split, &self.fold) {
            (Split::Train, _) => u64::MAX / 2,
            (Split::Test, Some(fold)) => u64::MAX / fold.count() as u64,
            (Split::Test, None) => return Err(no_test_split()),
        };
        Ok(PairStream { sampler: self, split, next: 0, end })
    }

    /// 按批读取图片对
    pub fn batches(
        &self,
        batch_size: usize,
        split: Split,
    ) -> Result<impl Iterator<Item = Result<PairBatch<RgbImage>>> + '_> {
        Ok(self
            .pairs(split)?
            .map(|draw| draw.and_then(|draw| draw.open()))
            .batches(batch_size)
            .map(|batch| batch.map(PairBatch::from)))
    }

    /// 按批返回图片路径，不读取图片
    pub fn path_batches(
        &self,
        batch_size: usize,
        split: Split,
    ) -> Result<impl Iterator<Item = Result<PairBatch<PathBuf>>> + '_> {
        Ok(self
            .pairs(split)?
            .map(|draw| draw.map(PairDraw::into_paths))
            .batches(batch_size)
            .map(|batch| batch.map(PairBatch::from)))
    }
}

fn choose<'a, T>(items: &'a [T], rng: &mut ChaCha8Rng, pet_id: i64) -> Result<&'a T> {
    items
        .choose(rng)
        .ok_or_else(|| DatasetError::Logic(format!("empty photo group selected for pet {pet_id}")))
}

fn no_test_split() -> DatasetError {
    DatasetError::InvalidConfiguration(
        "no test items without k-fold, set a fold count greater than 1".to_string(),
    )
}

/// 按逻辑下标顺序抽样的迭代器
#[derive(Debug, Clone)]
pub struct PairStream<'a> {
    sampler: &'a PairSampler,
    split: Split,
    next: u64,
    end: u64,
}

impl PairStream<'_> {
    /// 下一次抽样使用的序号
    pub fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for PairStream<'_> {
    type Item = Result<PairDraw>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let i = self.next;
        self.next += 1;
        Some(match self.split {
            Split::Train => self.sampler.train_item(i),
            Split::Test => self.sampler.test_item(i),
        })
    }
}
