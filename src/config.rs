use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::Context;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::cli::*;
use crate::collection::PetCollection;
use crate::error::Result;
use crate::loss::ContrastiveLoss;
use crate::sampler::{PairSampler, PairSamplerBuilder};

/// 默认的数据文件名
pub const INFO_FILE_NAME: &str = "train.data";
/// 记录已处理原始图片的文件名
pub const PROCESSED_FILE_NAME: &str = "processed.txt";

static DATA_DIR: LazyLock<DataDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "lostpaw", "lostpaw").expect("failed to get project dir");
    DataDir { path: proj_dirs.data_dir().to_path_buf(), info_file: INFO_FILE_NAME.to_string() }
});

fn default_data_dir() -> &'static str {
    DATA_DIR.path().to_str().expect("data dir is not valid utf-8")
}

#[derive(Parser, Debug, Clone)]
pub struct SamplerOptions {
    /// 抽到同一只宠物的概率
    #[arg(long, value_name = "P", default_value_t = 0.5, value_parser = parse_probability)]
    pub similarity_probability: f64,
    /// k 折交叉验证的折数，1 表示不启用
    #[arg(short = 'k', long, value_name = "K", default_value_t = 1)]
    pub cross_validiton_k_fold: usize,
    /// 随机种子，不指定时随机生成
    #[arg(long)]
    pub seed: Option<u64>,
}

impl SamplerOptions {
    pub fn builder(&self) -> PairSamplerBuilder {
        PairSampler::builder()
            .same_probability(self.similarity_probability)
            .fold_count(self.cross_validiton_k_fold)
            .seed(self.seed)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "lostpaw", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，包含数据文件和按宠物 id 分目录保存的图片
    #[arg(short, long, default_value = default_data_dir())]
    pub data_dir: DataDir,
    /// 数据目录中的数据文件名
    #[arg(long, value_name = "NAME", default_value = INFO_FILE_NAME)]
    pub info_file: String,
}

impl Opts {
    /// 返回设置了数据文件名的数据目录
    pub fn data_dir(&self) -> DataDir {
        let mut data_dir = self.data_dir.clone();
        data_dir.set_info_file(self.info_file.clone());
        data_dir
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 统计每只宠物的照片组数量
    Describe(DescribeCommand),
    /// 从按宠物 id 分目录存放的图片中导入记录
    Import(ImportCommand),
    /// 将其他数据目录合并到当前目录
    Merge(MergeCommand),
    /// 去重，或划分出测试集
    Clean(CleanCommand),
    /// 并行预处理原始照片
    Extract(ExtractCommand),
    /// 抽样图片对，用于检查抽样结果
    Sample(SampleCommand),
}

#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
    info_file: String,
}

impl DataDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn set_info_file(&mut self, info_file: String) {
        self.info_file = info_file;
    }

    pub fn info_file_name(&self) -> &str {
        &self.info_file
    }

    /// 返回数据文件的路径
    pub fn info_file(&self) -> PathBuf {
        self.path.join(&self.info_file)
    }

    /// 返回 processed.txt 的路径
    pub fn processed_file(&self) -> PathBuf {
        self.path.join(PROCESSED_FILE_NAME)
    }

    /// 打开数据目录中的图片集合
    pub fn open_collection(&self) -> Result<PetCollection> {
        PetCollection::open(&self.path, &self.info_file)
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s), info_file: INFO_FILE_NAME.to_string() })
    }
}

/// 训练配置，字段名与旧版的配置文件保持一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// 数据文件路径
    pub info_path: PathBuf,
    /// 模型保存目录
    pub model_path: PathBuf,
    pub run_name: String,
    pub similarity_probability: f64,
    pub cross_validiton_k_fold: usize,
    pub batches_per_epoch: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub test_batch_count: usize,
    pub save_model_every: usize,
    pub early_stopping_epochs: usize,
    pub contrastive_margin: f32,
    pub contrastive_epsilon: f32,
    /// 是否显示进度条
    pub use_progress: bool,
    pub latent_space_size: usize,
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            info_path: PathBuf::from(INFO_FILE_NAME),
            model_path: PathBuf::from("models"),
            run_name: "lostpaw".to_string(),
            similarity_probability: 0.5,
            cross_validiton_k_fold: 1,
            batches_per_epoch: 128,
            epochs: 100,
            batch_size: 16,
            test_batch_size: 16,
            test_batch_count: 8,
            save_model_every: 10,
            early_stopping_epochs: 15,
            contrastive_margin: 1.25,
            contrastive_epsilon: 1e-8,
            use_progress: false,
            latent_space_size: 1024,
            seed: None,
        }
    }
}

impl TrainConfig {
    /// 从 JSON 文件读取配置，缺失的字段使用默认值
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn sampler_builder(&self) -> PairSamplerBuilder {
        PairSampler::builder()
            .same_probability(self.similarity_probability)
            .fold_count(self.cross_validiton_k_fold)
            .seed(self.seed)
    }

    /// 按配置中的 margin 和 epsilon 创建对比损失
    pub fn scorer(&self) -> ContrastiveLoss {
        ContrastiveLoss { margin: self.contrastive_margin, eps: self.contrastive_epsilon }
    }

    /// 打开 `info_path` 指向的图片集合并创建抽样器
    pub fn open_sampler(&self) -> anyhow::Result<PairSampler> {
        let folder = self.info_path.parent().unwrap_or(Path::new(""));
        let name = self
            .info_path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("invalid info path {}", self.info_path.display()))?;
        let collection = PetCollection::open(folder, name)?;
        Ok(self.sampler_builder().build(&collection)?)
    }
}

pub fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("invalid size: {}", s));
    }
    let (width, height): (u32, u32) = (parts[0].parse()?, parts[1].parse()?);
    if width == 0 || height == 0 {
        return Err(anyhow::anyhow!("size must be positive: {}", s));
    }
    Ok((width, height))
}

fn parse_probability(s: &str) -> anyhow::Result<f64> {
    let p: f64 = s.parse()?;
    if !(0.0..=1.0).contains(&p) {
        return Err(anyhow::anyhow!("probability must be within [0, 1]: {}", s));
    }
    Ok(p)
}
