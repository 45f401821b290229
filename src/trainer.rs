use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::{Array1, Array2, Array3, Axis, stack};
use serde::Serialize;

use crate::batcher::PairBatch;
use crate::config::TrainConfig;
use crate::loss::PairScorer;
use crate::metrics::{ConfusionMetrics, average};
use crate::sampler::{PairSampler, Split};
use crate::utils::pb_style;

/// 前若干轮不检查是否需要提前停止
const EARLY_STOPPING_WARMUP: usize = 50;

/// 将图片映射到特征空间的模型
pub trait Encoder {
    /// 返回形状为 `[N, D]` 的特征
    fn embed(&mut self, images: &[RgbImage]) -> Result<Array2<f32>>;

    /// 根据上一次 [`Encoder::embed`] 得到的损失更新参数
    fn update(&mut self, loss: f32) -> Result<()>;

    fn save(&self, path: &Path) -> Result<()>;

    fn load(&mut self, path: &Path) -> Result<()>;
}

/// 一轮训练的统计信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f32,
    pub train: ConfusionMetrics,
    /// 未配置测试数据时为空
    pub test: Option<ConfusionMetrics>,
}

pub struct Trainer<M, S> {
    config: TrainConfig,
    model: M,
    scorer: S,
    sampler: PairSampler,
    run_name: String,
    checkpoint: PathBuf,
}

impl<M: Encoder, S: PairScorer> Trainer<M, S> {
    /// 创建训练器，若已有同名的模型文件则从中继续训练
    pub fn new(config: TrainConfig, mut model: M, scorer: S, sampler: PairSampler) -> Result<Self> {
        let mut run_name = config.run_name.clone();
        if let Some(fold) = sampler.fold() {
            run_name += &format!(" kfold-{}of{}", fold.current(), fold.count());
        }
        let checkpoint = config.model_path.join(format!("model_{run_name}.bin"));

        if checkpoint.exists() {
            info!("找到已有模型，继续训练: {}", checkpoint.display());
            model
                .load(&checkpoint)
                .with_context(|| format!("无法读取模型 {}", checkpoint.display()))?;
        } else {
            info!("未找到已有模型，从头开始训练");
        }
        debug!("训练配置: {:?}", config);

        Ok(Self { config, model, scorer, sampler, run_name, checkpoint })
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_sampler(self) -> PairSampler {
        self.sampler
    }

    /// 训练直到达到指定轮数或提前停止，返回每一轮的统计信息
    pub fn train(&mut self) -> Result<Vec<EpochStats>> {
        let Self { config, model, scorer, sampler, run_name, checkpoint } = self;

        let mut train_data = sampler.batches(config.batch_size, Split::Train)?;
        let mut test_data = if config.test_batch_size == 0 || config.test_batch_count == 0 {
            None
        } else if sampler.fold().is_some() {
            Some(sampler.batches(config.test_batch_size, Split::Test)?)
        } else {
            // 未启用 k 折时直接从训练数据中抽样测试
            Some(sampler.batches(config.test_batch_size, Split::Train)?)
        };

        let mut stats = vec![];
        let mut bad_epochs = 0;
        let mut best_accuracy = 0.0;

        for epoch in 0..config.epochs {
            let pb = if config.use_progress {
                ProgressBar::new(config.batches_per_epoch as u64).with_style(pb_style())
            } else {
                ProgressBar::hidden()
            };
            pb.set_prefix(format!("epoch {epoch} "));

            let mut total_loss = 0.0;
            let mut metrics = Vec::with_capacity(config.batches_per_epoch);
            for batch in train_data.by_ref().take(config.batches_per_epoch) {
                let batch = batch?;
                let (features, distance) = score_batch(model, scorer, &batch)?;
                let loss = scorer.loss(features.view(), &batch.labels, distance.view());
                model.update(loss)?;

                total_loss += loss;
                metrics.push(ConfusionMetrics::from_batch(
                    &batch.labels,
                    distance.view(),
                    scorer.margin(),
                ));
                pb.inc(1);
                pb.set_message(format!("loss: {:.3}", total_loss / metrics.len() as f32));
            }
            pb.finish_and_clear();

            let loss = total_loss / config.batches_per_epoch.max(1) as f32;
            let train = average(&metrics);

            let test = match test_data.as_mut() {
                Some(data) => Some(evaluate_batches(
                    model,
                    scorer,
                    data.by_ref().take(config.test_batch_count),
                )?),
                None => None,
            };

            if epoch > EARLY_STOPPING_WARMUP {
                if let Some(test) = &test {
                    if test.accuracy() <= best_accuracy {
                        bad_epochs += 1;
                    } else {
                        bad_epochs = 0;
                        best_accuracy = test.accuracy();
                    }
                }
            }
            let stop = bad_epochs > config.early_stopping_epochs;

            info!("第 {} 轮 - 平均损失: {:.3} - 平均准确率: {:.3}", epoch, loss, train.accuracy());
            if let Some(test) = &test {
                info!("第 {} 轮 - 测试准确率: {:.3}", epoch, test.accuracy());
            }

            let periodic = config.save_model_every > 0 && epoch % config.save_model_every == 0;
            if periodic || epoch + 1 == config.epochs || stop {
                save_model(model, &config.model_path, checkpoint)?;
            }

            stats.push(EpochStats { epoch, loss, train, test });
            if stop {
                info!("{}: 测试准确率不再提升，在第 {} 轮提前停止", run_name, epoch);
                break;
            }
        }

        Ok(stats)
    }

    /// 在未划分的数据上测试当前模型
    pub fn evaluate(&mut self) -> Result<ConfusionMetrics> {
        let batches = self.sampler.batches(self.config.test_batch_size, Split::Train)?;
        evaluate_batches(&mut self.model, &self.scorer, batches.take(self.config.test_batch_count))
    }
}

/// 依次训练每一折，每一折使用新的模型
///
/// # Arguments
///
/// * `config` - 训练配置
/// * `sampler` - 抽样器，应当处于第 0 折
/// * `new_model` - 创建模型
/// * `scorer` - 损失函数
pub fn run_k_fold<M, S, F>(
    config: &TrainConfig,
    mut sampler: PairSampler,
    mut new_model: F,
    scorer: S,
) -> Result<Vec<Vec<EpochStats>>>
where
    M: Encoder,
    S: PairScorer + Clone,
    F: FnMut() -> Result<M>,
{
    let folds = sampler.fold_count().unwrap_or(1);
    let mut results = Vec::with_capacity(folds);
    for _ in 0..folds {
        let mut trainer = Trainer::new(config.clone(), new_model()?, scorer.clone(), sampler)?;
        info!("开始训练 {}", trainer.run_name());
        results.push(trainer.train()?);
        sampler = trainer.into_sampler();
        sampler.advance_fold();
    }
    Ok(results)
}

fn score_batch<M: Encoder, S: PairScorer>(
    model: &mut M,
    scorer: &S,
    batch: &PairBatch<RgbImage>,
) -> Result<(Array3<f32>, Array1<f32>)> {
    let first = model.embed(&batch.first)?;
    let second = model.embed(&batch.second)?;
    let features = stack(Axis(1), &[first.view(), second.view()])?;
    let distance = scorer.distance(features.view());
    Ok((features, distance))
}

fn evaluate_batches<M, S, I>(model: &mut M, scorer: &S, batches: I) -> Result<ConfusionMetrics>
where
    M: Encoder,
    S: PairScorer,
    I: Iterator<Item = crate::error::Result<PairBatch<RgbImage>>>,
{
    let mut metrics = vec![];
    for batch in batches {
        let batch = batch?;
        let (_, distance) = score_batch(model, scorer, &batch)?;
        metrics.push(ConfusionMetrics::from_batch(&batch.labels, distance.view(), scorer.margin()));
    }
    Ok(average(&metrics))
}

fn save_model<M: Encoder>(model: &M, model_path: &Path, checkpoint: &Path) -> Result<()> {
    info!("保存模型: {}", checkpoint.display());
    fs::create_dir_all(model_path)?;
    model.save(checkpoint)
}
