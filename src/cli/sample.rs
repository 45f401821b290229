use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::{Opts, SamplerOptions};
use crate::preview::render_pairs;
use crate::sampler::{PairDraw, Split};

#[derive(Parser, Debug, Clone)]
pub struct SampleCommand {
    #[command(flatten)]
    pub sampler: SamplerOptions,
    /// 抽样数量
    #[arg(short = 'n', long, value_name = "N", default_value_t = 10)]
    pub count: usize,
    /// 从当前折的测试数据中抽样，要求 k > 1
    #[arg(long)]
    pub test: bool,
    /// 使用第几折，从 0 开始
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub fold: usize,
    /// 将图片对拼接后保存到文件
    #[arg(long, value_name = "FILE")]
    pub preview: Option<PathBuf>,
    /// 预览图中每张图片的边长
    #[arg(long, value_name = "PIXELS", default_value_t = 100)]
    pub image_size: u32,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SampleCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let collection = opts.data_dir().open_collection()?;
        let mut sampler = self.sampler.builder().build(&collection)?;
        for _ in 0..self.fold {
            sampler.advance_fold();
        }
        info!(
            "sampling {} pairs from {} pets, seed {}, fold {}",
            self.count,
            sampler.pool_size(),
            sampler.seed(),
            sampler.current_fold()
        );

        let split = if self.test { Split::Test } else { Split::Train };
        let draws = sampler.pairs(split)?.take(self.count).collect::<Result<Vec<_>, _>>()?;

        if let Some(preview) = &self.preview {
            let pairs = draws.iter().map(PairDraw::open).collect::<Result<Vec<_>, _>>()?;
            render_pairs(&pairs, self.image_size)
                .save(preview)
                .with_context(|| format!("failed to save {}", preview.display()))?;
        }

        print_draws(&draws, self.output_format)
    }
}

fn print_draws(draws: &[PairDraw], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(draws)?),
        OutputFormat::Table => {
            for draw in draws {
                let label = if draw.is_same { "same" } else { "different" };
                println!(
                    "{}\t{}\t{}\t{}",
                    draw.index,
                    label,
                    draw.first.display(),
                    draw.second.display()
                );
            }
        }
    }
    Ok(())
}
