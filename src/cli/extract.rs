use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, parse_size};
use crate::extract::{Letterbox, extract_parallel, processed_paths};
use crate::labeled::LabeledImages;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    /// 爬虫输出的数据文件，每行包含 savedPath 和 petId
    pub info_file: PathBuf,
    /// 并行处理的线程数
    #[arg(short, long, value_name = "N", default_value_t = num_cpus::get())]
    pub threads: usize,
    /// 输出图片尺寸
    #[arg(short = 'S', long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "384x384")]
    pub size: (u32, u32),
    /// 每处理多少张图片保存一次结果
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub batch_size: usize,
}

impl SubCommandExtend for ExtractCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        if self.batch_size == 0 {
            bail!("--batch-size 必须大于 0");
        }
        let data_dir = opts.data_dir();
        let processed = processed_paths(data_dir.path())?;
        let data = LabeledImages::load_from_file(&self.info_file, &processed)?;
        info!("跳过 {} 张已处理的图片，剩余 {} 张", processed.len(), data.len());

        let extractor = Letterbox { width: self.size.0, height: self.size.1 };
        extract_parallel(&data, data_dir.path(), self.threads, &extractor, self.batch_size)?;
        info!("处理完成，可使用 merge 命令合并 thread_* 目录");
        Ok(())
    }
}
