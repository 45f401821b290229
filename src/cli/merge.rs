use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::collection::PetCollection;
use crate::config::{Opts, PROCESSED_FILE_NAME};

#[derive(Parser, Debug, Clone)]
pub struct MergeCommand {
    /// 被合并的数据目录，例如预处理输出的 `thread_*` 目录
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,
}

impl SubCommandExtend for MergeCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let data_dir = opts.data_dir();
        let mut collection = data_dir.open_collection()?;

        for source in &self.sources {
            let other = PetCollection::open(source, data_dir.info_file_name())
                .with_context(|| format!("failed to open {}", source.display()))?;
            collection.merge_from(&other)?;
            collection.save()?;

            // 已处理的原始图片列表也一并合并，避免重复预处理
            let processed = source.join(PROCESSED_FILE_NAME);
            if processed.exists() {
                let content = fs::read_to_string(&processed)?;
                let mut output = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(data_dir.processed_file())?;
                output.write_all(content.as_bytes())?;
            }
        }

        info!("合并完成，共 {} 条记录", collection.len());
        Ok(())
    }
}
