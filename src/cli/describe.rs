use anyhow::Result;
use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::collection::CollectionStats;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct DescribeCommand {
    /// 统计时保留来源重复的记录
    #[arg(long)]
    pub keep_duplicates: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for DescribeCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let collection = opts.data_dir().open_collection()?;
        let stats = collection.describe(!self.keep_duplicates);
        print_stats(&stats, self.output_format)
    }
}

fn print_stats(stats: &CollectionStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::Table => {
            println!("pets\t{}", stats.pets);
            println!("records\t{}", stats.records);
            println!("average\t{:.2}", stats.average_groups_per_pet);
            for (i, count) in stats.sizes.iter().enumerate() {
                println!("{} groups\t{}", i + 1, count);
            }
        }
    }
    Ok(())
}
