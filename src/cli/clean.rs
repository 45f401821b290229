use anyhow::{Result, bail};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::utils::read_line;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    /// 删除来源重复的记录及其图片
    #[arg(long)]
    pub deduplicate: bool,
    /// 将一部分宠物移动到新的数据文件中作为测试集
    #[arg(long, value_name = "NAME")]
    pub split_to: Option<String>,
    /// 测试集宠物所占比例
    #[arg(long, value_name = "RATIO", default_value_t = 0.1)]
    pub split_percentage: f64,
    /// 划分测试集使用的随机种子
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// 不再询问，直接修改数据文件
    #[arg(short, long)]
    pub yes: bool,
}

impl SubCommandExtend for CleanCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        if !self.deduplicate && self.split_to.is_none() {
            bail!("nothing to do, use --deduplicate or --split-to");
        }

        let data_dir = opts.data_dir();
        if !self.yes {
            let answer = read_line(&format!("将修改 {}，是否继续？[y/N] ", data_dir.info_file().display()))?;
            if !answer.eq_ignore_ascii_case("y") {
                info!("已取消");
                return Ok(());
            }
        }

        let mut collection = data_dir.open_collection()?;
        if self.deduplicate {
            collection.deduplicate()?;
        }

        if let Some(name) = &self.split_to {
            if data_dir.path().join(name).exists() {
                bail!("{} already exists", name);
            }
            let (train, test) = collection.split_test(name, self.split_percentage, self.seed)?;
            test.save()?;
            train.save()?;
            info!("划分出 {} 条测试记录，剩余 {} 条训练记录", test.len(), train.len());
        }
        Ok(())
    }
}
