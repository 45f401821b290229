use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::cli::SubCommandExtend;
use crate::collection::RecordImage;
use crate::config::Opts;
use crate::utils::{IMAGE_EXTENSION, imread, pb_style};

#[derive(Parser, Debug, Clone)]
pub struct ImportCommand {
    /// 图片所在目录，按 `<pet_id>/<图片>` 的结构存放
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 每导入多少张图片保存一次数据文件
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub save_every: usize,
}

impl SubCommandExtend for ImportCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = format!("(?i)^({})$", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).context("invalid suffix")?;

        let mut collection = opts.data_dir().open_collection()?;
        let mut sources: HashSet<String> =
            collection.records().iter().map(|r| r.source.clone()).collect();

        let entries = scan_images(&self.path, &re_suf)?;
        let pb = ProgressBar::new(entries.len() as u64).with_style(pb_style());

        let mut added = 0;
        for (path, pet_id) in entries {
            pb.inc(1);
            let source = path.to_string_lossy().into_owned();
            if !sources.insert(source.clone()) {
                pb.set_message(format!("跳过图片: {}", source));
                continue;
            }

            let image = if path.extension().is_some_and(|ext| ext == IMAGE_EXTENSION) {
                RecordImage::File(path.clone())
            } else {
                imread(&path)?.into()
            };
            collection.add_record(vec![image], pet_id, source)?;
            added += 1;

            if self.save_every > 0 && added % self.save_every == 0 {
                collection.save()?;
            }
        }
        pb.finish_and_clear();

        collection.save()?;
        info!("导入 {} 张图片，共 {} 条记录", added, collection.len());
        Ok(())
    }
}

/// 扫描 `<root>/<pet_id>/` 下的图片，返回图片路径和宠物 id
fn scan_images(root: &Path, re_suf: &Regex) -> Result<Vec<(PathBuf, i64)>> {
    let mut entries = vec![];
    for entry in WalkDir::new(root).min_depth(2).max_depth(2).sort_by_file_name() {
        let entry = entry?;
        let path = entry.into_path();
        if !path.is_file()
            || !path.extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
        {
            continue;
        }

        let pet_id = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<i64>().ok());
        match pet_id {
            Some(pet_id) => entries.push((path, pet_id)),
            None => warn!("无法从目录名解析宠物 id: {}", path.display()),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_images() {
        let dir = tempdir().unwrap();
        for (pet, name) in [("1", "a.jpg"), ("1", "b.PNG"), ("2", "c.txt"), ("cat", "d.jpg")] {
            fs::create_dir_all(dir.path().join(pet)).unwrap();
            fs::write(dir.path().join(pet).join(name), b"").unwrap();
        }
        fs::write(dir.path().join("top.jpg"), b"").unwrap();

        let re = Regex::new("(?i)^(jpg|png)$").unwrap();
        let entries = scan_images(dir.path(), &re).unwrap();
        let ids: Vec<i64> = entries.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, [1, 1]);
        assert!(entries[0].0.ends_with("1/a.jpg"));
    }
}
