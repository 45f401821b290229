use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use image::RgbImage;
use image::imageops::{self, FilterType};
use indicatif::ProgressBar;
use log::info;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::collection::PetCollection;
use crate::config::{INFO_FILE_NAME, PROCESSED_FILE_NAME};
use crate::labeled::LabeledImages;
use crate::utils::pb_style_speed;

/// 从原始照片中裁剪出宠物
pub trait PetExtractor: Send + Sync {
    /// 返回照片中所有宠物的裁剪图片，可能为空
    fn extract(&self, image: &RgbImage) -> Result<Vec<RgbImage>>;
}

/// 不做检测，直接把整张照片等比缩放并用黑色填充到固定尺寸
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub width: u32,
    pub height: u32,
}

impl PetExtractor for Letterbox {
    fn extract(&self, image: &RgbImage) -> Result<Vec<RgbImage>> {
        Ok(vec![letterbox(image, self.width, self.height)])
    }
}

/// 等比缩放到 `width x height` 以内，居中放置，其余部分填充黑色
pub fn letterbox(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (ow, oh) = image.dimensions();
    let mut output = RgbImage::new(width, height);
    if ow == 0 || oh == 0 || width == 0 || height == 0 {
        return output;
    }

    let scale = (width as f64 / ow as f64).min(height as f64 / oh as f64);
    let nw = ((ow as f64 * scale) as u32).clamp(1, width);
    let nh = ((oh as f64 * scale) as u32).clamp(1, height);
    let resized = imageops::resize(image, nw, nh, FilterType::Triangle);

    let x = (width - nw) / 2;
    let y = (height - nh) / 2;
    imageops::overlay(&mut output, &resized, x as i64, y as i64);
    output
}

/// 第 i 个预处理 worker 的输出目录
pub fn thread_dir(output_dir: &Path, i: usize) -> PathBuf {
    output_dir.join(format!("thread_{i}"))
}

/// 收集输出目录下所有 processed.txt 中记录的路径
pub fn processed_paths(output_dir: &Path) -> Result<HashSet<String>> {
    let mut processed = HashSet::new();
    if !output_dir.exists() {
        return Ok(processed);
    }
    for entry in WalkDir::new(output_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() != PROCESSED_FILE_NAME {
            continue;
        }
        let content = fs::read_to_string(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        processed.extend(content.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from));
    }
    Ok(processed)
}

/// 将图片列表切分给多个 worker 并行处理
///
/// 第 i 个 worker 只处理第 i 段数据，结果写入 `output_dir/thread_{i}`，
/// 其中包含独立的数据文件和 processed.txt。所有 worker 结束后才返回，
/// 若有 worker 失败则返回第一个错误，已写入的内容保留在硬盘上。
///
/// 返回新增的记录数量
pub fn extract_parallel<E: PetExtractor>(
    data: &LabeledImages,
    output_dir: &Path,
    workers: usize,
    extractor: &E,
    batch_size: usize,
) -> Result<usize> {
    if batch_size == 0 {
        bail!("batch size must be positive");
    }
    let workers = workers.max(1);
    let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;
    let pb = ProgressBar::new(data.len() as u64).with_style(pb_style_speed());

    info!("extracting {} images with {} workers", data.len(), workers);
    let results: Vec<Result<usize>> = pool.install(|| {
        data.split(workers)
            .into_par_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let dir = thread_dir(output_dir, i);
                extract_chunk(&chunk, &dir, extractor, batch_size, &pb)
                    .with_context(|| format!("worker {i} failed"))
            })
            .collect()
    });
    pb.finish_with_message("done");

    let mut total = 0;
    for result in results {
        total += result?;
    }
    info!("extracted {} pets", total);
    Ok(total)
}

fn extract_chunk<E: PetExtractor>(
    chunk: &LabeledImages,
    dir: &Path,
    extractor: &E,
    batch_size: usize,
    pb: &ProgressBar,
) -> Result<usize> {
    let mut collection = PetCollection::open(dir, INFO_FILE_NAME)?;
    let mut processed = BufWriter::new(
        OpenOptions::new().create(true).append(true).open(dir.join(PROCESSED_FILE_NAME))?,
    );

    let mut records = 0;
    for (i, item) in chunk.iter_with_path().enumerate() {
        let (image, pet_id, path) = item?;
        let crops = extractor.extract(&image)?;
        for crop in crops {
            collection.add_record(vec![crop.into()], pet_id, path.clone())?;
            records += 1;
        }
        writeln!(processed, "{path}")?;
        pb.inc(1);

        // 每批处理完后落盘，中途崩溃时已处理的部分不会丢失
        if (i + 1) % batch_size == 0 {
            collection.save()?;
            processed.flush()?;
        }
    }

    collection.save()?;
    processed.flush()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    use crate::labeled::LabeledImage;

    #[test]
    fn test_letterbox_wide() {
        let image = RgbImage::from_pixel(40, 20, Rgb([255, 255, 255]));
        let output = letterbox(&image, 10, 10);
        assert_eq!(output.dimensions(), (10, 10));
        // 上下填充黑色，中间是原图
        assert_eq!(output.get_pixel(5, 0), &Rgb([0, 0, 0]));
        assert_eq!(output.get_pixel(5, 5), &Rgb([255, 255, 255]));
        assert_eq!(output.get_pixel(5, 9), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_letterbox_tall() {
        let image = RgbImage::from_pixel(10, 40, Rgb([255, 255, 255]));
        let output = letterbox(&image, 8, 8);
        assert_eq!(output.get_pixel(0, 4), &Rgb([0, 0, 0]));
        assert_eq!(output.get_pixel(4, 4), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_letterbox_zero_size() {
        let image = RgbImage::new(4, 4);
        assert_eq!(letterbox(&image, 0, 8).dimensions(), (0, 8));
        assert_eq!(letterbox(&image, 8, 0).dimensions(), (8, 0));
    }

    #[test]
    fn test_processed_paths() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("thread_0")).unwrap();
        fs::create_dir_all(dir.path().join("thread_1")).unwrap();
        fs::write(dir.path().join("thread_0/processed.txt"), "a.jpg\nb.jpg\n").unwrap();
        fs::write(dir.path().join("thread_1/processed.txt"), "c.jpg\n\n").unwrap();
        fs::write(dir.path().join("other.txt"), "d.jpg\n").unwrap();

        let processed = processed_paths(dir.path()).unwrap();
        assert_eq!(processed.len(), 3);
        assert!(processed.contains("c.jpg"));
        assert!(processed_paths(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_extract_parallel() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let images = (0..7)
            .map(|i| {
                RgbImage::new(12, 6).save(input.path().join(format!("{i}.png"))).unwrap();
                LabeledImage { path: format!("{i}.png"), pet_id: i / 2 }
            })
            .collect();
        let data = LabeledImages::new(input.path(), images);

        let extractor = Letterbox { width: 8, height: 8 };
        let total = extract_parallel(&data, output.path(), 3, &extractor, 2).unwrap();
        assert_eq!(total, 7);

        // 3 个 worker 分别处理 3, 3, 1 张图片
        let sizes: Vec<usize> = (0..3)
            .map(|i| {
                PetCollection::open(thread_dir(output.path(), i), INFO_FILE_NAME)
                    .unwrap()
                    .len()
            })
            .collect();
        assert_eq!(sizes, [3, 3, 1]);
        assert_eq!(processed_paths(output.path()).unwrap().len(), 7);
    }

    #[test]
    fn test_extract_worker_failure() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let images = vec![LabeledImage { path: "missing.png".into(), pet_id: 1 }];
        let data = LabeledImages::new(input.path(), images);

        let extractor = Letterbox { width: 8, height: 8 };
        assert!(extract_parallel(&data, output.path(), 2, &extractor, 1).is_err());
    }

    #[test]
    fn test_extract_zero_batch_size() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        RgbImage::new(4, 4).save(input.path().join("0.png")).unwrap();
        let images = vec![LabeledImage { path: "0.png".into(), pet_id: 1 }];
        let data = LabeledImages::new(input.path(), images);

        let extractor = Letterbox { width: 8, height: 8 };
        let err = extract_parallel(&data, output.path(), 1, &extractor, 0).unwrap_err();
        assert!(err.to_string().contains("batch size"));
        assert!(!thread_dir(output.path(), 0).exists());
    }
}
