use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{debug, warn};
use serde::Deserialize;

use crate::batcher::{BatchExt, Batches};
use crate::error::{DatasetError, Result};
use crate::utils::imread;

/// 一张带宠物 id 的原始图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    /// 相对于数据文件所在目录的路径
    pub path: String,
    pub pet_id: i64,
}

/// 爬虫输出的图片记录，只关心保存路径和宠物 id
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLabeledImage {
    saved_path: Option<String>,
    pet_id: Option<i64>,
}

/// 有限的、带标签的图片列表，用于检测前的预处理
#[derive(Debug, Clone)]
pub struct LabeledImages {
    image_root: PathBuf,
    images: Vec<LabeledImage>,
}

impl LabeledImages {
    pub fn new(image_root: impl Into<PathBuf>, images: Vec<LabeledImage>) -> Self {
        Self { image_root: image_root.into(), images }
    }

    /// 读取数据文件，跳过 `ignore` 中已处理过的路径
    ///
    /// 数据文件不存在或无法解析时直接返回错误
    pub fn load_from_file(info_file: &Path, ignore: &HashSet<String>) -> Result<Self> {
        let image_root = info_file.parent().map(Path::to_path_buf).unwrap_or_default();
        let content = fs::read_to_string(info_file)?;

        let mut images = vec![];
        let mut incomplete = 0;
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawLabeledImage =
                serde_json::from_str(line).map_err(|source| DatasetError::Corrupt {
                    path: info_file.to_path_buf(),
                    line: i + 1,
                    source,
                })?;
            match (raw.saved_path, raw.pet_id) {
                (Some(path), Some(pet_id)) => {
                    if !ignore.contains(&path) {
                        images.push(LabeledImage { path, pet_id });
                    }
                }
                _ => incomplete += 1,
            }
        }

        if incomplete > 0 {
            warn!("{} records without saved path or pet id are skipped", incomplete);
        }
        debug!("loaded {} labeled images from {}", images.len(), info_file.display());

        Ok(Self { image_root, images })
    }

    pub fn image_root(&self) -> &Path {
        &self.image_root
    }

    pub fn images(&self) -> &[LabeledImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// 读取第 `idx` 张图片
    pub fn get(&self, idx: usize) -> Result<(RgbImage, i64)> {
        let image = self.images.get(idx).ok_or_else(|| {
            DatasetError::InvalidConfiguration(format!(
                "image {idx} out of range, list has {} images",
                self.images.len()
            ))
        })?;
        Ok((imread(self.image_root.join(&image.path))?, image.pet_id))
    }

    /// 依次读取所有图片，同时返回图片路径
    pub fn iter_with_path(&self) -> impl Iterator<Item = Result<(RgbImage, i64, String)>> + '_ {
        (0..self.len()).map(|idx| {
            let (image, pet_id) = self.get(idx)?;
            Ok((image, pet_id, self.images[idx].path.clone()))
        })
    }

    /// 按批读取图片，末尾不足一批的图片会被丢弃
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> Batches<impl Iterator<Item = Result<(RgbImage, i64, String)>> + '_> {
        self.iter_with_path().batches(batch_size)
    }

    /// 将列表切分为 `count` 个连续且互不重叠的部分
    ///
    /// 每部分长度为 `ceil(len / count)`，最后的部分可能更短甚至为空
    pub fn split(&self, count: usize) -> Vec<LabeledImages> {
        assert!(count > 0, "split count must be positive");
        let chunk_length = self.len().div_ceil(count);
        (0..count)
            .map(|i| {
                let start = (i * chunk_length).min(self.len());
                let end = (start + chunk_length).min(self.len());
                Self::new(self.image_root.clone(), self.images[start..end].to_vec())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn labeled(n: usize) -> LabeledImages {
        let images = (0..n)
            .map(|i| LabeledImage { path: format!("pictures/{i}.jpg"), pet_id: i as i64 / 2 })
            .collect();
        LabeledImages::new("/data", images)
    }

    #[test]
    fn test_split_sizes() {
        let sizes: Vec<usize> = labeled(10).split(3).iter().map(LabeledImages::len).collect();
        assert_eq!(sizes, [4, 4, 2]);

        let sizes: Vec<usize> = labeled(3).split(5).iter().map(LabeledImages::len).collect();
        assert_eq!(sizes, [1, 1, 1, 0, 0]);

        let sizes: Vec<usize> = labeled(0).split(2).iter().map(LabeledImages::len).collect();
        assert_eq!(sizes, [0, 0]);
    }

    #[test]
    fn test_split_is_contiguous() {
        let data = labeled(11);
        let chunks = data.split(4);
        let joined: Vec<LabeledImage> =
            chunks.iter().flat_map(|c| c.images().iter().cloned()).collect();
        assert_eq!(joined, data.images());
        assert!(chunks.iter().all(|c| c.image_root() == Path::new("/data")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let info_file = dir.path().join("dog_pics.data");
        fs::write(
            &info_file,
            [
                r#"{"displayPhotoUrl":"u1","savedPath":"pictures/a.jpg","petId":1}"#,
                r#"{"displayPhotoUrl":"u2","savedPath":"pictures/b.jpg","petId":1}"#,
                r#"{"displayPhotoUrl":"u3","savedPath":null,"petId":2}"#,
                r#"{"displayPhotoUrl":"u4","savedPath":"pictures/c.jpg","petId":3}"#,
            ]
            .join("\n"),
        )
        .unwrap();

        let ignore = HashSet::from(["pictures/b.jpg".to_string()]);
        let data = LabeledImages::load_from_file(&info_file, &ignore).unwrap();
        assert_eq!(data.image_root(), dir.path());
        assert_eq!(
            data.images(),
            [
                LabeledImage { path: "pictures/a.jpg".into(), pet_id: 1 },
                LabeledImage { path: "pictures/c.jpg".into(), pet_id: 3 },
            ]
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = LabeledImages::load_from_file(&dir.path().join("none"), &HashSet::new());
        assert!(matches!(result, Err(DatasetError::Io(_))));
    }

    #[test]
    fn test_batches_read_images() {
        let dir = tempdir().unwrap();
        let images = (0..5)
            .map(|i| {
                RgbImage::new(3, 3).save(dir.path().join(format!("{i}.png"))).unwrap();
                LabeledImage { path: format!("{i}.png"), pet_id: i }
            })
            .collect();
        let data = LabeledImages::new(dir.path(), images);

        let batches: Vec<_> = data.batches(2).map(Result::unwrap).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][1].1, 3);
        assert_eq!(batches[1][1].2, "3.png");
    }

    #[test]
    fn test_get_out_of_range() {
        let dir = tempdir().unwrap();
        RgbImage::new(2, 2).save(dir.path().join("0.png")).unwrap();
        let images = vec![LabeledImage { path: "0.png".into(), pet_id: 7 }];
        let data = LabeledImages::new(dir.path(), images);

        assert_eq!(data.get(0).unwrap().1, 7);
        assert!(matches!(data.get(1), Err(DatasetError::InvalidConfiguration(_))));
    }
}
