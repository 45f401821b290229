use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DatasetError, Result};
use crate::utils::{imread, lookup_next_image_name};

/// 同一张原始照片衍生出的一组图片路径（原图、增强后的图片等）
pub type PhotoGroup = Vec<String>;

/// 数据文件中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetRecord {
    /// 图片来源，用于去重
    #[serde(default)]
    pub source: String,
    #[serde(deserialize_with = "deserialize_groups")]
    pub paths: Vec<PhotoGroup>,
    pub pet_id: i64,
}

/// 旧版数据文件中 `paths` 是一维列表，此时整体视为一组
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredPaths {
    Groups(Vec<PhotoGroup>),
    Flat(PhotoGroup),
}

fn deserialize_groups<'de, D>(deserializer: D) -> std::result::Result<Vec<PhotoGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StoredPaths::deserialize(deserializer)? {
        StoredPaths::Groups(groups) => groups,
        StoredPaths::Flat(paths) => vec![paths],
    })
}

/// 添加记录时接受的图片
#[derive(Debug, Clone)]
pub enum RecordImage {
    /// 已解码的图片，会被编码为 jpg 保存
    Decoded(DynamicImage),
    /// 文件路径，会被直接复制
    File(PathBuf),
}

impl From<RgbImage> for RecordImage {
    fn from(image: RgbImage) -> Self {
        Self::Decoded(DynamicImage::ImageRgb8(image))
    }
}

impl From<PathBuf> for RecordImage {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// 数据集统计信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    /// 宠物数量
    pub pets: usize,
    /// 参与统计的记录数量
    pub records: usize,
    /// 平均每只宠物的照片组数量
    pub average_groups_per_pet: f64,
    /// 拥有 1 ~ 5 组照片的宠物数量
    pub sizes: [usize; 5],
}

/// 宠物图片集合，对应一个目录和其中的数据文件
///
/// 图片按 `<folder>/<pet_id>/<n>.jpg` 保存，数据文件每行一条 [`PetRecord`]。
#[derive(Debug, Clone)]
pub struct PetCollection {
    folder: PathBuf,
    info_file: PathBuf,
    records: Vec<PetRecord>,
}

impl PetCollection {
    /// 打开图片集合，目录或数据文件不存在时会自动创建
    ///
    /// # Arguments
    ///
    /// * `folder` - 图片集合目录
    /// * `info_file_name` - 数据文件名
    pub fn open<P: AsRef<Path>>(folder: P, info_file_name: &str) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        let info_file = folder.join(info_file_name);

        fs::create_dir_all(&folder)?;
        OpenOptions::new().create(true).append(true).open(&info_file)?;

        let records = read_records(&info_file)?;
        debug!("loaded {} records from {}", records.len(), info_file.display());

        Ok(Self { folder, info_file, records })
    }

    fn with_records(folder: PathBuf, info_file: PathBuf, records: Vec<PetRecord>) -> Self {
        Self { folder, info_file, records }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn info_file(&self) -> &Path {
        &self.info_file
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PetRecord] {
        &self.records
    }

    pub fn get(&self, idx: usize) -> Option<&PetRecord> {
        self.records.get(idx)
    }

    /// 将记录中的路径解析为可以打开的路径
    ///
    /// 相对路径如果在当前目录下不存在，则视为相对于集合目录
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.folder.join(path)
        }
    }

    /// 读取一条记录的所有图片
    pub fn load_images(&self, idx: usize) -> Result<Vec<(RgbImage, PathBuf)>> {
        let record = self.records.get(idx).ok_or_else(|| {
            DatasetError::InvalidConfiguration(format!(
                "record {idx} out of range, collection has {} records",
                self.records.len()
            ))
        })?;
        record
            .paths
            .iter()
            .flatten()
            .map(|path| {
                let path = self.resolve(path);
                Ok((imread(&path)?, path))
            })
            .collect()
    }

    /// 添加一条记录，所有图片属于同一组
    pub fn add_record(
        &mut self,
        images: Vec<RecordImage>,
        pet_id: i64,
        source: impl Into<String>,
    ) -> Result<&PetRecord> {
        self.add_record_groups(vec![images], pet_id, source)
    }

    /// 添加一条包含多组图片的记录
    ///
    /// 图片会被保存到 `<folder>/<pet_id>/` 下，文件名由 [`lookup_next_image_name`] 决定
    pub fn add_record_groups(
        &mut self,
        groups: Vec<Vec<RecordImage>>,
        pet_id: i64,
        source: impl Into<String>,
    ) -> Result<&PetRecord> {
        let pet_folder = self.folder.join(pet_id.to_string());
        fs::create_dir_all(&pet_folder)?;

        let mut paths = Vec::with_capacity(groups.len());
        for group in groups {
            let mut saved = Vec::with_capacity(group.len());
            for image in group {
                let image_path = lookup_next_image_name(&pet_folder)?;
                match image {
                    RecordImage::Decoded(image) => image.to_rgb8().save(&image_path)?,
                    // 非 jpg 文件重新编码，保证扩展名与内容一致
                    RecordImage::File(path) => match ImageReader::open(&path)?
                        .with_guessed_format()?
                        .format()
                    {
                        Some(ImageFormat::Jpeg) => {
                            fs::copy(&path, &image_path)?;
                        }
                        _ => imread(&path)?.save(&image_path)?,
                    },
                }
                saved.push(image_path.to_string_lossy().into_owned());
            }
            paths.push(saved);
        }

        self.records.push(PetRecord { source: source.into(), paths, pet_id });
        Ok(&self.records[self.records.len() - 1])
    }

    /// 统计每只宠物的照片组数量
    ///
    /// # Arguments
    ///
    /// * `drop_duplicates` - 是否忽略来源重复的记录
    pub fn describe(&self, drop_duplicates: bool) -> CollectionStats {
        let mut seen = HashSet::new();
        let mut groups_per_pet = BTreeMap::<i64, usize>::new();
        let mut records = 0;

        for record in &self.records {
            if drop_duplicates && !seen.insert(record.source.as_str()) {
                continue;
            }
            records += 1;
            *groups_per_pet.entry(record.pet_id).or_default() += record.paths.len();
        }

        let mut sizes = [0; 5];
        for &count in groups_per_pet.values() {
            if (1..=5).contains(&count) {
                sizes[count - 1] += 1;
            }
        }

        let pets = groups_per_pet.len();
        let total: usize = groups_per_pet.values().sum();
        let average_groups_per_pet = if pets == 0 { 0.0 } else { total as f64 / pets as f64 };

        CollectionStats { pets, records, average_groups_per_pet, sizes }
    }

    /// 将所有记录写回数据文件，会覆盖原有内容
    pub fn save(&self) -> Result<()> {
        let mut tmp_file = self.info_file.clone();
        tmp_file.set_extension("tmp");

        {
            let mut writer = BufWriter::new(File::create(&tmp_file)?);
            for record in &self.records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_file, &self.info_file)?;

        debug!("saved {} records to {}", self.records.len(), self.info_file.display());
        Ok(())
    }

    /// 将另一个集合的所有记录和图片复制到当前集合，返回复制的记录数量
    pub fn merge_from(&mut self, other: &PetCollection) -> Result<usize> {
        for record in other.records() {
            let groups = record
                .paths
                .iter()
                .map(|group| {
                    group.iter().map(|path| RecordImage::File(other.resolve(path))).collect()
                })
                .collect();
            self.add_record_groups(groups, record.pet_id, record.source.clone())?;
        }
        info!("merged {} records from {}", other.len(), other.info_file.display());
        Ok(other.len())
    }

    /// 删除来源重复的记录及其图片，返回删除的记录数量
    pub fn deduplicate(&mut self) -> Result<usize> {
        let mut seen = HashSet::new();
        let (kept, duplicated): (Vec<_>, Vec<_>) =
            self.records.drain(..).partition(|record| seen.insert(record.source.clone()));
        self.records = kept;

        for record in &duplicated {
            for path in record.paths.iter().flatten() {
                if let Err(e) = fs::remove_file(self.resolve(path)) {
                    warn!("failed to remove {}: {}", path, e);
                }
            }
        }

        self.save()?;
        info!("removed {} duplicated records", duplicated.len());
        Ok(duplicated.len())
    }

    /// 随机取出一部分宠物作为测试集，返回 (训练集, 测试集)，均未保存
    ///
    /// # Arguments
    ///
    /// * `name` - 测试集数据文件名，与当前集合位于同一目录
    /// * `fraction` - 测试集宠物所占比例
    /// * `seed` - 随机种子
    pub fn split_test(
        &self,
        name: &str,
        fraction: f64,
        seed: u64,
    ) -> Result<(PetCollection, PetCollection)> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(DatasetError::InvalidConfiguration(format!(
                "test fraction must be within [0, 1], got {fraction}"
            )));
        }

        let ids: Vec<i64> =
            self.records.iter().map(|r| r.pet_id).collect::<BTreeSet<_>>().into_iter().collect();
        let test_count = (ids.len() as f64 * fraction) as usize;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let test_ids: HashSet<i64> =
            index::sample(&mut rng, ids.len(), test_count).into_iter().map(|i| ids[i]).collect();

        let (test, train): (Vec<_>, Vec<_>) =
            self.records.iter().cloned().partition(|r| test_ids.contains(&r.pet_id));

        Ok((
            Self::with_records(self.folder.clone(), self.info_file.clone(), train),
            Self::with_records(self.folder.clone(), self.folder.join(name), test),
        ))
    }
}

fn read_records(info_file: &Path) -> Result<Vec<PetRecord>> {
    let content = fs::read_to_string(info_file)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| DatasetError::Corrupt {
                path: info_file.to_path_buf(),
                line: i + 1,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_info(dir: &Path, lines: &[&str]) {
        fs::write(dir.join("train.data"), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_open_creates_missing() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("pets");
        let collection = PetCollection::open(&folder, "train.data").unwrap();
        assert!(collection.is_empty());
        assert!(folder.join("train.data").exists());
    }

    #[test]
    fn test_open_flat_paths() {
        let dir = tempdir().unwrap();
        write_info(
            dir.path(),
            &[
                r#"{"source":"a","paths":["1/0.jpg","1/1.jpg"],"pet_id":1}"#,
                "",
                r#"{"source":"b","paths":[["2/0.jpg"],["2/1.jpg"]],"pet_id":2}"#,
            ],
        );
        let collection = PetCollection::open(dir.path(), "train.data").unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.records()[0].paths, vec![vec!["1/0.jpg", "1/1.jpg"]]);
        assert_eq!(collection.records()[1].paths.len(), 2);
    }

    #[test]
    fn test_open_corrupt() {
        let dir = tempdir().unwrap();
        write_info(
            dir.path(),
            &[r#"{"source":"a","paths":[["x"]],"pet_id":1}"#, r#"{"source":"b","#],
        );
        match PetCollection::open(dir.path(), "train.data") {
            Err(DatasetError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_add_record_layout() {
        let dir = tempdir().unwrap();
        let mut collection = PetCollection::open(dir.path(), "train.data").unwrap();

        let source_file = dir.path().join("source.jpg");
        RgbImage::new(4, 4).save(&source_file).unwrap();

        let record = collection
            .add_record(
                vec![RgbImage::new(8, 8).into(), RecordImage::File(source_file)],
                7,
                "photo-1",
            )
            .unwrap()
            .clone();

        let pet_folder = dir.path().join("7");
        assert_eq!(record.paths.len(), 1);
        assert_eq!(record.paths[0][0], pet_folder.join("0.jpg").to_string_lossy());
        assert_eq!(record.paths[0][1], pet_folder.join("1.jpg").to_string_lossy());
        assert!(pet_folder.join("1.jpg").exists());
    }

    #[test]
    fn test_add_record_reencodes_png() {
        let dir = tempdir().unwrap();
        let mut collection = PetCollection::open(dir.path().join("pets"), "train.data").unwrap();

        let png = dir.path().join("upload.png");
        RgbImage::from_pixel(6, 4, image::Rgb([10, 200, 30])).save(&png).unwrap();
        collection.add_record(vec![RecordImage::File(png)], 3, "upload").unwrap();

        let saved = dir.path().join("pets/3/0.jpg");
        let format = ImageReader::open(&saved).unwrap().with_guessed_format().unwrap().format();
        assert_eq!(format, Some(ImageFormat::Jpeg));

        let images = collection.load_images(0).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].0.dimensions(), (6, 4));
    }

    #[test]
    fn test_describe() {
        let dir = tempdir().unwrap();
        write_info(
            dir.path(),
            &[
                r#"{"source":"a","paths":[["x"]],"pet_id":1}"#,
                r#"{"source":"a","paths":[["y"]],"pet_id":1}"#,
                r#"{"source":"b","paths":[["z"],["w"]],"pet_id":2}"#,
                r#"{"source":"c","paths":[["v"]],"pet_id":3}"#,
            ],
        );
        let collection = PetCollection::open(dir.path(), "train.data").unwrap();

        let stats = collection.describe(true);
        assert_eq!(stats.pets, 3);
        assert_eq!(stats.records, 3);
        assert_eq!(stats.sizes, [2, 1, 0, 0, 0]);
        assert!((stats.average_groups_per_pet - 4.0 / 3.0).abs() < 1e-9);

        let stats = collection.describe(false);
        assert_eq!(stats.records, 4);
        assert_eq!(stats.sizes, [1, 2, 0, 0, 0]);
    }

    #[test]
    fn test_deduplicate_removes_files() {
        let dir = tempdir().unwrap();
        let mut collection = PetCollection::open(dir.path(), "train.data").unwrap();
        collection.add_record(vec![RgbImage::new(2, 2).into()], 1, "same").unwrap();
        collection.add_record(vec![RgbImage::new(2, 2).into()], 1, "same").unwrap();
        collection.add_record(vec![RgbImage::new(2, 2).into()], 2, "other").unwrap();

        assert_eq!(collection.deduplicate().unwrap(), 1);
        assert_eq!(collection.len(), 2);
        assert!(dir.path().join("1/0.jpg").exists());
        assert!(!dir.path().join("1/1.jpg").exists());

        let reloaded = PetCollection::open(dir.path(), "train.data").unwrap();
        assert_eq!(reloaded.records(), collection.records());
    }

    #[test]
    fn test_split_test_by_pet() {
        let dir = tempdir().unwrap();
        let lines: Vec<String> = (0..40)
            .map(|i| format!(r#"{{"source":"s{i}","paths":[["p{i}"]],"pet_id":{}}}"#, i / 2))
            .collect();
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        write_info(dir.path(), &lines);
        let collection = PetCollection::open(dir.path(), "train.data").unwrap();

        let (train, test) = collection.split_test("test.data", 0.25, 3).unwrap();
        assert_eq!(train.len() + test.len(), 40);
        assert_eq!(test.describe(false).pets, 5);
        assert_eq!(test.info_file(), dir.path().join("test.data"));

        let train_ids: HashSet<_> = train.records().iter().map(|r| r.pet_id).collect();
        assert!(test.records().iter().all(|r| !train_ids.contains(&r.pet_id)));

        assert!(collection.split_test("test.data", 1.5, 3).is_err());
    }
}
