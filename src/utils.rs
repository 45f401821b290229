use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use indicatif::ProgressStyle;

use crate::error::Result;

/// 图片统一保存的后缀名
pub const IMAGE_EXTENSION: &str = "jpg";

/// 返回目录下一个可用的图片文件名
///
/// 从目录中已有 jpg 文件的数量开始，逐个检查 `{i}.jpg` 是否已存在，
/// 返回第一个未被占用的名字。
pub fn lookup_next_image_name(folder: &Path) -> std::io::Result<PathBuf> {
    let mut i = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == IMAGE_EXTENSION))
        .count();

    // 已有文件可能不连续，这里再检查一次
    while folder.join(format!("{i}.{IMAGE_EXTENSION}")).exists() {
        i += 1;
    }

    Ok(folder.join(format!("{i}.{IMAGE_EXTENSION}")))
}

/// 读取图片并转换为 RGB，格式由文件内容判断而不是扩展名
pub fn imread<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgb8())
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix}[{elapsed_precise}] {wide_bar} {pos}/{len} {msg}")
        .expect("invalid progress template")
}

pub fn pb_style_speed() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix}[{elapsed_precise}] {wide_bar} {pos}/{len} ({per_sec}, {eta}) {msg}",
    )
    .expect("invalid progress template")
}

pub fn read_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let v = std::io::stdin()
        .bytes()
        .take_while(|c| c.as_ref().ok() != Some(&b'\n'))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf8(v)?.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_next_image_name_empty_dir() {
        let dir = tempdir().unwrap();
        let path = lookup_next_image_name(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("0.jpg"));
    }

    #[test]
    fn test_next_image_name_skips_taken() {
        let dir = tempdir().unwrap();
        // 两个文件，但名字不连续
        fs::write(dir.path().join("0.jpg"), b"").unwrap();
        fs::write(dir.path().join("2.jpg"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let path = lookup_next_image_name(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("3.jpg"));
    }

    #[test]
    fn test_imread_ignores_extension() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("a.png");
        RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3])).save(&png).unwrap();
        // png 内容，jpg 扩展名
        let renamed = dir.path().join("0.jpg");
        fs::rename(&png, &renamed).unwrap();

        let image = imread(&renamed).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0), &image::Rgb([1, 2, 3]));
    }

    #[test]
    fn test_next_image_name_missing_dir() {
        let dir = tempdir().unwrap();
        assert!(lookup_next_image_name(&dir.path().join("missing")).is_err());
    }
}
