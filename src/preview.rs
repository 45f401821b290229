use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// 两张图片之间色带的宽度
const BAND_WIDTH: u32 = 8;
const SAME_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const DIFFERENT_COLOR: Rgb<u8> = Rgb([220, 0, 0]);

/// 将图片对拼接为一张预览图
///
/// 每行一对图片，均缩放为 `size x size`，中间的色带表示是否为同一只宠物：
/// 绿色为同一只，红色为不同。
pub fn render_pairs(pairs: &[(RgbImage, RgbImage, bool)], size: u32) -> RgbImage {
    let width = size * 2 + BAND_WIDTH;
    let mut output = RgbImage::new(width, size * pairs.len() as u32);

    for (row, (first, second, is_same)) in pairs.iter().enumerate() {
        let y = row as u32 * size;
        let first = imageops::resize(first, size, size, FilterType::Triangle);
        let second = imageops::resize(second, size, size, FilterType::Triangle);
        imageops::replace(&mut output, &first, 0, y as i64);
        imageops::replace(&mut output, &second, (size + BAND_WIDTH) as i64, y as i64);

        let color = if *is_same { SAME_COLOR } else { DIFFERENT_COLOR };
        for dy in 0..size {
            for dx in 0..BAND_WIDTH {
                output.put_pixel(size + dx, y + dy, color);
            }
        }
    }
    output
}
