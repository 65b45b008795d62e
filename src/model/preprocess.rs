// 该文件是 Toukui （头盔） 项目的一部分。
// src/model/preprocess.rs - 图像预处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{Rgb, RgbImage, imageops};

/// 填充区域的灰度值
pub const LETTERBOX_FILL: u8 = 114;

/// 等比例缩放并居中填充到正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub size: u32,
  pub scale: f32,
  pub resized_width: u32,
  pub resized_height: u32,
  pub pad_x: u32,
  pub pad_y: u32,
}

impl Letterbox {
  /// 源图像宽高需大于 0
  pub fn new(src_width: u32, src_height: u32, size: u32) -> Self {
    let src_width = src_width.max(1);
    let src_height = src_height.max(1);
    let scale = (size as f32 / src_width as f32).min(size as f32 / src_height as f32);

    let resized_width = ((src_width as f32 * scale).round() as u32).clamp(1, size);
    let resized_height = ((src_height as f32 * scale).round() as u32).clamp(1, size);

    Self {
      size,
      scale,
      resized_width,
      resized_height,
      pad_x: (size - resized_width) / 2,
      pad_y: (size - resized_height) / 2,
    }
  }

  pub fn apply(&self, image: &RgbImage) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([LETTERBOX_FILL; 3]));
    let resized = imageops::resize(
      image,
      self.resized_width,
      self.resized_height,
      imageops::FilterType::Triangle,
    );
    imageops::replace(
      &mut canvas,
      &resized,
      self.pad_x as i64,
      self.pad_y as i64,
    );
    canvas
  }

  /// 将输入张量坐标映射回源图像坐标
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale,
      (y - self.pad_y as f32) / self.scale,
    )
  }
}

/// 按 NCHW 排列并归一化到 [0, 1]
pub fn nchw_unit_scale(image: &RgbImage) -> Vec<f32> {
  let (width, height) = image.dimensions();
  let plane = width as usize * height as usize;
  let mut data = vec![0f32; plane * 3];

  for (x, y, pixel) in image.enumerate_pixels() {
    let idx = y as usize * width as usize + x as usize;
    for c in 0..3 {
      data[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }
  data
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wide_image_is_padded_vertically() {
    let letterbox = Letterbox::new(640, 320, 320);
    assert_eq!(letterbox.scale, 0.5);
    assert_eq!((letterbox.resized_width, letterbox.resized_height), (320, 160));
    assert_eq!((letterbox.pad_x, letterbox.pad_y), (0, 80));
  }

  #[test]
  fn tall_image_is_padded_horizontally() {
    let letterbox = Letterbox::new(100, 200, 320);
    assert_eq!((letterbox.resized_width, letterbox.resized_height), (160, 320));
    assert_eq!((letterbox.pad_x, letterbox.pad_y), (80, 0));
  }

  #[test]
  fn to_source_inverts_the_transform() {
    let letterbox = Letterbox::new(640, 320, 320);
    let (x, y) = letterbox.to_source(160.0, 160.0);
    assert!((x - 320.0).abs() < 1e-3);
    assert!((y - 160.0).abs() < 1e-3);
  }

  #[test]
  fn padding_uses_fill_color() {
    let image = RgbImage::from_pixel(64, 32, Rgb([255, 0, 0]));
    let letterbox = Letterbox::new(64, 32, 64);
    let canvas = letterbox.apply(&image);
    assert_eq!(canvas.dimensions(), (64, 64));
    assert_eq!(canvas.get_pixel(0, 0), &Rgb([LETTERBOX_FILL; 3]));
    assert_eq!(canvas.get_pixel(32, 32), &Rgb([255, 0, 0]));
  }

  #[test]
  fn nchw_layout_separates_planes() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));
    image.put_pixel(1, 0, Rgb([0, 255, 0]));
    let data = nchw_unit_scale(&image);
    assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
  }
}
