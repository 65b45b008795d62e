// 该文件是 Toukui （头盔） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::{Rgb, RgbImage};

const RGB_CHANNELS: usize = 3;

/// 帧数据
///
/// 只在一次推理调用期间存在，归调用方（界面、视频循环或摄像头回调）所有。
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::new(image, 0, 0)
  }
}

/// 像素排列顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
  Rgb,
  Bgr,
}

/// 从按行排列（每行可能带填充）的 24 位像素数据构造 RGB 图像
///
/// `stride` 为每行字节数，不小于 `width * 3`。数据不足时返回 `None`。
pub fn rgb_image_from_packed(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
  order: PixelOrder,
) -> Option<RgbImage> {
  let row_bytes = width as usize * RGB_CHANNELS;
  if stride < row_bytes {
    return None;
  }
  if height > 0 && data.len() < stride * (height as usize - 1) + row_bytes {
    return None;
  }

  let mut image = RgbImage::new(width, height);
  for (y, row) in image.rows_mut().enumerate() {
    let src = &data[y * stride..y * stride + row_bytes];
    for (pixel, chunk) in row.zip(src.chunks_exact(RGB_CHANNELS)) {
      *pixel = match order {
        PixelOrder::Rgb => Rgb([chunk[0], chunk[1], chunk[2]]),
        PixelOrder::Bgr => Rgb([chunk[2], chunk[1], chunk[0]]),
      };
    }
  }
  Some(image)
}
