// 该文件是 Toukui （头盔） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::io::Read;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

// `image:-` 表示从标准输入读取上传的图像
const STDIN_PATH: &str = "-";

/// 单张图像输入，迭代一次后结束
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    if reads_stdin(url) {
      let mut bytes = Vec::new();
      std::io::stdin().lock().read_to_end(&mut bytes)?;
      debug!("从标准输入读取 {} 字节", bytes.len());
      return Self::from_bytes(&bytes);
    }

    let path = url_file_path(url);
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;
    debug!("读取图像 {} ({}x{})", path, image.width(), image.height());

    Ok(ImageFileInput {
      image: Some(image.into_rgb8()),
    })
  }
}

impl ImageFileInput {
  /// 从上传的原始字节解码，格式由内容推断
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageFileInputError> {
    let image = image::load_from_memory(bytes)?;
    Ok(ImageFileInput {
      image: Some(image.into_rgb8()),
    })
  }
}

fn reads_stdin(url: &Url) -> bool {
  url_file_path(url) == STDIN_PATH
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(Frame::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    bytes.into_inner()
  }

  #[test]
  fn from_bytes_decodes_png() {
    let mut source = RgbImage::new(3, 2);
    source.put_pixel(1, 1, Rgb([200, 10, 20]));
    let mut input = ImageFileInput::from_bytes(&png_bytes(&source)).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.image.get_pixel(1, 1), &Rgb([200, 10, 20]));
  }

  #[test]
  fn garbage_bytes_are_an_error() {
    assert!(matches!(
      ImageFileInput::from_bytes(b"not an image"),
      Err(ImageFileInputError::ImageLoadError(_))
    ));
  }

  #[test]
  fn yields_exactly_one_frame() {
    let mut input = ImageFileInput::from_bytes(&png_bytes(&RgbImage::new(2, 2))).unwrap();
    assert!(input.next().is_some());
    assert!(input.next().is_none());
  }

  #[test]
  fn dash_path_means_stdin() {
    assert!(reads_stdin(&Url::parse("image:-").unwrap()));
    assert!(!reads_stdin(&Url::parse("image:///data/-").unwrap()));
    assert!(!reads_stdin(&Url::parse("image:///data/site.jpg").unwrap()));
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }

  #[test]
  fn other_scheme_is_rejected() {
    let url = Url::parse("gst://file/a.mp4").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));
  }
}
