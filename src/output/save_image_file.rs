// 该文件是 Toukui （头盔） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, url_file_path};

/// 将图像写入固定路径
///
/// 每次写入都替换上一帧：先写临时文件再重命名，外部查看器不会读到半帧。
pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(url_file_path(uri)))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    let format = ImageFormat::from_path(&self.path)?;

    let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
      std::fs::create_dir_all(parent)?;
    }

    let file_name = self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    let staging = self.path.with_file_name(format!(".{}.part", file_name));

    image.save_with_format(&staging, format)?;
    std::fs::rename(&staging, &self.path)?;

    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_image(&self, image: &RgbImage, caption: &str) -> Result<(), Self::Error> {
    self.save_image(image)?;
    debug!("{} -> {}", caption, self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn from_url_takes_the_path() {
    let url = Url::parse("image:///tmp/result/out.png").unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), Path::new("/tmp/result/out.png"));
  }

  #[test]
  fn from_url_rejects_other_schemes() {
    let url = Url::parse("gst://display").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn latest_frame_replaces_previous_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("latest.png");
    let output = SaveImageFileOutput::new(&path);

    output
      .render_image(&RgbImage::from_pixel(4, 4, Rgb([10, 10, 10])), "first")
      .unwrap();
    output
      .render_image(&RgbImage::from_pixel(6, 2, Rgb([200, 0, 0])), "second")
      .unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (6, 2));
    assert_eq!(saved.get_pixel(0, 0), &Rgb([200, 0, 0]));

    let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 1);
  }

  #[test]
  fn unsupported_extension_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(dir.path().join("out.xyz"));
    assert!(output.render_image(&RgbImage::new(2, 2), "x").is_err());
  }
}
