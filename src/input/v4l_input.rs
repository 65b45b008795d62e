// 该文件是 Toukui （头盔） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

//! 直接通过 V4L2 读取摄像头
//!
//! `v4l:///dev/video0?width=640&height=480&fourcc=YUYV`
//!
//! 支持 RGB3、YUYV、MJPG 三种像素格式，统一转换为 RGB。

use std::collections::HashMap;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelOrder, rgb_image_from_packed},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Frame conversion failed: {0}")]
  ConversionFailed(String),
}

/// 摄像头像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Rgb3,
  Yuyv,
  Mjpg,
}

impl PixelFormat {
  fn from_fourcc(fourcc: &FourCC) -> Result<Self, V4lInputError> {
    match &fourcc.repr {
      b"RGB3" => Ok(PixelFormat::Rgb3),
      b"YUYV" => Ok(PixelFormat::Yuyv),
      b"MJPG" => Ok(PixelFormat::Mjpg),
      other => Err(V4lInputError::UnsupportedPixelFormat(
        String::from_utf8_lossy(other).into_owned(),
      )),
    }
  }
}

pub struct V4lInput {
  // stream 必须先于 device 释放
  stream: Stream<'static>,
  _device: Device,
  format: PixelFormat,
  width: u32,
  height: u32,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemeMismatch);
    }

    let device_path = match url_file_path(url) {
      path if path.is_empty() || path == "/" => "/dev/video0".to_string(),
      path => path,
    };
    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let device = Device::with_path(&device_path)?;

    let mut format = device.format()?;
    if let Some(width) = query.get("width").and_then(|v| v.parse().ok()) {
      format.width = width;
    }
    if let Some(height) = query.get("height").and_then(|v| v.parse().ok()) {
      format.height = height;
    }
    let fourcc = query
      .get("fourcc")
      .map(|v| v.as_bytes())
      .filter(|v| v.len() == 4)
      .unwrap_or(&b"YUYV"[..]);
    let mut repr = [0u8; 4];
    repr.copy_from_slice(fourcc);
    format.fourcc = FourCC::new(&repr);
    let format = device.set_format(&format)?;

    // 驱动可能替换为其他格式
    let pixel_format = PixelFormat::from_fourcc(&format.fourcc)?;
    info!(
      "打开摄像头 {}: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, 4)?;

    Ok(V4lInput {
      stream,
      _device: device,
      format: pixel_format,
      width: format.width,
      height: format.height,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Option<RgbImage> {
  let pixels = width as usize * height as usize;
  if yuyv.len() < pixels * 2 {
    return None;
  }

  let mut rgb = Vec::with_capacity(pixels * 3);
  for chunk in yuyv[..pixels * 2].chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  RgbImage::from_raw(width, height, rgb)
}

impl V4lInput {
  fn capture_frame(&mut self) -> Result<Frame, V4lInputError> {
    let (buffer, _meta) = self.stream.next()?;

    let image = match self.format {
      PixelFormat::Rgb3 => rgb_image_from_packed(
        buffer,
        self.width,
        self.height,
        self.width as usize * 3,
        PixelOrder::Rgb,
      ),
      PixelFormat::Yuyv => yuyv_to_rgb(buffer, self.width, self.height),
      PixelFormat::Mjpg => {
        match image::load_from_memory_with_format(buffer, image::ImageFormat::Jpeg) {
          Ok(image) => Some(image.into_rgb8()),
          Err(e) => {
            warn!("MJPG 解码失败: {}", e);
            None
          }
        }
      }
    }
    .ok_or_else(|| {
      V4lInputError::ConversionFailed(format!(
        "{} bytes for {}x{} {:?}",
        buffer.len(),
        self.width,
        self.height,
        self.format
      ))
    })?;

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }
}

impl Iterator for V4lInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.capture_frame() {
      Ok(frame) => Some(frame),
      Err(e) => {
        error!("Failed to capture frame: {}", e);
        None
      }
    }
  }
}
