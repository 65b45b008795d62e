// 该文件是 Toukui （头盔） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件与窗口输出
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

//! # GStreamer 视频输出模块
//!
//! 将标注后的帧编码为视频文件，或直接在本地窗口中播放。
//!
//! ## URL Scheme
//!
//! - `gst://file/path/to/output.mp4?fps=30` - 保存为视频文件（mp4 / mkv / avi / webm）
//! - `gst://display` - 在窗口中显示，每帧替换上一帧
//!
//! 画面尺寸取自第一帧，之后的帧必须保持同一尺寸。

use std::sync::Mutex;

use image::RgbImage;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, url_file_path};

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 帧尺寸变化
  #[error("Frame size changed from {expected:?} to {actual:?}")]
  FrameSizeChanged {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

struct OutputState {
  frame_count: u64,
  size: Option<(u32, u32)>,
}

/// GStreamer 视频输出
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: i32,
  state: Mutex<OutputState>,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gst";
}

fn sink_pipeline(url: &Url) -> Result<String, GStreamerVideoOutputError> {
  match url.host_str() {
    Some("display") => Ok("appsrc name=src ! videoconvert ! autovideosink sync=false".to_string()),
    Some("file") => {
      let file_path = url_file_path(url);
      let encoder = if file_path.ends_with(".mkv") {
        "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux"
      } else if file_path.ends_with(".avi") {
        "videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux"
      } else if file_path.ends_with(".webm") {
        "videoconvert ! vp8enc ! webmmux"
      } else {
        // 默认 MP4
        "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux"
      };
      Ok(format!(
        "appsrc name=src ! {} ! filesink location={}",
        encoder, file_path
      ))
    }
    _ => Err(GStreamerVideoOutputError::SchemeMismatch),
  }
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    gst::init()?;

    let query_pairs: std::collections::HashMap<_, _> = url.query_pairs().collect();
    let fps: i32 = query_pairs
      .get("fps")
      .and_then(|v| v.parse().ok())
      .filter(|fps| *fps > 0)
      .unwrap_or(30);

    let pipeline_desc = sink_pipeline(url)?;
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      fps,
      state: Mutex::new(OutputState {
        frame_count: 0,
        size: None,
      }),
    })
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    // 发送 EOS 以正确收尾文件
    let _ = self.appsrc.end_of_stream();

    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(2),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }

    if let Ok(state) = self.state.lock() {
      info!("Video output closed. Total frames written: {}", state.frame_count);
    }
  }
}

impl GStreamerVideoOutput {
  fn push_frame(&self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let mut state = self
      .state
      .lock()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("state poisoned".to_string()))?;

    let size = image.dimensions();
    match state.size {
      None => {
        let caps = gst::Caps::builder("video/x-raw")
          .field("format", "RGB")
          .field("width", size.0 as i32)
          .field("height", size.1 as i32)
          .field("framerate", gst::Fraction::new(self.fps, 1))
          .build();
        self.appsrc.set_caps(Some(&caps));
        self.pipeline.set_state(gst::State::Playing)?;
        info!("Video output initialized: {}x{} @ {} fps", size.0, size.1, self.fps);
        state.size = Some(size);
      }
      Some(expected) if expected != size => {
        return Err(GStreamerVideoOutputError::FrameSizeChanged {
          expected,
          actual: size,
        });
      }
      Some(_) => {}
    }

    let data = image.as_raw();
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;

    let timestamp = (state.frame_count * 1_000_000_000) / (self.fps as u64);
    state.frame_count += 1;

    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(
        1_000_000_000 / self.fps as u64,
      ));
      let mut buffer_map = buffer_ref.map_writable().map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to map buffer".to_string())
      })?;
      buffer_map.copy_from_slice(data);
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }
}

impl Render for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_image(&self, image: &RgbImage, caption: &str) -> Result<(), Self::Error> {
    self.push_frame(image)?;
    debug!("{}: 推送第 {} 帧", caption, self.frame_count());
    Ok(())
  }
}

impl GStreamerVideoOutput {
  fn frame_count(&self) -> u64 {
    self.state.lock().map(|s| s.frame_count).unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_host_uses_autovideosink() {
    let url = Url::parse("gst://display").unwrap();
    assert!(sink_pipeline(&url).unwrap().contains("autovideosink"));
  }

  #[test]
  fn file_host_picks_muxer_by_extension() {
    let url = Url::parse("gst://file/tmp/out.mkv").unwrap();
    let desc = sink_pipeline(&url).unwrap();
    assert!(desc.contains("matroskamux"));
    assert!(desc.ends_with("filesink location=/tmp/out.mkv"));
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://camera/dev/video0").unwrap();
    assert!(sink_pipeline(&url).is_err());
  }
}
