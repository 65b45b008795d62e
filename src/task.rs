// 该文件是 Toukui （头盔） 项目的一部分。
// src/task.rs - 三种模式的任务循环
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::{thread, time::Duration};

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::InferenceConfig,
  frame::Frame,
  model::{DetectResult, Model, WithLabel},
  output::{Render, draw::side_by_side},
  pipeline::{ClassCounts, FramePipeline, PipelineError},
  transport::{FrameTransport, LocalTransport, TransportError},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const IMAGE_CAPTION: &str = "Uploaded Image / Detected Image";
pub const VIDEO_CAPTION: &str = "Processing Video";
pub const WEBCAM_CAPTION: &str = "Webcam";

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("没有输入帧")]
  NoInput,
  #[error("{0}")]
  Pipeline(#[from] PipelineError),
  #[error("显示输出失败: {0}")]
  Render(#[source] BoxError),
  #[error("{0}")]
  Transport(#[from] TransportError),
  #[error("无法设置 Ctrl-C 处理: {0}")]
  Signal(#[from] ctrlc::Error),
}

/// 协作式停止标志
///
/// 视频循环在读取下一帧之前检查一次，摄像头传输在两帧之间检查。
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  pub fn reset(&self) {
    self.0.store(false, Ordering::SeqCst);
  }

  /// Ctrl-C 时置位；30 秒后仍未退出则强制结束进程
  pub fn install_ctrlc(&self) -> Result<(), TaskError> {
    let flag = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.stop();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(())
  }
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(
    self,
    input: I,
    pipeline: &FramePipeline<M>,
    output: O,
  ) -> Result<Self::Output, Self::Error>;
}

fn render<O>(output: &O, image: &RgbImage, caption: &str) -> Result<(), TaskError>
where
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  output
    .render_image(image, caption)
    .map_err(|e| TaskError::Render(Box::new(e)))
}

/// 单张图像的检测报告
#[derive(Debug, Clone)]
pub struct ImageReport<T> {
  pub width: u32,
  pub height: u32,
  pub counts: ClassCounts,
  pub detections: DetectResult<T>,
}

impl<T: WithLabel> ImageReport<T> {
  pub fn to_json(&self) -> serde_json::Value {
    let detections = self
      .detections
      .iter()
      .map(|item| {
        serde_json::json!({
          "class": item.kind.to_label_str(),
          "class_id": item.kind.to_label_id(),
          "score": item.score,
          "bbox": item.bbox,
        })
      })
      .collect::<Vec<_>>();
    serde_json::json!({
      "width": self.width,
      "height": self.height,
      "counts": self.counts.to_json(),
      "detections": detections,
    })
  }
}

/// 图像模式：一帧，一次推理，原图与标注图并排显示
#[derive(Debug, Clone, Default)]
pub struct ImageTask {
  config: InferenceConfig,
}

impl ImageTask {
  pub fn new(config: InferenceConfig) -> Self {
    Self { config }
  }
}

impl<I, M, O, T> Task<I, M, O> for ImageTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = RgbImage, Output = DetectResult<T>>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
  T: WithLabel,
{
  type Output = ImageReport<T>;
  type Error = TaskError;

  fn run_task(
    self,
    mut input: I,
    pipeline: &FramePipeline<M>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始图像检测 ({})", self.config);
    let frame = input.next().ok_or(TaskError::NoInput)?;
    let now = std::time::Instant::now();
    let annotated = pipeline.process(&frame.image, &self.config)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let counts = annotated.class_counts();
    if counts.is_empty() {
      info!("未检测到目标");
    }
    for (label, count) in counts.iter() {
      info!("{}: {}", label, count);
    }

    render(
      &output,
      &side_by_side(&frame.image, &annotated.image),
      IMAGE_CAPTION,
    )?;

    Ok(ImageReport {
      width: frame.width(),
      height: frame.height(),
      counts,
      detections: annotated.detections,
    })
  }
}

/// 视频处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoSummary {
  pub frames: u64,
  pub detections: u64,
  pub stopped: bool,
}

/// 视频模式：逐帧阻塞推理，显示面始终显示最新一帧
#[derive(Debug, Clone, Default)]
pub struct VideoTask {
  config: InferenceConfig,
  stop: StopFlag,
  frame_limit: Option<u64>,
}

impl VideoTask {
  pub fn new(config: InferenceConfig, stop: StopFlag) -> Self {
    Self {
      config,
      stop,
      frame_limit: None,
    }
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }
}

impl<I, M, O, T> Task<I, M, O> for VideoTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = RgbImage, Output = DetectResult<T>>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
  T: WithLabel,
{
  type Output = VideoSummary;
  type Error = TaskError;

  fn run_task(
    self,
    mut input: I,
    pipeline: &FramePipeline<M>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始视频处理 ({})", self.config);
    let mut summary = VideoSummary::default();
    let mut now = std::time::Instant::now();

    loop {
      if self.stop.is_stopped() {
        warn!("收到停止请求，退出视频循环");
        summary.stopped = true;
        break;
      }
      if self.frame_limit.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出视频循环", summary.frames);
        break;
      }
      let Some(frame) = input.next() else {
        info!("视频读取结束");
        break;
      };

      let annotated = pipeline.process(&frame.image, &self.config)?;
      let elapsed_a = now.elapsed();
      render(&output, &annotated.image, VIDEO_CAPTION)?;
      let elapsed_b = now.elapsed();
      now = std::time::Instant::now();

      summary.frames += 1;
      summary.detections += annotated.detections.len() as u64;
      info!(
        "第 {} 帧 ({} ms): {} 个目标，耗时: {:.2?} / {:.2?}",
        frame.index,
        frame.timestamp_ms,
        annotated.detections.len(),
        elapsed_a,
        elapsed_b
      );
    }

    info!(
      "视频处理完成：{} 帧，{} 个目标",
      summary.frames, summary.detections
    );
    Ok(summary)
  }
}

/// 摄像头模式：由传输层驱动，每帧回调一次流水线
#[derive(Debug, Clone, Default)]
pub struct WebcamTask {
  config: InferenceConfig,
  stop: StopFlag,
}

impl WebcamTask {
  pub fn new(config: InferenceConfig, stop: StopFlag) -> Self {
    Self { config, stop }
  }
}

impl<I, M, O, T> Task<I, M, O> for WebcamTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = RgbImage, Output = DetectResult<T>>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
  T: WithLabel,
{
  type Output = u64;
  type Error = TaskError;

  fn run_task(
    self,
    input: I,
    pipeline: &FramePipeline<M>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始摄像头检测 ({})", self.config);
    let mut transport =
      LocalTransport::new(input, output, self.stop.clone()).with_caption(WEBCAM_CAPTION);
    let config = self.config;
    let served = transport.serve(|frame| {
      pipeline
        .process(&frame.image, &config)
        .map(|annotated| annotated.image)
    })?;
    Ok(served)
  }
}
