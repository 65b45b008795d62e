// 该文件是 Toukui （头盔） 项目的一部分。
// src/transport.rs - 摄像头帧传输
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

//! 摄像头帧传输
//!
//! 传输层自己驱动循环：取一帧，交给回调，把回调返回的图像送到显示面。
//! 回调每次只处理一帧，传输层不缓存也不主动丢帧。

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{frame::Frame, output::Render, task::StopFlag};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("帧回调失败: {0}")]
  Callback(#[source] BoxError),
  #[error("显示输出失败: {0}")]
  Render(#[source] BoxError),
}

pub trait FrameTransport {
  /// 持续提供帧直到来源结束或被停止，返回已送达显示面的帧数
  fn serve<F, E>(&mut self, callback: F) -> Result<u64, TransportError>
  where
    F: FnMut(Frame) -> Result<RgbImage, E>,
    E: std::error::Error + Send + Sync + 'static;
}

/// 本地传输：帧来源与显示面都在本进程内
pub struct LocalTransport<I, R> {
  source: I,
  sink: R,
  stop: StopFlag,
  caption: String,
}

impl<I, R> LocalTransport<I, R> {
  pub fn new(source: I, sink: R, stop: StopFlag) -> Self {
    Self {
      source,
      sink,
      stop,
      caption: "Webcam".to_string(),
    }
  }

  pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
    self.caption = caption.into();
    self
  }
}

impl<I, R> FrameTransport for LocalTransport<I, R>
where
  I: Iterator<Item = Frame>,
  R: Render,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  fn serve<F, E>(&mut self, mut callback: F) -> Result<u64, TransportError>
  where
    F: FnMut(Frame) -> Result<RgbImage, E>,
    E: std::error::Error + Send + Sync + 'static,
  {
    info!("摄像头传输开始");
    let mut served = 0u64;
    loop {
      if self.stop.is_stopped() {
        warn!("收到停止请求，结束摄像头传输");
        break;
      }
      let Some(frame) = self.source.next() else {
        info!("摄像头帧来源结束");
        break;
      };
      let image = callback(frame).map_err(|e| TransportError::Callback(Box::new(e)))?;
      self
        .sink
        .render_image(&image, &self.caption)
        .map_err(|e| TransportError::Render(Box::new(e)))?;
      served += 1;
    }
    info!("摄像头传输结束，共 {} 帧", served);
    Ok(served)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::convert::Infallible;

  /// 记录每次显示的尺寸与说明文字
  #[derive(Default)]
  pub(crate) struct RecordingSink {
    pub shown: RefCell<Vec<((u32, u32), String)>>,
  }

  impl Render for RecordingSink {
    type Error = Infallible;

    fn render_image(&self, image: &RgbImage, caption: &str) -> Result<(), Self::Error> {
      self
        .shown
        .borrow_mut()
        .push((image.dimensions(), caption.to_string()));
      Ok(())
    }
  }

  fn frames(n: u64) -> impl Iterator<Item = Frame> {
    (0..n).map(|i| Frame::new(RgbImage::new(4, 4), i, i * 33))
  }

  #[test]
  fn every_frame_reaches_the_sink() {
    let sink = RecordingSink::default();
    let mut transport = LocalTransport::new(frames(5), &sink, StopFlag::new());
    let served = transport
      .serve(|frame| Ok::<_, Infallible>(frame.image))
      .unwrap();
    assert_eq!(served, 5);
    assert_eq!(sink.shown.borrow().len(), 5);
    assert_eq!(sink.shown.borrow()[0].1, "Webcam");
  }

  #[test]
  fn stop_is_checked_between_frames() {
    let sink = RecordingSink::default();
    let stop = StopFlag::new();
    let mut transport = LocalTransport::new(frames(10), &sink, stop.clone());
    let mut calls = 0;
    let served = transport
      .serve(|frame| {
        calls += 1;
        if calls == 2 {
          stop.stop();
        }
        Ok::<_, Infallible>(frame.image)
      })
      .unwrap();
    assert_eq!(served, 2);
    assert_eq!(calls, 2);
  }

  #[derive(Error, Debug)]
  #[error("camera unplugged")]
  struct Unplugged;

  #[test]
  fn callback_failure_ends_serving() {
    let sink = RecordingSink::default();
    let mut transport = LocalTransport::new(frames(3), &sink, StopFlag::new());
    let result = transport.serve(|_| Err::<RgbImage, _>(Unplugged));
    assert!(matches!(result, Err(TransportError::Callback(_))));
    assert!(sink.shown.borrow().is_empty());
  }
}
