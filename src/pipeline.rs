// 该文件是 Toukui （头盔） 项目的一部分。
// src/pipeline.rs - 帧推理流水线
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

//! 帧推理流水线
//!
//! 三种模式共用的核心：一帧进，一帧标注图与检测结果出。
//! 流水线本身不保存跨帧状态，也不做排序、重试或缓存。

use std::collections::BTreeMap;
use std::fmt;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::InferenceConfig,
  model::{DetectResult, Model, WithLabel},
  output::draw::Draw,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型推理失败: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 一帧的处理结果
#[derive(Debug, Clone)]
pub struct Annotated<T> {
  /// 与输入尺寸一致的标注图
  pub image: RgbImage,
  /// 用于绘制的检测结果
  pub detections: DetectResult<T>,
}

impl<T: WithLabel> Annotated<T> {
  pub fn class_counts(&self) -> ClassCounts {
    ClassCounts::from_detections(&self.detections)
  }
}

/// 单帧内各类别的计数，按类别名排序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCounts(BTreeMap<String, usize>);

impl ClassCounts {
  pub fn from_detections<T: WithLabel>(detections: &DetectResult<T>) -> Self {
    let mut counts = BTreeMap::new();
    for item in detections.iter() {
      *counts.entry(item.kind.to_label_str()).or_insert(0) += 1;
    }
    ClassCounts(counts)
  }

  pub fn get(&self, label: &str) -> usize {
    self.0.get(label).copied().unwrap_or(0)
  }

  pub fn total(&self) -> usize {
    self.0.values().sum()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
    self.0.iter().map(|(label, count)| (label.as_str(), *count))
  }

  pub fn to_json(&self) -> serde_json::Value {
    self
      .iter()
      .map(|(label, count)| (label.to_string(), serde_json::Value::from(count)))
      .collect::<serde_json::Map<_, _>>()
      .into()
  }
}

impl fmt::Display for ClassCounts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, (label, count)) in self.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      write!(f, "{}: {}", label, count)?;
    }
    Ok(())
  }
}

/// 检测器加绘制器
pub struct FramePipeline<M> {
  model: M,
  draw: Draw,
}

impl<M> FramePipeline<M> {
  pub fn new(model: M) -> Self {
    Self {
      model,
      draw: Draw::default(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  /// 对一帧推理并在副本上绘制检测结果
  ///
  /// 检测器的错误原样向上传递。
  pub fn process<T>(
    &self,
    frame: &RgbImage,
    config: &InferenceConfig,
  ) -> Result<Annotated<T>, PipelineError>
  where
    T: WithLabel,
    M: Model<Input = RgbImage, Output = DetectResult<T>>,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    let now = std::time::Instant::now();
    let detections = self
      .model
      .infer(frame, config)
      .map_err(|e| PipelineError::Model(Box::new(e)))?;
    let elapsed = now.elapsed();

    let (image, drawn) = self.draw.draw_detection(frame, &detections);
    debug!(
      "推理 {} 个目标，耗时 {:.2?}，绘制 {} 个",
      detections.len(),
      elapsed,
      drawn
    );

    Ok(Annotated { image, detections })
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::model::{DetectItem, HelmetLabel};

  /// 返回固定检测结果的模型
  pub(crate) struct FixedModel {
    pub items: Vec<DetectItem<HelmetLabel>>,
  }

  impl Model for FixedModel {
    type Input = RgbImage;
    type Output = DetectResult<HelmetLabel>;
    type Error = std::convert::Infallible;

    fn infer(
      &self,
      _input: &RgbImage,
      _config: &InferenceConfig,
    ) -> Result<Self::Output, Self::Error> {
      Ok(DetectResult::from(self.items.clone()))
    }
  }

  #[derive(Error, Debug)]
  #[error("backend exploded")]
  struct Exploded;

  struct FailingModel;

  impl Model for FailingModel {
    type Input = RgbImage;
    type Output = DetectResult<HelmetLabel>;
    type Error = Exploded;

    fn infer(
      &self,
      _input: &RgbImage,
      _config: &InferenceConfig,
    ) -> Result<Self::Output, Self::Error> {
      Err(Exploded)
    }
  }

  pub(crate) fn item(kind: HelmetLabel, bbox: [f32; 4]) -> DetectItem<HelmetLabel> {
    DetectItem {
      kind,
      score: 0.9,
      bbox,
    }
  }

  pub(crate) fn three_workers() -> FixedModel {
    FixedModel {
      items: vec![
        item(HelmetLabel::Helmet, [0.1, 0.1, 0.3, 0.4]),
        item(HelmetLabel::Helmet, [0.5, 0.2, 0.7, 0.6]),
        item(HelmetLabel::NoHelmet, [0.75, 0.5, 0.95, 0.9]),
      ],
    }
  }

  #[test]
  fn annotated_frame_keeps_dimensions() {
    let pipeline = FramePipeline::new(three_workers());
    let frame = RgbImage::new(97, 53);
    let annotated = pipeline
      .process(&frame, &InferenceConfig::default())
      .unwrap();
    assert_eq!(annotated.image.dimensions(), frame.dimensions());
  }

  #[test]
  fn every_detection_is_drawn_and_labelled() {
    let pipeline = FramePipeline::new(three_workers());
    let frame = RgbImage::new(100, 100);
    let annotated = pipeline
      .process(&frame, &InferenceConfig::default())
      .unwrap();

    let draw = Draw::default();
    assert_eq!(annotated.detections.len(), 3);
    for item in annotated.detections.iter() {
      assert!(HelmetLabel::from_label_id(item.kind.to_label_id()).is_some());
      // 右下角不会被任何标签覆盖，必须是该类别的框色
      let x = (item.bbox[2] * 100.0) as u32;
      let y = (item.bbox[3] * 100.0) as u32;
      assert_eq!(
        annotated.image.get_pixel(x, y),
        &draw.color_for(item.kind.to_label_id()),
        "{:?} 的框未绘制",
        item.kind
      );
    }
  }

  #[test]
  fn deterministic_detector_gives_identical_output() {
    let pipeline = FramePipeline::new(three_workers());
    let frame = RgbImage::from_pixel(40, 30, image::Rgb([30, 60, 90]));
    let config = InferenceConfig::default();
    let first = pipeline.process(&frame, &config).unwrap();
    let second = pipeline.process(&frame, &config).unwrap();
    assert_eq!(first.image, second.image);
    assert_eq!(first.detections, second.detections);
  }

  #[test]
  fn class_counts_aggregate_by_label() {
    let pipeline = FramePipeline::new(three_workers());
    let annotated = pipeline
      .process(&RgbImage::new(32, 32), &InferenceConfig::default())
      .unwrap();
    let counts = annotated.class_counts();
    assert_eq!(counts.get("helmet"), 2);
    assert_eq!(counts.get("no_helmet"), 1);
    assert_eq!(counts.total(), 3);
    assert_eq!(counts.to_string(), "helmet: 2\nno_helmet: 1");
    assert_eq!(
      counts.to_json(),
      serde_json::json!({"helmet": 2, "no_helmet": 1})
    );
  }

  #[test]
  fn no_detections_leaves_frame_untouched() {
    let pipeline = FramePipeline::new(FixedModel { items: vec![] });
    let frame = RgbImage::from_pixel(16, 16, image::Rgb([1, 2, 3]));
    let annotated = pipeline
      .process(&frame, &InferenceConfig::default())
      .unwrap();
    assert_eq!(annotated.image, frame);
    assert!(annotated.class_counts().is_empty());
  }

  #[test]
  fn detector_failure_is_propagated() {
    let pipeline = FramePipeline::new(FailingModel);
    let result = pipeline.process(&RgbImage::new(8, 8), &InferenceConfig::default());
    match result {
      Err(PipelineError::Model(e)) => assert_eq!(e.to_string(), "backend exploded"),
      Ok(_) => panic!("expected failure"),
    }
  }
}
