// 该文件是 Toukui （头盔） 项目的一部分。
// src/model.rs - 模型
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

use crate::config::InferenceConfig;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input, config: &InferenceConfig)
  -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(
    &self,
    input: &Self::Input,
    config: &InferenceConfig,
  ) -> Result<Self::Output, Self::Error> {
    (**self).infer(input, config)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，相对原图归一化
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }
}

impl<T> Default for DetectResult<T> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
    }
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 固定类别集合
///
/// 模型输出的类别编号必须能通过 `from_label_id` 解析，解析失败的检测不会被绘制或统计。
pub trait WithLabel: Sized + Copy + std::fmt::Debug + 'static {
  const ALL: &'static [Self];

  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;

  fn num_labels() -> usize {
    Self::ALL.len()
  }
}

/// 安全帽检测模型的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HelmetLabel {
  Helmet,
  NoHelmet,
}

impl WithLabel for HelmetLabel {
  const ALL: &'static [Self] = &[HelmetLabel::Helmet, HelmetLabel::NoHelmet];

  fn to_label_str(&self) -> String {
    match self {
      HelmetLabel::Helmet => "helmet",
      HelmetLabel::NoHelmet => "no_helmet",
    }
    .to_string()
  }

  fn to_label_id(&self) -> u32 {
    match self {
      HelmetLabel::Helmet => 0,
      HelmetLabel::NoHelmet => 1,
    }
  }

  fn from_label_id(id: u32) -> Option<Self> {
    Self::ALL.get(id as usize).copied()
  }
}

/// 以 `{0: 'helmet', 1: 'no_helmet'}` 的形式列出类别，用于侧栏的模型信息
pub fn label_table<T: WithLabel>() -> String {
  let entries = T::ALL
    .iter()
    .map(|label| format!("{}: '{}'", label.to_label_id(), label.to_label_str()))
    .collect::<Vec<_>>();
  format!("{{{}}}", entries.join(", "))
}

pub mod postprocess;
pub mod preprocess;

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};
