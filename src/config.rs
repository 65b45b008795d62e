// 该文件是 Toukui （头盔） 项目的一部分。
// src/config.rs - 推理与摄像头配置
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

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIDENCE: f32 = 0.4;
pub const DEFAULT_IOU: f32 = 0.5;
pub const DEFAULT_IMAGE_SIZE: u32 = 320;

/// 界面上推理尺寸滑块的范围与步长
pub const IMAGE_SIZE_MIN: u32 = 320;
pub const IMAGE_SIZE_MAX: u32 = 1024;
pub const IMAGE_SIZE_STEP: u32 = 32;
/// 阈值滑块步长
pub const THRESHOLD_STEP: f32 = 0.05;

/// 推理尺寸的硬上限，超出即拒绝（滑块范围之外仍允许到此为止）
pub const IMAGE_SIZE_LIMIT: u32 = 2048;

/// YOLOv8 最大下采样步长，推理尺寸需为其整数倍
pub const MODEL_STRIDE: u32 = 32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须在 [0, 1] 之间，实际为 {0}")]
  ConfidenceOutOfRange(f32),
  #[error("IoU 阈值必须在 [0, 1] 之间，实际为 {0}")]
  IouOutOfRange(f32),
  #[error("推理尺寸必须为正整数")]
  ZeroImageSize,
  #[error("推理尺寸 {0} 超过上限 {limit}", limit = IMAGE_SIZE_LIMIT)]
  ImageSizeOutOfRange(u32),
  #[error("未知的摄像头方向: {0}")]
  UnknownFacing(String),
}

/// 推理配置
///
/// 整个会话共用一份，对每一帧一视同仁，不支持逐帧覆盖。
/// 只能通过 [`InferenceConfig::new`] 或 `with_*` 构造，因此持有者总能假设取值合法。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceConfig {
  confidence: f32,
  iou: f32,
  image_size: u32,
}

impl Default for InferenceConfig {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
      image_size: DEFAULT_IMAGE_SIZE,
    }
  }
}

impl InferenceConfig {
  pub fn new(confidence: f32, iou: f32, image_size: u32) -> Result<Self, ConfigError> {
    Ok(Self {
      confidence: check_confidence(confidence)?,
      iou: check_iou(iou)?,
      image_size: check_image_size(image_size)?,
    })
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn iou(&self) -> f32 {
    self.iou
  }

  pub fn image_size(&self) -> u32 {
    self.image_size
  }

  pub fn with_confidence(mut self, confidence: f32) -> Result<Self, ConfigError> {
    self.confidence = check_confidence(confidence)?;
    Ok(self)
  }

  pub fn with_iou(mut self, iou: f32) -> Result<Self, ConfigError> {
    self.iou = check_iou(iou)?;
    Ok(self)
  }

  pub fn with_image_size(mut self, image_size: u32) -> Result<Self, ConfigError> {
    self.image_size = check_image_size(image_size)?;
    Ok(self)
  }
}

impl fmt::Display for InferenceConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "conf={:.2} iou={:.2} imgsz={}",
      self.confidence, self.iou, self.image_size
    )
  }
}

fn check_confidence(value: f32) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ConfigError::ConfidenceOutOfRange(value))
  }
}

fn check_iou(value: f32) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ConfigError::IouOutOfRange(value))
  }
}

fn check_image_size(value: u32) -> Result<u32, ConfigError> {
  if value == 0 {
    return Err(ConfigError::ZeroImageSize);
  }

  let rounded = value
    .div_ceil(MODEL_STRIDE)
    .checked_mul(MODEL_STRIDE)
    .filter(|rounded| *rounded <= IMAGE_SIZE_LIMIT)
    .ok_or(ConfigError::ImageSizeOutOfRange(value))?;
  if rounded != value {
    warn!(
      "推理尺寸 {} 不是步长 {} 的整数倍，已调整为 {}",
      value, MODEL_STRIDE, rounded
    );
  }
  Ok(rounded)
}

/// 摄像头朝向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraFacing {
  /// 前置摄像头
  #[default]
  User,
  /// 后置摄像头
  Environment,
}

impl CameraFacing {
  pub fn as_str(&self) -> &'static str {
    match self {
      CameraFacing::User => "user",
      CameraFacing::Environment => "environment",
    }
  }
}

impl fmt::Display for CameraFacing {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CameraFacing {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "user" | "front" => Ok(CameraFacing::User),
      "environment" | "back" => Ok(CameraFacing::Environment),
      other => Err(ConfigError::UnknownFacing(other.to_string())),
    }
  }
}

/// 摄像头朝向到采集设备的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevices {
  pub front: String,
  pub back: String,
}

impl Default for CameraDevices {
  fn default() -> Self {
    Self {
      front: "/dev/video0".to_string(),
      back: "/dev/video1".to_string(),
    }
  }
}

impl CameraDevices {
  pub fn device_for(&self, facing: CameraFacing) -> &str {
    match facing {
      CameraFacing::User => &self.front,
      CameraFacing::Environment => &self.back,
    }
  }
}
