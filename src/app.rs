// 该文件是 Toukui （头盔） 项目的一部分。
// src/app.rs - 保留状态的交互会话
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

//! 交互会话
//!
//! 会话保留界面状态（模式、推理配置、检测器状态、上传内容、摄像头方向、处理中标志）。
//! 每个界面事件经 [`Session::apply`] 修改状态，与修改前的状态比较后，
//! 只返回需要重绘的区域以及需要执行的动作，而不是在每次交互时重跑整套逻辑。

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CameraFacing, ConfigError, InferenceConfig};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
  #[error("检测器不可用: {0}")]
  DetectorUnavailable(String),
  #[error("{0}")]
  Config(#[from] ConfigError),
  #[error("当前模式为 {actual}，该操作需要 {expected}")]
  WrongMode { expected: Mode, actual: Mode },
  #[error("尚未上传{0}")]
  NothingUploaded(&'static str),
  #[error("已在处理中")]
  AlreadyProcessing,
}

/// 界面模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
  #[default]
  Image,
  Video,
  Webcam,
}

impl Mode {
  pub fn title(&self) -> &'static str {
    match self {
      Mode::Image => "Image Inference",
      Mode::Video => "Video Inference",
      Mode::Webcam => "Real-time Webcam",
    }
  }
}

impl fmt::Display for Mode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.title())
  }
}

/// 检测器状态，启动时确定，会话期间不再改变
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorStatus {
  Ready { classes: String },
  Unavailable { reason: String },
}

impl DetectorStatus {
  pub fn is_ready(&self) -> bool {
    matches!(self, DetectorStatus::Ready { .. })
  }
}

/// 界面事件
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
  SelectMode(Mode),
  SetConfidence(f32),
  SetIou(f32),
  SetImageSize(u32),
  UploadImage(Url),
  UploadVideo(Url),
  SelectCamera(CameraFacing),
  Detect,
  StartProcessing,
  StopProcessing,
  /// 视频或摄像头处理自然结束
  ProcessingFinished,
}

/// 需要重绘的界面区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
  Title,
  Settings,
  ModelInfo,
  ImagePanel,
  VideoPanel,
  WebcamPanel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redraw(BTreeSet<Region>);

impl Redraw {
  pub fn contains(&self, region: Region) -> bool {
    self.0.contains(&region)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = Region> + '_ {
    self.0.iter().copied()
  }

  fn mark(&mut self, changed: bool, region: Region) {
    if changed {
      self.0.insert(region);
    }
  }
}

/// 需要由调用方执行的动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  DetectImage {
    input: Url,
    config: InferenceConfig,
  },
  ProcessVideo {
    input: Url,
    config: InferenceConfig,
  },
  StartWebcam {
    facing: CameraFacing,
    config: InferenceConfig,
  },
  StopProcessing,
}

/// 一次事件的处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
  pub redraw: Redraw,
  pub action: Option<Action>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  mode: Mode,
  config: InferenceConfig,
  detector: DetectorStatus,
  uploaded_image: Option<Url>,
  uploaded_video: Option<Url>,
  camera: CameraFacing,
  processing: bool,
}

impl Session {
  pub fn new(detector: DetectorStatus) -> Self {
    Self {
      mode: Mode::default(),
      config: InferenceConfig::default(),
      detector,
      uploaded_image: None,
      uploaded_video: None,
      camera: CameraFacing::default(),
      processing: false,
    }
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn config(&self) -> &InferenceConfig {
    &self.config
  }

  pub fn detector(&self) -> &DetectorStatus {
    &self.detector
  }

  pub fn camera(&self) -> CameraFacing {
    self.camera
  }

  pub fn is_processing(&self) -> bool {
    self.processing
  }

  /// 检测器不可用时所有检测入口都被禁用
  pub fn detection_enabled(&self) -> bool {
    self.detector.is_ready()
  }

  pub fn title(&self) -> String {
    format!("YOLOv8 Helmet Detection - {}", self.mode)
  }

  /// 侧栏内容
  pub fn sidebar(&self) -> Vec<String> {
    let mut lines = vec![match &self.detector {
      DetectorStatus::Ready { .. } => "Model Loaded Successfully!".to_string(),
      DetectorStatus::Unavailable { reason } => format!("Error loading model: {}", reason),
    }];
    lines.push(format!("Select Mode: {}", self.mode));
    lines.push(format!("Confidence Threshold: {:.2}", self.config.confidence()));
    lines.push(format!("IOU Threshold: {:.2}", self.config.iou()));
    lines.push(format!("Inference Image Size: {}", self.config.image_size()));
    if let DetectorStatus::Ready { classes } = &self.detector {
      lines.push(format!("Classes: {}", classes));
    }
    lines
  }

  /// 应用一个事件，返回需要重绘的区域与待执行的动作
  ///
  /// 出错时状态保持不变。
  pub fn apply(&mut self, event: UiEvent) -> Result<Update, AppError> {
    let previous = self.clone();
    let action = match self.update(event) {
      Ok(action) => action,
      Err(e) => {
        *self = previous;
        warn!("界面事件被拒绝: {}", e);
        return Err(e);
      }
    };
    let redraw = self.diff(&previous);
    debug!("重绘区域: {:?}, 动作: {:?}", redraw, action);
    Ok(Update { redraw, action })
  }

  fn update(&mut self, event: UiEvent) -> Result<Option<Action>, AppError> {
    match event {
      UiEvent::SelectMode(mode) => {
        if mode != self.mode {
          self.mode = mode;
          // 切换模式会中断正在进行的处理
          if self.processing {
            self.processing = false;
            return Ok(Some(Action::StopProcessing));
          }
        }
        Ok(None)
      }
      UiEvent::SetConfidence(value) => {
        self.config = self.config.with_confidence(value)?;
        Ok(None)
      }
      UiEvent::SetIou(value) => {
        self.config = self.config.with_iou(value)?;
        Ok(None)
      }
      UiEvent::SetImageSize(value) => {
        self.config = self.config.with_image_size(value)?;
        Ok(None)
      }
      UiEvent::UploadImage(url) => {
        self.uploaded_image = Some(url);
        Ok(None)
      }
      UiEvent::UploadVideo(url) => {
        self.uploaded_video = Some(url);
        Ok(None)
      }
      UiEvent::SelectCamera(facing) => {
        self.camera = facing;
        Ok(None)
      }
      UiEvent::Detect => {
        self.require_mode(Mode::Image)?;
        self.require_detector()?;
        let input = self
          .uploaded_image
          .clone()
          .ok_or(AppError::NothingUploaded("图像"))?;
        Ok(Some(Action::DetectImage {
          input,
          config: self.config,
        }))
      }
      UiEvent::StartProcessing => {
        if self.processing {
          return Err(AppError::AlreadyProcessing);
        }
        let action = match self.mode {
          Mode::Video => {
            self.require_detector()?;
            let input = self
              .uploaded_video
              .clone()
              .ok_or(AppError::NothingUploaded("视频"))?;
            Action::ProcessVideo {
              input,
              config: self.config,
            }
          }
          Mode::Webcam => {
            self.require_detector()?;
            Action::StartWebcam {
              facing: self.camera,
              config: self.config,
            }
          }
          Mode::Image => {
            return Err(AppError::WrongMode {
              expected: Mode::Video,
              actual: Mode::Image,
            });
          }
        };
        self.processing = true;
        Ok(Some(action))
      }
      UiEvent::StopProcessing => {
        if self.processing {
          self.processing = false;
          Ok(Some(Action::StopProcessing))
        } else {
          Ok(None)
        }
      }
      UiEvent::ProcessingFinished => {
        self.processing = false;
        Ok(None)
      }
    }
  }

  fn require_mode(&self, expected: Mode) -> Result<(), AppError> {
    if self.mode == expected {
      Ok(())
    } else {
      Err(AppError::WrongMode {
        expected,
        actual: self.mode,
      })
    }
  }

  fn require_detector(&self) -> Result<(), AppError> {
    match &self.detector {
      DetectorStatus::Ready { .. } => Ok(()),
      DetectorStatus::Unavailable { reason } => Err(AppError::DetectorUnavailable(reason.clone())),
    }
  }

  fn diff(&self, previous: &Session) -> Redraw {
    let mut redraw = Redraw::default();
    let mode_changed = self.mode != previous.mode;
    redraw.mark(mode_changed, Region::Title);
    redraw.mark(
      mode_changed || self.config != previous.config,
      Region::Settings,
    );
    redraw.mark(self.detector != previous.detector, Region::ModelInfo);

    let processing_changed = self.processing != previous.processing;
    let panel_changed = match self.mode {
      Mode::Image => self.uploaded_image != previous.uploaded_image,
      Mode::Video => self.uploaded_video != previous.uploaded_video || processing_changed,
      Mode::Webcam => self.camera != previous.camera || processing_changed,
    };
    let panel = match self.mode {
      Mode::Image => Region::ImagePanel,
      Mode::Video => Region::VideoPanel,
      Mode::Webcam => Region::WebcamPanel,
    };
    redraw.mark(mode_changed || panel_changed, panel);
    redraw
  }
}
