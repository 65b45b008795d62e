// 该文件是 Toukui （头盔） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

use toukui::{
  app::{Mode, UiEvent},
  config::{
    CameraDevices, CameraFacing, DEFAULT_CONFIDENCE, DEFAULT_IMAGE_SIZE, DEFAULT_IOU,
  },
};

/// Toukui 安全帽检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，如 yolov8:weights/best.onnx
  #[arg(long, global = true, value_name = "MODEL", default_value = "yolov8:weights/best.onnx")]
  pub model: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, global = true, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, global = true, default_value_t = DEFAULT_IOU, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 推理尺寸 (320 - 1024，步长 32)
  #[arg(long, global = true, default_value_t = DEFAULT_IMAGE_SIZE, value_name = "PIXELS")]
  pub imgsz: u32,

  /// 标签字体文件 (TTF/OTF)
  #[arg(long, global = true, value_name = "FILE")]
  pub font: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 单张图像检测
  Image(ImageArgs),
  /// 视频文件逐帧检测
  Video(VideoArgs),
  /// 实时摄像头检测
  Webcam(WebcamArgs),
}

#[derive(clap::Args, Debug)]
pub struct ImageArgs {
  /// 输入图像，如 image:///data/site.jpg；image:- 从标准输入读取
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 原图与检测图并排输出的位置
  #[arg(long, value_name = "OUTPUT", default_value = "image:detected.png")]
  pub output: Url,

  /// 检测结果 JSON 报告
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct VideoArgs {
  /// 输入视频，如 gst://file/data/site.mp4
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 最新一帧的显示位置
  #[arg(long, value_name = "OUTPUT", default_value = "image:latest.png")]
  pub output: Url,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct WebcamArgs {
  /// 摄像头方向：user（前置）或 environment（后置）
  #[arg(long, value_name = "FACING", default_value = "user")]
  pub camera: CameraFacing,

  #[arg(long, value_name = "DEVICE", default_value = "/dev/video0")]
  pub front_device: String,

  #[arg(long, value_name = "DEVICE", default_value = "/dev/video1")]
  pub back_device: String,

  /// 采集后端
  #[arg(long, value_name = "BACKEND", default_value = "v4l", value_parser = ["v4l", "gst"])]
  pub backend: String,

  #[arg(long, value_name = "OUTPUT", default_value = "image:webcam.png")]
  pub output: Url,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

impl WebcamArgs {
  pub fn devices(&self) -> CameraDevices {
    CameraDevices {
      front: self.front_device.clone(),
      back: self.back_device.clone(),
    }
  }

  /// 由摄像头方向得到采集地址
  pub fn source_url(&self, facing: CameraFacing) -> Result<Url, url::ParseError> {
    let devices = self.devices();
    let device = devices.device_for(facing);
    match self.backend.as_str() {
      "gst" => Url::parse(&format!("gst://camera{}", device)),
      _ => Url::parse(&format!("v4l://{}", device)),
    }
  }
}

impl Command {
  /// 命令行等价的界面操作序列
  pub fn events(&self) -> Vec<UiEvent> {
    match self {
      Command::Image(args) => vec![
        UiEvent::SelectMode(Mode::Image),
        UiEvent::UploadImage(args.input.clone()),
        UiEvent::Detect,
      ],
      Command::Video(args) => vec![
        UiEvent::SelectMode(Mode::Video),
        UiEvent::UploadVideo(args.input.clone()),
        UiEvent::StartProcessing,
      ],
      Command::Webcam(args) => vec![
        UiEvent::SelectMode(Mode::Webcam),
        UiEvent::SelectCamera(args.camera),
        UiEvent::StartProcessing,
      ],
    }
  }

  pub fn output(&self) -> &Url {
    match self {
      Command::Image(args) => &args.output,
      Command::Video(args) => &args.output,
      Command::Webcam(args) => &args.output,
    }
  }
}
