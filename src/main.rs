// 该文件是 Toukui （头盔） 项目的一部分。
// src/main.rs - 安全帽检测命令行入口
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use toukui::{
  FromUrl,
  app::{Action, AppError, DetectorStatus, Redraw, Region, Session, UiEvent},
  config::InferenceConfig,
  input::InputWrapper,
  model::{HelmetLabel, Yolov8, Yolov8Builder, label_table},
  output::{OutputWrapper, draw::Draw},
  pipeline::FramePipeline,
  task::{ImageTask, StopFlag, Task, VideoTask, WebcamTask},
};

use crate::args::{Args, Command};

type HelmetPipeline = FramePipeline<Yolov8<HelmetLabel>>;

/// 启动时加载一次模型；失败只报告一次，会话以检测器不可用的状态继续
///
/// 预热使用会话的推理尺寸，首帧不必再为该尺寸构建执行计划。
fn load_detector(
  url: &Url,
  config: &InferenceConfig,
) -> (Option<Yolov8<HelmetLabel>>, DetectorStatus) {
  match Yolov8Builder::from_url(url).and_then(|builder| builder.build::<HelmetLabel>(config)) {
    Ok(model) => {
      let classes = label_table::<HelmetLabel>();
      info!("模型加载成功，类别: {}", classes);
      (Some(model), DetectorStatus::Ready { classes })
    }
    Err(e) => {
      error!("模型加载失败: {}", e);
      (
        None,
        DetectorStatus::Unavailable {
          reason: e.to_string(),
        },
      )
    }
  }
}

fn redraw(session: &Session, redraw: &Redraw) {
  if redraw.contains(Region::Title) {
    info!("{}", session.title());
  }
  if redraw.contains(Region::Settings) || redraw.contains(Region::ModelInfo) {
    for line in session.sidebar() {
      info!("  {}", line);
    }
  }
}

fn frame_limit(max_frames: Option<u64>) -> usize {
  max_frames
    .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
    .unwrap_or(usize::MAX)
}

fn run_action(
  action: Action,
  pipeline: Option<&HelmetPipeline>,
  command: &Command,
  stop: &StopFlag,
) -> Result<()> {
  if let Action::StopProcessing = action {
    stop.stop();
    return Ok(());
  }
  let pipeline =
    pipeline.ok_or_else(|| AppError::DetectorUnavailable("模型未加载".to_string()))?;
  let output = OutputWrapper::from_url(command.output())?;

  match (action, command) {
    (Action::DetectImage { input, config }, Command::Image(args)) => {
      let source = InputWrapper::from_url(&input)?;
      let report = ImageTask::new(config).run_task(source, pipeline, &output)?;
      info!(
        "Detection Results（共 {} 个）:\n{}",
        report.counts.total(),
        report.counts
      );
      if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report.to_json())?;
        std::fs::write(path, json)
          .with_context(|| format!("无法写入报告: {}", path.display()))?;
        info!("检测报告已写入 {}", path.display());
      }
    }
    (Action::ProcessVideo { input, config }, Command::Video(args)) => {
      stop.reset();
      let source = InputWrapper::from_url(&input)?;
      let summary = VideoTask::new(config, stop.clone())
        .with_frame_limit(args.max_frames)
        .run_task(source, pipeline, &output)?;
      info!(
        "视频处理结束：{} 帧，{} 个目标{}",
        summary.frames,
        summary.detections,
        if summary.stopped { "（已停止）" } else { "" }
      );
    }
    (Action::StartWebcam { facing, config }, Command::Webcam(args)) => {
      stop.reset();
      let url = args.source_url(facing)?;
      info!("摄像头 {}: {}", facing, url);
      let source = InputWrapper::from_url(&url)?.take(frame_limit(args.max_frames));
      let served = WebcamTask::new(config, stop.clone()).run_task(source, pipeline, &output)?;
      info!("摄像头检测结束，共 {} 帧", served);
    }
    (action, _) => {
      anyhow::bail!("动作 {:?} 与当前命令不匹配", action);
    }
  }
  Ok(())
}

/// 依次把界面事件交给会话并执行产生的动作
///
/// 检测器不可用时检测请求会被拒绝，这里记录后正常结束，加载错误已在启动时报告过。
fn drive<F>(session: &mut Session, events: Vec<UiEvent>, mut run: F) -> Result<()>
where
  F: FnMut(Action) -> Result<()>,
{
  if !session.detection_enabled() {
    warn!("检测器不可用，仅能调整设置");
  }

  for event in events {
    let update = match session.apply(event) {
      Ok(update) => update,
      Err(AppError::DetectorUnavailable(reason)) => {
        warn!("检测请求已拒绝: {}", reason);
        return Ok(());
      }
      Err(e) => return Err(e.into()),
    };
    redraw(session, &update.redraw);

    if let Some(action) = update.action {
      run(action)?;
      if session.is_processing() {
        let update = session.apply(UiEvent::ProcessingFinished)?;
        redraw(session, &update.redraw);
      }
    }
  }
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型路径: {}", args.model);

  // 尺寸不合法时以默认尺寸预热，错误留给会话报告
  let warm_up = InferenceConfig::default()
    .with_image_size(args.imgsz)
    .unwrap_or_default();
  let (model, status) = load_detector(&args.model, &warm_up);
  let mut draw = Draw::default();
  if let Some(font) = &args.font {
    draw = draw.with_font_file(font)?;
  }
  let pipeline = model.map(|model| FramePipeline::new(model).with_draw(draw));

  let stop = StopFlag::new();
  stop.install_ctrlc()?;

  let mut session = Session::new(status);
  info!("{}", session.title());
  for line in session.sidebar() {
    info!("  {}", line);
  }

  let mut events = vec![
    UiEvent::SetConfidence(args.confidence),
    UiEvent::SetIou(args.iou),
    UiEvent::SetImageSize(args.imgsz),
  ];
  events.extend(args.command.events());

  drive(&mut session, events, |action| {
    run_action(action, pipeline.as_ref(), &args.command, &stop)
  })?;

  info!("任务完成，退出");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn image_events() -> Vec<UiEvent> {
    vec![
      UiEvent::SetConfidence(0.6),
      UiEvent::UploadImage(Url::parse("image:///tmp/site.jpg").unwrap()),
      UiEvent::Detect,
    ]
  }

  #[test]
  fn refused_detection_ends_cleanly() {
    let mut session = Session::new(DetectorStatus::Unavailable {
      reason: "权重文件不存在".to_string(),
    });
    let mut actions = 0;
    let result = drive(&mut session, image_events(), |_| {
      actions += 1;
      Ok(())
    });
    assert!(result.is_ok());
    assert_eq!(actions, 0);
    // 拒绝之前的设置仍然生效
    assert_eq!(session.config().confidence(), 0.6);
  }

  #[test]
  fn ready_detector_runs_the_action_once() {
    let mut session = Session::new(DetectorStatus::Ready {
      classes: "helmet, no_helmet".to_string(),
    });
    let mut actions = Vec::new();
    drive(&mut session, image_events(), |action| {
      actions.push(action);
      Ok(())
    })
    .unwrap();
    assert_eq!(actions.len(), 1);
    assert!(matches!(actions[0], Action::DetectImage { .. }));
    assert!(!session.is_processing());
  }

  #[test]
  fn invalid_setting_is_still_an_error() {
    let mut session = Session::new(DetectorStatus::Ready {
      classes: "helmet, no_helmet".to_string(),
    });
    let result = drive(&mut session, vec![UiEvent::SetImageSize(u32::MAX)], |_| Ok(()));
    assert!(result.is_err());
  }
}
