// 该文件是 Toukui （头盔） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 检测模型
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

use std::{
  collections::HashMap,
  marker::PhantomData,
  sync::{Arc, Mutex},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::InferenceConfig,
  model::{
    DetectResult, Model, WithLabel,
    postprocess::{MAX_DETECTIONS, decode_yolov8, nms, to_detect_item},
    preprocess::{Letterbox, nchw_unit_scale},
  },
  url_file_path,
};

type YoloPlan = TypedRunnableModel<TypedModel>;

const YOLOV8_NUM_INPUTS: usize = 1;
const YOLOV8_NUM_OUTPUTS: usize = 1;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(TractError),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理错误: {0}")]
  Inference(TractError),
  #[error("输出形状不匹配: 期望 [1, {expected}, N], 实际 {actual:?}")]
  OutputShapeMismatch { expected: usize, actual: Vec<usize> },
  #[error("输入帧为空")]
  EmptyFrame,
  #[error("执行计划缓存不可用")]
  PlanCachePoisoned,
}

/// YOLOv8 检测器
///
/// 启动时创建一次，之后以只读方式在所有调用间共享。推理尺寸可随会话调整，
/// 每种尺寸对应的执行计划在首次使用时构建并缓存。
pub struct Yolov8<T> {
  model: InferenceModel,
  // 模型输入为静态形状时记录其边长，推理一律使用该尺寸
  fixed_size: Option<u32>,
  plans: Mutex<HashMap<u32, Arc<YoloPlan>>>,
  _phantom: PhantomData<T>,
}

pub struct Yolov8Builder {
  model_path: String,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = url_file_path(url);
    if model_path.is_empty() || model_path == "/" {
      return Err(Yolov8Error::ModelPathError("未指定模型文件".to_string()));
    }

    Ok(Yolov8Builder { model_path })
  }
}

impl Yolov8Builder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
    }
  }

  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  /// 加载模型，并以会话的推理尺寸预热一次
  ///
  /// 预热会校验输入输出数量以及类别数，加载阶段的问题在这里一次性暴露。
  pub fn build<T: WithLabel>(self, config: &InferenceConfig) -> Result<Yolov8<T>, Yolov8Error> {
    info!("加载模型文件: {}", self.model_path);
    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(Yolov8Error::ModelLoadError)?;

    let num_inputs = model
      .input_outlets()
      .map_err(Yolov8Error::ModelLoadError)?
      .len();
    let num_outputs = model
      .output_outlets()
      .map_err(Yolov8Error::ModelLoadError)?
      .len();
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != YOLOV8_NUM_INPUTS || num_outputs != YOLOV8_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLOV8_NUM_INPUTS, YOLOV8_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolov8Error::ModelInvalid(msg));
    }

    let fixed_size = declared_input_size(&model);
    if let Some(fixed) = fixed_size {
      if fixed != config.image_size() {
        warn!(
          "模型输入固定为 {}x{}，忽略推理尺寸 {}",
          fixed,
          fixed,
          config.image_size()
        );
      }
    }

    let detector = Yolov8 {
      model,
      fixed_size,
      plans: Mutex::new(HashMap::new()),
      _phantom: PhantomData,
    };

    let size = select_input_size(fixed_size, config.image_size());
    let warm_up = RgbImage::new(size, size);
    detector.infer(&warm_up, config)?;
    info!("模型加载完成");

    Ok(detector)
  }
}

/// 读取模型声明的静态输入边长，形如 `[N, 3, S, S]`
fn declared_input_size(model: &InferenceModel) -> Option<u32> {
  let fact = model.input_fact(0).ok()?;
  let shape = fact.shape.as_concrete_finite().ok()??;
  square_input_side(&shape)
}

fn square_input_side(shape: &[usize]) -> Option<u32> {
  match shape {
    [_, 3, h, w] if h == w && *h > 0 => u32::try_from(*h).ok(),
    _ => None,
  }
}

/// 静态输入的模型只能以声明尺寸运行，动态输入则采用请求的尺寸
fn select_input_size(fixed: Option<u32>, requested: u32) -> u32 {
  fixed.unwrap_or(requested)
}

impl<T> Yolov8<T> {
  fn plan(&self, size: u32) -> Result<Arc<YoloPlan>, Yolov8Error> {
    let mut plans = self
      .plans
      .lock()
      .map_err(|_| Yolov8Error::PlanCachePoisoned)?;
    if let Some(plan) = plans.get(&size) {
      return Ok(plan.clone());
    }

    info!("为推理尺寸 {} 构建执行计划", size);
    let side = size as usize;
    let model = if self.fixed_size.is_some() {
      Ok(self.model.clone())
    } else {
      self.model.clone().with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
      )
    };
    let plan = model
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(Yolov8Error::ModelLoadError)?;

    let plan = Arc::new(plan);
    plans.insert(size, plan.clone());
    Ok(plan)
  }
}

impl<T: WithLabel> Model for Yolov8<T> {
  type Input = RgbImage;
  type Output = DetectResult<T>;
  type Error = Yolov8Error;

  fn infer(&self, image: &Self::Input, config: &InferenceConfig) -> Result<Self::Output, Self::Error> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(Yolov8Error::EmptyFrame);
    }

    let size = select_input_size(self.fixed_size, config.image_size());
    let side = size as usize;
    let letterbox = Letterbox::new(width, height, size);
    let input = letterbox.apply(image);
    let data = nchw_unit_scale(&input);
    let tensor =
      Tensor::from_shape(&[1, 3, side, side], data.as_slice()).map_err(Yolov8Error::Inference)?;

    debug!("执行模型推理 ({})", config);
    let plan = self.plan(size)?;
    let outputs = plan
      .run(tvec!(tensor.into()))
      .map_err(Yolov8Error::Inference)?;

    let output = outputs
      .first()
      .ok_or_else(|| Yolov8Error::ModelInvalid("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(Yolov8Error::Inference)?;

    let num_classes = T::num_labels();
    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 || shape[1] != 4 + num_classes {
      return Err(Yolov8Error::OutputShapeMismatch {
        expected: 4 + num_classes,
        actual: shape,
      });
    }

    let data: Vec<f32> = view.iter().copied().collect();
    let candidates = nms(
      decode_yolov8(&data, num_classes, config.confidence()),
      config.iou(),
      MAX_DETECTIONS,
    );

    let items = candidates
      .iter()
      .filter_map(|candidate| to_detect_item::<T>(candidate, &letterbox, width, height))
      .collect::<Vec<_>>();
    debug!("检测到 {} 个物体", items.len());

    Ok(items.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::HelmetLabel;

  #[test]
  fn builder_accepts_yolov8_scheme() {
    let url = Url::parse("yolov8:///weights/best.onnx").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), "/weights/best.onnx");
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("image:///weights/best.onnx").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::ModelPathError(_))
    ));
  }

  #[test]
  fn missing_model_file_fails_to_load() {
    let result =
      Yolov8Builder::new("/nonexistent/best.onnx").build::<HelmetLabel>(&InferenceConfig::default());
    assert!(matches!(result, Err(Yolov8Error::ModelLoadError(_))));
  }

  #[test]
  fn static_square_input_is_detected() {
    assert_eq!(square_input_side(&[1, 3, 640, 640]), Some(640));
    assert_eq!(square_input_side(&[1, 3, 480, 640]), None);
    assert_eq!(square_input_side(&[1, 1, 640, 640]), None);
    assert_eq!(square_input_side(&[3, 640, 640]), None);
  }

  #[test]
  fn fixed_input_overrides_requested_size() {
    assert_eq!(select_input_size(Some(640), 320), 640);
    assert_eq!(select_input_size(None, 640), 640);
    assert_eq!(select_input_size(None, 320), 320);
  }
}
