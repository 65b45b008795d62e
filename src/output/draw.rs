// 该文件是 Toukui （头盔） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::model::{DetectItem, DetectResult, WithLabel};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: u32 = 22;
const LABEL_CHAR_WIDTH: f32 = 10.0; // 无字体时按字符数估算标签宽度
const LABEL_TEXT_PADDING: i32 = 2;
const LINE_WIDTH: u32 = 2;
const PALETTE_SIZE: usize = 20;
const SIDE_BY_SIDE_GAP: u32 = 8;
const BACKGROUND: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在帧上绘制检测框与标签
pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  line_width: u32,
  palette: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    let palette = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      line_width: LINE_WIDTH,
      palette,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    debug!("已加载标签字体: {}", path.as_ref().display());
    Ok(self.with_font(font))
  }

  pub fn color_for(&self, class_id: u32) -> Rgb<u8> {
    self.palette[class_id as usize % self.palette.len()]
  }

  /// 在原图副本上绘制，返回与输入尺寸一致的图像以及绘制的框数
  pub fn draw_detection<T: WithLabel>(
    &self,
    image: &RgbImage,
    result: &DetectResult<T>,
  ) -> (RgbImage, usize) {
    let mut canvas = image.clone();
    let drawn = self.draw_detections_on_image(&mut canvas, result);
    (canvas, drawn)
  }

  /// 返回实际绘制的检测框数量
  pub fn draw_detections_on_image<T: WithLabel>(
    &self,
    image: &mut RgbImage,
    result: &DetectResult<T>,
  ) -> usize {
    if image.width() == 0 || image.height() == 0 {
      return 0;
    }
    let mut drawn = 0;
    for item in result.iter() {
      if self.draw_bbox_with_label(image, item) {
        drawn += 1;
      }
    }
    drawn
  }

  /// 至少画出一圈边框时返回 true
  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) -> bool {
    let (w, h) = (image.width(), image.height());
    let color = self.color_for(item.kind.to_label_id());

    // 归一化坐标转像素坐标，退化框至少保留 1 像素
    let to_px = |v: f32, extent: u32| ((v * extent as f32) as i64).clamp(0, extent as i64 - 1) as i32;
    let x_min = to_px(item.bbox[0], w);
    let y_min = to_px(item.bbox[1], h);
    let x_max = to_px(item.bbox[2], w).max(x_min);
    let y_max = to_px(item.bbox[3], h).max(y_min);

    let mut outlined = false;
    for t in 0..self.line_width as i32 {
      let width = x_max - x_min + 1 - 2 * t;
      let height = y_max - y_min + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
      outlined = true;
    }
    if !outlined {
      return false;
    }

    let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
    let (text_width, text_height) = match &self.font {
      Some(font) => {
        let (tw, th) = text_size(self.font_scale, font, &label);
        (tw + 2 * LABEL_TEXT_PADDING as u32, th.max(LABEL_TEXT_HEIGHT))
      }
      None => (
        (label.len() as f32 * LABEL_CHAR_WIDTH) as u32,
        LABEL_TEXT_HEIGHT,
      ),
    };

    // 标签放在框上方，空间不够时放在框内顶部
    let label_x = x_min;
    let label_y = if y_min >= text_height as i32 {
      y_min - text_height as i32
    } else {
      y_min
    };
    let label_width = text_width.min(w - label_x as u32);
    let label_height = text_height.min(h - label_y as u32);
    if label_width == 0 || label_height == 0 {
      return true;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        self.font_scale,
        font,
        &label,
      );
    }
    true
  }
}

/// 原图与检测结果左右并排
pub fn side_by_side(left: &RgbImage, right: &RgbImage) -> RgbImage {
  let width = left.width() + SIDE_BY_SIDE_GAP + right.width();
  let height = left.height().max(right.height());
  let mut canvas = RgbImage::from_pixel(width, height, Rgb(BACKGROUND));
  imageops::replace(&mut canvas, left, 0, 0);
  imageops::replace(
    &mut canvas,
    right,
    (left.width() + SIDE_BY_SIDE_GAP) as i64,
    0,
  );
  canvas
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::HelmetLabel;

  fn item(kind: HelmetLabel, bbox: [f32; 4]) -> DetectItem<HelmetLabel> {
    DetectItem {
      kind,
      score: 0.9,
      bbox,
    }
  }

  #[test]
  fn annotated_copy_keeps_dimensions() {
    let image = RgbImage::new(97, 41);
    let result = DetectResult::from(vec![item(HelmetLabel::Helmet, [0.1, 0.1, 0.6, 0.9])]);
    let (annotated, drawn) = Draw::default().draw_detection(&image, &result);
    assert_eq!(annotated.dimensions(), image.dimensions());
    assert_eq!(drawn, 1);
  }

  #[test]
  fn every_detection_is_drawn() {
    let mut image = RgbImage::new(64, 64);
    let result = DetectResult::from(vec![
      item(HelmetLabel::Helmet, [0.1, 0.5, 0.4, 0.9]),
      item(HelmetLabel::NoHelmet, [0.5, 0.5, 0.9, 0.9]),
      // 退化框
      item(HelmetLabel::Helmet, [1.0, 1.0, 1.0, 1.0]),
    ]);
    let drawn = Draw::default().draw_detections_on_image(&mut image, &result);
    assert_eq!(drawn, result.len());
  }

  #[test]
  fn zero_line_width_draws_nothing() {
    let draw = Draw {
      line_width: 0,
      ..Draw::default()
    };
    let mut image = RgbImage::new(32, 32);
    let result = DetectResult::from(vec![item(HelmetLabel::Helmet, [0.5, 0.5, 0.9, 0.9])]);
    assert_eq!(draw.draw_detections_on_image(&mut image, &result), 0);
    assert_eq!(image, RgbImage::new(32, 32));
  }

  #[test]
  fn box_edges_use_class_color() {
    let draw = Draw::default();
    let mut image = RgbImage::new(100, 100);
    let result = DetectResult::from(vec![item(HelmetLabel::NoHelmet, [0.2, 0.5, 0.8, 0.9])]);
    draw.draw_detections_on_image(&mut image, &result);

    let color = draw.color_for(HelmetLabel::NoHelmet.to_label_id());
    // 左边框中段，远离标签
    assert_eq!(image.get_pixel(20, 70), &color);
    // 框内部保持原样
    assert_eq!(image.get_pixel(50, 70), &Rgb([0, 0, 0]));
  }

  #[test]
  fn classes_get_distinct_colors() {
    let draw = Draw::default();
    assert_ne!(draw.color_for(0), draw.color_for(1));
  }

  #[test]
  fn side_by_side_places_both_images() {
    let left = RgbImage::from_pixel(10, 6, Rgb([1, 2, 3]));
    let right = RgbImage::from_pixel(10, 8, Rgb([4, 5, 6]));
    let canvas = side_by_side(&left, &right);
    assert_eq!(canvas.dimensions(), (10 + SIDE_BY_SIDE_GAP + 10, 8));
    assert_eq!(canvas.get_pixel(0, 0), &Rgb([1, 2, 3]));
    assert_eq!(canvas.get_pixel(10 + SIDE_BY_SIDE_GAP, 7), &Rgb([4, 5, 6]));
    assert_eq!(canvas.get_pixel(0, 7), &Rgb(BACKGROUND));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::default().with_font_file("/nonexistent/font.ttf"),
      Err(DrawError::IoError(_))
    ));
  }
}
