// 该文件是 Toukui （头盔） 项目的一部分。
// src/model/postprocess.rs - 检测结果后处理
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

use std::cmp::Ordering;

use tracing::warn;

use crate::model::{DetectItem, WithLabel, preprocess::Letterbox};

/// 每帧最多保留的检测数
pub const MAX_DETECTIONS: usize = 300;

/// 候选框，`bbox` 为 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4],
}

/// 解析 YOLOv8 检测头输出
///
/// `output` 按 `[4 + num_classes, anchors]` 行优先排列，前 4 行为 `cx, cy, w, h`，
/// 其余为各类别得分。仅保留最高得分严格大于 `confidence` 的候选框。
pub fn decode_yolov8(output: &[f32], num_classes: usize, confidence: f32) -> Vec<Candidate> {
  let channels = 4 + num_classes;
  if num_classes == 0 || output.len() % channels != 0 {
    return Vec::new();
  }
  let anchors = output.len() / channels;
  let at = |row: usize, anchor: usize| output[row * anchors + anchor];

  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(4 + c, anchor)))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if score <= confidence {
      continue;
    }

    let cx = at(0, anchor);
    let cy = at(1, anchor);
    let w = at(2, anchor);
    let h = at(3, anchor);

    candidates.push(Candidate {
      class_id: class_id as u32,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  candidates
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按类别的非极大值抑制
///
/// 与已保留的同类高分框 IoU 大于 `iou_threshold` 的框被抑制。
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, max_det: usize) -> Vec<Candidate> {
  // 按置信度降序排序
  candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_det {
      break;
    }
    let suppressed = kept.iter().any(|best| {
      best.class_id == candidate.class_id && iou(&best.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 将输入张量坐标系下的候选框映射回原图，并归一化为检测结果
///
/// 类别编号不在固定类别集合内的候选框被丢弃。
pub fn to_detect_item<T: WithLabel>(
  candidate: &Candidate,
  letterbox: &Letterbox,
  src_width: u32,
  src_height: u32,
) -> Option<DetectItem<T>> {
  let Some(kind) = T::from_label_id(candidate.class_id) else {
    warn!("丢弃未知类别 {} 的检测结果", candidate.class_id);
    return None;
  };

  let (x_min, y_min) = letterbox.to_source(candidate.bbox[0], candidate.bbox[1]);
  let (x_max, y_max) = letterbox.to_source(candidate.bbox[2], candidate.bbox[3]);
  let (w, h) = (src_width.max(1) as f32, src_height.max(1) as f32);

  Some(DetectItem {
    kind,
    score: candidate.score,
    bbox: [
      (x_min / w).clamp(0.0, 1.0),
      (y_min / h).clamp(0.0, 1.0),
      (x_max / w).clamp(0.0, 1.0),
      (y_max / h).clamp(0.0, 1.0),
    ],
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::HelmetLabel;

  fn cand(class_id: u32, score: f32, bbox: [f32; 4]) -> Candidate {
    Candidate {
      class_id,
      score,
      bbox,
    }
  }

  /// 按 `[4 + nc, anchors]` 排列构造输出
  fn head(rows: &[[f32; 6]]) -> Vec<f32> {
    let anchors = rows.len();
    let mut out = vec![0f32; 6 * anchors];
    for (a, row) in rows.iter().enumerate() {
      for (r, value) in row.iter().enumerate() {
        out[r * anchors + a] = *value;
      }
    }
    out
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
  }

  #[test]
  fn iou_of_half_overlap() {
    let a = [0.0, 0.0, 10.0, 10.0];
    let b = [5.0, 0.0, 15.0, 10.0];
    assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
  }

  #[test]
  fn decode_picks_best_class_and_centers_box() {
    let out = head(&[[50.0, 40.0, 20.0, 10.0, 0.2, 0.9]]);
    let candidates = decode_yolov8(&out, 2, 0.4);
    assert_eq!(candidates, vec![cand(1, 0.9, [40.0, 35.0, 60.0, 45.0])]);
  }

  #[test]
  fn decode_drops_scores_at_or_below_threshold() {
    let out = head(&[
      [10.0, 10.0, 4.0, 4.0, 0.4, 0.1],
      [20.0, 20.0, 4.0, 4.0, 0.41, 0.0],
    ]);
    let candidates = decode_yolov8(&out, 2, 0.4);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].score, 0.41);
  }

  #[test]
  fn decode_rejects_mismatched_layout() {
    assert!(decode_yolov8(&[0.0; 7], 2, 0.1).is_empty());
  }

  #[test]
  fn nms_suppresses_same_class_overlap_only() {
    let kept = nms(
      vec![
        cand(0, 0.8, [0.0, 0.0, 10.0, 10.0]),
        cand(0, 0.9, [1.0, 1.0, 11.0, 11.0]),
        cand(1, 0.7, [0.0, 0.0, 10.0, 10.0]),
      ],
      0.5,
      MAX_DETECTIONS,
    );
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].class_id, 1);
  }

  #[test]
  fn nms_keeps_overlap_at_threshold() {
    let a = cand(0, 0.9, [0.0, 0.0, 10.0, 10.0]);
    let b = cand(0, 0.8, [5.0, 0.0, 15.0, 10.0]);
    let overlap = iou(&a.bbox, &b.bbox);
    assert_eq!(nms(vec![a, b], overlap, MAX_DETECTIONS).len(), 2);
    assert_eq!(nms(vec![a, b], overlap - 0.01, MAX_DETECTIONS).len(), 1);
  }

  #[test]
  fn nms_respects_max_detections() {
    let many = (0..10)
      .map(|i| cand(0, 0.5, [i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0]))
      .collect();
    assert_eq!(nms(many, 0.5, 3).len(), 3);
  }

  #[test]
  fn raising_confidence_never_adds_detections() {
    let rows: Vec<[f32; 6]> = (0..40)
      .map(|i| {
        let x = (i % 8) as f32 * 6.0;
        let y = (i / 8) as f32 * 6.0;
        let s = ((i * 37) % 100) as f32 / 100.0;
        [x, y, 12.0, 12.0, s, 1.0 - s]
      })
      .collect();
    let out = head(&rows);

    let mut previous = usize::MAX;
    for step in 0..=20 {
      let confidence = step as f32 * 0.05;
      let count = nms(decode_yolov8(&out, 2, confidence), 0.45, MAX_DETECTIONS).len();
      assert!(count <= previous, "conf {} gave {} > {}", confidence, count, previous);
      previous = count;
    }
  }

  #[test]
  fn detect_item_is_normalized_to_source_frame() {
    // 640x320 缩放到 320，纵向填充 80
    let letterbox = Letterbox::new(640, 320, 320);
    let candidate = cand(0, 0.8, [0.0, 80.0, 160.0, 240.0]);
    let item = to_detect_item::<HelmetLabel>(&candidate, &letterbox, 640, 320).unwrap();
    assert_eq!(item.kind, HelmetLabel::Helmet);
    assert_eq!(item.bbox, [0.0, 0.0, 0.5, 1.0]);
  }

  #[test]
  fn detect_item_is_clamped_inside_frame() {
    let letterbox = Letterbox::new(320, 320, 320);
    let candidate = cand(1, 0.6, [-20.0, -5.0, 400.0, 330.0]);
    let item = to_detect_item::<HelmetLabel>(&candidate, &letterbox, 320, 320).unwrap();
    assert_eq!(item.bbox, [0.0, 0.0, 1.0, 1.0]);
  }

  #[test]
  fn unknown_class_never_becomes_a_detection() {
    let letterbox = Letterbox::new(320, 320, 320);
    let candidate = cand(7, 0.9, [0.0, 0.0, 10.0, 10.0]);
    assert!(to_detect_item::<HelmetLabel>(&candidate, &letterbox, 320, 320).is_none());
  }
}
