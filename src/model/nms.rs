// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/model/nms.rs - 非极大值抑制与相邻框合并
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

use crate::model::{Detection, Rect};

/// 计算两个边界框的 IoU，无重叠时为 0
pub fn iou(a: &Rect, b: &Rect) -> f32 {
  let intersection = a.intersection_area(b);
  if intersection <= 0.0 {
    return 0.0;
  }
  let union = a.area() + b.area() - intersection;
  if union > 0.0 { intersection / union } else { 0.0 }
}

/// inner 落在 outer 内部的面积占 inner 面积的比例
pub fn intersection_over_smaller(inner: &Rect, outer: &Rect) -> f32 {
  let area = inner.area();
  if area <= 0.0 {
    return 0.0;
  }
  inner.intersection_area(outer) / area
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suppression {
  /// IoU 超过该值的候选被抑制
  pub iou_threshold: f32,
  /// 被包含比例超过该值的候选被抑制，None 表示不检查
  pub ios_threshold: Option<f32>,
  /// 宽或高不大于该值的保留框被丢弃
  pub min_box_size: f32,
}

impl Default for Suppression {
  fn default() -> Self {
    Self {
      iou_threshold: 0.5,
      ios_threshold: None,
      min_box_size: 0.0,
    }
  }
}

/// 贪心 NMS：按分数降序，每次保留最高分，丢弃与其 IoU 超过阈值的其余候选
pub fn non_max_suppression(mut detections: Vec<Detection>, rule: &Suppression) -> Vec<Detection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result = Vec::new();
  while !detections.is_empty() {
    let best = detections.remove(0);

    detections.retain(|det| {
      if iou(&best.rect, &det.rect) > rule.iou_threshold {
        return false;
      }
      match rule.ios_threshold {
        Some(threshold) => intersection_over_smaller(&det.rect, &best.rect) <= threshold,
        None => true,
      }
    });

    if best.rect.width() > rule.min_box_size && best.rect.height() > rule.min_box_size {
      result.push(best);
    }
  }

  result
}

fn axis_gap(a_start: f32, a_end: f32, b_start: f32, b_end: f32) -> f32 {
  if a_end < b_start {
    b_start - a_end
  } else if b_end < a_start {
    a_start - b_end
  } else {
    -1.0
  }
}

fn aligned(a_start: f32, a_end: f32, b_start: f32, b_end: f32, ratio: f32) -> bool {
  let overlap = a_end.min(b_end) - a_start.max(b_start);
  let shorter = (a_end - a_start).min(b_end - b_start);
  overlap > 0.0 && shorter > 0.0 && overlap / shorter > ratio
}

fn should_merge(a: &Rect, b: &Rect, tolerance: f32, ratio: f32) -> bool {
  // 上下相邻
  let vertical_gap = axis_gap(a.top, a.bottom, b.top, b.bottom);
  if aligned(a.left, a.right, b.left, b.right, ratio)
    && vertical_gap <= tolerance
    && vertical_gap > -tolerance
  {
    return true;
  }

  // 左右相邻
  let horizontal_gap = axis_gap(a.left, a.right, b.left, b.right);
  aligned(a.top, a.bottom, b.top, b.bottom, ratio)
    && horizontal_gap <= tolerance
    && horizontal_gap > -tolerance
}

/// 合并被切块切开的框：两框在某一轴上相距不超过 `tolerance`，
/// 且在另一轴上重叠超过较短边的 `ratio`，则合并为并集，直到不再变化。
pub fn merge_touching(detections: Vec<Detection>, tolerance: f32, ratio: f32) -> Vec<Detection> {
  let mut boxes = detections;
  let mut merged = true;

  while merged {
    merged = false;
    let mut i = 0;
    while i < boxes.len() {
      let mut j = i + 1;
      while j < boxes.len() {
        if should_merge(&boxes[i].rect, &boxes[j].rect, tolerance, ratio) {
          let other = boxes.remove(j);
          boxes[i].rect = boxes[i].rect.union(&other.rect);
          boxes[i].score = boxes[i].score.max(other.score);
          merged = true;
        } else {
          j += 1;
        }
      }
      i += 1;
    }
  }

  boxes
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(l: f32, t: f32, r: f32, b: f32, score: f32) -> Detection {
    Detection::new(Rect::new(l, t, r, b), score)
  }

  #[test]
  fn iou_of_disjoint_rects_is_zero() {
    let a = Rect::new(0.0, 0.0, 10.0, 10.0);
    let b = Rect::new(20.0, 20.0, 30.0, 30.0);
    assert_eq!(iou(&a, &b), 0.0);
    assert_eq!(iou(&a, &a), 1.0);
  }

  #[test]
  fn nms_keeps_highest_score() {
    let detections = vec![
      det(0.0, 0.0, 100.0, 100.0, 0.6),
      det(5.0, 5.0, 105.0, 105.0, 0.9),
      det(300.0, 300.0, 400.0, 400.0, 0.5),
    ];
    let kept = non_max_suppression(detections, &Suppression::default());
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.5);
  }

  #[test]
  fn nms_output_has_no_overlapping_pair() {
    let mut detections = Vec::new();
    for i in 0..12 {
      for j in 0..12 {
        let x = i as f32 * 13.0;
        let y = j as f32 * 17.0;
        let score = ((i * 7 + j * 13) % 23) as f32 / 23.0;
        detections.push(det(x, y, x + 40.0, y + 35.0, score));
      }
    }
    let rule = Suppression::default();
    let kept = non_max_suppression(detections, &rule);
    for (i, a) in kept.iter().enumerate() {
      for b in kept.iter().skip(i + 1) {
        assert!(iou(&a.rect, &b.rect) <= rule.iou_threshold);
      }
    }
  }

  #[test]
  fn nms_suppresses_contained_boxes_when_enabled() {
    let detections = vec![
      det(0.0, 0.0, 200.0, 200.0, 0.9),
      det(10.0, 10.0, 50.0, 50.0, 0.8),
    ];
    let plain = non_max_suppression(detections.clone(), &Suppression::default());
    assert_eq!(plain.len(), 2);

    let rule = Suppression {
      ios_threshold: Some(0.85),
      ..Default::default()
    };
    let kept = non_max_suppression(detections, &rule);
    assert_eq!(kept.len(), 1);
  }

  #[test]
  fn nms_drops_tiny_boxes() {
    let rule = Suppression {
      min_box_size: 20.0,
      ..Default::default()
    };
    let kept = non_max_suppression(vec![det(0.0, 0.0, 15.0, 80.0, 0.9)], &rule);
    assert!(kept.is_empty());
  }

  #[test]
  fn merge_joins_boxes_split_by_tiles() {
    let boxes = vec![
      det(100.0, 100.0, 200.0, 300.0, 0.7),
      det(105.0, 305.0, 195.0, 400.0, 0.8),
      det(600.0, 100.0, 700.0, 200.0, 0.9),
    ];
    let merged = merge_touching(boxes, 15.0, 0.5);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].rect, Rect::new(100.0, 100.0, 200.0, 400.0));
    assert_eq!(merged[0].score, 0.8);
  }

  #[test]
  fn merge_ignores_misaligned_neighbours() {
    let boxes = vec![
      det(0.0, 0.0, 100.0, 100.0, 0.7),
      det(90.0, 105.0, 300.0, 200.0, 0.8),
    ];
    assert_eq!(merge_touching(boxes, 15.0, 0.5).len(), 2);
  }
}
