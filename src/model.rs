// 该文件是 Typer Vision （字绘） 项目的一部分。
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

use serde::{Deserialize, Serialize};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 像素坐标下的矩形 (left, top, right, bottom)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl Rect {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn center(&self) -> (f32, f32) {
    (
      (self.left + self.right) / 2.0,
      (self.top + self.bottom) / 2.0,
    )
  }

  /// 交集面积，不相交时为 0
  pub fn intersection_area(&self, other: &Rect) -> f32 {
    let left = self.left.max(other.left);
    let top = self.top.max(other.top);
    let right = self.right.min(other.right);
    let bottom = self.bottom.min(other.bottom);
    if right <= left || bottom <= top {
      return 0.0;
    }
    (right - left) * (bottom - top)
  }

  pub fn union(&self, other: &Rect) -> Rect {
    Rect::new(
      self.left.min(other.left),
      self.top.min(other.top),
      self.right.max(other.right),
      self.bottom.max(other.bottom),
    )
  }

  pub fn offset(&self, dx: f32, dy: f32) -> Rect {
    Rect::new(
      self.left + dx,
      self.top + dy,
      self.right + dx,
      self.bottom + dy,
    )
  }

  pub fn clip(&self, width: f32, height: f32) -> Rect {
    Rect::new(
      self.left.max(0.0),
      self.top.max(0.0),
      self.right.min(width),
      self.bottom.min(height),
    )
  }

  /// 以中心为基准缩放宽高
  pub fn scale_about_center(&self, factor: f32) -> Rect {
    let (cx, cy) = self.center();
    Rect::from_center(cx, cy, self.width() * factor, self.height() * factor)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub rect: Rect,
  pub score: f32,
}

impl Detection {
  pub fn new(rect: Rect, score: f32) -> Self {
    Self { rect, score }
  }
}

mod detector;
mod nms;
mod tiling;

pub mod inpaint;

pub use self::detector::{BubbleDetector, DetectError, DetectorConfig, TiledDetector};
pub use self::inpaint::{
  ClassicalInpainter, Inpaint, InpaintError, InpaintRequest, Inpainter, MaskThreshold,
  NeuralInpaintConfig, NeuralInpainter,
};
pub use self::nms::{
  intersection_over_smaller, iou, merge_touching, non_max_suppression, Suppression,
};
pub use self::tiling::{crop_tile, tile_grid, tile_origins, Tile};
