// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/output/draw.rs - 检测框绘制
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

use image::Rgba;
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect as PixelRect};
use serde::Serialize;

use crate::{frame::RasterBuffer, model::Detection};

const BOX_COLOR: [u8; 4] = [0, 0, 255, 255]; // 蓝色
const BOX_THICKNESS: u32 = 2;

pub struct Draw {
  color: Rgba<u8>,
  thickness: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: Rgba(BOX_COLOR),
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  /// 返回画好检测框的副本
  pub fn draw_detections(&self, image: &RasterBuffer, detections: &[Detection]) -> RasterBuffer {
    let mut canvas = image.clone();
    for detection in detections {
      self.draw_rect(&mut canvas, detection);
    }
    canvas
  }

  fn draw_rect(&self, image: &mut RasterBuffer, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let rect = detection.rect;

    let x_min = (rect.left.floor() as i32).clamp(0, w - 1);
    let y_min = (rect.top.floor() as i32).clamp(0, h - 1);
    let x_max = (rect.right.ceil() as i32).clamp(0, w - 1);
    let y_max = (rect.bottom.ceil() as i32).clamp(0, h - 1);

    // 向内加粗
    for t in 0..self.thickness as i32 {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let outline = PixelRect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, outline, self.color);
    }
  }
}

#[derive(Serialize)]
struct RecordEntry<'a> {
  index: usize,
  #[serde(flatten)]
  detection: &'a Detection,
}

/// 检测结果写到与图像同名的 JSON 文件
pub struct Record;

impl Record {
  pub fn record(&self, detections: &[Detection], path: &Path) -> Result<(), std::io::Error> {
    let entries: Vec<RecordEntry> = detections
      .iter()
      .enumerate()
      .map(|(index, detection)| RecordEntry { index, detection })
      .collect();
    let json = serde_json::to_string_pretty(&entries).map_err(std::io::Error::other)?;
    std::fs::write(path.with_extension("json"), json)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbaImage;

  use super::*;
  use crate::model::Rect;

  #[test]
  fn outlines_inside_bounds() {
    let image = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
    let detections = [Detection::new(Rect::new(4.0, 4.0, 12.0, 10.0), 0.9)];
    let canvas = Draw::default().draw_detections(&image, &detections);

    assert_eq!(canvas.get_pixel(4, 4), &Rgba(BOX_COLOR));
    assert_eq!(canvas.get_pixel(5, 5), &Rgba(BOX_COLOR));
    assert_eq!(canvas.get_pixel(12, 10), &Rgba(BOX_COLOR));
    assert_eq!(canvas.get_pixel(8, 7), &Rgba([255, 255, 255, 255]));
    assert_eq!(image.get_pixel(4, 4), &Rgba([255, 255, 255, 255]));
  }

  #[test]
  fn boxes_past_the_edge_are_clamped() {
    let image = RgbaImage::new(10, 10);
    let detections = [Detection::new(Rect::new(-5.0, -5.0, 30.0, 30.0), 0.5)];
    let canvas = Draw::default().draw_detections(&image, &detections);
    assert_eq!(canvas.get_pixel(0, 0), &Rgba(BOX_COLOR));
    assert_eq!(canvas.get_pixel(9, 9), &Rgba(BOX_COLOR));
  }

  #[test]
  fn record_writes_json_beside_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.png");
    let detections = [Detection::new(Rect::new(1.0, 2.0, 3.0, 4.0), 0.75)];
    Record.record(&detections, &path).unwrap();

    let text = std::fs::read_to_string(dir.path().join("page.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value[0]["index"], 0);
    assert_eq!(value[0]["score"], 0.75);
    assert_eq!(value[0]["rect"]["right"], 3.0);
  }
}
