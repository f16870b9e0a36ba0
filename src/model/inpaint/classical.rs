// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/model/inpaint/classical.rs - 传统算法修复后端
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

use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Inpaint, InpaintError, check_inputs, telea};
use crate::frame::RasterBuffer;

pub const INPAINT_RADIUS: f32 = 5.0;

/// 上游掩码的表示方式不固定，这里决定哪些像素算作待填充
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskThreshold {
  /// alpha 非零
  #[default]
  Alpha,
  /// 红色通道大于阈值，用于不透明的黑白掩码
  Red(u8),
  /// alpha 非零且红色通道大于阈值
  AlphaAndRed(u8),
}

impl MaskThreshold {
  pub fn is_fill(&self, pixel: &Rgba<u8>) -> bool {
    match *self {
      MaskThreshold::Alpha => pixel[3] > 0,
      MaskThreshold::Red(level) => pixel[0] > level,
      MaskThreshold::AlphaAndRed(level) => pixel[3] > 0 && pixel[0] > level,
    }
  }

  fn to_gray(self, mask: &RasterBuffer) -> (GrayImage, usize) {
    let mut count = 0;
    let gray = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
      if self.is_fill(mask.get_pixel(x, y)) {
        count += 1;
        Luma([255])
      } else {
        Luma([0])
      }
    });
    (gray, count)
  }
}

/// 不需要模型文件的扩散式修复
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassicalInpainter {
  pub radius: f32,
  pub threshold: MaskThreshold,
}

impl Default for ClassicalInpainter {
  fn default() -> Self {
    Self {
      radius: INPAINT_RADIUS,
      threshold: MaskThreshold::Alpha,
    }
  }
}

impl ClassicalInpainter {
  pub fn with_threshold(threshold: MaskThreshold) -> Self {
    Self {
      threshold,
      ..Default::default()
    }
  }
}

fn to_rgb(image: &RasterBuffer) -> RgbImage {
  RgbImage::from_fn(image.width(), image.height(), |x, y| {
    let p = image.get_pixel(x, y);
    Rgb([p[0], p[1], p[2]])
  })
}

impl Inpaint for ClassicalInpainter {
  fn inpaint(&self, image: &RasterBuffer, mask: &RasterBuffer) -> Result<RasterBuffer, InpaintError> {
    check_inputs(image, mask)?;

    let (gray, count) = self.threshold.to_gray(mask);
    if count == 0 {
      debug!("掩码为空，返回原图");
      return Ok(image.clone());
    }

    let now = std::time::Instant::now();
    let filled = telea::inpaint(&to_rgb(image), &gray, self.radius);
    info!("传统修复 {} 个像素，耗时: {:.2?}", count, now.elapsed());

    // 保留原图的透明度
    Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
      let rgb = filled.get_pixel(x, y);
      Rgba([rgb[0], rgb[1], rgb[2], image.get_pixel(x, y)[3]])
    }))
  }
}
