// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/model/inpaint.rs - 图像修复
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

//! 两种可互换的修复后端，由调用方显式选择，彼此之间不会自动回退。
//! 掩码与图像同尺寸，alpha 非零的像素为待填充区域。

use thiserror::Error;

use crate::{
  codec::DecodeError,
  frame::RasterBuffer,
  model::Model,
  session::SessionError,
};

mod classical;
mod neural;
mod telea;

pub use self::classical::{ClassicalInpainter, INPAINT_RADIUS, MaskThreshold};
pub use self::neural::{NeuralInpaintConfig, NeuralInpainter};

#[derive(Error, Debug)]
pub enum InpaintError {
  #[error("模型不可用: {0}")]
  ArtifactMissing(String),
  #[error("会话错误: {0}")]
  Session(SessionError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型没有输出")]
  NoOutput,
  #[error("输入图像为空")]
  EmptyInput,
  #[error("图像尺寸 {image:?} 与掩码尺寸 {mask:?} 不一致")]
  SizeMismatch { image: (u32, u32), mask: (u32, u32) },
  #[error("修复配置无效: {0}")]
  InvalidConfig(String),
}

impl From<SessionError> for InpaintError {
  fn from(err: SessionError) -> Self {
    match err {
      SessionError::ArtifactMissing(id) => InpaintError::ArtifactMissing(id),
      other => InpaintError::Session(other),
    }
  }
}

pub trait Inpaint {
  /// 返回新的光栅缓冲，不修改传入的图像与掩码
  fn inpaint(&self, image: &RasterBuffer, mask: &RasterBuffer) -> Result<RasterBuffer, InpaintError>;
}

pub(crate) fn check_inputs(image: &RasterBuffer, mask: &RasterBuffer) -> Result<(), InpaintError> {
  if image.width() == 0 || image.height() == 0 {
    return Err(InpaintError::EmptyInput);
  }
  if image.dimensions() != mask.dimensions() {
    return Err(InpaintError::SizeMismatch {
      image: image.dimensions(),
      mask: mask.dimensions(),
    });
  }
  Ok(())
}

/// 掩码中 alpha 非零像素的外接矩形 (x0, y0, x1, y1)，右下为开区间
pub fn mask_bounds(mask: &RasterBuffer) -> Option<(u32, u32, u32, u32)> {
  let mut bounds: Option<(u32, u32, u32, u32)> = None;
  for (x, y, pixel) in mask.enumerate_pixels() {
    if pixel[3] == 0 {
      continue;
    }
    bounds = Some(match bounds {
      None => (x, y, x + 1, y + 1),
      Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
    });
  }
  bounds
}

pub struct InpaintRequest {
  pub image: RasterBuffer,
  pub mask: RasterBuffer,
}

pub enum Inpainter {
  Neural(NeuralInpainter),
  Classical(ClassicalInpainter),
}

impl Inpainter {
  pub fn name(&self) -> &'static str {
    match self {
      Inpainter::Neural(_) => "neural",
      Inpainter::Classical(_) => "classical",
    }
  }
}

impl Inpaint for Inpainter {
  fn inpaint(&self, image: &RasterBuffer, mask: &RasterBuffer) -> Result<RasterBuffer, InpaintError> {
    match self {
      Inpainter::Neural(inner) => inner.inpaint(image, mask),
      Inpainter::Classical(inner) => inner.inpaint(image, mask),
    }
  }
}

impl Model for Inpainter {
  type Input = InpaintRequest;
  type Output = RasterBuffer;
  type Error = InpaintError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.inpaint(&input.image, &input.mask)
  }
}
