// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/model/inpaint/neural.rs - 神经网络修复后端
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

use std::{borrow::Cow, sync::Arc};

use image::{Rgba, RgbaImage, imageops::{self, FilterType}};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{Inpaint, InpaintError, check_inputs, mask_bounds};
use crate::{
  codec::{decode_image_with_layout, encode_image_with_layout, encode_mask_with_layout},
  frame::{RasterBuffer, TensorLayout},
  hub::ModelHub,
  session::SessionInput,
  store::{LAMA_512, LITE_INPAINT_256},
};

/// 智能裁剪边长相对掩码外接矩形长边的倍数
const CROP_FACTOR: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralInpaintConfig {
  /// 模型训练时的固定输入边长
  pub trained_size: u32,
  pub layout: TensorLayout,
  pub image_input: String,
  pub mask_input: String,
  /// 输出张量乘以该值得到 0..255 的像素值
  pub output_scale: f32,
  /// 只把掩码附近的正方形区域送入模型
  pub crop_to_mask: bool,
  /// 只在掩码处贴回模型输出
  pub composite: bool,
}

impl NeuralInpaintConfig {
  /// LaMa，直接输出 0..255
  pub fn lama() -> Self {
    Self {
      trained_size: 512,
      layout: TensorLayout::Nchw,
      image_input: "image".to_string(),
      mask_input: "mask".to_string(),
      output_scale: 1.0,
      crop_to_mask: false,
      composite: false,
    }
  }

  /// 256 输入的轻量模型，NHWC 排布，输出 0..1
  pub fn lightweight() -> Self {
    Self {
      trained_size: 256,
      layout: TensorLayout::Nhwc,
      output_scale: 255.0,
      ..Self::lama()
    }
  }

  pub fn with_crop_to_mask(mut self, enabled: bool) -> Self {
    self.crop_to_mask = enabled;
    self
  }

  pub fn with_composite(mut self, enabled: bool) -> Self {
    self.composite = enabled;
    self
  }

  fn validate(&self) -> Result<(), InpaintError> {
    if self.trained_size == 0 {
      return Err(InpaintError::InvalidConfig("训练尺寸必须大于 0".into()));
    }
    if !(self.output_scale.is_finite() && self.output_scale > 0.0) {
      return Err(InpaintError::InvalidConfig(format!(
        "输出缩放系数无效: {}",
        self.output_scale
      )));
    }
    Ok(())
  }
}

/// 图像中的矩形区域 (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

fn fit_axis(center: i64, half: i64, limit: i64) -> (i64, i64) {
  let (mut start, mut end) = (center - half, center + half);
  if end - start > limit {
    return (0, limit);
  }
  if start < 0 {
    end -= start;
    start = 0;
  }
  if end > limit {
    start -= end - limit;
    end = limit;
  }
  (start, end)
}

/// 以掩码外接矩形中心为中心、长边三倍为边长的正方形；超出图像时平移回图内，
/// 比图像还大时在该方向上取整幅图像
pub fn smart_crop(bounds: (u32, u32, u32, u32), width: u32, height: u32) -> Region {
  let (x0, y0, x1, y1) = bounds;
  let side = (x1 - x0).max(y1 - y0) * CROP_FACTOR;
  let half = (side / 2) as i64;
  let cx = ((x0 + x1) / 2) as i64;
  let cy = ((y0 + y1) / 2) as i64;

  let (left, right) = fit_axis(cx, half, width as i64);
  let (top, bottom) = fit_axis(cy, half, height as i64);
  Region {
    x: left as u32,
    y: top as u32,
    width: (right - left).max(1) as u32,
    height: (bottom - top).max(1) as u32,
  }
}

fn crop(buffer: &RasterBuffer, region: Region) -> Cow<'_, RasterBuffer> {
  if region.x == 0 && region.y == 0 && (region.width, region.height) == buffer.dimensions() {
    Cow::Borrowed(buffer)
  } else {
    Cow::Owned(imageops::crop_imm(buffer, region.x, region.y, region.width, region.height).to_image())
  }
}

/// 按掩码 alpha 混合：alpha 为 0 处保持原图
fn blend_masked(base: &mut RgbaImage, patch: &RgbaImage, mask: &RgbaImage, region: Region) {
  for (x, y, pixel) in patch.enumerate_pixels() {
    let alpha = mask.get_pixel(x, y)[3] as f32 / 255.0;
    if alpha == 0.0 {
      continue;
    }
    let target = base.get_pixel_mut(region.x + x, region.y + y);
    for c in 0..3 {
      let mixed = target[c] as f32 * (1.0 - alpha) + pixel[c] as f32 * alpha;
      target[c] = mixed.round().clamp(0.0, 255.0) as u8;
    }
  }
}

pub struct NeuralInpainter {
  hub: Arc<ModelHub>,
  model_id: String,
  config: NeuralInpaintConfig,
}

impl NeuralInpainter {
  pub fn new(hub: Arc<ModelHub>, model_id: &str, config: NeuralInpaintConfig) -> Result<Self, InpaintError> {
    config.validate()?;
    Ok(Self {
      hub,
      model_id: model_id.to_string(),
      config,
    })
  }

  pub fn lama(hub: Arc<ModelHub>) -> Result<Self, InpaintError> {
    Self::new(hub, LAMA_512, NeuralInpaintConfig::lama())
  }

  pub fn lightweight(hub: Arc<ModelHub>) -> Result<Self, InpaintError> {
    Self::new(hub, LITE_INPAINT_256, NeuralInpaintConfig::lightweight())
  }

  pub fn config(&self) -> &NeuralInpaintConfig {
    &self.config
  }

  pub fn model_id(&self) -> &str {
    &self.model_id
  }

  /// 缩放到训练尺寸、推理、再缩放回输入尺寸
  fn run_model(&self, image: &RasterBuffer, mask: &RasterBuffer) -> Result<RasterBuffer, InpaintError> {
    let config = &self.config;
    let size = (config.trained_size, config.trained_size);
    let image_tensor = encode_image_with_layout(image, size, config.layout);
    let mask_tensor = encode_mask_with_layout(mask, size, config.layout);

    let outputs = self.hub.with_session(&self.model_id, |session| {
      let outputs = session.run(vec![
        (config.image_input.clone(), SessionInput::F32(image_tensor)),
        (config.mask_input.clone(), SessionInput::F32(mask_tensor)),
      ])?;
      Ok::<_, InpaintError>(outputs)
    })?;

    let output = outputs.first().ok_or(InpaintError::NoOutput)?;
    let decoded = decode_image_with_layout(output, config.output_scale, config.layout)?;
    let (width, height) = image.dimensions();
    if decoded.dimensions() == (width, height) {
      Ok(decoded)
    } else {
      Ok(imageops::resize(&decoded, width, height, FilterType::Triangle))
    }
  }

  fn inpaint_region(&self, image: &RasterBuffer, mask: &RasterBuffer, region: Region) -> Result<RasterBuffer, InpaintError> {
    let image_crop = crop(image, region);
    let mask_crop = crop(mask, region);
    let patch = self.run_model(&image_crop, &mask_crop)?;

    if self.config.composite {
      let mut result = image.clone();
      blend_masked(&mut result, &patch, &mask_crop, region);
      return Ok(result);
    }

    if matches!(image_crop, Cow::Borrowed(_)) {
      return Ok(patch);
    }
    let mut result = image.clone();
    imageops::replace(&mut result, &patch, region.x as i64, region.y as i64);
    Ok(result)
  }
}

impl Inpaint for NeuralInpainter {
  fn inpaint(&self, image: &RasterBuffer, mask: &RasterBuffer) -> Result<RasterBuffer, InpaintError> {
    check_inputs(image, mask)?;
    if !self.hub.is_model_available(&self.model_id) {
      return Err(InpaintError::ArtifactMissing(self.model_id.clone()));
    }

    let (width, height) = image.dimensions();
    let region = if self.config.crop_to_mask {
      match mask_bounds(mask) {
        Some(bounds) => smart_crop(bounds, width, height),
        None => {
          debug!("掩码为空，返回原图");
          return Ok(image.clone());
        }
      }
    } else {
      Region {
        x: 0,
        y: 0,
        width,
        height,
      }
    };
    debug!("修复区域: {:?}", region);

    let now = std::time::Instant::now();
    match self.inpaint_region(image, mask, region) {
      Ok(result) => {
        info!("模型 {} 修复完成，耗时: {:.2?}", self.model_id, now.elapsed());
        Ok(result)
      }
      Err(e) => {
        error!("模型 {} 修复失败，释放会话: {}", self.model_id, e);
        self.hub.invalidate(&self.model_id);
        Err(e)
      }
    }
  }
}
