// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/codec.rs - 张量编解码
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

//! 光栅缓冲与模型张量之间的无状态转换。
//!
//! 通道顺序固定为 R、G、B，取值范围固定为 `[0, 1]`；与目标模型不一致时
//! 不会报错，只会得到无意义的输出，因此每个模型都必须固定自己的约定。

use std::borrow::Cow;

use image::{Rgba, RgbaImage, imageops::FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{MASK_CHANNELS, RGB_CHANNELS, RasterBuffer, Tensor, TensorLayout},
  model::{Detection, Rect},
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

/// 四个坐标都不超过该值时视为归一化坐标
const NORMALIZED_COORD_LIMIT: f32 = 1.05;
/// 首维小于次维且小于该值时视为 [features, queries] 排布
const TRANSPOSE_ROW_LIMIT: usize = 100;
const BOX_COLUMNS: usize = 4;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("没有模型输出")]
  NoOutputs,
  #[error("找不到边界框张量")]
  NoBoxTensor,
  #[error("找不到分数张量")]
  NoScoreTensor,
  #[error("形状不匹配: 边界框 {boxes} 行, 分数 {scores} 行")]
  RowMismatch { boxes: usize, scores: usize },
  #[error("图像张量形状无效: {0:?}")]
  ImageShape(Vec<usize>),
}

/// 边界框坐标格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxFormat {
  /// (cx, cy, w, h)
  #[default]
  CenterSize,
  /// (x1, y1, x2, y2)，RT-DETR 导出的格式
  Corners,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
  pub confidence_threshold: f32,
  pub input_size: f32,
  pub box_format: BoxFormat,
}

impl Default for DecodeOptions {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      input_size: 640.0,
      box_format: BoxFormat::CenterSize,
    }
  }
}

fn resized(raster: &RasterBuffer, (width, height): (u32, u32), filter: FilterType) -> Cow<'_, RasterBuffer> {
  if raster.dimensions() == (width, height) {
    Cow::Borrowed(raster)
  } else {
    Cow::Owned(image::imageops::resize(raster, width, height, filter))
  }
}

/// 编码为 `[1, 3, H, W]` 的平面 RGB 张量
pub fn encode_image(raster: &RasterBuffer, target: (u32, u32)) -> Tensor {
  encode_image_with_layout(raster, target, TensorLayout::Nchw)
}

pub fn encode_image_with_layout(raster: &RasterBuffer, target: (u32, u32), layout: TensorLayout) -> Tensor {
  let image = resized(raster, target, FilterType::Triangle);
  let (width, height) = (target.0 as usize, target.1 as usize);
  let mut tensor = Tensor::with_shape(layout.shape(RGB_CHANNELS, height, width));
  let slice = tensor.as_mut();

  for (x, y, pixel) in image.enumerate_pixels() {
    for c in 0..RGB_CHANNELS {
      let index = layout.index(RGB_CHANNELS, height, width, c, y as usize, x as usize);
      slice[index] = pixel[c] as f32 / 255.0;
    }
  }
  tensor
}

/// 编码为 `[1, 1, H, W]` 的掩码张量，alpha 非零处为 1.0。
/// 缩放只用最近邻插值，保证掩码保持二值。
pub fn encode_mask(raster: &RasterBuffer, target: (u32, u32)) -> Tensor {
  encode_mask_with_layout(raster, target, TensorLayout::Nchw)
}

pub fn encode_mask_with_layout(raster: &RasterBuffer, target: (u32, u32), layout: TensorLayout) -> Tensor {
  let mask = resized(raster, target, FilterType::Nearest);
  let (width, height) = (target.0 as usize, target.1 as usize);
  let mut tensor = Tensor::with_shape(layout.shape(MASK_CHANNELS, height, width));
  let slice = tensor.as_mut();

  for (x, y, pixel) in mask.enumerate_pixels() {
    let index = layout.index(MASK_CHANNELS, height, width, 0, y as usize, x as usize);
    slice[index] = if pixel[3] > 0 { 1.0 } else { 0.0 };
  }
  tensor
}

/// `encode_image` 的逆变换。`scale` 由模型决定：输出 `[0, 1]` 的模型传 255，
/// 直接输出 `[0, 255]` 的模型传 1。
pub fn decode_image(tensor: &Tensor, scale: f32) -> Result<RasterBuffer, DecodeError> {
  decode_image_with_layout(tensor, scale, TensorLayout::Nchw)
}

pub fn decode_image_with_layout(
  tensor: &Tensor,
  scale: f32,
  layout: TensorLayout,
) -> Result<RasterBuffer, DecodeError> {
  let (channels, height, width) = layout
    .split_shape(tensor.shape())
    .filter(|(c, _, _)| *c == RGB_CHANNELS)
    .ok_or_else(|| DecodeError::ImageShape(tensor.shape().to_vec()))?;

  let data = tensor.data();
  let image = RgbaImage::from_fn(width as u32, height as u32, |x, y| {
    let mut pixel = [0u8, 0, 0, 255];
    for (c, value) in pixel.iter_mut().take(RGB_CHANNELS).enumerate() {
      let v = data[layout.index(channels, height, width, c, y as usize, x as usize)] * scale;
      *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgba(pixel)
  });
  Ok(image)
}

/// 归一化后的二维 `[rows, cols]` 视图
#[derive(Debug, Clone, PartialEq)]
pub struct RowView<'a> {
  pub rows: usize,
  pub cols: usize,
  data: Cow<'a, [f32]>,
}

impl RowView<'_> {
  pub fn row(&self, index: usize) -> &[f32] {
    &self.data[index * self.cols..(index + 1) * self.cols]
  }
}

/// 启发式形状归一化：去掉大小为 1 的批次维，然后若首维小于次维且小于 100，
/// 视为 `[features, queries]` 并转置为 `[queries, features]`。
///
/// 这只是猜测，无法区分所有真实模型的输出约定；能从模型图读到形状元数据时应优先使用元数据。
/// 形如 `[1, N]` 的张量按 N 行 1 列处理。
pub fn normalize_rows(tensor: &Tensor) -> RowView<'_> {
  let mut dims: Vec<usize> = tensor.shape().to_vec();
  while dims.len() > 1 && dims[0] == 1 {
    dims.remove(0);
  }

  let (d0, d1) = match dims.as_slice() {
    [] => (0, 0),
    [n] => (*n, 1),
    [rest @ .., last] => (rest.iter().product(), *last),
  };

  if d0 < d1 && d0 < TRANSPOSE_ROW_LIMIT {
    let data = tensor.data();
    let mut transposed = vec![0.0; data.len()];
    for r in 0..d0 {
      for c in 0..d1 {
        transposed[c * d0 + r] = data[r * d1 + c];
      }
    }
    debug!("转置输出张量 {:?} -> [{}, {}]", tensor.shape(), d1, d0);
    RowView {
      rows: d1,
      cols: d0,
      data: Cow::Owned(transposed),
    }
  } else {
    RowView {
      rows: d0,
      cols: d1,
      data: Cow::Borrowed(tensor.data()),
    }
  }
}

fn decode_box(coords: &[f32], options: &DecodeOptions) -> Rect {
  let normalized = coords.iter().all(|v| *v <= NORMALIZED_COORD_LIMIT);
  let scale = if normalized { options.input_size } else { 1.0 };
  let (a, b, c, d) = (
    coords[0] * scale,
    coords[1] * scale,
    coords[2] * scale,
    coords[3] * scale,
  );
  match options.box_format {
    BoxFormat::CenterSize => Rect::from_center(a, b, c, d),
    BoxFormat::Corners => Rect::new(a, b, c, d),
  }
}

fn max_score(scores: &[f32]) -> f32 {
  scores.iter().copied().fold(f32::MIN, f32::max)
}

/// 把模型输出解码为检测框列表。
///
/// 支持两种输出：(a) 两个张量，最内维为 4 的是边界框，另一个是逐类分数；
/// (b) 单个拼接张量，最内维为 `4 + 类别数`。分数取各类别最大值，低于阈值的行被丢弃。
pub fn decode_detections(outputs: &[Tensor], options: &DecodeOptions) -> Result<Vec<Detection>, DecodeError> {
  if outputs.is_empty() {
    return Err(DecodeError::NoOutputs);
  }

  let views: Vec<RowView> = outputs.iter().map(normalize_rows).collect();
  let box_index = views.iter().position(|v| v.cols == BOX_COLUMNS);

  let mut detections = Vec::new();
  match box_index {
    Some(box_index) if views.len() > 1 => {
      let boxes = &views[box_index];
      let scores = views
        .iter()
        .enumerate()
        .filter(|(i, v)| *i != box_index && v.cols != BOX_COLUMNS)
        .map(|(_, v)| v)
        .next()
        .ok_or(DecodeError::NoScoreTensor)?;

      if boxes.rows != scores.rows {
        return Err(DecodeError::RowMismatch {
          boxes: boxes.rows,
          scores: scores.rows,
        });
      }

      for i in 0..boxes.rows {
        let score = max_score(scores.row(i));
        if score < options.confidence_threshold {
          continue;
        }
        detections.push(Detection::new(decode_box(boxes.row(i), options), score));
      }
    }
    _ => {
      let joined = views
        .iter()
        .find(|v| v.cols > BOX_COLUMNS)
        .ok_or(DecodeError::NoBoxTensor)?;

      for i in 0..joined.rows {
        let row = joined.row(i);
        let score = max_score(&row[BOX_COLUMNS..]);
        if score < options.confidence_threshold {
          continue;
        }
        detections.push(Detection::new(decode_box(&row[..BOX_COLUMNS], options), score));
      }
    }
  }

  debug!("解码得到 {} 个候选框", detections.len());
  Ok(detections)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gradient(width: u32, height: u32) -> RasterBuffer {
    RgbaImage::from_fn(width, height, |x, y| {
      Rgba([(x * 37 % 256) as u8, (y * 53 % 256) as u8, ((x + y) * 11 % 256) as u8, 255])
    })
  }

  #[test]
  fn encode_image_is_channel_planar() {
    let mut image = RgbaImage::new(2, 1);
    image.put_pixel(0, 0, Rgba([255, 0, 51, 255]));
    image.put_pixel(1, 0, Rgba([0, 102, 0, 255]));

    let tensor = encode_image(&image, (2, 1));
    assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
    assert_eq!(tensor.data(), &[1.0, 0.0, 0.0, 0.4, 0.2, 0.0]);
  }

  #[test]
  fn encode_image_nhwc_interleaves() {
    let mut image = RgbaImage::new(1, 1);
    image.put_pixel(0, 0, Rgba([255, 0, 51, 255]));
    let tensor = encode_image_with_layout(&image, (1, 1), TensorLayout::Nhwc);
    assert_eq!(tensor.shape(), &[1, 1, 1, 3]);
    assert_eq!(tensor.data(), &[1.0, 0.0, 0.2]);
  }

  #[test]
  fn encode_mask_uses_alpha() {
    let mut mask = RgbaImage::new(3, 1);
    mask.put_pixel(1, 0, Rgba([0, 0, 0, 1]));
    mask.put_pixel(2, 0, Rgba([255, 255, 255, 0]));
    let tensor = encode_mask(&mask, (3, 1));
    assert_eq!(tensor.shape(), &[1, 1, 1, 3]);
    assert_eq!(tensor.data(), &[0.0, 1.0, 0.0]);
  }

  #[test]
  fn encode_mask_resize_stays_binary() {
    let mut mask = RgbaImage::new(8, 8);
    for y in 0..4 {
      for x in 0..8 {
        mask.put_pixel(x, y, Rgba([255, 0, 0, 200]));
      }
    }
    let tensor = encode_mask(&mask, (5, 5));
    assert!(tensor.data().iter().all(|v| *v == 0.0 || *v == 1.0));
    assert!(tensor.data().contains(&1.0));
    assert!(tensor.data().contains(&0.0));
  }

  #[test]
  fn image_round_trip_within_one_unit() {
    let image = gradient(7, 5);
    let tensor = encode_image(&image, (7, 5));
    let decoded = decode_image(&tensor, 255.0).unwrap();
    for (a, b) in image.pixels().zip(decoded.pixels()) {
      for c in 0..3 {
        assert!((a[c] as i32 - b[c] as i32).abs() <= 1);
      }
      assert_eq!(b[3], 255);
    }
  }

  #[test]
  fn decode_image_clamps() {
    let tensor = Tensor::new(vec![1, 3, 1, 1], vec![300.0, -4.0, 12.4]).unwrap();
    let decoded = decode_image(&tensor, 1.0).unwrap();
    assert_eq!(decoded.get_pixel(0, 0), &Rgba([255, 0, 12, 255]));
  }

  #[test]
  fn decode_image_rejects_mask_shape() {
    let tensor = Tensor::with_shape(vec![1, 1, 2, 2]);
    assert_eq!(
      decode_image(&tensor, 1.0),
      Err(DecodeError::ImageShape(vec![1, 1, 2, 2]))
    );
  }

  #[test]
  fn normalize_transposes_feature_major_output() {
    // [1, 3, 6]: 3 个特征、6 个候选
    let data: Vec<f32> = (0..18).map(|v| v as f32).collect();
    let tensor = Tensor::new(vec![1, 3, 6], data).unwrap();
    let view = normalize_rows(&tensor);
    assert_eq!((view.rows, view.cols), (6, 3));
    assert_eq!(view.row(1), &[1.0, 7.0, 13.0]);
  }

  #[test]
  fn normalize_keeps_query_major_output() {
    let tensor = Tensor::with_shape(vec![1, 300, 4]);
    let view = normalize_rows(&tensor);
    assert_eq!((view.rows, view.cols), (300, 4));

    let scores = Tensor::with_shape(vec![1, 300]);
    let view = normalize_rows(&scores);
    assert_eq!((view.rows, view.cols), (300, 1));

    // 行数不少于列数时不转置
    let wide = Tensor::with_shape(vec![1, 120, 200]);
    let view = normalize_rows(&wide);
    assert_eq!((view.rows, view.cols), (120, 200));
  }

  #[test]
  fn decode_split_outputs() {
    let boxes = Tensor::new(
      vec![1, 4, 4],
      vec![
        0.5, 0.5, 0.25, 0.25, //
        100.0, 100.0, 20.0, 40.0, //
        0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 0.0,
      ],
    )
    .unwrap();
    let scores = Tensor::new(vec![1, 4, 2], vec![0.1, 0.9, 0.3, 0.2, 0.0, 0.0, 0.0, 0.0]).unwrap();
    let options = DecodeOptions {
      input_size: 640.0,
      ..Default::default()
    };

    let detections = decode_detections(&[boxes, scores], &options).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].score, 0.9);
    assert_eq!(detections[0].rect, Rect::new(240.0, 240.0, 400.0, 400.0));
  }

  #[test]
  fn decode_concatenated_output_in_pixels() {
    let mut data = vec![
      100.0, 50.0, 20.0, 10.0, 0.2, 0.7, //
      10.0, 10.0, 4.0, 4.0, 0.1, 0.3,
    ];
    data.extend(std::iter::repeat_n(0.0, 4 * 6));
    let joined = Tensor::new(vec![1, 6, 6], data).unwrap();
    let detections = decode_detections(&[joined], &DecodeOptions::default()).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].rect, Rect::new(90.0, 45.0, 110.0, 55.0));
  }

  #[test]
  fn decode_never_keeps_low_scores() {
    let rows = 40;
    let mut data = Vec::new();
    for i in 0..rows {
      let score = i as f32 / rows as f32;
      data.extend_from_slice(&[0.5, 0.5, 0.1, 0.1, score]);
    }
    let joined = Tensor::new(vec![1, rows, 5], data).unwrap();
    let options = DecodeOptions::default();
    let detections = decode_detections(&[joined], &options).unwrap();
    assert!(!detections.is_empty());
    assert!(detections.iter().all(|d| d.score >= options.confidence_threshold));
  }

  #[test]
  fn decode_corner_boxes_with_flat_scores() {
    let mut box_data = vec![10.0, 20.0, 110.0, 220.0];
    box_data.extend(std::iter::repeat_n(5.0, 3 * 4));
    let boxes = Tensor::new(vec![1, 4, 4], box_data).unwrap();
    let scores = Tensor::new(vec![1, 4], vec![0.8, 0.1, 0.0, 0.2]).unwrap();
    let options = DecodeOptions {
      box_format: BoxFormat::Corners,
      ..Default::default()
    };
    let detections = decode_detections(&[boxes, scores], &options).unwrap();
    assert_eq!(detections, vec![Detection::new(Rect::new(10.0, 20.0, 110.0, 220.0), 0.8)]);
  }

  #[test]
  fn decode_row_mismatch_is_an_error() {
    let boxes = Tensor::with_shape(vec![1, 6, 4]);
    let scores = Tensor::with_shape(vec![1, 5, 5]);
    assert_eq!(
      decode_detections(&[boxes, scores], &DecodeOptions::default()),
      Err(DecodeError::RowMismatch { boxes: 6, scores: 5 })
    );
  }
}
