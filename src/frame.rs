// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/frame.rs - 光栅缓冲与张量定义
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

use thiserror::Error;

/// 调用方持有的 RGBA 8 位光栅缓冲，流水线只借用，不会保留引用。
pub type RasterBuffer = image::RgbaImage;

pub const RGB_CHANNELS: usize = 3;
pub const MASK_CHANNELS: usize = 1;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
  #[error("数据长度不匹配: 形状 {shape:?} 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 张量的通道排布。排布不随数据携带，编码与解码两端必须约定一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nchw,
  Nhwc,
}

impl TensorLayout {
  pub fn shape(&self, channels: usize, height: usize, width: usize) -> [usize; 4] {
    match self {
      TensorLayout::Nchw => [1, channels, height, width],
      TensorLayout::Nhwc => [1, height, width, channels],
    }
  }

  /// 从四维形状中取出 (channels, height, width)
  pub fn split_shape(&self, shape: &[usize]) -> Option<(usize, usize, usize)> {
    match (self, shape) {
      (TensorLayout::Nchw, [1, c, h, w]) => Some((*c, *h, *w)),
      (TensorLayout::Nhwc, [1, h, w, c]) => Some((*c, *h, *w)),
      _ => None,
    }
  }

  pub fn index(&self, channels: usize, height: usize, width: usize, c: usize, y: usize, x: usize) -> usize {
    match self {
      TensorLayout::Nchw => c * height * width + y * width + x,
      TensorLayout::Nhwc => (y * width + x) * channels + c,
    }
  }
}

/// 带显式形状的扁平浮点张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Box<[usize]>,
  data: Box<[f32]>,
}

impl Tensor {
  pub fn new(shape: impl Into<Vec<usize>>, data: impl Into<Vec<f32>>) -> Result<Self, TensorError> {
    let shape = shape.into();
    let data = data.into();
    let expected: usize = shape.iter().product();
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape: shape.into_boxed_slice(),
      data: data.into_boxed_slice(),
    })
  }

  pub fn with_shape(shape: impl Into<Vec<usize>>) -> Self {
    let shape = shape.into();
    let size = shape.iter().product();
    Self {
      shape: shape.into_boxed_slice(),
      data: vec![0.0; size].into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
    (self.shape.into_vec(), self.data.into_vec())
  }
}

impl AsMut<[f32]> for Tensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tensor_rejects_wrong_length() {
    let err = Tensor::new(vec![1, 3, 2, 2], vec![0.0; 11]).unwrap_err();
    assert_eq!(
      err,
      TensorError::LengthMismatch {
        shape: vec![1, 3, 2, 2],
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn layout_index_matches_shape() {
    let (c, h, w) = (3, 4, 5);
    assert_eq!(TensorLayout::Nchw.index(c, h, w, 2, 1, 3), 2 * 20 + 5 + 3);
    assert_eq!(TensorLayout::Nhwc.index(c, h, w, 2, 1, 3), (5 + 3) * 3 + 2);
    assert_eq!(TensorLayout::Nhwc.split_shape(&[1, 4, 5, 3]), Some((3, 4, 5)));
    assert_eq!(TensorLayout::Nchw.split_shape(&[2, 3, 4, 5]), None);
  }
}
