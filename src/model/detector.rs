// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/model/detector.rs - 切块气泡检测
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

use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  codec::{BoxFormat, DEFAULT_CONFIDENCE_THRESHOLD, DecodeError, DecodeOptions, decode_detections, encode_image},
  frame::RasterBuffer,
  hub::ModelHub,
  model::{
    Detection, Model,
    nms::{Suppression, merge_touching, non_max_suppression},
    tiling::{Tile, crop_tile, tile_grid},
  },
  session::{InferenceSession, SessionError, SessionInput},
  store::COMIC_DETECTOR,
};

/// 切块边界处被切开的框，间距在此范围内视为相接
const TOUCHING_TOLERANCE: f32 = 15.0;
const ALIGNMENT_RATIO: f32 = 0.5;
const DEFAULT_IMAGE_INPUT: &str = "images";

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("检测配置无效: {0}")]
  InvalidConfig(String),
  #[error("会话错误: {0}")]
  Session(#[from] SessionError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  pub tile_size: u32,
  pub stride: u32,
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub box_format: BoxFormat,
  /// 宽或高不大于该值的框被丢弃
  pub min_box_size: f32,
  /// 被更高分框包含的比例超过该值时抑制
  pub ios_threshold: Option<f32>,
  /// 合并被切块边界切开的相邻框
  pub merge_touching: bool,
  /// 以中心为基准缩小最终框，近似气泡的内接矩形
  pub inner_scale: Option<f32>,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      tile_size: 640,
      stride: 512,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: 0.5,
      box_format: BoxFormat::CenterSize,
      min_box_size: 0.0,
      ios_threshold: None,
      merge_touching: false,
      inner_scale: None,
    }
  }
}

impl DetectorConfig {
  /// 漫画气泡检测模型（RT-DETR 导出，角点坐标）使用的完整后处理
  pub fn comic() -> Self {
    Self {
      confidence_threshold: 0.35,
      box_format: BoxFormat::Corners,
      min_box_size: 20.0,
      ios_threshold: Some(0.85),
      merge_touching: true,
      inner_scale: Some(0.75),
      ..Default::default()
    }
  }

  pub fn validate(&self) -> Result<(), DetectError> {
    if self.tile_size == 0 {
      return Err(DetectError::InvalidConfig("切块大小必须大于 0".into()));
    }
    if self.stride == 0 || self.stride > self.tile_size {
      return Err(DetectError::InvalidConfig(format!(
        "步长 {} 必须在 1 到切块大小 {} 之间",
        self.stride, self.tile_size
      )));
    }
    Ok(())
  }

  pub fn decode_options(&self) -> DecodeOptions {
    DecodeOptions {
      confidence_threshold: self.confidence_threshold,
      input_size: self.tile_size as f32,
      box_format: self.box_format,
    }
  }

  fn suppression(&self) -> Suppression {
    Suppression {
      iou_threshold: self.iou_threshold,
      ios_threshold: self.ios_threshold,
      min_box_size: self.min_box_size,
    }
  }
}

/// 与推理后端无关的切块检测流程
#[derive(Debug, Clone)]
pub struct TiledDetector {
  config: DetectorConfig,
}

impl TiledDetector {
  pub fn new(config: DetectorConfig) -> Result<Self, DetectError> {
    config.validate()?;
    Ok(Self { config })
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn tiles(&self, width: u32, height: u32) -> Vec<Tile> {
    tile_grid(width, height, self.config.tile_size, self.config.stride)
  }

  /// 对每个切块调用 `infer`，把切块内坐标平移回整图并裁剪到图像范围，最后合并。
  /// 单个切块失败只记录日志，其余切块照常处理。
  pub fn detect_with<F>(&self, image: &RasterBuffer, mut infer: F) -> Vec<Detection>
  where
    F: FnMut(&RgbaImage) -> Result<Vec<Detection>, DetectError>,
  {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Vec::new();
    }

    let tiles = self.tiles(width, height);
    debug!("图像 {}x{} 切分为 {} 块", width, height, tiles.len());

    let mut detections = Vec::new();
    for tile in tiles {
      let crop = crop_tile(image, tile, self.config.tile_size);
      match infer(&crop) {
        Ok(local) => {
          for det in local {
            let rect = det
              .rect
              .offset(tile.x as f32, tile.y as f32)
              .clip(width as f32, height as f32);
            if rect.width() > 0.0 && rect.height() > 0.0 {
              detections.push(Detection::new(rect, det.score));
            }
          }
        }
        Err(e) => error!("切块 ({}, {}) 推理失败: {}", tile.x, tile.y, e),
      }
    }

    self.merge(detections)
  }

  pub fn merge(&self, detections: Vec<Detection>) -> Vec<Detection> {
    let total = detections.len();
    let mut kept = non_max_suppression(detections, &self.config.suppression());
    if self.config.merge_touching {
      kept = merge_touching(kept, TOUCHING_TOLERANCE, ALIGNMENT_RATIO);
    }
    if let Some(scale) = self.config.inner_scale {
      for det in kept.iter_mut() {
        det.rect = det.rect.scale_about_center(scale);
      }
    }
    debug!("合并前 {} 个候选框，合并后 {} 个", total, kept.len());
    kept
  }
}

/// 模型输入名：图像输入取名字含 `image` 的，尺寸输入取含 `size` 或 `orig` 的
fn input_names(session: &dyn InferenceSession) -> (String, Option<String>) {
  let names = session.input_names();
  let image = names
    .iter()
    .find(|n| n.to_lowercase().contains("image"))
    .cloned()
    .unwrap_or_else(|| DEFAULT_IMAGE_INPUT.to_string());
  let size = names
    .iter()
    .filter(|n| **n != image)
    .find(|n| {
      let lower = n.to_lowercase();
      lower.contains("size") || lower.contains("orig")
    })
    .cloned();
  (image, size)
}

/// 基于模型中心会话的气泡检测器
pub struct BubbleDetector {
  hub: Arc<ModelHub>,
  model_id: String,
  engine: TiledDetector,
}

impl BubbleDetector {
  pub fn new(hub: Arc<ModelHub>, config: DetectorConfig) -> Result<Self, DetectError> {
    Self::with_model(hub, COMIC_DETECTOR, config)
  }

  pub fn with_model(hub: Arc<ModelHub>, model_id: &str, config: DetectorConfig) -> Result<Self, DetectError> {
    Ok(Self {
      hub,
      model_id: model_id.to_string(),
      engine: TiledDetector::new(config)?,
    })
  }

  pub fn model_id(&self) -> &str {
    &self.model_id
  }

  fn run_tiles(&self, image: &RasterBuffer) -> Result<Vec<Detection>, DetectError> {
    let config = self.engine.config();
    let size = config.tile_size;
    let options = config.decode_options();

    self.hub.with_session(&self.model_id, |session| {
      let (image_input, size_input) = input_names(session);
      debug!("图像输入: {}, 尺寸输入: {:?}", image_input, size_input);

      Ok(self.engine.detect_with(image, |tile| {
        let mut inputs = vec![(image_input.clone(), SessionInput::F32(encode_image(tile, (size, size))))];
        if let Some(name) = &size_input {
          inputs.push((
            name.clone(),
            SessionInput::I64 {
              shape: vec![1, 2],
              data: vec![size as i64, size as i64],
            },
          ));
        }

        let outputs = session.run(inputs)?;
        match decode_detections(&outputs, &options) {
          Ok(detections) => Ok(detections),
          Err(e) => {
            warn!("输出形状不匹配，按无检测处理: {}", e);
            Ok(Vec::new())
          }
        }
      }))
    })
  }
}

impl Model for BubbleDetector {
  type Input = RasterBuffer;
  type Output = Vec<Detection>;
  type Error = DetectError;

  /// 模型文件不存在时直接返回空结果，不创建会话
  fn infer(&self, image: &Self::Input) -> Result<Self::Output, Self::Error> {
    if !self.hub.is_model_available(&self.model_id) {
      warn!("模型 {} 不可用，跳过检测", self.model_id);
      return Ok(Vec::new());
    }

    let now = std::time::Instant::now();
    match self.run_tiles(image) {
      Ok(detections) => {
        info!("检测到 {} 个气泡，耗时: {:.2?}", detections.len(), now.elapsed());
        Ok(detections)
      }
      Err(DetectError::Session(SessionError::ArtifactMissing(_))) => Ok(Vec::new()),
      Err(e) => Err(e),
    }
  }
}
