// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/store/catalog.rs - 模型目录
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

pub const COMIC_DETECTOR: &str = "comic-detector";
pub const LAMA_512: &str = "lama-512";
pub const LITE_INPAINT_256: &str = "lite-inpaint-256";

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("读取模型目录失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型目录格式错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("模型 ID 重复: {0}")]
  DuplicateId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
  pub id: String,
  /// `onnx/` 目录下的文件名
  pub file_name: String,
  #[serde(default)]
  pub url: Option<Url>,
  /// 模型的固定输入边长
  pub input_size: u32,
}

impl ModelDescriptor {
  pub fn new(id: &str, file_name: &str, url: Option<&str>, input_size: u32) -> Self {
    Self {
      id: id.to_string(),
      file_name: file_name.to_string(),
      url: url.and_then(|u| Url::parse(u).ok()),
      input_size,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
  models: Vec<ModelDescriptor>,
}

impl Default for ModelCatalog {
  fn default() -> Self {
    Self::builtin()
  }
}

impl ModelCatalog {
  pub fn builtin() -> Self {
    Self {
      models: vec![
        ModelDescriptor::new(
          COMIC_DETECTOR,
          "detector.onnx",
          Some("https://huggingface.co/ogkalu/comic-text-and-bubble-detector/resolve/main/detector.onnx"),
          640,
        ),
        ModelDescriptor::new(
          LAMA_512,
          "LaMa_512.onnx",
          Some(
            "https://github.com/T8RIN/ImageToolboxRemoteResources/raw/refs/heads/main/onnx/inpaint/lama/LaMa_512.onnx",
          ),
          512,
        ),
        // 随应用分发，没有下载地址
        ModelDescriptor::new(LITE_INPAINT_256, "lite_inpaint_256.onnx", None, 256),
      ],
    }
  }

  pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
    self.models.iter().find(|m| m.id == id)
  }

  pub fn models(&self) -> &[ModelDescriptor] {
    &self.models
  }

  /// 同 ID 的条目被替换，其余追加
  pub fn insert(&mut self, descriptor: ModelDescriptor) {
    match self.models.iter_mut().find(|m| m.id == descriptor.id) {
      Some(existing) => *existing = descriptor,
      None => self.models.push(descriptor),
    }
  }

  pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
    let catalog: ModelCatalog = serde_json::from_str(json)?;
    for (i, model) in catalog.models.iter().enumerate() {
      if catalog.models[..i].iter().any(|m| m.id == model.id) {
        return Err(CatalogError::DuplicateId(model.id.clone()));
      }
    }
    Ok(catalog)
  }

  /// 读取 JSON 目录并覆盖内置条目
  pub fn with_overrides<P: AsRef<Path>>(mut self, path: P) -> Result<Self, CatalogError> {
    info!("加载模型目录: {}", path.as_ref().display());
    let json = std::fs::read_to_string(path)?;
    for model in Self::from_json_str(&json)?.models {
      self.insert(model);
    }
    Ok(self)
  }
}
