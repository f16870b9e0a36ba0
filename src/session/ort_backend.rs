// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/session/ort_backend.rs - ONNX Runtime 会话
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

use once_cell::sync::OnceCell;
use ort::{
  session::{Session, SessionInputValue, builder::GraphOptimizationLevel},
  value::Tensor as OrtTensor,
};
use tracing::{debug, info, warn};

use super::{InferenceSession, SessionError, SessionInput, SessionLoader};
use crate::frame::Tensor;

static ENVIRONMENT: OnceCell<()> = OnceCell::new();

fn init_environment() {
  ENVIRONMENT.get_or_init(|| {
    info!("初始化 ONNX Runtime 环境");
    if let Err(e) = ort::init().with_name("typer-vision").commit() {
      warn!("ONNX Runtime 环境初始化失败，使用默认环境: {}", e);
    }
  });
}

#[derive(Debug, Clone, Copy)]
pub struct OrtLoader {
  pub intra_threads: usize,
  pub inter_threads: usize,
}

impl Default for OrtLoader {
  fn default() -> Self {
    Self {
      intra_threads: 4,
      inter_threads: 4,
    }
  }
}

impl OrtLoader {
  pub fn new(intra_threads: usize, inter_threads: usize) -> Self {
    Self {
      intra_threads,
      inter_threads,
    }
  }

  fn build(&self, path: &Path) -> ort::Result<Session> {
    Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .with_inter_threads(self.inter_threads)?
      .commit_from_file(path)
  }
}

impl SessionLoader for OrtLoader {
  fn load(&self, path: &Path) -> Result<Box<dyn InferenceSession>, SessionError> {
    if !path.exists() {
      return Err(SessionError::ArtifactMissing(path.display().to_string()));
    }
    init_environment();

    let session = self
      .build(path)
      .map_err(|e| SessionError::Construction(e.to_string()))?;
    for input in &session.inputs {
      debug!("模型输入: {} {:?}", input.name, input.input_type);
    }
    Ok(Box::new(OrtSession { session }))
  }
}

pub struct OrtSession {
  session: Session,
}

fn to_value(input: SessionInput) -> Result<SessionInputValue<'static>, SessionError> {
  let value = match input {
    SessionInput::F32(tensor) => {
      let (shape, data) = tensor.into_parts();
      OrtTensor::from_array((shape, data))?.into()
    }
    SessionInput::I64 { shape, data } => OrtTensor::from_array((shape, data))?.into(),
  };
  Ok(value)
}

impl InferenceSession for OrtSession {
  fn input_names(&self) -> Vec<String> {
    self.session.inputs.iter().map(|i| i.name.clone()).collect()
  }

  fn run(&mut self, inputs: Vec<(String, SessionInput)>) -> Result<Vec<Tensor>, SessionError> {
    let mut values = Vec::with_capacity(inputs.len());
    for (name, input) in inputs {
      values.push((name, to_value(input)?));
    }

    let outputs = self.session.run(values)?;
    let mut tensors = Vec::new();
    for (name, value) in outputs.iter() {
      match value.try_extract_tensor::<f32>() {
        Ok((shape, data)) => {
          let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
          let tensor = Tensor::new(shape, data.to_vec())
            .map_err(|e| SessionError::Run(format!("{}: {}", name, e)))?;
          tensors.push(tensor);
        }
        Err(_) => debug!("跳过非 f32 输出: {}", name),
      }
    }
    Ok(tensors)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_is_reported_before_runtime_setup() {
    let dir = tempfile::tempdir().unwrap();
    let result = OrtLoader::default().load(&dir.path().join("absent.onnx"));
    assert!(matches!(result, Err(SessionError::ArtifactMissing(_))));
  }

  #[test]
  fn environment_is_set_up_once() {
    init_environment();
    init_environment();
    assert!(ENVIRONMENT.get().is_some());
  }
}
