// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/session.rs - 推理会话缓存
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

use std::{
  collections::HashMap,
  path::Path,
  sync::{Arc, Mutex},
};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::Tensor;

mod ort_backend;
pub use self::ort_backend::{OrtLoader, OrtSession};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("模型文件不存在: {0}")]
  ArtifactMissing(String),
  #[error("会话创建失败: {0}")]
  Construction(String),
  #[error("推理失败: {0}")]
  Run(String),
  #[error("输入张量无效: {0}")]
  InvalidInput(String),
}

impl From<ort::Error> for SessionError {
  fn from(err: ort::Error) -> Self {
    SessionError::Run(err.to_string())
  }
}

/// 送入会话的一个命名输入
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
  F32(Tensor),
  I64 { shape: Vec<usize>, data: Vec<i64> },
}

impl From<Tensor> for SessionInput {
  fn from(tensor: Tensor) -> Self {
    SessionInput::F32(tensor)
  }
}

/// 已加载的模型图。同一会话上的 `run` 必须串行调用。
pub trait InferenceSession: Send {
  fn input_names(&self) -> Vec<String>;
  fn run(&mut self, inputs: Vec<(String, SessionInput)>) -> Result<Vec<Tensor>, SessionError>;
}

pub trait SessionLoader: Send + Sync {
  fn load(&self, path: &Path) -> Result<Box<dyn InferenceSession>, SessionError>;
}

pub type SharedSession = Arc<Mutex<Box<dyn InferenceSession>>>;

type SessionSlot = Arc<OnceCell<SharedSession>>;

/// 每个模型最多一个存活会话，首次使用时才创建；模型文件被替换后必须先 `invalidate`。
/// 同一模型的并发创建只执行一次，不同模型的创建互不等待。
pub struct SessionCache {
  loader: Box<dyn SessionLoader>,
  sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionCache {
  pub fn new(loader: Box<dyn SessionLoader>) -> Self {
    Self {
      loader,
      sessions: Mutex::new(HashMap::new()),
    }
  }

  fn slot(&self, model_id: &str) -> SessionSlot {
    let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(sessions.entry(model_id.to_string()).or_default())
  }

  pub fn get_session(&self, model_id: &str, path: &Path) -> Result<SharedSession, SessionError> {
    let slot = self.slot(model_id);
    let session = slot.get_or_try_init(|| {
      info!("创建推理会话: {} ({})", model_id, path.display());
      let now = std::time::Instant::now();
      let session: SharedSession = Arc::new(Mutex::new(self.loader.load(path)?));
      info!("会话创建完成，耗时: {:.2?}", now.elapsed());
      Ok::<_, SessionError>(session)
    })?;
    Ok(Arc::clone(session))
  }

  /// 释放会话并清除缓存项，不存在时什么也不做
  pub fn invalidate(&self, model_id: &str) -> bool {
    let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
    let removed = sessions
      .remove(model_id)
      .is_some_and(|slot| slot.get().is_some());
    if removed {
      info!("释放推理会话: {}", model_id);
    } else {
      debug!("没有需要释放的会话: {}", model_id);
    }
    removed
  }

  pub fn is_live(&self, model_id: &str) -> bool {
    self
      .sessions
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(model_id)
      .is_some_and(|slot| slot.get().is_some())
  }
}
