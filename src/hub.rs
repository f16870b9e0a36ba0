// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/hub.rs - 模型管理中心
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

//! 模型存储与会话缓存的唯一持有者，由调用方以 `Arc<ModelHub>` 共享。
//!
//! 每个模型一把读写锁：推理持有读锁，下载从开始到替换文件、释放会话为止持有写锁，
//! 因此同一模型的下载与推理互斥，不同模型之间互不影响。

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{Arc, Mutex, RwLock},
  time::Duration,
};

use tracing::{info, warn};
use url::Url;

use crate::{
  session::{InferenceSession, OrtLoader, SessionCache, SessionError, SessionLoader},
  store::{FetchError, FetchOptions, ModelCatalog, ModelState, ModelStore, ReqwestTransport},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
  pub root_dir: PathBuf,
  pub connect_timeout: Duration,
  pub read_timeout: Duration,
  pub user_agent: String,
  pub max_redirects: usize,
  pub chunk_size: usize,
  pub intra_threads: usize,
  pub inter_threads: usize,
}

impl Default for HubConfig {
  fn default() -> Self {
    Self {
      root_dir: PathBuf::from("models"),
      connect_timeout: Duration::from_secs(30),
      read_timeout: Duration::from_secs(30),
      user_agent: "AstralTyper/1.0".to_string(),
      max_redirects: 5,
      chunk_size: 8192,
      intra_threads: 4,
      inter_threads: 4,
    }
  }
}

impl HubConfig {
  pub fn with_root<P: Into<PathBuf>>(root_dir: P) -> Self {
    Self {
      root_dir: root_dir.into(),
      ..Default::default()
    }
  }

  pub fn fetch_options(&self) -> FetchOptions {
    FetchOptions {
      max_redirects: self.max_redirects,
      chunk_size: self.chunk_size,
    }
  }
}

pub struct ModelHub {
  store: ModelStore,
  sessions: SessionCache,
  locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ModelHub {
  /// 使用 reqwest 下载、ONNX Runtime 推理
  pub fn new(config: HubConfig, catalog: ModelCatalog) -> Result<Self, FetchError> {
    info!("模型目录: {}", config.root_dir.display());
    let transport = ReqwestTransport::new(config.connect_timeout, config.read_timeout, &config.user_agent)?;
    let store = ModelStore::new(
      config.root_dir.clone(),
      catalog,
      Box::new(transport),
      config.fetch_options(),
    );
    let loader = OrtLoader::new(config.intra_threads, config.inter_threads);
    Ok(Self::with_parts(store, Box::new(loader)))
  }

  pub fn with_parts(store: ModelStore, loader: Box<dyn SessionLoader>) -> Self {
    Self {
      store,
      sessions: SessionCache::new(loader),
      locks: Mutex::new(HashMap::new()),
    }
  }

  pub fn store(&self) -> &ModelStore {
    &self.store
  }

  pub fn sessions(&self) -> &SessionCache {
    &self.sessions
  }

  fn model_lock(&self, model_id: &str) -> Arc<RwLock<()>> {
    let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(locks.entry(model_id.to_string()).or_default())
  }

  pub fn is_model_available(&self, model_id: &str) -> bool {
    self.store.is_available(model_id)
  }

  pub fn status(&self, model_id: &str) -> ModelState {
    self.store.state(model_id)
  }

  /// 从目录中登记的地址下载
  pub fn download_model(
    &self,
    model_id: &str,
    on_progress: &mut dyn FnMut(f32),
  ) -> Result<(), FetchError> {
    let descriptor = self
      .store
      .descriptor(model_id)
      .ok_or_else(|| FetchError::UnknownModel(model_id.to_string()))?;
    let url = descriptor
      .url
      .clone()
      .ok_or_else(|| FetchError::NoSource(model_id.to_string()))?;
    self.download_model_from(model_id, &url, on_progress)
  }

  /// 下载成功后释放旧会话，下次推理时从新文件重建
  pub fn download_model_from(
    &self,
    model_id: &str,
    url: &Url,
    on_progress: &mut dyn FnMut(f32),
  ) -> Result<(), FetchError> {
    let lock = self.model_lock(model_id);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());

    self.store.download(model_id, url, on_progress)?;
    self.sessions.invalidate(model_id);
    Ok(())
  }

  /// 在模型会话上执行 `f`，期间独占该会话
  pub fn with_session<R, E, F>(&self, model_id: &str, f: F) -> Result<R, E>
  where
    E: From<SessionError>,
    F: FnOnce(&mut dyn InferenceSession) -> Result<R, E>,
  {
    let lock = self.model_lock(model_id);
    let _guard = lock.read().unwrap_or_else(|e| e.into_inner());

    let path = self
      .store
      .artifact_path(model_id)
      .filter(|_| self.store.is_available(model_id))
      .ok_or_else(|| SessionError::ArtifactMissing(model_id.to_string()))?;

    let session = self.sessions.get_session(model_id, &path)?;
    let mut session = session.lock().unwrap_or_else(|e| {
      warn!("会话锁已中毒，继续使用: {}", model_id);
      e.into_inner()
    });
    f(&mut **session)
  }

  pub fn invalidate(&self, model_id: &str) -> bool {
    self.sessions.invalidate(model_id)
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::path::Path;

  use super::*;
  use crate::session::testing::{FakeLoader, FakeSession};
  use crate::store::FetchOptions;

  /// 不联网的 hub；`make` 决定每次加载出的会话
  pub fn fake_hub<F>(dir: &Path, make: F) -> (ModelHub, Arc<std::sync::atomic::AtomicUsize>)
  where
    F: Fn() -> Result<FakeSession, SessionError> + Send + Sync + 'static,
  {
    fake_hub_with(dir, crate::store::fetch_testing::FakeTransport::default(), make)
  }

  pub fn fake_hub_with<F>(
    dir: &Path,
    transport: crate::store::fetch_testing::FakeTransport,
    make: F,
  ) -> (ModelHub, Arc<std::sync::atomic::AtomicUsize>)
  where
    F: Fn() -> Result<FakeSession, SessionError> + Send + Sync + 'static,
  {
    let store = ModelStore::new(
      dir,
      ModelCatalog::builtin(),
      Box::new(transport),
      FetchOptions::default(),
    );
    let loader = FakeLoader::new(make);
    let loads = Arc::clone(&loader.loads);
    (ModelHub::with_parts(store, Box::new(loader)), loads)
  }

  pub fn install_artifact(hub: &ModelHub, model_id: &str) {
    let path = hub.store().artifact_path(model_id).unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"weights").unwrap();
  }
}
