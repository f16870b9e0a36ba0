// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/store.rs - 模型文件存储
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

//! 模型文件的本地布局为 `<root>/onnx/<file_name>`，下载时写入同目录的
//! `<file_name>.tmp`，完成后再替换正式文件。

use std::{
  collections::HashMap,
  fs::{self, File},
  io::{Read, Write},
  path::{Path, PathBuf},
  sync::Mutex,
};

use serde::Serialize;
use tracing::{error, info, warn};
use url::Url;

mod catalog;
mod fetch;

pub use self::catalog::{
  COMIC_DETECTOR, CatalogError, LAMA_512, LITE_INPAINT_256, ModelCatalog, ModelDescriptor,
};
pub use self::fetch::{FetchError, FetchOptions, HttpResponse, HttpTransport, ReqwestTransport, resolve};
#[cfg(test)]
pub(crate) use self::fetch::testing as fetch_testing;

const ARTIFACT_DIR: &str = "onnx";

/// 模型状态，只存在于内存；`Ready` 由文件是否存在决定，进程重启后依然成立
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", content = "progress", rename_all = "kebab-case")]
pub enum ModelState {
  NotDownloaded,
  Downloading(f32),
  Ready,
  Failed,
}

pub struct ModelStore {
  root: PathBuf,
  catalog: ModelCatalog,
  transport: Box<dyn HttpTransport>,
  options: FetchOptions,
  states: Mutex<HashMap<String, ModelState>>,
}

impl ModelStore {
  pub fn new<P: Into<PathBuf>>(
    root: P,
    catalog: ModelCatalog,
    transport: Box<dyn HttpTransport>,
    options: FetchOptions,
  ) -> Self {
    Self {
      root: root.into(),
      catalog,
      transport,
      options,
      states: Mutex::new(HashMap::new()),
    }
  }

  pub fn catalog(&self) -> &ModelCatalog {
    &self.catalog
  }

  pub fn descriptor(&self, model_id: &str) -> Option<&ModelDescriptor> {
    self.catalog.get(model_id)
  }

  pub fn artifact_dir(&self) -> PathBuf {
    self.root.join(ARTIFACT_DIR)
  }

  pub fn artifact_path(&self, model_id: &str) -> Option<PathBuf> {
    self
      .descriptor(model_id)
      .map(|d| self.artifact_dir().join(&d.file_name))
  }

  pub fn temp_path(&self, model_id: &str) -> Option<PathBuf> {
    self
      .descriptor(model_id)
      .map(|d| self.artifact_dir().join(format!("{}.tmp", d.file_name)))
  }

  /// 文件存在且长度非零
  pub fn is_available(&self, model_id: &str) -> bool {
    self
      .artifact_path(model_id)
      .and_then(|p| fs::metadata(p).ok())
      .is_some_and(|m| m.is_file() && m.len() > 0)
  }

  pub fn state(&self, model_id: &str) -> ModelState {
    let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
    match states.get(model_id) {
      Some(state) => *state,
      None if self.is_available(model_id) => ModelState::Ready,
      None => ModelState::NotDownloaded,
    }
  }

  fn set_state(&self, model_id: &str, state: Option<ModelState>) {
    let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
    match state {
      Some(state) => states.insert(model_id.to_string(), state),
      None => states.remove(model_id),
    };
  }

  /// 下载 `url` 到模型文件。失败时原有文件保持不变；临时文件可能残留，下次下载时会被覆盖。
  pub(crate) fn download(
    &self,
    model_id: &str,
    url: &Url,
    on_progress: &mut dyn FnMut(f32),
  ) -> Result<(), FetchError> {
    let path = self
      .artifact_path(model_id)
      .ok_or_else(|| FetchError::UnknownModel(model_id.to_string()))?;
    let temp = self
      .temp_path(model_id)
      .ok_or_else(|| FetchError::UnknownModel(model_id.to_string()))?;

    info!("开始下载模型 {}: {}", model_id, url);
    self.set_state(model_id, Some(ModelState::Downloading(0.0)));

    let result = self
      .fetch_to(model_id, url, &temp, on_progress)
      .and_then(|_| promote(&temp, &path));

    match &result {
      Ok(_) => {
        info!("模型下载完成: {}", path.display());
        self.set_state(model_id, None);
      }
      Err(e) => {
        error!("模型 {} 下载失败: {}", model_id, e);
        self.set_state(model_id, Some(ModelState::Failed));
      }
    }
    result
  }

  fn fetch_to(
    &self,
    model_id: &str,
    url: &Url,
    temp: &Path,
    on_progress: &mut dyn FnMut(f32),
  ) -> Result<(), FetchError> {
    let response = resolve(self.transport.as_ref(), url, self.options.max_redirects)?;
    let total = response.content_length.filter(|len| *len > 0);
    let mut body = response.body;

    fs::create_dir_all(self.artifact_dir())?;
    let mut file = File::create(temp)?;
    let mut buffer = vec![0u8; self.options.chunk_size.max(1)];
    let mut received = 0u64;

    loop {
      let n = body.read(&mut buffer)?;
      if n == 0 {
        break;
      }
      file.write_all(&buffer[..n])?;
      received += n as u64;

      if let Some(total) = total {
        let progress = (received as f32 / total as f32).min(1.0);
        self.set_state(model_id, Some(ModelState::Downloading(progress)));
        on_progress(progress);
      }
    }
    file.sync_all()?;

    if received == 0 {
      return Err(FetchError::EmptyBody);
    }
    info!("已接收 {} 字节", received);
    Ok(())
  }
}

/// 删除旧文件后把临时文件改名到位；改名失败时退回复制再删除
fn promote(temp: &Path, path: &Path) -> Result<(), FetchError> {
  if path.exists() {
    fs::remove_file(path)?;
  }
  if let Err(e) = fs::rename(temp, path) {
    warn!("重命名失败，改为复制: {}", e);
    fs::copy(temp, path)?;
    fs::remove_file(temp)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex as StdMutex};

  use super::fetch::testing::{FakeTransport, Route};
  use super::*;

  fn store_with(dir: &Path, transport: FakeTransport) -> ModelStore {
    ModelStore::new(
      dir,
      ModelCatalog::builtin(),
      Box::new(transport),
      FetchOptions {
        max_redirects: 5,
        chunk_size: 4,
      },
    )
  }

  #[test]
  fn availability_requires_non_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), FakeTransport::default());
    assert!(!store.is_available(COMIC_DETECTOR));
    assert_eq!(store.state(COMIC_DETECTOR), ModelState::NotDownloaded);

    let path = store.artifact_path(COMIC_DETECTOR).unwrap();
    assert_eq!(path, dir.path().join("onnx").join("detector.onnx"));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"").unwrap();
    assert!(!store.is_available(COMIC_DETECTOR));

    fs::write(&path, b"weights").unwrap();
    assert!(store.is_available(COMIC_DETECTOR));
    assert_eq!(store.state(COMIC_DETECTOR), ModelState::Ready);
    assert!(!store.is_available("unknown"));
  }

  #[test]
  fn download_streams_and_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let body = b"0123456789abcdef01".to_vec();
    let transport = FakeTransport::default()
      .route("https://models.test/start", Route::Redirect(302, Some("/file".into())))
      .route("https://models.test/file", Route::Body(body.clone(), true));
    let store = store_with(dir.path(), transport);

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let url = Url::parse("https://models.test/start").unwrap();
    store
      .download(COMIC_DETECTOR, &url, &mut |p| sink.lock().unwrap().push(p))
      .unwrap();

    let path = store.artifact_path(COMIC_DETECTOR).unwrap();
    assert_eq!(fs::read(&path).unwrap(), body);
    assert!(!store.temp_path(COMIC_DETECTOR).unwrap().exists());
    assert_eq!(store.state(COMIC_DETECTOR), ModelState::Ready);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*seen.last().unwrap(), 1.0);
  }

  #[test]
  fn unknown_length_skips_progress() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::default()
      .route("https://models.test/f", Route::Body(b"weights".to_vec(), false));
    let store = store_with(dir.path(), transport);

    let mut calls = 0;
    let url = Url::parse("https://models.test/f").unwrap();
    store.download(LAMA_512, &url, &mut |_| calls += 1).unwrap();
    assert_eq!(calls, 0);
    assert!(store.is_available(LAMA_512));
  }

  #[test]
  fn failed_download_keeps_previous_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::default()
      .chain("https://models.test/loop", 6, b"new")
      .route("https://models.test/empty", Route::Body(Vec::new(), true));
    let store = store_with(dir.path(), transport);

    let path = store.artifact_path(COMIC_DETECTOR).unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"old").unwrap();

    let url = Url::parse("https://models.test/loop/0").unwrap();
    let err = store.download(COMIC_DETECTOR, &url, &mut |_| {}).unwrap_err();
    assert!(matches!(err, FetchError::RedirectLoop(_)));
    assert_eq!(fs::read(&path).unwrap(), b"old");
    assert_eq!(store.state(COMIC_DETECTOR), ModelState::Failed);

    let url = Url::parse("https://models.test/empty").unwrap();
    let err = store.download(COMIC_DETECTOR, &url, &mut |_| {}).unwrap_err();
    assert!(matches!(err, FetchError::EmptyBody));
    assert_eq!(fs::read(&path).unwrap(), b"old");
  }

  #[test]
  fn retry_after_failure_replaces_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::default()
      .route("https://models.test/bad", Route::Status(500))
      .route("https://models.test/good", Route::Body(b"fresh".to_vec(), true));
    let store = store_with(dir.path(), transport);

    let bad = Url::parse("https://models.test/bad").unwrap();
    assert!(matches!(
      store.download(LAMA_512, &bad, &mut |_| {}),
      Err(FetchError::Status(500))
    ));
    assert_eq!(store.state(LAMA_512), ModelState::Failed);

    let good = Url::parse("https://models.test/good").unwrap();
    store.download(LAMA_512, &good, &mut |_| {}).unwrap();
    assert_eq!(store.state(LAMA_512), ModelState::Ready);
    assert_eq!(fs::read(store.artifact_path(LAMA_512).unwrap()).unwrap(), b"fresh");
  }

  #[test]
  fn unknown_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), FakeTransport::default());
    let url = Url::parse("https://models.test/x").unwrap();
    assert!(matches!(
      store.download("nope", &url, &mut |_| {}),
      Err(FetchError::UnknownModel(_))
    ));
  }
}
