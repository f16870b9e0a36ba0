// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/store/fetch.rs - HTTP 下载
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

use std::{io::Read, time::Duration};

use reqwest::{blocking::Client, header, redirect};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("网络请求失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("文件读写失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("服务器返回错误状态: {0}")]
  Status(u16),
  #[error("重定向次数过多: {0}")]
  RedirectLoop(usize),
  #[error("重定向响应缺少 Location 头")]
  NoLocationHeader,
  #[error("URL 无效: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("响应体为空")]
  EmptyBody,
  #[error("未知模型: {0}")]
  UnknownModel(String),
  #[error("模型没有下载地址: {0}")]
  NoSource(String),
}

/// 一次不跟随重定向的 GET 响应
pub struct HttpResponse {
  pub status: u16,
  pub location: Option<String>,
  pub content_length: Option<u64>,
  pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for HttpResponse {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpResponse")
      .field("status", &self.status)
      .field("location", &self.location)
      .field("content_length", &self.content_length)
      .finish_non_exhaustive()
  }
}

/// 传输层只发一次请求，重定向由调用方处理
pub trait HttpTransport: Send + Sync {
  fn get(&self, url: &Url) -> Result<HttpResponse, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
  pub max_redirects: usize,
  pub chunk_size: usize,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      max_redirects: 5,
      chunk_size: 8192,
    }
  }
}

pub struct ReqwestTransport {
  client: Client,
}

impl ReqwestTransport {
  /// `read_timeout` 作用于发送请求和每一次读取响应体，不限制整个下载的时长
  pub fn new(connect_timeout: Duration, read_timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
    let client = Client::builder()
      .connect_timeout(connect_timeout)
      .timeout(read_timeout)
      .redirect(redirect::Policy::none())
      .user_agent(user_agent)
      .build()?;
    Ok(Self { client })
  }
}

impl HttpTransport for ReqwestTransport {
  fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
    debug!("GET {}", url);
    let response = self.client.get(url.as_str()).send()?;
    let location = response
      .headers()
      .get(header::LOCATION)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    Ok(HttpResponse {
      status: response.status().as_u16(),
      location,
      content_length: response.content_length(),
      body: Box::new(response),
    })
  }
}

/// 跟随 301/302/303 重定向，直到拿到 200 响应
pub fn resolve(
  transport: &dyn HttpTransport,
  url: &Url,
  max_redirects: usize,
) -> Result<HttpResponse, FetchError> {
  let mut current = url.clone();
  let mut redirects = 0;

  loop {
    let response = transport.get(&current)?;
    match response.status {
      200 => return Ok(response),
      301 | 302 | 303 => {
        if redirects >= max_redirects {
          return Err(FetchError::RedirectLoop(redirects + 1));
        }
        let location = response.location.ok_or(FetchError::NoLocationHeader)?;
        current = current.join(&location)?;
        redirects += 1;
        info!("重定向 ({}/{}): {}", redirects, max_redirects, current);
      }
      status => return Err(FetchError::Status(status)),
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
      Mutex,
      atomic::{AtomicUsize, Ordering},
    },
  };

  use super::*;

  #[derive(Debug, Clone)]
  pub enum Route {
    Redirect(u16, Option<String>),
    Body(Vec<u8>, bool),
    Status(u16),
  }

  /// 按 URL 返回预设响应的传输层
  #[derive(Default)]
  pub struct FakeTransport {
    pub routes: Mutex<HashMap<String, Route>>,
    pub requests: AtomicUsize,
  }

  impl FakeTransport {
    pub fn route(self, url: &str, route: Route) -> Self {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), route);
      self
    }

    /// `hops` 次重定向之后返回 `body`
    pub fn chain(mut self, base: &str, hops: usize, body: &[u8]) -> Self {
      for i in 0..hops {
        self = self.route(
          &format!("{}/{}", base, i),
          Route::Redirect(302, Some(format!("{}/{}", base, i + 1))),
        );
      }
      self.route(
        &format!("{}/{}", base, hops),
        Route::Body(body.to_vec(), true),
      )
    }

    pub fn request_count(&self) -> usize {
      self.requests.load(Ordering::SeqCst)
    }
  }

  impl HttpTransport for FakeTransport {
    fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
      self.requests.fetch_add(1, Ordering::SeqCst);
      let route = self
        .routes
        .lock()
        .unwrap()
        .get(url.as_str())
        .cloned()
        .unwrap_or(Route::Status(404));

      let response = match route {
        Route::Redirect(status, location) => HttpResponse {
          status,
          location,
          content_length: None,
          body: Box::new(Cursor::new(Vec::new())),
        },
        Route::Body(bytes, with_length) => HttpResponse {
          status: 200,
          location: None,
          content_length: with_length.then_some(bytes.len() as u64),
          body: Box::new(Cursor::new(bytes)),
        },
        Route::Status(status) => HttpResponse {
          status,
          location: None,
          content_length: None,
          body: Box::new(Cursor::new(Vec::new())),
        },
      };
      Ok(response)
    }
  }
}
