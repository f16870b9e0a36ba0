// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/task.rs - 任务
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
  sync::{
    Arc,
    mpsc::{self, Receiver},
  },
  thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::{error, info};

use crate::{hub::ModelHub, model::Model, output::Render, store::FetchError};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 取一个输入，推理一次，渲染一次
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let item = input.next().ok_or_else(|| anyhow::anyhow!("没有输入"))?;
    info!("输入读取成功，开始推理...");
    let now = std::time::Instant::now();
    let result = model.infer(&item)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&item, &result)?;
    info!("输出完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent<T> {
  Progress(f32),
  Finished(T),
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("后台任务异常退出")]
  WorkerLost,
}

/// 后台任务句柄。任务一旦开始就会运行到结束，没有取消。
pub struct TaskHandle<T> {
  events: Receiver<TaskEvent<T>>,
  worker: JoinHandle<()>,
}

impl<T> TaskHandle<T> {
  /// 在当前线程上处理进度事件，直到任务结束
  pub fn wait_with(self, mut on_progress: impl FnMut(f32)) -> Result<T, TaskError> {
    let Self { events, worker } = self;
    for event in events.iter() {
      match event {
        TaskEvent::Progress(p) => on_progress(p),
        TaskEvent::Finished(value) => {
          let _ = worker.join();
          return Ok(value);
        }
      }
    }
    error!("后台任务未返回结果");
    let _ = worker.join();
    Err(TaskError::WorkerLost)
  }

  pub fn wait(self) -> Result<T, TaskError> {
    self.wait_with(|_| {})
  }
}

pub struct BackgroundTask;

impl BackgroundTask {
  pub fn download(hub: Arc<ModelHub>, model_id: &str) -> TaskHandle<Result<(), FetchError>> {
    let (tx, events) = mpsc::channel();
    let model_id = model_id.to_string();

    let worker = thread::spawn(move || {
      info!("后台下载模型: {}", model_id);
      let progress = tx.clone();
      let result = hub.download_model(&model_id, &mut |p| {
        let _ = progress.send(TaskEvent::Progress(p));
      });
      let _ = tx.send(TaskEvent::Finished(result));
    });

    TaskHandle { events, worker }
  }

  pub fn infer<M>(model: Arc<M>, input: M::Input) -> TaskHandle<Result<M::Output, M::Error>>
  where
    M: Model + Send + Sync + 'static,
    M::Input: Send + 'static,
    M::Output: Send + 'static,
    M::Error: Send + 'static,
  {
    let (tx, events) = mpsc::channel();

    let worker = thread::spawn(move || {
      let now = std::time::Instant::now();
      let result = model.infer(&input);
      info!("后台推理结束，耗时: {:.2?}", now.elapsed());
      let _ = tx.send(TaskEvent::Finished(result));
    });

    TaskHandle { events, worker }
  }
}
