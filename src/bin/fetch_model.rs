// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/bin/fetch_model.rs - 模型下载工具
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use typer_vision::{
  hub::{HubConfig, ModelHub},
  store::ModelCatalog,
  task::BackgroundTask,
};

/// 查看或下载模型文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型根目录，文件保存在其下的 onnx/
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub models: PathBuf,
  /// 覆盖内置目录的 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub catalog: Option<PathBuf>,
  /// 指定下载地址，只能配合一个模型使用
  #[arg(long, value_name = "URL")]
  pub url: Option<Url>,
  /// 要下载的模型 ID，留空时列出全部模型状态
  #[arg(value_name = "MODEL")]
  pub model: Vec<String>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mut catalog = ModelCatalog::builtin();
  if let Some(path) = &args.catalog {
    catalog = catalog.with_overrides(path)?;
  }
  let hub = Arc::new(ModelHub::new(HubConfig::with_root(&args.models), catalog)?);

  if args.model.is_empty() {
    for descriptor in hub.store().catalog().models() {
      let line = serde_json::json!({
        "id": descriptor.id,
        "file": descriptor.file_name,
        "url": descriptor.url,
        "status": hub.status(&descriptor.id),
      });
      println!("{}", line);
    }
    return Ok(());
  }

  if args.url.is_some() && args.model.len() != 1 {
    anyhow::bail!("--url 只能配合一个模型使用");
  }

  for model_id in &args.model {
    info!("开始下载模型: {}", model_id);
    let now = std::time::Instant::now();
    let mut reported = 0;
    let mut on_progress = |p: f32| {
      let percent = (p * 100.0) as u32;
      if percent >= reported + 10 || (percent == 100 && reported != 100) {
        reported = percent;
        info!("{}: {}%", model_id, percent);
      }
    };

    match &args.url {
      Some(url) => hub.download_model_from(model_id, url, &mut on_progress)?,
      None => BackgroundTask::download(Arc::clone(&hub), model_id).wait_with(on_progress)??,
    }
    info!("模型 {} 下载完成，耗时: {:.2?}", model_id, now.elapsed());
  }

  Ok(())
}
