// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/bin/detect_bubbles.rs - 气泡检测工具
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

use tracing::{info, warn};
use typer_vision::{
  FromUrl,
  hub::{HubConfig, ModelHub},
  input::ImageFileInput,
  model::{BubbleDetector, DetectorConfig, Model},
  output::{Render, SaveImageFileOutput},
  store::{COMIC_DETECTOR, ModelCatalog},
};

/// 分块检测图像中的对话气泡，结果以 JSON 输出到标准输出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像，例如 image:///path/page.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 画出检测框的输出图像，加 ?record 同时保存 JSON
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 模型根目录
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub models: PathBuf,
  /// 覆盖内置目录的 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub catalog: Option<PathBuf>,
  /// 检测模型 ID
  #[arg(long, default_value = COMIC_DETECTOR, value_name = "MODEL")]
  pub model: String,
  /// 检测参数 JSON 文件，未给出的字段取默认值
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 使用漫画检测模型的后处理参数
  #[arg(long)]
  pub comic: bool,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,
  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,
}

impl Args {
  fn detector_config(&self) -> Result<DetectorConfig> {
    let mut config = match &self.config {
      Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
      None if self.comic => DetectorConfig::comic(),
      None => DetectorConfig::default(),
    };
    if let Some(confidence) = self.confidence {
      config.confidence_threshold = confidence;
    }
    if let Some(iou) = self.iou_threshold {
      config.iou_threshold = iou;
    }
    Ok(config)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  let config = args.detector_config()?;
  info!("检测参数: {:?}", config);

  let mut catalog = ModelCatalog::builtin();
  if let Some(path) = &args.catalog {
    catalog = catalog.with_overrides(path)?;
  }
  let hub = Arc::new(ModelHub::new(HubConfig::with_root(&args.models), catalog)?);
  if !hub.is_model_available(&args.model) {
    warn!("模型 {} 尚未下载，请先运行 fetch-model", args.model);
  }

  let detector = BubbleDetector::with_model(Arc::clone(&hub), &args.model, config)?;
  info!("检测模型: {}", detector.model_id());
  let output = args
    .output
    .as_ref()
    .map(SaveImageFileOutput::from_url)
    .transpose()?;
  if let Some(output) = &output {
    info!("检测框输出到: {}", output.path().display());
  }

  for frame in ImageFileInput::from_url(&args.input)? {
    let now = std::time::Instant::now();
    let result = detector.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(output) = &output {
      output.render_result(&frame, &result)?;
    }
  }

  Ok(())
}
