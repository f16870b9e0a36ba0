// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/bin/inpaint_image.rs - 图像修复工具
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
use clap::{Parser, ValueEnum};
use image::Rgba;
use url::Url;

use tracing::info;
use typer_vision::{
  FromUrl,
  hub::{HubConfig, ModelHub},
  input::MaskedImageInput,
  model::{ClassicalInpainter, InpaintRequest, Inpainter, MaskThreshold, NeuralInpaintConfig, NeuralInpainter},
  output::SaveImageFileOutput,
  store::{LAMA_512, LITE_INPAINT_256, ModelCatalog},
  task::{BackgroundTask, OneShotTask, Task},
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
  Neural,
  Classical,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeuralModel {
  /// LaMa，512x512
  Lama,
  /// 轻量模型，256x256
  Lite,
}

/// 按掩码修复图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像；不给 --mask 时用 image:///page.png?mask=/page-mask.png
  #[arg(long, value_name = "SOURCE")]
  pub image: Url,
  /// 掩码图像，与输入同尺寸
  #[arg(long, value_name = "MASK")]
  pub mask: Option<Url>,
  /// 输出图像
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  #[arg(long, value_enum, default_value_t = Backend::Neural)]
  pub backend: Backend,
  #[arg(long, value_enum, default_value_t = NeuralModel::Lama)]
  pub model: NeuralModel,
  /// 只把掩码附近的区域送入模型
  #[arg(long)]
  pub crop_to_mask: bool,
  /// 只替换掩码内的像素
  #[arg(long)]
  pub composite: bool,
  /// 掩码不透明时，红色通道大于该值的像素视为待填充
  #[arg(long, value_name = "LEVEL")]
  pub mask_red: Option<u8>,
  /// 模型缺失时先下载
  #[arg(long)]
  pub download: bool,
  /// 模型根目录
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub models: PathBuf,
  /// 覆盖内置目录的 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub catalog: Option<PathBuf>,
}

impl Args {
  fn threshold(&self) -> MaskThreshold {
    self.mask_red.map(MaskThreshold::Red).unwrap_or_default()
  }

  fn neural_model(&self) -> (&'static str, NeuralInpaintConfig) {
    let (id, config) = match self.model {
      NeuralModel::Lama => (LAMA_512, NeuralInpaintConfig::lama()),
      NeuralModel::Lite => (LITE_INPAINT_256, NeuralInpaintConfig::lightweight()),
    };
    (
      id,
      config
        .with_crop_to_mask(self.crop_to_mask)
        .with_composite(self.composite),
    )
  }
}

/// 神经后端只看 alpha，把阈值选中的像素改写成 alpha 掩码
fn alpha_mask(mut request: InpaintRequest, threshold: MaskThreshold) -> InpaintRequest {
  for pixel in request.mask.pixels_mut() {
    *pixel = if threshold.is_fill(pixel) {
      Rgba([255, 255, 255, 255])
    } else {
      Rgba([0, 0, 0, 0])
    };
  }
  request
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入图像: {}", args.image);
  info!("输出路径: {}", args.output);

  let input = match &args.mask {
    Some(mask) => MaskedImageInput::from_urls(&args.image, mask)?,
    None => MaskedImageInput::from_url(&args.image)?,
  };
  let output = SaveImageFileOutput::from_url(&args.output)?;

  let model = match args.backend {
    Backend::Classical => Inpainter::Classical(ClassicalInpainter::with_threshold(args.threshold())),
    Backend::Neural => {
      let mut catalog = ModelCatalog::builtin();
      if let Some(path) = &args.catalog {
        catalog = catalog.with_overrides(path)?;
      }
      let hub = Arc::new(ModelHub::new(HubConfig::with_root(&args.models), catalog)?);
      let (model_id, config) = args.neural_model();

      if args.download && !hub.is_model_available(model_id) {
        info!("模型 {} 不存在，开始下载", model_id);
        BackgroundTask::download(Arc::clone(&hub), model_id).wait()??;
      }
      let inpainter = NeuralInpainter::new(hub, model_id, config)?;
      info!(
        "神经修复模型: {} ({}x{})",
        inpainter.model_id(),
        inpainter.config().trained_size,
        inpainter.config().trained_size
      );
      Inpainter::Neural(inpainter)
    }
  };
  info!("修复后端: {}", model.name());

  let threshold = args.threshold();
  let neural = matches!(model, Inpainter::Neural(_));
  let input = input.map(move |request| {
    if neural {
      alpha_mask(request, threshold)
    } else {
      request
    }
  });
  OneShotTask.run_task(input, model, output)?;

  Ok(())
}
