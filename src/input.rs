// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/input.rs - 输入
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

use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RasterBuffer, model::InpaintRequest};

mod read_image_file;

pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 图像与同尺寸掩码。URL 形如 `image:///page.png?mask=/page-mask.png`
pub struct MaskedImageInput {
  request: Option<InpaintRequest>,
}

impl FromUrlWithScheme for MaskedImageInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for MaskedImageInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    read_image_file::check_scheme(url)?;
    let mask = url
      .query_pairs()
      .find(|(k, _)| k == "mask")
      .map(|(_, v)| v.into_owned())
      .ok_or(ImageFileInputError::MissingParameter("mask"))?;

    let image = ImageFileInput::open(url.path())?.into_image();
    let mask = ImageFileInput::open(mask)?.into_image();
    Ok(Self::from_parts(image, mask))
  }
}

impl MaskedImageInput {
  pub fn from_urls(image: &Url, mask: &Url) -> Result<Self, ImageFileInputError> {
    let image = ImageFileInput::from_url(image)?.into_image();
    let mask = ImageFileInput::from_url(mask)?.into_image();
    Ok(Self::from_parts(image, mask))
  }

  fn from_parts(image: Option<RasterBuffer>, mask: Option<RasterBuffer>) -> Self {
    let request = image
      .zip(mask)
      .map(|(image, mask)| InpaintRequest { image, mask });
    Self { request }
  }
}

impl Iterator for MaskedImageInput {
  type Item = InpaintRequest;

  fn next(&mut self) -> Option<Self::Item> {
    self.request.take()
  }
}
