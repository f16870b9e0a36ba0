// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/model/tiling.rs - 滑动窗口切块
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

use image::{RgbaImage, imageops};

use crate::frame::RasterBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
  pub x: u32,
  pub y: u32,
}

/// 一维上的切块起点。
///
/// 以 `stride` 为步长前进；长度不小于 `tile` 时，越界的起点被拉回到
/// `length - tile`，保证每块都完整落在图像内；长度小于 `tile` 时只有起点 0。
pub fn tile_origins(length: u32, tile: u32, stride: u32) -> Vec<u32> {
  let mut origins = Vec::new();
  let mut cursor = 0u32;
  loop {
    let origin = if length >= tile {
      cursor.min(length - tile)
    } else {
      0
    };
    origins.push(origin);

    if origin + tile >= length {
      break;
    }
    cursor += stride;
  }
  origins
}

/// 按行优先顺序生成所有切块
pub fn tile_grid(width: u32, height: u32, tile: u32, stride: u32) -> Vec<Tile> {
  let xs = tile_origins(width, tile, stride);
  let ys = tile_origins(height, tile, stride);
  ys.iter()
    .flat_map(|&y| xs.iter().map(move |&x| Tile { x, y }))
    .collect()
}

/// 裁出 `size x size` 的切块；源区域不足时绘制到左上角，其余保持透明黑。
pub fn crop_tile(image: &RasterBuffer, tile: Tile, size: u32) -> RgbaImage {
  let (width, height) = image.dimensions();
  let crop_w = size.min(width.saturating_sub(tile.x));
  let crop_h = size.min(height.saturating_sub(tile.y));

  if crop_w == size && crop_h == size {
    return imageops::crop_imm(image, tile.x, tile.y, size, size).to_image();
  }

  let mut canvas = RgbaImage::new(size, size);
  let region = imageops::crop_imm(image, tile.x, tile.y, crop_w, crop_h).to_image();
  imageops::replace(&mut canvas, &region, 0, 0);
  canvas
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  #[test]
  fn origins_for_1280_by_768() {
    assert_eq!(tile_origins(1280, 640, 512), vec![0, 512, 640]);
    assert_eq!(tile_origins(768, 640, 512), vec![0, 128]);
  }

  #[test]
  fn small_dimension_uses_single_origin() {
    assert_eq!(tile_origins(300, 640, 512), vec![0]);
    assert_eq!(tile_origins(640, 640, 512), vec![0]);
  }

  #[test]
  fn tiles_cover_and_stay_in_bounds() {
    for length in [1u32, 200, 639, 640, 641, 1000, 1152, 1153, 2048, 4097] {
      let origins = tile_origins(length, 640, 512);
      assert_eq!(origins[0], 0);
      let last = *origins.last().unwrap();
      assert!(last + 640 >= length);
      for pair in origins.windows(2) {
        // 相邻切块之间没有空隙
        assert!(pair[1] <= pair[0] + 640);
        assert!(pair[1] > pair[0]);
      }
      if length >= 640 {
        assert!(origins.iter().all(|o| o + 640 <= length));
      }
    }
  }

  #[test]
  fn grid_is_row_major() {
    let grid = tile_grid(1280, 768, 640, 512);
    assert_eq!(grid.len(), 6);
    assert_eq!(grid[0], Tile { x: 0, y: 0 });
    assert_eq!(grid[2], Tile { x: 640, y: 0 });
    assert_eq!(grid[3], Tile { x: 0, y: 128 });
  }

  #[test]
  fn crop_pads_small_images() {
    let image = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
    let tile = crop_tile(&image, Tile { x: 0, y: 0 }, 4);
    assert_eq!(tile.dimensions(), (4, 4));
    assert_eq!(tile.get_pixel(2, 1), &Rgba([10, 20, 30, 255]));
    assert_eq!(tile.get_pixel(3, 3), &Rgba([0, 0, 0, 0]));
  }

  #[test]
  fn crop_reads_offset_region() {
    let image = RgbaImage::from_fn(8, 8, |x, y| Rgba([x as u8, y as u8, 0, 255]));
    let tile = crop_tile(&image, Tile { x: 4, y: 2 }, 4);
    assert_eq!(tile.get_pixel(0, 0), &Rgba([4, 2, 0, 255]));
    assert_eq!(tile.get_pixel(3, 3), &Rgba([7, 5, 0, 255]));
  }
}
