// 该文件是 Typer Vision （字绘） 项目的一部分。
// src/model/inpaint/telea.rs - 快速行进法图像修复
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

//! Telea (2004) 快速行进修复：从边界向内按距离顺序逐像素填充，
//! 每个像素取半径内已知像素的加权平均，权重由方向、距离和等距线差共同决定。

use std::{cmp::Ordering, collections::BinaryHeap};

use image::{GrayImage, Rgb, RgbImage};

const INF: f32 = 1.0e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
  Known,
  Band,
  Inside,
}

#[derive(Debug, Clone, Copy)]
struct Node {
  t: f32,
  x: u32,
  y: u32,
}

impl PartialEq for Node {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Node {}

impl PartialOrd for Node {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Node {
  // BinaryHeap 是大顶堆，反转后距离最小的先出
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .t
      .total_cmp(&self.t)
      .then_with(|| (other.y, other.x).cmp(&(self.y, self.x)))
  }
}

struct Field {
  width: u32,
  height: u32,
  flags: Vec<Flag>,
  t: Vec<f32>,
}

impl Field {
  fn index(&self, x: u32, y: u32) -> usize {
    (y * self.width + x) as usize
  }

  /// 越界视为尚未到达的内部点
  fn get(&self, x: i64, y: i64) -> (Flag, f32) {
    if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
      return (Flag::Inside, INF);
    }
    let i = self.index(x as u32, y as u32);
    (self.flags[i], self.t[i])
  }

  fn solve(&self, (x1, y1): (i64, i64), (x2, y2): (i64, i64)) -> f32 {
    let (f1, a11) = self.get(x1, y1);
    let (f2, a22) = self.get(x2, y2);
    let m12 = a11.min(a22);

    match (f1 != Flag::Inside, f2 != Flag::Inside) {
      (true, true) => {
        let diff = a11 - a22;
        if diff.abs() >= 1.0 {
          1.0 + m12
        } else {
          (a11 + a22 + (2.0 - diff * diff).sqrt()) * 0.5
        }
      }
      (true, false) => 1.0 + a11,
      (false, true) => 1.0 + a22,
      (false, false) => 1.0 + m12,
    }
  }

  fn gradient_axis(&self, center: f32, forward: (i64, i64), backward: (i64, i64)) -> f32 {
    let (ff, tf) = self.get(forward.0, forward.1);
    let (fb, tb) = self.get(backward.0, backward.1);
    match (ff != Flag::Inside, fb != Flag::Inside) {
      (true, true) => (tf - tb) * 0.5,
      (true, false) => tf - center,
      (false, true) => center - tb,
      (false, false) => 0.0,
    }
  }

  fn gradient(&self, x: i64, y: i64, center: f32) -> (f32, f32) {
    (
      self.gradient_axis(center, (x + 1, y), (x - 1, y)),
      self.gradient_axis(center, (x, y + 1), (x, y - 1)),
    )
  }
}

/// 修复 `mask` 非零的像素。没有任何已知像素可参考的区域保持原值。
pub fn inpaint(image: &RgbImage, mask: &GrayImage, radius: f32) -> RgbImage {
  let (width, height) = image.dimensions();
  let mut output = image.clone();
  let mut field = Field {
    width,
    height,
    flags: vec![Flag::Known; (width * height) as usize],
    t: vec![0.0; (width * height) as usize],
  };
  let mut heap = BinaryHeap::new();

  for (x, y, pixel) in mask.enumerate_pixels() {
    if pixel[0] > 0 {
      let i = field.index(x, y);
      field.flags[i] = Flag::Inside;
      field.t[i] = INF;
    }
  }

  // 初始窄带：与待修复区域四邻接的已知像素
  for y in 0..height {
    for x in 0..width {
      let i = field.index(x, y);
      if field.flags[i] != Flag::Known {
        continue;
      }
      let touches = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)]
        .iter()
        .any(|(dx, dy)| {
          let (nx, ny) = (x as i64 + dx, y as i64 + dy);
          nx >= 0 && ny >= 0 && nx < width as i64 && ny < height as i64 && field.get(nx, ny).0 == Flag::Inside
        });
      if touches {
        field.flags[i] = Flag::Band;
        heap.push(Node { t: 0.0, x, y });
      }
    }
  }

  let range = radius.round().max(1.0) as i64;

  while let Some(Node { x, y, .. }) = heap.pop() {
    let i = field.index(x, y);
    field.flags[i] = Flag::Known;

    for (dx, dy) in [(-1i64, 0i64), (0, -1), (1, 0), (0, 1)] {
      let (k, l) = (x as i64 + dx, y as i64 + dy);
      if k < 0 || l < 0 || k >= width as i64 || l >= height as i64 {
        continue;
      }
      if field.get(k, l).0 != Flag::Inside {
        continue;
      }

      let dist = field
        .solve((k, l - 1), (k - 1, l))
        .min(field.solve((k, l + 1), (k - 1, l)))
        .min(field.solve((k, l - 1), (k + 1, l)))
        .min(field.solve((k, l + 1), (k + 1, l)));
      let ni = field.index(k as u32, l as u32);
      field.t[ni] = dist;

      let value = estimate(&field, &output, k, l, dist, range);
      output.put_pixel(k as u32, l as u32, value);

      field.flags[ni] = Flag::Band;
      heap.push(Node {
        t: dist,
        x: k as u32,
        y: l as u32,
      });
    }
  }

  output
}

fn estimate(field: &Field, image: &RgbImage, x: i64, y: i64, t: f32, range: i64) -> Rgb<u8> {
  let (gx, gy) = field.gradient(x, y, t);
  let mut sum = [0.0f32; 3];
  let mut weights = 0.0f32;

  for ny in (y - range)..=(y + range) {
    for nx in (x - range)..=(x + range) {
      let (flag, nt) = field.get(nx, ny);
      if flag == Flag::Inside {
        continue;
      }
      let (rx, ry) = ((x - nx) as f32, (y - ny) as f32);
      let len2 = rx * rx + ry * ry;
      if len2 == 0.0 || len2 > (range * range) as f32 {
        continue;
      }

      let dst = 1.0 / (len2 * len2.sqrt());
      let lev = 1.0 / (1.0 + (nt - t).abs());
      let mut dir = rx * gx + ry * gy;
      if dir.abs() <= 0.01 {
        dir = 1.0e-6;
      }
      let w = (dst * lev * dir).abs();

      let pixel = image.get_pixel(nx as u32, ny as u32);
      for (c, acc) in sum.iter_mut().enumerate() {
        *acc += w * pixel[c] as f32;
      }
      weights += w;
    }
  }

  if weights <= 0.0 {
    return *image.get_pixel(x as u32, y as u32);
  }
  Rgb(sum.map(|v| (v / weights).round().clamp(0.0, 255.0) as u8))
}

#[cfg(test)]
mod tests {
  use image::Luma;

  use super::*;

  fn square_mask(width: u32, height: u32, x0: u32, y0: u32, size: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
      if x >= x0 && x < x0 + size && y >= y0 && y < y0 + size {
        Luma([255])
      } else {
        Luma([0])
      }
    })
  }

  #[test]
  fn fills_hole_in_flat_region() {
    let mut image = RgbImage::from_pixel(20, 20, Rgb([90, 140, 30]));
    for y in 8..12 {
      for x in 8..12 {
        image.put_pixel(x, y, Rgb([255, 0, 255]));
      }
    }
    let mask = square_mask(20, 20, 8, 8, 4);
    let output = inpaint(&image, &mask, 5.0);
    for pixel in output.pixels() {
      assert_eq!(pixel, &Rgb([90, 140, 30]));
    }
  }

  #[test]
  fn keeps_unmasked_pixels() {
    let image = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 7]));
    let mask = square_mask(16, 16, 5, 5, 3);
    let output = inpaint(&image, &mask, 5.0);
    for (x, y, pixel) in image.enumerate_pixels() {
      if mask.get_pixel(x, y)[0] == 0 {
        assert_eq!(output.get_pixel(x, y), pixel);
      }
    }
  }

  #[test]
  fn fill_stays_within_neighbour_range() {
    // 左黑右白，洞跨过分界线
    let image = RgbImage::from_fn(24, 12, |x, _| if x < 12 { Rgb([0, 0, 0]) } else { Rgb([200, 200, 200]) });
    let mask = square_mask(24, 12, 9, 3, 6);
    let output = inpaint(&image, &mask, 5.0);
    assert!(output.get_pixel(9, 6)[0] < 100);
    assert!(output.get_pixel(14, 6)[0] > 100);
  }

  #[test]
  fn fully_masked_image_is_left_alone() {
    let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
    let mask = GrayImage::from_pixel(4, 4, Luma([255]));
    assert_eq!(inpaint(&image, &mask, 5.0), image);
  }
}
