// 该文件是 Sonu （叶诊） 项目的一部分。
// src/frame.rs - 归一化 NCHW 帧定义
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

use std::path::{Path, PathBuf};

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;

use crate::input::AsNchwFrame;

pub const RGB_CHANNELS: usize = 3;

/// ImageNet 逐通道均值
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 逐通道标准差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 逐通道归一化参数，`(x / 255 - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
  pub mean: [f32; 3],
  pub std: [f32; 3],
}

impl Default for Normalize {
  fn default() -> Self {
    Normalize {
      mean: IMAGENET_MEAN,
      std: IMAGENET_STD,
    }
  }
}

impl Normalize {
  #[inline]
  pub fn apply(&self, channel: usize, value: u8) -> f32 {
    (value as f32 / 255.0 - self.mean[channel]) / self.std[channel]
  }
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 单张 RGB 图像，已缩放到 `W x H` 并归一化，按 NCHW（N = 1）排布
#[derive(Debug, Clone)]
pub struct NchwFrame<const W: u32, const H: u32> {
  source: PathBuf,
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> NchwFrame<W, H> {
  pub const LEN: usize = RGB_CHANNELS * (W as usize) * (H as usize);

  pub fn from_vec(source: impl Into<PathBuf>, data: Vec<f32>) -> Result<Self, FrameError> {
    if data.len() != Self::LEN {
      return Err(FrameError::LengthMismatch {
        expected: Self::LEN,
        actual: data.len(),
      });
    }

    Ok(Self {
      source: source.into(),
      data: data.into_boxed_slice(),
    })
  }

  /// 双线性缩放到目标尺寸后归一化
  pub fn from_rgb(source: impl Into<PathBuf>, image: &RgbImage, normalize: &Normalize) -> Self {
    let resized;
    let image = if image.dimensions() == (W, H) {
      image
    } else {
      resized = imageops::resize(image, W, H, FilterType::Triangle);
      &resized
    };

    let plane = (W as usize) * (H as usize);
    let mut data = vec![0f32; Self::LEN];
    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = (y as usize) * (W as usize) + (x as usize);
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = normalize.apply(c, pixel[c]);
      }
    }

    Self {
      source: source.into(),
      data: data.into_boxed_slice(),
    }
  }

  pub fn source(&self) -> &Path {
    &self.source
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }
}

impl<const W: u32, const H: u32> AsNchwFrame<W, H> for NchwFrame<W, H> {
  fn as_nchw(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn solid_color_is_normalized_per_channel() {
    let image = RgbImage::from_pixel(8, 8, Rgb([255, 128, 0]));
    let frame = NchwFrame::<4, 4>::from_rgb("solid.png", &image, &Normalize::default());
    let data = frame.as_nchw();
    assert_eq!(data.len(), 3 * 4 * 4);

    let expect = |c: usize, v: f32| (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
    let plane = 16;
    for i in 0..plane {
      assert!((data[i] - expect(0, 1.0)).abs() < 1e-4);
      assert!((data[plane + i] - expect(1, 128.0 / 255.0)).abs() < 1e-4);
      assert!((data[2 * plane + i] - expect(2, 0.0)).abs() < 1e-4);
    }
  }

  #[test]
  fn layout_is_channel_major() {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(1, 0, Rgb([10, 20, 30]));
    let identity = Normalize {
      mean: [0.0; 3],
      std: [1.0; 3],
    };
    let frame = NchwFrame::<2, 2>::from_rgb("tiny.png", &image, &identity);
    let data = frame.as_nchw();
    assert!((data[1] - 10.0 / 255.0).abs() < 1e-6);
    assert!((data[4 + 1] - 20.0 / 255.0).abs() < 1e-6);
    assert!((data[8 + 1] - 30.0 / 255.0).abs() < 1e-6);
    assert_eq!(frame.shape(), [1, 3, 2, 2]);
  }

  #[test]
  fn wrong_length_is_rejected() {
    let err = NchwFrame::<2, 2>::from_vec("bad", vec![0.0; 5]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 5
      }
    ));
  }
}
