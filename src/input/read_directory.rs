// 该文件是 Sonu （叶诊） 项目的一部分。
// src/input/read_directory.rs - 目录批量图像输入
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

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{NchwFrame, Normalize},
  input::read_image_file::{ImageFileInputError, read_frame},
  url_file_path,
};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("目录不存在: {}", .0.display())]
  NotFound(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

/// 目录下所有图像文件，按文件名排序逐张读取
pub struct DirectoryInput<const W: u32, const H: u32> {
  entries: Vec<PathBuf>,
  normalize: Normalize,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for DirectoryInput<W, H> {
  const SCHEME: &'static str = "folder";
}

impl<const W: u32, const H: u32> FromUrl for DirectoryInput<W, H> {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryInputError::SchemeMismatch);
    }
    DirectoryInput::open(url_file_path(url))
  }
}

impl<const W: u32, const H: u32> DirectoryInput<W, H> {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, DirectoryInputError> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
      return Err(DirectoryInputError::NotFound(directory.to_path_buf()));
    }

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && is_image_file(&path) {
        entries.push(path);
      }
    }
    entries.sort();

    if entries.is_empty() {
      warn!("目录中没有图像文件: {}", directory.display());
    } else {
      info!("目录 {} 中共有 {} 张图像", directory.display(), entries.len());
    }

    Ok(DirectoryInput {
      entries,
      normalize: Normalize::default(),
    })
  }

  pub fn with_normalize(mut self, normalize: Normalize) -> Self {
    self.normalize = normalize;
    self
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn into_nchw(self) -> DirectoryInputNchw<W, H> {
    DirectoryInputNchw {
      entries: self.entries.into_iter(),
      normalize: self.normalize,
    }
  }
}

pub struct DirectoryInputNchw<const W: u32, const H: u32> {
  entries: std::vec::IntoIter<PathBuf>,
  normalize: Normalize,
}

impl<const W: u32, const H: u32> Iterator for DirectoryInputNchw<W, H> {
  type Item = Result<NchwFrame<W, H>, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.entries.next()?;
    Some(read_frame(&path, &self.normalize))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn only_images_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.PNG", "c.jpg"] {
      RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
        .save_with_format(dir.path().join(name), image::ImageFormat::Png)
        .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

    let input = DirectoryInput::<8, 8>::open(dir.path()).unwrap();
    assert_eq!(input.len(), 3);

    let sources: Vec<_> = input
      .into_nchw()
      .map(|r| r.unwrap().source().file_name().unwrap().to_owned())
      .collect();
    assert_eq!(sources, ["a.PNG", "b.png", "c.jpg"]);
  }

  #[test]
  fn missing_directory() {
    let err = DirectoryInput::<8, 8>::open("/no/such/dir").err().unwrap();
    assert!(matches!(err, DirectoryInputError::NotFound(_)));
  }
}
