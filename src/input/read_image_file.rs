// 该文件是 Sonu （叶诊） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{NchwFrame, Normalize},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Image file not found at {}", .0.display())]
  NotFound(PathBuf),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 读取并解码一张图像，转为三通道 RGB 后缩放、归一化
pub fn read_frame<const W: u32, const H: u32>(
  path: &Path,
  normalize: &Normalize,
) -> Result<NchwFrame<W, H>, ImageFileInputError> {
  let reader = ImageReader::open(path).map_err(|e| match e.kind() {
    std::io::ErrorKind::NotFound => ImageFileInputError::NotFound(path.to_path_buf()),
    _ => ImageFileInputError::IoError(e),
  })?;
  let image = reader.with_guessed_format()?.decode()?;
  debug!(
    "图像解码完成: {} ({}x{})",
    path.display(),
    image.width(),
    image.height()
  );

  Ok(NchwFrame::from_rgb(path, &image.to_rgb8(), normalize))
}

pub struct ImageFileInput<const W: u32, const H: u32> {
  path: Option<PathBuf>,
  normalize: Normalize,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for ImageFileInput<W, H> {
  const SCHEME: &'static str = "image";
}

impl<const W: u32, const H: u32> FromUrl for ImageFileInput<W, H> {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Ok(ImageFileInput::new(url_file_path(url)))
  }
}

impl<const W: u32, const H: u32> ImageFileInput<W, H> {
  /// 图像在迭代时才读取，读取失败作为迭代项返回
  pub fn new(path: impl Into<PathBuf>) -> Self {
    ImageFileInput {
      path: Some(path.into()),
      normalize: Normalize::default(),
    }
  }

  pub fn with_normalize(mut self, normalize: Normalize) -> Self {
    self.normalize = normalize;
    self
  }

  pub fn into_nchw(self) -> ImageFileInputNchw<W, H> {
    ImageFileInputNchw { inner: self }
  }
}

pub struct ImageFileInputNchw<const W: u32, const H: u32> {
  inner: ImageFileInput<W, H>,
}

impl<const W: u32, const H: u32> Iterator for ImageFileInputNchw<W, H> {
  type Item = Result<NchwFrame<W, H>, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.inner.path.take()?;
    Some(read_frame(&path, &self.inner.normalize))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::AsNchwFrame;
  use image::{Rgb, RgbImage};

  #[test]
  fn missing_file_is_not_found() {
    let mut input = ImageFileInput::<8, 8>::new("/no/such/leaf.jpg").into_nchw();
    let err = input.next().unwrap().unwrap_err();
    assert!(matches!(err, ImageFileInputError::NotFound(_)));
    assert!(err.to_string().contains("/no/such/leaf.jpg"));
    assert!(input.next().is_none());
  }

  #[test]
  fn png_is_read_and_resized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf.png");
    RgbImage::from_pixel(40, 20, Rgb([0, 200, 0]))
      .save(&path)
      .unwrap();

    let frame = ImageFileInput::<16, 16>::new(&path)
      .into_nchw()
      .next()
      .unwrap()
      .unwrap();
    assert_eq!(frame.as_nchw().len(), 3 * 16 * 16);
    assert_eq!(frame.source(), path.as_path());
  }

  #[test]
  fn undecodable_file_is_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"not an image at all").unwrap();

    let err = ImageFileInput::<8, 8>::new(&path)
      .into_nchw()
      .next()
      .unwrap()
      .unwrap_err();
    assert!(!matches!(err, ImageFileInputError::NotFound(_)));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::<8, 8>::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
