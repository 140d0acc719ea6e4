// 该文件是 Sonu （叶诊） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::{FromUrl, FromUrlWithScheme, task::Outcome};
use thiserror::Error;
use url::Url;

pub trait Render<Output>: Sized {
  type Error;
  fn render_result(&self, result: &Output) -> Result<(), Self::Error>;
}

mod console;
pub use self::console::{ConsoleOutput, ConsoleOutputError};

mod directory_record;
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, PredictionRecord};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("控制台输出错误: {0}")]
  ConsoleOutputError(#[from] ConsoleOutputError),
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  ConsoleOutput(ConsoleOutput),
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let scheme = url.scheme();
    if scheme == ConsoleOutput::SCHEME {
      let output = ConsoleOutput::from_url(url)?;
      Ok(OutputWrapper::ConsoleOutput(output))
    } else if scheme == DirectoryRecordOutput::SCHEME {
      let output = DirectoryRecordOutput::from_url(url)?;
      Ok(OutputWrapper::DirectoryRecordOutput(output))
    } else {
      Err(OutputError::SchemeMismatch(scheme.to_string()))
    }
  }
}

impl Render<Outcome> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, result: &Outcome) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::ConsoleOutput(output) => output.render_result(result).map_err(OutputError::from),
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.render_result(result).map_err(OutputError::from)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dispatch_on_scheme() {
    let console = OutputWrapper::from_url(&Url::parse("console:").unwrap()).unwrap();
    assert!(matches!(console, OutputWrapper::ConsoleOutput(_)));

    let folder = OutputWrapper::from_url(&Url::parse("folder:///tmp/sonu").unwrap()).unwrap();
    assert!(matches!(folder, OutputWrapper::DirectoryRecordOutput(_)));

    let err = OutputWrapper::from_url(&Url::parse("rtsp://camera/stream").unwrap())
      .err()
      .unwrap();
    assert!(matches!(err, OutputError::SchemeMismatch(s) if s == "rtsp"));
  }
}
