// 该文件是 Sonu （叶诊） 项目的一部分。
// src/output/console.rs - 控制台输出
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

use std::io::Write;

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, output::Render, task::Outcome};

const BANNER_WIDTH: usize = 30;

#[derive(Error, Debug)]
pub enum ConsoleOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 top 无效: {0}")]
  InvalidTop(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// `console:` 或 `console:?top=3`
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput {
  top: usize,
}

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch);
    }

    let top = match url.query_pairs().find(|(k, _)| k == "top") {
      Some((_, v)) => v
        .parse::<usize>()
        .map_err(|_| ConsoleOutputError::InvalidTop(v.into_owned()))?,
      None => 0,
    };

    Ok(ConsoleOutput { top })
  }
}

impl ConsoleOutput {
  pub fn with_top(mut self, top: usize) -> Self {
    self.top = top;
    self
  }

  pub fn write_outcome<Wr: Write>(&self, mut writer: Wr, outcome: &Outcome) -> std::io::Result<()> {
    let classification = match &outcome.result {
      Ok(classification) => classification,
      Err(_) => {
        writeln!(writer)?;
        return writeln!(writer, "{}", outcome.label());
      }
    };

    let banner = "=".repeat(BANNER_WIDTH);
    writeln!(writer)?;
    writeln!(writer, "{banner}")?;
    writeln!(writer, "Prediction: {}", classification.label)?;
    writeln!(
      writer,
      "Confidence: {:.2}%",
      classification.confidence * 100.0
    )?;
    if self.top > 1 {
      for (rank, (index, probability)) in classification.top_k(self.top).into_iter().enumerate() {
        writeln!(
          writer,
          "  {}. {} {:.2}%",
          rank + 1,
          classification.label_of(index).unwrap_or("?"),
          probability * 100.0
        )?;
      }
    }
    writeln!(writer, "{banner}")
  }
}

impl Render<Outcome> for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn render_result(&self, result: &Outcome) -> Result<(), Self::Error> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    self.write_outcome(&mut lock, result)?;
    lock.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use crate::{
    model::{Classification, Labels},
    task::PredictError,
  };

  fn render(output: ConsoleOutput, outcome: &Outcome) -> String {
    let mut buffer = Vec::new();
    output.write_outcome(&mut buffer, outcome).unwrap();
    String::from_utf8(buffer).unwrap()
  }

  fn outcome() -> Outcome {
    let labels = Labels::new(vec![
      "Cassava_healthy".to_string(),
      "Cassava_mosaic".to_string(),
      "Cassava_green mite".to_string(),
    ]);
    let classification = Classification::from_probabilities(vec![0.1, 0.8765, 0.0235], &labels).unwrap();
    Outcome::predicted("leaf.jpg", classification)
  }

  #[test]
  fn banner_for_prediction() {
    let text = render(ConsoleOutput::default(), &outcome());
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[1], "=".repeat(30));
    assert_eq!(lines[2], "Prediction: Cassava_mosaic");
    assert_eq!(lines[3], "Confidence: 87.65%");
    assert_eq!(lines[4], "=".repeat(30));
  }

  #[test]
  fn top_k_lines() {
    let url = url::Url::parse("console:?top=2").unwrap();
    let text = render(ConsoleOutput::from_url(&url).unwrap(), &outcome());
    assert!(text.contains("  1. Cassava_mosaic 87.65%"));
    assert!(text.contains("  2. Cassava_healthy 10.00%"));
    assert!(!text.contains("Cassava_green mite"));
  }

  #[test]
  fn failure_prints_label_only() {
    let failed = Outcome::failed(PredictError::ImageNotFound(PathBuf::from("gone.jpg")));
    let text = render(ConsoleOutput::default(), &failed);
    assert_eq!(text, "\nError: Image file not found at gone.jpg\n");
  }

  #[test]
  fn bad_top_is_rejected() {
    let url = url::Url::parse("console:?top=many").unwrap();
    assert!(matches!(
      ConsoleOutput::from_url(&url),
      Err(ConsoleOutputError::InvalidTop(_))
    ));
  }
}
