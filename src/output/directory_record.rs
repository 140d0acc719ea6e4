// 该文件是 Sonu （叶诊） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::ConfidenceLevel,
  output::Render,
  task::Outcome,
  url_file_path,
};

const DEFAULT_TOP: usize = 3;

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 top 无效: {0}")]
  InvalidTop(String),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("帧计数器锁已失效")]
  CounterPoisoned,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RankedLabel {
  pub class_id: usize,
  pub label: String,
  pub probability: f32,
}

/// 写入磁盘的单条预测记录
#[derive(Debug, Serialize)]
pub struct PredictionRecord {
  pub source: Option<PathBuf>,
  pub success: bool,
  pub label: String,
  pub confidence: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub level: Option<ConfidenceLevel>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub top: Vec<RankedLabel>,
  pub timestamp: String,
}

impl PredictionRecord {
  pub fn new(outcome: &Outcome, top: usize, time: DateTime<Utc>) -> Self {
    let (level, top) = match &outcome.result {
      Ok(classification) => (
        Some(classification.confidence_level()),
        classification
          .top_k(top)
          .into_iter()
          .map(|(class_id, probability)| RankedLabel {
            class_id,
            label: classification.label_of(class_id).unwrap_or_default().to_string(),
            probability,
          })
          .collect(),
      ),
      Err(_) => (None, Vec::new()),
    };

    PredictionRecord {
      source: outcome.source.clone(),
      success: outcome.is_success(),
      label: outcome.label(),
      confidence: outcome.confidence(),
      level,
      top,
      timestamp: time.to_rfc3339(),
    }
  }
}

/// `folder:///var/lib/sonu/records?top=5&always`
///
/// 每条结果写为 `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.json`，默认只记录成功的预测。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  top: usize,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let top = match uri.query_pairs().find(|(k, _)| k == "top") {
      Some((_, v)) => v
        .parse::<usize>()
        .map_err(|_| DirectoryRecordOutputError::InvalidTop(v.into_owned()))?,
      None => DEFAULT_TOP,
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: url_file_path(uri),
      top,
      frame_counters: Arc::new(Mutex::new(0)),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      top: DEFAULT_TOP,
      frame_counters: Arc::new(Mutex::new(0)),
      always: false,
    }
  }

  pub fn always(mut self) -> Self {
    self.always = true;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> Result<u16, DirectoryRecordOutputError> {
    let mut counter = self
      .frame_counters
      .lock()
      .map_err(|_| DirectoryRecordOutputError::CounterPoisoned)?;
    let id = counter.wrapping_add(1);
    *counter = id;
    Ok(id)
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.frame_id()?
    )))
  }
}

impl Render<Outcome> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, result: &Outcome) -> Result<(), Self::Error> {
    if !self.always && !result.is_success() {
      return Ok(());
    }

    let now = Utc::now();
    let path = self.frame_path(now)?;
    let record = PredictionRecord::new(result, self.top, now);
    std::fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
    debug!("写入预测记录: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{Classification, Labels},
    task::PredictError,
  };

  fn records(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found
  }

  fn success() -> Outcome {
    let labels = Labels::new(vec![
      "Maize_healthy".to_string(),
      "Maize_streak virus".to_string(),
    ]);
    let classification = Classification::from_probabilities(vec![0.05, 0.95], &labels).unwrap();
    Outcome::predicted("/leaves/maize.jpg", classification)
  }

  #[test]
  fn writes_dated_json_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path());
    output.render_result(&success()).unwrap();

    let files = records(dir.path());
    assert_eq!(files.len(), 1);
    let path = &files[0];
    assert_eq!(path.extension().unwrap(), "json");
    // YYYY/MM/DD
    let relative = path.strip_prefix(dir.path()).unwrap();
    assert_eq!(relative.components().count(), 4);

    let value: serde_json::Value =
      serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(value["label"], "Maize_streak virus");
    assert_eq!(value["level"], "high");
    assert_eq!(value["success"], true);
    assert_eq!(value["top"][1]["label"], "Maize_healthy");
  }

  #[test]
  fn failures_recorded_only_when_always() {
    let failed = Outcome::failed(PredictError::ImageNotFound(PathBuf::from("gone.jpg")));

    let dir = tempfile::tempdir().unwrap();
    DirectoryRecordOutput::new(dir.path())
      .render_result(&failed)
      .unwrap();
    assert!(records(dir.path()).is_empty());

    let url = url::Url::from_directory_path(dir.path()).unwrap();
    let url = url::Url::parse(&format!("folder://{}?always", url.path())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&failed).unwrap();
    let files = records(dir.path());
    assert_eq!(files.len(), 1);

    let value: serde_json::Value =
      serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
    assert_eq!(value["confidence"], 0.0);
    assert!(value["label"].as_str().unwrap().starts_with("Error"));
    assert!(value.get("level").is_none());
  }

  #[test]
  fn top_parameter_is_validated() {
    let url = url::Url::parse("folder:///tmp/sonu?top=abc").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::InvalidTop(v)) if v == "abc"
    ));

    let url = url::Url::parse("folder:///tmp/sonu?top=5").unwrap();
    assert_eq!(DirectoryRecordOutput::from_url(&url).unwrap().top, 5);
    let url = url::Url::parse("folder:///tmp/sonu").unwrap();
    assert_eq!(DirectoryRecordOutput::from_url(&url).unwrap().top, DEFAULT_TOP);
  }

  #[test]
  fn frame_ids_increase() {
    let output = DirectoryRecordOutput::new("/unused");
    assert_eq!(output.frame_id().unwrap(), 1);
    assert_eq!(output.frame_id().unwrap(), 2);
  }
}
