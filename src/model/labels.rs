// 该文件是 Sonu （叶诊） 项目的一部分。
// src/model/labels.rs - 类别表与模型清单
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const CCMT_LABELS: &str = include_str!("../../labels/ccmt.toml");

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("清单解析错误: {0}")]
  ManifestParseError(#[from] serde_json::Error),
  #[error("类别表解析错误: {0}")]
  TableParseError(#[from] toml::de::Error),
  #[error("类别数不一致: num_classes = {num_classes}, class_names 长度 = {names}")]
  CountMismatch { num_classes: usize, names: usize },
  #[error("模型输出维度 {outputs} 与类别数 {labels} 不一致")]
  LabelMismatch { outputs: usize, labels: usize },
  #[error("类别表为空")]
  Empty,
  #[error("模型输出第 {index} 项不是有限数值")]
  NonFinite { index: usize },
}

#[derive(Deserialize)]
struct LabelTable {
  #[allow(dead_code)]
  version: u32,
  names: Vec<String>,
}

/// 有序类别表，下标即模型输出下标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Box<[String]>,
}

impl Labels {
  pub fn new(names: Vec<String>) -> Self {
    Labels {
      names: names.into_boxed_slice(),
    }
  }

  /// 内置的 22 类 CCMT 作物病害表
  pub fn ccmt() -> Self {
    Self::from_toml_str(CCMT_LABELS).expect("内置类别表格式错误")
  }

  pub fn from_toml_str(content: &str) -> Result<Self, LabelsError> {
    let table: LabelTable = toml::from_str(content)?;
    if table.names.is_empty() {
      return Err(LabelsError::Empty);
    }
    Ok(Labels::new(table.names))
  }

  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let labels = Self::from_toml_str(&content)?;
    info!(
      "从 {} 加载 {} 个类别",
      path.as_ref().display(),
      labels.len()
    );
    Ok(labels)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

fn default_manifest_version() -> u32 {
  1
}

/// 与模型文件放在一起的 JSON 清单，checkpoint 与 ONNX 两种部署共用
///
/// ```json
/// { "version": 1, "num_classes": 22, "class_names": ["Cashew_anthracnose", "..."] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
  #[serde(default = "default_manifest_version")]
  pub version: u32,
  pub num_classes: usize,
  pub class_names: Vec<String>,
  #[serde(default)]
  pub input_size: Option<u32>,
}

impl ModelManifest {
  pub fn new(class_names: Vec<String>) -> Self {
    ModelManifest {
      version: default_manifest_version(),
      num_classes: class_names.len(),
      class_names,
      input_size: None,
    }
  }

  /// `models/net.pth` 对应 `models/net.json`
  pub fn sidecar_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("json")
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let manifest: ModelManifest = serde_json::from_str(&content)?;
    manifest.validate()?;
    Ok(manifest)
  }

  /// 查找模型旁的清单，不存在时返回 `None`
  pub fn find_for(model_path: &Path) -> Result<Option<Self>, LabelsError> {
    let path = Self::sidecar_path(model_path);
    if !path.is_file() {
      debug!("未找到模型清单: {}", path.display());
      return Ok(None);
    }
    info!("读取模型清单: {}", path.display());
    Self::from_file(&path).map(Some)
  }

  pub fn validate(&self) -> Result<(), LabelsError> {
    if self.class_names.is_empty() {
      return Err(LabelsError::Empty);
    }
    if self.class_names.len() != self.num_classes {
      return Err(LabelsError::CountMismatch {
        num_classes: self.num_classes,
        names: self.class_names.len(),
      });
    }
    Ok(())
  }

  pub fn labels(&self) -> Labels {
    Labels::new(self.class_names.clone())
  }
}
