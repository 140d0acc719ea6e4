// 该文件是 Sonu （叶诊） 项目的一部分。
// src/model/onnx.rs - 基于 ONNX 推理图的分类器
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

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use ndarray::Array4;
use ort::{
  inputs,
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::NchwFrame,
  input::AsNchwFrame,
  model::{Classification, Labels, LabelsError, Model, ModelManifest, softmax},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("ONNX model not found at {}", .0.display())]
  NotFound(PathBuf),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("类别表错误: {0}")]
  LabelsError(#[from] LabelsError),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理会话锁已失效")]
  SessionPoisoned,
}

pub struct OnnxClassifierBuilder {
  model_path: PathBuf,
  labels: Option<Labels>,
  labels_path: Option<PathBuf>,
}

impl FromUrlWithScheme for OnnxClassifierBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxClassifierBuilder {
  type Error = OnnxError;

  /// `onnx:///models/net.onnx?labels=/models/labels.toml`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let labels_path = url
      .query_pairs()
      .find(|(k, _)| k == "labels")
      .map(|(_, v)| PathBuf::from(v.into_owned()));

    Ok(OnnxClassifierBuilder {
      model_path: url_file_path(url),
      labels: None,
      labels_path,
    })
  }
}

impl OnnxClassifierBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    OnnxClassifierBuilder {
      model_path: model_path.into(),
      labels: None,
      labels_path: None,
    }
  }

  pub fn path(&self) -> &Path {
    &self.model_path
  }

  /// 显式指定类别表，优先级最高
  pub fn labels(mut self, labels: Labels) -> Self {
    self.labels = Some(labels);
    self
  }

  pub fn labels_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  /// 显式类别表 > 类别表文件 > 模型清单 > 内置 CCMT 表
  fn resolve_labels(&mut self) -> Result<Labels, OnnxError> {
    if let Some(labels) = self.labels.take() {
      return Ok(labels);
    }
    if let Some(path) = &self.labels_path {
      return Ok(Labels::from_toml_file(path)?);
    }
    if let Some(manifest) = ModelManifest::find_for(&self.model_path)? {
      return Ok(manifest.labels());
    }
    warn!("未提供类别表，使用内置 CCMT 类别表；其顺序必须与训练时一致");
    Ok(Labels::ccmt())
  }

  pub fn build<const W: u32, const H: u32>(mut self) -> Result<OnnxClassifier<W, H>, OnnxError> {
    info!("加载 ONNX 模型: {}", self.model_path.display());
    if !self.model_path.is_file() {
      return Err(OnnxError::NotFound(self.model_path));
    }

    let labels = self.resolve_labels()?;
    debug!("类别数: {}", labels.len());

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .commit_from_file(&self.model_path)?;

    let input = session
      .inputs
      .first()
      .ok_or_else(|| OnnxError::ModelInvalid("模型没有输入".to_string()))?;
    let output = session
      .outputs
      .first()
      .ok_or_else(|| OnnxError::ModelInvalid("模型没有输出".to_string()))?;
    let input_name = input.name.clone();
    let output_name = output.name.clone();

    debug!("模型输入: {} {:?}", input_name, input.input_type);
    debug!("模型输出: {} {:?}", output_name, output.output_type);
    if session.inputs.len() != 1 {
      warn!(
        "模型有 {} 个输入，仅使用第一个: {}",
        session.inputs.len(),
        input_name
      );
    }
    info!("模型加载完成");

    Ok(OnnxClassifier {
      session: Mutex::new(session),
      input_name,
      output_name,
      labels,
    })
  }
}

pub struct OnnxClassifier<const W: u32, const H: u32> {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  labels: Labels,
}

impl<const W: u32, const H: u32> OnnxClassifier<W, H> {
  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn input_name(&self) -> &str {
    &self.input_name
  }
}

impl<const W: u32, const H: u32> Model for OnnxClassifier<W, H> {
  type Input = NchwFrame<W, H>;
  type Output = Classification;
  type Error = OnnxError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let array = Array4::from_shape_vec(input.shape(), input.as_nchw().to_vec())
      .map_err(|e| OnnxError::ModelInvalid(e.to_string()))?;
    let tensor = Tensor::from_array(array)?;

    let logits: Vec<f32> = {
      let mut session = self.session.lock().map_err(|_| OnnxError::SessionPoisoned)?;
      debug!("执行模型推理");
      let outputs = session.run(inputs![self.input_name.as_str() => tensor])?;
      let logits = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;
      debug!("模型输出形状: {:?}", logits.shape());
      // 批大小固定为 1
      logits.iter().copied().collect()
    };

    let probabilities = softmax(&logits);
    Ok(Classification::from_probabilities(
      probabilities,
      &self.labels,
    )?)
  }
}
