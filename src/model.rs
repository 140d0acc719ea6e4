// 该文件是 Sonu （叶诊） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;
use thiserror::Error;

use crate::{
  FromUrl, FromUrlWithScheme,
  backend::{InferenceBackend, default_device},
  frame::NchwFrame,
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

const HIGH_CONFIDENCE: f32 = 0.90;
const MEDIUM_CONFIDENCE: f32 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
  Low,
  Medium,
  High,
}

impl ConfidenceLevel {
  pub fn from_confidence(confidence: f32) -> Self {
    if confidence >= HIGH_CONFIDENCE {
      ConfidenceLevel::High
    } else if confidence >= MEDIUM_CONFIDENCE {
      ConfidenceLevel::Medium
    } else {
      ConfidenceLevel::Low
    }
  }
}

/// 单张图像的分类结果
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
  /// 全部类别的概率，顺序与类别表一致
  pub probabilities: Box<[f32]>,
  #[serde(skip)]
  labels: Labels,
}

impl Classification {
  /// 由概率分布构建，取概率最大者
  pub fn from_probabilities(probabilities: Vec<f32>, labels: &Labels) -> Result<Self, LabelsError> {
    if probabilities.len() != labels.len() {
      return Err(LabelsError::LabelMismatch {
        outputs: probabilities.len(),
        labels: labels.len(),
      });
    }
    if let Some(index) = probabilities.iter().position(|p| !p.is_finite()) {
      return Err(LabelsError::NonFinite { index });
    }
    let class_id = argmax(&probabilities).ok_or(LabelsError::Empty)?;
    let label = labels.get(class_id).ok_or(LabelsError::Empty)?.to_string();
    let confidence = probabilities[class_id];

    Ok(Classification {
      class_id,
      label,
      confidence,
      probabilities: probabilities.into_boxed_slice(),
      labels: labels.clone(),
    })
  }

  pub fn label_of(&self, class_id: usize) -> Option<&str> {
    self.labels.get(class_id)
  }

  pub fn confidence_level(&self) -> ConfidenceLevel {
    ConfidenceLevel::from_confidence(self.confidence)
  }

  /// 概率最高的 `k` 个类别，降序
  pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = self.probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
  }

  /// 类别名约定为 `<作物>_<病害>`
  pub fn crop(&self) -> &str {
    split_label(&self.label).0
  }

  pub fn condition(&self) -> &str {
    split_label(&self.label).1
  }

  pub fn is_healthy(&self) -> bool {
    self.condition().eq_ignore_ascii_case("healthy")
  }
}

pub fn split_label(label: &str) -> (&str, &str) {
  label.split_once('_').unwrap_or((label, ""))
}

/// 数值稳定的 softmax：先减去最大值，再求指数并除以总和
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

/// 最大值下标，并列时取第一个；空输入返回 `None`
pub fn argmax(values: &[f32]) -> Option<usize> {
  let mut best: Option<(usize, f32)> = None;
  for (i, &v) in values.iter().enumerate() {
    match best {
      Some((_, b)) if v <= b => {}
      _ => best = Some((i, v)),
    }
  }
  best.map(|(i, _)| i)
}

mod labels;
pub use self::labels::{Labels, LabelsError, ModelManifest};

pub mod cnn;

mod checkpoint;
pub use self::checkpoint::{CheckpointClassifier, CheckpointClassifierBuilder, CheckpointError};

mod onnx;
pub use self::onnx::{OnnxClassifier, OnnxClassifierBuilder, OnnxError};

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error(transparent)]
  CheckpointError(#[from] CheckpointError),
  #[error(transparent)]
  OnnxError(#[from] OnnxError),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择 checkpoint 或 ONNX 分类器
pub enum ClassifierWrapper<const W: u32, const H: u32> {
  Checkpoint(CheckpointClassifier<InferenceBackend, W, H>),
  Onnx(OnnxClassifier<W, H>),
}

impl<const W: u32, const H: u32> FromUrl for ClassifierWrapper<W, H> {
  type Error = ClassifierError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    let scheme = url.scheme();
    if scheme == CheckpointClassifierBuilder::SCHEME {
      let model = CheckpointClassifierBuilder::from_url(url)?
        .build::<InferenceBackend, W, H>(&default_device())?;
      Ok(ClassifierWrapper::Checkpoint(model))
    } else if scheme == OnnxClassifierBuilder::SCHEME {
      let model = OnnxClassifierBuilder::from_url(url)?.build::<W, H>()?;
      Ok(ClassifierWrapper::Onnx(model))
    } else {
      Err(ClassifierError::SchemeMismatch(scheme.to_string()))
    }
  }
}

impl<const W: u32, const H: u32> ClassifierWrapper<W, H> {
  pub fn labels(&self) -> &Labels {
    match self {
      ClassifierWrapper::Checkpoint(model) => model.labels(),
      ClassifierWrapper::Onnx(model) => model.labels(),
    }
  }
}

impl<const W: u32, const H: u32> Model for ClassifierWrapper<W, H> {
  type Input = NchwFrame<W, H>;
  type Output = Classification;
  type Error = ClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ClassifierWrapper::Checkpoint(model) => model.infer(input).map_err(ClassifierError::from),
      ClassifierWrapper::Onnx(model) => model.infer(input).map_err(ClassifierError::from),
    }
  }
}
