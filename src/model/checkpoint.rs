// 该文件是 Sonu （叶诊） 项目的一部分。
// src/model/checkpoint.rs - 基于训练 checkpoint 的分类器
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

use burn::{
  prelude::*,
  record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder, RecorderError},
  tensor::activation::softmax,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder, config_from_file};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::NchwFrame,
  input::AsNchwFrame,
  model::{
    Classification, Labels, LabelsError, Model, ModelManifest,
    cnn::{CropNet, CropNetConfig, CropNetRecord, PYTORCH_KEY_REMAPS},
  },
  url_file_path,
};

/// PyTorch checkpoint 中保存权重的键
const STATE_DICT_KEY: &str = "model_state_dict";
const BURN_RECORD_EXTENSION: &str = "mpk";

#[derive(Error, Debug)]
pub enum CheckpointError {
  #[error("Checkpoint file not found at {}", .0.display())]
  NotFound(PathBuf),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("checkpoint 元数据读取失败: {0}")]
  MetadataError(String),
  #[error("类别表错误: {0}")]
  LabelsError(#[from] LabelsError),
  #[error("权重恢复失败: {0}")]
  RecorderError(#[from] RecorderError),
  #[error("张量数据错误: {0}")]
  TensorDataError(String),
}

/// checkpoint 顶层字典中与权重并列保存的元数据
#[derive(Deserialize)]
struct CheckpointMeta {
  class_names: Vec<String>,
  num_classes: usize,
}

pub struct CheckpointClassifierBuilder {
  checkpoint_path: PathBuf,
}

impl FromUrlWithScheme for CheckpointClassifierBuilder {
  const SCHEME: &'static str = "checkpoint";
}

impl FromUrl for CheckpointClassifierBuilder {
  type Error = CheckpointError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CheckpointError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(CheckpointClassifierBuilder::new(url_file_path(url)))
  }
}

impl CheckpointClassifierBuilder {
  pub fn new(checkpoint_path: impl Into<PathBuf>) -> Self {
    CheckpointClassifierBuilder {
      checkpoint_path: checkpoint_path.into(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.checkpoint_path
  }

  /// 清单优先，其次读取 checkpoint 自带的 `class_names` 与 `num_classes`
  fn load_manifest(&self) -> Result<ModelManifest, CheckpointError> {
    if let Some(manifest) = ModelManifest::find_for(&self.checkpoint_path)? {
      return Ok(manifest);
    }

    debug!("从 checkpoint 读取类别元数据");
    let meta: CheckpointMeta = config_from_file(&self.checkpoint_path, None)
      .map_err(|e| CheckpointError::MetadataError(e.to_string()))?;
    let manifest = ModelManifest {
      num_classes: meta.num_classes,
      ..ModelManifest::new(meta.class_names)
    };
    manifest.validate()?;
    Ok(manifest)
  }

  fn load_record<B: Backend>(&self, device: &B::Device) -> Result<CropNetRecord<B>, CheckpointError> {
    let is_burn_record = self
      .checkpoint_path
      .extension()
      .is_some_and(|ext| ext == BURN_RECORD_EXTENSION);

    let record = if is_burn_record {
      debug!("以 Burn 命名 MessagePack 格式读取权重");
      NamedMpkFileRecorder::<FullPrecisionSettings>::default()
        .load(self.checkpoint_path.clone(), device)?
    } else {
      debug!("以 PyTorch 格式读取权重，键: {}", STATE_DICT_KEY);
      let args = PYTORCH_KEY_REMAPS.into_iter().fold(
        LoadArgs::new(self.checkpoint_path.clone()).with_top_level_key(STATE_DICT_KEY),
        |args, (pattern, replacement)| args.with_key_remap(pattern, replacement),
      );
      PyTorchFileRecorder::<FullPrecisionSettings>::default().load(args, device)?
    };

    Ok(record)
  }

  pub fn build<B: Backend, const W: u32, const H: u32>(
    self,
    device: &B::Device,
  ) -> Result<CheckpointClassifier<B, W, H>, CheckpointError> {
    info!("加载 checkpoint: {}", self.checkpoint_path.display());
    if !self.checkpoint_path.is_file() {
      return Err(CheckpointError::NotFound(self.checkpoint_path));
    }

    let manifest = self.load_manifest()?;
    info!("类别数: {}", manifest.num_classes);
    if let Some(size) = manifest.input_size
      && (size != W || size != H)
    {
      warn!("清单输入尺寸 {} 与推理尺寸 {}x{} 不一致", size, W, H);
    }

    let record = self.load_record::<B>(device)?;
    let model = CropNetConfig::new(manifest.num_classes)
      .init::<B>(device)
      .load_record(record);
    info!("模型加载完成");

    Ok(CheckpointClassifier::from_parts(
      model,
      manifest.labels(),
      device.clone(),
    ))
  }
}

pub struct CheckpointClassifier<B: Backend, const W: u32, const H: u32> {
  model: CropNet<B>,
  labels: Labels,
  device: B::Device,
}

impl<B: Backend, const W: u32, const H: u32> CheckpointClassifier<B, W, H> {
  pub fn from_parts(model: CropNet<B>, labels: Labels, device: B::Device) -> Self {
    CheckpointClassifier {
      model,
      labels,
      device,
    }
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }
}

impl<B: Backend, const W: u32, const H: u32> Model for CheckpointClassifier<B, W, H> {
  type Input = NchwFrame<W, H>;
  type Output = Classification;
  type Error = CheckpointError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let data = TensorData::new(input.as_nchw().to_vec(), input.shape());
    let tensor = Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), &self.device);

    // 非 Autodiff 后端不记录梯度
    debug!("执行前向推理");
    let logits = self.model.forward(tensor);
    let probabilities = softmax(logits, 1);

    let probabilities = probabilities
      .into_data()
      .convert::<f32>()
      .to_vec::<f32>()
      .map_err(|e| CheckpointError::TensorDataError(format!("{e:?}")))?;

    Ok(Classification::from_probabilities(
      probabilities,
      &self.labels,
    )?)
  }
}
