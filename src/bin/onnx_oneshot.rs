// 该文件是 Sonu （叶诊） 项目的一部分。
// src/bin/onnx_oneshot.rs - 使用 ONNX 推理图对单张图像做病害预测
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use sonu::{
  FromUrl,
  input::InputWrapper,
  model::OnnxClassifierBuilder,
  output::OutputWrapper,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Sonu ONNX 单图预测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型路径，例如 onnx:///models/mobilenet_mobile.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///data/leaf.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 类别表（TOML），缺省时依次尝试模型清单与内置 CCMT 表
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
  /// 输出方式
  #[arg(long, value_name = "OUTPUT", default_value = "console:")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut builder = OnnxClassifierBuilder::from_url(&args.model)?;
  if let Some(labels) = &args.labels {
    info!("类别表: {}", labels.display());
    builder = builder.labels_file(labels);
  }
  let model = builder.build::<224, 224>()?;
  let input = InputWrapper::<224, 224>::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input.into_nchw(), model, output)?;

  Ok(())
}
