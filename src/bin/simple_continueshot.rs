// 该文件是 Sonu （叶诊） 项目的一部分。
// src/bin/simple_continueshot.rs - 逐张预测目录中的图像
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use sonu::{
  FromUrl,
  backend::backend_name,
  input::InputWrapper,
  model::ClassifierWrapper,
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// Sonu 批量预测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，checkpoint: 或 onnx: 方案
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，folder: 或 image: 方案
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出方式
  #[arg(long, value_name = "OUTPUT", default_value = "console:")]
  pub output: Url,
  /// 处理的图像数量上限
  #[arg(long)]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("推理后端: {}", backend_name());

  let model = ClassifierWrapper::<224, 224>::from_url(&args.model)?;
  let input = InputWrapper::<224, 224>::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let summary = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_interrupt_handler()
    .run_task(input.into_nchw(), model, output)?;
  info!(
    "处理 {} 张，成功 {}，失败 {}",
    summary.processed, summary.succeeded, summary.failed
  );

  Ok(())
}
