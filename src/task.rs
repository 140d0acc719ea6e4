// 该文件是 Sonu （叶诊） 项目的一部分。
// src/task.rs - 推理任务与失败策略
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
  fmt::Display,
  path::{Path, PathBuf},
  sync::mpsc,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::NchwFrame,
  input::{ImageFileInputError, InputError},
  model::{Classification, Model},
  output::Render,
};

/// 单张图像预测失败的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
  #[error("Image file not found at {}", .0.display())]
  ImageNotFound(PathBuf),
  #[error("{0}")]
  Failed(String),
}

impl From<ImageFileInputError> for PredictError {
  fn from(err: ImageFileInputError) -> Self {
    match err {
      ImageFileInputError::NotFound(path) => PredictError::ImageNotFound(path),
      other => PredictError::Failed(other.to_string()),
    }
  }
}

impl From<InputError> for PredictError {
  fn from(err: InputError) -> Self {
    match err {
      InputError::ImageFileInputError(err) => err.into(),
      other => PredictError::Failed(other.to_string()),
    }
  }
}

impl PredictError {
  /// 面向用户的错误文本，与预测标签共用同一显示位置
  pub fn display_label(&self) -> String {
    match self {
      PredictError::ImageNotFound(_) => format!("Error: {self}"),
      PredictError::Failed(message) => format!("An error occurred: {message}"),
    }
  }
}

/// 一次预测的结果：成功时为分类结果，失败时置信度固定为 0
#[derive(Debug, Clone)]
pub struct Outcome {
  pub source: Option<PathBuf>,
  pub result: Result<Classification, PredictError>,
}

impl Outcome {
  pub fn predicted(source: impl Into<PathBuf>, classification: Classification) -> Self {
    Outcome {
      source: Some(source.into()),
      result: Ok(classification),
    }
  }

  pub fn failed(error: PredictError) -> Self {
    let source = match &error {
      PredictError::ImageNotFound(path) => Some(path.clone()),
      PredictError::Failed(_) => None,
    };
    Outcome {
      source,
      result: Err(error),
    }
  }

  pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn source(&self) -> Option<&Path> {
    self.source.as_deref()
  }

  pub fn is_success(&self) -> bool {
    self.result.is_ok()
  }

  pub fn label(&self) -> String {
    match &self.result {
      Ok(classification) => classification.label.clone(),
      Err(error) => error.display_label(),
    }
  }

  pub fn confidence(&self) -> f32 {
    match &self.result {
      Ok(classification) => classification.confidence,
      Err(_) => 0.0,
    }
  }
}

/// 预测单张图像；任何失败都转为 `Outcome`，不向上传播
pub fn predict_single_image<const W: u32, const H: u32, M, E>(
  model: &M,
  frame: Result<NchwFrame<W, H>, E>,
) -> Outcome
where
  M: Model<Input = NchwFrame<W, H>, Output = Classification>,
  M::Error: Display,
  E: Into<PredictError>,
{
  let frame = match frame {
    Ok(frame) => frame,
    Err(err) => {
      let err: PredictError = err.into();
      warn!("读取图像失败: {}", err);
      return Outcome::failed(err);
    }
  };

  match model.infer(&frame) {
    Ok(classification) => Outcome::predicted(frame.source(), classification),
    Err(err) => {
      warn!("推理失败: {}", err);
      Outcome::failed(PredictError::Failed(err.to_string())).with_source(frame.source())
    }
  }
}

pub trait Task<I, M, O>: Sized {
  type Report;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Report, Self::Error>;
}

pub struct OneShotTask;

impl<const W: u32, const H: u32, E, I, M, O> Task<I, M, O> for OneShotTask
where
  E: Into<PredictError>,
  I: Iterator<Item = Result<NchwFrame<W, H>, E>>,
  M: Model<Input = NchwFrame<W, H>, Output = Classification>,
  M::Error: Display,
  O: Render<Outcome>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Report = Outcome;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Report, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    let now = Instant::now();
    let outcome = predict_single_image(&model, frame);
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&outcome)?;

    Ok(outcome)
  }
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
  pub runs: usize,
  pub mean: Option<Duration>,
  pub outcome: Outcome,
}

const WARMUP_RUNS: usize = 2;

pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    RepeatShotTask { repeat: 100 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

impl<const W: u32, const H: u32, E, I, M, O> Task<I, M, O> for RepeatShotTask
where
  E: Into<PredictError>,
  I: Iterator<Item = Result<NchwFrame<W, H>, E>>,
  M: Model<Input = NchwFrame<W, H>, Output = Classification>,
  M::Error: Display,
  O: Render<Outcome>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Report = BenchmarkReport;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Report, Self::Error> {
    info!("开始任务...");
    let frame = match input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))? {
      Ok(frame) => frame,
      Err(err) => {
        let outcome = Outcome::failed(err.into());
        output.render_result(&outcome)?;
        return Ok(BenchmarkReport {
          runs: 0,
          mean: None,
          outcome,
        });
      }
    };

    let mut times = Vec::with_capacity(self.repeat);
    let mut last = None;
    for i in 0..self.repeat {
      let now = Instant::now();
      let outcome = predict_single_image::<W, H, M, PredictError>(&model, Ok(frame.clone()));
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      let failed = !outcome.is_success();
      last = Some(outcome);
      if failed {
        break;
      }
    }

    let mean = if times.len() > WARMUP_RUNS {
      let measured = &times[WARMUP_RUNS..];
      Some(measured.iter().sum::<Duration>() / measured.len() as u32)
    } else {
      None
    };
    if let Some(mean) = mean {
      warn!("平均推理时间: {:.2?}", mean);
    }

    let outcome = last.ok_or_else(|| anyhow::anyhow!("没有执行推理"))?;
    output.render_result(&outcome)?;

    Ok(BenchmarkReport {
      runs: times.len(),
      mean,
      outcome,
    })
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  pub processed: usize,
  pub succeeded: usize,
  pub failed: usize,
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interrupt_handler: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 注册 Ctrl-C 处理，收到信号后处理完当前图像即退出
  pub fn with_interrupt_handler(mut self) -> Self {
    self.interrupt_handler = true;
    self
  }

  fn install_handler(&self) -> Option<mpsc::Receiver<()>> {
    if !self.interrupt_handler {
      return None;
    }
    let (tx, rx) = mpsc::channel();
    match ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
    }) {
      Ok(()) => Some(rx),
      Err(e) => {
        warn!("无法注册中断处理: {}", e);
        None
      }
    }
  }
}

impl<const W: u32, const H: u32, E, I, M, O> Task<I, M, O> for ContinuousTask
where
  E: Into<PredictError>,
  I: Iterator<Item = Result<NchwFrame<W, H>, E>>,
  M: Model<Input = NchwFrame<W, H>, Output = Classification>,
  M::Error: Display,
  O: Render<Outcome>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Report = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Report, Self::Error> {
    info!("开始任务...");
    let rx = self.install_handler();

    let mut summary = TaskSummary::default();
    for frame in input {
      summary.processed += 1;
      info!("处理第 {} 张图像", summary.processed);
      let now = Instant::now();
      let outcome = predict_single_image(&model, frame);
      info!("推理完成，耗时: {:.2?}", now.elapsed());
      if outcome.is_success() {
        summary.succeeded += 1;
      } else {
        summary.failed += 1;
      }
      output.render_result(&outcome)?;

      if self.frame_number.is_some_and(|n| summary.processed >= n) {
        info!("达到指定数量 {}, 退出任务循环", summary.processed);
        break;
      }
      if rx.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!(
      "任务完成: 共 {} 张，成功 {}，失败 {}",
      summary.processed, summary.succeeded, summary.failed
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use std::cell::{Cell, RefCell};

  use super::*;
  use crate::{
    input::ImageFileInput,
    model::{Labels, softmax},
  };

  /// 返回固定 logits 的模型，并记录调用次数
  struct FixedLogits {
    logits: Vec<f32>,
    labels: Labels,
    calls: Cell<usize>,
  }

  impl FixedLogits {
    fn zeros(n: usize) -> Self {
      FixedLogits {
        logits: vec![0.0; n],
        labels: Labels::ccmt(),
        calls: Cell::new(0),
      }
    }
  }

  #[derive(Error, Debug)]
  #[error("boom")]
  struct Boom;

  impl Model for FixedLogits {
    type Input = NchwFrame<2, 2>;
    type Output = Classification;
    type Error = crate::model::LabelsError;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      self.calls.set(self.calls.get() + 1);
      Classification::from_probabilities(softmax(&self.logits), &self.labels)
    }
  }

  struct Failing;

  impl Model for Failing {
    type Input = NchwFrame<2, 2>;
    type Output = Classification;
    type Error = Boom;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Err(Boom)
    }
  }

  #[derive(Default)]
  struct Collect {
    outcomes: RefCell<Vec<Outcome>>,
  }

  impl Render<Outcome> for &Collect {
    type Error = std::io::Error;

    fn render_result(&self, result: &Outcome) -> Result<(), Self::Error> {
      self.outcomes.borrow_mut().push(result.clone());
      Ok(())
    }
  }

  fn frame(name: &str) -> NchwFrame<2, 2> {
    NchwFrame::from_vec(name, vec![0.0; 12]).unwrap()
  }

  #[test]
  fn missing_image_is_error_with_zero_confidence() {
    let model = FixedLogits::zeros(22);
    let mut input = ImageFileInput::<2, 2>::new("/no/such/leaf.jpg").into_nchw();
    let outcome = predict_single_image(&model, input.next().unwrap());

    assert!(outcome.label().contains("Error"));
    assert!(outcome.label().contains("/no/such/leaf.jpg"));
    assert_eq!(outcome.confidence(), 0.0);
    assert_eq!(model.calls.get(), 0);
  }

  #[test]
  fn model_failure_is_caught() {
    let outcome = predict_single_image::<2, 2, _, PredictError>(&Failing, Ok(frame("x.png")));
    assert_eq!(outcome.label(), "An error occurred: boom");
    assert_eq!(outcome.confidence(), 0.0);
    assert_eq!(outcome.source(), Some(Path::new("x.png")));
  }

  #[test]
  fn uniform_logits_predict_within_range() {
    let model = FixedLogits::zeros(22);
    let outcome = predict_single_image::<2, 2, _, PredictError>(&model, Ok(frame("leaf.png")));
    let classification = outcome.result.as_ref().unwrap();

    assert!(classification.class_id < 22);
    assert!((outcome.confidence() - 1.0 / 22.0).abs() < 1e-6);
    assert_eq!(outcome.label(), "Cashew_anthracnose");
  }

  #[test]
  fn nan_logits_fail_the_prediction() {
    let mut model = FixedLogits::zeros(22);
    model.logits[3] = f32::NAN;
    let outcome = predict_single_image::<2, 2, _, PredictError>(&model, Ok(frame("leaf.png")));

    assert!(!outcome.is_success());
    assert!(outcome.label().starts_with("An error occurred"));
    assert_eq!(outcome.confidence(), 0.0);
  }

  #[test]
  fn one_shot_renders_once() {
    let collect = Collect::default();
    let input = vec![Ok::<_, PredictError>(frame("a.png")), Ok(frame("b.png"))];
    let outcome = OneShotTask
      .run_task(input.into_iter(), FixedLogits::zeros(22), &collect)
      .unwrap();

    assert!(outcome.is_success());
    assert_eq!(collect.outcomes.borrow().len(), 1);
  }

  #[test]
  fn one_shot_without_input_is_an_error() {
    let collect = Collect::default();
    let input: Vec<Result<NchwFrame<2, 2>, PredictError>> = Vec::new();
    assert!(
      OneShotTask
        .run_task(input.into_iter(), FixedLogits::zeros(22), &collect)
        .is_err()
    );
  }

  #[test]
  fn repeat_shot_reports_mean_after_warmup() {
    let collect = Collect::default();
    let input = vec![Ok::<_, PredictError>(frame("a.png"))];
    let report = RepeatShotTask::default()
      .with_repeat(5)
      .run_task(input.into_iter(), FixedLogits::zeros(22), &collect)
      .unwrap();

    assert_eq!(report.runs, 5);
    assert!(report.mean.is_some());
    assert!(report.outcome.is_success());
    assert_eq!(collect.outcomes.borrow().len(), 1);
  }

  #[test]
  fn continuous_counts_failures_and_respects_limit() {
    let collect = Collect::default();
    let input = vec![
      Ok(frame("a.png")),
      Err(PredictError::ImageNotFound(PathBuf::from("gone.png"))),
      Ok(frame("c.png")),
      Ok(frame("d.png")),
    ];
    let summary = ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(input.into_iter(), FixedLogits::zeros(22), &collect)
      .unwrap();

    assert_eq!(
      summary,
      TaskSummary {
        processed: 3,
        succeeded: 2,
        failed: 1
      }
    );
    let outcomes = collect.outcomes.borrow();
    assert_eq!(outcomes[1].confidence(), 0.0);
    assert!(outcomes[1].label().starts_with("Error"));
  }
}
