// 该文件是 Sonu （叶诊） 项目的一部分。
// src/model/cnn.rs - 病害分类卷积网络结构
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

//! 网络结构必须与训练时完全一致，否则权重无法恢复。
//!
//! ```text
//! conv1(3→64) → conv2(64→128, pool) → res1 + → conv3(128→256, pool)
//!   → conv4(256→512, pool) → res2 + → avgpool → flatten → linear(512→N)
//! ```

use burn::{
  nn::{
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
  },
  prelude::*,
};

const POOL_SIZE: usize = 4;
const FEATURES: usize = 512;

/// PyTorch `state_dict` 键名到本结构字段的映射
///
/// `nn.Sequential` 的下标 0 是卷积，1 是批归一化；分类头的线性层位于下标 2。
pub const PYTORCH_KEY_REMAPS: [(&str, &str); 5] = [
  (r"^(conv[1-4])\.0\.(.+)$", "$1.conv.$2"),
  (r"^(conv[1-4])\.1\.(.+)$", "$1.norm.$2"),
  (r"^(res[12])\.([01])\.0\.(.+)$", "$1.blocks.$2.conv.$3"),
  (r"^(res[12])\.([01])\.1\.(.+)$", "$1.blocks.$2.norm.$3"),
  (r"^classifier\.2\.(.+)$", "classifier.$1"),
];

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
  conv: Conv2d<B>,
  norm: BatchNorm<B, 2>,
  relu: Relu,
  pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
  pub fn new(in_channels: usize, out_channels: usize, pool: bool, device: &Device<B>) -> Self {
    let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
      .with_padding(PaddingConfig2d::Explicit(1, 1))
      .init(device);
    let norm = BatchNormConfig::new(out_channels).init(device);
    let pool = pool.then(|| {
      MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
        .with_strides([POOL_SIZE, POOL_SIZE])
        .init()
    });

    ConvBlock {
      conv,
      norm,
      relu: Relu::new(),
      pool,
    }
  }

  pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
    let x = self.conv.forward(input);
    let x = self.norm.forward(x);
    let x = self.relu.forward(x);
    match &self.pool {
      Some(pool) => pool.forward(x),
      None => x,
    }
  }
}

/// 两个同宽卷积块，残差相加在外层完成
#[derive(Module, Debug)]
pub struct ResidualStack<B: Backend> {
  blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> ResidualStack<B> {
  pub fn new(channels: usize, device: &Device<B>) -> Self {
    let blocks = (0..2)
      .map(|_| ConvBlock::new(channels, channels, false, device))
      .collect();
    ResidualStack { blocks }
  }

  pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
    let mut x = input;
    for block in &self.blocks {
      x = block.forward(x);
    }
    x
  }
}

#[derive(Config, Debug)]
pub struct CropNetConfig {
  pub num_classes: usize,
  #[config(default = 3)]
  pub in_channels: usize,
}

impl CropNetConfig {
  pub fn init<B: Backend>(&self, device: &Device<B>) -> CropNet<B> {
    CropNet {
      conv1: ConvBlock::new(self.in_channels, 64, false, device),
      conv2: ConvBlock::new(64, 128, true, device),
      res1: ResidualStack::new(128, device),
      conv3: ConvBlock::new(128, 256, true, device),
      conv4: ConvBlock::new(256, FEATURES, true, device),
      res2: ResidualStack::new(FEATURES, device),
      avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
      classifier: LinearConfig::new(FEATURES, self.num_classes).init(device),
    }
  }
}

#[derive(Module, Debug)]
pub struct CropNet<B: Backend> {
  conv1: ConvBlock<B>,
  conv2: ConvBlock<B>,
  res1: ResidualStack<B>,
  conv3: ConvBlock<B>,
  conv4: ConvBlock<B>,
  res2: ResidualStack<B>,
  avgpool: AdaptiveAvgPool2d,
  classifier: Linear<B>,
}

impl<B: Backend> CropNet<B> {
  /// 输入 `[N, 3, H, W]`，输出未归一化的 `[N, num_classes]`
  pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
    let x = self.conv1.forward(input);
    let x = self.conv2.forward(x);
    let x = self.res1.forward(x.clone()) + x;
    let x = self.conv3.forward(x);
    let x = self.conv4.forward(x);
    let x = self.res2.forward(x.clone()) + x;

    let x = self.avgpool.forward(x);
    let x = x.flatten(1, 3);
    self.classifier.forward(x)
  }

  pub fn num_classes(&self) -> usize {
    self.classifier.weight.val().dims()[1]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use burn::backend::NdArray;

  type TestBackend = NdArray<f32>;

  #[test]
  fn output_is_sized_to_class_count() {
    let device = Default::default();
    let model = CropNetConfig::new(5).init::<TestBackend>(&device);
    assert_eq!(model.num_classes(), 5);

    // 64 经三次 4 倍池化后为 1x1
    let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);
    let output = model.forward(input);
    assert_eq!(output.dims(), [1, 5]);
  }
}
