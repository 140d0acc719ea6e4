// 该文件是 Sonu （叶诊） 项目的一部分。
// src/backend.rs - 计算后端选择
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

//! 后端在编译期确定：启用 `cuda` 或 `wgpu` 特性时使用加速器，否则退回 CPU。

use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type InferenceBackend = burn::backend::Cuda<f32, i32>;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type InferenceBackend = burn::backend::Wgpu;

#[cfg(not(any(feature = "cuda", feature = "wgpu")))]
pub type InferenceBackend = burn::backend::NdArray<f32>;

pub type InferenceDevice = <InferenceBackend as Backend>::Device;

/// 默认设备（第一块加速卡或 CPU）
pub fn default_device() -> InferenceDevice {
  InferenceDevice::default()
}

pub fn backend_name() -> &'static str {
  #[cfg(feature = "cuda")]
  {
    "CUDA (GPU)"
  }
  #[cfg(all(feature = "wgpu", not(feature = "cuda")))]
  {
    "WGPU (GPU)"
  }
  #[cfg(not(any(feature = "cuda", feature = "wgpu")))]
  {
    "NdArray (CPU)"
  }
}
