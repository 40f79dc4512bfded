//! 計算バックエンドの型とデバイス

use burn::backend::{Autodiff, NdArray, Wgpu};
use burn_ndarray::NdArrayDevice;
use burn_wgpu::WgpuDevice;

/// GPU 推論用
pub type GpuBackend = Wgpu;
/// CPU 推論用
pub type CpuBackend = NdArray<f32>;
/// GPU 学習用
pub type GpuTrainBackend = Autodiff<GpuBackend>;
/// CPU 学習用
pub type CpuTrainBackend = Autodiff<CpuBackend>;

pub fn gpu_device() -> WgpuDevice {
    WgpuDevice::default()
}

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}
