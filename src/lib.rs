//! `weft` provides shape-aware tensors with two interchangeable execution backends:
//! an in-process host backend that runs scalar loops, and a WebGPU backend that
//! generates, compiles and schedules compute kernels asynchronously.
//!
//! - [`loom`] holds the foundations shared by both backends: layouts, element types,
//!   the tensor contract, activations, completion events and the device manager.
//! - [`hal`] holds the backend implementations: kernel source generation, the host
//!   tensor [`CpuTensor`] and the device tensor [`GpuTensor`].

#![allow(async_fn_in_trait)]

pub mod hal;
pub mod loom;

pub use hal::{
    cpu::{CpuMatrix, CpuScalar, CpuTensor, CpuVector},
    gpu::{GpuMatrix, GpuScalar, GpuTensor, GpuVector},
    kernel::{Method, VectorWidth},
};
pub use loom::{
    activation::Activation,
    device::{Gpu, GpuBuilder},
    layout::Layout,
    num::{DataType, Float, Scalar, Signed},
    tensor::{Tensor, TensorError},
};
