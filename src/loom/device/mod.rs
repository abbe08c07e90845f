use std::fmt::Display;

use thiserror::Error;

use super::event::EventError;
use crate::hal::kernel::{KernelError, VectorWidth};

pub use gpu::{Command, Dispatch, Gpu, GpuBuildError, GpuBuilder, Kernel};

pub mod gpu;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId;

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error("failed to map buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("read-back dropped by the device: {0}")]
    Recv(#[from] flume::RecvError),
}

/// Read-only description of the selected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub driver: String,
    pub driver_info: String,
    pub max_workgroup_size: [u32; 3],
    pub max_workgroup_invocations: u32,
    pub max_workgroup_storage_size: u32,
    pub max_workgroups_per_dimension: u32,
    pub max_buffer_size: u64,
    pub max_storage_binding_size: u32,
    pub shader_f16: bool,
    /// Vector width of the element-wise kernels built for the device.
    pub vector_width: VectorWidth,
}

impl DeviceInfo {
    pub fn new(
        info: wgpu::AdapterInfo,
        limits: &wgpu::Limits,
        features: wgpu::Features,
        vector_width: VectorWidth,
    ) -> Self {
        Self {
            name: info.name,
            vendor: info.vendor,
            device: info.device,
            backend: info.backend,
            device_type: info.device_type,
            driver: info.driver,
            driver_info: info.driver_info,
            max_workgroup_size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_workgroup_invocations: limits.max_compute_invocations_per_workgroup,
            max_workgroup_storage_size: limits.max_compute_workgroup_storage_size,
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_buffer_size: limits.max_buffer_size,
            max_storage_binding_size: limits.max_storage_buffer_binding_size,
            shader_f16: features.contains(wgpu::Features::SHADER_F16),
            vector_width,
        }
    }
}

impl Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [x, y, z] = self.max_workgroup_size;
        writeln!(f, "{} ({:?}, {:?})", self.name, self.device_type, self.backend)?;
        writeln!(f, "  vendor: {:#06x}, device: {:#06x}", self.vendor, self.device)?;
        writeln!(f, "  driver: {} {}", self.driver, self.driver_info)?;
        writeln!(
            f,
            "  workgroup: {x}x{y}x{z}, {} invocations, {} bytes shared",
            self.max_workgroup_invocations, self.max_workgroup_storage_size
        )?;
        writeln!(
            f,
            "  memory: {} bytes per buffer, {} bytes per binding",
            self.max_buffer_size, self.max_storage_binding_size
        )?;
        write!(
            f,
            "  shader-f16: {}, vector width: {}",
            self.shader_f16, self.vector_width
        )
    }
}
