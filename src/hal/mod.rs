//! Backend implementations of the tensor contract.

pub mod cpu;
pub mod gpu;
pub mod kernel;
