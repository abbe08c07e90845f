//! The `loom` module provides the foundations shared by both tensor backends.
//!
//! ## Key Components
//! 1. **Layouts**:
//!    - [`Layout`](layout::Layout) pairs a physical shape with a logical axis permutation.
//!    - Transposition only touches the permutation; strides resolve indexing.
//!
//! 2. **Numerical System**:
//!    - Element types (`f32`, `f16`, `i32`, `u32`) and their [`DataType`](num::DataType) tags.
//!
//! 3. **Tensor Contract**:
//!    - The [`Tensor`](tensor::Tensor) trait, implemented by the host and the device tensor alike.
//!    - Activation functions and their derivatives.
//!
//! 4. **Execution Model**:
//!    - Completion [`Event`](event::Event)s chain device operations through explicit wait-lists.
//!    - The [`Gpu`](device::Gpu) handle owns the device, its queue and the compiled kernel cache.

pub mod activation;
pub mod device;
pub mod event;
pub mod layout;
pub mod num;
pub mod platform;
pub mod tensor;
