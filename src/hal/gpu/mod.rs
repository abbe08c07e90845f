//! Device-resident tensors.
//!
//! Operators never block: each enqueues its kernels behind the completion events of its
//! operands and returns at once. Reading a tensor back is the only point that waits.

use std::marker::PhantomData;

use crate::{
    hal::{
        cpu::CpuTensor,
        kernel::{MAX_RANK, Method},
    },
    loom::{
        device::{Command, DeviceError, Dispatch, Gpu, Kernel},
        event::{Event, Fence},
        layout::Layout,
        num::Scalar,
        tensor::{Tensor, TensorError},
    },
};

pub mod matmul;
pub mod ops;

/// A tensor of rank `R` stored in device memory.
///
/// Storage is row-major over the layout's physical shape and only reachable through
/// enqueued operations. The fence orders those operations: readers wait for the last write,
/// writers also wait for every read issued before them.
#[derive(Debug)]
pub struct GpuTensor<T: Scalar, const R: usize> {
    gpu: Gpu,
    layout: Layout<R>,
    buffer: wgpu::Buffer,
    fence: Fence,
    phantom: PhantomData<T>,
}

pub type GpuScalar<T> = GpuTensor<T, 0>;
pub type GpuVector<T> = GpuTensor<T, 1>;
pub type GpuMatrix<T> = GpuTensor<T, 2>;

impl<T: Scalar, const R: usize> GpuTensor<T, R> {
    fn from_parts(gpu: &Gpu, layout: Layout<R>, buffer: wgpu::Buffer, completion: Event) -> Self {
        Self {
            gpu: gpu.clone(),
            layout,
            buffer,
            fence: Fence::new(completion),
            phantom: PhantomData,
        }
    }

    /// Creates a tensor with freshly allocated, zero-filled storage.
    pub fn empty(gpu: &Gpu, shape: [usize; R]) -> Result<Self, TensorError> {
        let layout = Layout::new(shape)?;
        let buffer = gpu.create_buffer(layout.size() * T::DATA_TYPE.size());
        Ok(Self::from_parts(gpu, layout, buffer, Event::ready()))
    }

    #[inline]
    pub fn zeros(gpu: &Gpu, shape: [usize; R]) -> Result<Self, TensorError> {
        Self::empty(gpu, shape)
    }

    pub fn full(gpu: &Gpu, shape: [usize; R], value: T) -> Result<Self, TensorError> {
        let layout = Layout::new(shape)?;
        let data = vec![value; layout.size()];
        let buffer = gpu.create_buffer_init(bytemuck::cast_slice(&data));
        Ok(Self::from_parts(gpu, layout, buffer, Event::ready()))
    }

    /// Creates a tensor from elements in row-major order.
    pub fn from_vec(gpu: &Gpu, shape: [usize; R], data: Vec<T>) -> Result<Self, TensorError> {
        let layout = Layout::new(shape)?;
        if data.len() != layout.size() {
            return Err(TensorError::Create(shape.to_vec(), layout.size(), data.len()));
        }
        let buffer = gpu.create_buffer_init(bytemuck::cast_slice(&data));
        Ok(Self::from_parts(gpu, layout, buffer, Event::ready()))
    }

    /// Creates a tensor with elements drawn independently and uniformly from `[min, max]`.
    pub fn uniform(gpu: &Gpu, shape: [usize; R], min: T, max: T) -> Result<Self, TensorError> {
        Self::uniform_with(gpu, shape, min, max, &mut fastrand::Rng::new())
    }

    pub fn uniform_with(
        gpu: &Gpu,
        shape: [usize; R],
        min: T,
        max: T,
        rng: &mut fastrand::Rng,
    ) -> Result<Self, TensorError> {
        let tensor = CpuTensor::uniform_with(shape, min, max, rng)?;
        Ok(Self::from_cpu(gpu, &tensor))
    }

    /// Uploads a host tensor, keeping its axis permutation.
    pub fn from_cpu(gpu: &Gpu, tensor: &CpuTensor<T, R>) -> Self {
        let buffer = gpu.create_buffer_init(bytemuck::cast_slice(tensor.data()));
        Self::from_parts(gpu, tensor.layout(), buffer, Event::ready())
    }

    /// Downloads into a contiguous host tensor.
    pub async fn to_cpu(&self) -> Result<CpuTensor<T, R>, TensorError> {
        let data = self.to_vec().await?;
        CpuTensor::from_vec(self.shape(), data)
    }

    #[inline]
    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    /// Completion of the last operation that wrote the tensor.
    #[inline]
    pub fn completion(&self) -> Event {
        self.fence.completion()
    }

    /// Elements in storage order.
    async fn read(&self) -> Result<Vec<T>, DeviceError> {
        let bytes = self
            .gpu
            .read(self.fence.read_list(), self.buffer.clone())
            .await?;
        let mut data: Vec<T> = bytemuck::pod_collect_to_vec(&bytes);
        data.truncate(self.layout.size());
        Ok(data)
    }

    fn kernel(&self, method: Method) -> Result<Kernel, TensorError> {
        let kernel = self.gpu.kernel(method, T::DATA_TYPE).map_err(DeviceError::from)?;
        Ok(kernel)
    }

    fn check_shape(&self, rhs: &Self) -> Result<(), TensorError> {
        match self.layout.same_shape(&rhs.layout) {
            true => Ok(()),
            false => Err(TensorError::Shape(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            )),
        }
    }

    /// Enqueues `commands`, which write `self` and read `inputs`.
    fn submit_write(&mut self, inputs: &[&Self], commands: Vec<Command>) {
        let wait = self
            .fence
            .write_list()
            .into_iter()
            .chain(inputs.iter().flat_map(|input| input.fence.read_list()))
            .collect();
        let event = self.gpu.submit(wait, commands);
        for input in inputs {
            input.fence.track_read(event.clone());
        }
        self.fence.track_write(event);
    }

    /// Element count of `self`, if the device can bind its storage whole.
    fn binding_len(&self) -> Result<u32, TensorError> {
        binding_len::<T>(&self.gpu, self.layout.size())
    }

    /// One launch of an element-wise kernel over `self`.
    /// `params` follow the element count in the kernel's parameter block.
    fn elementwise(
        &self,
        method: Method,
        operand: Option<&wgpu::Buffer>,
        params: &[u8],
    ) -> Result<Dispatch, TensorError> {
        let len = self.binding_len()?;
        let kernel = self.kernel(method)?;
        let contents = [bytemuck::bytes_of(&len), params].concat();
        let params = self.gpu.create_buffer_init(&contents);

        let width = self.gpu.vector_width().get() as usize;
        let workgroups = self.gpu.linear_workgroups(self.layout.size().div_ceil(width));
        let buffers: Vec<_> = [Some(&self.buffer), operand, Some(&params)]
            .into_iter()
            .flatten()
            .collect();
        Ok(self.gpu.dispatch(kernel, &buffers, workgroups))
    }

    /// Returns `self`'s storage arranged in `target`'s physical order, with the launch that
    /// produces it if the permutations differ.
    fn gather(&self, target: &Layout<R>) -> Result<(wgpu::Buffer, Option<Dispatch>), TensorError> {
        if self.layout.axes() == target.axes() {
            return Ok((self.buffer.clone(), None));
        }
        if R > MAX_RANK {
            return Err(TensorError::Rank(R, MAX_RANK));
        }

        let len = self.binding_len()?;
        let kernel = self.kernel(Method::Relayout)?;
        let buffer = self.gpu.create_buffer(self.layout.size() * T::DATA_TYPE.size());

        // extents and strides never exceed the checked element count
        let mut shape = [1u32; MAX_RANK];
        let mut strides = [0u32; MAX_RANK];
        let gather = target.gather_strides(&self.layout);
        for (axis, (&extent, &stride)) in target.physical_shape().iter().zip(&gather).enumerate() {
            shape[axis] = extent as u32;
            strides[axis] = stride as u32;
        }
        let header = [len, R as u32];
        let contents = [
            bytemuck::cast_slice(&header),
            bytemuck::cast_slice(&shape),
            bytemuck::cast_slice(&strides),
        ]
        .concat();
        let params = self.gpu.create_buffer_init(&contents);

        let workgroups = self.gpu.linear_workgroups(self.layout.size());
        let dispatch = self
            .gpu
            .dispatch(kernel, &[&self.buffer, &buffer, &params], workgroups);
        Ok((buffer, Some(dispatch)))
    }
}

/// Element count of a `len`-element binding, or [`TensorError::Capacity`] if its bytes exceed
/// the device's storage binding limit. Kernels index with `u32`, so every count and stride
/// they receive goes through here first.
fn binding_len<T: Scalar>(gpu: &Gpu, len: usize) -> Result<u32, TensorError> {
    let limit = gpu.info().max_storage_binding_size;
    let bytes = len.saturating_mul(T::DATA_TYPE.size());
    match u32::try_from(bytes) {
        Ok(size) if size <= limit => Ok(len as u32),
        _ => Err(TensorError::Capacity(bytes, limit)),
    }
}

impl<T: Scalar, const R: usize> Tensor<T, R> for GpuTensor<T, R> {
    #[inline]
    fn layout(&self) -> Layout<R> {
        self.layout
    }

    #[inline]
    fn layout_mut(&mut self) -> &mut Layout<R> {
        &mut self.layout
    }

    async fn to_vec(&self) -> Result<Vec<T>, TensorError> {
        let data = self.read().await?;
        match self.layout.is_contiguous() {
            true => Ok(data),
            false => Ok(self.layout.offsets().into_iter().map(|x| data[x]).collect()),
        }
    }
}

/// Deep copy. The copy is enqueued behind the last write of the source.
impl<T: Scalar, const R: usize> Clone for GpuTensor<T, R> {
    fn clone(&self) -> Self {
        let buffer = self
            .gpu
            .create_buffer(self.layout.size() * T::DATA_TYPE.size());
        let command = Command::Copy {
            source: self.buffer.clone(),
            destination: buffer.clone(),
            size: buffer.size(),
        };
        let event = self.gpu.submit(self.fence.read_list(), vec![command]);
        self.fence.track_read(event.clone());
        Self::from_parts(&self.gpu, self.layout, buffer, event)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::{GpuMatrix, GpuScalar, GpuTensor, GpuVector};
    use crate::{
        hal::{cpu::CpuMatrix, kernel::VectorWidth},
        loom::{
            device::{GpuBuilder, gpu::tests::gpu},
            tensor::{Tensor, TensorError},
        },
    };

    #[tokio::test]
    async fn test_create() -> Result<(), Box<dyn Error>> {
        let Some(gpu) = gpu(VectorWidth::W4).await else {
            return Ok(());
        };

        let a = GpuMatrix::<f32>::empty(&gpu, [2, 3])?;
        assert_eq!(a.to_vec().await?, vec![0.0; 6]);

        let a = GpuVector::full(&gpu, [5], 3i32)?;
        assert_eq!(a.to_vec().await?, vec![3; 5]);
        assert_eq!(a.to_string().await?, "Vector<i32>(5): [3, 3, 3, 3, 3]");

        let a = GpuScalar::from_vec(&gpu, [], vec![2.5f32])?;
        assert_eq!(a.to_vec().await?, vec![2.5]);

        let mut rng = fastrand::Rng::with_seed(3);
        let a = GpuTensor::<f32, 3>::uniform_with(&gpu, [3, 3, 3], 0.0, 1.0, &mut rng)?;
        assert!(a.to_vec().await?.iter().all(|x| (0.0..=1.0).contains(x)));

        assert!(matches!(
            GpuMatrix::<f32>::zeros(&gpu, [0, 3]),
            Err(TensorError::Layout(_))
        ));
        assert!(matches!(
            GpuVector::from_vec(&gpu, [3], vec![1u32]),
            Err(TensorError::Create(_, 3, 1))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_transpose() -> Result<(), Box<dyn Error>> {
        let Some(gpu) = gpu(VectorWidth::W4).await else {
            return Ok(());
        };

        let mut a = GpuMatrix::from_vec(&gpu, [2, 3], vec![1u32, 2, 3, 4, 5, 6])?;
        a.t();
        assert_eq!(a.shape(), [3, 2]);
        assert_eq!(a.to_vec().await?, vec![1, 4, 2, 5, 3, 6]);
        a.swap_axes(0, 1)?;
        assert_eq!(a.to_vec().await?, vec![1, 2, 3, 4, 5, 6]);

        let mut b = CpuMatrix::from_vec([2, 3], vec![1u32, 2, 3, 4, 5, 6])?;
        b.t();
        let b = GpuMatrix::from_cpu(&gpu, &b);
        assert_eq!(b.to_cpu().await?.values(), vec![1, 4, 2, 5, 3, 6]);
        Ok(())
    }

    #[tokio::test]
    async fn test_clone() -> Result<(), Box<dyn Error>> {
        let Some(gpu) = gpu(VectorWidth::W4).await else {
            return Ok(());
        };

        let mut a = GpuVector::from_vec(&gpu, [3], vec![1.0f32, 2.0, 3.0])?;
        let b = a.clone();
        a += 1.0;
        assert_eq!(a.to_vec().await?, vec![2.0, 3.0, 4.0]);
        assert_eq!(b.to_vec().await?, vec![1.0, 2.0, 3.0]);

        // storage outlives the handles while work on it is pending
        let c = {
            let a = GpuVector::from_vec(&gpu, [3], vec![1.0f32, 1.0, 1.0])?;
            let b = GpuVector::full(&gpu, [3], 2.0f32)?;
            &a + &b
        };
        assert_eq!(c.to_vec().await?, vec![3.0; 3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_binding_limit() -> Result<(), Box<dyn Error>> {
        let instance = wgpu::Instance::new(&Default::default());
        let Ok(builder) = GpuBuilder::select(&instance) else {
            return Ok(());
        };
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 256,
            ..builder.limits.clone()
        };
        let Ok(gpu) = builder.limits(limits).build().await else {
            return Ok(());
        };
        assert_eq!(gpu.info().max_storage_binding_size, 256);

        // 400 bytes can't be bound whole, so nothing is enqueued
        let mut a = GpuVector::<f32>::zeros(&gpu, [100])?;
        assert!(matches!(a.try_add_scalar(1.0), Err(TensorError::Capacity(400, 256))));
        let panic = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a -= 1.0))
            .err()
            .and_then(|payload| payload.downcast::<String>().ok());
        assert!(panic.is_some_and(|message| message.starts_with("failed to enqueue scalar sub")));
        let mut b = GpuMatrix::<f32>::zeros(&gpu, [10, 10])?;
        b.t();
        assert!(matches!(
            GpuMatrix::<f32>::zeros(&gpu, [10, 10])?.try_add(&b),
            Err(TensorError::Capacity(400, 256))
        ));
        assert!(matches!(
            GpuMatrix::<f32>::zeros(&gpu, [10, 10])?.try_matmul(&b),
            Err(TensorError::Capacity(400, 256))
        ));

        let mut c = GpuVector::full(&gpu, [32], 1.0f32)?;
        c.try_add_scalar(1.0)?;
        assert_eq!(c.to_vec().await?, vec![2.0; 32]);
        Ok(())
    }
}
