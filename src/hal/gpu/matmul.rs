use crate::{
    hal::kernel::{Method, SMALL_LIMIT, SMALL_TILE, TILE},
    loom::{
        activation::Activation,
        device::{DeviceError, Dispatch, Gpu},
        layout::Layout,
        num::{Float, Scalar},
        tensor::{Tensor, TensorError},
    },
};

use super::{GpuMatrix, GpuScalar, GpuTensor, GpuVector, binding_len};

/// Operand of a contraction: storage plus its row and column strides.
struct Operand<'a> {
    buffer: &'a wgpu::Buffer,
    strides: [usize; 2],
}

/// Work done on each output element before it is stored.
#[derive(Debug, Clone, Copy)]
struct Epilogue<'a> {
    /// One element per output column, added to the sum.
    bias: Option<&'a wgpu::Buffer>,
    activation: Activation,
}

/// Binds one launch computing the `m x n` row-major `c` from the `m x k` operand `a` and
/// the `k x n` operand `b`.
///
/// The untiled kernel is taken when every dimension is small; both produce the same sums.
/// Every dimension and stride must already be known to fit a device binding.
fn contract<T: Scalar>(
    gpu: &Gpu,
    a: Operand<'_>,
    b: Operand<'_>,
    c: &wgpu::Buffer,
    epilogue: Epilogue<'_>,
    [m, k, n]: [usize; 3],
) -> Result<Dispatch, TensorError> {
    let small = m < SMALL_LIMIT && k < SMALL_LIMIT && n < SMALL_LIMIT;
    let method = match small {
        true => Method::TensorMultSmall,
        false => Method::TensorMult,
    };
    let kernel = gpu
        .kernel(method, T::DATA_TYPE)
        .map_err(DeviceError::from)?;

    // the kernel binds a bias either way; the flag tells it whether to read it
    let unbound;
    let (bias, flag) = match epilogue.bias {
        Some(bias) => (bias, 1),
        None => {
            unbound = gpu.create_buffer(T::DATA_TYPE.size());
            (&unbound, 0)
        }
    };

    let [a_row, a_col] = a.strides;
    let [b_row, b_col] = b.strides;
    let activation = epilogue.activation;
    let params = [
        m as u32,
        n as u32,
        k as u32,
        a_row as u32,
        a_col as u32,
        b_row as u32,
        b_col as u32,
        flag,
        activation.tag(),
        0,
        activation.alpha().to_bits(),
        0,
    ];
    let params = gpu.create_uniform(bytemuck::cast_slice(&params));

    let workgroups = match small {
        true => {
            let tile = SMALL_TILE as usize;
            [n.div_ceil(tile), m.div_ceil(tile), 1]
        }
        false => {
            let rows = TILE as usize;
            let columns = rows * gpu.vector_width().lanes() as usize;
            [n.div_ceil(columns), m.div_ceil(rows), 1]
        }
    }
    .map(|x| x as u32);

    #[cfg(feature = "trace")]
    tracing::trace!(m, k, n, %method, "contract");
    let buffers = [a.buffer, b.buffer, c, bias, &params];
    Ok(gpu.dispatch(kernel, &buffers, workgroups))
}

impl<T: Scalar, const R: usize> GpuTensor<T, R> {
    /// Enqueues a contraction of `self` with `rhs` into a fresh tensor of `layout`.
    fn submit_contract<const S: usize>(
        &self,
        rhs: &Self,
        layout: Layout<S>,
        operands: [[usize; 2]; 2],
        dims: [usize; 3],
        bias: Option<&GpuVector<T>>,
        activation: Activation,
    ) -> Result<GpuTensor<T, S>, TensorError> {
        let gpu = &self.gpu;
        binding_len::<T>(gpu, self.layout.size())?;
        binding_len::<T>(gpu, rhs.layout.size())?;
        binding_len::<T>(gpu, layout.size())?;

        let buffer = gpu.create_buffer(layout.size() * T::DATA_TYPE.size());
        let [a, b] = operands;
        let a = Operand {
            buffer: &self.buffer,
            strides: a,
        };
        let b = Operand {
            buffer: &rhs.buffer,
            strides: b,
        };
        let epilogue = Epilogue {
            bias: bias.map(|bias| &bias.buffer),
            activation,
        };
        let dispatch = contract::<T>(gpu, a, b, &buffer, epilogue, dims)?;

        let wait = self
            .fence
            .read_list()
            .into_iter()
            .chain(rhs.fence.read_list())
            .chain(bias.into_iter().flat_map(|bias| bias.fence.read_list()))
            .collect();
        let event = gpu.submit(wait, vec![dispatch.into()]);
        self.fence.track_read(event.clone());
        rhs.fence.track_read(event.clone());
        if let Some(bias) = bias {
            bias.fence.track_read(event.clone());
        }
        Ok(GpuTensor::from_parts(gpu, layout, buffer, event))
    }
}

impl<T: Scalar> GpuVector<T> {
    /// Inner product, contracted as a `1 x k` by `k x 1` matrix product.
    pub fn try_dot(&self, rhs: &Self) -> Result<GpuScalar<T>, TensorError> {
        let k = self.size();
        if k != rhs.size() {
            return Err(TensorError::Contract(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            ));
        }
        let [a] = self.layout.strides();
        let [b] = rhs.layout.strides();
        let layout = Layout::new([])?;
        let operands = [[0, a], [b, 0]];
        self.submit_contract(rhs, layout, operands, [1, k, 1], None, Activation::Linear)
    }
}

impl<T: Scalar> GpuMatrix<T> {
    fn check_contract(&self, rhs: &Self) -> Result<[usize; 3], TensorError> {
        let [m, k] = self.shape();
        let [_k, n] = rhs.shape();
        match k == _k {
            true => Ok([m, k, n]),
            false => Err(TensorError::Contract(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            )),
        }
    }

    /// Matrix product of an `m x k` and a `k x n` matrix.
    ///
    /// Operands are read through their strides, so transposed operands are never copied.
    pub fn try_matmul(&self, rhs: &Self) -> Result<Self, TensorError> {
        let [m, k, n] = self.check_contract(rhs)?;
        let layout = Layout::new([m, n])?;
        let operands = [self.layout.strides(), rhs.layout.strides()];
        self.submit_contract(rhs, layout, operands, [m, k, n], None, Activation::Linear)
    }

    /// Sums every column, contracted as a row of ones times the matrix.
    pub fn axis_sum(&self) -> Result<GpuVector<T>, TensorError> {
        let [m, n] = self.shape();
        let ones = GpuMatrix::full(&self.gpu, [1, m], T::one())?;
        let layout = Layout::new([n])?;
        let operands = [ones.layout.strides(), self.layout.strides()];
        ones.submit_contract(self, layout, operands, [1, m, n], None, Activation::Linear)
    }
}

impl<T: Float> GpuMatrix<T> {
    /// Matrix product followed by a per-column `bias` and `activation`, in one launch.
    ///
    /// Transposed operands come from [`Tensor::t`] on either side. The bias must hold one
    /// element per output column.
    pub fn try_matmul_fused(
        &self,
        rhs: &Self,
        bias: Option<&GpuVector<T>>,
        activation: Activation,
    ) -> Result<Self, TensorError> {
        let [m, k, n] = self.check_contract(rhs)?;
        if let Some(bias) = bias.filter(|bias| bias.size() != n) {
            return Err(TensorError::Bias(bias.size(), n));
        }
        let layout = Layout::new([m, n])?;
        let operands = [self.layout.strides(), rhs.layout.strides()];
        self.submit_contract(rhs, layout, operands, [m, k, n], bias, activation)
    }
}

impl<T: Scalar> std::ops::Rem<&GpuVector<T>> for &GpuVector<T> {
    type Output = GpuScalar<T>;

    fn rem(self, rhs: &GpuVector<T>) -> Self::Output {
        self.try_dot(rhs).expect("contraction dimensions must match")
    }
}

impl<T: Scalar> std::ops::Rem<&GpuMatrix<T>> for &GpuMatrix<T> {
    type Output = GpuMatrix<T>;

    fn rem(self, rhs: &GpuMatrix<T>) -> Self::Output {
        self.try_matmul(rhs).expect("contraction dimensions must match")
    }
}
