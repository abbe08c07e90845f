use crate::loom::{
    activation::Activation,
    num::{Float, Scalar},
    tensor::{Tensor, TensorError},
};

use super::{CpuMatrix, CpuScalar, CpuVector};

impl<T: Scalar> CpuVector<T> {
    /// Inner product. Both vectors must have the same length.
    pub fn try_dot(&self, rhs: &Self) -> Result<CpuScalar<T>, TensorError> {
        if self.size() != rhs.size() {
            return Err(TensorError::Contract(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            ));
        }
        let sum = self
            .iter()
            .zip(rhs.iter())
            .fold(T::zero(), |acc, (&x, &y)| acc.wrapping_add(x.wrapping_mul(y)));
        CpuScalar::from_vec([], vec![sum])
    }
}

impl<T: Scalar> CpuMatrix<T> {
    /// Matrix product of an `m x k` and a `k x n` matrix.
    ///
    /// Operands are read through their strides, so transposed operands are never copied.
    /// Each output accumulates in `T`, in order of the shared dimension.
    pub fn try_matmul(&self, rhs: &Self) -> Result<Self, TensorError> {
        let [m, k] = self.shape();
        let [_k, n] = rhs.shape();
        if k != _k {
            return Err(TensorError::Contract(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            ));
        }

        let [a_row, a_col] = self.layout.strides();
        let [b_row, b_col] = rhs.layout.strides();
        let (a, b) = (&self.data, &rhs.data);
        let row = move |i: usize| {
            (0..n).map(move |j| {
                (0..k).fold(T::zero(), |acc, l| {
                    let x = a[i * a_row + l * a_col].wrapping_mul(b[l * b_row + j * b_col]);
                    acc.wrapping_add(x)
                })
            })
        };

        #[cfg(not(feature = "rayon"))]
        let data: Vec<T> = (0..m).flat_map(row).collect();
        #[cfg(feature = "rayon")]
        let data: Vec<T> = {
            use rayon::prelude::*;
            (0..m).into_par_iter().flat_map_iter(row).collect()
        };
        Self::from_vec([m, n], data)
    }

    /// Sums every column, giving a vector with one element per column.
    pub fn axis_sum(&self) -> Result<CpuVector<T>, TensorError> {
        let [m, n] = self.shape();
        let [row, col] = self.layout.strides();
        let data = (0..n)
            .map(|j| {
                (0..m).fold(T::zero(), |acc, i| acc.wrapping_add(self.data[i * row + j * col]))
            })
            .collect();
        CpuVector::from_vec([n], data)
    }
}

impl<T: Float> CpuMatrix<T> {
    /// Matrix product followed by a per-column `bias` and `activation` on every output.
    ///
    /// Transposed operands come from [`Tensor::t`] on either side, as in [`try_matmul`].
    /// The bias must hold one element per output column.
    ///
    /// [`try_matmul`]: Self::try_matmul
    pub fn try_matmul_fused(
        &self,
        rhs: &Self,
        bias: Option<&CpuVector<T>>,
        activation: Activation,
    ) -> Result<Self, TensorError> {
        let [_, n] = rhs.shape();
        if let Some(bias) = bias.filter(|bias| bias.size() != n) {
            return Err(TensorError::Bias(bias.size(), n));
        }

        let mut output = self.try_matmul(rhs)?;
        let bias = bias.map(|bias| bias.data());
        let epilogue = |row: &mut [T]| {
            for (j, y) in row.iter_mut().enumerate() {
                let x = match bias {
                    Some(bias) => *y + bias[j],
                    None => *y,
                };
                *y = activation.apply(x, false);
            }
        };

        #[cfg(not(feature = "rayon"))]
        output.data.chunks_mut(n).for_each(epilogue);
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            output.data.par_chunks_mut(n).for_each(epilogue);
        }
        Ok(output)
    }
}

impl<T: Scalar> std::ops::Rem<&CpuVector<T>> for &CpuVector<T> {
    type Output = CpuScalar<T>;

    fn rem(self, rhs: &CpuVector<T>) -> Self::Output {
        self.try_dot(rhs).expect("contraction dimensions must match")
    }
}

impl<T: Scalar> std::ops::Rem<&CpuMatrix<T>> for &CpuMatrix<T> {
    type Output = CpuMatrix<T>;

    fn rem(self, rhs: &CpuMatrix<T>) -> Self::Output {
        self.try_matmul(rhs).expect("contraction dimensions must match")
    }
}
