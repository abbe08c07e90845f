use crate::{
    hal::kernel::Method,
    loom::{
        activation::Activation,
        device::Command,
        num::{Float, Scalar, Signed},
        tensor::{Tensor, TensorError},
    },
};

use half::f16;

use super::{GpuMatrix, GpuTensor};

impl<T: Scalar, const R: usize> GpuTensor<T, R> {
    /// Enqueues an in-place kernel that reads no other tensor.
    fn unary(&mut self, method: Method, params: &[u8]) -> Result<(), TensorError> {
        let dispatch = self.elementwise(method, None, params)?;
        self.submit_write(&[], vec![dispatch.into()]);
        Ok(())
    }

    /// Enqueues an in-place kernel combining `self` with `rhs` element by element.
    /// A permuted `rhs` is first gathered into `self`'s storage order.
    fn binary(&mut self, rhs: &Self, method: Method) -> Result<(), TensorError> {
        self.check_shape(rhs)?;
        let (buffer, relayout) = rhs.gather(&self.layout)?;
        let dispatch = self.elementwise(method, Some(&buffer), &[])?;
        let commands = relayout
            .into_iter()
            .chain(Some(dispatch))
            .map(Command::from)
            .collect();
        self.submit_write(&[rhs], commands);
        Ok(())
    }

    pub fn try_add_scalar(&mut self, scalar: T) -> Result<(), TensorError> {
        self.unary(Method::ScalarAdd, bytemuck::bytes_of(&scalar))
    }

    pub fn try_mul_scalar(&mut self, scalar: T) -> Result<(), TensorError> {
        self.unary(Method::ScalarMult, bytemuck::bytes_of(&scalar))
    }

    /// Divides every element by `scalar`. Integers truncate toward zero.
    ///
    /// A zero divisor fails with [`TensorError::DivideByZero`] before anything is enqueued.
    pub fn try_div_scalar(&mut self, scalar: T) -> Result<(), TensorError> {
        if scalar == T::zero() {
            return Err(TensorError::DivideByZero);
        }
        self.unary(Method::ScalarDiv, bytemuck::bytes_of(&scalar))
    }

    /// Element-wise sum with a tensor of the same shape, in place.
    pub fn try_add_assign(&mut self, rhs: &Self) -> Result<(), TensorError> {
        self.binary(rhs, Method::TensorAdd)
    }

    /// Element-wise (Hadamard) product with a tensor of the same shape, in place.
    pub fn try_mul_assign(&mut self, rhs: &Self) -> Result<(), TensorError> {
        self.binary(rhs, Method::TensorHadamard)
    }

    pub fn try_add(&self, rhs: &Self) -> Result<Self, TensorError> {
        self.check_shape(rhs)?;
        let mut output = self.clone();
        output.try_add_assign(rhs)?;
        Ok(output)
    }

    pub fn try_mul(&self, rhs: &Self) -> Result<Self, TensorError> {
        self.check_shape(rhs)?;
        let mut output = self.clone();
        output.try_mul_assign(rhs)?;
        Ok(output)
    }

    /// A copy of the tensor passed through the identity kernel, the unary plus.
    pub fn try_positive(&self) -> Result<Self, TensorError> {
        let mut output = self.clone();
        output.unary(Method::Positive, &[])?;
        Ok(output)
    }
}

impl<T: Signed, const R: usize> GpuTensor<T, R> {
    pub fn try_neg_assign(&mut self) -> Result<(), TensorError> {
        self.unary(Method::Negative, &[])
    }

    pub fn try_sub_scalar(&mut self, scalar: T) -> Result<(), TensorError> {
        self.try_add_scalar(scalar.wrapping_neg())
    }

    /// Replaces every element `x` with `scalar - x`.
    pub fn try_sub_from_scalar(&mut self, scalar: T) -> Result<(), TensorError> {
        self.try_neg_assign()?;
        self.try_add_scalar(scalar)
    }

    /// Subtracts `rhs` in place by adding a negated copy of it.
    pub fn try_sub_assign(&mut self, rhs: &Self) -> Result<(), TensorError> {
        self.check_shape(rhs)?;
        let mut negated = rhs.clone();
        negated.try_neg_assign()?;
        self.try_add_assign(&negated)
    }

    pub fn try_neg(&self) -> Result<Self, TensorError> {
        let mut output = self.clone();
        output.try_neg_assign()?;
        Ok(output)
    }

    pub fn try_sub(&self, rhs: &Self) -> Result<Self, TensorError> {
        self.check_shape(rhs)?;
        let mut output = self.clone();
        output.try_sub_assign(rhs)?;
        Ok(output)
    }
}

impl<T: Float, const R: usize> GpuTensor<T, R> {
    /// Applies `activation`, or its derivative if `derivative` is set, to a copy.
    pub fn try_apply(&self, activation: Activation, derivative: bool) -> Result<Self, TensorError> {
        let params = [activation.tag(), derivative as u32, activation.alpha().to_bits()];
        let params = bytemuck::cast_slice(&params);

        let mut output = self.clone();
        output.unary(Method::Activate, params)?;
        Ok(output)
    }

    #[inline]
    pub fn apply(&self, activation: Activation, derivative: bool) -> Self {
        self.try_apply(activation, derivative)
            .expect("failed to enqueue activation")
    }
}

impl<T: Float> GpuMatrix<T> {
    /// Point-wise mean squared error against `target`: `(a - b)² / cols`.
    pub fn loss(&self, target: &Self) -> Result<Self, TensorError> {
        let [_, cols] = self.shape();
        let difference = self.try_sub(target)?;
        let mut output = difference.try_mul(&difference)?;
        output.try_mul_scalar(T::from_f32(1.0 / cols as f32))?;
        Ok(output)
    }

    /// Gradient of [`loss`](Self::loss) with respect to `self`: `2 (a - b) / cols`.
    pub fn d_loss(&self, target: &Self) -> Result<Self, TensorError> {
        let [_, cols] = self.shape();
        let mut output = self.try_sub(target)?;
        output.try_mul_scalar(T::from_f32(2.0 / cols as f32))?;
        Ok(output)
    }
}

impl<T: Scalar, const R: usize> std::ops::AddAssign<T> for GpuTensor<T, R> {
    fn add_assign(&mut self, rhs: T) {
        self.try_add_scalar(rhs).expect("failed to enqueue scalar add");
    }
}

impl<T: Scalar, const R: usize> std::ops::MulAssign<T> for GpuTensor<T, R> {
    fn mul_assign(&mut self, rhs: T) {
        self.try_mul_scalar(rhs).expect("failed to enqueue scalar mult");
    }
}

impl<T: Signed, const R: usize> std::ops::SubAssign<T> for GpuTensor<T, R> {
    fn sub_assign(&mut self, rhs: T) {
        self.try_sub_scalar(rhs).expect("failed to enqueue scalar sub");
    }
}

impl<T: Scalar, const R: usize> std::ops::DivAssign<T> for GpuTensor<T, R> {
    fn div_assign(&mut self, rhs: T) {
        self.try_div_scalar(rhs).expect("divisor must be nonzero");
    }
}

impl<T: Scalar, const R: usize> std::ops::AddAssign<&GpuTensor<T, R>> for GpuTensor<T, R> {
    fn add_assign(&mut self, rhs: &GpuTensor<T, R>) {
        self.try_add_assign(rhs).expect("tensor shapes must match");
    }
}

impl<T: Scalar, const R: usize> std::ops::MulAssign<&GpuTensor<T, R>> for GpuTensor<T, R> {
    fn mul_assign(&mut self, rhs: &GpuTensor<T, R>) {
        self.try_mul_assign(rhs).expect("tensor shapes must match");
    }
}

impl<T: Signed, const R: usize> std::ops::SubAssign<&GpuTensor<T, R>> for GpuTensor<T, R> {
    fn sub_assign(&mut self, rhs: &GpuTensor<T, R>) {
        self.try_sub_assign(rhs).expect("tensor shapes must match");
    }
}

impl<T: Scalar, const R: usize> std::ops::Add<T> for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn add(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output += rhs;
        output
    }
}

impl<T: Scalar, const R: usize> std::ops::Mul<T> for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn mul(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output *= rhs;
        output
    }
}

impl<T: Scalar, const R: usize> std::ops::Div<T> for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn div(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output /= rhs;
        output
    }
}

impl<T: Signed, const R: usize> std::ops::Sub<T> for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn sub(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output -= rhs;
        output
    }
}

impl<T: Scalar, const R: usize> std::ops::Add<&GpuTensor<T, R>> for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn add(self, rhs: &GpuTensor<T, R>) -> Self::Output {
        self.try_add(rhs).expect("tensor shapes must match")
    }
}

impl<T: Scalar, const R: usize> std::ops::Mul<&GpuTensor<T, R>> for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn mul(self, rhs: &GpuTensor<T, R>) -> Self::Output {
        self.try_mul(rhs).expect("tensor shapes must match")
    }
}

impl<T: Signed, const R: usize> std::ops::Sub<&GpuTensor<T, R>> for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn sub(self, rhs: &GpuTensor<T, R>) -> Self::Output {
        self.try_sub(rhs).expect("tensor shapes must match")
    }
}

impl<T: Signed, const R: usize> std::ops::Neg for &GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn neg(self) -> Self::Output {
        self.try_neg().expect("failed to enqueue negation")
    }
}

impl<T: Signed, const R: usize> std::ops::Neg for GpuTensor<T, R> {
    type Output = GpuTensor<T, R>;

    fn neg(mut self) -> Self::Output {
        self.try_neg_assign().expect("failed to enqueue negation");
        self
    }
}

macro_rules! impl_scalar_lhs {
    ($($ty:ty),*) => {$(
        impl<const R: usize> std::ops::Add<&GpuTensor<$ty, R>> for $ty {
            type Output = GpuTensor<$ty, R>;

            fn add(self, rhs: &GpuTensor<$ty, R>) -> Self::Output {
                rhs + self
            }
        }

        impl<const R: usize> std::ops::Mul<&GpuTensor<$ty, R>> for $ty {
            type Output = GpuTensor<$ty, R>;

            fn mul(self, rhs: &GpuTensor<$ty, R>) -> Self::Output {
                rhs * self
            }
        }
    )*};
}

macro_rules! impl_signed_lhs {
    ($($ty:ty),*) => {$(
        impl<const R: usize> std::ops::Sub<&GpuTensor<$ty, R>> for $ty {
            type Output = GpuTensor<$ty, R>;

            fn sub(self, rhs: &GpuTensor<$ty, R>) -> Self::Output {
                let mut output = rhs.clone();
                output
                    .try_sub_from_scalar(self)
                    .expect("failed to enqueue scalar sub");
                output
            }
        }
    )*};
}

impl_scalar_lhs!(f32, f16, i32, u32);
impl_signed_lhs!(f32, f16, i32);
