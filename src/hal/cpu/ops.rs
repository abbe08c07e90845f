use half::f16;

use crate::loom::{
    activation::Activation,
    layout::offsets,
    num::{Float, Scalar, Signed},
    tensor::{Tensor, TensorError},
};

use super::{CpuMatrix, CpuTensor};

impl<T: Scalar, const R: usize> CpuTensor<T, R> {
    /// Applies `f` to every element in place.
    fn map_assign<F>(&mut self, f: F)
    where
        F: Fn(T) -> T + Send + Sync,
    {
        #[cfg(not(feature = "rayon"))]
        self.data.iter_mut().for_each(|x| *x = f(*x));
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            self.data.par_iter_mut().for_each(|x| *x = f(*x));
        }
    }

    /// Combines every element with the element of `rhs` at the same logical coordinate.
    fn zip_assign<F>(&mut self, rhs: &Self, f: F) -> Result<(), TensorError>
    where
        F: Fn(T, T) -> T + Send + Sync,
    {
        if !self.layout.same_shape(&rhs.layout) {
            return Err(TensorError::Shape(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            ));
        }

        let gather = match self.layout.axes() == rhs.layout.axes() {
            true => None,
            false => {
                let strides = self.layout.gather_strides(&rhs.layout);
                Some(offsets(self.layout.physical_shape(), strides))
            }
        };

        #[cfg(not(feature = "rayon"))]
        {
            use itertools::Itertools;
            match gather {
                None => self
                    .data
                    .iter_mut()
                    .zip_eq(rhs.data.iter())
                    .for_each(|(x, &y)| *x = f(*x, y)),
                Some(gather) => self
                    .data
                    .iter_mut()
                    .zip_eq(gather)
                    .for_each(|(x, offset)| *x = f(*x, rhs.data[offset])),
            }
        }
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            match gather {
                None => self
                    .data
                    .par_iter_mut()
                    .zip_eq(rhs.data.par_iter())
                    .for_each(|(x, &y)| *x = f(*x, y)),
                Some(gather) => self
                    .data
                    .par_iter_mut()
                    .zip_eq(gather.into_par_iter())
                    .for_each(|(x, offset)| *x = f(*x, rhs.data[offset])),
            }
        }
        Ok(())
    }

    /// Adds `scalar` to every element.
    #[inline]
    pub fn add_scalar(&mut self, scalar: T) {
        self.map_assign(|x| x.wrapping_add(scalar));
    }

    /// Multiplies every element by `scalar`.
    #[inline]
    pub fn mul_scalar(&mut self, scalar: T) {
        self.map_assign(|x| x.wrapping_mul(scalar));
    }

    /// Divides every element by `scalar`. Integers truncate toward zero.
    ///
    /// A zero divisor fails with [`TensorError::DivideByZero`] and leaves the tensor as is.
    pub fn try_div_scalar(&mut self, scalar: T) -> Result<(), TensorError> {
        if scalar == T::zero() {
            return Err(TensorError::DivideByZero);
        }
        self.map_assign(|x| x.wrapping_div(scalar));
        Ok(())
    }

    /// Element-wise sum with a tensor of the same shape, in place.
    pub fn try_add_assign(&mut self, rhs: &Self) -> Result<(), TensorError> {
        self.zip_assign(rhs, |x, y| x.wrapping_add(y))
    }

    /// Element-wise (Hadamard) product with a tensor of the same shape, in place.
    pub fn try_mul_assign(&mut self, rhs: &Self) -> Result<(), TensorError> {
        self.zip_assign(rhs, |x, y| x.wrapping_mul(y))
    }

    pub fn try_add(&self, rhs: &Self) -> Result<Self, TensorError> {
        let mut output = self.clone();
        output.try_add_assign(rhs)?;
        Ok(output)
    }

    pub fn try_mul(&self, rhs: &Self) -> Result<Self, TensorError> {
        let mut output = self.clone();
        output.try_mul_assign(rhs)?;
        Ok(output)
    }

    /// A copy of the tensor, the unary plus.
    #[inline]
    pub fn positive(&self) -> Self {
        self.clone()
    }
}

impl<T: Signed, const R: usize> CpuTensor<T, R> {
    pub fn neg_assign(&mut self) {
        self.map_assign(|x| x.wrapping_neg());
    }

    pub fn sub_scalar(&mut self, scalar: T) {
        self.map_assign(|x| x.wrapping_sub(scalar));
    }

    /// Replaces every element `x` with `scalar - x`.
    pub fn sub_from_scalar(&mut self, scalar: T) {
        self.map_assign(|x| scalar.wrapping_sub(x));
    }

    pub fn try_sub_assign(&mut self, rhs: &Self) -> Result<(), TensorError> {
        self.zip_assign(rhs, |x, y| x.wrapping_sub(y))
    }

    pub fn try_sub(&self, rhs: &Self) -> Result<Self, TensorError> {
        let mut output = self.clone();
        output.try_sub_assign(rhs)?;
        Ok(output)
    }
}

impl<T: Float, const R: usize> CpuTensor<T, R> {
    /// Applies `activation`, or its derivative if `derivative` is set, to a copy.
    pub fn apply(&self, activation: Activation, derivative: bool) -> Self {
        let mut output = self.clone();
        output.map_assign(|x| activation.apply(x, derivative));
        output
    }
}

impl<T: Float> CpuMatrix<T> {
    /// Point-wise mean squared error against `target`: `(a - b)² / cols`.
    ///
    /// Summing the result over a row gives that row's mean loss.
    pub fn loss(&self, target: &Self) -> Result<Self, TensorError> {
        let [_, cols] = self.shape();
        let scale = T::from_f32(1.0 / cols as f32);
        let mut output = self.clone();
        output.zip_assign(target, |x, y| {
            let d = x - y;
            d * d * scale
        })?;
        Ok(output)
    }

    /// Gradient of [`loss`](Self::loss) with respect to `self`: `2 (a - b) / cols`.
    pub fn d_loss(&self, target: &Self) -> Result<Self, TensorError> {
        let [_, cols] = self.shape();
        let scale = T::from_f32(2.0 / cols as f32);
        let mut output = self.clone();
        output.zip_assign(target, |x, y| (x - y) * scale)?;
        Ok(output)
    }
}

impl<T: Scalar, const R: usize> std::ops::AddAssign<T> for CpuTensor<T, R> {
    fn add_assign(&mut self, rhs: T) {
        self.add_scalar(rhs);
    }
}

impl<T: Scalar, const R: usize> std::ops::MulAssign<T> for CpuTensor<T, R> {
    fn mul_assign(&mut self, rhs: T) {
        self.mul_scalar(rhs);
    }
}

impl<T: Signed, const R: usize> std::ops::SubAssign<T> for CpuTensor<T, R> {
    fn sub_assign(&mut self, rhs: T) {
        self.sub_scalar(rhs);
    }
}

impl<T: Scalar, const R: usize> std::ops::DivAssign<T> for CpuTensor<T, R> {
    fn div_assign(&mut self, rhs: T) {
        self.try_div_scalar(rhs).expect("divisor must be nonzero");
    }
}

impl<T: Scalar, const R: usize> std::ops::AddAssign<&CpuTensor<T, R>> for CpuTensor<T, R> {
    fn add_assign(&mut self, rhs: &CpuTensor<T, R>) {
        self.try_add_assign(rhs).expect("tensor shapes must match");
    }
}

impl<T: Scalar, const R: usize> std::ops::MulAssign<&CpuTensor<T, R>> for CpuTensor<T, R> {
    fn mul_assign(&mut self, rhs: &CpuTensor<T, R>) {
        self.try_mul_assign(rhs).expect("tensor shapes must match");
    }
}

impl<T: Signed, const R: usize> std::ops::SubAssign<&CpuTensor<T, R>> for CpuTensor<T, R> {
    fn sub_assign(&mut self, rhs: &CpuTensor<T, R>) {
        self.try_sub_assign(rhs).expect("tensor shapes must match");
    }
}

impl<T: Scalar, const R: usize> std::ops::Add<T> for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn add(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output.add_scalar(rhs);
        output
    }
}

impl<T: Scalar, const R: usize> std::ops::Mul<T> for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn mul(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output.mul_scalar(rhs);
        output
    }
}

impl<T: Scalar, const R: usize> std::ops::Div<T> for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn div(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output.try_div_scalar(rhs).expect("divisor must be nonzero");
        output
    }
}

impl<T: Signed, const R: usize> std::ops::Sub<T> for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn sub(self, rhs: T) -> Self::Output {
        let mut output = self.clone();
        output.sub_scalar(rhs);
        output
    }
}

impl<T: Scalar, const R: usize> std::ops::Add<&CpuTensor<T, R>> for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn add(self, rhs: &CpuTensor<T, R>) -> Self::Output {
        self.try_add(rhs).expect("tensor shapes must match")
    }
}

impl<T: Scalar, const R: usize> std::ops::Mul<&CpuTensor<T, R>> for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn mul(self, rhs: &CpuTensor<T, R>) -> Self::Output {
        self.try_mul(rhs).expect("tensor shapes must match")
    }
}

impl<T: Signed, const R: usize> std::ops::Sub<&CpuTensor<T, R>> for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn sub(self, rhs: &CpuTensor<T, R>) -> Self::Output {
        self.try_sub(rhs).expect("tensor shapes must match")
    }
}

impl<T: Signed, const R: usize> std::ops::Neg for &CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn neg(self) -> Self::Output {
        let mut output = self.clone();
        output.neg_assign();
        output
    }
}

impl<T: Signed, const R: usize> std::ops::Neg for CpuTensor<T, R> {
    type Output = CpuTensor<T, R>;

    fn neg(mut self) -> Self::Output {
        self.neg_assign();
        self
    }
}

/// `s + t` and `s * t` for a scalar on the left.
macro_rules! impl_scalar_lhs {
    ($($ty:ty),*) => {$(
        impl<const R: usize> std::ops::Add<&CpuTensor<$ty, R>> for $ty {
            type Output = CpuTensor<$ty, R>;

            fn add(self, rhs: &CpuTensor<$ty, R>) -> Self::Output {
                rhs + self
            }
        }

        impl<const R: usize> std::ops::Mul<&CpuTensor<$ty, R>> for $ty {
            type Output = CpuTensor<$ty, R>;

            fn mul(self, rhs: &CpuTensor<$ty, R>) -> Self::Output {
                rhs * self
            }
        }
    )*};
}

/// `s - t` for a scalar on the left.
macro_rules! impl_signed_lhs {
    ($($ty:ty),*) => {$(
        impl<const R: usize> std::ops::Sub<&CpuTensor<$ty, R>> for $ty {
            type Output = CpuTensor<$ty, R>;

            fn sub(self, rhs: &CpuTensor<$ty, R>) -> Self::Output {
                let mut output = rhs.clone();
                output.sub_from_scalar(self);
                output
            }
        }
    )*};
}

impl_scalar_lhs!(f32, f16, i32, u32);
impl_signed_lhs!(f32, f16, i32);

#[cfg(test)]
mod tests {
    use std::error::Error;

    use half::f16;

    use crate::{
        hal::cpu::{CpuMatrix, CpuTensor, CpuVector},
        loom::{
            activation::Activation,
            tensor::{Tensor, TensorError},
        },
    };

    macro_rules! assert_approx_eq {
        ($a:expr, $b:expr, $eps:expr) => {
            for (index, (x, y)) in $a.iter().zip($b.iter()).enumerate() {
                let (x, y): (f32, f32) = (*x as f32, *y as f32);
                assert!(
                    (x - y).abs() <= $eps * y.abs().max(1.0),
                    "at {index}: {x} != {y}"
                );
            }
        };
    }

    #[test]
    fn test_identities() -> Result<(), Box<dyn Error>> {
        fastrand::seed(42);
        let a = CpuTensor::<f32, 3>::uniform([3, 4, 5], -10.0, 10.0)?;
        assert_eq!(-(-&a), a);
        assert_eq!(a.positive(), a);
        assert_eq!(&a + 0.0, a);
        assert_eq!(&a * 1.0, a);

        let b = CpuTensor::<f32, 3>::uniform([3, 4, 5], -10.0, 10.0)?;
        let mut c = a.clone();
        c += &b;
        c -= &b;
        assert_approx_eq!(c.values(), a.values(), 1e-5);

        let x = CpuVector::from_vec([3], vec![1, -2, 3])?;
        assert_eq!(-x, CpuVector::from_vec([3], vec![-1, 2, -3])?);
        Ok(())
    }

    #[test]
    fn test_scalar_ops() -> Result<(), Box<dyn Error>> {
        let data: Vec<f32> = (0..17).map(|x| x as f32 * 0.5).collect();
        let mut a = CpuVector::from_vec([17], data.clone())?;
        a += 1.5;
        a *= 2.0;
        let reference: Vec<f32> = data.iter().map(|x| (x + 1.5) * 2.0).collect();
        assert_eq!(a.values(), reference);

        let mut a = CpuVector::from_vec([4], vec![5u32, 6, 7, 8])?;
        a += 1;
        a *= 3;
        assert_eq!(a.values(), vec![18, 21, 24, 27]);

        let mut a = CpuVector::full([2], f16::from_f32(1.0))?;
        a -= f16::from_f32(0.5);
        assert_eq!(a.values(), vec![f16::from_f32(0.5); 2]);
        Ok(())
    }

    #[test]
    fn test_tensor_ops() -> Result<(), Box<dyn Error>> {
        let a = CpuMatrix::from_vec([2, 3], vec![1, 2, 3, 4, 5, 6])?;
        let b = CpuMatrix::from_vec([2, 3], vec![6, 5, 4, 3, 2, 1])?;
        assert_eq!((&a + &b).values(), vec![7; 6]);
        assert_eq!((&a * &b).values(), vec![6, 10, 12, 12, 10, 6]);
        assert_eq!((&a - &b).values(), vec![-5, -3, -1, 1, 3, 5]);

        let mut c = a.clone();
        c *= &b;
        c += &a;
        assert_eq!(c.values(), vec![7, 12, 15, 16, 15, 12]);
        Ok(())
    }

    #[test]
    fn test_permuted_operands() -> Result<(), Box<dyn Error>> {
        // `b` holds the transpose of `a` in storage; both are 2x3 logically
        let a = CpuMatrix::from_vec([2, 3], vec![1, 2, 3, 4, 5, 6])?;
        let mut b = CpuMatrix::from_vec([3, 2], vec![10, 40, 20, 50, 30, 60])?;
        b.t();
        assert_eq!(b.values(), vec![10, 20, 30, 40, 50, 60]);

        let c = &a + &b;
        assert_eq!(c.values(), vec![11, 22, 33, 44, 55, 66]);
        let c = &b + &a;
        assert_eq!(c.values(), vec![11, 22, 33, 44, 55, 66]);
        assert_eq!(c.shape(), [2, 3]);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch() -> Result<(), Box<dyn Error>> {
        let mut a = CpuMatrix::<f32>::zeros([2, 3])?;
        let b = CpuMatrix::<f32>::zeros([3, 2])?;
        let before = a.clone();
        assert!(matches!(
            a.try_add_assign(&b),
            Err(TensorError::Shape(x, y)) if x == [2, 3] && y == [3, 2]
        ));
        assert!(matches!(a.try_mul(&b), Err(TensorError::Shape(_, _))));
        assert_eq!(a, before);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "tensor shapes must match")]
    fn test_shape_mismatch_panic() {
        let a = CpuVector::<i32>::zeros([2]).unwrap();
        let b = CpuVector::<i32>::zeros([3]).unwrap();
        let _ = &a + &b;
    }

    #[test]
    fn test_activation() -> Result<(), Box<dyn Error>> {
        let a = CpuVector::from_vec([3], vec![-3.0f32, 0.0, 3.0])?;
        assert_eq!(a.apply(Activation::Relu, false).values(), vec![0.0, 0.0, 3.0]);
        assert_eq!(a.apply(Activation::Relu, true).values(), vec![0.0, 0.0, 1.0]);
        assert_eq!(a.apply(Activation::Sigmoid, false)[1], 0.5);
        assert_eq!(a.apply(Activation::Sigmoid, true)[1], 0.25);
        assert_eq!(a.apply(Activation::Square, true).values(), vec![-6.0, 0.0, 6.0]);
        assert_eq!(a.apply(Activation::Linear, false), a);

        let a = CpuVector::from_vec([2], vec![f16::from_f32(0.0), f16::from_f32(-1.0)])?;
        let b = a.apply(Activation::Sigmoid, false);
        assert_eq!(b[0], f16::from_f32(0.5));
        Ok(())
    }

    #[test]
    fn test_integer_wrap() -> Result<(), Box<dyn Error>> {
        let mut a = CpuVector::full([3], i32::MAX)?;
        a += 1;
        assert_eq!(a.values(), vec![i32::MIN; 3]);

        let mut a = CpuVector::full([2], i32::MIN)?;
        a -= 1;
        assert_eq!(a.values(), vec![i32::MAX; 2]);
        assert_eq!((-&CpuVector::full([1], i32::MIN)?).values(), vec![i32::MIN]);
        a /= -1;
        assert_eq!(a.values(), vec![-i32::MAX; 2]);

        let mut a = CpuVector::from_vec([2], vec![u32::MAX, 3])?;
        a *= 2;
        assert_eq!(a.values(), vec![u32::MAX - 1, 6]);
        let b = CpuVector::from_vec([2], vec![1u32, u32::MAX])?;
        a += &b;
        assert_eq!(a.values(), vec![u32::MAX, 5]);
        Ok(())
    }

    #[test]
    fn test_division() -> Result<(), Box<dyn Error>> {
        let a = CpuVector::from_vec([4], vec![-7, 7, 8, 0])?;
        assert_eq!((&a / 2).values(), vec![-3, 3, 4, 0]);

        let mut b = CpuVector::from_vec([3], vec![1.0f32, -3.0, 0.5])?;
        b /= 4.0;
        assert_eq!(b.values(), vec![0.25, -0.75, 0.125]);

        let before = b.clone();
        assert!(matches!(b.try_div_scalar(0.0), Err(TensorError::DivideByZero)));
        assert_eq!(b, before);
        let mut c = CpuVector::from_vec([1], vec![5u32])?;
        assert!(matches!(c.try_div_scalar(0), Err(TensorError::DivideByZero)));
        Ok(())
    }

    #[test]
    #[should_panic(expected = "divisor must be nonzero")]
    fn test_division_panic() {
        let a = CpuVector::<i32>::full([2], 4).unwrap();
        let _ = &a / 0;
    }

    #[test]
    fn test_scalar_lhs() -> Result<(), Box<dyn Error>> {
        let a = CpuMatrix::from_vec([2, 2], vec![1.0f32, 2.0, 3.0, 4.0])?;
        assert_eq!((10.0f32 - &a).values(), vec![9.0, 8.0, 7.0, 6.0]);
        assert_eq!((&a - 1.0).values(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!((0.5f32 + &a), &a + 0.5);
        assert_eq!((2.0f32 * &a), &a * 2.0);

        let b = CpuVector::from_vec([3], vec![1i32, 2, 3])?;
        assert_eq!((0 - &b).values(), vec![-1, -2, -3]);
        assert_eq!((3u32 * &CpuVector::full([2], 5u32)?).values(), vec![15, 15]);

        let mut at = a.clone();
        at.t();
        assert_eq!((1.0f32 - &at).values(), vec![0.0, -2.0, -1.0, -3.0]);
        Ok(())
    }

    #[test]
    fn test_loss() -> Result<(), Box<dyn Error>> {
        let a = CpuMatrix::from_vec([2, 4], vec![1.0f32, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0])?;
        let b = CpuMatrix::from_vec([2, 4], vec![1.0f32, 0.0, 3.0, 0.0, 1.0, -1.0, 2.0, 0.0])?;
        assert_eq!(
            a.loss(&b)?.values(),
            vec![0.0, 1.0, 0.0, 4.0, 0.25, 0.25, 1.0, 0.0]
        );
        assert_eq!(
            a.d_loss(&b)?.values(),
            vec![0.0, 1.0, 0.0, 2.0, -0.5, 0.5, -1.0, 0.0]
        );

        let c = CpuMatrix::<f32>::zeros([4, 2])?;
        assert!(matches!(a.loss(&c), Err(TensorError::Shape(_, _))));
        Ok(())
    }
}
