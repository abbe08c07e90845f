use std::{
    fmt::{Debug, Display},
    ops::{Add, Mul, Neg, Sub},
};

use bytemuck::Pod;
use derive_more::Display;
use half::f16;
use num_traits::{WrappingAdd, WrappingMul, WrappingNeg, WrappingSub};

/// Element type tag of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    #[display("f32")]
    F32,
    #[display("f16")]
    F16,
    #[display("i32")]
    I32,
    #[display("u32")]
    U32,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
            DataType::I32 => 4,
            DataType::U32 => 4,
        }
    }

    /// Returns `true` if negation is defined for the type.
    pub const fn is_signed(self) -> bool {
        !matches!(self, DataType::U32)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F16)
    }

    /// All supported element types.
    pub const ALL: [DataType; 4] = [DataType::F32, DataType::F16, DataType::I32, DataType::U32];
}

pub trait Zero {
    fn zero() -> Self;
}

impl Zero for f32 {
    fn zero() -> Self {
        0.0
    }
}

impl Zero for f16 {
    fn zero() -> Self {
        Self::ZERO
    }
}

impl Zero for i32 {
    fn zero() -> Self {
        0
    }
}

impl Zero for u32 {
    fn zero() -> Self {
        0
    }
}

pub trait One {
    fn one() -> Self;
}

impl One for f32 {
    fn one() -> Self {
        1.0
    }
}

impl One for f16 {
    fn one() -> Self {
        Self::ONE
    }
}

impl One for i32 {
    fn one() -> Self {
        1
    }
}

impl One for u32 {
    fn one() -> Self {
        1
    }
}

/// A tensor element: plain data with addition and multiplication.
///
/// The `wrapping_*` operations are the ones the host loops use. Integers wrap around on
/// overflow as the device kernels do; floats use plain IEEE arithmetic.
pub trait Scalar:
    Sized
    + Pod
    + Zero
    + One
    + Debug
    + Display
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Mul<Output = Self>
    + Send
    + Sync
    + 'static
{
    const DATA_TYPE: DataType;

    /// Draws a value uniformly from `[min, max]`.
    fn sample(rng: &mut fastrand::Rng, min: Self, max: Self) -> Self;

    fn wrapping_add(self, rhs: Self) -> Self;

    fn wrapping_mul(self, rhs: Self) -> Self;

    /// Quotient, truncated toward zero for integers. `rhs` must be nonzero.
    fn wrapping_div(self, rhs: Self) -> Self;
}

/// Elements with a sign flip.
pub trait Signed: Scalar + Neg<Output = Self> + Sub<Output = Self> {
    fn wrapping_sub(self, rhs: Self) -> Self;

    fn wrapping_neg(self) -> Self;
}

/// Floating-point elements. Activations are computed through `f32`.
pub trait Float: Signed {
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

macro_rules! impl_float_arith {
    ($ty:ty) => {
        impl Signed for $ty {
            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                self - rhs
            }

            #[inline]
            fn wrapping_neg(self) -> Self {
                -self
            }
        }
    };
}

macro_rules! float_scalar_ops {
    () => {
        #[inline]
        fn wrapping_add(self, rhs: Self) -> Self {
            self + rhs
        }

        #[inline]
        fn wrapping_mul(self, rhs: Self) -> Self {
            self * rhs
        }

        #[inline]
        fn wrapping_div(self, rhs: Self) -> Self {
            self / rhs
        }
    };
}

macro_rules! int_scalar_ops {
    ($ty:ty) => {
        #[inline]
        fn wrapping_add(self, rhs: Self) -> Self {
            WrappingAdd::wrapping_add(&self, &rhs)
        }

        #[inline]
        fn wrapping_mul(self, rhs: Self) -> Self {
            WrappingMul::wrapping_mul(&self, &rhs)
        }

        #[inline]
        fn wrapping_div(self, rhs: Self) -> Self {
            <$ty>::wrapping_div(self, rhs)
        }
    };
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn sample(rng: &mut fastrand::Rng, min: Self, max: Self) -> Self {
        min + (max - min) * rng.f32()
    }

    float_scalar_ops!();
}

impl Scalar for f16 {
    const DATA_TYPE: DataType = DataType::F16;

    fn sample(rng: &mut fastrand::Rng, min: Self, max: Self) -> Self {
        let (min, max) = (min.to_f32(), max.to_f32());
        f16::from_f32(min + (max - min) * rng.f32())
    }

    float_scalar_ops!();
}

impl Scalar for i32 {
    const DATA_TYPE: DataType = DataType::I32;

    fn sample(rng: &mut fastrand::Rng, min: Self, max: Self) -> Self {
        rng.i32(min..=max)
    }

    int_scalar_ops!(i32);
}

impl Scalar for u32 {
    const DATA_TYPE: DataType = DataType::U32;

    fn sample(rng: &mut fastrand::Rng, min: Self, max: Self) -> Self {
        rng.u32(min..=max)
    }

    int_scalar_ops!(u32);
}

impl_float_arith!(f32);
impl_float_arith!(f16);

impl Signed for i32 {
    #[inline]
    fn wrapping_sub(self, rhs: Self) -> Self {
        WrappingSub::wrapping_sub(&self, &rhs)
    }

    #[inline]
    fn wrapping_neg(self) -> Self {
        WrappingNeg::wrapping_neg(&self)
    }
}

impl Float for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Float for f16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::{DataType, Scalar, Signed};

    #[test]
    fn test_sample_range() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..256 {
            let x = f32::sample(&mut rng, -2.0, 3.0);
            assert!((-2.0..=3.0).contains(&x));
            let x = i32::sample(&mut rng, -5, 5);
            assert!((-5..=5).contains(&x));
            let x = u32::sample(&mut rng, 7, 7);
            assert_eq!(x, 7);
            let x = f16::sample(&mut rng, f16::from_f32(0.0), f16::from_f32(1.0));
            assert!(x.to_f32() >= 0.0 && x.to_f32() <= 1.0);
        }
    }

    #[test]
    fn test_data_type() {
        assert_eq!(DataType::F16.to_string(), "f16");
        assert_eq!(DataType::F16.size(), 2);
        assert!(!DataType::U32.is_signed());
        assert!(DataType::I32.is_signed() && !DataType::I32.is_float());
    }

    #[test]
    fn test_wrapping() {
        assert_eq!(Scalar::wrapping_add(i32::MAX, 1), i32::MIN);
        assert_eq!(Scalar::wrapping_mul(u32::MAX, 2), u32::MAX - 1);
        assert_eq!(Scalar::wrapping_div(i32::MIN, -1), i32::MIN);
        assert_eq!(Scalar::wrapping_div(-7i32, 2), -3);
        assert_eq!(Signed::wrapping_neg(i32::MIN), i32::MIN);
        assert_eq!(Signed::wrapping_sub(0i32, i32::MIN), i32::MIN);
        assert_eq!(Scalar::wrapping_div(1.0f32, 4.0), 0.25);
    }
}
