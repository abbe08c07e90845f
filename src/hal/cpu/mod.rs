//! Host-resident tensors. Every operator runs to completion on the calling thread.

use std::ops::{Index, IndexMut};

use crate::loom::{
    layout::Layout,
    num::Scalar,
    tensor::{Tensor, TensorError},
};

pub mod matmul;
pub mod ops;

/// A tensor of rank `R` stored in host memory.
///
/// `data` is row-major over the layout's physical shape; indexing resolves logical
/// coordinates through the axis permutation.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor<T: Scalar, const R: usize> {
    layout: Layout<R>,
    data: Vec<T>,
}

pub type CpuScalar<T> = CpuTensor<T, 0>;
pub type CpuVector<T> = CpuTensor<T, 1>;
pub type CpuMatrix<T> = CpuTensor<T, 2>;

impl<T: Scalar, const R: usize> CpuTensor<T, R> {
    /// Creates a tensor with its elements set to zero.
    pub fn empty(shape: [usize; R]) -> Result<Self, TensorError> {
        Self::full(shape, T::zero())
    }

    #[inline]
    pub fn zeros(shape: [usize; R]) -> Result<Self, TensorError> {
        Self::full(shape, T::zero())
    }

    pub fn full(shape: [usize; R], value: T) -> Result<Self, TensorError> {
        let layout = Layout::new(shape)?;
        let data = vec![value; layout.size()];
        Ok(Self { layout, data })
    }

    /// Creates a tensor from elements in row-major order.
    pub fn from_vec(shape: [usize; R], data: Vec<T>) -> Result<Self, TensorError> {
        let layout = Layout::new(shape)?;
        if data.len() != layout.size() {
            return Err(TensorError::Create(shape.to_vec(), layout.size(), data.len()));
        }
        Ok(Self { layout, data })
    }

    /// Creates a tensor with elements drawn independently and uniformly from `[min, max]`.
    pub fn uniform(shape: [usize; R], min: T, max: T) -> Result<Self, TensorError> {
        Self::uniform_with(shape, min, max, &mut fastrand::Rng::new())
    }

    /// Same as [`uniform`](Self::uniform), drawing from `rng`.
    pub fn uniform_with(
        shape: [usize; R],
        min: T,
        max: T,
        rng: &mut fastrand::Rng,
    ) -> Result<Self, TensorError> {
        let layout = Layout::new(shape)?;
        if min > max {
            return Err(TensorError::Range(min.to_string(), max.to_string()));
        }
        let data = (0..layout.size())
            .map(|_| T::sample(rng, min, max))
            .collect();
        Ok(Self { layout, data })
    }

    /// Elements in storage order.
    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn get(&self, index: [usize; R]) -> Option<&T> {
        self.layout.offset(index).map(|offset| &self.data[offset])
    }

    pub fn get_mut(&mut self, index: [usize; R]) -> Option<&mut T> {
        self.layout.offset(index).map(|offset| &mut self.data[offset])
    }

    /// Iterates over the elements in logical row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.layout
            .offsets()
            .into_iter()
            .map(|offset| &self.data[offset])
    }

    /// Elements in logical row-major order.
    pub fn values(&self) -> Vec<T> {
        match self.layout.is_contiguous() {
            true => self.data.clone(),
            false => self.iter().copied().collect(),
        }
    }

    /// Moves the data into logical order, so the layout becomes contiguous.
    pub fn into_contiguous(self) -> Self {
        match self.layout.is_contiguous() {
            true => self,
            false => {
                let data = self.values();
                let layout = self.layout.contiguous();
                Self { layout, data }
            }
        }
    }

    #[inline]
    fn flat_offset(&self, index: usize) -> Option<usize> {
        self.layout
            .unravel(index)
            .and_then(|index| self.layout.offset(index))
    }
}

impl<T: Scalar, const R: usize> Tensor<T, R> for CpuTensor<T, R> {
    #[inline]
    fn layout(&self) -> Layout<R> {
        self.layout
    }

    #[inline]
    fn layout_mut(&mut self) -> &mut Layout<R> {
        &mut self.layout
    }

    async fn to_vec(&self) -> Result<Vec<T>, TensorError> {
        Ok(self.values())
    }
}

impl<T: Scalar, const R: usize> Index<[usize; R]> for CpuTensor<T, R> {
    type Output = T;

    fn index(&self, index: [usize; R]) -> &Self::Output {
        match self.layout.offset(index) {
            Some(offset) => &self.data[offset],
            None => panic!("index {index:?} out of bounds for shape {}", self.layout),
        }
    }
}

impl<T: Scalar, const R: usize> IndexMut<[usize; R]> for CpuTensor<T, R> {
    fn index_mut(&mut self, index: [usize; R]) -> &mut Self::Output {
        match self.layout.offset(index) {
            Some(offset) => &mut self.data[offset],
            None => panic!("index {index:?} out of bounds for shape {}", self.layout),
        }
    }
}

/// Indexes by the logical row-major position.
impl<T: Scalar, const R: usize> Index<usize> for CpuTensor<T, R> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        match self.flat_offset(index) {
            Some(offset) => &self.data[offset],
            None => panic!("index {index} out of bounds for size {}", self.layout.size()),
        }
    }
}

impl<T: Scalar, const R: usize> IndexMut<usize> for CpuTensor<T, R> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        match self.flat_offset(index) {
            Some(offset) => &mut self.data[offset],
            None => panic!("index {index} out of bounds for size {}", self.layout.size()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::{CpuMatrix, CpuScalar, CpuTensor, CpuVector};
    use crate::loom::{
        layout::LayoutError,
        tensor::{Tensor, TensorError},
    };

    #[tokio::test]
    async fn test_create() -> Result<(), Box<dyn Error>> {
        let a = CpuMatrix::<f32>::empty([2, 3])?;
        assert_eq!(a.size(), 6);
        assert!(a.iter().all(|&x| x == 0.0));

        let a = CpuVector::full([4], 7i32)?;
        assert_eq!(a.to_vec().await?, vec![7; 4]);

        let a = CpuScalar::from_vec([], vec![3.5f32])?;
        assert_eq!(a[[]], 3.5);
        assert_eq!(a.to_string().await?, "Scalar<f32>: 3.5");

        assert!(matches!(
            CpuMatrix::<f32>::zeros([0, 3]),
            Err(TensorError::Layout(LayoutError::ZeroDim(_)))
        ));
        assert!(matches!(
            CpuMatrix::from_vec([2, 2], vec![1u32, 2, 3]),
            Err(TensorError::Create(_, 4, 3))
        ));
        Ok(())
    }

    #[test]
    fn test_uniform() -> Result<(), Box<dyn Error>> {
        let mut rng = fastrand::Rng::with_seed(7);
        let a = CpuTensor::<f32, 3>::uniform_with([4, 5, 6], -1.0, 1.0, &mut rng)?;
        assert!(a.iter().all(|x| (-1.0..=1.0).contains(x)));

        let a = CpuMatrix::<i32>::uniform([8, 8], 3, 5)?;
        assert!(a.iter().all(|x| (3..=5).contains(x)));

        let mut rng = fastrand::Rng::with_seed(7);
        let b = CpuTensor::<f32, 3>::uniform_with([4, 5, 6], -1.0, 1.0, &mut rng)?;
        let mut rng = fastrand::Rng::with_seed(7);
        let c = CpuTensor::<f32, 3>::uniform_with([4, 5, 6], -1.0, 1.0, &mut rng)?;
        assert_eq!(b, c);

        assert!(matches!(
            CpuVector::<f32>::uniform([3], 1.0, 0.0),
            Err(TensorError::Range(_, _))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_transpose() -> Result<(), Box<dyn Error>> {
        let mut a = CpuMatrix::from_vec([2, 3], vec![1, 2, 3, 4, 5, 6])?;
        a.t();
        assert_eq!(a.shape(), [3, 2]);
        assert_eq!(a.size(), 6);
        assert_eq!(a[[2, 1]], 6);
        assert_eq!(a[[0, 1]], 4);
        assert_eq!(a[1], 4);
        assert_eq!(a.get([2, 0]), Some(&3));
        assert_eq!(a.get([0, 2]), None);
        assert_eq!(a.to_vec().await?, vec![1, 4, 2, 5, 3, 6]);
        assert_eq!(
            a.to_string().await?,
            "Matrix<i32>(3x2):\n  [1, 4]\n  [2, 5]\n  [3, 6]"
        );

        a[[1, 0]] = 20;
        a[5] = 60;
        assert_eq!(a.data(), &[1, 20, 3, 4, 5, 60]);

        assert!(matches!(
            a.transpose([0, 0]),
            Err(TensorError::Layout(LayoutError::DuplicateAxis(0, _)))
        ));
        assert!(matches!(
            a.swap_axes(0, 2),
            Err(TensorError::Layout(LayoutError::AxisRange(2, 2)))
        ));
        assert_eq!(a.shape(), [3, 2]);

        let a = a.into_contiguous();
        assert_eq!(a.axes(), [0, 1]);
        assert_eq!(a.data(), &[1, 4, 20, 5, 3, 60]);
        Ok(())
    }

    #[test]
    fn test_transpose_rank3() -> Result<(), Box<dyn Error>> {
        let data: Vec<i32> = (0..24).collect();
        let mut a = CpuTensor::from_vec([2, 3, 4], data)?;
        a.transpose([2, 0, 1])?;
        assert_eq!(a.shape(), [4, 2, 3]);
        assert_eq!(a[[3, 1, 2]], 23);
        assert_eq!(a[[1, 0, 2]], 9);
        a.transpose([1, 2, 0])?;
        assert_eq!(a.shape(), [2, 3, 4]);
        assert_eq!(a.values(), (0..24).collect::<Vec<_>>());
        Ok(())
    }
}
