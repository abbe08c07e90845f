use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout error: shape {0:?} contains a zero-sized dimension")]
    ZeroDim(Vec<usize>),
    #[error("layout error: axis {0} out of range for rank {1}")]
    AxisRange(usize, usize),
    #[error("layout error: duplicate axis {0} in {1:?}")]
    DuplicateAxis(usize, Vec<usize>),
}

/// Physical storage shape paired with a logical axis permutation.
///
/// Logical axis `i` is stored as physical axis `axes[i]`. Storage is row-major over the
/// physical shape, so transposition never moves data: it only rewrites `axes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layout<const R: usize> {
    shape: [usize; R],
    axes: [usize; R],
}

impl<const R: usize> Layout<R> {
    /// Creates a contiguous layout. Every dimension must be positive.
    pub fn new(shape: [usize; R]) -> Result<Self, LayoutError> {
        if shape.contains(&0) {
            return Err(LayoutError::ZeroDim(shape.to_vec()));
        }
        let axes = std::array::from_fn(|index| index);
        Ok(Self { shape, axes })
    }

    #[inline]
    pub const fn rank(&self) -> usize {
        R
    }

    /// Shape in logical axis order.
    #[inline]
    pub fn shape(&self) -> [usize; R] {
        std::array::from_fn(|index| self.shape[self.axes[index]])
    }

    /// Shape in storage order.
    #[inline]
    pub fn physical_shape(&self) -> [usize; R] {
        self.shape
    }

    #[inline]
    pub fn axes(&self) -> [usize; R] {
        self.axes
    }

    /// Number of elements. The empty product of a rank-0 layout is 1.
    #[inline]
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns `true` if logical and physical orders coincide.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.axes.iter().enumerate().all(|(index, &axis)| index == axis)
    }

    /// Returns a contiguous layout with the same logical shape.
    #[inline]
    pub fn contiguous(&self) -> Self {
        let shape = self.shape();
        let axes = std::array::from_fn(|index| index);
        Self { shape, axes }
    }

    /// Row-major strides of the storage, in storage order.
    pub fn physical_strides(&self) -> [usize; R] {
        let mut strides = [1; R];
        for index in (0..R.saturating_sub(1)).rev() {
            strides[index] = strides[index + 1] * self.shape[index + 1];
        }
        strides
    }

    /// Storage strides in logical axis order.
    pub fn strides(&self) -> [usize; R] {
        let strides = self.physical_strides();
        std::array::from_fn(|index| strides[self.axes[index]])
    }

    /// Storage offset of a logical coordinate. Returns `None` if out of bounds.
    pub fn offset(&self, index: [usize; R]) -> Option<usize> {
        let shape = self.shape();
        if index.iter().zip(shape.iter()).any(|(&x, &n)| x >= n) {
            return None;
        }
        let offset = index
            .iter()
            .zip(self.strides().iter())
            .map(|(&x, &stride)| x * stride)
            .sum();
        Some(offset)
    }

    /// Converts a logical row-major flat index into a logical coordinate.
    pub fn unravel(&self, flat: usize) -> Option<[usize; R]> {
        if flat >= self.size() {
            return None;
        }
        let shape = self.shape();
        let mut index = [0; R];
        let mut rest = flat;
        for axis in (0..R).rev() {
            index[axis] = rest % shape[axis];
            rest /= shape[axis];
        }
        Some(index)
    }

    /// Checks that `axes` is a permutation of `0..R`.
    fn check_permutation(axes: &[usize; R]) -> Result<(), LayoutError> {
        let mut used = [false; R];
        for &axis in axes {
            if axis >= R {
                return Err(LayoutError::AxisRange(axis, R));
            }
            if used[axis] {
                return Err(LayoutError::DuplicateAxis(axis, axes.to_vec()));
            }
            used[axis] = true;
        }
        Ok(())
    }

    /// Permutes the logical axes: logical axis `i` becomes the current logical axis `axes[i]`.
    ///
    /// The permutation is validated before anything is mutated.
    pub fn transpose(&mut self, axes: [usize; R]) -> Result<(), LayoutError> {
        Self::check_permutation(&axes)?;
        let current = self.axes;
        self.axes = std::array::from_fn(|index| current[axes[index]]);
        Ok(())
    }

    /// Swaps two logical axes.
    pub fn swap_axes(&mut self, a: usize, b: usize) -> Result<(), LayoutError> {
        for axis in [a, b] {
            if axis >= R {
                return Err(LayoutError::AxisRange(axis, R));
            }
        }
        if a == b {
            return Err(LayoutError::DuplicateAxis(a, vec![a, b]));
        }
        self.axes.swap(a, b);
        Ok(())
    }

    /// Swaps the last two logical axes.
    pub fn t(&mut self) {
        const { assert!(R >= 2, "can't swap the only axis") };
        self.axes.swap(R - 2, R - 1);
    }

    /// Two layouts are the same shape iff their logical shapes agree.
    #[inline]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.shape() == other.shape()
    }

    /// Strides into `other`'s storage, ordered by `self`'s physical axes.
    ///
    /// Walking `self`'s storage row-major with these strides visits the element of `other`
    /// at the same logical coordinate. Both layouts must be the same shape.
    pub fn gather_strides(&self, other: &Self) -> [usize; R] {
        let strides = other.strides();
        let mut gather = [0; R];
        for (logical, &physical) in self.axes.iter().enumerate() {
            gather[physical] = strides[logical];
        }
        gather
    }

    /// Storage offsets of every element, in logical row-major order.
    pub fn offsets(&self) -> Vec<usize> {
        offsets(self.shape(), self.strides())
    }
}

impl<const R: usize> std::fmt::Display for Layout<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.shape().iter().format(", "))
    }
}

/// Visits `shape` row-major and returns `Σ index[i] * strides[i]` for every coordinate.
pub fn offsets<const R: usize>(shape: [usize; R], strides: [usize; R]) -> Vec<usize> {
    let size = shape.iter().product();
    let mut output = Vec::with_capacity(size);
    let mut index = [0; R];
    let mut offset = 0;
    for _ in 0..size {
        output.push(offset);
        for axis in (0..R).rev() {
            index[axis] += 1;
            offset += strides[axis];
            if index[axis] < shape[axis] {
                break;
            }
            offset -= strides[axis] * shape[axis];
            index[axis] = 0;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{Layout, LayoutError, offsets};

    #[test]
    fn test_zero_dim() {
        assert_eq!(
            Layout::new([0, 3]),
            Err(LayoutError::ZeroDim(vec![0, 3]))
        );
        assert!(Layout::new([]).is_ok());
        assert_eq!(Layout::<0>::new([]).unwrap().size(), 1);
    }

    #[test]
    fn test_transpose() -> Result<(), LayoutError> {
        let mut layout = Layout::new([2, 3, 4])?;
        assert_eq!(layout.size(), 24);
        assert_eq!(layout.strides(), [12, 4, 1]);

        layout.transpose([2, 0, 1])?;
        assert_eq!(layout.shape(), [4, 2, 3]);
        assert_eq!(layout.physical_shape(), [2, 3, 4]);
        assert_eq!(layout.strides(), [1, 12, 4]);
        assert_eq!(layout.size(), 24);

        // the inverse permutation restores the original order
        layout.transpose([1, 2, 0])?;
        assert_eq!(layout.shape(), [2, 3, 4]);
        assert!(layout.is_contiguous());

        layout.swap_axes(0, 2)?;
        layout.swap_axes(0, 2)?;
        assert_eq!(layout.shape(), [2, 3, 4]);

        layout.t();
        assert_eq!(layout.shape(), [2, 4, 3]);
        Ok(())
    }

    #[test]
    fn test_invalid_axes() -> Result<(), LayoutError> {
        let mut layout = Layout::new([2, 3])?;
        assert_eq!(layout.transpose([0, 2]), Err(LayoutError::AxisRange(2, 2)));
        assert_eq!(
            layout.transpose([1, 1]),
            Err(LayoutError::DuplicateAxis(1, vec![1, 1]))
        );
        assert!(matches!(
            layout.swap_axes(1, 1),
            Err(LayoutError::DuplicateAxis(1, _))
        ));
        assert_eq!(layout.swap_axes(0, 5), Err(LayoutError::AxisRange(5, 2)));
        // failed calls leave the permutation untouched
        assert_eq!(layout.axes(), [0, 1]);
        Ok(())
    }

    #[test]
    fn test_offsets() -> Result<(), LayoutError> {
        let mut layout = Layout::new([2, 3])?;
        assert_eq!(layout.offsets(), vec![0, 1, 2, 3, 4, 5]);
        layout.t();
        assert_eq!(layout.offsets(), vec![0, 3, 1, 4, 2, 5]);
        assert_eq!(layout.offset([2, 1]), Some(5));
        assert_eq!(layout.offset([1, 2]), None);
        assert_eq!(layout.unravel(3), Some([1, 1]));
        assert_eq!(layout.unravel(6), None);

        assert_eq!(offsets([], []), vec![0]);
        Ok(())
    }

    #[test]
    fn test_gather_strides() -> Result<(), LayoutError> {
        let a = Layout::new([3, 2])?;
        let mut b = Layout::new([2, 3])?;
        b.t();
        assert!(a.same_shape(&b));

        // walking `a`'s storage visits `b` at matching logical coordinates
        let gather = offsets(a.physical_shape(), a.gather_strides(&b));
        assert_eq!(gather, b.offsets());
        Ok(())
    }
}
