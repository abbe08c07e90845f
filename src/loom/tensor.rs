use itertools::Itertools;
use thiserror::Error;

use super::{
    device::DeviceError,
    layout::{Layout, LayoutError},
    num::Scalar,
};

#[derive(Debug, Error)]
pub enum TensorError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("tensor creation error: shape {0:?} holds {1} elements but data has {2}")]
    Create(Vec<usize>, usize, usize),
    #[error("tensor shape error: element-wise operands of shape {0:?} and {1:?} differ")]
    Shape(Vec<usize>, Vec<usize>),
    #[error("tensor contraction error: can't contract shape {0:?} with {1:?}")]
    Contract(Vec<usize>, Vec<usize>),
    #[error("tensor range error: min {0} is greater than max {1}")]
    Range(String, String),
    #[error("tensor rank error: rank {0} exceeds the device limit {1}")]
    Rank(usize, usize),
    #[error("tensor bias error: bias of length {0} doesn't match {1} output columns")]
    Bias(usize, usize),
    #[error("tensor division error: divisor is zero")]
    DivideByZero,
    #[error("tensor capacity error: {0} bytes exceed the device binding limit {1}")]
    Capacity(usize, u32),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// The contract shared by host and device tensors of rank `R`.
///
/// Shape queries never synchronize. Reading the contents back is the only point where the
/// caller waits for pending operations.
pub trait Tensor<T: Scalar, const R: usize>: Sized {
    fn layout(&self) -> Layout<R>;

    fn layout_mut(&mut self) -> &mut Layout<R>;

    /// Shape in logical axis order.
    #[inline]
    fn shape(&self) -> [usize; R] {
        self.layout().shape()
    }

    #[inline]
    fn axes(&self) -> [usize; R] {
        self.layout().axes()
    }

    #[inline]
    fn size(&self) -> usize {
        self.layout().size()
    }

    /// Permutes the logical axes without moving data. See [`Layout::transpose`].
    fn transpose(&mut self, axes: [usize; R]) -> Result<(), TensorError> {
        self.layout_mut().transpose(axes)?;
        Ok(())
    }

    fn swap_axes(&mut self, a: usize, b: usize) -> Result<(), TensorError> {
        self.layout_mut().swap_axes(a, b)?;
        Ok(())
    }

    /// Swaps the last two axes.
    #[inline]
    fn t(&mut self) {
        self.layout_mut().t();
    }

    /// Reads the elements back in logical row-major order.
    async fn to_vec(&self) -> Result<Vec<T>, TensorError>;

    async fn to_string(&self) -> Result<String, TensorError> {
        let data = self.to_vec().await?;
        Ok(format(self.shape(), &data))
    }

    async fn print(&self) -> Result<(), TensorError> {
        println!("{}", <Self as Tensor<T, R>>::to_string(self).await?);
        Ok(())
    }
}

/// Elements shown for tensors of rank 3 and above.
const PREVIEW: usize = 10;

/// Renders elements given in logical row-major order.
pub fn format<T: Scalar, const R: usize>(shape: [usize; R], data: &[T]) -> String {
    let name = T::DATA_TYPE;
    match shape[..] {
        [] => match data.first() {
            Some(x) => format!("Scalar<{name}>: {x}"),
            None => format!("Scalar<{name}>: -"),
        },
        [n] => format!("Vector<{name}>({n}): [{}]", data.iter().format(", ")),
        [m, n] => {
            let rows = data
                .chunks(n)
                .take(m)
                .map(|row| format!("\n  [{}]", row.iter().format(", ")))
                .join("");
            format!("Matrix<{name}>({m}x{n}):{rows}")
        }
        _ => {
            let shape = shape.iter().format("x");
            let preview = data.iter().take(PREVIEW).format(", ");
            let more = match data.len() > PREVIEW {
                true => ", ...",
                false => "",
            };
            format!("Tensor{R}D<{name}>[{shape}]: [{preview}{more}]")
        }
    }
}
