//! Core tensor data structures.
//!
//! # Core Tensor Utilities
//!
//! This module defines how dense N-dimensional arrays are represented and what
//! scalar types the kernels accept.
//!
//! It supports:
//! - Construction of N-dimensional tensors with shape and row-major data layout
//! - Checked construction returning [`OpError`] instead of panicking
//! - `WithGrad` wrappers pairing a value with its gradient
//! - Compile-time tensor literals through the `tensor!` macro
//!
//! ## Design Highlights
//! - Tensors are strongly typed: `Tensor<T>` for any [`Element`] (`f32`, `f64`, `i32`, `i64`)
//! - Shape is stored as a `Vec<usize>` and enforced at construction
//! - A rank-0 tensor (`shape == []`) holds exactly one element
//!
//! ## Example
//!
//! ```rust
//! use eltwise_kernels::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use crate::error::{OpError, Result};
use core::fmt::Debug;
use core::ops::{Add, Div, Mul, Neg, Sub};

/// Scalar types the element-wise kernels operate on.
///
/// Kernels combine elements through the `wrapping_*` methods. Floats use the
/// plain operators; integers wrap on overflow in every build profile instead of
/// panicking in debug builds. Integer division by zero still panics exactly
/// like the primitive operator does.
pub trait Element:
    Copy
    + Default
    + PartialEq
    + Debug
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// Additive identity.
    const ZERO: Self;
    /// Multiplicative identity.
    const ONE: Self;

    /// Views the buffer as `f32` when `Self` is `f32`.
    ///
    /// Only `f32` buffers are handed to the GPU backend.
    fn as_f32_slice(_data: &[Self]) -> Option<&[f32]> {
        None
    }

    /// Inverse of [`Element::as_f32_slice`].
    fn from_f32_vec(_data: Vec<f32>) -> Option<Vec<Self>> {
        None
    }

    #[inline]
    fn wrapping_add(self, rhs: Self) -> Self {
        self + rhs
    }

    #[inline]
    fn wrapping_sub(self, rhs: Self) -> Self {
        self - rhs
    }

    #[inline]
    fn wrapping_mul(self, rhs: Self) -> Self {
        self * rhs
    }

    #[inline]
    fn wrapping_div(self, rhs: Self) -> Self {
        self / rhs
    }

    #[inline]
    fn wrapping_neg(self) -> Self {
        -self
    }
}

impl Element for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    fn as_f32_slice(data: &[Self]) -> Option<&[f32]> {
        Some(data)
    }

    fn from_f32_vec(data: Vec<f32>) -> Option<Vec<Self>> {
        Some(data)
    }
}

impl Element for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
}

macro_rules! impl_integer_element {
    ($($t:ty),*) => {$(
        impl Element for $t {
            const ZERO: Self = 0;
            const ONE: Self = 1;

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }

            #[inline]
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$t>::wrapping_mul(self, rhs)
            }

            #[inline]
            fn wrapping_div(self, rhs: Self) -> Self {
                <$t>::wrapping_div(self, rhs)
            }

            #[inline]
            fn wrapping_neg(self) -> Self {
                <$t>::wrapping_neg(self)
            }
        }
    )*};
}

impl_integer_element!(i32, i64);

/// Number of elements described by `shape`; `1` for a rank-0 shape.
#[must_use]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - All elements must be the same type (`T`).
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            numel(&shape),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Creates a new tensor, reporting a length mismatch as an error.
    ///
    /// # Errors
    /// [`OpError::LengthMismatch`] if `data` does not fill `shape` exactly.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        OpError::check_len("tensor data", numel(&shape), data.len())?;
        Ok(Self { shape, data })
    }

    /// Number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements (some dimension is zero).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

impl<T: Element> Tensor<T> {
    /// A zero-filled tensor of the given shape.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let data = vec![T::ZERO; numel(&shape)];
        Self { shape, data }
    }

    /// A zero-filled tensor with the shape of `self`.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }

    /// A rank-0 tensor holding `value`.
    pub fn scalar(value: T) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// A tensor of the given shape with every element set to `value`.
    pub fn full(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let data = vec![value; numel(&shape)];
        Self { shape, data }
    }
}

/// A container for tracking gradients of values (used in autograd).
///
/// Typically used as `WithGrad<Tensor<f32>>`.
#[derive(Debug, Clone)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

impl<T: Element> WithGrad<Tensor<T>> {
    /// Wraps `value` with a zeroed gradient of the same shape.
    pub fn new(value: Tensor<T>) -> Self {
        let grad = value.zeros_like();
        Self { value, grad }
    }

    /// Adds `delta` into the stored gradient.
    ///
    /// # Errors
    /// [`OpError::LengthMismatch`] if `delta` does not match the gradient's size.
    pub fn accumulate(&mut self, delta: &Tensor<T>) -> Result<()> {
        OpError::check_len("gradient", self.grad.len(), delta.len())?;
        for (g, &d) in self.grad.data.iter_mut().zip(&delta.data) {
            *g = g.wrapping_add(d);
        }
        Ok(())
    }

    /// Resets the stored gradient to zero.
    pub fn zero_grad(&mut self) {
        self.grad.data.iter_mut().for_each(|g| *g = T::ZERO);
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use eltwise_kernels::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_rejects_bad_length() {
        let err = Tensor::try_new(vec![2, 2], vec![1.0f32, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            OpError::LengthMismatch {
                what: "tensor data",
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn scalar_has_rank_zero() {
        let t = Tensor::scalar(3i64);
        assert_eq!(t.rank(), 0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn accumulate_adds_in_place() {
        let mut w = WithGrad::new(tensor!([1.0, 2.0]));
        w.accumulate(&Tensor::new(vec![2], vec![0.5, -1.0])).unwrap();
        w.accumulate(&Tensor::new(vec![2], vec![0.5, -1.0])).unwrap();
        assert_eq!(w.grad.data, vec![1.0, -2.0]);
        w.zero_grad();
        assert_eq!(w.grad.data, vec![0.0, 0.0]);
    }
}
