//! Differentiable element-wise operations.
//!
//! # Backpropagation Primitives
//!
//! Broadcasting binary operators with built-in autograd support.
//!
//! **Key Features:**
//! - **Subtraction:** `x - y`, `dX = dOut`, `dY = -Σ dOut` over broadcast axes.
//! - **Addition, Multiplication, Division:** the same execution model with their own derivatives.
//! - **Broadcasting:** `y` is aligned inside `x` at `axis` (`-1` for trailing alignment).
//!
//! ## Autograd Pattern
//!
//! Each operation follows a simple pattern:
//! 1. **Inputs** are references to `WithGrad<Tensor<T>>`.
//! 2. **Forward Pass** computes an output tensor shaped like `x`.
//! 3. **Backward Pass** returns a closure capturing only what the derivative needs.
//! 4. **Gradient Application** uses [`WithGrad::accumulate`] to update the wrappers.
//!
//! ## Usage Guidelines
//!
//! - Shape mismatches are reported as [`OpError`](crate::error::OpError), never panics.
//! - The backward closures implement `Fn`, allowing multiple invocations.
//! - The broadcast plan is recomputed on every forward and backward call.
//!
//! # Example
//! ```rust
//! use eltwise_kernels::{tensor, tensors::WithGrad, backprop::sub};
//!
//! let x = WithGrad::new(tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
//! let y = WithGrad::new(tensor!([1.0, 1.0, 1.0]));
//! let (out, back) = sub(&x, &y, -1).unwrap();
//! assert_eq!(out.data, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
//!
//! let (dx, dy) = back(&tensor!([[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]])).unwrap();
//! assert_eq!(dx.data, vec![1.0; 6]);
//! assert_eq!(dy.data, vec![-2.0, -2.0, -2.0]);
//! ```

use crate::error::Result;
use crate::ops::dispatch;
use crate::ops::functor::{AddOp, BinaryGrad, DivOp, MulOp, SubOp};
use crate::tensors::{Element, Tensor, WithGrad};

/// Backward closure of a binary operator: `dL/dOut ↦ (dL/dX, dL/dY)`.
pub type BinaryBackFn<'a, T> = Box<dyn Fn(&Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> + 'a>;

fn binary<'a, T, O>(
    op: O,
    a: &'a WithGrad<Tensor<T>>,
    b: &'a WithGrad<Tensor<T>>,
    axis: i64,
) -> Result<(Tensor<T>, BinaryBackFn<'a, T>)>
where
    T: Element,
    O: BinaryGrad<T> + 'a,
{
    let out = dispatch::forward(&op, &a.value, &b.value, axis)?;

    let back = move |grad_output: &Tensor<T>| {
        let (dx, dy) =
            dispatch::backward(&op, &a.value, &b.value, grad_output, axis, true, true)?;
        Ok((
            dx.unwrap_or_else(|| a.value.zeros_like()),
            dy.unwrap_or_else(|| b.value.zeros_like()),
        ))
    };

    Ok((out, Box::new(back)))
}

/// Computes `a - b` with `b` broadcast into `a` at `axis`.
///
/// # Returns
/// - Output tensor shaped like `a`
/// - Closure mapping `dL/dOut` to `(dL/da, dL/db)`; `dL/db` is summed over
///   the broadcast axes and negated
///
/// The backward pass only needs the operand shapes, so it does not borrow
/// the operands.
///
/// # Errors
/// [`OpError::ShapeMismatch`](crate::error::OpError::ShapeMismatch) if `b`
/// cannot be aligned inside `a`.
pub fn sub<T: Element>(
    a: &WithGrad<Tensor<T>>,
    b: &WithGrad<Tensor<T>>,
    axis: i64,
) -> Result<(Tensor<T>, BinaryBackFn<'static, T>)> {
    let out = dispatch::forward(&SubOp, &a.value, &b.value, axis)?;

    let a_shape = a.value.shape.clone();
    let b_shape = b.value.shape.clone();

    let back = move |grad_output: &Tensor<T>| {
        let (dx, dy) = dispatch::sub_backward(grad_output, &a_shape, &b_shape, axis, true, true)?;
        Ok((
            dx.unwrap_or_else(|| Tensor::zeros(a_shape.clone())),
            dy.unwrap_or_else(|| Tensor::zeros(b_shape.clone())),
        ))
    };

    Ok((out, Box::new(back)))
}

/// Computes `a + b` with `b` broadcast into `a` at `axis`.
///
/// # Errors
/// As [`sub`].
pub fn add<'a, T: Element>(
    a: &'a WithGrad<Tensor<T>>,
    b: &'a WithGrad<Tensor<T>>,
    axis: i64,
) -> Result<(Tensor<T>, BinaryBackFn<'a, T>)> {
    binary(AddOp, a, b, axis)
}

/// Computes `a * b` with `b` broadcast into `a` at `axis`.
///
/// # Errors
/// As [`sub`].
pub fn mul<'a, T: Element>(
    a: &'a WithGrad<Tensor<T>>,
    b: &'a WithGrad<Tensor<T>>,
    axis: i64,
) -> Result<(Tensor<T>, BinaryBackFn<'a, T>)> {
    binary(MulOp, a, b, axis)
}

/// Computes `a / b` with `b` broadcast into `a` at `axis`.
///
/// # Errors
/// As [`sub`].
pub fn div<'a, T: Element>(
    a: &'a WithGrad<Tensor<T>>,
    b: &'a WithGrad<Tensor<T>>,
    axis: i64,
) -> Result<(Tensor<T>, BinaryBackFn<'a, T>)> {
    binary(DivOp, a, b, axis)
}
