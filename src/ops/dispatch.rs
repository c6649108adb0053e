//! Operation Dispatch Layer
//!
//! This module selects the correct backend (CPU, serial CPU, WGPU) at runtime
//! for each element-wise evaluator, based on the global `Backend`.
//!
//! Each function computes a fresh [`BroadcastPlan`] from the operand shapes,
//! validates the buffers, then:
//! 1. tries `Wgpu` (if selected and enabled), which declines non-`f32` work,
//! 2. runs `Serial` if selected,
//! 3. falls back to the parallel `Cpu` kernels.
//!
//! # Design Highlights
//! - **Pluggable**: Backends are optional and modular
//! - **Minimal overhead**: Function returns immediately upon match
//! - **Fallback logic**: Safe and deterministic fallback to CPU

use super::cpu::{self, Grads};
use super::exec::{Parallel, Serial};
use super::functor::{BinaryGrad, BinaryOp};
use crate::backend::{get_backend, Backend};
use crate::broadcast::{compute_plan, BroadcastPlan};
use crate::error::{OpError, Result};
use crate::tensors::{Element, Tensor};

/// Runs `op` over `x` and `y` broadcast at `axis`; the output has `x`'s shape.
///
/// # Errors
/// [`OpError::ShapeMismatch`] if `y` cannot be aligned inside `x`.
pub fn forward<T, O>(op: &O, x: &Tensor<T>, y: &Tensor<T>, axis: i64) -> Result<Tensor<T>>
where
    T: Element,
    O: BinaryOp<T>,
{
    let plan = compute_plan(&x.shape, &y.shape, axis)?;
    let mut out = vec![T::ZERO; plan.numel()];
    forward_into(op, &x.data, &y.data, &plan, &mut out)?;
    Tensor::try_new(x.shape.clone(), out)
}

/// Runs `op` into a caller-provided output buffer.
///
/// # Errors
/// [`OpError::LengthMismatch`] if a buffer disagrees with `plan`.
pub fn forward_into<T, O>(
    op: &O,
    x: &[T],
    y: &[T],
    plan: &BroadcastPlan,
    out: &mut [T],
) -> Result<()>
where
    T: Element,
    O: BinaryOp<T>,
{
    plan.check(x.len(), y.len())?;
    OpError::check_len("Out", plan.numel(), out.len())?;

    match get_backend() {
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                if super::wgpu::wgpu_forward(op, x, y, plan, out) {
                    return Ok(());
                }
            }
        }
        Backend::Serial => return cpu::forward(&Serial, op, x, y, plan, out),
        Backend::Cpu => {}
    }

    cpu::forward(&Parallel, op, x, y, plan, out)
}

/// Computes the requested gradients of `op`, shaped like `x` and `y`.
///
/// `dout` must have `x`'s shape. Unrequested gradients are skipped entirely
/// and come back as `None`.
///
/// # Errors
/// [`OpError::ShapeMismatch`] if `y` cannot be aligned inside `x`, or
/// [`OpError::LengthMismatch`] if `dout` has the wrong size.
pub fn backward<T, O>(
    op: &O,
    x: &Tensor<T>,
    y: &Tensor<T>,
    dout: &Tensor<T>,
    axis: i64,
    want_dx: bool,
    want_dy: bool,
) -> Result<(Option<Tensor<T>>, Option<Tensor<T>>)>
where
    T: Element,
    O: BinaryGrad<T>,
{
    let plan = compute_plan(&x.shape, &y.shape, axis)?;
    plan.check(x.len(), y.len())?;
    OpError::check_len("Out@GRAD", plan.numel(), dout.len())?;

    let grads = match get_backend() {
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                super::wgpu::wgpu_linear_backward(op, &dout.data, &plan, want_dx, want_dy)
            }
            #[cfg(not(feature = "wgpu"))]
            {
                None
            }
        }
        Backend::Serial => Some(cpu::backward(
            &Serial, op, &x.data, &y.data, &dout.data, &plan, want_dx, want_dy,
        )?),
        Backend::Cpu => None,
    };

    let grads = match grads {
        Some(grads) => grads,
        None => cpu::backward(
            &Parallel, op, &x.data, &y.data, &dout.data, &plan, want_dx, want_dy,
        )?,
    };

    shape_grads(grads, &x.shape, &y.shape)
}

/// Gradient of `x - y` from `dz` alone; `x_shape`/`y_shape` are the operand
/// shapes of the forward call.
///
/// # Errors
/// As [`backward`].
pub fn sub_backward<T>(
    dz: &Tensor<T>,
    x_shape: &[usize],
    y_shape: &[usize],
    axis: i64,
    want_dx: bool,
    want_dy: bool,
) -> Result<(Option<Tensor<T>>, Option<Tensor<T>>)>
where
    T: Element,
{
    let plan = compute_plan(x_shape, y_shape, axis)?;
    OpError::check_len("Out@GRAD", plan.numel(), dz.len())?;

    let grads = match get_backend() {
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                use super::functor::SubOp;
                super::wgpu::wgpu_linear_backward(&SubOp, &dz.data, &plan, want_dx, want_dy)
            }
            #[cfg(not(feature = "wgpu"))]
            {
                None
            }
        }
        Backend::Serial => Some(cpu::sub_backward(&Serial, &dz.data, &plan, want_dx, want_dy)?),
        Backend::Cpu => None,
    };

    let grads = match grads {
        Some(grads) => grads,
        None => cpu::sub_backward(&Parallel, &dz.data, &plan, want_dx, want_dy)?,
    };

    shape_grads(grads, x_shape, y_shape)
}

fn shape_grads<T>(
    grads: Grads<T>,
    x_shape: &[usize],
    y_shape: &[usize],
) -> Result<(Option<Tensor<T>>, Option<Tensor<T>>)> {
    let dx = grads
        .dx
        .map(|dx| Tensor::try_new(x_shape.to_vec(), dx))
        .transpose()?;
    let dy = grads
        .dy
        .map(|dy| Tensor::try_new(y_shape.to_vec(), dy))
        .transpose()?;
    Ok((dx, dy))
}
