//! CPU element-wise kernels
//!
//! # CPU Backend
//!
//! Forward and backward evaluators for broadcasting binary operators. These
//! are the default when calling `backprop::xyz`; [`super::dispatch`] lands
//! here whenever the GPU backend is disabled, unavailable, or cannot handle
//! the element type.
//!
//! ## Iteration model
//!
//! `X` and the output are walked as a flat `pre × n × post` array. `Y` is read
//! at `(i / post) % n`, so it repeats across `pre` and `post` without being
//! materialized.
//!
//! ## Gradient reduction
//!
//! `dX` maps one to one onto `dOut`. `dY` is summed over the broadcast axes,
//! selected by [`BroadcastKind`]:
//!
//! - `NoBroadcast`: `dy[i] = g(i)`
//! - `BroadcastLeading`: `dy[j] = Σ_p g(p, j)`
//! - `BroadcastLeadingTrailing`: `dy[j] = Σ_p Σ_q g(p, j, q)`
//!
//! Each `dy[j]` owns a single accumulator that is always summed in the same
//! order (`p` outer, `q` inner). Parallel strategies only split across `j`,
//! so results are bit-identical between [`Serial`](super::exec::Serial) and
//! [`Parallel`](super::exec::Parallel).

use super::exec::ElementwiseExecutor;
use super::functor::{BinaryGrad, BinaryOp};
use crate::broadcast::{BroadcastKind, BroadcastPlan};
use crate::error::{OpError, Result};
use crate::tensors::Element;

/// Gradients produced by a backward evaluator.
///
/// A field is `None` exactly when that gradient was not requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Grads<T> {
    pub dx: Option<Vec<T>>,
    pub dy: Option<Vec<T>>,
}

/// Applies `op` element-wise over the broadcast operands, writing into `out`.
///
/// # Errors
/// [`OpError::LengthMismatch`] if `x`, `y` or `out` disagree with `plan`.
pub fn forward<T, O, E>(
    exec: &E,
    op: &O,
    x: &[T],
    y: &[T],
    plan: &BroadcastPlan,
    out: &mut [T],
) -> Result<()>
where
    T: Element,
    O: BinaryOp<T>,
    E: ElementwiseExecutor,
{
    plan.check(x.len(), y.len())?;
    OpError::check_len("Out", plan.numel(), out.len())?;

    let _span = tracing::debug_span!(
        "elementwise_forward",
        op = O::NAME,
        pre = plan.pre,
        n = plan.n,
        post = plan.post
    )
    .entered();

    let plan = *plan;
    match plan.kind() {
        BroadcastKind::NoBroadcast => exec.elementwise_for_each(out, |i| op.apply(x[i], y[i])),
        _ => exec.elementwise_for_each(out, |i| op.apply(x[i], y[plan.y_index(i)])),
    }

    Ok(())
}

/// Computes the requested gradients of `op` given `dout`.
///
/// # Errors
/// [`OpError::LengthMismatch`] if any buffer disagrees with `plan`.
#[allow(clippy::too_many_arguments)]
pub fn backward<T, O, E>(
    exec: &E,
    op: &O,
    x: &[T],
    y: &[T],
    dout: &[T],
    plan: &BroadcastPlan,
    want_dx: bool,
    want_dy: bool,
) -> Result<Grads<T>>
where
    T: Element,
    O: BinaryGrad<T>,
    E: ElementwiseExecutor,
{
    plan.check(x.len(), y.len())?;
    OpError::check_len("Out@GRAD", plan.numel(), dout.len())?;

    let _span = tracing::debug_span!(
        "elementwise_backward",
        op = O::NAME,
        pre = plan.pre,
        n = plan.n,
        post = plan.post,
        want_dx,
        want_dy
    )
    .entered();

    let plan = *plan;

    let dx = want_dx.then(|| {
        let mut dx = vec![T::ZERO; plan.numel()];
        exec.elementwise_for_each(&mut dx, |i| {
            op.grad_x(x[i], y[plan.y_index(i)], dout[i])
        });
        dx
    });

    let dy = want_dy.then(|| {
        let mut dy = vec![T::ZERO; plan.n];
        reduce_broadcast(
            exec,
            &plan,
            &mut dy,
            |i| op.grad_y(x[i], y[plan.y_index(i)], dout[i]),
            |acc| acc,
        );
        dy
    });

    Ok(Grads { dx, dy })
}

/// Gradient of `z = x - y`: `dx = dz`, `dy = -Σ dz` over the broadcast axes.
///
/// Needs neither operand, only `dz` and the plan they were broadcast with.
///
/// # Errors
/// [`OpError::LengthMismatch`] if `dz` disagrees with `plan`.
pub fn sub_backward<T, E>(
    exec: &E,
    dz: &[T],
    plan: &BroadcastPlan,
    want_dx: bool,
    want_dy: bool,
) -> Result<Grads<T>>
where
    T: Element,
    E: ElementwiseExecutor,
{
    OpError::check_len("Out@GRAD", plan.numel(), dz.len())?;

    let _span = tracing::debug_span!(
        "elementwise_backward",
        op = "elementwise_sub",
        pre = plan.pre,
        n = plan.n,
        post = plan.post,
        want_dx,
        want_dy
    )
    .entered();

    let dx = want_dx.then(|| dz.to_vec());
    let dy = want_dy.then(|| {
        let mut dy = vec![T::ZERO; plan.n];
        reduce_broadcast(exec, plan, &mut dy, |i| dz[i], |acc: T| acc.wrapping_neg());
        dy
    });

    Ok(Grads { dx, dy })
}

/// Sums `term(i)` over every flat position `i` that reads `dy[j]`, then
/// stores `finish(sum)` in `dy[j]`.
pub(crate) fn reduce_broadcast<T, E, F, G>(
    exec: &E,
    plan: &BroadcastPlan,
    dy: &mut [T],
    term: F,
    finish: G,
) where
    T: Element,
    E: ElementwiseExecutor,
    F: Fn(usize) -> T + Sync + Send,
    G: Fn(T) -> T + Sync + Send,
{
    let BroadcastPlan { pre, n, post } = *plan;

    match plan.kind() {
        BroadcastKind::NoBroadcast => exec.elementwise_for_each(dy, |i| finish(term(i))),
        BroadcastKind::BroadcastLeading => exec.elementwise_for_each(dy, |j| {
            let mut acc = T::ZERO;
            for p in 0..pre {
                acc = acc.wrapping_add(term(p * n + j));
            }
            finish(acc)
        }),
        BroadcastKind::BroadcastLeadingTrailing => exec.elementwise_for_each(dy, |j| {
            let mut acc = T::ZERO;
            for p in 0..pre {
                let base = (p * n + j) * post;
                for q in 0..post {
                    acc = acc.wrapping_add(term(base + q));
                }
            }
            finish(acc)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::exec::{Parallel, Serial};
    use crate::ops::functor::{MulOp, SubOp};

    #[test]
    fn forward_rejects_short_output() {
        let plan = BroadcastPlan::same_shape(3);
        let mut out = [0.0f32; 2];
        let err = forward(&Serial, &SubOp, &[1.0; 3], &[1.0; 3], &plan, &mut out).unwrap_err();
        assert_eq!(
            err,
            OpError::LengthMismatch {
                what: "Out",
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn forward_leading_and_trailing() {
        // x: (2, 2, 2), y: (2,) aligned at axis 1
        let plan = BroadcastPlan { pre: 2, n: 2, post: 2 };
        let x: Vec<f64> = (0..8).map(f64::from).collect();
        let mut out = vec![0.0; 8];
        forward(&Serial, &SubOp, &x, &[10.0, 20.0], &plan, &mut out).unwrap();
        assert_eq!(out, vec![-10.0, -9.0, -18.0, -17.0, -6.0, -5.0, -14.0, -13.0]);
    }

    #[test]
    fn sub_backward_skips_unrequested() {
        let plan = BroadcastPlan { pre: 2, n: 3, post: 1 };
        let dz = [1.0f32; 6];
        let grads = sub_backward(&Serial, &dz, &plan, false, true).unwrap();
        assert_eq!(grads.dx, None);
        assert_eq!(grads.dy, Some(vec![-2.0, -2.0, -2.0]));

        let none = sub_backward(&Serial, &dz, &plan, false, false).unwrap();
        assert_eq!(none, Grads { dx: None, dy: None });
    }

    #[test]
    fn reduction_over_trailing_axes() {
        // dz: (2, 3, 2) of 1..=12, y: (3,) at axis 1
        let plan = BroadcastPlan { pre: 2, n: 3, post: 2 };
        let dz: Vec<i64> = (1..=12).collect();
        let grads = sub_backward(&Parallel, &dz, &plan, true, true).unwrap();
        assert_eq!(grads.dx.as_deref(), Some(&dz[..]));
        // j = 0: 1 + 2 + 7 + 8, j = 1: 3 + 4 + 9 + 10, j = 2: 5 + 6 + 11 + 12
        assert_eq!(grads.dy, Some(vec![-18, -26, -34]));
    }

    #[test]
    fn generic_backward_for_mul() {
        let plan = BroadcastPlan { pre: 2, n: 2, post: 1 };
        let x = [1.0f64, 2.0, 3.0, 4.0];
        let y = [10.0, 100.0];
        let dout = [1.0; 4];
        let grads = backward(&Serial, &MulOp, &x, &y, &dout, &plan, true, true).unwrap();
        assert_eq!(grads.dx, Some(vec![10.0, 100.0, 10.0, 100.0]));
        assert_eq!(grads.dy, Some(vec![4.0, 6.0]));
    }
}
