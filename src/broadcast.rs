//! Shape broadcasting for element-wise binary operators.
//!
//! The smaller operand `Y` is matched against a contiguous span of the larger
//! operand `X`, starting at an alignment axis. Everything before the span is
//! collapsed into `pre`, the span itself into `n`, everything after into `post`,
//! so that `X` can be walked as a flat `pre × n × post` array while `Y` is read
//! at `(i / post) % n`.
//!
//! ```rust
//! use eltwise_kernels::broadcast::{compute_plan, BroadcastPlan, RIGHT_ALIGNED};
//!
//! let plan = compute_plan(&[2, 3, 4], &[3], 1).unwrap();
//! assert_eq!(plan, BroadcastPlan { pre: 2, n: 3, post: 4 });
//!
//! let plan = compute_plan(&[2, 3], &[3], RIGHT_ALIGNED).unwrap();
//! assert_eq!(plan, BroadcastPlan { pre: 2, n: 3, post: 1 });
//! ```

use crate::error::{OpError, Result};
use crate::tensors::numel;

/// Axis value requesting NumPy-style alignment at the trailing dimensions.
pub const RIGHT_ALIGNED: i64 = -1;

/// Iteration plan for one broadcast element-wise call.
///
/// Invariants: `pre * n * post == numel(X)` and `n == numel(Y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BroadcastPlan {
    /// Product of `X` dimensions before the aligned span.
    pub pre: usize,
    /// Product of the aligned span (the element count of `Y`).
    pub n: usize,
    /// Product of `X` dimensions after the aligned span.
    pub post: usize,
}

/// Which gradient reduction a plan calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    /// Operands have the same number of elements; gradients map one to one.
    NoBroadcast,
    /// `Y` repeats across leading dimensions only (`post == 1`).
    BroadcastLeading,
    /// `Y` repeats across leading and trailing dimensions.
    BroadcastLeadingTrailing,
}

impl BroadcastPlan {
    /// The flat plan used when both operands have identical shapes.
    #[must_use]
    pub const fn same_shape(numel: usize) -> Self {
        Self {
            pre: 1,
            n: numel,
            post: 1,
        }
    }

    /// Size of the full iteration space (element count of `X` and the output).
    #[must_use]
    pub const fn numel(&self) -> usize {
        self.pre * self.n * self.post
    }

    #[must_use]
    pub const fn kind(&self) -> BroadcastKind {
        if self.pre == 1 && self.post == 1 {
            BroadcastKind::NoBroadcast
        } else if self.post == 1 {
            BroadcastKind::BroadcastLeading
        } else {
            BroadcastKind::BroadcastLeadingTrailing
        }
    }

    /// Index into `Y` read by flat output position `i`.
    #[inline]
    #[must_use]
    pub const fn y_index(&self, i: usize) -> usize {
        (i / self.post) % self.n
    }

    /// Checks the plan against concrete operand lengths.
    ///
    /// # Errors
    /// [`OpError::LengthMismatch`] when either operand disagrees with the plan.
    pub fn check(&self, x_len: usize, y_len: usize) -> Result<()> {
        OpError::check_len("X", self.numel(), x_len)?;
        OpError::check_len("Y", self.n, y_len)
    }
}

/// Computes the broadcast plan aligning `small` inside `large` at `axis`.
///
/// `axis == -1` aligns `small` against the trailing dimensions of `large`.
/// Trailing size-1 dimensions of `small` are ignored, so `[3, 1]` aligns
/// inside `[2, 3, 4]` the same way `[3]` does.
///
/// # Errors
/// [`OpError::ShapeMismatch`] when `small` has more dimensions than `large`,
/// `axis` is out of range, or any aligned dimension differs.
pub fn compute_plan(large: &[usize], small: &[usize], axis: i64) -> Result<BroadcastPlan> {
    if large == small {
        return Ok(BroadcastPlan::same_shape(numel(large)));
    }

    let mismatch = || OpError::shape_mismatch(large, small, axis);

    if small.len() > large.len() {
        return Err(mismatch());
    }

    let start = match axis {
        RIGHT_ALIGNED => large.len() - small.len(),
        a if a < 0 => return Err(mismatch()),
        a => {
            let start = usize::try_from(a).map_err(|_| mismatch())?;
            // an explicit axis must name a dimension of `large`, trimmed or not
            if start >= large.len() {
                return Err(mismatch());
            }
            start
        }
    };

    let span = small
        .iter()
        .rposition(|&d| d != 1)
        .map_or(0, |last| last + 1);
    let small = &small[..span];

    let end = start.checked_add(span).ok_or_else(mismatch)?;
    if start > large.len() || end > large.len() {
        return Err(mismatch());
    }
    if large[start..end] != *small {
        return Err(mismatch());
    }

    Ok(BroadcastPlan {
        pre: numel(&large[..start]),
        n: numel(small),
        post: numel(&large[end..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_shapes_are_flat() {
        let plan = compute_plan(&[2, 3, 4], &[2, 3, 4], RIGHT_ALIGNED).unwrap();
        assert_eq!(plan, BroadcastPlan { pre: 1, n: 24, post: 1 });
        assert_eq!(plan.kind(), BroadcastKind::NoBroadcast);
    }

    #[test]
    fn right_aligned_vector() {
        let plan = compute_plan(&[2, 3], &[3], RIGHT_ALIGNED).unwrap();
        assert_eq!(plan, BroadcastPlan { pre: 2, n: 3, post: 1 });
        assert_eq!(plan.kind(), BroadcastKind::BroadcastLeading);
    }

    #[test]
    fn explicit_axis_leaves_trailing_dims() {
        let plan = compute_plan(&[2, 3, 4, 5], &[3, 4], 1).unwrap();
        assert_eq!(plan, BroadcastPlan { pre: 2, n: 12, post: 5 });
        assert_eq!(plan.kind(), BroadcastKind::BroadcastLeadingTrailing);
        assert_eq!(plan.numel(), 120);
    }

    #[test]
    fn trailing_ones_are_trimmed() {
        let plan = compute_plan(&[2, 3, 4], &[3, 1], RIGHT_ALIGNED).unwrap();
        assert_eq!(plan, BroadcastPlan { pre: 2, n: 3, post: 4 });
    }

    #[test]
    fn scalar_like_operands() {
        let plan = compute_plan(&[2, 3], &[], RIGHT_ALIGNED).unwrap();
        assert_eq!(plan, BroadcastPlan { pre: 6, n: 1, post: 1 });

        let plan = compute_plan(&[2, 3], &[1, 1], RIGHT_ALIGNED).unwrap();
        assert_eq!(plan, BroadcastPlan { pre: 1, n: 1, post: 6 });
        assert_eq!(plan.numel(), 6);
    }

    #[test]
    fn misaligned_shape_is_rejected() {
        let err = compute_plan(&[2, 3], &[4], RIGHT_ALIGNED).unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
    }

    #[test]
    fn rank_and_axis_bounds() {
        assert!(compute_plan(&[3], &[1, 3], RIGHT_ALIGNED).is_err());
        assert!(compute_plan(&[2, 3], &[3], 2).is_err());
        assert!(compute_plan(&[2, 3], &[3], -2).is_err());
        assert!(compute_plan(&[2, 3], &[2], 0).is_ok());
    }

    #[test]
    fn explicit_axis_past_the_last_dim_is_rejected() {
        assert!(matches!(
            compute_plan(&[2, 3], &[1], 2),
            Err(OpError::ShapeMismatch { axis: 2, .. })
        ));
        assert!(compute_plan(&[2, 3], &[], 2).is_err());
        let plan = compute_plan(&[2, 3], &[3, 1], 1).unwrap();
        assert_eq!(plan, BroadcastPlan { pre: 2, n: 3, post: 1 });
    }

    #[test]
    fn y_index_ignores_pre_and_post() {
        let plan = BroadcastPlan { pre: 2, n: 3, post: 2 };
        let seen: Vec<usize> = (0..plan.numel()).map(|i| plan.y_index(i)).collect();
        assert_eq!(seen, vec![0, 0, 1, 1, 2, 2, 0, 0, 1, 1, 2, 2]);
    }
}
