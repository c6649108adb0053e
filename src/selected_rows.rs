//! Sparse row sets and the split-by-height operator.
//!
//! A [`SelectedRows`] stores only some rows of a logical `height × width…`
//! tensor: the listed row indices plus one dense payload row for each. The
//! split operator buckets those rows into consecutive height sections, one
//! output per section, so that each output can be shipped to whoever owns
//! that slice of the table.
//!
//! Rows keep their input order inside a shard and are rebased to the start
//! of their section:
//!
//! ```rust
//! use eltwise_kernels::selected_rows::{split_selected_rows, SelectedRows};
//! use eltwise_kernels::tensors::Tensor;
//!
//! let x = SelectedRows::new(vec![7, 5], 12, Tensor::new(vec![2, 1], vec![70.0, 50.0])).unwrap();
//! let out = split_selected_rows(&x, &[4, 8], 2).unwrap();
//! assert!(out[0].rows.is_empty());
//! assert_eq!(out[0].height, 4);
//! assert_eq!(out[1].rows, vec![3, 1]);
//! assert_eq!(out[1].height, 8);
//! ```

use crate::error::{OpError, Result};
use crate::tensors::{numel, Element, Tensor};

const OP: &str = "split_selected_rows";
const GRAD_OP: &str = "split_selected_rows_grad";

/// A sparse tensor holding a subset of the rows of a `height`-row tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedRows<T> {
    /// Indices of the stored rows, in storage order.
    pub rows: Vec<i64>,
    /// Logical number of rows.
    pub height: i64,
    /// Payload, shaped `[rows.len(), width…]`.
    pub value: Tensor<T>,
}

impl<T> SelectedRows<T> {
    /// Builds a row set, checking that `value` has one row per index.
    ///
    /// # Errors
    /// [`OpError::VariableType`] for a rank-0 `value`, or
    /// [`OpError::LengthMismatch`] if its first dimension is not `rows.len()`.
    pub fn new(rows: Vec<i64>, height: i64, value: Tensor<T>) -> Result<Self> {
        let rows = Self {
            rows,
            height,
            value,
        };
        rows.validate()?;
        Ok(rows)
    }

    /// Checks that `value` holds one payload row per index and that its data
    /// matches its shape. The fields are public, so kernels re-check before
    /// slicing payload rows.
    ///
    /// # Errors
    /// As [`SelectedRows::new`].
    pub fn validate(&self) -> Result<()> {
        let Some(&first) = self.value.shape.first() else {
            return Err(OpError::VariableType {
                slot: "value",
                expected: "tensor of rank >= 1",
            });
        };
        OpError::check_len("selected rows", self.rows.len(), first)?;
        OpError::check_len(
            "selected rows payload",
            numel(&self.value.shape),
            self.value.data.len(),
        )
    }

    /// Number of scalars in one payload row.
    #[must_use]
    pub fn row_width(&self) -> usize {
        numel(self.value.shape.get(1..).unwrap_or_default())
    }

    /// Dims of the dense tensor this row set stands for: `[height, width…]`.
    #[must_use]
    pub fn dims(&self) -> Vec<usize> {
        let mut dims = self.value.shape.clone();
        if let Some(first) = dims.first_mut() {
            *first = usize::try_from(self.height).unwrap_or(0);
        }
        dims
    }
}

/// Validates `height_sections` and returns each section's starting row.
fn section_offsets(height_sections: &[i64]) -> Result<Vec<i64>> {
    let mut offsets = Vec::with_capacity(height_sections.len());
    let mut acc: i64 = 0;
    for &size in height_sections {
        if size < 0 {
            return Err(OpError::InvalidAttribute {
                name: "height_sections".into(),
                reason: format!("negative section size {size}"),
            });
        }
        offsets.push(acc);
        acc = acc.checked_add(size).ok_or_else(|| OpError::InvalidAttribute {
            name: "height_sections".into(),
            reason: "total height overflows".into(),
        })?;
    }
    Ok(offsets)
}

fn check_arity(height_sections: &[i64], outputs: usize) -> Result<()> {
    if !height_sections.is_empty() && height_sections.len() != outputs {
        return Err(OpError::Arity {
            sections: height_sections.len(),
            outputs,
        });
    }
    Ok(())
}

/// Output dims of the split: the input dims with the leading (height)
/// dimension replaced by each section's size.
///
/// With empty `height_sections` every output keeps the input dims.
///
/// # Errors
/// [`OpError::Arity`] when a non-empty `height_sections` does not have one
/// entry per output, [`OpError::InvalidAttribute`] for negative sections, and
/// [`OpError::VariableType`] for rank-0 input dims.
pub fn infer_split_dims(
    dims: &[usize],
    height_sections: &[i64],
    outputs: usize,
) -> Result<Vec<Vec<usize>>> {
    if dims.is_empty() {
        return Err(OpError::VariableType {
            slot: "X",
            expected: "tensor of rank >= 1",
        });
    }
    check_arity(height_sections, outputs)?;
    section_offsets(height_sections)?;

    Ok((0..outputs)
        .map(|i| {
            let mut out = dims.to_vec();
            if let Some(&section) = height_sections.get(i) {
                out[0] = usize::try_from(section).unwrap_or(0);
            }
            out
        })
        .collect())
}

/// Splits `x` into `outputs` shards by consecutive height sections.
///
/// Section `i` covers rows `[offset_i, offset_i + height_sections[i])`. Its
/// shard has `height = height_sections[i]` and holds the rows of `x` in that
/// range, in input order, as `row - offset_i`, together with their payload.
///
/// With empty `height_sections` every shard is a full copy of `x`. Callers
/// should not rely on that duplication; it is kept for compatibility and
/// logged as a warning.
///
/// # Errors
/// - [`OpError::MissingOperand`] if `outputs == 0`
/// - [`OpError::LengthMismatch`] if `x` does not hold one payload row per index
/// - [`OpError::Arity`] if a non-empty `height_sections` does not have `outputs` entries
/// - [`OpError::InvalidAttribute`] for negative section sizes
/// - [`OpError::RowOutOfRange`] for a row outside every section
pub fn split_selected_rows<T: Element>(
    x: &SelectedRows<T>,
    height_sections: &[i64],
    outputs: usize,
) -> Result<Vec<SelectedRows<T>>> {
    if outputs == 0 {
        return Err(OpError::MissingOperand { op: OP, slot: "Out" });
    }
    check_arity(height_sections, outputs)?;
    x.validate()?;

    let _span = tracing::debug_span!(OP, rows = x.rows.len(), outputs).entered();

    if height_sections.is_empty() {
        tracing::warn!(outputs, "empty height_sections, replicating input into every output");
        return Ok(vec![x.clone(); outputs]);
    }

    let offsets = section_offsets(height_sections)?;
    let total: i64 = height_sections.iter().sum();
    let width = x.row_width();

    let mut rows: Vec<Vec<i64>> = vec![Vec::new(); outputs];
    let mut values: Vec<Vec<T>> = vec![Vec::new(); outputs];

    for (k, &row) in x.rows.iter().enumerate() {
        if row < 0 || row >= total {
            return Err(OpError::RowOutOfRange { row, height: total });
        }
        // offsets[0] == 0 <= row, so the partition point is at least 1
        let section = offsets.partition_point(|&o| o <= row) - 1;
        rows[section].push(row - offsets[section]);
        values[section].extend_from_slice(&x.value.data[k * width..(k + 1) * width]);
    }

    let tail = x.value.shape.get(1..).unwrap_or_default();
    rows.into_iter()
        .zip(values)
        .zip(height_sections)
        .map(|((rows, data), &height)| {
            let mut shape = Vec::with_capacity(x.value.rank());
            shape.push(rows.len());
            shape.extend_from_slice(tail);
            SelectedRows::new(rows, height, Tensor::try_new(shape, data)?)
        })
        .collect()
}

/// Gradient of [`split_selected_rows`]: shifts every shard's rows back by its
/// section offset and concatenates the shards into one row set of the total
/// height.
///
/// With empty `height_sections` the shards are concatenated unshifted and the
/// result takes the first shard's height.
///
/// # Errors
/// - [`OpError::MissingOperand`] if `grads` is empty
/// - [`OpError::Arity`] if a non-empty `height_sections` does not have one entry per shard
/// - [`OpError::InvalidAttribute`] for negative section sizes
/// - [`OpError::LengthMismatch`] if shard payload widths differ or a shard's
///   payload does not match its rows
pub fn split_selected_rows_grad<T: Element>(
    grads: &[&SelectedRows<T>],
    height_sections: &[i64],
) -> Result<SelectedRows<T>> {
    let Some(first) = grads.first() else {
        return Err(OpError::MissingOperand {
            op: GRAD_OP,
            slot: "Out@GRAD",
        });
    };
    check_arity(height_sections, grads.len())?;

    let _span = tracing::debug_span!(GRAD_OP, shards = grads.len()).entered();

    let (offsets, height) = if height_sections.is_empty() {
        (vec![0; grads.len()], first.height)
    } else {
        (section_offsets(height_sections)?, height_sections.iter().sum())
    };

    let tail = first.value.shape.get(1..).unwrap_or_default().to_vec();
    let width = first.row_width();

    let mut rows = Vec::new();
    let mut data = Vec::new();
    for (shard, offset) in grads.iter().zip(offsets) {
        shard.validate()?;
        OpError::check_len("selected rows width", width, shard.row_width())?;
        rows.extend(shard.rows.iter().map(|&r| r + offset));
        data.extend_from_slice(&shard.value.data);
    }

    let mut shape = Vec::with_capacity(tail.len() + 1);
    shape.push(rows.len());
    shape.extend(tail);
    SelectedRows::new(rows, height, Tensor::try_new(shape, data)?)
}
