//! Error types shared by every kernel in the crate.
//!
//! All errors are fatal to the single operator invocation that raised them:
//! nothing is retried and no partial output is returned.

use thiserror::Error;

/// Result alias using [`OpError`].
pub type Result<T> = core::result::Result<T, OpError>;

/// Errors raised by shape planning, kernels, and the operator registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// The smaller operand cannot be aligned inside the larger one.
    #[error("cannot align shape {small:?} inside {large:?} at axis {axis}")]
    ShapeMismatch {
        /// Shape of the larger operand.
        large: Vec<usize>,
        /// Shape of the smaller operand.
        small: Vec<usize>,
        /// Requested alignment axis (`-1` means right-aligned).
        axis: i64,
    },

    /// A buffer or tensor does not hold the number of elements the plan expects.
    #[error("{what}: expected {expected} elements, got {got}")]
    LengthMismatch {
        /// Which operand was wrong.
        what: &'static str,
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        got: usize,
    },

    /// `height_sections` length disagrees with the number of outputs.
    #[error("{sections} height sections given for {outputs} outputs")]
    Arity {
        /// Number of height sections.
        sections: usize,
        /// Number of requested outputs.
        outputs: usize,
    },

    /// A required input or output slot was absent from the call.
    #[error("operator `{op}` is missing operand `{slot}`")]
    MissingOperand {
        /// Operator name.
        op: &'static str,
        /// Slot name.
        slot: &'static str,
    },

    /// A selected row does not fall into any height section.
    #[error("row {row} is outside of [0, {height})")]
    RowOutOfRange {
        /// The offending row index.
        row: i64,
        /// Total height covered by the sections.
        height: i64,
    },

    /// An attribute has an unusable value.
    #[error("invalid attribute `{name}`: {reason}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An attribute exists but holds the wrong kind of value.
    #[error("attribute `{name}` is not of type {expected}")]
    AttributeType {
        /// Attribute name.
        name: String,
        /// Expected kind.
        expected: &'static str,
    },

    /// An operand slot holds the wrong kind of variable.
    #[error("slot `{slot}` expects a {expected}")]
    VariableType {
        /// Slot name.
        slot: &'static str,
        /// Expected variable kind.
        expected: &'static str,
    },

    /// No operator of that name is registered.
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    /// An operator of that name is already registered.
    #[error("operator `{0}` is already registered")]
    DuplicateOperator(String),

    /// The operator has no gradient kernel.
    #[error("operator `{0}` has no gradient kernel")]
    NoGradient(String),
}

impl OpError {
    pub(crate) fn shape_mismatch(large: &[usize], small: &[usize], axis: i64) -> Self {
        Self::ShapeMismatch {
            large: large.to_vec(),
            small: small.to_vec(),
            axis,
        }
    }

    pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Self::LengthMismatch {
                what,
                expected,
                got,
            })
        }
    }
}
