//! eltwise_kernels: broadcasting element-wise kernels and sparse row splitting.
//!
//! Numerical building blocks for a dataflow training framework: binary
//! element-wise operators whose right operand is broadcast into the left one,
//! their gradients, and a split operator for sparse row sets.
//!
//! # Features
//!
//! - Element-wise `sub`, `add`, `mul` and `div` with axis-aligned broadcasting.
//! - Gradients that reduce over the broadcast axes in a fixed, deterministic order.
//! - Splitting of [`selected_rows::SelectedRows`] into consecutive height sections.
//! - A name-keyed [`registry::OpRegistry`] exposing every operator and its gradient.
//! - Parallel (`rayon`), serial and optional GPU (`wgpu`) execution.
//!
//! # Modules
//!
//! - [`tensors`]: Dense tensors, the [`tensors::Element`] trait, gradient wrappers.
//! - [`broadcast`]: Broadcast planning (`pre`/`n`/`post` decomposition).
//! - [`ops`]: Functors, evaluators and backend dispatch.
//! - [`backprop`]: Differentiable operations returning backward closures.
//! - [`selected_rows`]: Sparse row sets and the split-by-height operator.
//! - [`registry`]: Operator table used by a graph executor.
//! - [`backend`]: Global execution backend switch.
//! - [`error`]: The crate's error type.
//! - [`approx`]: Float comparison helpers.
//!
//! # Example
//!
//! ```rust
//! use eltwise_kernels::{ops::dispatch, ops::functor::SubOp, tensor};
//!
//! let x = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
//! let y = tensor!([1.0, 2.0]);
//! let out = dispatch::forward(&SubOp, &x, &y, 0).unwrap();
//! assert_eq!(out.data, vec![0.0, 1.0, 2.0, 2.0, 3.0, 4.0]);
//! ```

pub mod approx;
pub mod backend;
pub mod backprop;
pub mod broadcast;
pub mod error;
pub mod ops;
pub mod registry;
pub mod selected_rows;
pub mod tensors;

pub use error::{OpError, Result};
pub use tensors::Tensor;
