//! # Element-wise Operator Layer
//!
//! This module defines the broadcasting element-wise evaluators and dispatches
//! them across compute backends.
//!
//! ## Submodules
//!
//! - [`functor`]: scalar binary functors (`AddOp`, `SubOp`, `MulOp`, `DivOp`) and their derivatives
//! - [`exec`]: execution strategies running a flat `out[i] = f(i)` loop
//! - [`cpu`]: forward and backward evaluators over a
//!   [`BroadcastPlan`](crate::broadcast::BroadcastPlan)
//! - [`wgpu`] *(opt-in)*: GPU compute shader pipelines using `wgpu`
//! - [`dispatch`]: backend switching and tensor-level entry points
//!
//! ## Extending the family
//!
//! To add an operator:
//!
//! 1. Implement [`functor::BinaryOp`] and [`functor::BinaryGrad`] for a new functor
//! 2. Register it in [`crate::registry::OpRegistry::builtin`]
//! 3. Optionally give it a `GPU_OPCODE` handled by the `binary` shader
//!
//! ## Feature Flags
//!
//! - `wgpu`: Enables the `wgpu` (WebGPU) backend

pub mod cpu;
pub mod dispatch;
pub mod exec;
pub mod functor;

#[cfg(feature = "wgpu")]
pub mod wgpu;
