//! Backend selection module.
//!
//! This module defines the available computation backends for the element-wise
//! kernels and provides functions to set and get the current backend.
//!
//! # Supported Backends
//!
//! - `Cpu`: `rayon`-parallel CPU loops (default).
//! - `Serial`: single-threaded CPU loops; the reference ordering.
//! - `Wgpu`: compute shaders through `wgpu` (requires the `wgpu` feature and
//!   `f32` elements; anything else falls back to `Cpu`).
//!
//! The backend is stored globally using an `AtomicU8`, enabling fast
//! switching between CPU and GPU modes at runtime. Results never depend on
//! the backend beyond floating point rounding on the GPU.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// Data-parallel CPU backend (default).
    #[default]
    Cpu = 0,
    /// Sequential CPU backend.
    Serial,
    /// GPU-accelerated backend using `wgpu`.
    Wgpu,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Serial),
            2 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

/// Internal global state for the active backend.
///
/// The backend is only expected to change rarely, between training steps.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the active backend to use for kernel execution.
///
/// # Example
///
/// ```
/// use eltwise_kernels::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Serial);
/// assert_eq!(get_backend(), Backend::Serial);
/// set_backend(Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    tracing::debug!(backend = ?b, "switching backend");
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently active computation backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}
