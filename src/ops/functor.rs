//! Binary scalar functors and their local derivatives.
//!
//! A functor only knows how to combine two scalars; broadcasting, iteration
//! and gradient reduction live in the evaluators (see [`super::cpu`]).

use crate::tensors::Element;

/// A pure binary scalar function `c = f(a, b)`.
pub trait BinaryOp<T>: Sync {
    /// Operator name, used for spans and error messages.
    const NAME: &'static str;

    /// Opcode understood by the `wgpu` element-wise shader, if any.
    const GPU_OPCODE: Option<u32> = None;

    /// Combines one element of each operand.
    fn apply(&self, a: T, b: T) -> T;
}

/// A [`BinaryOp`] with known partial derivatives.
///
/// Both methods return the contribution of one output position to the
/// gradient of the respective operand, i.e. `∂f/∂x · dout` and `∂f/∂y · dout`.
pub trait BinaryGrad<T>: BinaryOp<T> {
    /// Constant `(∂f/∂x, ∂f/∂y)` for linear operators; enables the GPU
    /// gradient path.
    const CONSTANT_GRADS: Option<(f32, f32)> = None;

    fn grad_x(&self, x: T, y: T, dout: T) -> T;

    fn grad_y(&self, x: T, y: T, dout: T) -> T;
}

/// `a + b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOp;

/// `a - b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubOp;

/// `a * b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MulOp;

/// `a / b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DivOp;

impl<T: Element> BinaryOp<T> for AddOp {
    const NAME: &'static str = "elementwise_add";
    const GPU_OPCODE: Option<u32> = Some(0);

    #[inline]
    fn apply(&self, a: T, b: T) -> T {
        a.wrapping_add(b)
    }
}

impl<T: Element> BinaryGrad<T> for AddOp {
    const CONSTANT_GRADS: Option<(f32, f32)> = Some((1.0, 1.0));

    #[inline]
    fn grad_x(&self, _x: T, _y: T, dout: T) -> T {
        dout
    }

    #[inline]
    fn grad_y(&self, _x: T, _y: T, dout: T) -> T {
        dout
    }
}

impl<T: Element> BinaryOp<T> for SubOp {
    const NAME: &'static str = "elementwise_sub";
    const GPU_OPCODE: Option<u32> = Some(1);

    #[inline]
    fn apply(&self, a: T, b: T) -> T {
        a.wrapping_sub(b)
    }
}

impl<T: Element> BinaryGrad<T> for SubOp {
    const CONSTANT_GRADS: Option<(f32, f32)> = Some((1.0, -1.0));

    #[inline]
    fn grad_x(&self, _x: T, _y: T, dout: T) -> T {
        dout
    }

    #[inline]
    fn grad_y(&self, _x: T, _y: T, dout: T) -> T {
        dout.wrapping_neg()
    }
}

impl<T: Element> BinaryOp<T> for MulOp {
    const NAME: &'static str = "elementwise_mul";
    const GPU_OPCODE: Option<u32> = Some(2);

    #[inline]
    fn apply(&self, a: T, b: T) -> T {
        a.wrapping_mul(b)
    }
}

impl<T: Element> BinaryGrad<T> for MulOp {
    #[inline]
    fn grad_x(&self, _x: T, y: T, dout: T) -> T {
        dout.wrapping_mul(y)
    }

    #[inline]
    fn grad_y(&self, x: T, _y: T, dout: T) -> T {
        dout.wrapping_mul(x)
    }
}

impl<T: Element> BinaryOp<T> for DivOp {
    const NAME: &'static str = "elementwise_div";
    const GPU_OPCODE: Option<u32> = Some(3);

    #[inline]
    fn apply(&self, a: T, b: T) -> T {
        a.wrapping_div(b)
    }
}

impl<T: Element> BinaryGrad<T> for DivOp {
    #[inline]
    fn grad_x(&self, _x: T, y: T, dout: T) -> T {
        dout.wrapping_div(y)
    }

    // d(x / y)/dy = -x / y²
    #[inline]
    fn grad_y(&self, x: T, y: T, dout: T) -> T {
        dout.wrapping_mul(x)
            .wrapping_div(y.wrapping_mul(y))
            .wrapping_neg()
    }
}
