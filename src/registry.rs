//! Operator registration table.
//!
//! Operators are looked up by name in an [`OpRegistry`], each entry bundling a
//! forward kernel, an optional gradient kernel, and shape inference for both.
//! Kernels talk to the caller through an [`OpContext`]: named input slots
//! holding borrowed [`Variable`]s, the number of values requested per output
//! slot, and the operator's [`Attributes`].
//!
//! An output slot that is not requested is not computed. For the gradient
//! kernels that is how the caller prunes unused branches of the graph.
//!
//! ```rust
//! use eltwise_kernels::registry::{Attribute, OpContext, Variable, F64_OPERATORS};
//! use eltwise_kernels::tensor;
//!
//! let x = Variable::Dense(tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
//! let y = Variable::Dense(tensor!([1.0, 2.0, 3.0]));
//! let ctx = OpContext::new()
//!     .input("X", &x)
//!     .input("Y", &y)
//!     .attr("axis", Attribute::Int(-1))
//!     .request("Out", 1);
//!
//! let mut outs = F64_OPERATORS.run("elementwise_sub", &ctx).unwrap();
//! let out = outs.remove("Out").unwrap().remove(0).into_dense().unwrap();
//! assert_eq!(out.data, vec![0.0, 0.0, 0.0, 3.0, 3.0, 3.0]);
//! ```

use crate::broadcast::{compute_plan, RIGHT_ALIGNED};
use crate::error::{OpError, Result};
use crate::ops::dispatch;
use crate::ops::functor::{AddOp, BinaryGrad, DivOp, MulOp, SubOp};
use crate::selected_rows::{
    infer_split_dims, split_selected_rows, split_selected_rows_grad, SelectedRows,
};
use crate::tensors::{Element, Tensor};
use std::collections::HashMap;

/// Input slot of the left operand.
pub const X: &str = "X";
/// Input slot of the right operand.
pub const Y: &str = "Y";
/// Forward output slot.
pub const OUT: &str = "Out";
/// Gradient of [`OUT`].
pub const OUT_GRAD: &str = "Out@GRAD";
/// Gradient of [`X`].
pub const X_GRAD: &str = "X@GRAD";
/// Gradient of [`Y`].
pub const Y_GRAD: &str = "Y@GRAD";

/// A value exchanged with a kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable<T> {
    Dense(Tensor<T>),
    Rows(SelectedRows<T>),
}

impl<T> Variable<T> {
    /// Borrows the dense tensor held in `slot`.
    ///
    /// # Errors
    /// [`OpError::VariableType`] for a selected-rows value.
    pub fn as_dense(&self, slot: &'static str) -> Result<&Tensor<T>> {
        match self {
            Self::Dense(t) => Ok(t),
            Self::Rows(_) => Err(OpError::VariableType {
                slot,
                expected: "dense tensor",
            }),
        }
    }

    /// Borrows the selected rows held in `slot`.
    ///
    /// # Errors
    /// [`OpError::VariableType`] for a dense value.
    pub fn as_rows(&self, slot: &'static str) -> Result<&SelectedRows<T>> {
        match self {
            Self::Rows(r) => Ok(r),
            Self::Dense(_) => Err(OpError::VariableType {
                slot,
                expected: "selected rows",
            }),
        }
    }

    /// Unwraps a dense tensor.
    ///
    /// # Errors
    /// [`OpError::VariableType`] for a selected-rows value.
    pub fn into_dense(self) -> Result<Tensor<T>> {
        match self {
            Self::Dense(t) => Ok(t),
            Self::Rows(_) => Err(OpError::VariableType {
                slot: OUT,
                expected: "dense tensor",
            }),
        }
    }

    /// Unwraps selected rows.
    ///
    /// # Errors
    /// [`OpError::VariableType`] for a dense value.
    pub fn into_rows(self) -> Result<SelectedRows<T>> {
        match self {
            Self::Rows(r) => Ok(r),
            Self::Dense(_) => Err(OpError::VariableType {
                slot: OUT,
                expected: "selected rows",
            }),
        }
    }

    /// Dims of the value; selected rows report `[height, width…]`.
    #[must_use]
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Dense(t) => t.shape.clone(),
            Self::Rows(r) => r.dims(),
        }
    }
}

/// An operator attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Str(String),
}

/// Named operator attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(HashMap<String, Attribute>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Attribute) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.0.get(name)
    }

    /// Integer attribute `name`, or `default` when unset.
    ///
    /// # Errors
    /// [`OpError::AttributeType`] if the attribute is not an integer.
    pub fn get_int(&self, name: &str, default: i64) -> Result<i64> {
        match self.0.get(name) {
            None => Ok(default),
            Some(Attribute::Int(v)) => Ok(*v),
            Some(_) => Err(OpError::AttributeType {
                name: name.to_owned(),
                expected: "int",
            }),
        }
    }

    /// Integer-list attribute `name`, or an empty list when unset.
    ///
    /// # Errors
    /// [`OpError::AttributeType`] if the attribute is not an integer list.
    pub fn get_ints(&self, name: &str) -> Result<&[i64]> {
        match self.0.get(name) {
            None => Ok(&[]),
            Some(Attribute::Ints(v)) => Ok(v),
            Some(_) => Err(OpError::AttributeType {
                name: name.to_owned(),
                expected: "int list",
            }),
        }
    }
}

/// Inputs, requested outputs and attributes of one kernel invocation.
#[derive(Debug, Clone)]
pub struct OpContext<'a, T> {
    inputs: HashMap<&'static str, Vec<&'a Variable<T>>>,
    outputs: HashMap<&'static str, usize>,
    attrs: Attributes,
}

impl<T> Default for OpContext<'_, T> {
    fn default() -> Self {
        Self {
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            attrs: Attributes::new(),
        }
    }
}

impl<'a, T> OpContext<'a, T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to input slot `slot`.
    #[must_use]
    pub fn input(mut self, slot: &'static str, value: &'a Variable<T>) -> Self {
        self.inputs.entry(slot).or_default().push(value);
        self
    }

    /// Appends every value of `values` to input slot `slot`.
    #[must_use]
    pub fn inputs(
        mut self,
        slot: &'static str,
        values: impl IntoIterator<Item = &'a Variable<T>>,
    ) -> Self {
        self.inputs.entry(slot).or_default().extend(values);
        self
    }

    /// Requests `count` values from output slot `slot`.
    #[must_use]
    pub fn request(mut self, slot: &'static str, count: usize) -> Self {
        self.outputs.insert(slot, count);
        self
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.set(name, value);
        self
    }

    #[must_use]
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Number of values requested from `slot` (zero when not requested).
    #[must_use]
    pub fn output_count(&self, slot: &str) -> usize {
        self.outputs.get(slot).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn wants(&self, slot: &str) -> bool {
        self.output_count(slot) > 0
    }

    /// All values bound to `slot`, if any.
    #[must_use]
    pub fn input_list(&self, slot: &str) -> &[&'a Variable<T>] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first value bound to `slot`.
    ///
    /// # Errors
    /// [`OpError::MissingOperand`] when the slot is empty.
    pub fn required(&self, op: &'static str, slot: &'static str) -> Result<&'a Variable<T>> {
        self.input_list(slot)
            .first()
            .copied()
            .ok_or(OpError::MissingOperand { op, slot })
    }
}

/// Dims of the inputs, requested outputs and attributes for shape inference.
#[derive(Debug, Clone, Default)]
pub struct ShapeContext {
    inputs: HashMap<&'static str, Vec<usize>>,
    outputs: HashMap<&'static str, usize>,
    attrs: Attributes,
}

impl ShapeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input(mut self, slot: &'static str, dims: impl Into<Vec<usize>>) -> Self {
        self.inputs.insert(slot, dims.into());
        self
    }

    #[must_use]
    pub fn request(mut self, slot: &'static str, count: usize) -> Self {
        self.outputs.insert(slot, count);
        self
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.set(name, value);
        self
    }

    fn dims(&self, op: &'static str, slot: &'static str) -> Result<&[usize]> {
        self.inputs
            .get(slot)
            .map(Vec::as_slice)
            .ok_or(OpError::MissingOperand { op, slot })
    }

    fn output_count(&self, slot: &str) -> usize {
        self.outputs.get(slot).copied().unwrap_or(0)
    }
}

/// Values produced by a kernel, per output slot.
pub type Outputs<T> = HashMap<&'static str, Vec<Variable<T>>>;

/// Output dims produced by shape inference, per output slot.
pub type OutputDims = HashMap<&'static str, Vec<Vec<usize>>>;

/// Signature of forward and gradient kernels.
pub type KernelFn<T> = fn(&OpContext<'_, T>) -> Result<Outputs<T>>;

/// Signature of shape inference functions.
pub type InferShapeFn = fn(&ShapeContext) -> Result<OutputDims>;

/// Everything the registry knows about one operator.
#[derive(Debug, Clone, Copy)]
pub struct OpKernel<T> {
    pub name: &'static str,
    pub forward: KernelFn<T>,
    pub infer_shape: InferShapeFn,
    pub backward: Option<KernelFn<T>>,
    pub infer_grad_shape: Option<InferShapeFn>,
}

/// Name → kernel table.
#[derive(Debug, Clone)]
pub struct OpRegistry<T> {
    kernels: HashMap<&'static str, OpKernel<T>>,
}

impl<T> Default for OpRegistry<T> {
    fn default() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }
}

impl<T: Element> OpRegistry<T> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every operator this crate implements.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let kernels = [
            elementwise_kernel::<T, AddOp>(),
            elementwise_kernel::<T, SubOp>(),
            elementwise_kernel::<T, MulOp>(),
            elementwise_kernel::<T, DivOp>(),
            OpKernel {
                name: "split_selected_rows",
                forward: split_forward::<T>,
                infer_shape: split_infer_shape,
                backward: Some(split_backward::<T>),
                infer_grad_shape: Some(split_infer_grad_shape),
            },
        ];
        for kernel in kernels {
            registry.kernels.insert(kernel.name, kernel);
        }
        registry
    }

    /// Adds `kernel` under its name.
    ///
    /// # Errors
    /// [`OpError::DuplicateOperator`] if the name is taken.
    pub fn register(&mut self, kernel: OpKernel<T>) -> Result<()> {
        if self.kernels.contains_key(kernel.name) {
            return Err(OpError::DuplicateOperator(kernel.name.to_owned()));
        }
        tracing::trace!(op = kernel.name, "registering operator");
        self.kernels.insert(kernel.name, kernel);
        Ok(())
    }

    /// Looks up the kernel registered as `name`.
    ///
    /// # Errors
    /// [`OpError::UnknownOperator`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<&OpKernel<T>> {
        self.kernels
            .get(name)
            .ok_or_else(|| OpError::UnknownOperator(name.to_owned()))
    }

    /// Registered operator names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.kernels.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Runs the forward kernel of `name`.
    ///
    /// # Errors
    /// [`OpError::UnknownOperator`] or whatever the kernel reports.
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub fn run(&self, name: &str, ctx: &OpContext<'_, T>) -> Result<Outputs<T>> {
        (self.get(name)?.forward)(ctx)
    }

    /// Runs the gradient kernel of `name`.
    ///
    /// # Errors
    /// [`OpError::NoGradient`] if `name` has no gradient kernel, otherwise as [`OpRegistry::run`].
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub fn run_grad(&self, name: &str, ctx: &OpContext<'_, T>) -> Result<Outputs<T>> {
        let backward = self
            .get(name)?
            .backward
            .ok_or_else(|| OpError::NoGradient(name.to_owned()))?;
        backward(ctx)
    }

    /// Infers forward output dims of `name`.
    ///
    /// # Errors
    /// [`OpError::UnknownOperator`] or whatever inference reports.
    pub fn infer_shape(&self, name: &str, ctx: &ShapeContext) -> Result<OutputDims> {
        (self.get(name)?.infer_shape)(ctx)
    }

    /// Infers gradient output dims of `name`.
    ///
    /// # Errors
    /// [`OpError::NoGradient`] if `name` has no gradient kernel.
    pub fn infer_grad_shape(&self, name: &str, ctx: &ShapeContext) -> Result<OutputDims> {
        let infer = self
            .get(name)?
            .infer_grad_shape
            .ok_or_else(|| OpError::NoGradient(name.to_owned()))?;
        infer(ctx)
    }
}

lazy_static::lazy_static! {
    /// Built-in operators over `f32`, built on first use.
    pub static ref F32_OPERATORS: OpRegistry<f32> = OpRegistry::builtin();

    /// Built-in operators over `f64`, built on first use.
    pub static ref F64_OPERATORS: OpRegistry<f64> = OpRegistry::builtin();
}

fn elementwise_kernel<T: Element, O: BinaryGrad<T> + Default>() -> OpKernel<T> {
    OpKernel {
        name: O::NAME,
        forward: elementwise_forward::<T, O>,
        infer_shape: elementwise_infer_shape::<T, O>,
        backward: Some(elementwise_backward::<T, O>),
        infer_grad_shape: Some(elementwise_infer_grad_shape::<T, O>),
    }
}

fn elementwise_forward<T: Element, O: BinaryGrad<T> + Default>(
    ctx: &OpContext<'_, T>,
) -> Result<Outputs<T>> {
    let x = ctx.required(O::NAME, X)?.as_dense(X)?;
    let y = ctx.required(O::NAME, Y)?.as_dense(Y)?;
    if !ctx.wants(OUT) {
        return Err(OpError::MissingOperand {
            op: O::NAME,
            slot: OUT,
        });
    }
    let axis = ctx.attrs().get_int("axis", RIGHT_ALIGNED)?;

    let out = dispatch::forward(&O::default(), x, y, axis)?;
    Ok(HashMap::from([(OUT, vec![Variable::Dense(out)])]))
}

fn elementwise_backward<T: Element, O: BinaryGrad<T> + Default>(
    ctx: &OpContext<'_, T>,
) -> Result<Outputs<T>> {
    let x = ctx.required(O::NAME, X)?.as_dense(X)?;
    let y = ctx.required(O::NAME, Y)?.as_dense(Y)?;
    let dout = ctx.required(O::NAME, OUT_GRAD)?.as_dense(OUT_GRAD)?;
    let axis = ctx.attrs().get_int("axis", RIGHT_ALIGNED)?;

    let want_dx = ctx.wants(X_GRAD);
    let want_dy = ctx.wants(Y_GRAD);
    let mut outputs = Outputs::new();
    if !want_dx && !want_dy {
        return Ok(outputs);
    }

    let (dx, dy) = dispatch::backward(&O::default(), x, y, dout, axis, want_dx, want_dy)?;
    if let Some(dx) = dx {
        outputs.insert(X_GRAD, vec![Variable::Dense(dx)]);
    }
    if let Some(dy) = dy {
        outputs.insert(Y_GRAD, vec![Variable::Dense(dy)]);
    }
    Ok(outputs)
}

fn elementwise_infer_shape<T: Element, O: BinaryGrad<T>>(
    ctx: &ShapeContext,
) -> Result<OutputDims> {
    let x = ctx.dims(O::NAME, X)?;
    let y = ctx.dims(O::NAME, Y)?;
    if ctx.output_count(OUT) == 0 {
        return Err(OpError::MissingOperand {
            op: O::NAME,
            slot: OUT,
        });
    }
    let axis = ctx.attrs.get_int("axis", RIGHT_ALIGNED)?;
    compute_plan(x, y, axis)?;
    Ok(HashMap::from([(OUT, vec![x.to_vec()])]))
}

fn elementwise_infer_grad_shape<T: Element, O: BinaryGrad<T>>(
    ctx: &ShapeContext,
) -> Result<OutputDims> {
    let x = ctx.dims(O::NAME, X)?;
    let y = ctx.dims(O::NAME, Y)?;
    let axis = ctx.attrs.get_int("axis", RIGHT_ALIGNED)?;
    compute_plan(x, y, axis)?;

    let mut dims = OutputDims::new();
    if ctx.output_count(X_GRAD) > 0 {
        dims.insert(X_GRAD, vec![x.to_vec()]);
    }
    if ctx.output_count(Y_GRAD) > 0 {
        dims.insert(Y_GRAD, vec![y.to_vec()]);
    }
    Ok(dims)
}

const SPLIT: &str = "split_selected_rows";

fn split_forward<T: Element>(ctx: &OpContext<'_, T>) -> Result<Outputs<T>> {
    let x = ctx.required(SPLIT, X)?.as_rows(X)?;
    let sections = ctx.attrs().get_ints("height_sections")?;

    let shards = split_selected_rows(x, sections, ctx.output_count(OUT))?;
    Ok(HashMap::from([(
        OUT,
        shards.into_iter().map(Variable::Rows).collect(),
    )]))
}

fn split_backward<T: Element>(ctx: &OpContext<'_, T>) -> Result<Outputs<T>> {
    if !ctx.wants(X_GRAD) {
        return Ok(Outputs::new());
    }
    let sections = ctx.attrs().get_ints("height_sections")?;
    let grads = ctx
        .input_list(OUT_GRAD)
        .iter()
        .map(|v| v.as_rows(OUT_GRAD))
        .collect::<Result<Vec<_>>>()?;

    let merged = split_selected_rows_grad(&grads, sections)?;
    Ok(HashMap::from([(X_GRAD, vec![Variable::Rows(merged)])]))
}

fn split_infer_shape(ctx: &ShapeContext) -> Result<OutputDims> {
    let x = ctx.dims(SPLIT, X)?;
    let sections = ctx.attrs.get_ints("height_sections")?;
    let outputs = ctx.output_count(OUT);
    if outputs == 0 {
        return Err(OpError::MissingOperand { op: SPLIT, slot: OUT });
    }
    Ok(HashMap::from([(OUT, infer_split_dims(x, sections, outputs)?)]))
}

fn split_infer_grad_shape(ctx: &ShapeContext) -> Result<OutputDims> {
    let x = ctx.dims(SPLIT, X)?;
    Ok(HashMap::from([(X_GRAD, vec![x.to_vec()])]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names() {
        let registry = OpRegistry::<f32>::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "elementwise_add",
                "elementwise_div",
                "elementwise_mul",
                "elementwise_sub",
                "split_selected_rows"
            ]
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = OpRegistry::<f64>::builtin();
        let kernel = *registry.get("elementwise_sub").unwrap();
        assert_eq!(
            registry.register(kernel),
            Err(OpError::DuplicateOperator("elementwise_sub".into()))
        );
    }

    #[test]
    fn attribute_types_are_checked() {
        let mut attrs = Attributes::new();
        attrs.set("axis", Attribute::Str("last".into()));
        assert!(matches!(
            attrs.get_int("axis", -1),
            Err(OpError::AttributeType { .. })
        ));
        assert_eq!(attrs.get_int("missing", 7), Ok(7));
        assert_eq!(attrs.get_ints("height_sections"), Ok(&[][..]));
    }

    #[test]
    fn elementwise_shape_inference() {
        let ctx = ShapeContext::new()
            .input(X, vec![2, 3, 4])
            .input(Y, vec![3])
            .attr("axis", Attribute::Int(1))
            .request(OUT, 1);
        let dims = F32_OPERATORS.infer_shape("elementwise_sub", &ctx).unwrap();
        assert_eq!(dims[OUT], vec![vec![2, 3, 4]]);

        let ctx = ctx.request(Y_GRAD, 1);
        let dims = F32_OPERATORS.infer_grad_shape("elementwise_sub", &ctx).unwrap();
        assert!(!dims.contains_key(X_GRAD));
        assert_eq!(dims[Y_GRAD], vec![vec![3]]);
    }
}
