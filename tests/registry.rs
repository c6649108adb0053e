use eltwise_kernels::error::OpError;
use eltwise_kernels::registry::{
    Attribute, OpContext, OpKernel, OpRegistry, OutputDims, Outputs, ShapeContext, Variable,
    F32_OPERATORS, F64_OPERATORS, OUT, OUT_GRAD, X, X_GRAD, Y, Y_GRAD,
};
use eltwise_kernels::selected_rows::SelectedRows;
use eltwise_kernels::tensor;
use eltwise_kernels::tensors::Tensor;
use std::collections::HashMap;

fn dense(outs: &mut Outputs<f64>, slot: &str) -> Tensor<f64> {
    outs.remove(slot).unwrap().remove(0).into_dense().unwrap()
}

#[test]
fn sub_forward_and_grad_by_name() {
    let x = Variable::Dense(tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    let y = Variable::Dense(tensor!([1.0, 1.0, 1.0]));
    let dout = Variable::Dense(Tensor::full(vec![2, 3], 1.0));

    let ctx = OpContext::new().input(X, &x).input(Y, &y).request(OUT, 1);
    let mut outs = F64_OPERATORS.run("elementwise_sub", &ctx).unwrap();
    assert_eq!(dense(&mut outs, OUT).data, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

    let ctx = OpContext::new()
        .input(X, &x)
        .input(Y, &y)
        .input(OUT_GRAD, &dout)
        .request(X_GRAD, 1)
        .request(Y_GRAD, 1);
    let mut grads = F64_OPERATORS.run_grad("elementwise_sub", &ctx).unwrap();
    assert_eq!(dense(&mut grads, X_GRAD).data, vec![1.0; 6]);
    assert_eq!(dense(&mut grads, Y_GRAD).data, vec![-2.0, -2.0, -2.0]);
}

#[test]
fn grad_computes_only_requested_slots() {
    let x = Variable::Dense(tensor!([[1.0, 2.0], [3.0, 4.0]]));
    let y = Variable::Dense(tensor!([1.0, 2.0]));
    let dout = Variable::Dense(Tensor::full(vec![2, 2], 1.0));

    let ctx = OpContext::new()
        .input(X, &x)
        .input(Y, &y)
        .input(OUT_GRAD, &dout)
        .request(Y_GRAD, 1);
    let grads = F64_OPERATORS.run_grad("elementwise_mul", &ctx).unwrap();
    assert!(!grads.contains_key(X_GRAD));
    assert!(grads.contains_key(Y_GRAD));
}

#[test]
fn axis_attribute_is_honored() {
    let x = Variable::Dense(tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    let y = Variable::Dense(tensor!([1.0, 2.0]));

    let ctx = OpContext::new()
        .input(X, &x)
        .input(Y, &y)
        .attr("axis", Attribute::Int(0))
        .request(OUT, 1);
    let mut outs = F64_OPERATORS.run("elementwise_sub", &ctx).unwrap();
    assert_eq!(dense(&mut outs, OUT).data, vec![0.0, 1.0, 2.0, 2.0, 3.0, 4.0]);

    let ctx = OpContext::new().input(X, &x).input(Y, &y).request(OUT, 1);
    assert!(matches!(
        F64_OPERATORS.run("elementwise_sub", &ctx),
        Err(OpError::ShapeMismatch { .. })
    ));
}

#[test]
fn missing_operands_and_bad_kinds() {
    let x = Variable::Dense(tensor!([1.0, 2.0]));
    let ctx = OpContext::new().input(X, &x).request(OUT, 1);
    assert_eq!(
        F64_OPERATORS.run("elementwise_sub", &ctx).unwrap_err(),
        OpError::MissingOperand {
            op: "elementwise_sub",
            slot: Y
        }
    );

    let rows = Variable::Rows(SelectedRows::new(vec![0], 2, tensor!([[1.0]])).unwrap());
    let ctx = OpContext::new().input(X, &x).input(Y, &rows).request(OUT, 1);
    assert!(matches!(
        F64_OPERATORS.run("elementwise_sub", &ctx),
        Err(OpError::VariableType { slot: "Y", .. })
    ));
}

#[test]
fn unknown_operator() {
    let ctx = OpContext::<f32>::new();
    assert_eq!(
        F32_OPERATORS.run("elementwise_pow", &ctx).unwrap_err(),
        OpError::UnknownOperator("elementwise_pow".into())
    );
}

#[test]
fn custom_operators_can_be_registered() {
    fn identity(ctx: &OpContext<'_, f64>) -> eltwise_kernels::Result<Outputs<f64>> {
        let x = ctx.required("identity", X)?.clone();
        Ok(HashMap::from([(OUT, vec![x])]))
    }
    fn same_dims(_: &ShapeContext) -> eltwise_kernels::Result<OutputDims> {
        Ok(HashMap::new())
    }

    let mut registry = OpRegistry::<f64>::builtin();
    let kernel = OpKernel {
        name: "identity",
        forward: identity,
        infer_shape: same_dims,
        backward: None,
        infer_grad_shape: None,
    };
    registry.register(kernel).unwrap();
    assert_eq!(
        registry.register(kernel).unwrap_err(),
        OpError::DuplicateOperator("identity".into())
    );

    let x = Variable::Dense(tensor!([1.0, 2.0]));
    let ctx = OpContext::new().input(X, &x);
    let mut outs = registry.run("identity", &ctx).unwrap();
    assert_eq!(dense(&mut outs, OUT).data, vec![1.0, 2.0]);
    assert_eq!(
        registry.run_grad("identity", &ctx).unwrap_err(),
        OpError::NoGradient("identity".into())
    );
}

#[test]
fn split_by_name_and_back() {
    let x = Variable::Rows(
        SelectedRows::new(vec![7, 5], 12, Tensor::new(vec![2, 1], vec![70.0f32, 50.0])).unwrap(),
    );
    let ctx = OpContext::new()
        .input(X, &x)
        .attr("height_sections", Attribute::Ints(vec![4, 8]))
        .request(OUT, 2);
    let mut outs = F32_OPERATORS.run("split_selected_rows", &ctx).unwrap();
    let shards = outs.remove(OUT).unwrap();
    assert_eq!(shards.len(), 2);
    assert_eq!(shards[1].as_rows(OUT).unwrap().rows, vec![3, 1]);

    let ctx = OpContext::new()
        .inputs(OUT_GRAD, &shards)
        .attr("height_sections", Attribute::Ints(vec![4, 8]))
        .request(X_GRAD, 1);
    let mut grads = F32_OPERATORS.run_grad("split_selected_rows", &ctx).unwrap();
    let merged = grads.remove(X_GRAD).unwrap().remove(0).into_rows().unwrap();
    assert_eq!(merged.rows, vec![7, 5]);
    assert_eq!(merged.height, 12);
    assert_eq!(merged.value.data, vec![70.0, 50.0]);
}

#[test]
fn split_arity_and_attribute_errors() {
    let x = Variable::Rows(
        SelectedRows::new(vec![1], 12, Tensor::new(vec![1, 1], vec![1.0f32])).unwrap(),
    );
    let ctx = OpContext::new()
        .input(X, &x)
        .attr("height_sections", Attribute::Ints(vec![4, 8]))
        .request(OUT, 3);
    assert!(matches!(
        F32_OPERATORS.run("split_selected_rows", &ctx),
        Err(OpError::Arity { sections: 2, outputs: 3 })
    ));

    let ctx = OpContext::new()
        .input(X, &x)
        .attr("height_sections", Attribute::Float(4.0))
        .request(OUT, 1);
    assert!(matches!(
        F32_OPERATORS.run("split_selected_rows", &ctx),
        Err(OpError::AttributeType { .. })
    ));
}

#[test]
fn split_shape_inference() {
    let ctx = ShapeContext::new()
        .input(X, vec![12, 16])
        .attr("height_sections", Attribute::Ints(vec![4, 8]))
        .request(OUT, 2);
    let dims = F32_OPERATORS.infer_shape("split_selected_rows", &ctx).unwrap();
    assert_eq!(dims[OUT], vec![vec![4, 16], vec![8, 16]]);

    let dims = F32_OPERATORS
        .infer_grad_shape("split_selected_rows", &ctx)
        .unwrap();
    assert_eq!(dims[X_GRAD], vec![vec![12, 16]]);
}

#[test]
fn elementwise_forward_requires_an_out_slot() {
    let x = Variable::Dense(tensor!([[1.0, 2.0], [3.0, 4.0]]));
    let y = Variable::Dense(tensor!([1.0, 2.0]));

    let ctx = OpContext::new().input(X, &x).input(Y, &y);
    assert_eq!(
        F64_OPERATORS.run("elementwise_sub", &ctx).unwrap_err(),
        OpError::MissingOperand {
            op: "elementwise_sub",
            slot: OUT
        }
    );

    let shapes = ShapeContext::new().input(X, vec![2, 2]).input(Y, vec![2]);
    assert!(matches!(
        F64_OPERATORS.infer_shape("elementwise_sub", &shapes),
        Err(OpError::MissingOperand { slot: "Out", .. })
    ));
}
