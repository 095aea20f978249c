//! Common test utilities for fusion pass tests.
//!
//! Graph builders for the operator chains the built-in passes target, plus a
//! structural snapshot used to assert a graph was left untouched.

#![allow(dead_code)]

use weld_core::{GraphBuilder, IrGraph, OpDesc, VarDesc};

/// Initialize a tracing subscriber for the current test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Create a `matmul` descriptor.
///
/// # Arguments
/// * `x`, `y`, `out` - Variable names bound to `X`, `Y` and `Out`
/// * `alpha` - Scale factor; `None` leaves the attribute absent
pub fn matmul(x: &str, y: &str, out: &str, alpha: Option<f32>) -> OpDesc {
    let mut desc = OpDesc::new("matmul");
    desc.set_input("X", [x]);
    desc.set_input("Y", [y]);
    desc.set_output("Out", [out]);
    desc.set_attr("transpose_X", false);
    desc.set_attr("transpose_Y", false);
    if let Some(alpha) = alpha {
        desc.set_attr("alpha", alpha);
    }
    desc
}

pub fn elementwise_add(x: &str, y: &str, out: &str) -> OpDesc {
    let mut desc = OpDesc::new("elementwise_add");
    desc.set_input("X", [x]);
    desc.set_input("Y", [y]);
    desc.set_output("Out", [out]);
    desc.set_attr("axis", -1i32);
    desc
}

/// Create a `reshape2` descriptor flattening `x` to `shape`.
pub fn reshape2(x: &str, out: &str, xshape: &str, shape: Vec<i32>) -> OpDesc {
    let mut desc = OpDesc::new("reshape2");
    desc.set_input("X", [x]);
    desc.set_output("Out", [out]);
    desc.set_output("XShape", [xshape]);
    desc.set_attr("shape", shape);
    desc
}

/// Fully connected head:
///
/// Graph structure:
/// - `a:[1,8,1,1] -> reshape2(shape=[1,8]) -> b:[1,8]`
/// - `matmul(b, w:[8,16] persistable) -> c:[1,16]`
/// - `elementwise_add(c, bias:[16] persistable) -> d:[1,16]`
pub fn reshape_matmul_add_graph(matmul_desc: impl FnOnce(OpDesc) -> OpDesc) -> IrGraph {
    GraphBuilder::new()
        .var(VarDesc::new("a", [1, 8, 1, 1]))
        .var(VarDesc::new("b", [1, 8]))
        .var(VarDesc::new("b_xshape", [0, 1, 8, 1, 1]))
        .var(VarDesc::persistable("w", [8, 16]))
        .var(VarDesc::new("c", [1, 16]))
        .var(VarDesc::persistable("bias", [16]))
        .var(VarDesc::new("d", [1, 16]))
        .op(reshape2("a", "b", "b_xshape", vec![1, 8]))
        .op(matmul_desc(matmul("b", "w", "c", Some(1.0))))
        .op(elementwise_add("c", "bias", "d"))
        .build()
        .expect("valid graph")
}

pub fn squeeze2(x: &str, out: &str, xshape: &str, axes: Vec<i32>) -> OpDesc {
    let mut desc = OpDesc::new("squeeze2");
    desc.set_input("X", [x]);
    desc.set_output("Out", [out]);
    desc.set_output("XShape", [xshape]);
    desc.set_attr("axes", axes);
    desc
}

pub fn flatten2(x: &str, out: &str, xshape: &str, axis: i32) -> OpDesc {
    let mut desc = OpDesc::new("flatten2");
    desc.set_input("X", [x]);
    desc.set_output("Out", [out]);
    desc.set_output("XShape", [xshape]);
    desc.set_attr("axis", axis);
    desc
}

/// The three reshaping ops that collapse `a:[1,8,1,1]` into `b:[1,8]`.
pub fn flattening_feeds() -> [OpDesc; 3] {
    [
        reshape2("a", "b", "b_xshape", vec![1, 8]),
        squeeze2("a", "b", "b_xshape", vec![2, 3]),
        flatten2("a", "b", "b_xshape", 1),
    ]
}

/// `feed(a:[1,8,1,1]) -> b -> matmul(b, w) -> c`, with `c` read by
/// `consumers`.
///
/// Variables `d` and `e` (`[1,16]`) are declared for the consumers' outputs.
pub fn fed_matmul_graph(feed: OpDesc, consumers: Vec<OpDesc>) -> IrGraph {
    let mut builder = GraphBuilder::new()
        .var(VarDesc::new("a", [1, 8, 1, 1]))
        .var(VarDesc::new("b", [1, 8]))
        .var(VarDesc::new("b_xshape", [0, 1, 8, 1, 1]))
        .var(VarDesc::persistable("w", [8, 16]))
        .var(VarDesc::new("c", [1, 16]))
        .var(VarDesc::persistable("bias", [16]))
        .var(VarDesc::new("d", [1, 16]))
        .var(VarDesc::new("e", [1, 16]))
        .op(feed)
        .op(matmul("b", "w", "c", Some(1.0)));
    for consumer in consumers {
        builder = builder.op(consumer);
    }
    builder.build().expect("valid graph")
}

pub fn relu(x: &str, out: &str) -> OpDesc {
    let mut desc = OpDesc::new("relu");
    desc.set_input("X", [x]);
    desc.set_output("Out", [out]);
    desc
}

/// `matmul(x:[x_shape], w:[8,16] persistable) -> out`.
pub fn weight_matmul_graph(x_shape: &[i64], matmul_desc: impl FnOnce(OpDesc) -> OpDesc) -> IrGraph {
    let mut out_shape = x_shape.to_vec();
    if let Some(last) = out_shape.last_mut() {
        *last = 16;
    }

    GraphBuilder::new()
        .var(VarDesc::new("x", x_shape.to_vec()))
        .var(VarDesc::persistable("w", [8, 16]))
        .var(VarDesc::new("out", out_shape))
        .op(matmul_desc(matmul("x", "w", "out", Some(1.0))))
        .build()
        .expect("valid graph")
}

/// `matmul_v2(x:[4,8], w:[8,16] persistable) -> out`.
pub fn matmul_v2_graph() -> IrGraph {
    let mut desc = OpDesc::new("matmul_v2");
    desc.set_input("X", ["x"]);
    desc.set_input("Y", ["w"]);
    desc.set_output("Out", ["out"]);
    desc.set_attr("trans_x", false);
    desc.set_attr("trans_y", false);

    GraphBuilder::new()
        .var(VarDesc::new("x", [4, 8]))
        .var(VarDesc::persistable("w", [8, 16]))
        .var(VarDesc::new("out", [4, 16]))
        .op(desc)
        .build()
        .expect("valid graph")
}

/// Inference-mode `batch_norm -> relu`.
pub fn batch_norm_relu_graph() -> IrGraph {
    let mut bn = OpDesc::new("batch_norm");
    bn.set_input("X", ["x"]);
    bn.set_input("Scale", ["scale"]);
    bn.set_input("Bias", ["bias"]);
    bn.set_input("Mean", ["mean"]);
    bn.set_input("Variance", ["variance"]);
    bn.set_output("Y", ["bn_y"]);
    bn.set_attr("epsilon", 1e-5f32);
    bn.set_attr("is_test", true);

    let mut relu = OpDesc::new("relu");
    relu.set_input("X", ["bn_y"]);
    relu.set_output("Out", ["y"]);

    let mut builder = GraphBuilder::new()
        .var(VarDesc::new("x", [1, 3, 8, 8]))
        .var(VarDesc::new("bn_y", [1, 3, 8, 8]))
        .var(VarDesc::new("y", [1, 3, 8, 8]));
    for name in ["scale", "bias", "mean", "variance"] {
        builder = builder.var(VarDesc::persistable(name, [3]));
    }
    builder.op(bn).op(relu).build().expect("valid graph")
}

/// Operator descriptors of the given type.
pub fn ops_of<'a>(graph: &'a IrGraph, op_type: &str) -> Vec<&'a OpDesc> {
    graph
        .ops()
        .filter(|(_, desc)| desc.op_type == op_type)
        .map(|(_, desc)| desc)
        .collect()
}

/// Structural snapshot: every operator descriptor, every variable name and
/// the edge count, in a stable order.
#[derive(Debug, PartialEq)]
pub struct Snapshot {
    ops: Vec<OpDesc>,
    vars: Vec<String>,
    edges: usize,
}

pub fn snapshot(graph: &IrGraph) -> Snapshot {
    let mut ops: Vec<OpDesc> = graph.ops().map(|(_, desc)| desc.clone()).collect();
    ops.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));

    let mut vars: Vec<String> = graph
        .nodes()
        .filter_map(|(_, node)| node.as_var())
        .map(|var| var.name.clone())
        .collect();
    vars.sort();

    Snapshot {
        ops,
        vars,
        edges: graph.edge_count(),
    }
}
