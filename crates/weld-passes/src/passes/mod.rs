//! Built-in fusion passes.

mod batch_norm_act;
mod flatten2_matmul;
mod map_matmul_to_mul;
mod map_matmul_v2_to_matmul;
mod reshape2_matmul;
mod squeeze2_matmul;

pub use batch_norm_act::BatchNormActFusePass;
pub use flatten2_matmul::Flatten2MatmulFusePass;
pub use map_matmul_to_mul::MapMatmulToMulPass;
pub use map_matmul_v2_to_matmul::MapMatmulV2ToMatmulPass;
pub use reshape2_matmul::Reshape2MatmulFusePass;
pub use squeeze2_matmul::Squeeze2MatmulFusePass;

use crate::compat::{Arg, Attr, OpCompat};
use crate::fuse::{Replacement, copy_quant_attrs, feeds_single_add, is_plain_matmul, rank_of};
use crate::pattern::{Pattern, PatternEdge, PatternNode, Subgraph};
use weld_core::{IrGraph, OpDesc, Result};

// ── Shared contracts ──

/// `matmul` contract with the given `alpha` constraint.
fn matmul_compat(alpha: Attr) -> OpCompat {
    OpCompat::new("matmul")
        .input(Arg::tensor("X"))
        .input(Arg::tensor("Y"))
        .output(Arg::tensor("Out"))
        .attr(alpha)
        .attr(Attr::new("transpose_X").bool_eq(false))
        .attr(Attr::new("transpose_Y").bool_eq(false))
}

/// `mul` contract with the given `x_num_col_dims` constraint.
fn mul_compat(x_num_col_dims: Attr) -> OpCompat {
    OpCompat::new("mul")
        .input(Arg::tensor("X"))
        .input(Arg::tensor("Y"))
        .output(Arg::tensor("Out"))
        .attr(x_num_col_dims)
        .attr(Attr::new("y_num_col_dims").num_eq(1.0))
}

// ── <reshaping op> -> matmul ──

/// `<feed_type>(X) -> Out -> matmul(X, persistable Y) -> Out`.
///
/// Roles: `feed_in_x`, `feed_op`, `matmul_in_x`, `matmul_in_y`,
/// `matmul_op`, `matmul_out`.
fn fed_matmul_pattern(name: &'static str, feed_type: &'static str) -> Pattern {
    Pattern {
        name,
        nodes: vec![
            PatternNode::var("feed_in_x").as_input(),
            PatternNode::op("feed_op", feed_type).as_intermediate(),
            PatternNode::var("matmul_in_x")
                .as_intermediate()
                .output_count(1),
            PatternNode::var("matmul_in_y").as_input().persistable(),
            PatternNode::op("matmul_op", "matmul").as_intermediate(),
            PatternNode::var("matmul_out").as_output(),
        ],
        edges: vec![
            PatternEdge::arg("feed_in_x", "feed_op", "X"),
            PatternEdge::arg("feed_op", "matmul_in_x", "Out"),
            PatternEdge::arg("matmul_in_x", "matmul_op", "X"),
            PatternEdge::arg("matmul_in_y", "matmul_op", "Y"),
            PatternEdge::arg("matmul_op", "matmul_out", "Out"),
        ],
    }
}

/// Matmul-side filter shared by the reshaping fusions: plain matmul over two
/// rank-2 operands whose result is read only by an `elementwise_add`.
fn fed_matmul_accepts(subgraph: &Subgraph, graph: &IrGraph, tolerance: f64) -> Result<bool> {
    let matmul = graph.op(subgraph.get("matmul_op")?)?;

    Ok(is_plain_matmul(matmul, tolerance)
        && rank_of(graph, subgraph, "matmul_in_x")? == 2
        && rank_of(graph, subgraph, "matmul_in_y")? == 2
        && feeds_single_add(graph, subgraph.get("matmul_out")?))
}

/// `mul(X = feed input, Y = matmul Y)` replacing the feeding op, the
/// interior variable and the matmul.
fn fed_matmul_replacement(
    subgraph: &Subgraph,
    graph: &IrGraph,
    x_num_col_dims: i32,
) -> Result<Replacement> {
    let feed_in_x = subgraph.get("feed_in_x")?;
    let feed_op = subgraph.get("feed_op")?;
    let matmul_in_x = subgraph.get("matmul_in_x")?;
    let matmul_in_y = subgraph.get("matmul_in_y")?;
    let matmul_op = subgraph.get("matmul_op")?;
    let matmul_out = subgraph.get("matmul_out")?;

    let matmul = graph.op(matmul_op)?;
    let mut desc = OpDesc::new("mul");
    desc.set_input("X", [graph.var(feed_in_x)?.name.as_str()]);
    desc.set_input("Y", [graph.var(matmul_in_y)?.name.as_str()]);
    desc.set_output("Out", [graph.var(matmul_out)?.name.as_str()]);
    desc.set_attr("x_num_col_dims", x_num_col_dims);
    desc.set_attr("y_num_col_dims", 1i32);
    copy_quant_attrs(matmul, &mut desc);

    Ok(Replacement {
        desc,
        inputs: vec![feed_in_x, matmul_in_y],
        outputs: vec![matmul_out],
        remove: vec![feed_op, matmul_in_x, matmul_op],
    })
}
