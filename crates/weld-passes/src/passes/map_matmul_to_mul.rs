//! Lower a plain `matmul` against a weight to `mul`.

use super::{matmul_compat, mul_compat};
use crate::compat::{Attr, OpCompatChecker};
use crate::config::FusionConfig;
use crate::fuse::{
    FusionRule, Replacement, copy_quant_attrs, is_plain_matmul, rank_of, run_fusion,
};
use crate::pattern::{Pattern, PatternEdge, PatternNode, Subgraph};
use weld_core::{
    Error, IrGraph, OpDesc, OpVersionCombination, Pass, PassCapability, Result, Stage,
};

/// Replaces `matmul(X, persistable Y)` with `mul` when neither operand is
/// transposed, `alpha` is 1, `X` has rank >= 2 and `Y` has rank 2.
///
/// `mul` flattens `X` to a matrix at `x_num_col_dims`, so the rewrite sets it
/// to `rank(X) - 1` and keeps the leading dimensions as the batch.
pub struct MapMatmulToMulPass {
    config: FusionConfig,
    compat: OpCompatChecker,
}

impl MapMatmulToMulPass {
    pub const NAME: &'static str = "map_matmul_to_mul_pass";

    pub fn new() -> Self {
        Self::with_config(FusionConfig::default())
    }

    pub fn with_config(config: FusionConfig) -> Self {
        let mut compat = OpCompatChecker::new();
        compat
            .add(matmul_compat(
                Attr::new("alpha").num_ge(0.99).num_le(1.01).optional(),
            ))
            .add(mul_compat(Attr::new("x_num_col_dims").num_ge(1.0)));

        Self { config, compat }
    }
}

impl Default for MapMatmulToMulPass {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionRule for MapMatmulToMulPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pattern(&self) -> Pattern {
        Pattern {
            name: Self::NAME,
            nodes: vec![
                PatternNode::var("matmul_in_x").as_input(),
                PatternNode::var("matmul_in_y").as_input().persistable(),
                PatternNode::op("matmul_op", "matmul").as_intermediate(),
                PatternNode::var("matmul_out").as_output(),
            ],
            edges: vec![
                PatternEdge::arg("matmul_in_x", "matmul_op", "X"),
                PatternEdge::arg("matmul_in_y", "matmul_op", "Y"),
                PatternEdge::arg("matmul_op", "matmul_out", "Out"),
            ],
        }
    }

    fn compat(&self) -> &OpCompatChecker {
        &self.compat
    }

    fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn accepts(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<bool> {
        let matmul = graph.op(subgraph.get("matmul_op")?)?;

        Ok(is_plain_matmul(matmul, self.config.float_tolerance)
            && rank_of(graph, subgraph, "matmul_in_x")? >= 2
            && rank_of(graph, subgraph, "matmul_in_y")? == 2)
    }

    fn rewrite(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<Replacement> {
        let matmul_in_x = subgraph.get("matmul_in_x")?;
        let matmul_in_y = subgraph.get("matmul_in_y")?;
        let matmul_op = subgraph.get("matmul_op")?;
        let matmul_out = subgraph.get("matmul_out")?;

        let x = graph.var(matmul_in_x)?;
        let x_num_col_dims = i32::try_from(x.rank().saturating_sub(1))
            .map_err(|_| Error::InvalidGraph(format!("rank of '{}' is out of range", x.name)))?;

        let mut desc = OpDesc::new("mul");
        desc.set_input("X", [x.name.as_str()]);
        desc.set_input("Y", [graph.var(matmul_in_y)?.name.as_str()]);
        desc.set_output("Out", [graph.var(matmul_out)?.name.as_str()]);
        desc.set_attr("x_num_col_dims", x_num_col_dims);
        desc.set_attr("y_num_col_dims", 1i32);
        copy_quant_attrs(graph.op(matmul_op)?, &mut desc);

        Ok(Replacement {
            desc,
            inputs: vec![matmul_in_x, matmul_in_y],
            outputs: vec![matmul_out],
            remove: vec![matmul_op],
        })
    }
}

impl Pass for MapMatmulToMulPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> Stage {
        Stage::Lower
    }

    fn capability(&self) -> PassCapability {
        PassCapability::any()
            .add_combination(OpVersionCombination::new().le("matmul", 1).eq("mul", 0))
    }

    fn run(&self, graph: &mut IrGraph) -> Result<usize> {
        run_fusion(self, graph)
    }
}
