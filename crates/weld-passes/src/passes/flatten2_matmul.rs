//! `flatten2 -> matmul` fusion into `mul`.

use super::{
    fed_matmul_accepts, fed_matmul_pattern, fed_matmul_replacement, matmul_compat, mul_compat,
};
use crate::compat::{Arg, Attr, OpCompat, OpCompatChecker};
use crate::config::FusionConfig;
use crate::fuse::{FusionRule, Replacement, rank_of, run_fusion};
use crate::pattern::{Pattern, Subgraph};
use weld_core::{IrGraph, OpVersionCombination, Pass, PassCapability, Result, Stage};

/// Fuses `flatten2` on a rank-4 tensor feeding a plain `matmul` (followed by
/// `elementwise_add`) into `mul`. The flatten axis becomes
/// `x_num_col_dims`.
pub struct Flatten2MatmulFusePass {
    config: FusionConfig,
    compat: OpCompatChecker,
}

impl Flatten2MatmulFusePass {
    pub const NAME: &'static str = "flatten2_matmul_fuse_pass";

    pub fn new() -> Self {
        Self::with_config(FusionConfig::default())
    }

    pub fn with_config(config: FusionConfig) -> Self {
        let mut compat = OpCompatChecker::new();
        compat
            .add(matmul_compat(Attr::new("alpha").num_ge(0.99).num_le(1.01)))
            .add(
                OpCompat::new("flatten2")
                    .input(Arg::tensor("X"))
                    .output(Arg::tensor("Out"))
                    .output(Arg::tensor("XShape"))
                    .attr(Attr::new("axis").num_ge(0.0)),
            )
            .add(mul_compat(Attr::new("x_num_col_dims").num_ge(1.0)));

        Self { config, compat }
    }
}

impl Default for Flatten2MatmulFusePass {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionRule for Flatten2MatmulFusePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pattern(&self) -> Pattern {
        fed_matmul_pattern(Self::NAME, "flatten2")
    }

    fn compat(&self) -> &OpCompatChecker {
        &self.compat
    }

    fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn accepts(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<bool> {
        let flatten_id = subgraph.get("feed_op")?;

        Ok(graph.inputs_of(flatten_id).len() == 1
            && graph.op(flatten_id)?.attr_or("axis", 1i32).is_ok()
            && rank_of(graph, subgraph, "feed_in_x")? == 4
            && fed_matmul_accepts(subgraph, graph, self.config.float_tolerance)?)
    }

    fn rewrite(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<Replacement> {
        let axis = graph.op(subgraph.get("feed_op")?)?.attr_or("axis", 1i32)?;
        fed_matmul_replacement(subgraph, graph, axis)
    }
}

impl Pass for Flatten2MatmulFusePass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> Stage {
        Stage::Fuse
    }

    fn capability(&self) -> PassCapability {
        PassCapability::any().add_combination(
            OpVersionCombination::new()
                .le("matmul", 1)
                .eq("flatten2", 0)
                .eq("mul", 0),
        )
    }

    fn run(&self, graph: &mut IrGraph) -> Result<usize> {
        run_fusion(self, graph)
    }
}
