//! `reshape2 -> matmul` fusion into `mul`.

use super::{
    fed_matmul_accepts, fed_matmul_pattern, fed_matmul_replacement, matmul_compat, mul_compat,
};
use crate::compat::{Arg, Attr, OpCompat, OpCompatChecker};
use crate::config::{FusionConfig, PostCheck};
use crate::fuse::{FusionRule, Replacement, run_fusion};
use crate::pattern::{Pattern, Subgraph};
use weld_core::{AttrKind, IrGraph, OpVersionCombination, Pass, PassCapability, Result, Stage};

/// Fuses a `reshape2` that flattens an `[N, C, 1, 1]` tensor to two
/// dimensions, feeding a plain `matmul` (followed by `elementwise_add`),
/// into `mul` with `x_num_col_dims = 1`.
///
/// The reshape must take its target shape from the `shape` attribute only;
/// reshapes driven by `Shape` or `ShapeTensor` inputs are left alone.
///
/// The fused `mul` is always judged before splicing, whatever the configured
/// [`PostCheck`].
pub struct Reshape2MatmulFusePass {
    config: FusionConfig,
    compat: OpCompatChecker,
}

impl Reshape2MatmulFusePass {
    pub const NAME: &'static str = "reshape2_matmul_fuse_pass";

    pub fn new() -> Self {
        Self::with_config(FusionConfig::default())
    }

    pub fn with_config(config: FusionConfig) -> Self {
        let mut compat = OpCompatChecker::new();
        compat
            .add(
                OpCompat::new("reshape2")
                    .input(Arg::tensor("X"))
                    .input(Arg::tensor("Shape").optional())
                    .input(Arg::tensor("ShapeTensor").optional())
                    .output(Arg::tensor("Out"))
                    .output(Arg::tensor("XShape"))
                    .attr(Attr::new("shape").is_type(AttrKind::Ints)),
            )
            .add(matmul_compat(
                Attr::new("alpha").num_gt(0.99999).num_lt(1.00001),
            ))
            .add(mul_compat(Attr::new("x_num_col_dims").num_eq(1.0)));

        Self { config, compat }
    }
}

impl Default for Reshape2MatmulFusePass {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionRule for Reshape2MatmulFusePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pattern(&self) -> Pattern {
        fed_matmul_pattern(Self::NAME, "reshape2")
    }

    fn compat(&self) -> &OpCompatChecker {
        &self.compat
    }

    fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn post_check(&self) -> PostCheck {
        PostCheck::BeforeSplice
    }

    fn accepts(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<bool> {
        let reshape_id = subgraph.get("feed_op")?;
        let reshape = graph.op(reshape_id)?;
        let in_shape = graph.var(subgraph.get("feed_in_x")?)?.shape();

        let single_input = graph.inputs_of(reshape_id).len() == 1;
        let unit_hw = matches!(in_shape, [_, _, 1, 1]);
        let to_2d = matches!(reshape.attr::<Vec<i32>>("shape"), Ok(shape) if shape.len() == 2);

        Ok(single_input
            && unit_hw
            && to_2d
            && fed_matmul_accepts(subgraph, graph, self.config.float_tolerance)?)
    }

    fn rewrite(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<Replacement> {
        fed_matmul_replacement(subgraph, graph, 1)
    }
}

impl Pass for Reshape2MatmulFusePass {
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
                .eq("reshape2", 0)
                .eq("mul", 0),
        )
    }

    fn run(&self, graph: &mut IrGraph) -> Result<usize> {
        run_fusion(self, graph)
    }
}
