//! Canonicalize `matmul_v2` to `matmul`.

use crate::compat::{Arg, Attr, OpCompat, OpCompatChecker};
use crate::config::FusionConfig;
use crate::fuse::{FusionRule, Replacement, copy_quant_attrs, run_fusion};
use crate::pattern::{Pattern, PatternEdge, PatternNode, Subgraph};
use weld_core::{
    AttrKind, IrGraph, OpDesc, OpVersionCombination, Pass, PassCapability, Result, Stage,
};

/// Rewrites every `matmul_v2` as an equivalent `matmul`, renaming
/// `trans_x`/`trans_y` to `transpose_X`/`transpose_Y` and fixing
/// `alpha = 1`. Later passes only need to recognise `matmul`.
pub struct MapMatmulV2ToMatmulPass {
    config: FusionConfig,
    compat: OpCompatChecker,
}

impl MapMatmulV2ToMatmulPass {
    pub const NAME: &'static str = "map_matmul_v2_to_matmul_pass";

    pub fn new() -> Self {
        Self::with_config(FusionConfig::default())
    }

    pub fn with_config(config: FusionConfig) -> Self {
        let mut compat = OpCompatChecker::new();
        compat
            .add(
                OpCompat::new("matmul_v2")
                    .input(Arg::tensor("X"))
                    .input(Arg::tensor("Y"))
                    .output(Arg::tensor("Out"))
                    .attr(Attr::new("trans_x").is_type(AttrKind::Bool).optional())
                    .attr(Attr::new("trans_y").is_type(AttrKind::Bool).optional()),
            )
            .add(
                OpCompat::new("matmul")
                    .input(Arg::tensor("X"))
                    .input(Arg::tensor("Y"))
                    .output(Arg::tensor("Out"))
                    .attr(Attr::new("transpose_X").is_type(AttrKind::Bool))
                    .attr(Attr::new("transpose_Y").is_type(AttrKind::Bool)),
            );

        Self { config, compat }
    }
}

impl Default for MapMatmulV2ToMatmulPass {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionRule for MapMatmulV2ToMatmulPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pattern(&self) -> Pattern {
        Pattern {
            name: Self::NAME,
            nodes: vec![
                PatternNode::var("matmul_v2_in_x").as_input(),
                PatternNode::var("matmul_v2_in_y").as_input(),
                PatternNode::op("matmul_v2_op", "matmul_v2").as_intermediate(),
                PatternNode::var("matmul_v2_out").as_output(),
            ],
            edges: vec![
                PatternEdge::arg("matmul_v2_in_x", "matmul_v2_op", "X"),
                PatternEdge::arg("matmul_v2_in_y", "matmul_v2_op", "Y"),
                PatternEdge::arg("matmul_v2_op", "matmul_v2_out", "Out"),
            ],
        }
    }

    fn compat(&self) -> &OpCompatChecker {
        &self.compat
    }

    fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn accepts(&self, _subgraph: &Subgraph, _graph: &IrGraph) -> Result<bool> {
        Ok(true)
    }

    fn rewrite(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<Replacement> {
        let in_x = subgraph.get("matmul_v2_in_x")?;
        let in_y = subgraph.get("matmul_v2_in_y")?;
        let op = subgraph.get("matmul_v2_op")?;
        let out = subgraph.get("matmul_v2_out")?;
        let matmul_v2 = graph.op(op)?;

        let mut desc = OpDesc::new("matmul");
        desc.set_input("X", [graph.var(in_x)?.name.as_str()]);
        desc.set_input("Y", [graph.var(in_y)?.name.as_str()]);
        desc.set_output("Out", [graph.var(out)?.name.as_str()]);
        desc.set_attr("transpose_X", matmul_v2.attr_or("trans_x", false)?);
        desc.set_attr("transpose_Y", matmul_v2.attr_or("trans_y", false)?);
        desc.set_attr("alpha", 1.0f32);
        copy_quant_attrs(matmul_v2, &mut desc);

        Ok(Replacement {
            desc,
            inputs: vec![in_x, in_y],
            outputs: vec![out],
            remove: vec![op],
        })
    }
}

impl Pass for MapMatmulV2ToMatmulPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> Stage {
        Stage::Canonicalize
    }

    fn capability(&self) -> PassCapability {
        PassCapability::any().add_combination(
            OpVersionCombination::new()
                .eq("matmul_v2", 0)
                .ge("matmul", 0),
        )
    }

    fn run(&self, graph: &mut IrGraph) -> Result<usize> {
        run_fusion(self, graph)
    }
}
