//! `batch_norm -> relu` fusion into `batch_norm` with a fused activation.

use crate::compat::{Arg, Attr, OpCompat, OpCompatChecker};
use crate::config::FusionConfig;
use crate::fuse::{FusionRule, Replacement, run_fusion};
use crate::pattern::{Pattern, PatternEdge, PatternNode, Subgraph};
use weld_core::{AttrKind, IrGraph, OpVersionCombination, Pass, PassCapability, Result, Stage};

/// Folds a `relu` that is the only reader of an inference-mode
/// `batch_norm`'s `Y` into the batch norm itself (`fuse_with_relu = true`).
///
/// Batch norms that update their statistics (`trainable_statistics`) or
/// run in training mode (`is_test = false`) are left alone.
pub struct BatchNormActFusePass {
    config: FusionConfig,
    compat: OpCompatChecker,
}

impl BatchNormActFusePass {
    pub const NAME: &'static str = "batch_norm_act_fuse_pass";

    pub fn new() -> Self {
        Self::with_config(FusionConfig::default())
    }

    pub fn with_config(config: FusionConfig) -> Self {
        let mut compat = OpCompatChecker::new();
        compat
            .add(
                OpCompat::new("batch_norm")
                    .input(Arg::tensor("X"))
                    .input(Arg::tensor("Scale"))
                    .input(Arg::tensor("Bias"))
                    .input(Arg::tensor("Mean"))
                    .input(Arg::tensor("Variance"))
                    .input(Arg::tensor("MomentumTensor").optional())
                    .output(Arg::tensor("Y"))
                    .output(Arg::tensor("MeanOut").optional())
                    .output(Arg::tensor("VarianceOut").optional())
                    .output(Arg::tensor("SavedMean").optional())
                    .output(Arg::tensor("SavedVariance").optional())
                    .output(Arg::tensor("ReserveSpace").optional())
                    .attr(Attr::new("epsilon").num_ge(0.0).num_le(0.001))
                    .attr(Attr::new("momentum").is_type(AttrKind::Float).optional())
                    .attr(
                        Attr::new("data_layout")
                            .string_in(&["NCHW", "NHWC", "AnyLayout"])
                            .optional(),
                    )
                    .attr(Attr::new("is_test").is_type(AttrKind::Bool).optional())
                    .attr(
                        Attr::new("use_global_stats")
                            .is_type(AttrKind::Bool)
                            .optional(),
                    )
                    .attr(
                        Attr::new("trainable_statistics")
                            .bool_eq(false)
                            .optional(),
                    )
                    .attr(Attr::new("fuse_with_relu").is_type(AttrKind::Bool).optional()),
            )
            .add(
                OpCompat::new("relu")
                    .input(Arg::tensor("X"))
                    .output(Arg::tensor("Out")),
            );

        Self { config, compat }
    }
}

impl Default for BatchNormActFusePass {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionRule for BatchNormActFusePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pattern(&self) -> Pattern {
        Pattern {
            name: Self::NAME,
            nodes: vec![
                PatternNode::op("bn_op", "batch_norm"),
                PatternNode::var("bn_out").as_intermediate().output_count(1),
                PatternNode::op("act_op", "relu").as_intermediate(),
                PatternNode::var("act_out").as_output(),
            ],
            edges: vec![
                PatternEdge::arg("bn_op", "bn_out", "Y"),
                PatternEdge::arg("bn_out", "act_op", "X"),
                PatternEdge::arg("act_op", "act_out", "Out"),
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
        let bn = graph.op(subgraph.get("bn_op")?)?;

        Ok(matches!(bn.attr_or("trainable_statistics", false), Ok(false))
            && matches!(bn.attr_or("is_test", true), Ok(true)))
    }

    fn rewrite(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<Replacement> {
        let bn_op = subgraph.get("bn_op")?;
        let bn_out = subgraph.get("bn_out")?;
        let act_op = subgraph.get("act_op")?;
        let act_out = subgraph.get("act_out")?;

        let mut desc = graph.op(bn_op)?.clone();
        desc.set_output("Y", [graph.var(act_out)?.name.as_str()]);
        desc.set_attr("fuse_with_relu", true);

        let mut outputs: Vec<_> = graph
            .outputs_of(bn_op)
            .into_iter()
            .filter(|&id| id != bn_out)
            .collect();
        outputs.push(act_out);

        Ok(Replacement {
            desc,
            inputs: graph.inputs_of(bn_op),
            outputs,
            remove: vec![bn_op, bn_out, act_op],
        })
    }
}

impl Pass for BatchNormActFusePass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> Stage {
        Stage::Fuse
    }

    fn capability(&self) -> PassCapability {
        PassCapability::any()
            .add_combination(OpVersionCombination::new().le("batch_norm", 1).eq("relu", 0))
    }

    fn run(&self, graph: &mut IrGraph) -> Result<usize> {
        run_fusion(self, graph)
    }
}
