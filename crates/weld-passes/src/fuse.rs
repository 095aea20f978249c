//! Shared machinery for fusion passes.
//!
//! A fusion pass is a [`FusionRule`]: a pattern, a structural filter, and a
//! rewrite that turns one match into a [`Replacement`]. [`run_fusion`] drives
//! the per-match sequence (filter, compat pre-check, rewrite, splice, compat
//! post-check, count) identically for every pass.

use crate::compat::OpCompatChecker;
use crate::config::{FusionConfig, PostCheck};
use crate::pattern::{GraphPatternDetector, Pattern, Subgraph};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};
use weld_core::{IrGraph, NodeId, OpDesc, Result};

/// Quantization metadata carried over from a source operator.
pub const QUANT_ATTRS: [&str; 4] = ["enable_int8", "X_scale", "weight_scale", "out_threshold"];

/// Copy quantization attributes from `src` to `dst`.
///
/// Only applies when `src` has `enable_int8`; each attribute is copied if
/// present on `src`.
pub fn copy_quant_attrs(src: &OpDesc, dst: &mut OpDesc) {
    if !src.has_attr("enable_int8") {
        return;
    }
    for name in QUANT_ATTRS {
        if let Some(value) = src.get_attr(name) {
            dst.set_attr(name, value.clone());
        }
    }
}

/// `matmul` without transposes and with `alpha` equal to 1 within
/// `tolerance`. Absent attributes take their defaults; wrongly typed ones
/// fail.
pub fn is_plain_matmul(matmul: &OpDesc, tolerance: f64) -> bool {
    let transpose_x = matmul.attr_or("transpose_X", false);
    let transpose_y = matmul.attr_or("transpose_Y", false);
    let alpha = matmul.attr_or("alpha", 1.0f32);

    matches!(
        (transpose_x, transpose_y, alpha),
        (Ok(false), Ok(false), Ok(alpha)) if (f64::from(alpha) - 1.0).abs() < tolerance
    )
}

/// The variable's only consumer is an `elementwise_add`.
pub fn feeds_single_add(graph: &IrGraph, var: NodeId) -> bool {
    match graph.outputs_of(var).as_slice() {
        [consumer] => graph
            .op(*consumer)
            .is_ok_and(|desc| desc.op_type == "elementwise_add"),
        _ => false,
    }
}

/// Rank of the variable bound to `role`.
pub fn rank_of(graph: &IrGraph, subgraph: &Subgraph, role: &str) -> Result<usize> {
    Ok(graph.var(subgraph.get(role)?)?.rank())
}

/// A new operator and the nodes it replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub desc: OpDesc,

    /// Variables linked as inputs of the new operator.
    pub inputs: Vec<NodeId>,

    /// Variables linked as outputs of the new operator.
    pub outputs: Vec<NodeId>,

    /// Operators and interior variables to remove.
    pub remove: Vec<NodeId>,
}

/// Insert the replacement operator and remove the nodes it replaces.
///
/// Outputs of removed operators that nobody else reads (e.g. `XShape`) are
/// removed along with them. All removal happens in one call, after linking.
///
/// # Errors
///
/// Returns an error if a handle in the replacement is dead or of the wrong
/// kind.
pub fn splice(graph: &mut IrGraph, replacement: Replacement) -> Result<NodeId> {
    let Replacement {
        desc,
        inputs,
        outputs,
        remove,
    } = replacement;

    let mut doomed: BTreeSet<NodeId> = remove.iter().copied().collect();
    let kept: BTreeSet<NodeId> = inputs.iter().chain(&outputs).copied().collect();

    for &id in &remove {
        if graph.op(id).is_err() {
            continue;
        }
        for out in graph.outputs_of(id) {
            let orphaned = !kept.contains(&out)
                && graph
                    .outputs_of(out)
                    .iter()
                    .all(|consumer| doomed.contains(consumer));
            if orphaned {
                doomed.insert(out);
            }
        }
    }

    let fused = graph.create_op_node(desc);
    for input in inputs {
        graph.link(input, fused)?;
    }
    for output in outputs {
        graph.link(fused, output)?;
    }

    let doomed: Vec<NodeId> = doomed.into_iter().collect();
    graph.safe_remove_nodes(&doomed);

    Ok(fused)
}

/// A pattern-driven rewrite.
pub trait FusionRule {
    /// Pass name, also the statistics key.
    fn name(&self) -> &'static str;

    fn pattern(&self) -> Pattern;

    /// Contracts for every operator the rule matches or produces.
    fn compat(&self) -> &OpCompatChecker;

    fn config(&self) -> &FusionConfig;

    /// When the fused descriptor is judged. Defaults to the configured
    /// policy; a rule that must never splice a non-compliant operator
    /// overrides this.
    fn post_check(&self) -> PostCheck {
        self.config().post_check
    }

    /// Structural filter. `Ok(false)` skips the match silently.
    fn accepts(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<bool>;

    /// Build the replacement for an accepted match. Must not mutate.
    fn rewrite(&self, subgraph: &Subgraph, graph: &IrGraph) -> Result<Replacement>;
}

/// Apply a rule to every match in the graph.
///
/// Records the found-count in the graph's statistics under the rule's name
/// and returns it.
///
/// # Errors
///
/// Returns an error if the pattern is malformed or a rewrite hits a dead
/// handle. Contract violations are logged and skipped.
pub fn run_fusion<R: FusionRule + ?Sized>(rule: &R, graph: &mut IrGraph) -> Result<usize> {
    let detector = GraphPatternDetector::new(rule.pattern())?;
    let compat = rule.compat();
    let mut found = 0;

    detector.apply(graph, |subgraph, g| {
        if !rule.accepts(subgraph, g)? {
            trace!(pass = rule.name(), "structural filter rejected match");
            return Ok(());
        }

        if !compat.is_compat_subgraph(subgraph, g) {
            warn!(pass = rule.name(), "op compat check failed on matched subgraph");
            return Ok(());
        }

        let replacement = rule.rewrite(subgraph, g)?;

        match rule.post_check() {
            PostCheck::BeforeSplice => {
                if !compat.is_compat_desc(&replacement.desc) {
                    warn!(
                        pass = rule.name(),
                        op = %replacement.desc.op_type,
                        "op compat check failed on fused operator; skipping"
                    );
                    return Ok(());
                }
                splice(g, replacement)?;
                found += 1;
            }
            PostCheck::AfterSplice => {
                let desc = replacement.desc.clone();
                splice(g, replacement)?;
                found += 1;
                if !compat.is_compat_desc(&desc) {
                    warn!(
                        pass = rule.name(),
                        op = %desc.op_type,
                        "op compat check failed on fused operator"
                    );
                }
            }
        }

        Ok(())
    })?;

    graph.add_statis(rule.name(), found);
    debug!(pass = rule.name(), found, "fusion finished");
    Ok(found)
}
