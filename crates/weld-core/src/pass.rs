//! Optimization pass trait and stage definitions.

use crate::Result;
use crate::ir::IrGraph;
use crate::version::PassCapability;

/// Pipeline stage for organizing passes.
///
/// Passes are grouped into stages and run in a fixed order. Within each stage,
/// passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Rewrite operators into the canonical operator set (earliest stage).
    ///
    /// Example: `matmul_v2` becomes `matmul` so later patterns only need to
    /// recognise one spelling.
    Canonicalize,

    /// Fuse operator chains into single operators.
    ///
    /// Example: `reshape2 -> matmul` becomes one `mul`.
    Fuse,

    /// Lower remaining single operators to cheaper equivalents (last stage).
    ///
    /// Runs after fusion so lowering does not consume operators a fusion
    /// pattern would have matched.
    Lower,
}

/// Trait for implementing graph rewrite passes.
///
/// A pass is a graph transformation that runs during a specific stage.
/// Passes are standalone objects so a single rewrite can span several
/// operator types.
///
/// # Return Value
///
/// `run()` returns the number of rewrites the pass applied (its found-count).
/// Zero means the graph was left unchanged.
///
/// # Example
///
/// ```ignore
/// struct DeadCodeEliminationPass;
///
/// impl Pass for DeadCodeEliminationPass {
///     fn name(&self) -> &str {
///         "dead_code_elimination_pass"
///     }
///
///     fn stage(&self) -> Stage {
///         Stage::Lower
///     }
///
///     fn capability(&self) -> PassCapability {
///         PassCapability::any()
///     }
///
///     fn run(&self, graph: &mut IrGraph) -> Result<usize> {
///         // Remove operators whose outputs are never read...
///         Ok(0)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for registration, statistics and logging).
    fn name(&self) -> &str;

    /// Get the stage this pass belongs to.
    fn stage(&self) -> Stage;

    /// Operator versions this pass was written against.
    ///
    /// Declarative only: the pass does not check it. The pipeline consults
    /// it to decide whether the pass may run on a given model.
    fn capability(&self) -> PassCapability;

    /// Run the pass on the given graph.
    ///
    /// # Returns
    ///
    /// * `Ok(n)` with the number of rewrites applied.
    /// * `Err(_)` if the graph was found to be malformed mid-rewrite.
    fn run(&self, graph: &mut IrGraph) -> Result<usize>;

    /// Run the pass on an optional graph reference.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` when `graph` is `None`; nothing else
    /// is attempted in that case.
    fn apply(&self, graph: Option<&mut IrGraph>) -> Result<usize> {
        let graph = graph
            .ok_or_else(|| crate::Error::InvalidArgument("graph cannot be null".to_string()))?;
        self.run(graph)
    }
}
