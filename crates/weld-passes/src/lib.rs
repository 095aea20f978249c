//! Operator fusion passes for weld.
//!
//! This crate rewrites a [`weld_core::IrGraph`] in place, collapsing operator
//! chains into single cheaper operators. It is organized bottom-up:
//! 1. **Pattern detection** - Find role-tagged subgraphs ([`pattern`])
//! 2. **Compatibility** - Judge operators against declared contracts ([`compat`])
//! 3. **Fusion** - Filter, rewrite and splice each match ([`fuse`], [`passes`])
//! 4. **Registry** - Name passes and their operator-version capabilities ([`registry`])
//! 5. **Pipeline** - Run passes in stage order and collect found-counts
//!
//! # Example
//!
//! ```
//! use weld_core::{GraphBuilder, OpDesc, VarDesc};
//! use weld_passes::{PassPipeline, PipelineConfig};
//!
//! # fn main() -> weld_core::Result<()> {
//! let mut matmul = OpDesc::new("matmul");
//! matmul.set_input("X", ["x"]);
//! matmul.set_input("Y", ["w"]);
//! matmul.set_output("Out", ["out"]);
//! matmul.set_attr("transpose_X", false);
//! matmul.set_attr("transpose_Y", false);
//!
//! let mut graph = GraphBuilder::new()
//!     .var(VarDesc::new("x", [4, 8]))
//!     .var(VarDesc::persistable("w", [8, 16]))
//!     .var(VarDesc::new("out", [4, 16]))
//!     .op(matmul)
//!     .build()?;
//!
//! let report = PassPipeline::with_defaults(PipelineConfig::default()).run(&mut graph)?;
//! assert_eq!(report.found_count("map_matmul_to_mul_pass"), Some(1));
//! # Ok(())
//! # }
//! ```

pub mod compat;
pub mod config;
pub mod fuse;
pub mod passes;
pub mod pattern;
pub mod registry;

pub use compat::{OpCompat, OpCompatChecker};
pub use config::{FLOAT_TOLERANCE, FusionConfig, PipelineConfig, PostCheck};
pub use fuse::FusionRule;
pub use passes::{
    BatchNormActFusePass, Flatten2MatmulFusePass, MapMatmulToMulPass, MapMatmulV2ToMatmulPass,
    Reshape2MatmulFusePass, Squeeze2MatmulFusePass,
};
pub use pattern::{GraphPatternDetector, Pattern, PatternEdge, PatternNode, Subgraph};
pub use registry::PassRegistry;

// Re-export commonly used types from weld-core
pub use weld_core::{IrGraph, Pass, Stage};

use tracing::debug;

/// Found-counts collected by one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// `(pass name, found-count)` in execution order.
    pub found: Vec<(String, usize)>,

    /// Passes skipped because the model's operator versions are outside
    /// their capability.
    pub skipped: Vec<String>,
}

impl PipelineReport {
    /// Total rewrites across all passes.
    pub fn total(&self) -> usize {
        self.found.iter().map(|(_, count)| count).sum()
    }

    /// Found-count of one pass, if it ran.
    pub fn found_count(&self, pass: &str) -> Option<usize> {
        self.found
            .iter()
            .find(|(name, _)| name == pass)
            .map(|(_, count)| *count)
    }
}

/// Pass pipeline.
///
/// The pipeline runs in fixed stages: Canonicalize → Fuse → Lower. Within a
/// stage, passes run in the order they were added.
pub struct PassPipeline {
    /// All passes to run, ordered by (stage, registration order).
    passes: Vec<Box<dyn Pass>>,

    config: PipelineConfig,
}

impl PassPipeline {
    /// Create an empty pipeline.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            passes: Vec::new(),
            config,
        }
    }

    /// Create a pipeline holding every pass of
    /// [`PassRegistry::with_defaults`], built with `config.fusion`.
    pub fn with_defaults(config: PipelineConfig) -> Self {
        let registry = PassRegistry::with_defaults();
        let mut pipeline = Self::new(config);
        for name in registry.names() {
            // Names come from the registry itself
            if let Ok(pass) = registry.create(name, &pipeline.config.fusion) {
                pipeline.passes.push(pass);
            }
        }
        pipeline
    }

    /// Add a pass to the pipeline.
    ///
    /// The pass will be inserted into the appropriate stage (determined by
    /// `pass.stage()`).
    ///
    /// # Returns
    ///
    /// Returns a mutable reference to self for method chaining.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Add an already boxed pass, e.g. one built by a [`PassRegistry`].
    pub fn add_boxed(&mut self, pass: Box<dyn Pass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Names of the queued passes in execution order.
    pub fn pass_names(&mut self) -> Vec<&str> {
        self.passes.sort_by_key(|p| p.stage());
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass on the graph in stage order.
    ///
    /// # Errors
    ///
    /// Returns the first pass error. Passes that already ran keep their
    /// rewrites.
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count(), num_passes = self.passes.len()))]
    pub fn run(&mut self, graph: &mut IrGraph) -> weld_core::Result<PipelineReport> {
        // Stable: registration order survives within a stage
        self.passes.sort_by_key(|p| p.stage());

        let mut report = PipelineReport::default();

        for pass in &self.passes {
            let _span =
                tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage()).entered();

            if let Some(versions) = &self.config.op_versions
                && !pass.capability().is_satisfied_by(versions)
            {
                debug!("operator versions outside pass capability; skipping");
                report.skipped.push(pass.name().to_string());
                continue;
            }

            let found = pass.run(graph)?;
            debug!(found, "pass finished");
            report.found.push((pass.name().to_string(), found));
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld_core::{OpVersionMap, PassCapability, Result};

    struct CountingPass {
        name: &'static str,
        stage: Stage,
        found: usize,
    }

    impl Pass for CountingPass {
        fn name(&self) -> &str {
            self.name
        }

        fn stage(&self) -> Stage {
            self.stage
        }

        fn capability(&self) -> PassCapability {
            PassCapability::any().add_combination(
                weld_core::OpVersionCombination::new().eq("matmul", 0),
            )
        }

        fn run(&self, graph: &mut IrGraph) -> Result<usize> {
            graph.add_statis(self.name, self.found);
            Ok(self.found)
        }
    }

    fn counting(name: &'static str, stage: Stage, found: usize) -> CountingPass {
        CountingPass { name, stage, found }
    }

    #[test]
    fn test_stage_ordering() {
        let mut pipeline = PassPipeline::new(PipelineConfig::default());
        pipeline
            .add_pass(counting("lower_a", Stage::Lower, 0))
            .add_pass(counting("fuse_a", Stage::Fuse, 0))
            .add_pass(counting("canon", Stage::Canonicalize, 0))
            .add_pass(counting("fuse_b", Stage::Fuse, 0));

        assert_eq!(
            pipeline.pass_names(),
            vec!["canon", "fuse_a", "fuse_b", "lower_a"]
        );
    }

    #[test]
    fn test_report() {
        let mut pipeline = PassPipeline::new(PipelineConfig::default());
        pipeline
            .add_pass(counting("a", Stage::Fuse, 2))
            .add_pass(counting("b", Stage::Fuse, 3));

        let mut graph = IrGraph::new();
        let report = pipeline.run(&mut graph).unwrap();

        assert_eq!(report.total(), 5);
        assert_eq!(report.found_count("b"), Some(3));
        assert_eq!(report.found_count("c"), None);
        assert_eq!(graph.statistics()["a"], 2);
    }

    #[test]
    fn test_capability_gating() {
        let config = PipelineConfig {
            op_versions: Some(OpVersionMap::from([("matmul".to_string(), 1)])),
            ..PipelineConfig::default()
        };
        let mut pipeline = PassPipeline::new(config);
        pipeline.add_pass(counting("a", Stage::Fuse, 1));

        let report = pipeline.run(&mut IrGraph::new()).unwrap();
        assert!(report.found.is_empty());
        assert_eq!(report.skipped, vec!["a".to_string()]);
    }

    #[test]
    fn test_defaults_hold_every_registered_pass() {
        let mut pipeline = PassPipeline::with_defaults(PipelineConfig::default());
        let names = pipeline.pass_names();
        assert_eq!(names.len(), 6);
        assert_eq!(names[0], MapMatmulV2ToMatmulPass::NAME);
        assert_eq!(names[5], MapMatmulToMulPass::NAME);
    }
}
