//! Pass and pipeline configuration.

use weld_core::OpVersionMap;

/// Default absolute tolerance for float attributes compared against a literal.
pub const FLOAT_TOLERANCE: f64 = 1e-5;

/// When a fusion pass judges the descriptor it is about to splice in.
///
/// This is the default for every pass. A rule may pin its own timing through
/// [`FusionRule::post_check`](crate::FusionRule::post_check):
/// `reshape2_matmul_fuse_pass` always judges before splicing, so
/// `AfterSplice` does not apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostCheck {
    /// Judge the prospective descriptor first; a failing rewrite is skipped
    /// and the graph is left untouched.
    #[default]
    BeforeSplice,

    /// Splice first, then judge and warn on failure. The rewrite stays
    /// applied and is counted.
    AfterSplice,
}

/// Settings shared by every fusion pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    pub post_check: PostCheck,

    /// Absolute tolerance used for comparisons like `alpha == 1.0`.
    pub float_tolerance: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            post_check: PostCheck::default(),
            float_tolerance: FLOAT_TOLERANCE,
        }
    }
}

/// Settings for a [`PassPipeline`](crate::PassPipeline) run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub fusion: FusionConfig,

    /// Operator versions the model was saved with. When set, passes whose
    /// capability does not accept these versions are skipped.
    pub op_versions: Option<OpVersionMap>,
}
