//! End-to-end tests of the built-in fusion passes and the pass pipeline.

mod common;

use common::*;
use weld_core::{AttributeValue, Error, IrGraph, OpDesc, OpVersionMap, Pass};
use weld_passes::compat::{Arg, Attr, OpCompat, OpCompatChecker};
use weld_passes::fuse::{Replacement, run_fusion};
use weld_passes::pattern::{Pattern, PatternEdge, PatternNode, Subgraph};
use weld_passes::{
    BatchNormActFusePass, Flatten2MatmulFusePass, FusionConfig, FusionRule, MapMatmulToMulPass,
    MapMatmulV2ToMatmulPass, PassPipeline, PassRegistry, PipelineConfig, PostCheck,
    Reshape2MatmulFusePass, Squeeze2MatmulFusePass,
};

// ================================================================================
// reshape2 -> matmul
// ================================================================================

#[test]
fn test_reshape_matmul_fuses_to_mul() {
    init_tracing();

    let mut graph = reshape_matmul_add_graph(|m| m);
    let a = graph.find_var("a").unwrap();
    let w = graph.find_var("w").unwrap();
    let c = graph.find_var("c").unwrap();

    let report = PassPipeline::with_defaults(PipelineConfig::default())
        .run(&mut graph)
        .unwrap();

    assert_eq!(report.found_count(Reshape2MatmulFusePass::NAME), Some(1));

    // Boundary variables keep their node identity
    assert_eq!(graph.find_var("a"), Some(a));
    assert_eq!(graph.find_var("w"), Some(w));
    assert_eq!(graph.find_var("c"), Some(c));
    let (mul_id, _) = graph
        .ops()
        .find(|(_, desc)| desc.op_type == "mul")
        .unwrap();
    assert_eq!(graph.inputs_of(mul_id), vec![a, w]);
    assert_eq!(graph.outputs_of(mul_id), vec![c]);

    assert_eq!(report.total(), 1);
    assert_eq!(graph.statistics()[Reshape2MatmulFusePass::NAME], 1);

    let muls = ops_of(&graph, "mul");
    assert_eq!(muls.len(), 1);
    assert_eq!(muls[0].input("X"), ["a"]);
    assert_eq!(muls[0].input("Y"), ["w"]);
    assert_eq!(muls[0].output("Out"), ["c"]);
    assert_eq!(muls[0].attr::<i32>("x_num_col_dims").unwrap(), 1);
    assert_eq!(muls[0].attr::<i32>("y_num_col_dims").unwrap(), 1);

    assert!(ops_of(&graph, "reshape2").is_empty());
    assert!(ops_of(&graph, "matmul").is_empty());
    assert!(graph.find_var("b").is_none());
    assert!(graph.find_var("b_xshape").is_none());

    // The add still reads the fused result
    assert_eq!(graph.outputs_of(c).len(), 1);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_scaled_matmul_is_left_alone() {
    init_tracing();

    let mut graph = reshape_matmul_add_graph(|mut m| {
        m.set_attr("alpha", 2.0f32);
        m
    });
    let before = snapshot(&graph);

    assert_eq!(Reshape2MatmulFusePass::new().run(&mut graph).unwrap(), 0);
    assert_eq!(snapshot(&graph), before);
    assert_eq!(graph.statistics()[Reshape2MatmulFusePass::NAME], 0);
}

#[test]
fn test_transposed_matmul_is_left_alone() {
    let mut graph = reshape_matmul_add_graph(|mut m| {
        m.set_attr("transpose_Y", true);
        m
    });
    let before = snapshot(&graph);

    let report = PassPipeline::with_defaults(PipelineConfig::default())
        .run(&mut graph)
        .unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(snapshot(&graph), before);
}

// ================================================================================
// <reshaping op> -> matmul -> elementwise_add
// ================================================================================

/// Each flattening feed paired with the pass that fuses it.
fn fed_matmul_cases() -> Vec<(OpDesc, Box<dyn Pass>)> {
    let passes: [Box<dyn Pass>; 3] = [
        Box::new(Reshape2MatmulFusePass::new()),
        Box::new(Squeeze2MatmulFusePass::new()),
        Box::new(Flatten2MatmulFusePass::new()),
    ];
    flattening_feeds().into_iter().zip(passes).collect()
}

#[test]
fn test_fed_matmul_fuses_before_single_add() {
    for (feed, pass) in fed_matmul_cases() {
        let mut graph = fed_matmul_graph(feed, vec![elementwise_add("c", "bias", "d")]);
        assert_eq!(pass.run(&mut graph).unwrap(), 1, "{}", pass.name());
        assert_eq!(ops_of(&graph, "mul").len(), 1);
    }
}

#[test]
fn test_fed_matmul_skipped_when_result_feeds_relu() {
    for (feed, pass) in fed_matmul_cases() {
        let mut graph = fed_matmul_graph(feed, vec![relu("c", "d")]);
        let before = snapshot(&graph);

        assert_eq!(pass.run(&mut graph).unwrap(), 0, "{}", pass.name());
        assert_eq!(snapshot(&graph), before);
    }
}

#[test]
fn test_fed_matmul_skipped_when_result_feeds_two_adds() {
    for (feed, pass) in fed_matmul_cases() {
        let mut graph = fed_matmul_graph(
            feed,
            vec![
                elementwise_add("c", "bias", "d"),
                elementwise_add("c", "bias", "e"),
            ],
        );
        let before = snapshot(&graph);

        assert_eq!(pass.run(&mut graph).unwrap(), 0, "{}", pass.name());
        assert_eq!(snapshot(&graph), before);
    }
}

// ================================================================================
// matmul -> mul
// ================================================================================

#[test]
fn test_rank3_input_keeps_batch_dims() {
    let mut graph = weight_matmul_graph(&[2, 4, 8], |m| m);
    let out = graph.find_var("out").unwrap();
    assert_eq!(MapMatmulToMulPass::new().run(&mut graph).unwrap(), 1);
    assert_eq!(graph.find_var("out"), Some(out));

    let muls = ops_of(&graph, "mul");
    assert_eq!(muls[0].attr::<i32>("x_num_col_dims").unwrap(), 2);
    assert_eq!(muls[0].input("X"), ["x"]);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_quant_attrs_carried_when_enabled() {
    let mut graph = weight_matmul_graph(&[4, 8], |mut m| {
        m.set_attr("enable_int8", true);
        m.set_attr("X_scale", 0.125f32);
        m.set_attr("weight_scale", vec![0.5f32]);
        m.set_attr("out_threshold", 3.0f32);
        m
    });
    assert_eq!(MapMatmulToMulPass::new().run(&mut graph).unwrap(), 1);

    let mul = ops_of(&graph, "mul")[0];
    assert_eq!(mul.get_attr("enable_int8"), Some(&AttributeValue::Bool(true)));
    assert_eq!(mul.get_attr("X_scale"), Some(&AttributeValue::Float(0.125)));
    assert_eq!(
        mul.get_attr("weight_scale"),
        Some(&AttributeValue::Floats(vec![0.5]))
    );
    assert_eq!(mul.get_attr("out_threshold"), Some(&AttributeValue::Float(3.0)));
}

#[test]
fn test_quant_attrs_absent_without_enable_flag() {
    let mut graph = weight_matmul_graph(&[4, 8], |mut m| {
        m.set_attr("X_scale", 0.125f32);
        m
    });
    assert_eq!(MapMatmulToMulPass::new().run(&mut graph).unwrap(), 1);

    let mul = ops_of(&graph, "mul")[0];
    assert!(!mul.has_attr("enable_int8"));
    assert!(!mul.has_attr("X_scale"));
}

// ================================================================================
// Pipeline
// ================================================================================

#[test]
fn test_pipeline_is_idempotent() {
    let mut graph = reshape_matmul_add_graph(|m| m);
    let mut pipeline = PassPipeline::with_defaults(PipelineConfig::default());

    assert_eq!(pipeline.run(&mut graph).unwrap().total(), 1);
    let after_first = snapshot(&graph);

    assert_eq!(pipeline.run(&mut graph).unwrap().total(), 0);
    assert_eq!(snapshot(&graph), after_first);
}

#[test]
fn test_matmul_v2_canonicalized_then_lowered() {
    init_tracing();

    let mut graph = matmul_v2_graph();
    let report = PassPipeline::with_defaults(PipelineConfig::default())
        .run(&mut graph)
        .unwrap();

    assert_eq!(report.found_count(MapMatmulV2ToMatmulPass::NAME), Some(1));
    assert_eq!(report.found_count(MapMatmulToMulPass::NAME), Some(1));
    assert!(ops_of(&graph, "matmul_v2").is_empty());
    assert!(ops_of(&graph, "matmul").is_empty());

    let mul = ops_of(&graph, "mul")[0];
    assert_eq!(mul.input("X"), ["x"]);
    assert_eq!(mul.attr::<i32>("x_num_col_dims").unwrap(), 1);
}

#[test]
fn test_pipeline_skips_passes_outside_capability() {
    let config = PipelineConfig {
        op_versions: Some(OpVersionMap::from([("mul".to_string(), 1)])),
        ..PipelineConfig::default()
    };

    let mut graph = reshape_matmul_add_graph(|m| m);
    let before = snapshot(&graph);
    let report = PassPipeline::new(config.clone())
        .add_pass(Reshape2MatmulFusePass::new())
        .add_pass(MapMatmulToMulPass::new())
        .run(&mut graph)
        .unwrap();

    assert!(report.found.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(snapshot(&graph), before);

    let eligible: Vec<_> = PassRegistry::with_defaults()
        .eligible(config.op_versions.as_ref().unwrap())
        .map(str::to_string)
        .collect();
    assert!(!eligible.contains(&Reshape2MatmulFusePass::NAME.to_string()));
}

#[test]
fn test_missing_graph_is_rejected() {
    let err = MapMatmulToMulPass::new().apply(None).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let mut graph = IrGraph::new();
    assert_eq!(MapMatmulToMulPass::new().apply(Some(&mut graph)).unwrap(), 0);
}

// ================================================================================
// batch_norm -> relu
// ================================================================================

#[test]
fn test_batch_norm_relu_fused() {
    let mut graph = batch_norm_relu_graph();
    let report = PassPipeline::with_defaults(PipelineConfig::default())
        .run(&mut graph)
        .unwrap();

    assert_eq!(report.found_count(BatchNormActFusePass::NAME), Some(1));
    assert!(ops_of(&graph, "relu").is_empty());

    let bn = ops_of(&graph, "batch_norm")[0];
    assert!(bn.attr::<bool>("fuse_with_relu").unwrap());
    assert_eq!(bn.output("Y"), ["y"]);
    assert!(graph.find_var("bn_y").is_none());
}

// ================================================================================
// Post-check policy with a user-defined rule
// ================================================================================

/// Rewrites `relu` to `scale` with a factor its own contract forbids.
struct OverscaleRule {
    config: FusionConfig,
    compat: OpCompatChecker,
}

impl OverscaleRule {
    fn new(post_check: PostCheck) -> Self {
        let mut compat = OpCompatChecker::new();
        compat
            .add(
                OpCompat::new("relu")
                    .input(Arg::tensor("X"))
                    .output(Arg::tensor("Out")),
            )
            .add(
                OpCompat::new("scale")
                    .input(Arg::tensor("X"))
                    .output(Arg::tensor("Out"))
                    .attr(Attr::new("scale").num_le(1.0)),
            );

        Self {
            config: FusionConfig {
                post_check,
                ..FusionConfig::default()
            },
            compat,
        }
    }
}

impl FusionRule for OverscaleRule {
    fn name(&self) -> &'static str {
        "overscale_pass"
    }

    fn pattern(&self) -> Pattern {
        Pattern {
            name: "overscale_pass",
            nodes: vec![
                PatternNode::var("in").as_input(),
                PatternNode::op("relu", "relu").as_intermediate(),
                PatternNode::var("out").as_output(),
            ],
            edges: vec![
                PatternEdge::arg("in", "relu", "X"),
                PatternEdge::arg("relu", "out", "Out"),
            ],
        }
    }

    fn compat(&self) -> &OpCompatChecker {
        &self.compat
    }

    fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn accepts(&self, _subgraph: &Subgraph, _graph: &IrGraph) -> weld_core::Result<bool> {
        Ok(true)
    }

    fn rewrite(&self, subgraph: &Subgraph, graph: &IrGraph) -> weld_core::Result<Replacement> {
        let input = subgraph.get("in")?;
        let output = subgraph.get("out")?;

        let mut desc = OpDesc::new("scale");
        desc.set_input("X", [graph.var(input)?.name.as_str()]);
        desc.set_output("Out", [graph.var(output)?.name.as_str()]);
        desc.set_attr("scale", 4.0f32);

        Ok(Replacement {
            desc,
            inputs: vec![input],
            outputs: vec![output],
            remove: vec![subgraph.get("relu")?],
        })
    }
}

#[test]
fn test_post_check_before_splice_keeps_graph() {
    let mut graph = batch_norm_relu_graph();
    let before = snapshot(&graph);

    let found = run_fusion(&OverscaleRule::new(PostCheck::BeforeSplice), &mut graph).unwrap();
    assert_eq!(found, 0);
    assert_eq!(snapshot(&graph), before);
    assert_eq!(graph.statistics()["overscale_pass"], 0);
}

#[test]
fn test_post_check_after_splice_keeps_rewrite() {
    let mut graph = batch_norm_relu_graph();

    let found = run_fusion(&OverscaleRule::new(PostCheck::AfterSplice), &mut graph).unwrap();
    assert_eq!(found, 1);
    assert!(ops_of(&graph, "relu").is_empty());
    assert_eq!(ops_of(&graph, "scale").len(), 1);
    assert!(graph.validate().is_ok());
}
