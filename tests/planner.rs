//! End-to-end tests for the stage planner.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use flowplan::testing::GraphBuilder;
use flowplan::{
    BlockId, BoundaryKind, Connectivity, Element, ElementKind, FlowGraph, GraphRewriter,
    InlinePolicy, Observation, OperatorClass, PlannerOptions, PortDecl, RewritePhase, StageGraph,
    StagePlanner,
};

fn planner() -> StagePlanner {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    StagePlanner::with_options(PlannerOptions::default())
}

/// Names of the elements inside `block`, for asserting where computation
/// ended up.
fn element_names(plan: &StageGraph, block: BlockId) -> BTreeSet<String> {
    plan.blocks()
        .block(block)
        .graph()
        .elements()
        .map(|(_, e)| e.name.clone())
        .collect()
}

fn stage_names(plan: &StageGraph, stage: usize) -> (BTreeSet<String>, BTreeSet<String>) {
    let stage = &plan.stages()[stage];
    let mut maps = BTreeSet::new();
    for &block in stage.map_blocks() {
        maps.extend(element_names(plan, block));
    }
    let mut reduces = BTreeSet::new();
    for &block in stage.reduce_blocks() {
        reduces.extend(element_names(plan, block));
    }
    (maps, reduces)
}

/// in -> x -> s1 -> y -> cp -> z -> s2 -> w -> out, with two shuffles
/// separated by an explicit stage boundary.
fn two_shuffle_pipeline() -> FlowGraph {
    let mut b = GraphBuilder::new("two-shuffles");
    b.input("in");
    b.operator("x", &["in"], &["out"]);
    b.boundary("s1", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("y", &["in"], &["out"]);
    b.boundary("cp", &["in"], &["out"], BoundaryKind::Stage);
    b.operator("z", &["in"], &["out"]);
    b.boundary("s2", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("w", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "x")
        .connect("x", "s1")
        .connect("s1", "y")
        .connect("y", "cp")
        .connect("cp", "z")
        .connect("z", "s2")
        .connect("s2", "w")
        .connect("w", "out");
    b.build()
}

#[test]
fn a_single_shuffle_becomes_one_map_reduce_stage() {
    let mut b = GraphBuilder::new("word-count");
    b.input("in");
    b.operator("tokenize", &["in"], &["out"]);
    b.boundary("group", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("count", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "tokenize")
        .connect("tokenize", "group")
        .connect("group", "count")
        .connect("count", "out");

    let plan = planner().plan(&b.build()).unwrap();
    assert_eq!(plan.stages().len(), 1);
    let stage = &plan.stages()[0];
    assert!(stage.has_reduce());
    assert_eq!(stage.number(), 1);
    assert_eq!(stage.map_blocks().len(), 1);
    assert_eq!(stage.reduce_blocks().len(), 1);

    let (maps, reduces) = stage_names(&plan, 0);
    assert!(maps.contains("tokenize"));
    assert!(reduces.contains("group"));
    assert!(reduces.contains("count"));
}

#[test]
fn a_stage_boundary_between_shuffles_splits_the_plan() {
    let plan = planner().plan(&two_shuffle_pipeline()).unwrap();
    assert_eq!(plan.stages().len(), 2);
    assert_eq!(plan.stages()[0].number(), 1);
    assert_eq!(plan.stages()[1].number(), 2);

    let (maps1, reduces1) = stage_names(&plan, 0);
    assert!(maps1.contains("x"));
    assert!(reduces1.contains("y"));
    let (maps2, reduces2) = stage_names(&plan, 1);
    assert!(maps2.contains("z"));
    assert!(reduces2.contains("w"));
}

#[test]
fn planning_preserves_every_operator() {
    let plan = planner().plan(&two_shuffle_pipeline()).unwrap();
    let mut operators = BTreeSet::new();
    for stage in plan.stages() {
        for &block in stage.map_blocks().iter().chain(stage.reduce_blocks()) {
            for (_, element) in plan.blocks().block(block).graph().elements() {
                if !element.is_boundary() && matches!(element.kind, ElementKind::Operator(_)) {
                    operators.insert(element.name.clone());
                }
            }
        }
    }
    let expected: BTreeSet<String> = ["x", "y", "z", "w"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(operators, expected);
}

#[test]
fn map_and_reduce_sides_never_share_a_block() {
    let plan = planner().plan(&two_shuffle_pipeline()).unwrap();
    for stage in plan.stages() {
        assert!(stage.map_blocks().is_disjoint(stage.reduce_blocks()));
        for &block in stage.reduce_blocks() {
            assert!(plan.blocks().block(block).is_reduce_block());
        }
        for &block in stage.map_blocks() {
            assert!(!plan.blocks().block(block).is_reduce_block());
        }
    }
}

fn parallel_pipelines() -> FlowGraph {
    let mut b = GraphBuilder::new("parallel");
    for suffix in ["1", "2"] {
        b.input(&format!("in{suffix}"));
        b.operator(&format!("x{suffix}"), &["in"], &["out"]);
        b.boundary(
            &format!("s{suffix}"),
            &["in"],
            &["out"],
            BoundaryKind::Shuffle,
        );
        b.operator(&format!("y{suffix}"), &["in"], &["out"]);
        b.output(&format!("out{suffix}"));
        b.connect(&format!("in{suffix}"), &format!("x{suffix}"))
            .connect(&format!("x{suffix}"), &format!("s{suffix}"))
            .connect(&format!("s{suffix}"), &format!("y{suffix}"))
            .connect(&format!("y{suffix}"), &format!("out{suffix}"));
    }
    b.build()
}

#[test]
fn independent_pipelines_compress_into_one_stage() {
    let plan = planner().plan(&parallel_pipelines()).unwrap();
    assert_eq!(plan.stages().len(), 1);
    let stage = &plan.stages()[0];
    assert_eq!(stage.map_blocks().len(), 1);
    assert_eq!(stage.reduce_blocks().len(), 1);

    let (maps, reduces) = stage_names(&plan, 0);
    assert!(maps.contains("x1") && maps.contains("x2"));
    assert!(reduces.contains("y1") && reduces.contains("y2"));
}

#[test]
fn concurrent_compression_can_be_disabled() {
    let mut options = PlannerOptions::default();
    options.compress_concurrent_stage = false;
    options.compress_block_group = false;
    let plan = StagePlanner::with_options(options)
        .plan(&parallel_pipelines())
        .unwrap();
    assert_eq!(plan.stages().len(), 2);
    let numbers: Vec<usize> = plan.stages().iter().map(|s| s.number()).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[test]
fn adjacent_stage_boundaries_stay_in_separate_stages() {
    let mut b = GraphBuilder::new("adjacent");
    b.input("in");
    b.boundary("cp", &["in"], &["out"], BoundaryKind::Stage);
    b.output("out");
    b.connect("in", "cp").connect("cp", "out");

    let plan = planner().plan(&b.build()).unwrap();
    assert_eq!(plan.stages().len(), 2);
    assert!(plan.stages().iter().all(|s| !s.has_reduce()));
}

#[test]
fn global_side_effects_are_fenced_into_their_own_stage() {
    let mut b = GraphBuilder::new("side-effect");
    b.input("in");
    b.add(
        "emit",
        Element::operator(
            "emit",
            OperatorClass::Generic,
            vec![PortDecl::new("in", flowplan::DataType::new("record"))],
            vec![PortDecl::new("out", flowplan::DataType::new("record"))],
        )
        .with_observation(Observation::AT_MOST_ONCE),
    );
    b.output("out");
    b.connect("in", "emit").connect("emit", "out");

    let plan = planner().plan(&b.build()).unwrap();
    assert_eq!(plan.stages().len(), 2);
    let (maps, _) = stage_names(&plan, 0);
    assert!(maps.contains("emit"));
}

fn component_pipeline(policy: InlinePolicy) -> FlowGraph {
    let mut body = GraphBuilder::new("body");
    body.input("bin");
    body.operator("inner", &["in"], &["out"]);
    body.output("bout");
    body.connect("bin", "inner").connect("inner", "bout");

    let mut b = GraphBuilder::new("outer");
    b.input("in");
    b.add(
        "comp",
        Element::component("comp", body.build()).with_inline(policy),
    );
    b.output("out");
    b.connect("in", "comp.bin").connect("comp.bout", "out");
    b.build()
}

#[test]
fn components_flatten_into_the_surrounding_stage_by_default() {
    let plan = planner().plan(&component_pipeline(InlinePolicy::Default)).unwrap();
    assert_eq!(plan.stages().len(), 1);
    let (maps, _) = stage_names(&plan, 0);
    assert!(maps.contains("inner"));
}

#[test]
fn segregated_components_are_fenced_with_stage_boundaries() {
    let plan = planner()
        .plan(&component_pipeline(InlinePolicy::KeepSegregated))
        .unwrap();
    assert_eq!(plan.stages().len(), 3);
    let (maps, _) = stage_names(&plan, 1);
    assert!(maps.contains("inner"));
}

#[test]
fn a_mandatory_dangling_output_is_rejected() {
    let mut b = GraphBuilder::new("dangling");
    b.input("in");
    b.operator("op", &["in"], &["out", "aux"]);
    b.output("out");
    b.connect("in", "op").connect("op.out", "out");

    let mut planner = planner();
    let failure = planner.plan(&b.build()).unwrap_err();
    assert_eq!(failure.diagnostics().len(), 1);
    let diagnostic = &failure.diagnostics()[0];
    assert!(diagnostic.message.contains("aux"));
    assert_eq!(diagnostic.element_names, vec!["op".to_string()]);
    assert!(!failure.to_json().is_empty());
}

#[test]
fn an_optional_dangling_output_is_capped() {
    let mut b = GraphBuilder::new("optional");
    b.input("in");
    b.add(
        "op",
        Element::operator(
            "op",
            OperatorClass::Generic,
            vec![PortDecl::new("in", flowplan::DataType::new("record"))],
            vec![
                PortDecl::new("out", flowplan::DataType::new("record")),
                PortDecl::new("aux", flowplan::DataType::new("record")),
            ],
        )
        .with_connectivity(Connectivity::Optional),
    );
    b.output("out");
    b.connect("in", "op").connect("op.out", "out");

    let mut planner = planner();
    let plan = planner.plan(&b.build()).unwrap();
    assert!(planner.diagnostics().is_empty());
    assert_eq!(plan.stages().len(), 1);
    assert!(!plan.stages()[0].has_reduce());
}

#[test]
fn view_input_ports_are_rejected() {
    let record = || flowplan::DataType::new("record");
    let mut b = GraphBuilder::new("views");
    b.input("in");
    b.input("side");
    b.add(
        "join",
        Element::operator(
            "join",
            OperatorClass::Generic,
            vec![PortDecl::new("in", record()), PortDecl::view("lookup", record())],
            vec![PortDecl::new("out", record())],
        ),
    );
    b.output("out");
    b.connect("in", "join.in")
        .connect("side", "join.lookup")
        .connect("join", "out");

    let failure = planner().plan(&b.build()).unwrap_err();
    assert_eq!(failure.diagnostics().len(), 1);
    let message = &failure.diagnostics()[0].message;
    assert!(message.contains("view input"));
    assert!(message.contains("lookup"));
}

#[test]
fn an_unconnected_input_is_rejected() {
    let mut b = GraphBuilder::new("lonely");
    b.input("in");
    b.operator("op", &["in"], &["out"]);
    b.operator("lonely", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "op")
        .connect("op", "out")
        .connect("lonely", "out");

    let failure = planner().plan(&b.build()).unwrap_err();
    assert_eq!(failure.diagnostics().len(), 1);
    assert!(failure.diagnostics()[0].message.contains("lonely"));
}

#[test]
fn cyclic_graphs_are_rejected() {
    let mut b = GraphBuilder::new("cyclic");
    b.input("in");
    b.operator("a", &["in"], &["out"]);
    b.operator("b", &["in"], &["out"]);
    b.operator("c", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "a")
        .connect("a", "b")
        .connect("b", "c")
        .connect("c", "a")
        .connect("c", "out");

    let failure = planner().plan(&b.build()).unwrap_err();
    assert_eq!(failure.diagnostics().len(), 1);
    assert_eq!(failure.diagnostics()[0].context.len(), 3);
}

#[test]
fn planning_never_mutates_the_input_graph() {
    let graph = two_shuffle_pipeline();
    let elements = graph.elements().count();
    let connections = graph.connections().count();

    let mut planner = planner();
    let first = planner.plan(&graph).unwrap();
    assert_eq!(graph.elements().count(), elements);
    assert_eq!(graph.connections().count(), connections);

    let second = planner.plan(&graph).unwrap();
    assert_eq!(first.stages().len(), second.stages().len());
}

struct LogRewriter {
    name: &'static str,
    phase: RewritePhase,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl GraphRewriter for LogRewriter {
    fn phase(&self) -> RewritePhase {
        self.phase
    }

    fn name(&self) -> &str {
        self.name
    }

    fn rewrite(&self, _graph: &mut FlowGraph) -> Result<bool> {
        self.log.lock().unwrap().push(self.name);
        Ok(false)
    }
}

struct FailingRewriter;

impl GraphRewriter for FailingRewriter {
    fn phase(&self) -> RewritePhase {
        RewritePhase::EarlyOptimize
    }

    fn name(&self) -> &str {
        "reject-everything"
    }

    fn rewrite(&self, _graph: &mut FlowGraph) -> Result<bool> {
        bail!("unsupported construct")
    }
}

fn trivial_graph() -> FlowGraph {
    let mut b = GraphBuilder::new("trivial");
    b.input("in");
    b.operator("op", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "op").connect("op", "out");
    b.build()
}

#[test]
fn rewriters_run_ordered_by_phase_then_name() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let rewriters: Vec<Box<dyn GraphRewriter>> = vec![
        Box::new(LogRewriter {
            name: "merge-projections",
            phase: RewritePhase::LateOptimize,
            log: Arc::clone(&log),
        }),
        Box::new(LogRewriter {
            name: "flatten-nested",
            phase: RewritePhase::EarlyOptimize,
            log: Arc::clone(&log),
        }),
        Box::new(LogRewriter {
            name: "drop-dead-ports",
            phase: RewritePhase::EarlyOptimize,
            log: Arc::clone(&log),
        }),
    ];
    let mut planner = StagePlanner::new(rewriters, PlannerOptions::default());
    planner.plan(&trivial_graph()).unwrap();

    let order = log.lock().unwrap().clone();
    assert_eq!(
        order,
        vec!["drop-dead-ports", "flatten-nested", "merge-projections"]
    );
}

#[test]
fn a_failing_rewriter_aborts_planning() {
    let mut planner = StagePlanner::new(
        vec![Box::new(FailingRewriter)],
        PlannerOptions::default(),
    );
    let failure = planner.plan(&trivial_graph()).unwrap_err();
    assert_eq!(failure.diagnostics().len(), 1);
    let message = &failure.diagnostics()[0].message;
    assert!(message.contains("reject-everything"));
    assert!(message.contains("unsupported construct"));
}

#[test]
fn options_parse_textual_keys_and_values() {
    let mut options = PlannerOptions::default();
    options
        .set(flowplan::KEY_COMPRESS_FLOW_PART, "disabled")
        .unwrap();
    assert!(!options.compress_flow_part);
    options
        .set(flowplan::KEY_COMPRESS_CONCURRENT_STAGE, "true")
        .unwrap();
    assert!(options.compress_concurrent_stage);
    assert!(options.set("compressEverything", "enabled").is_err());
    assert!(options
        .set(flowplan::KEY_COMPRESS_FLOW_BLOCK_GROUP, "sometimes")
        .is_err());
}
