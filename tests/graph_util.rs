//! Tests for graph traversal and surgery helpers.

use flowplan::graph_util;
use flowplan::testing::GraphBuilder;
use flowplan::{BoundaryKind, Connectivity, ElementKind};

#[test]
fn collect_elements_walks_both_directions() {
    let mut b = GraphBuilder::new("walk");
    b.input("in");
    b.operator("x", &["in"], &["out"]);
    b.output("out");
    b.operator("stray", &["in"], &["out"]);
    b.connect("in", "x").connect("x", "out");
    let expected = b.ids(&["in", "x", "out"]);
    let graph = b.build();

    assert_eq!(graph_util::collect_elements(&graph), expected);
}

#[test]
fn boundary_path_stops_at_the_nearest_boundaries() {
    let mut b = GraphBuilder::new("chain");
    b.input("in");
    b.operator("x", &["in"], &["out"]);
    b.operator("y", &["in"], &["out"]);
    b.boundary("s", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("z", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "x")
        .connect("x", "y")
        .connect("y", "s")
        .connect("s", "z")
        .connect("z", "out");
    let start = b.id("in");
    let passings = b.ids(&["x", "y"]);
    let arrivals = b.ids(&["s"]);
    let graph = b.build();

    let path = graph_util::succeed_boundary_path(&graph, start);
    assert_eq!(path.passings(), &passings);
    assert_eq!(path.arrivals(), &arrivals);

    let shuffle = *arrivals.iter().next().unwrap();
    let back = graph_util::predecease_boundary_path(&graph, shuffle);
    assert_eq!(back.passings(), &passings);
    assert_eq!(back.arrivals().len(), 1);
    assert!(back.arrivals().contains(&start));
}

#[test]
fn split_identity_creates_one_copy_per_pair() {
    let mut b = GraphBuilder::new("split");
    b.input("in1");
    b.input("in2");
    b.identity("mid");
    b.operator("t1", &["in"], &["out"]);
    b.operator("t2", &["in"], &["out"]);
    b.connect("in1", "mid")
        .connect("in2", "mid")
        .connect("mid", "t1")
        .connect("mid", "t2");
    let mid = b.id("mid");
    let in1_out = b.output_ref("in1");
    let mut graph = b.build();

    assert!(graph_util::split_identity(&mut graph, mid));
    assert!(!graph.contains(mid));
    let identities = graph
        .elements()
        .filter(|(_, e)| matches!(e.kind, ElementKind::Identity))
        .count();
    assert_eq!(identities, 4);
    assert_eq!(graph.opposites_of_output(in1_out).len(), 2);
}

#[test]
fn split_identity_leaves_straight_lines_alone() {
    let mut b = GraphBuilder::new("straight");
    b.input("in");
    b.identity("mid");
    b.output("out");
    b.connect("in", "mid").connect("mid", "out");
    let mid = b.id("mid");
    let mut graph = b.build();

    assert!(!graph_util::split_identity(&mut graph, mid));
    assert!(graph.contains(mid));
}

#[test]
fn skip_bridges_over_the_removed_element() {
    let mut b = GraphBuilder::new("skip");
    b.input("in");
    b.identity("mid");
    b.output("out");
    b.connect("in", "mid").connect("mid", "out");
    let mid = b.id("mid");
    let source = b.output_ref("in");
    let target = b.input_ref("out");
    let mut graph = b.build();

    graph_util::skip(&mut graph, mid);
    assert!(!graph.contains(mid));
    assert_eq!(graph.opposites_of_output(source), vec![target]);
}

#[test]
fn insert_checkpoint_pads_between_source_and_targets() {
    let mut b = GraphBuilder::new("pad");
    b.input("in");
    b.operator("x", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "x").connect("x", "out");
    let entry = b.id("in");
    let x = b.id("x");
    let output = b.output_ref("in");
    let mut graph = b.build();

    let pad = graph_util::insert_checkpoint(&mut graph, output);
    assert!(graph_util::is_stage_padding(&graph, pad));
    assert_eq!(graph_util::successors(&graph, entry), [pad].into());
    assert_eq!(graph_util::successors(&graph, pad), [x].into());
}

#[test]
fn stop_caps_a_dangling_output() {
    let mut b = GraphBuilder::new("cap");
    b.input("in");
    let output = b.output_ref("in");
    let entry = b.id("in");
    let mut graph = b.build();

    graph_util::stop(&mut graph, output);
    let succs = graph_util::successors(&graph, entry);
    assert_eq!(succs.len(), 1);
    let stop = *succs.iter().next().unwrap();
    let element = graph.element(stop);
    assert_eq!(element.boundary, BoundaryKind::Stage);
    assert_eq!(element.connectivity, Connectivity::Optional);
    assert!(element.outputs.is_empty());
}

#[test]
fn deep_copy_keeps_origins_and_edge_declarations() {
    let mut b = GraphBuilder::new("copy");
    b.input("in");
    b.operator("x", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "x").connect("x", "out");
    let graph = b.build();

    let copy = graph_util::deep_copy(&graph);
    assert_eq!(copy.inputs().len(), 1);
    assert_eq!(copy.outputs().len(), 1);
    assert_eq!(copy.elements().count(), 3);

    let originals: std::collections::BTreeSet<_> =
        graph.elements().map(|(_, e)| e.origin()).collect();
    let copies: std::collections::BTreeSet<_> = copy.elements().map(|(_, e)| e.origin()).collect();
    assert_eq!(originals, copies);
}

#[test]
fn inline_component_splices_the_body_between_its_neighbors() {
    let mut body = GraphBuilder::new("body");
    body.input("bin");
    body.operator("inner", &["in"], &["out"]);
    body.output("bout");
    body.connect("bin", "inner").connect("inner", "bout");

    let mut b = GraphBuilder::new("outer");
    let entry = b.input("in");
    let comp = b.add(
        "comp",
        flowplan::Element::component("comp", body.build()),
    );
    let exit = b.output("out");
    b.connect("in", "comp.bin").connect("comp.bout", "out");
    let mut graph = b.build();

    graph_util::inline_component(&mut graph, comp, None);
    assert!(!graph.contains(comp));
    let succs = graph_util::successors(&graph, entry);
    assert_eq!(succs.len(), 1);
    let inner = *succs.iter().next().unwrap();
    assert_eq!(graph.element(inner).name, "inner");
    assert_eq!(graph_util::successors(&graph, inner), [exit].into());
}

#[test]
fn find_cycles_reports_each_strongly_connected_set() {
    let mut b = GraphBuilder::new("cycle");
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
    let members = b.ids(&["a", "b", "c"]);
    let graph = b.build();

    let cycles = graph_util::find_cycles(&graph);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0], members);
}

#[test]
fn find_cycles_is_quiet_on_straight_lines() {
    let mut b = GraphBuilder::new("line");
    b.input("in");
    b.operator("a", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "a").connect("a", "out");
    let graph = b.build();

    assert!(graph_util::find_cycles(&graph).is_empty());
}
