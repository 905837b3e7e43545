//! Tests for boundary-to-boundary path analysis and block carving.

use flowplan::graph_util;
use flowplan::testing::GraphBuilder;
use flowplan::BoundaryKind;

fn diamond() -> (GraphBuilder, &'static str, &'static str) {
    let mut b = GraphBuilder::new("diamond");
    b.input("a");
    b.operator("c1", &["in"], &["out"]);
    b.operator("c2", &["in"], &["out"]);
    b.boundary("b", &["in"], &["out"], BoundaryKind::Stage);
    b.connect("a", "c1")
        .connect("a", "c2")
        .connect("c1", "b")
        .connect("c2", "b");
    (b, "a", "b")
}

#[test]
fn transpose_intersect_isolates_the_elements_between_boundaries() {
    let (b, start, end) = diamond();
    let startings = b.ids(&[start]);
    let passings = b.ids(&["c1", "c2"]);
    let arrivals = b.ids(&[end]);
    let start = b.id(start);
    let end = b.id(end);
    let graph = b.build();

    let forward = graph_util::succeed_boundary_path(&graph, start);
    let backward = graph_util::predecease_boundary_path(&graph, end);
    let path = forward.transpose_intersect(&backward);

    assert_eq!(path.startings(), &startings);
    assert_eq!(path.passings(), &passings);
    assert_eq!(path.arrivals(), &arrivals);
}

#[test]
fn create_block_excluding_boundaries_keeps_crossing_connections_as_ports() {
    let (b, start, end) = diamond();
    let body = b.ids(&["c1", "c2"]);
    let start = b.id(start);
    let end = b.id(end);
    let graph = b.build();

    let forward = graph_util::succeed_boundary_path(&graph, start);
    let backward = graph_util::predecease_boundary_path(&graph, end);
    let block = forward
        .transpose_intersect(&backward)
        .create_block(&graph, 1, false, false);

    assert_eq!(block.elements(), &body);
    assert_eq!(block.inputs().len(), 2);
    assert_eq!(block.outputs().len(), 2);
    assert!(!block.is_reduce_block());
}

#[test]
fn create_block_including_a_shuffle_starting_makes_a_reduce_block() {
    let mut b = GraphBuilder::new("reduce");
    b.operator("x", &["in"], &["out"]);
    b.boundary("s", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("y", &["in"], &["out"]);
    b.boundary("end", &["in"], &["out"], BoundaryKind::Stage);
    b.connect("x", "s").connect("s", "y").connect("y", "end");
    let shuffle = b.id("s");
    let body = b.ids(&["s", "y"]);
    let graph = b.build();

    let path = graph_util::succeed_boundary_path(&graph, shuffle);
    let block = path.create_block(&graph, 7, true, false);

    assert_eq!(block.elements(), &body);
    assert_eq!(block.inputs().len(), 1);
    assert_eq!(block.outputs().len(), 1);
    assert!(block.is_reduce_block());
}

#[test]
fn union_merges_paths_with_the_same_direction() {
    let mut b = GraphBuilder::new("union");
    b.input("a1");
    b.input("a2");
    b.operator("x1", &["in"], &["out"]);
    b.operator("x2", &["in"], &["out"]);
    b.boundary("end", &["in"], &["out"], BoundaryKind::Stage);
    b.connect("a1", "x1")
        .connect("a2", "x2")
        .connect("x1", "end")
        .connect("x2", "end");
    let a1 = b.id("a1");
    let a2 = b.id("a2");
    let startings = b.ids(&["a1", "a2"]);
    let passings = b.ids(&["x1", "x2"]);
    let graph = b.build();

    let union = graph_util::union_paths(&[
        graph_util::succeed_boundary_path(&graph, a1),
        graph_util::succeed_boundary_path(&graph, a2),
    ]);
    assert_eq!(union.startings(), &startings);
    assert_eq!(union.passings(), &passings);
}

#[test]
#[should_panic(expected = "different directions")]
fn union_rejects_mismatched_directions() {
    let (b, start, end) = diamond();
    let start = b.id(start);
    let end = b.id(end);
    let graph = b.build();

    let forward = graph_util::succeed_boundary_path(&graph, start);
    let backward = graph_util::predecease_boundary_path(&graph, end);
    let _ = forward.union(&backward);
}

#[test]
#[should_panic(expected = "forward paths")]
fn create_block_rejects_backward_paths() {
    let (b, _, end) = diamond();
    let end = b.id(end);
    let graph = b.build();

    let backward = graph_util::predecease_boundary_path(&graph, end);
    let _ = backward.create_block(&graph, 1, false, false);
}
