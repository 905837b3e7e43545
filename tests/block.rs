//! Tests for the block graph: detaching, unification, compaction, merging.

use std::collections::{BTreeMap, BTreeSet};

use flowplan::testing::GraphBuilder;
use flowplan::{BlockGraph, BoundaryKind, FlowBlock, InputRef, OutputRef};

fn straight_line() -> (GraphBuilder, flowplan::ElementId) {
    let mut b = GraphBuilder::new("line");
    b.input("in");
    let x = b.operator("x", &["in"], &["out"]);
    b.output("out");
    b.connect("in", "x").connect("x", "out");
    (b, x)
}

fn block_around(serial: usize, b: &GraphBuilder, x: flowplan::ElementId) -> FlowBlock {
    FlowBlock::from_ports(
        serial,
        b.graph(),
        vec![InputRef::new(x, 0)],
        vec![OutputRef::new(x, 0)],
        BTreeSet::from([x]),
    )
}

#[test]
fn detach_copies_elements_into_an_owned_graph() {
    let (b, x) = straight_line();
    let mut blocks = BlockGraph::new();
    let id = blocks.add(block_around(1, &b, x));
    let graph = b.build();

    assert!(!blocks.block(id).is_detached());
    blocks.detach(&graph, id);
    assert!(blocks.block(id).is_detached());
    let owned = blocks.block(id).graph();
    assert_eq!(owned.name(), "block-1");
    assert_eq!(owned.elements().count(), 1);
    assert!(owned.elements().any(|(_, e)| e.name == "x"));

    // A second detach is a no-op.
    blocks.detach(&graph, id);
    assert_eq!(blocks.block(id).graph().elements().count(), 1);
}

#[test]
fn unify_collapses_copies_of_the_same_element() {
    let (b, x) = straight_line();
    let mut blocks = BlockGraph::new();
    let first = blocks.add(block_around(1, &b, x));
    let second = blocks.add(block_around(2, &b, x));
    let graph = b.build();
    blocks.detach(&graph, first);
    blocks.detach(&graph, second);

    let mut input_mapping = BTreeMap::new();
    let mut output_mapping = BTreeMap::new();
    let merged = blocks.merge_blocks(&[first, second], &mut input_mapping, &mut output_mapping);
    assert_eq!(blocks.block(merged).elements().len(), 2);
    assert_eq!(blocks.block(merged).inputs().len(), 2);

    blocks.unify(merged);
    let block = blocks.block(merged);
    assert_eq!(block.elements().len(), 1);
    assert_eq!(block.inputs().len(), 1);
    assert_eq!(block.outputs().len(), 1);
    assert_eq!(block.serial(), 1);
}

#[test]
fn compaction_reaches_a_fixed_point() {
    let (b, x) = straight_line();
    let mut blocks = BlockGraph::new();
    let id = blocks.add(block_around(1, &b, x));
    let graph = b.build();
    blocks.detach(&graph, id);

    // Without block edges every port is dead, and with its ports gone the
    // element can never produce anything.
    assert!(blocks.compact(id));
    assert!(blocks.block(id).is_empty());
    assert!(!blocks.compact(id));
}

#[test]
fn reduce_flag_follows_shuffle_inputs() {
    let mut b = GraphBuilder::new("mixed");
    b.operator("x", &["in"], &["out"]);
    b.boundary("s", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("y", &["in"], &["out"]);
    b.boundary("end", &["in"], &["out"], BoundaryKind::Stage);
    b.connect("x", "s").connect("s", "y").connect("y", "end");
    let x = b.id("x");
    let s = b.id("s");
    let y = b.id("y");

    let map = FlowBlock::from_ports(
        1,
        b.graph(),
        vec![InputRef::new(x, 0)],
        vec![OutputRef::new(x, 0)],
        BTreeSet::from([x]),
    );
    assert!(!map.is_reduce_block());

    let reduce = FlowBlock::from_ports(
        2,
        b.graph(),
        vec![InputRef::new(s, 0)],
        vec![OutputRef::new(y, 0)],
        BTreeSet::from([s, y]),
    );
    assert!(reduce.is_reduce_block());
}

#[test]
#[should_panic(expected = "mixes shuffle and non-shuffle inputs")]
fn blocks_never_mix_shuffle_and_plain_inputs() {
    let mut b = GraphBuilder::new("mixed");
    b.operator("x", &["in"], &["out"]);
    b.boundary("s", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("y", &["in"], &["out"]);
    b.operator("x2", &["in"], &["out"]);
    b.operator("y2", &["in"], &["out"]);
    b.connect("x", "s").connect("s", "y").connect("x2", "y2");
    let s = b.id("s");
    let y = b.id("y");
    let y2 = b.id("y2");

    let _ = FlowBlock::from_ports(
        1,
        b.graph(),
        vec![InputRef::new(s, 0), InputRef::new(y2, 0)],
        vec![OutputRef::new(y, 0)],
        BTreeSet::from([s, y, y2]),
    );
}

#[test]
#[should_panic(expected = "cannot merge map blocks with reduce blocks")]
fn merge_rejects_mixed_block_kinds() {
    let mut b = GraphBuilder::new("mixed");
    b.operator("x", &["in"], &["out"]);
    b.boundary("s", &["in"], &["out"], BoundaryKind::Shuffle);
    b.operator("y", &["in"], &["out"]);
    b.boundary("end", &["in"], &["out"], BoundaryKind::Stage);
    b.connect("x", "s").connect("s", "y").connect("y", "end");
    let x = b.id("x");
    let s = b.id("s");
    let y = b.id("y");

    let mut blocks = BlockGraph::new();
    let map = blocks.add(FlowBlock::from_ports(
        1,
        b.graph(),
        vec![InputRef::new(x, 0)],
        vec![OutputRef::new(x, 0)],
        BTreeSet::from([x]),
    ));
    let reduce = blocks.add(FlowBlock::from_ports(
        2,
        b.graph(),
        vec![InputRef::new(s, 0)],
        vec![OutputRef::new(y, 0)],
        BTreeSet::from([s, y]),
    ));
    let graph = b.build();
    blocks.detach(&graph, map);
    blocks.detach(&graph, reduce);

    let mut input_mapping = BTreeMap::new();
    let mut output_mapping = BTreeMap::new();
    let _ = blocks.merge_blocks(&[map, reduce], &mut input_mapping, &mut output_mapping);
}

#[test]
fn block_connections_drive_predecessor_queries() {
    let (b, x) = straight_line();
    let mut blocks = BlockGraph::new();
    let first = blocks.add(block_around(1, &b, x));
    let second = blocks.add(block_around(2, &b, x));

    let source = flowplan::BlockOutputRef {
        block: first,
        port: blocks.block(first).outputs()[0].id(),
    };
    let target = flowplan::BlockInputRef {
        block: second,
        port: blocks.block(second).inputs()[0].id(),
    };
    blocks.connect(source, target);

    assert_eq!(blocks.predecessors(second), BTreeSet::from([first]));
    assert_eq!(blocks.successors(first), BTreeSet::from([second]));
    assert!(blocks.predecessors(first).is_empty());
}
