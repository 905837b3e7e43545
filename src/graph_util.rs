//! Traversal and surgery helpers over [`FlowGraph`]s.
//!
//! Everything here operates through [`ElementId`] handles: boundary
//! classification, path sweeps, deep copying, identity splitting and
//! elision, and the pad insertions used by normalization. The planner and
//! the block machinery are built on these primitives.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::element::{BoundaryKind, Connectivity, Element, ElementKind};
use crate::graph::FlowGraph;
use crate::ids::{Connection, ElementId, InputRef, OutputRef};
use crate::path::{Direction, FlowPath};

/// Collect every element reachable from the graph's declared entries and
/// exits, walking connections in both directions.
pub fn collect_elements(graph: &FlowGraph) -> BTreeSet<ElementId> {
    let mut saw = BTreeSet::new();
    let mut work: VecDeque<ElementId> = graph
        .inputs()
        .iter()
        .chain(graph.outputs().iter())
        .copied()
        .collect();
    while let Some(id) = work.pop_front() {
        if !saw.insert(id) {
            continue;
        }
        work.extend(successors(graph, id));
        work.extend(predecessors(graph, id));
    }
    saw
}

/// Collect all component elements currently in the arena.
pub fn collect_components(graph: &FlowGraph) -> Vec<ElementId> {
    graph
        .elements()
        .filter(|(_, e)| matches!(e.kind, ElementKind::Component(_)))
        .map(|(id, _)| id)
        .collect()
}

/// Collect all boundary elements currently in the arena.
pub fn collect_boundaries(graph: &FlowGraph) -> Vec<ElementId> {
    graph
        .elements()
        .filter(|(_, e)| e.is_boundary())
        .map(|(id, _)| id)
        .collect()
}

/// Elements directly downstream of `id`.
pub fn successors(graph: &FlowGraph, id: ElementId) -> BTreeSet<ElementId> {
    let mut result = BTreeSet::new();
    for port in 0..graph.element(id).outputs.len() {
        for target in graph.opposites_of_output(OutputRef::new(id, port)) {
            result.insert(target.element);
        }
    }
    result
}

/// Elements directly upstream of `id`.
pub fn predecessors(graph: &FlowGraph, id: ElementId) -> BTreeSet<ElementId> {
    let mut result = BTreeSet::new();
    for port in 0..graph.element(id).inputs.len() {
        for source in graph.opposites_of_input(InputRef::new(id, port)) {
            result.insert(source.element);
        }
    }
    result
}

/// Whether `id` carries any boundary attribute.
pub fn is_boundary(graph: &FlowGraph, id: ElementId) -> bool {
    graph.element(id).is_boundary()
}

/// Whether `id` is a stage boundary. Shuffle boundaries do not qualify.
pub fn is_stage_boundary(graph: &FlowGraph, id: ElementId) -> bool {
    graph.element(id).boundary == BoundaryKind::Stage
}

/// Whether `id` is a shuffle boundary.
pub fn is_shuffle_boundary(graph: &FlowGraph, id: ElementId) -> bool {
    graph.element(id).boundary == BoundaryKind::Shuffle
}

/// Whether `id` is an elidable pass-through: identity kind, one input, one
/// output, and no boundary attribute.
pub fn is_identity(graph: &FlowGraph, id: ElementId) -> bool {
    let element = graph.element(id);
    !element.is_boundary()
        && matches!(element.kind, ElementKind::Identity)
        && element.inputs.len() == 1
        && element.outputs.len() == 1
}

/// Whether `id` is a boundary that only pads the graph, such as an inserted
/// checkpoint.
pub fn is_stage_padding(graph: &FlowGraph, id: ElementId) -> bool {
    let element = graph.element(id);
    element.is_boundary() && matches!(element.kind, ElementKind::Identity)
}

/// Whether `id` must be executed at least once.
pub fn has_mandatory_side_effect(graph: &FlowGraph, id: ElementId) -> bool {
    graph.element(id).observation.at_least_once
}

/// Whether `id` must be executed at most once.
pub fn has_global_side_effect(graph: &FlowGraph, id: ElementId) -> bool {
    graph.element(id).observation.at_most_once
}

/// Whether `id` can never produce records: it declares input ports but none
/// of them is connected.
pub fn is_always_empty(graph: &FlowGraph, id: ElementId) -> bool {
    let element = graph.element(id);
    if element.inputs.is_empty() {
        return false;
    }
    (0..element.inputs.len())
        .all(|port| graph.connections_of_input(InputRef::new(id, port)).is_empty())
}

/// Whether `id`'s results can never be observed: it declares output ports
/// but none of them is connected.
pub fn is_always_stop(graph: &FlowGraph, id: ElementId) -> bool {
    let element = graph.element(id);
    if element.outputs.is_empty() {
        return false;
    }
    (0..element.outputs.len())
        .all(|port| graph.connections_of_output(OutputRef::new(id, port)).is_empty())
}

/// Copy the elements in `elements` and every connection between them from
/// `source` into `target`, returning the handle mapping.
///
/// Copies keep their origin ids, so unification can later recognize them as
/// twins of the source elements.
pub fn copy_into(
    source: &FlowGraph,
    elements: &BTreeSet<ElementId>,
    target: &mut FlowGraph,
) -> BTreeMap<ElementId, ElementId> {
    let mut mapping = BTreeMap::new();
    for &id in elements {
        let copy = source.element(id).clone();
        mapping.insert(id, target.add(copy));
    }
    for conn in source.connections() {
        if let (Some(&up), Some(&down)) = (
            mapping.get(&conn.upstream.element),
            mapping.get(&conn.downstream.element),
        ) {
            target.connect(
                OutputRef::new(up, conn.upstream.port),
                InputRef::new(down, conn.downstream.port),
            );
        }
    }
    mapping
}

/// Deep-copy a whole graph, keeping origin ids and the declared entry and
/// exit sets. Elements unreachable from the entries and exits are dropped.
pub fn deep_copy(graph: &FlowGraph) -> FlowGraph {
    let mut copy = FlowGraph::new(graph.name());
    let elements = collect_elements(graph);
    let mapping = copy_into(graph, &elements, &mut copy);
    for id in graph.inputs() {
        copy.declare_input(mapping[id]);
    }
    for id in graph.outputs() {
        copy.declare_output(mapping[id]);
    }
    copy
}

/// Split a fan-in/fan-out identity into one fresh identity per
/// upstream-downstream pair, then remove the original.
///
/// Returns `false` when the identity has at most one connection on each
/// side, in which case the graph is left unchanged.
pub fn split_identity(graph: &mut FlowGraph, id: ElementId) -> bool {
    debug_assert!(is_identity(graph, id));
    let sources = graph.opposites_of_input(InputRef::new(id, 0));
    let targets = graph.opposites_of_output(OutputRef::new(id, 0));
    if sources.len() <= 1 && targets.len() <= 1 {
        return false;
    }
    for &source in &sources {
        for &target in &targets {
            let copy = graph.element(id).clone();
            let split = graph.add(copy);
            graph.connect(source, InputRef::new(split, 0));
            graph.connect(OutputRef::new(split, 0), target);
        }
    }
    graph.remove_element(id);
    true
}

/// Remove `id` from the graph, directly connecting each of its upstream
/// ports to each of its downstream ports.
pub fn skip(graph: &mut FlowGraph, id: ElementId) {
    let mut sources = Vec::new();
    for port in 0..graph.element(id).inputs.len() {
        sources.extend(graph.disconnect_input(InputRef::new(id, port)));
    }
    let mut targets = Vec::new();
    for port in 0..graph.element(id).outputs.len() {
        targets.extend(graph.disconnect_output(OutputRef::new(id, port)));
    }
    for &source in &sources {
        for &target in &targets {
            graph.connect(source, target);
        }
    }
    graph.remove_element(id);
}

/// Cap a dangling output with an implicit stop element.
pub fn stop(graph: &mut FlowGraph, output: OutputRef) {
    let data_type = graph.output_type(output).clone();
    let mut element = Element::identity("implicit-stop", data_type)
        .with_boundary(BoundaryKind::Stage)
        .with_connectivity(Connectivity::Optional);
    element.outputs.clear();
    let id = graph.add(element);
    graph.connect(output, InputRef::new(id, 0));
}

fn insert_pad(
    graph: &mut FlowGraph,
    output: OutputRef,
    name: &str,
    boundary: BoundaryKind,
) -> ElementId {
    let targets = graph.disconnect_output(output);
    let data_type = graph.output_type(output).clone();
    let id = graph.add(Element::identity(name, data_type).with_boundary(boundary));
    graph.connect(output, InputRef::new(id, 0));
    for target in targets {
        graph.connect(OutputRef::new(id, 0), target);
    }
    id
}

/// Insert a stage-boundary checkpoint between `output` and its targets.
pub fn insert_checkpoint(graph: &mut FlowGraph, output: OutputRef) -> ElementId {
    insert_pad(graph, output, "implicit-checkpoint", BoundaryKind::Stage)
}

/// Insert a plain identity between `output` and its targets.
pub fn insert_identity(graph: &mut FlowGraph, output: OutputRef) -> ElementId {
    insert_pad(graph, output, "padding", BoundaryKind::None)
}

/// Flatten a component element into its owner graph.
///
/// The body elements are copied in, outer connections are routed through in
/// place of the body's entry and exit stubs, and the component element and
/// stubs are removed. With `pad` set, every routed port goes through a fresh
/// identity carrying the given boundary, which keeps the body in stages of
/// its own.
///
/// # Panics
///
/// Panics if `id` is not a component element.
pub fn inline_component(graph: &mut FlowGraph, id: ElementId, pad: Option<BoundaryKind>) {
    let body = match &graph.element(id).kind {
        ElementKind::Component(body) => (**body).clone(),
        _ => panic!("element {id} is not a component"),
    };
    let body_elements = collect_elements(&body);
    let mapping = copy_into(&body, &body_elements, graph);
    for (index, entry) in body.inputs().iter().enumerate() {
        let stub = mapping[entry];
        let sources = graph.disconnect_input(InputRef::new(id, index));
        let targets = graph.disconnect_output(OutputRef::new(stub, 0));
        bypass(graph, &sources, &targets, pad);
        graph.remove_element(stub);
    }
    for (index, exit) in body.outputs().iter().enumerate() {
        let stub = mapping[exit];
        let sources = graph.disconnect_input(InputRef::new(stub, 0));
        let targets = graph.disconnect_output(OutputRef::new(id, index));
        bypass(graph, &sources, &targets, pad);
        graph.remove_element(stub);
    }
    graph.remove_element(id);
}

fn bypass(
    graph: &mut FlowGraph,
    sources: &[OutputRef],
    targets: &[InputRef],
    pad: Option<BoundaryKind>,
) {
    match pad {
        None => {
            for &source in sources {
                for &target in targets {
                    graph.connect(source, target);
                }
            }
        }
        Some(boundary) => {
            let Some(&first) = sources.first() else {
                return;
            };
            let data_type = graph.output_type(first).clone();
            let id = graph.add(Element::identity("pad", data_type).with_boundary(boundary));
            for &source in sources {
                graph.connect(source, InputRef::new(id, 0));
            }
            for &target in targets {
                graph.connect(OutputRef::new(id, 0), target);
            }
        }
    }
}

/// Sweep forward from `start` to the nearest downstream boundaries.
pub fn succeed_boundary_path(graph: &FlowGraph, start: ElementId) -> FlowPath {
    boundary_path(graph, start, Direction::Forward)
}

/// Sweep backward from `start` to the nearest upstream boundaries.
pub fn predecease_boundary_path(graph: &FlowGraph, start: ElementId) -> FlowPath {
    boundary_path(graph, start, Direction::Backward)
}

fn boundary_path(graph: &FlowGraph, start: ElementId, direction: Direction) -> FlowPath {
    let next = |id| match direction {
        Direction::Forward => successors(graph, id),
        Direction::Backward => predecessors(graph, id),
    };
    let mut passings = BTreeSet::new();
    let mut arrivals = BTreeSet::new();
    let mut saw = BTreeSet::new();
    let mut work: VecDeque<ElementId> = next(start).into_iter().collect();
    while let Some(id) = work.pop_front() {
        if !saw.insert(id) {
            continue;
        }
        if is_boundary(graph, id) {
            arrivals.insert(id);
        } else {
            passings.insert(id);
            work.extend(next(id));
        }
    }
    let mut startings = BTreeSet::new();
    startings.insert(start);
    FlowPath::new(direction, startings, passings, arrivals)
}

/// Union of any number of paths with the same direction.
///
/// # Panics
///
/// Panics if `paths` is empty or the directions differ.
pub fn union_paths(paths: &[FlowPath]) -> FlowPath {
    let (first, rest) = paths
        .split_first()
        .unwrap_or_else(|| panic!("cannot union an empty path list"));
    rest.iter().fold(first.clone(), |acc, p| acc.union(p))
}

/// The nearest boundary elements downstream of `output`.
pub fn succeeding_boundaries(graph: &FlowGraph, output: OutputRef) -> BTreeSet<ElementId> {
    let mut result = BTreeSet::new();
    let mut saw = BTreeSet::new();
    let mut work: VecDeque<ElementId> = graph
        .opposites_of_output(output)
        .into_iter()
        .map(|t| t.element)
        .collect();
    while let Some(id) = work.pop_front() {
        if !saw.insert(id) {
            continue;
        }
        if is_boundary(graph, id) {
            result.insert(id);
        } else {
            work.extend(successors(graph, id));
        }
    }
    result
}

/// Walk forward from `start` and collect the first connections hit that are
/// members of `targets`, without expanding past them.
pub fn succeeding_connections(
    graph: &FlowGraph,
    start: Connection,
    targets: &BTreeSet<Connection>,
) -> BTreeSet<Connection> {
    let mut result = BTreeSet::new();
    let mut saw = BTreeSet::new();
    let mut work = vec![start];
    while let Some(conn) = work.pop() {
        if !saw.insert(conn) {
            continue;
        }
        if targets.contains(&conn) {
            result.insert(conn);
            continue;
        }
        let element = conn.downstream.element;
        for port in 0..graph.element(element).outputs.len() {
            work.extend(graph.connections_of_output(OutputRef::new(element, port)));
        }
    }
    result
}

/// Find all cyclic element sets: strongly connected components with more
/// than one element, plus single elements carrying a self-loop.
pub fn find_cycles(graph: &FlowGraph) -> Vec<BTreeSet<ElementId>> {
    let ids = graph.element_ids();
    let adjacency: BTreeMap<ElementId, Vec<ElementId>> = ids
        .iter()
        .map(|&id| (id, successors(graph, id).into_iter().collect()))
        .collect();
    let self_loops: BTreeSet<ElementId> = graph
        .connections()
        .filter(|c| c.upstream.element == c.downstream.element)
        .map(|c| c.upstream.element)
        .collect();

    // Iterative Tarjan.
    let mut index_of: BTreeMap<ElementId, usize> = BTreeMap::new();
    let mut low: BTreeMap<ElementId, usize> = BTreeMap::new();
    let mut on_stack: BTreeSet<ElementId> = BTreeSet::new();
    let mut stack: Vec<ElementId> = Vec::new();
    let mut next_index = 0usize;
    let mut result = Vec::new();

    for &root in &ids {
        if index_of.contains_key(&root) {
            continue;
        }
        let mut frames: Vec<(ElementId, usize)> = Vec::new();
        index_of.insert(root, next_index);
        low.insert(root, next_index);
        next_index += 1;
        stack.push(root);
        on_stack.insert(root);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            let position = frame.1;
            frame.1 += 1;
            let next = adjacency[&node].get(position).copied();
            match next {
                Some(target) if !index_of.contains_key(&target) => {
                    index_of.insert(target, next_index);
                    low.insert(target, next_index);
                    next_index += 1;
                    stack.push(target);
                    on_stack.insert(target);
                    frames.push((target, 0));
                }
                Some(target) => {
                    if on_stack.contains(&target) {
                        let candidate = index_of[&target].min(low[&node]);
                        low.insert(node, candidate);
                    }
                }
                None => {
                    frames.pop();
                    if let Some(&(parent, _)) = frames.last() {
                        let candidate = low[&node].min(low[&parent]);
                        low.insert(parent, candidate);
                    }
                    if low[&node] == index_of[&node] {
                        let mut component = BTreeSet::new();
                        while let Some(member) = stack.pop() {
                            on_stack.remove(&member);
                            component.insert(member);
                            if member == node {
                                break;
                            }
                        }
                        if component.len() > 1
                            || component.iter().any(|m| self_loops.contains(m))
                        {
                            result.push(component);
                        }
                    }
                }
            }
        }
    }
    result
}
