//! The stage planner.
//!
//! [`StagePlanner::plan`] compiles an operator graph into a [`StageGraph`]:
//!
//! 1. validate the graph (connectivity, unsupported ports, acyclicity),
//! 2. apply the registered [`GraphRewriter`]s and re-validate,
//! 3. normalize: flatten components, collapse pass-through chains, fence
//!    global side effects, insert checkpoints and padding, split and elide
//!    identities,
//! 4. carve the graph into blocks along its boundaries, connect and detach
//!    them, and compact away dead regions,
//! 5. group blocks into stages, optionally compressing concurrent stages
//!    and block groups, and number the stages in topological order.
//!
//! Planning never mutates the input graph; each call works on a deep copy.
//! On failure the collected [`Diagnostic`]s are returned instead of a plan.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::error::Error;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::block::{BlockGraph, BlockId, BlockInputRef, BlockOutputRef, FlowBlock};
use crate::element::{BoundaryKind, Connectivity, ElementKind, InlinePolicy, PortUsage};
use crate::graph::FlowGraph;
use crate::graph_util;
use crate::ids::{Connection, ElementId, InputRef, OutputRef};
use crate::options::PlannerOptions;
use crate::path::FlowPath;
use crate::rewrite::GraphRewriter;
use crate::stage::{StageBlock, StageGraph};

/// One problem found while planning.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    /// Elements involved in the problem.
    pub context: Vec<ElementId>,
    /// Names of the context elements, resolved at report time.
    pub element_names: Vec<String>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.element_names.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{} ({})", self.message, self.element_names.join(", "))
        }
    }
}

/// Planning failed; holds every diagnostic collected during the attempt.
#[derive(Clone, Debug)]
pub struct PlanFailure {
    diagnostics: Vec<Diagnostic>,
}

impl PlanFailure {
    /// The collected diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render the diagnostics as a JSON array, for build tooling.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.diagnostics).unwrap_or_else(|_| "[]".to_string())
    }
}

impl fmt::Display for PlanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage planning failed with {} diagnostic(s)",
            self.diagnostics.len()
        )?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n  {diagnostic}")?;
        }
        Ok(())
    }
}

impl Error for PlanFailure {}

/// Compiles operator graphs into stage plans.
pub struct StagePlanner {
    rewriters: Vec<Box<dyn GraphRewriter>>,
    options: PlannerOptions,
    diagnostics: Vec<Diagnostic>,
    block_serial: usize,
}

impl StagePlanner {
    /// Create a planner with the given rewriters and options.
    ///
    /// Rewriters run ordered by phase, then by name.
    pub fn new(mut rewriters: Vec<Box<dyn GraphRewriter>>, options: PlannerOptions) -> Self {
        rewriters.sort_by(|a, b| (a.phase(), a.name()).cmp(&(b.phase(), b.name())));
        Self {
            rewriters,
            options,
            diagnostics: Vec::new(),
            block_serial: 0,
        }
    }

    /// Create a planner without rewriters.
    pub fn with_options(options: PlannerOptions) -> Self {
        Self::new(Vec::new(), options)
    }

    /// Diagnostics collected by the most recent [`plan`](Self::plan) call.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Compile `graph` into a stage plan.
    ///
    /// The input graph is never mutated. On failure every collected
    /// diagnostic is returned in the error.
    pub fn plan(&mut self, graph: &FlowGraph) -> Result<StageGraph, PlanFailure> {
        self.diagnostics.clear();
        debug!(graph = graph.name(), "planning stage graph");
        let mut copy = graph_util::deep_copy(graph);
        if !self.validate(&mut copy) {
            return Err(self.failure());
        }
        if !self.rewrite(&mut copy) {
            return Err(self.failure());
        }
        self.normalize(&mut copy);
        Ok(self.build_stage_graph(&copy))
    }

    fn failure(&self) -> PlanFailure {
        PlanFailure {
            diagnostics: self.diagnostics.clone(),
        }
    }

    fn next_serial(&mut self) -> usize {
        self.block_serial += 1;
        self.block_serial
    }

    fn error(&mut self, graph: &FlowGraph, context: Vec<ElementId>, message: String) {
        warn!(%message, "stage planning diagnostic");
        let element_names = context
            .iter()
            .map(|&id| graph.element(id).name.clone())
            .collect();
        self.diagnostics.push(Diagnostic {
            context,
            element_names,
            message,
        });
    }

    // ---- validation ----

    fn validate(&mut self, graph: &mut FlowGraph) -> bool {
        let before = self.diagnostics.len();
        self.validate_elements(graph);
        self.validate_connections(graph);
        self.validate_acyclic(graph);
        for id in graph_util::collect_components(graph) {
            let mut body = match &graph.element(id).kind {
                ElementKind::Component(body) => (**body).clone(),
                _ => continue,
            };
            self.validate(&mut body);
            if let ElementKind::Component(slot) = &mut graph.element_mut(id).kind {
                **slot = body;
            }
        }
        self.diagnostics.len() == before
    }

    fn validate_elements(&mut self, graph: &FlowGraph) {
        let mut problems = Vec::new();
        for (id, element) in graph.elements() {
            for port in &element.inputs {
                if port.usage == PortUsage::View {
                    problems.push((
                        id,
                        format!(
                            "view input {:?} of {:?} is not supported by stage planning",
                            port.name, element.name,
                        ),
                    ));
                }
            }
        }
        for (id, message) in problems {
            self.error(graph, vec![id], message);
        }
    }

    fn validate_connections(&mut self, graph: &mut FlowGraph) {
        for id in graph.element_ids() {
            let element = graph.element(id);
            let name = element.name.clone();
            let connectivity = element.connectivity;
            let input_count = element.inputs.len();
            let output_count = element.outputs.len();
            for port in 0..input_count {
                if graph
                    .connections_of_input(InputRef::new(id, port))
                    .is_empty()
                {
                    let port_name = graph.element(id).inputs[port].name.clone();
                    self.error(
                        graph,
                        vec![id],
                        format!("input port {port_name:?} of {name:?} is not connected"),
                    );
                }
            }
            for port in 0..output_count {
                let output = OutputRef::new(id, port);
                if graph.connections_of_output(output).is_empty() {
                    if connectivity == Connectivity::Mandatory {
                        let port_name = graph.element(id).outputs[port].name.clone();
                        self.error(
                            graph,
                            vec![id],
                            format!("output port {port_name:?} of {name:?} is not connected"),
                        );
                    } else {
                        debug!(element = %name, port, "capping unconnected optional output");
                        graph_util::stop(graph, output);
                    }
                }
            }
        }
    }

    fn validate_acyclic(&mut self, graph: &FlowGraph) {
        for component in graph_util::find_cycles(graph) {
            let context: Vec<ElementId> = component.into_iter().collect();
            self.error(
                graph,
                context,
                "elements form a cyclic dependency".to_string(),
            );
        }
    }

    // ---- rewriting ----

    fn rewrite(&mut self, graph: &mut FlowGraph) -> bool {
        let mut modified = false;
        for index in 0..self.rewriters.len() {
            let name = self.rewriters[index].name().to_string();
            match self.rewriters[index].rewrite(graph) {
                Ok(changed) => {
                    if changed {
                        debug!(rewriter = %name, "graph rewritten");
                    }
                    modified |= changed;
                }
                Err(error) => {
                    self.error(graph, Vec::new(), format!("rewriter {name:?} failed: {error}"));
                    return false;
                }
            }
        }
        if modified && !self.validate(graph) {
            return false;
        }
        true
    }

    // ---- normalization ----

    fn normalize(&mut self, graph: &mut FlowGraph) {
        self.inline_components(graph);
        push_down_pass_through_chains(graph);
        unify_global_side_effects(graph);
        insert_checkpoints(graph);
        insert_identities(graph);
        split_identities(graph);
        reduce_identities(graph);
    }

    fn inline_components(&self, graph: &mut FlowGraph) {
        for id in graph_util::collect_components(graph) {
            if let ElementKind::Component(body) = &mut graph.element_mut(id).kind {
                self.inline_components(body);
            }
            let aggregate = match graph.element(id).inline {
                InlinePolicy::ForceAggregate => true,
                InlinePolicy::KeepSegregated => false,
                InlinePolicy::Default => self.options.compress_flow_part,
            };
            if aggregate {
                debug!(component = %graph.element(id).name, "flattening component");
                graph_util::inline_component(graph, id, None);
            } else {
                debug!(component = %graph.element(id).name, "fencing component with stage boundaries");
                graph_util::inline_component(graph, id, Some(BoundaryKind::Stage));
            }
        }
    }

    // ---- stage graph construction ----

    fn build_stage_graph(&mut self, graph: &FlowGraph) -> StageGraph {
        let mut blocks = BlockGraph::new();

        let mut entry_ports = Vec::new();
        let mut entry_elements = BTreeSet::new();
        for &id in graph.inputs() {
            entry_elements.insert(id);
            for port in 0..graph.element(id).outputs.len() {
                entry_ports.push(OutputRef::new(id, port));
            }
        }
        let serial = self.next_serial();
        let input = blocks.add(FlowBlock::from_ports(
            serial,
            graph,
            Vec::new(),
            entry_ports,
            entry_elements,
        ));

        let mut exit_ports = Vec::new();
        let mut exit_elements = BTreeSet::new();
        for &id in graph.outputs() {
            exit_elements.insert(id);
            for port in 0..graph.element(id).inputs.len() {
                exit_ports.push(InputRef::new(id, port));
            }
        }
        let serial = self.next_serial();
        let output = blocks.add(FlowBlock::from_ports(
            serial,
            graph,
            exit_ports,
            Vec::new(),
            exit_elements,
        ));

        let mut computation = self.build_computation_blocks(graph, &mut blocks);
        connect_blocks(&mut blocks, graph);
        for id in blocks.ids() {
            blocks.detach(graph, id);
        }
        trim_blocks(&mut blocks, &mut computation);

        let mut stages = self.build_stage_blocks(&mut blocks, &computation);
        compress_stage_blocks(&mut blocks, &mut stages);
        sort_stage_blocks(&blocks, &mut stages);
        debug!(stages = stages.len(), "stage graph built");
        StageGraph::new(blocks, input, output, stages)
    }

    /// Carve the computation blocks out of the normalized graph: one block
    /// per shuffle boundary and its reduce side, one per map path between a
    /// stage boundary and a shuffle, and one per path between stage
    /// boundaries.
    fn build_computation_blocks(
        &mut self,
        graph: &FlowGraph,
        blocks: &mut BlockGraph,
    ) -> Vec<BlockId> {
        let mut shuffle_forward: BTreeMap<ElementId, FlowPath> = BTreeMap::new();
        let mut shuffle_backward: BTreeMap<ElementId, FlowPath> = BTreeMap::new();
        let mut stage_forward: BTreeMap<ElementId, FlowPath> = BTreeMap::new();
        for id in graph_util::collect_boundaries(graph) {
            if graph_util::is_shuffle_boundary(graph, id) {
                shuffle_forward.insert(id, graph_util::succeed_boundary_path(graph, id));
                shuffle_backward.insert(id, graph_util::predecease_boundary_path(graph, id));
            } else if graph.has_successors(id) {
                stage_forward.insert(id, graph_util::succeed_boundary_path(graph, id));
            }
        }

        let mut created = Vec::new();

        // shuffle -> stage: the reduce side, shuffle boundary included
        for path in shuffle_forward.values() {
            let serial = self.next_serial();
            created.push(blocks.add(path.create_block(graph, serial, true, false)));
        }

        // stage -> shuffle: the map side feeding each shuffle
        for backward in shuffle_backward.values() {
            for arrival in backward.arrivals() {
                let Some(forward) = stage_forward.get(arrival) else {
                    continue;
                };
                let path = forward.transpose_intersect(backward);
                let serial = self.next_serial();
                created.push(blocks.add(path.create_block(graph, serial, false, false)));
            }
        }

        // stage -> stage: plain map blocks between stage boundaries
        for (&start, forward) in &stage_forward {
            let backwards: Vec<FlowPath> = forward
                .arrivals()
                .iter()
                .filter(|&&arrival| graph_util::is_stage_boundary(graph, arrival))
                .map(|&arrival| graph_util::predecease_boundary_path(graph, arrival))
                .collect();
            if backwards.is_empty() {
                continue;
            }
            let union = graph_util::union_paths(&backwards);
            let path = forward.transpose_intersect(&union);
            debug_assert!(path.startings().contains(&start));
            let serial = self.next_serial();
            created.push(blocks.add(path.create_block(graph, serial, false, false)));
        }
        created
    }

    /// Group computation blocks into stages.
    ///
    /// Each reduce block founds a group together with the map blocks that
    /// feed it; map blocks feeding a shuffle never found a group of their
    /// own. With concurrent-stage compression on, groups at the same
    /// critical-path distance with the same reducer-ness collapse into one
    /// stage.
    fn build_stage_blocks(
        &mut self,
        blocks: &mut BlockGraph,
        computation: &[BlockId],
    ) -> Vec<StageBlock> {
        let mut groups: Vec<BlockGroup> = Vec::new();
        for &id in computation {
            let reducer = blocks.block(id).is_reduce_block();
            if !reducer && blocks.is_succeeding_reduce_block(id) {
                continue;
            }
            groups.push(BlockGroup {
                founder: id,
                members: BTreeSet::from([id]),
                predecease: collect_predecease(blocks, id),
                reducer,
                distance: None,
            });
        }

        if self.options.compress_concurrent_stage {
            compute_distances(&mut groups);
            combine_groups(&mut groups);
        }
        self.compress_block_groups(blocks, &mut groups);

        let mut stages = Vec::new();
        for group in groups {
            if group.reducer {
                let mut maps = BTreeSet::new();
                for &member in &group.members {
                    maps.extend(blocks.predecessors(member));
                }
                stages.push(StageBlock::new(maps, group.members));
            } else {
                stages.push(StageBlock::new(group.members, BTreeSet::new()));
            }
        }
        stages
    }

    /// Merge each group's blocks, and the map blocks feeding each reduce
    /// group, into single blocks.
    fn compress_block_groups(&mut self, blocks: &mut BlockGraph, groups: &mut Vec<BlockGroup>) {
        if !self.options.compress_block_group {
            return;
        }
        let mut input_mapping: BTreeMap<BlockInputRef, BTreeSet<BlockInputRef>> = BTreeMap::new();
        let mut output_mapping: BTreeMap<BlockOutputRef, BTreeSet<BlockOutputRef>> =
            BTreeMap::new();
        let mut merged: Vec<BlockId> = Vec::new();
        let mut retired: BTreeSet<BlockId> = BTreeSet::new();

        for group in groups.iter_mut() {
            if group.reducer {
                let mut feeders = BTreeSet::new();
                for &member in &group.members {
                    feeders.extend(blocks.predecessors(member));
                }
                if feeders.len() >= 2 {
                    let members: Vec<BlockId> = feeders.iter().copied().collect();
                    let id =
                        blocks.merge_blocks(&members, &mut input_mapping, &mut output_mapping);
                    merged.push(id);
                    retired.extend(feeders);
                }
            }
            if group.members.len() >= 2 {
                let members: Vec<BlockId> = group.members.iter().copied().collect();
                let id = blocks.merge_blocks(&members, &mut input_mapping, &mut output_mapping);
                merged.push(id);
                retired.extend(members);
                group.members = BTreeSet::from([id]);
            }
        }
        if merged.is_empty() {
            return;
        }

        // Reroute block edges from the retired blocks onto the merged ones.
        for (&origin, targets) in &input_mapping {
            for conn in blocks.connections_of_input(origin) {
                let sources: Vec<BlockOutputRef> = match output_mapping.get(&conn.upstream) {
                    Some(mapped) => mapped.iter().copied().collect(),
                    None => vec![conn.upstream],
                };
                blocks.disconnect(&conn);
                for &target in targets {
                    for &source in &sources {
                        blocks.connect(source, target);
                    }
                }
            }
        }
        for (&origin, sources) in &output_mapping {
            for conn in blocks.connections_of_output(origin) {
                let targets: Vec<BlockInputRef> = match input_mapping.get(&conn.downstream) {
                    Some(mapped) => mapped.iter().copied().collect(),
                    None => vec![conn.downstream],
                };
                blocks.disconnect(&conn);
                for &source in sources {
                    for &target in &targets {
                        blocks.connect(source, target);
                    }
                }
            }
        }
        for id in retired {
            blocks.remove(id);
        }

        for &id in &merged {
            blocks.unify(id);
        }
        loop {
            let mut changed = false;
            let mut index = 0;
            while index < merged.len() {
                let id = merged[index];
                changed |= blocks.compact(id);
                if blocks.block(id).is_empty() {
                    blocks.remove(id);
                    merged.remove(index);
                    for group in groups.iter_mut() {
                        group.members.remove(&id);
                    }
                    changed = true;
                } else {
                    index += 1;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

/// One prospective stage: a founder block, the blocks grouped with it, and
/// the nearest upstream blocks that found groups of their own.
struct BlockGroup {
    founder: BlockId,
    members: BTreeSet<BlockId>,
    predecease: BTreeSet<BlockId>,
    reducer: bool,
    distance: Option<usize>,
}

/// The nearest upstream blocks of `id` that found stage groups: reduce
/// blocks, and map blocks not feeding a reduce. Map blocks feeding a reduce
/// are walked through; blocks without inputs are ignored.
fn collect_predecease(blocks: &BlockGraph, id: BlockId) -> BTreeSet<BlockId> {
    let mut result = BTreeSet::new();
    let mut saw = BTreeSet::new();
    let mut work: VecDeque<BlockId> = blocks.predecessors(id).into_iter().collect();
    while let Some(block) = work.pop_front() {
        if !saw.insert(block) {
            continue;
        }
        if blocks.block(block).inputs().is_empty() {
            continue;
        }
        if blocks.block(block).is_reduce_block() || !blocks.is_succeeding_reduce_block(block) {
            result.insert(block);
        } else {
            work.extend(blocks.predecessors(block));
        }
    }
    result
}

/// Critical-path distance of each group from the graph inputs, computed by
/// work-list relaxation. A full round without progress bails out and leaves
/// the remaining distances unassigned, which excludes those groups from
/// concurrent-stage compression.
fn compute_distances(groups: &mut [BlockGroup]) {
    let founder_group: BTreeMap<BlockId, usize> = groups
        .iter()
        .enumerate()
        .map(|(index, group)| (group.founder, index))
        .collect();
    let mut work: VecDeque<usize> = (0..groups.len()).collect();
    let mut stalled = 0usize;
    while let Some(index) = work.pop_front() {
        let mut distance = 0usize;
        let mut ready = true;
        for pred in &groups[index].predecease {
            let Some(&pg) = founder_group.get(pred) else {
                continue;
            };
            match groups[pg].distance {
                Some(d) => distance = distance.max(d),
                None => {
                    ready = false;
                    break;
                }
            }
        }
        if ready {
            groups[index].distance = Some(distance + 1);
            stalled = 0;
        } else {
            work.push_back(index);
            stalled += 1;
            if stalled > work.len() {
                warn!("stage distance relaxation stalled; skipping concurrent compression for the remainder");
                break;
            }
        }
    }
}

/// Collapse groups with the same reducer-ness and equal assigned distance.
fn combine_groups(groups: &mut Vec<BlockGroup>) {
    let mut index = 0;
    while index < groups.len() {
        let mut other = index + 1;
        while other < groups.len() {
            let can_combine = groups[index].reducer == groups[other].reducer
                && groups[index].distance.is_some()
                && groups[index].distance == groups[other].distance;
            if can_combine {
                let absorbed = groups.remove(other);
                let group = &mut groups[index];
                group.members.extend(absorbed.members);
                group.predecease.extend(absorbed.predecease);
            } else {
                other += 1;
            }
        }
        index += 1;
    }
}

/// Resolve each block's original output connections to the block inputs
/// expecting them and connect the blocks accordingly.
fn connect_blocks(blocks: &mut BlockGraph, graph: &FlowGraph) {
    let mut expecting: BTreeMap<Connection, BTreeSet<BlockInputRef>> = BTreeMap::new();
    for id in blocks.ids() {
        for input in blocks.block(id).inputs() {
            for &conn in input.original_connections() {
                expecting.entry(conn).or_default().insert(BlockInputRef {
                    block: id,
                    port: input.id(),
                });
            }
        }
    }
    let targets: BTreeSet<Connection> = expecting.keys().copied().collect();

    let mut pending: Vec<(BlockOutputRef, BlockInputRef)> = Vec::new();
    for id in blocks.ids() {
        for output in blocks.block(id).outputs() {
            let source = BlockOutputRef {
                block: id,
                port: output.id(),
            };
            for &conn in output.original_connections() {
                for hit in graph_util::succeeding_connections(graph, conn, &targets) {
                    for &target in &expecting[&hit] {
                        pending.push((source, target));
                    }
                }
            }
        }
    }
    for (source, target) in pending {
        blocks.connect(source, target);
    }
}

/// Compact every computation block to a fixed point, dropping blocks that
/// become empty.
fn trim_blocks(blocks: &mut BlockGraph, computation: &mut Vec<BlockId>) {
    loop {
        let mut changed = false;
        let mut index = 0;
        while index < computation.len() {
            let id = computation[index];
            changed |= blocks.compact(id);
            if blocks.block(id).is_empty() {
                debug!(serial = blocks.block(id).serial(), "dropping empty block");
                blocks.remove(id);
                computation.remove(index);
                changed = true;
            } else {
                index += 1;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Compact the blocks of every stage, dropping emptied blocks and stages.
fn compress_stage_blocks(blocks: &mut BlockGraph, stages: &mut Vec<StageBlock>) {
    loop {
        let mut changed = false;
        let mut index = 0;
        while index < stages.len() {
            let members: Vec<BlockId> = stages[index]
                .map_blocks()
                .iter()
                .chain(stages[index].reduce_blocks())
                .copied()
                .collect();
            for id in members {
                changed |= blocks.compact(id);
                if blocks.block(id).is_empty() {
                    blocks.remove(id);
                    stages[index].remove_block(id);
                    changed = true;
                }
            }
            if stages[index].is_empty() {
                stages.remove(index);
                changed = true;
            } else {
                index += 1;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Number the stages 1..N in a sources-first topological order over the
/// stage-level dependencies, breaking ties by insertion order, then sort
/// them by number.
fn sort_stage_blocks(blocks: &BlockGraph, stages: &mut Vec<StageBlock>) {
    let mut stage_of: BTreeMap<BlockId, usize> = BTreeMap::new();
    for (index, stage) in stages.iter().enumerate() {
        for &block in stage.map_blocks().iter().chain(stage.reduce_blocks()) {
            stage_of.insert(block, index);
        }
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); stages.len()];
    let mut indegree: Vec<usize> = vec![0; stages.len()];
    for conn in blocks.connections() {
        if let (Some(&from), Some(&to)) = (
            stage_of.get(&conn.upstream.block),
            stage_of.get(&conn.downstream.block),
        ) {
            if from != to && successors[from].insert(to) {
                indegree[to] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..stages.len()).filter(|&i| indegree[i] == 0).collect();
    let mut numbered = vec![false; stages.len()];
    let mut number = 0usize;
    while let Some(index) = queue.pop_front() {
        number += 1;
        stages[index].set_number(number);
        numbered[index] = true;
        for &succ in &successors[index] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                queue.push_back(succ);
            }
        }
    }
    // The block graph is acyclic, so the loop above numbers every stage;
    // keep the numbering total regardless.
    for index in 0..stages.len() {
        if !numbered[index] {
            number += 1;
            stages[index].set_number(number);
        }
    }
    stages.sort_by_key(StageBlock::number);
}

// ---- normalization passes ----

/// Collapse chains of pass-through elements: each pass-through adopts its
/// pass-through successors' targets, dropping successors that end up
/// unreachable.
fn push_down_pass_through_chains(graph: &mut FlowGraph) {
    for id in graph.element_ids() {
        if !graph.contains(id) {
            continue;
        }
        let element = graph.element(id);
        if !matches!(element.kind, ElementKind::Identity) || element.outputs.is_empty() {
            continue;
        }
        let output = OutputRef::new(id, 0);
        for conn in graph.connections_of_output(output) {
            let succ = conn.downstream.element;
            if succ == id {
                continue;
            }
            let collapsible = {
                let candidate = graph.element(succ);
                matches!(candidate.kind, ElementKind::Identity)
                    && !candidate.is_boundary()
                    && !candidate.outputs.is_empty()
            };
            if !collapsible {
                continue;
            }
            for target in graph.opposites_of_output(OutputRef::new(succ, 0)) {
                graph.connect(output, target);
            }
            graph.disconnect(&conn);
            if !graph.has_predecessors(succ) {
                graph.remove_element(succ);
            }
        }
    }
}

/// Fence every at-most-once element with checkpoints so concurrent block
/// copies never recompute its outputs.
fn unify_global_side_effects(graph: &mut FlowGraph) {
    for id in graph.element_ids() {
        if !graph_util::has_global_side_effect(graph, id) {
            continue;
        }
        for port in 0..graph.element(id).outputs.len() {
            debug!(element = %graph.element(id).name, port, "fencing global side effect");
            graph_util::insert_checkpoint(graph, OutputRef::new(id, port));
        }
    }
}

/// Insert a stage boundary on every path from a shuffle to a following
/// shuffle that lacks one, pushing the checkpoint down through operators
/// that only reshape records.
fn insert_checkpoints(graph: &mut FlowGraph) {
    for id in graph_util::collect_boundaries(graph) {
        if !graph.contains(id) || !graph_util::is_shuffle_boundary(graph, id) {
            continue;
        }
        for port in 0..graph.element(id).outputs.len() {
            insert_checkpoints_after(graph, OutputRef::new(id, port));
        }
    }
}

fn insert_checkpoints_after(graph: &mut FlowGraph, start: OutputRef) {
    let mut work = vec![start];
    while let Some(output) = work.pop() {
        let reaches_shuffle = graph_util::succeeding_boundaries(graph, output)
            .iter()
            .any(|&b| graph_util::is_shuffle_boundary(graph, b));
        if !reaches_shuffle {
            continue;
        }
        let targets = graph.opposites_of_output(output);
        if let [target] = targets.as_slice() {
            let succ = target.element;
            if is_push_down_target(graph, succ) {
                for port in 0..graph.element(succ).outputs.len() {
                    work.push(OutputRef::new(succ, port));
                }
                continue;
            }
        }
        graph_util::insert_checkpoint(graph, output);
    }
}

/// Whether a checkpoint planned before `id` may instead be planned after
/// it: single fed input, not a boundary, and record-reshaping only.
fn is_push_down_target(graph: &FlowGraph, id: ElementId) -> bool {
    let element = graph.element(id);
    if element.is_boundary() || element.inputs.len() != 1 {
        return false;
    }
    if graph.connections_of_input(InputRef::new(id, 0)).len() != 1 {
        return false;
    }
    match &element.kind {
        ElementKind::Identity => true,
        ElementKind::Operator(class) => class.is_push_down_safe(),
        ElementKind::Component(_) => false,
    }
}

/// Pad every stage boundary output that feeds another boundary directly, so
/// a block body always has at least one interior element.
fn insert_identities(graph: &mut FlowGraph) {
    for id in graph_util::collect_boundaries(graph) {
        if !graph.contains(id) || !graph_util::is_stage_boundary(graph, id) {
            continue;
        }
        for port in 0..graph.element(id).outputs.len() {
            let output = OutputRef::new(id, port);
            let feeds_boundary = graph
                .opposites_of_output(output)
                .iter()
                .any(|t| graph_util::is_boundary(graph, t.element));
            if feeds_boundary {
                graph_util::insert_identity(graph, output);
            }
        }
    }
}

/// Split every fan-in/fan-out identity into per-path identities.
fn split_identities(graph: &mut FlowGraph) {
    loop {
        let mut changed = false;
        for id in graph.element_ids() {
            if graph.contains(id) && graph_util::is_identity(graph, id) {
                changed |= graph_util::split_identity(graph, id);
            }
        }
        if !changed {
            break;
        }
    }
}

/// Elide identities except those connecting a stage boundary to another
/// boundary, which blocks rely on as interior padding.
fn reduce_identities(graph: &mut FlowGraph) {
    loop {
        let mut changed = false;
        for id in graph.element_ids() {
            if !graph.contains(id) || !graph_util::is_identity(graph, id) {
                continue;
            }
            let preds = graph_util::predecessors(graph, id);
            let succs = graph_util::successors(graph, id);
            let keep = !preds.is_empty()
                && !succs.is_empty()
                && preds
                    .iter()
                    .all(|&p| graph_util::is_stage_boundary(graph, p))
                && succs.iter().all(|&s| graph_util::is_boundary(graph, s));
            if !keep {
                graph_util::skip(graph, id);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
