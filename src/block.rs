//! Blocks of operator elements and the block-level graph.
//!
//! A [`FlowBlock`] is a carved-out region of a source graph: its element
//! set, block input ports grouping the connections that enter it, and block
//! output ports grouping the connections that leave it. Blocks start out
//! referring to elements of the source graph and later [detach] into an
//! owned deep copy, after which they can be unified, compacted, and merged.
//!
//! Block-level edges live centrally on the [`BlockGraph`], addressed by
//! block id and port id, so removing a block or a port can never leave a
//! half-connected edge behind.
//!
//! [detach]: BlockGraph::detach

use std::collections::{BTreeMap, BTreeSet};

use crate::element::ElementKind;
use crate::graph::FlowGraph;
use crate::graph_util::{
    copy_into, has_mandatory_side_effect, is_always_empty, is_always_stop, is_shuffle_boundary,
};
use crate::ids::{Connection, ElementId, InputRef, OriginId, OutputRef};

/// Identifier of a block within one [`BlockGraph`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(pub(crate) usize);

/// Reference to one block input port.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockInputRef {
    /// The owning block.
    pub block: BlockId,
    /// The port id within the block.
    pub port: u32,
}

/// Reference to one block output port.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockOutputRef {
    /// The owning block.
    pub block: BlockId,
    /// The port id within the block.
    pub port: u32,
}

/// A directed edge between two blocks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockConnection {
    /// The source block output port.
    pub upstream: BlockOutputRef,
    /// The target block input port.
    pub downstream: BlockInputRef,
}

/// A block input port: one element input port plus the source-graph
/// connections that originally entered it.
#[derive(Clone, Debug)]
pub struct BlockInput {
    id: u32,
    element_port: InputRef,
    original: BTreeSet<Connection>,
}

impl BlockInput {
    /// Port id within the owning block.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The element input port this block port is bound to.
    pub fn element_port(&self) -> InputRef {
        self.element_port
    }

    /// Source-graph connections that entered this port. Cleared on detach.
    pub fn original_connections(&self) -> &BTreeSet<Connection> {
        &self.original
    }
}

/// A block output port: one element output port plus the source-graph
/// connections that originally left it.
#[derive(Clone, Debug)]
pub struct BlockOutput {
    id: u32,
    element_port: OutputRef,
    original: BTreeSet<Connection>,
}

impl BlockOutput {
    /// Port id within the owning block.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The element output port this block port is bound to.
    pub fn element_port(&self) -> OutputRef {
        self.element_port
    }

    /// Source-graph connections that left this port. Cleared on detach.
    pub fn original_connections(&self) -> &BTreeSet<Connection> {
        &self.original
    }
}

/// A carved-out region of an operator graph.
#[derive(Clone, Debug)]
pub struct FlowBlock {
    serial: usize,
    reduce: bool,
    elements: BTreeSet<ElementId>,
    inputs: Vec<BlockInput>,
    outputs: Vec<BlockOutput>,
    graph: Option<FlowGraph>,
    next_port: u32,
}

impl FlowBlock {
    /// Build a block from explicit entering and leaving connections.
    ///
    /// Entering connections are grouped into block inputs by their target
    /// element port, leaving connections into block outputs by their source
    /// element port, both in first-seen order.
    ///
    /// # Panics
    ///
    /// Panics if some but not all block inputs target shuffle boundaries; a
    /// block is either entirely a reduce block or not one at all.
    pub fn new(
        serial: usize,
        source: &FlowGraph,
        input_connections: Vec<Connection>,
        output_connections: Vec<Connection>,
        elements: BTreeSet<ElementId>,
    ) -> Self {
        let mut next_port = 0u32;
        let mut inputs: Vec<BlockInput> = Vec::new();
        let mut input_index: BTreeMap<InputRef, usize> = BTreeMap::new();
        for conn in input_connections {
            let slot = *input_index.entry(conn.downstream).or_insert_with(|| {
                let id = next_port;
                next_port += 1;
                inputs.push(BlockInput {
                    id,
                    element_port: conn.downstream,
                    original: BTreeSet::new(),
                });
                inputs.len() - 1
            });
            inputs[slot].original.insert(conn);
        }

        let mut outputs: Vec<BlockOutput> = Vec::new();
        let mut output_index: BTreeMap<OutputRef, usize> = BTreeMap::new();
        for conn in output_connections {
            let slot = *output_index.entry(conn.upstream).or_insert_with(|| {
                let id = next_port;
                next_port += 1;
                outputs.push(BlockOutput {
                    id,
                    element_port: conn.upstream,
                    original: BTreeSet::new(),
                });
                outputs.len() - 1
            });
            outputs[slot].original.insert(conn);
        }

        let shuffle_inputs = inputs
            .iter()
            .filter(|i| is_shuffle_boundary(source, i.element_port.element))
            .count();
        assert!(
            shuffle_inputs == 0 || shuffle_inputs == inputs.len(),
            "block {serial} mixes shuffle and non-shuffle inputs",
        );
        let reduce = !inputs.is_empty() && shuffle_inputs == inputs.len();

        Self {
            serial,
            reduce,
            elements,
            inputs,
            outputs,
            graph: None,
            next_port,
        }
    }

    /// Build a block whose ports are all connections touching the given
    /// element ports.
    pub fn from_ports(
        serial: usize,
        source: &FlowGraph,
        inputs: Vec<InputRef>,
        outputs: Vec<OutputRef>,
        elements: BTreeSet<ElementId>,
    ) -> Self {
        let input_connections = inputs
            .into_iter()
            .flat_map(|p| source.connections_of_input(p))
            .collect();
        let output_connections = outputs
            .into_iter()
            .flat_map(|p| source.connections_of_output(p))
            .collect();
        Self::new(
            serial,
            source,
            input_connections,
            output_connections,
            elements,
        )
    }

    /// Creation serial of this block. Merged blocks keep the smallest serial
    /// of their members.
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Whether this block consumes shuffled input.
    pub fn is_reduce_block(&self) -> bool {
        self.reduce
    }

    /// Whether the block owns its own element graph.
    pub fn is_detached(&self) -> bool {
        self.graph.is_some()
    }

    /// A block with no ports at all computes nothing.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Elements belonging to this block. Before detach these are handles
    /// into the source graph, afterwards into the owned graph.
    pub fn elements(&self) -> &BTreeSet<ElementId> {
        &self.elements
    }

    /// Block input ports in declaration order.
    pub fn inputs(&self) -> &[BlockInput] {
        &self.inputs
    }

    /// Block output ports in declaration order.
    pub fn outputs(&self) -> &[BlockOutput] {
        &self.outputs
    }

    /// Borrow the owned element graph.
    ///
    /// # Panics
    ///
    /// Panics if the block has not been detached.
    pub fn graph(&self) -> &FlowGraph {
        match &self.graph {
            Some(graph) => graph,
            None => panic!("block {} has not been detached", self.serial),
        }
    }
}

/// The set of blocks carved from one source graph, plus the edges between
/// them.
#[derive(Clone, Debug, Default)]
pub struct BlockGraph {
    blocks: Vec<Option<FlowBlock>>,
    connections: BTreeSet<BlockConnection>,
}

impl BlockGraph {
    /// Create an empty block graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block and return its id.
    pub fn add(&mut self, block: FlowBlock) -> BlockId {
        self.blocks.push(Some(block));
        BlockId(self.blocks.len() - 1)
    }

    /// Ids of all live blocks, in insertion order.
    pub fn ids(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_some())
            .map(|(i, _)| BlockId(i))
            .collect()
    }

    /// Borrow a block.
    ///
    /// # Panics
    ///
    /// Panics if the block was removed or never existed.
    pub fn block(&self, id: BlockId) -> &FlowBlock {
        match self.blocks.get(id.0) {
            Some(Some(block)) => block,
            _ => panic!("block {id:?} is not in the block graph"),
        }
    }

    fn entry_mut(&mut self, id: BlockId) -> (&mut FlowBlock, &mut BTreeSet<BlockConnection>) {
        match self.blocks.get_mut(id.0) {
            Some(Some(block)) => (block, &mut self.connections),
            _ => panic!("block {id:?} is not in the block graph"),
        }
    }

    /// Remove a block together with all of its edges.
    pub fn remove(&mut self, id: BlockId) {
        self.connections
            .retain(|c| c.upstream.block != id && c.downstream.block != id);
        if let Some(slot) = self.blocks.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Connect a block output to a block input. Duplicate edges collapse.
    pub fn connect(&mut self, upstream: BlockOutputRef, downstream: BlockInputRef) {
        debug_assert!(self
            .block(upstream.block)
            .outputs
            .iter()
            .any(|o| o.id == upstream.port));
        debug_assert!(self
            .block(downstream.block)
            .inputs
            .iter()
            .any(|i| i.id == downstream.port));
        self.connections.insert(BlockConnection {
            upstream,
            downstream,
        });
    }

    /// Remove a block edge. Returns `false` if it was not present.
    pub fn disconnect(&mut self, connection: &BlockConnection) -> bool {
        self.connections.remove(connection)
    }

    /// All block edges, in order.
    pub fn connections(&self) -> impl Iterator<Item = BlockConnection> + '_ {
        self.connections.iter().copied()
    }

    /// Block edges arriving at `port`.
    pub fn connections_of_input(&self, port: BlockInputRef) -> Vec<BlockConnection> {
        self.connections
            .iter()
            .filter(|c| c.downstream == port)
            .copied()
            .collect()
    }

    /// Block edges leaving `port`.
    pub fn connections_of_output(&self, port: BlockOutputRef) -> Vec<BlockConnection> {
        self.connections
            .iter()
            .filter(|c| c.upstream == port)
            .copied()
            .collect()
    }

    /// Blocks directly upstream of `id`.
    pub fn predecessors(&self, id: BlockId) -> BTreeSet<BlockId> {
        self.connections
            .iter()
            .filter(|c| c.downstream.block == id)
            .map(|c| c.upstream.block)
            .collect()
    }

    /// Blocks directly downstream of `id`.
    pub fn successors(&self, id: BlockId) -> BTreeSet<BlockId> {
        self.connections
            .iter()
            .filter(|c| c.upstream.block == id)
            .map(|c| c.downstream.block)
            .collect()
    }

    /// Whether the first successor of `id` is a reduce block.
    ///
    /// # Panics
    ///
    /// Panics if `id` has not been detached.
    pub fn is_succeeding_reduce_block(&self, id: BlockId) -> bool {
        let block = self.block(id);
        assert!(
            block.is_detached(),
            "successor queries require block {} to be detached",
            block.serial,
        );
        for output in &block.outputs {
            let port = BlockOutputRef {
                block: id,
                port: output.id,
            };
            if let Some(conn) = self.connections.iter().find(|c| c.upstream == port) {
                return self.block(conn.downstream.block).is_reduce_block();
            }
        }
        false
    }

    /// Detach `id` from its source graph: deep-copy its elements into an
    /// owned graph and rebind element sets and block ports onto the copies.
    /// Original source-graph connections are dropped. Idempotent.
    pub fn detach(&mut self, source: &FlowGraph, id: BlockId) {
        let (block, _) = self.entry_mut(id);
        if block.graph.is_some() {
            return;
        }
        let mut graph = FlowGraph::new(format!("block-{}", block.serial));
        let mapping = copy_into(source, &block.elements, &mut graph);
        block.elements = block.elements.iter().map(|e| mapping[e]).collect();
        for input in &mut block.inputs {
            input.element_port =
                InputRef::new(mapping[&input.element_port.element], input.element_port.port);
            input.original.clear();
        }
        for output in &mut block.outputs {
            output.element_port = OutputRef::new(
                mapping[&output.element_port.element],
                output.element_port.port,
            );
            output.original.clear();
        }
        block.graph = Some(graph);
    }

    /// Merge elements of `id` that are copies of the same original element.
    ///
    /// Duplicates arise when overlapping blocks detach or merge: each copy
    /// carries the same origin id. One representative survives per origin;
    /// internal connections and block ports of the duplicates are rewired
    /// onto it, and block ports that end up bound to the same element port
    /// collapse into one.
    ///
    /// # Panics
    ///
    /// Panics if the block has not been detached.
    pub fn unify(&mut self, id: BlockId) {
        let (block, connections) = self.entry_mut(id);
        unify_block(block, id, connections);
    }

    /// Run one fixed-point compaction pass over `id`.
    ///
    /// Repeats until stable: collapse block ports bound to the same element
    /// port, drop portless edges, remove never-producing and never-observed
    /// elements, drop dead block edges, and merge redundant identities that
    /// feed the same downstream port. Returns whether anything changed.
    ///
    /// # Panics
    ///
    /// Panics if the block has not been detached.
    pub fn compact(&mut self, id: BlockId) -> bool {
        let (block, connections) = self.entry_mut(id);
        assert!(
            block.graph.is_some(),
            "compaction requires block {} to be detached",
            block.serial,
        );
        let mut changed = false;
        loop {
            changed |= merge_same_edges(block, id, connections);
            changed |= trim_disconnected_edges(block, id, connections);
            changed |= trim_dead_elements(block);
            changed |= trim_dead_block_edges(block, id, connections);
            let merged = merge_identities(block, id, connections);
            changed |= merged;
            if !merged {
                break;
            }
        }
        if changed {
            collect_garbage(block);
        }
        changed
    }

    /// Merge the given blocks into one, leaving the originals in place.
    ///
    /// Every member must already be detached; their graphs are copied into a
    /// fresh owned graph and fresh block ports are created for each member
    /// port. The mappings from old port references to new ones accumulate
    /// into `input_mapping` and `output_mapping` so the caller can reroute
    /// block edges and then remove the members.
    ///
    /// # Panics
    ///
    /// Panics if `ids` is empty, a member is not detached, or the members
    /// mix map blocks with reduce blocks.
    pub fn merge_blocks(
        &mut self,
        ids: &[BlockId],
        input_mapping: &mut BTreeMap<BlockInputRef, BTreeSet<BlockInputRef>>,
        output_mapping: &mut BTreeMap<BlockOutputRef, BTreeSet<BlockOutputRef>>,
    ) -> BlockId {
        assert!(!ids.is_empty(), "cannot merge an empty block list");
        let reduce = self.block(ids[0]).is_reduce_block();
        let mut serial = usize::MAX;
        for &member in ids {
            let block = self.block(member);
            assert!(
                block.is_detached(),
                "merging requires block {} to be detached",
                block.serial,
            );
            assert_eq!(
                reduce,
                block.is_reduce_block(),
                "cannot merge map blocks with reduce blocks",
            );
            serial = serial.min(block.serial);
        }

        let merged_id = BlockId(self.blocks.len());
        let mut graph = FlowGraph::new(format!("block-{serial}"));
        let mut elements = BTreeSet::new();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut next_port = 0u32;
        for &member in ids {
            let block = self.block(member);
            let mapping = copy_into(block.graph(), &block.elements, &mut graph);
            elements.extend(block.elements.iter().map(|e| mapping[e]));
            for input in &block.inputs {
                let port = next_port;
                next_port += 1;
                inputs.push(BlockInput {
                    id: port,
                    element_port: InputRef::new(
                        mapping[&input.element_port.element],
                        input.element_port.port,
                    ),
                    original: BTreeSet::new(),
                });
                input_mapping
                    .entry(BlockInputRef {
                        block: member,
                        port: input.id,
                    })
                    .or_default()
                    .insert(BlockInputRef {
                        block: merged_id,
                        port,
                    });
            }
            for output in &block.outputs {
                let port = next_port;
                next_port += 1;
                outputs.push(BlockOutput {
                    id: port,
                    element_port: OutputRef::new(
                        mapping[&output.element_port.element],
                        output.element_port.port,
                    ),
                    original: BTreeSet::new(),
                });
                output_mapping
                    .entry(BlockOutputRef {
                        block: member,
                        port: output.id,
                    })
                    .or_default()
                    .insert(BlockOutputRef {
                        block: merged_id,
                        port,
                    });
            }
        }
        self.blocks.push(Some(FlowBlock {
            serial,
            reduce,
            elements,
            inputs,
            outputs,
            graph: Some(graph),
            next_port,
        }));
        merged_id
    }
}

fn unify_block(block: &mut FlowBlock, id: BlockId, connections: &mut BTreeSet<BlockConnection>) {
    let graph = match &mut block.graph {
        Some(graph) => graph,
        None => panic!("unification requires block {} to be detached", block.serial),
    };
    let mut primary: BTreeMap<OriginId, ElementId> = BTreeMap::new();
    let mut unified: BTreeMap<ElementId, ElementId> = BTreeMap::new();
    for &element in &block.elements {
        let origin = graph.element(element).origin();
        let survivor = *primary.entry(origin).or_insert(element);
        unified.insert(element, survivor);
    }

    let edges: Vec<Connection> = graph.connections().collect();
    for conn in edges {
        let up = unified
            .get(&conn.upstream.element)
            .copied()
            .unwrap_or(conn.upstream.element);
        let down = unified
            .get(&conn.downstream.element)
            .copied()
            .unwrap_or(conn.downstream.element);
        if up != conn.upstream.element || down != conn.downstream.element {
            graph.disconnect(&conn);
            graph.connect(
                OutputRef::new(up, conn.upstream.port),
                InputRef::new(down, conn.downstream.port),
            );
        }
    }
    for (&element, &survivor) in &unified {
        if element != survivor {
            graph.remove_element(element);
            block.elements.remove(&element);
        }
    }

    for input in &mut block.inputs {
        if let Some(&survivor) = unified.get(&input.element_port.element) {
            input.element_port = InputRef::new(survivor, input.element_port.port);
        }
    }
    for output in &mut block.outputs {
        if let Some(&survivor) = unified.get(&output.element_port.element) {
            output.element_port = OutputRef::new(survivor, output.element_port.port);
        }
    }
    // Collapse block ports that now share an element port; the first one
    // wins and inherits the duplicates' edges.
    let mut seen_inputs: BTreeMap<InputRef, u32> = BTreeMap::new();
    let mut dead_inputs: Vec<u32> = Vec::new();
    for input in &block.inputs {
        match seen_inputs.get(&input.element_port) {
            None => {
                seen_inputs.insert(input.element_port, input.id);
            }
            Some(&survivor) => {
                reroute_input_edges(connections, id, input.id, survivor);
                dead_inputs.push(input.id);
            }
        }
    }
    block.inputs.retain(|i| !dead_inputs.contains(&i.id));

    let mut seen_outputs: BTreeMap<OutputRef, u32> = BTreeMap::new();
    let mut dead_outputs: Vec<u32> = Vec::new();
    for output in &block.outputs {
        match seen_outputs.get(&output.element_port) {
            None => {
                seen_outputs.insert(output.element_port, output.id);
            }
            Some(&survivor) => {
                reroute_output_edges(connections, id, output.id, survivor);
                dead_outputs.push(output.id);
            }
        }
    }
    block.outputs.retain(|o| !dead_outputs.contains(&o.id));
}

fn reroute_input_edges(
    connections: &mut BTreeSet<BlockConnection>,
    block: BlockId,
    from: u32,
    to: u32,
) {
    let from = BlockInputRef { block, port: from };
    let to = BlockInputRef { block, port: to };
    let edges: Vec<BlockConnection> = connections
        .iter()
        .filter(|c| c.downstream == from)
        .copied()
        .collect();
    for edge in edges {
        connections.remove(&edge);
        connections.insert(BlockConnection {
            upstream: edge.upstream,
            downstream: to,
        });
    }
}

fn reroute_output_edges(
    connections: &mut BTreeSet<BlockConnection>,
    block: BlockId,
    from: u32,
    to: u32,
) {
    let from = BlockOutputRef { block, port: from };
    let to = BlockOutputRef { block, port: to };
    let edges: Vec<BlockConnection> = connections
        .iter()
        .filter(|c| c.upstream == from)
        .copied()
        .collect();
    for edge in edges {
        connections.remove(&edge);
        connections.insert(BlockConnection {
            upstream: to,
            downstream: edge.downstream,
        });
    }
}

/// Collapse block ports bound to the same element port, rerouting the
/// duplicates' edges onto the first such port.
fn merge_same_edges(
    block: &mut FlowBlock,
    id: BlockId,
    connections: &mut BTreeSet<BlockConnection>,
) -> bool {
    let mut changed = false;

    let mut seen_inputs: BTreeMap<InputRef, u32> = BTreeMap::new();
    let mut duplicate_inputs: Vec<(u32, u32)> = Vec::new();
    for input in &block.inputs {
        match seen_inputs.get(&input.element_port) {
            None => {
                seen_inputs.insert(input.element_port, input.id);
            }
            Some(&survivor) => duplicate_inputs.push((input.id, survivor)),
        }
    }
    for (duplicate, survivor) in duplicate_inputs {
        let from = BlockInputRef {
            block: id,
            port: duplicate,
        };
        let to = BlockInputRef {
            block: id,
            port: survivor,
        };
        let edges: Vec<BlockConnection> = connections
            .iter()
            .filter(|c| c.downstream == from)
            .copied()
            .collect();
        for edge in edges {
            connections.remove(&edge);
            connections.insert(BlockConnection {
                upstream: edge.upstream,
                downstream: to,
            });
            changed = true;
        }
    }

    let mut seen_outputs: BTreeMap<OutputRef, u32> = BTreeMap::new();
    let mut duplicate_outputs: Vec<(u32, u32)> = Vec::new();
    for output in &block.outputs {
        match seen_outputs.get(&output.element_port) {
            None => {
                seen_outputs.insert(output.element_port, output.id);
            }
            Some(&survivor) => duplicate_outputs.push((output.id, survivor)),
        }
    }
    for (duplicate, survivor) in duplicate_outputs {
        let from = BlockOutputRef {
            block: id,
            port: duplicate,
        };
        let to = BlockOutputRef {
            block: id,
            port: survivor,
        };
        let edges: Vec<BlockConnection> = connections
            .iter()
            .filter(|c| c.upstream == from)
            .copied()
            .collect();
        for edge in edges {
            connections.remove(&edge);
            connections.insert(BlockConnection {
                upstream: to,
                downstream: edge.downstream,
            });
            changed = true;
        }
    }
    changed
}

/// Remove block ports that have no block edges left.
fn trim_disconnected_edges(
    block: &mut FlowBlock,
    id: BlockId,
    connections: &mut BTreeSet<BlockConnection>,
) -> bool {
    let before = block.inputs.len() + block.outputs.len();
    block.inputs.retain(|input| {
        let port = BlockInputRef {
            block: id,
            port: input.id,
        };
        connections.iter().any(|c| c.downstream == port)
    });
    block.outputs.retain(|output| {
        let port = BlockOutputRef {
            block: id,
            port: output.id,
        };
        connections.iter().any(|c| c.upstream == port)
    });
    before != block.inputs.len() + block.outputs.len()
}

/// Remove elements that can never produce output or whose output can never
/// be observed, cascading to their neighbors.
fn trim_dead_elements(block: &mut FlowBlock) -> bool {
    let graph = match &mut block.graph {
        Some(graph) => graph,
        None => return false,
    };
    let edge_elements: BTreeSet<ElementId> = block
        .inputs
        .iter()
        .map(|i| i.element_port.element)
        .chain(block.outputs.iter().map(|o| o.element_port.element))
        .collect();
    let mut changed = false;
    let mut work: Vec<ElementId> = block.elements.iter().copied().collect();
    while let Some(element) = work.pop() {
        if !graph.contains(element) || edge_elements.contains(&element) {
            continue;
        }
        if is_always_empty(graph, element) {
            work.extend(crate::graph_util::successors(graph, element));
            graph.remove_element(element);
            block.elements.remove(&element);
            changed = true;
        } else if is_always_stop(graph, element) && !has_mandatory_side_effect(graph, element) {
            work.extend(crate::graph_util::predecessors(graph, element));
            graph.remove_element(element);
            block.elements.remove(&element);
            changed = true;
        }
    }
    changed
}

/// Remove block ports whose element side is dead: inputs whose element no
/// longer feeds anything, outputs whose element is no longer fed.
fn trim_dead_block_edges(
    block: &mut FlowBlock,
    id: BlockId,
    connections: &mut BTreeSet<BlockConnection>,
) -> bool {
    let graph = match &block.graph {
        Some(graph) => graph,
        None => return false,
    };
    let output_elements: BTreeSet<ElementId> =
        block.outputs.iter().map(|o| o.element_port.element).collect();
    let mut input_elements: BTreeSet<ElementId> = BTreeSet::new();
    let mut changed = false;

    let mut dead_inputs: Vec<u32> = Vec::new();
    for input in &block.inputs {
        let element = input.element_port.element;
        if !graph.has_successors(element)
            && !has_mandatory_side_effect(graph, element)
            && !output_elements.contains(&element)
        {
            dead_inputs.push(input.id);
        } else {
            input_elements.insert(element);
        }
    }
    for port in dead_inputs {
        let port_ref = BlockInputRef { block: id, port };
        connections.retain(|c| c.downstream != port_ref);
        block.inputs.retain(|i| i.id != port);
        changed = true;
    }

    let mut dead_outputs: Vec<u32> = Vec::new();
    for output in &block.outputs {
        let element = output.element_port.element;
        if !graph.has_predecessors(element) && !input_elements.contains(&element) {
            dead_outputs.push(output.id);
        }
    }
    for port in dead_outputs {
        let port_ref = BlockOutputRef { block: id, port };
        connections.retain(|c| c.upstream != port_ref);
        block.outputs.retain(|o| o.id != port);
        changed = true;
    }
    changed
}

/// Merge identity elements whose block outputs all feed the same downstream
/// block input: the first survives, the others' internal sources are rewired
/// onto it and their block ports dropped.
fn merge_identities(
    block: &mut FlowBlock,
    id: BlockId,
    connections: &mut BTreeSet<BlockConnection>,
) -> bool {
    let graph = match &block.graph {
        Some(graph) => graph,
        None => return false,
    };
    let mut groups: BTreeMap<BlockInputRef, Vec<(u32, ElementId)>> = BTreeMap::new();
    for output in &block.outputs {
        let element = output.element_port.element;
        if !matches!(graph.element(element).kind, ElementKind::Identity) {
            continue;
        }
        let port = BlockOutputRef {
            block: id,
            port: output.id,
        };
        let edges = connections
            .iter()
            .filter(|c| c.upstream == port)
            .collect::<Vec<_>>();
        if let [edge] = edges.as_slice() {
            groups
                .entry(edge.downstream)
                .or_default()
                .push((output.id, element));
        }
    }

    let graph = match &mut block.graph {
        Some(graph) => graph,
        None => return false,
    };
    let mut changed = false;
    for (_, members) in groups {
        let Some((&(_, survivor), duplicates)) = members.split_first() else {
            continue;
        };
        for &(port, element) in duplicates {
            if element == survivor {
                continue;
            }
            for conn in graph.connections_of_input(InputRef::new(element, 0)) {
                graph.disconnect(&conn);
                graph.connect(conn.upstream, InputRef::new(survivor, 0));
            }
            let port_ref = BlockOutputRef { block: id, port };
            connections.retain(|c| c.upstream != port_ref);
            block.outputs.retain(|o| o.id != port);
            changed = true;
        }
    }
    changed
}

/// Drop elements that are bound to no block port and have no connections
/// left.
fn collect_garbage(block: &mut FlowBlock) {
    let graph = match &mut block.graph {
        Some(graph) => graph,
        None => return,
    };
    let edge_elements: BTreeSet<ElementId> = block
        .inputs
        .iter()
        .map(|i| i.element_port.element)
        .chain(block.outputs.iter().map(|o| o.element_port.element))
        .collect();
    let ids: Vec<ElementId> = block.elements.iter().copied().collect();
    for element in ids {
        if edge_elements.contains(&element) || !graph.contains(element) {
            continue;
        }
        if !graph.has_predecessors(element) && !graph.has_successors(element) {
            graph.remove_element(element);
            block.elements.remove(&element);
        }
    }
}
