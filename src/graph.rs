//! The operator-graph arena.
//!
//! A [`FlowGraph`] owns its [`Element`]s in a `BTreeMap` keyed by
//! [`ElementId`] and keeps every edge in a single ordered [`Connection`] set.
//! Connect and disconnect are set insertions and removals, so the two
//! endpoints of an edge can never disagree about its existence. All
//! collections iterate in a deterministic order.

use std::collections::{BTreeMap, BTreeSet};

use crate::element::{DataType, Element};
use crate::ids::{Connection, ElementId, InputRef, OriginId, OutputRef};

/// An operator graph: elements, connections, and the declared entry and exit
/// element sets.
#[derive(Clone, Debug)]
pub struct FlowGraph {
    name: String,
    elements: BTreeMap<ElementId, Element>,
    connections: BTreeSet<Connection>,
    inputs: Vec<ElementId>,
    outputs: Vec<ElementId>,
    next_id: u32,
}

impl FlowGraph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: BTreeMap::new(),
            connections: BTreeSet::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_id: 0,
        }
    }

    /// Return the graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an element to the arena and return its handle.
    ///
    /// Elements without an origin are assigned a fresh one; elements copied
    /// from another graph keep the origin they carry.
    pub fn add(&mut self, mut element: Element) -> ElementId {
        if element.origin.is_none() {
            element.origin = Some(OriginId::fresh());
        }
        let id = ElementId::new(self.next_id);
        self.next_id += 1;
        self.elements.insert(id, element);
        id
    }

    /// Add an element and declare it an entry of the graph.
    pub fn add_input(&mut self, element: Element) -> ElementId {
        debug_assert!(element.inputs.is_empty());
        let id = self.add(element);
        self.inputs.push(id);
        id
    }

    /// Add an element and declare it an exit of the graph.
    pub fn add_output(&mut self, element: Element) -> ElementId {
        debug_assert!(element.outputs.is_empty());
        let id = self.add(element);
        self.outputs.push(id);
        id
    }

    /// Declare an existing element an entry of the graph.
    pub(crate) fn declare_input(&mut self, id: ElementId) {
        debug_assert!(self.contains(id));
        self.inputs.push(id);
    }

    /// Declare an existing element an exit of the graph.
    pub(crate) fn declare_output(&mut self, id: ElementId) {
        debug_assert!(self.contains(id));
        self.outputs.push(id);
    }

    /// Declared entry elements.
    pub fn inputs(&self) -> &[ElementId] {
        &self.inputs
    }

    /// Declared exit elements.
    pub fn outputs(&self) -> &[ElementId] {
        &self.outputs
    }

    /// Whether `id` is still present in the arena.
    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    /// Borrow an element.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in the arena.
    pub fn element(&self, id: ElementId) -> &Element {
        match self.elements.get(&id) {
            Some(element) => element,
            None => panic!("element {id} is not in graph {:?}", self.name),
        }
    }

    /// Mutably borrow an element.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in the arena.
    pub fn element_mut(&mut self, id: ElementId) -> &mut Element {
        let name = &self.name;
        match self.elements.get_mut(&id) {
            Some(element) => element,
            None => panic!("element {id} is not in graph {name:?}"),
        }
    }

    /// Iterate over all elements in id order.
    pub fn elements(&self) -> impl Iterator<Item = (ElementId, &Element)> {
        self.elements.iter().map(|(&id, e)| (id, e))
    }

    /// All element ids currently in the arena, in order.
    pub fn element_ids(&self) -> Vec<ElementId> {
        self.elements.keys().copied().collect()
    }

    /// Iterate over all connections in order.
    pub fn connections(&self) -> impl Iterator<Item = Connection> + '_ {
        self.connections.iter().copied()
    }

    /// Record type of an input port.
    pub fn input_type(&self, port: InputRef) -> &DataType {
        &self.element(port.element).inputs[port.port].data_type
    }

    /// Record type of an output port.
    pub fn output_type(&self, port: OutputRef) -> &DataType {
        &self.element(port.element).outputs[port.port].data_type
    }

    /// Connect an output port to an input port.
    ///
    /// Connecting the same pair twice is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if either port does not exist or the port types differ.
    pub fn connect(&mut self, upstream: OutputRef, downstream: InputRef) {
        let out_type = self.output_type(upstream);
        let in_type = self.input_type(downstream);
        assert_eq!(
            out_type, in_type,
            "cannot connect {upstream} to {downstream}: port types differ",
        );
        self.connections.insert(Connection::new(upstream, downstream));
    }

    /// Remove a connection. Returns `false` if it was not present.
    pub fn disconnect(&mut self, connection: &Connection) -> bool {
        self.connections.remove(connection)
    }

    /// All connections arriving at `port`.
    pub fn connections_of_input(&self, port: InputRef) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.downstream == port)
            .copied()
            .collect()
    }

    /// All connections leaving `port`.
    pub fn connections_of_output(&self, port: OutputRef) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.upstream == port)
            .copied()
            .collect()
    }

    /// Output ports connected into `port`.
    pub fn opposites_of_input(&self, port: InputRef) -> Vec<OutputRef> {
        self.connections_of_input(port)
            .into_iter()
            .map(|c| c.upstream)
            .collect()
    }

    /// Input ports connected from `port`.
    pub fn opposites_of_output(&self, port: OutputRef) -> Vec<InputRef> {
        self.connections_of_output(port)
            .into_iter()
            .map(|c| c.downstream)
            .collect()
    }

    /// Remove every connection arriving at `port` and return the upstream
    /// ports it was connected to.
    pub fn disconnect_input(&mut self, port: InputRef) -> Vec<OutputRef> {
        let connections = self.connections_of_input(port);
        for c in &connections {
            self.connections.remove(c);
        }
        connections.into_iter().map(|c| c.upstream).collect()
    }

    /// Remove every connection leaving `port` and return the downstream
    /// ports it was connected to.
    pub fn disconnect_output(&mut self, port: OutputRef) -> Vec<InputRef> {
        let connections = self.connections_of_output(port);
        for c in &connections {
            self.connections.remove(c);
        }
        connections.into_iter().map(|c| c.downstream).collect()
    }

    /// Whether any connection arrives at one of `id`'s input ports.
    pub fn has_predecessors(&self, id: ElementId) -> bool {
        self.connections.iter().any(|c| c.downstream.element == id)
    }

    /// Whether any connection leaves one of `id`'s output ports.
    pub fn has_successors(&self, id: ElementId) -> bool {
        self.connections.iter().any(|c| c.upstream.element == id)
    }

    /// Disconnect every port of `id` and remove it from the arena and from
    /// the entry and exit sets.
    pub fn remove_element(&mut self, id: ElementId) {
        self.connections
            .retain(|c| c.upstream.element != id && c.downstream.element != id);
        self.elements.remove(&id);
        self.inputs.retain(|&e| e != id);
        self.outputs.retain(|&e| e != id);
    }
}
