//! Test utilities: a fluent builder for operator graphs.
//!
//! Not intended for production use; panics freely on misuse so tests stay
//! short.

use std::collections::{BTreeMap, BTreeSet};

use crate::element::{BoundaryKind, DataType, Element, OperatorClass, PortDecl};
use crate::graph::FlowGraph;
use crate::ids::{ElementId, InputRef, OutputRef};

/// Builds [`FlowGraph`]s from named elements and `"element.port"` connection
/// specs. Every port carries the same record type, so any two ports can be
/// connected.
pub struct GraphBuilder {
    graph: FlowGraph,
    names: BTreeMap<String, ElementId>,
}

impl GraphBuilder {
    /// Create a builder for a graph with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: FlowGraph::new(name),
            names: BTreeMap::new(),
        }
    }

    fn record() -> DataType {
        DataType::new("record")
    }

    fn register(&mut self, name: &str, id: ElementId) -> ElementId {
        let previous = self.names.insert(name.to_string(), id);
        assert!(previous.is_none(), "duplicate element name {name:?}");
        id
    }

    /// Add a graph entry element, a stage boundary with one output port.
    pub fn input(&mut self, name: &str) -> ElementId {
        let element = Element::operator(
            name,
            OperatorClass::Generic,
            Vec::new(),
            vec![PortDecl::new("out", Self::record())],
        )
        .with_boundary(BoundaryKind::Stage);
        let id = self.graph.add_input(element);
        self.register(name, id)
    }

    /// Add a graph exit element, a stage boundary with one input port.
    pub fn output(&mut self, name: &str) -> ElementId {
        let element = Element::operator(
            name,
            OperatorClass::Generic,
            vec![PortDecl::new("in", Self::record())],
            Vec::new(),
        )
        .with_boundary(BoundaryKind::Stage);
        let id = self.graph.add_output(element);
        self.register(name, id)
    }

    /// Add a generic operator with the given port names.
    pub fn operator(&mut self, name: &str, inputs: &[&str], outputs: &[&str]) -> ElementId {
        let element = Element::operator(
            name,
            OperatorClass::Generic,
            inputs
                .iter()
                .map(|&p| PortDecl::new(p, Self::record()))
                .collect(),
            outputs
                .iter()
                .map(|&p| PortDecl::new(p, Self::record()))
                .collect(),
        );
        let id = self.graph.add(element);
        self.register(name, id)
    }

    /// Add a generic operator carrying a boundary attribute.
    pub fn boundary(
        &mut self,
        name: &str,
        inputs: &[&str],
        outputs: &[&str],
        kind: BoundaryKind,
    ) -> ElementId {
        let element = Element::operator(
            name,
            OperatorClass::Generic,
            inputs
                .iter()
                .map(|&p| PortDecl::new(p, Self::record()))
                .collect(),
            outputs
                .iter()
                .map(|&p| PortDecl::new(p, Self::record()))
                .collect(),
        )
        .with_boundary(kind);
        let id = self.graph.add(element);
        self.register(name, id)
    }

    /// Add a pass-through identity element.
    pub fn identity(&mut self, name: &str) -> ElementId {
        let element = Element::identity(name, Self::record());
        let id = self.graph.add(element);
        self.register(name, id)
    }

    /// Add an arbitrary element, for attributes the other methods do not
    /// cover.
    pub fn add(&mut self, name: &str, element: Element) -> ElementId {
        let id = self.graph.add(element);
        self.register(name, id)
    }

    /// Connect two ports given as `"element"` (first port) or
    /// `"element.port"`.
    pub fn connect(&mut self, from: &str, to: &str) -> &mut Self {
        let source = self.output_ref(from);
        let target = self.input_ref(to);
        self.graph.connect(source, target);
        self
    }

    /// Handle of a named element.
    pub fn id(&self, name: &str) -> ElementId {
        match self.names.get(name) {
            Some(&id) => id,
            None => panic!("unknown element {name:?}"),
        }
    }

    /// Handles of several named elements.
    pub fn ids(&self, names: &[&str]) -> BTreeSet<ElementId> {
        names.iter().map(|&n| self.id(n)).collect()
    }

    /// Resolve an output port spec.
    pub fn output_ref(&self, spec: &str) -> OutputRef {
        let (name, port) = split_spec(spec);
        let id = self.id(name);
        let ports = &self.graph.element(id).outputs;
        assert!(!ports.is_empty(), "element {name:?} has no output ports");
        let index = match port {
            None => 0,
            Some(port) => ports
                .iter()
                .position(|p| p.name == port)
                .unwrap_or_else(|| panic!("unknown output port {spec:?}")),
        };
        OutputRef::new(id, index)
    }

    /// Resolve an input port spec.
    pub fn input_ref(&self, spec: &str) -> InputRef {
        let (name, port) = split_spec(spec);
        let id = self.id(name);
        let ports = &self.graph.element(id).inputs;
        assert!(!ports.is_empty(), "element {name:?} has no input ports");
        let index = match port {
            None => 0,
            Some(port) => ports
                .iter()
                .position(|p| p.name == port)
                .unwrap_or_else(|| panic!("unknown input port {spec:?}")),
        };
        InputRef::new(id, index)
    }

    /// Borrow the graph under construction.
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Finish and return the graph.
    pub fn build(self) -> FlowGraph {
        self.graph
    }
}

fn split_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once('.') {
        Some((name, port)) => (name, Some(port)),
        None => (spec, None),
    }
}
