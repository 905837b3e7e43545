//! Operator-graph elements and their declared attributes.
//!
//! An [`Element`] is a node of a [`FlowGraph`](crate::graph::FlowGraph): an
//! ordinary operator, an identity pass-through, or a nested component graph.
//! Attributes that drive planning live directly on the element: its
//! [`BoundaryKind`], output [`Connectivity`], and execution [`Observation`]
//! constraints.

use std::fmt;

use crate::graph::FlowGraph;
use crate::ids::OriginId;

/// Boundary attribute of an element.
///
/// Boundaries partition the graph into blocks: a stage boundary separates two
/// consecutive stages, a shuffle boundary separates the map side of a stage
/// from its reduce side.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub enum BoundaryKind {
    /// Not a boundary.
    #[default]
    None,
    /// Stage boundary.
    Stage,
    /// Shuffle boundary.
    Shuffle,
}

/// Whether an element's unconnected output ports are an error.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Connectivity {
    /// Dangling outputs are silently capped with an implicit stop.
    Optional,
    /// Dangling outputs are reported as diagnostics.
    #[default]
    Mandatory,
}

/// Execution observation constraints of an element.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Observation {
    /// The element has a side effect that must run at least once; it may not
    /// be dropped even when its results are unused.
    pub at_least_once: bool,
    /// The element has a global side effect that must run at most once; its
    /// outputs must not be recomputed by concurrent block copies.
    pub at_most_once: bool,
}

impl Observation {
    /// No observation constraints.
    pub const NONE: Observation = Observation {
        at_least_once: false,
        at_most_once: false,
    };

    /// Mandatory side effect.
    pub const AT_LEAST_ONCE: Observation = Observation {
        at_least_once: true,
        at_most_once: false,
    };

    /// Global side effect.
    pub const AT_MOST_ONCE: Observation = Observation {
        at_least_once: false,
        at_most_once: true,
    };
}

/// Behavioral class of an ordinary operator.
///
/// Classes other than [`OperatorClass::Generic`] only reshape or observe
/// records without combining them across inputs, so checkpoint insertion may
/// push a planned checkpoint downstream through them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperatorClass {
    /// Arbitrary user logic.
    Generic,
    /// Routes each record to one of several outputs.
    Branch,
    /// Splits a composite record.
    Split,
    /// Projects a record onto a narrower type.
    Project,
    /// Restructures a record onto another type.
    Restructure,
    /// Logs records as they pass through.
    Logging,
    /// Emits trace events for records.
    Trace,
}

impl OperatorClass {
    /// Whether a checkpoint planned before this operator may instead be
    /// placed after it.
    pub fn is_push_down_safe(&self) -> bool {
        !matches!(self, OperatorClass::Generic)
    }
}

/// How a component element is expanded into its owner graph.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum InlinePolicy {
    /// Follow the planner option for flow part compression.
    #[default]
    Default,
    /// Always merge the component body into the surrounding stage structure.
    ForceAggregate,
    /// Keep the component body in stages of its own by padding its ports
    /// with stage boundaries.
    KeepSegregated,
}

/// Kind of an element.
#[derive(Clone, Debug)]
pub enum ElementKind {
    /// An ordinary operator of the given class.
    Operator(OperatorClass),
    /// A pass-through element carrying records unchanged. Boundary identities
    /// act as checkpoints or padding; plain identities are elided during
    /// normalization.
    Identity,
    /// A nested component graph, flattened away before block extraction.
    Component(Box<FlowGraph>),
}

/// Nominal record type flowing through a port.
///
/// Connections require equal types on both endpoints; the planner never
/// inspects the name beyond equality.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DataType(String);

impl DataType {
    /// Create a data type with the given nominal name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the nominal name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an input port consumes its data.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PortUsage {
    /// Streamed record-at-a-time input.
    #[default]
    Record,
    /// Fully materialized side-data view. Not supported by this planner.
    View,
}

/// Declaration of one input or output port.
#[derive(Clone, Debug)]
pub struct PortDecl {
    /// Port name, unique within the owning element's side.
    pub name: String,
    /// Record type carried by the port.
    pub data_type: DataType,
    /// Consumption mode; only meaningful on input ports.
    pub usage: PortUsage,
}

impl PortDecl {
    /// Declare a record port.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            usage: PortUsage::Record,
        }
    }

    /// Declare a view port.
    pub fn view(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            usage: PortUsage::View,
        }
    }
}

/// One node of an operator graph.
#[derive(Clone, Debug)]
pub struct Element {
    /// Human-readable name, used in diagnostics.
    pub name: String,
    /// Element kind.
    pub kind: ElementKind,
    /// Declared input ports.
    pub inputs: Vec<PortDecl>,
    /// Declared output ports.
    pub outputs: Vec<PortDecl>,
    /// Boundary attribute.
    pub boundary: BoundaryKind,
    /// Dangling-output policy.
    pub connectivity: Connectivity,
    /// Execution observation constraints.
    pub observation: Observation,
    /// Inline policy; only meaningful for component elements.
    pub inline: InlinePolicy,
    pub(crate) origin: Option<OriginId>,
}

impl Element {
    /// Create an ordinary operator element.
    pub fn operator(
        name: impl Into<String>,
        class: OperatorClass,
        inputs: Vec<PortDecl>,
        outputs: Vec<PortDecl>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ElementKind::Operator(class),
            inputs,
            outputs,
            boundary: BoundaryKind::None,
            connectivity: Connectivity::default(),
            observation: Observation::NONE,
            inline: InlinePolicy::Default,
            origin: None,
        }
    }

    /// Create a pass-through element with one input and one output port of
    /// the given type.
    pub fn identity(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            kind: ElementKind::Identity,
            inputs: vec![PortDecl::new("in", data_type.clone())],
            outputs: vec![PortDecl::new("out", data_type)],
            boundary: BoundaryKind::None,
            connectivity: Connectivity::default(),
            observation: Observation::NONE,
            inline: InlinePolicy::Default,
            origin: None,
        }
    }

    /// Create a component element wrapping `body`.
    ///
    /// The external ports mirror the body's declared entry and exit
    /// elements: one input per entry, one output per exit, carrying the
    /// corresponding stub's record type.
    pub fn component(name: impl Into<String>, body: FlowGraph) -> Self {
        let inputs = body
            .inputs()
            .iter()
            .map(|&id| {
                let stub = body.element(id);
                PortDecl::new(stub.name.clone(), stub.outputs[0].data_type.clone())
            })
            .collect();
        let outputs = body
            .outputs()
            .iter()
            .map(|&id| {
                let stub = body.element(id);
                PortDecl::new(stub.name.clone(), stub.inputs[0].data_type.clone())
            })
            .collect();
        Self {
            name: name.into(),
            kind: ElementKind::Component(Box::new(body)),
            inputs,
            outputs,
            boundary: BoundaryKind::None,
            connectivity: Connectivity::default(),
            observation: Observation::NONE,
            inline: InlinePolicy::Default,
            origin: None,
        }
    }

    /// Set the boundary attribute.
    #[must_use]
    pub fn with_boundary(mut self, boundary: BoundaryKind) -> Self {
        self.boundary = boundary;
        self
    }

    /// Set the dangling-output policy.
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Set the observation constraints.
    #[must_use]
    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = observation;
        self
    }

    /// Set the inline policy.
    #[must_use]
    pub fn with_inline(mut self, inline: InlinePolicy) -> Self {
        self.inline = inline;
        self
    }

    /// Whether this element carries any boundary attribute.
    pub fn is_boundary(&self) -> bool {
        self.boundary != BoundaryKind::None
    }

    /// Structural identity of this element, shared with all of its copies.
    ///
    /// # Panics
    ///
    /// Panics if the element has not yet been added to a graph.
    pub fn origin(&self) -> OriginId {
        match self.origin {
            Some(origin) => origin,
            None => panic!("element {:?} has not been added to a graph", self.name),
        }
    }
}
