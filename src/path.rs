//! Boundary-to-boundary path analysis.
//!
//! A [`FlowPath`] is the result of sweeping from a boundary element to the
//! nearest boundaries in one direction: the elements it started from, the
//! non-boundary elements it passed through, and the boundaries it arrived at.
//! Paths are combined with [`FlowPath::union`] and
//! [`FlowPath::transpose_intersect`], and a forward path can be turned into a
//! [`FlowBlock`] with [`FlowPath::create_block`].

use std::collections::BTreeSet;

use crate::block::FlowBlock;
use crate::graph::FlowGraph;
use crate::ids::{Connection, ElementId, InputRef, OutputRef};

/// Sweep direction of a path.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    /// From an element toward its successors.
    Forward,
    /// From an element toward its predecessors.
    Backward,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Elements touched by one directed sweep between boundaries.
#[derive(Clone, Debug)]
pub struct FlowPath {
    direction: Direction,
    startings: BTreeSet<ElementId>,
    passings: BTreeSet<ElementId>,
    arrivals: BTreeSet<ElementId>,
}

impl FlowPath {
    /// Create a path from its three element sets.
    pub fn new(
        direction: Direction,
        startings: BTreeSet<ElementId>,
        passings: BTreeSet<ElementId>,
        arrivals: BTreeSet<ElementId>,
    ) -> Self {
        Self {
            direction,
            startings,
            passings,
            arrivals,
        }
    }

    /// Sweep direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Elements the sweep started from.
    pub fn startings(&self) -> &BTreeSet<ElementId> {
        &self.startings
    }

    /// Non-boundary elements the sweep passed through.
    pub fn passings(&self) -> &BTreeSet<ElementId> {
        &self.passings
    }

    /// Boundary elements the sweep arrived at.
    pub fn arrivals(&self) -> &BTreeSet<ElementId> {
        &self.arrivals
    }

    /// Set-union of two paths with the same direction.
    ///
    /// # Panics
    ///
    /// Panics if the directions differ.
    #[must_use]
    pub fn union(&self, other: &FlowPath) -> FlowPath {
        assert_eq!(
            self.direction, other.direction,
            "cannot union paths with different directions",
        );
        FlowPath::new(
            self.direction,
            &self.startings | &other.startings,
            &self.passings | &other.passings,
            &self.arrivals | &other.arrivals,
        )
    }

    /// Intersect this path with one swept in the opposite direction.
    ///
    /// The result keeps this path's direction; its startings are this path's
    /// startings that the other path arrived at, its passings are the common
    /// passings, and its arrivals are this path's arrivals that the other
    /// path started from. For a forward path intersected with a backward
    /// path this isolates exactly the elements lying between the two
    /// boundary sets.
    ///
    /// # Panics
    ///
    /// Panics if `other` has the same direction as `self`.
    #[must_use]
    pub fn transpose_intersect(&self, other: &FlowPath) -> FlowPath {
        assert_eq!(
            self.direction.opposite(),
            other.direction,
            "transpose_intersect requires paths of opposite directions",
        );
        FlowPath::new(
            self.direction,
            &self.startings & &other.arrivals,
            &self.passings & &other.passings,
            &self.arrivals & &other.startings,
        )
    }

    /// Carve a [`FlowBlock`] out of `graph` along this path.
    ///
    /// `include_startings` and `include_arrivals` choose whether the boundary
    /// elements themselves belong to the block. An included boundary
    /// contributes its own outer connections as block ports; an excluded one
    /// contributes the connections crossing into or out of the block body.
    ///
    /// # Panics
    ///
    /// Panics if this path is not a forward path.
    pub fn create_block(
        &self,
        graph: &FlowGraph,
        serial: usize,
        include_startings: bool,
        include_arrivals: bool,
    ) -> FlowBlock {
        assert_eq!(
            self.direction,
            Direction::Forward,
            "blocks are created from forward paths",
        );
        let mut elements = self.passings.clone();
        if include_startings {
            elements.extend(self.startings.iter().copied());
        }
        if include_arrivals {
            elements.extend(self.arrivals.iter().copied());
        }

        let mut inputs: Vec<Connection> = Vec::new();
        for &start in &self.startings {
            if include_startings {
                for port in 0..graph.element(start).inputs.len() {
                    inputs.extend(graph.connections_of_input(InputRef::new(start, port)));
                }
            } else {
                for port in 0..graph.element(start).outputs.len() {
                    inputs.extend(
                        graph
                            .connections_of_output(OutputRef::new(start, port))
                            .into_iter()
                            .filter(|c| elements.contains(&c.downstream.element)),
                    );
                }
            }
        }

        let mut outputs: Vec<Connection> = Vec::new();
        for &arrival in &self.arrivals {
            if include_arrivals {
                for port in 0..graph.element(arrival).outputs.len() {
                    outputs.extend(graph.connections_of_output(OutputRef::new(arrival, port)));
                }
            } else {
                for port in 0..graph.element(arrival).inputs.len() {
                    outputs.extend(
                        graph
                            .connections_of_input(InputRef::new(arrival, port))
                            .into_iter()
                            .filter(|c| elements.contains(&c.upstream.element)),
                    );
                }
            }
        }

        FlowBlock::new(serial, graph, inputs, outputs, elements)
    }
}
