//! Lightweight handle types for the operator-graph arena.
//!
//! A [`FlowGraph`](crate::graph::FlowGraph) owns its elements in an arena and
//! hands out [`ElementId`] handles instead of references. Ports are addressed
//! as `(element, port index)` pairs ([`InputRef`] / [`OutputRef`]) and a
//! [`Connection`] is a plain value pairing one output with one input, so the
//! graph never needs back-pointers from ports to their owners.
//!
//! All handles are small, `Copy`, `Ord`, and hashable; ordered collections
//! keyed by them iterate deterministically.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier of an element within one graph arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ElementId(u32);

impl ElementId {
    pub(crate) fn new(v: u32) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value, mainly for debugging output.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable structural identity of an element, preserved across deep copies.
///
/// Copying an element (for example when a block detaches from its source
/// graph) produces a connection-less twin carrying the same origin id.
/// Unification uses origin ids to recognize copies of the same original
/// element, so it must never rely on arena handles, which differ per copy.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct OriginId(u64);

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

impl OriginId {
    /// Allocate a fresh origin id, unique process-wide.
    pub fn fresh() -> Self {
        Self(NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the underlying numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Reference to one input port of an element.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct InputRef {
    /// The owning element.
    pub element: ElementId,
    /// Index into the element's input port list.
    pub port: usize,
}

impl InputRef {
    /// Create a reference to `element`'s input port at `port`.
    pub fn new(element: ElementId, port: usize) -> Self {
        Self { element, port }
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.in[{}]", self.element, self.port)
    }
}

/// Reference to one output port of an element.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct OutputRef {
    /// The owning element.
    pub element: ElementId,
    /// Index into the element's output port list.
    pub port: usize,
}

impl OutputRef {
    /// Create a reference to `element`'s output port at `port`.
    pub fn new(element: ElementId, port: usize) -> Self {
        Self { element, port }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.out[{}]", self.element, self.port)
    }
}

/// A directed edge from one output port to one input port.
///
/// Connections are plain values stored in a single ordered set on the owning
/// graph; removing the value detaches both endpoints at once.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Connection {
    /// The source output port.
    pub upstream: OutputRef,
    /// The target input port.
    pub downstream: InputRef,
}

impl Connection {
    /// Create a connection value between `upstream` and `downstream`.
    pub fn new(upstream: OutputRef, downstream: InputRef) -> Self {
        Self {
            upstream,
            downstream,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.upstream, self.downstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_ids_are_unique() {
        let a = OriginId::fresh();
        let b = OriginId::fresh();
        assert_ne!(a, b);
        assert!(a.raw() < b.raw());
    }

    #[test]
    fn display_formats_name_ports() {
        let element = ElementId::new(3);
        assert_eq!(element.to_string(), "#3");
        assert_eq!(InputRef::new(element, 1).to_string(), "#3.in[1]");
        assert_eq!(OutputRef::new(element, 0).to_string(), "#3.out[0]");
        let conn = Connection::new(OutputRef::new(element, 0), InputRef::new(element, 1));
        assert_eq!(conn.to_string(), "#3.out[0] => #3.in[1]");
    }
}
