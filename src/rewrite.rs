//! Pluggable graph rewriters, applied between validation and normalization.

use anyhow::Result;

use crate::graph::FlowGraph;

/// When a rewriter runs relative to the others.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RewritePhase {
    /// Structural rewrites that later optimizations depend on.
    EarlyOptimize,
    /// Optimizations over the already-restructured graph.
    LateOptimize,
}

/// A rewrite pass over the working copy of the operator graph.
///
/// The planner sorts its rewriters by phase, then by name, and runs them in
/// that order. A rewriter reports whether it changed the graph; the planner
/// re-validates after any change.
pub trait GraphRewriter {
    /// Execution phase of this rewriter.
    fn phase(&self) -> RewritePhase;

    /// Stable name, used as the ordering tie-break within a phase.
    fn name(&self) -> &str;

    /// Rewrite `graph` in place, returning whether anything changed.
    fn rewrite(&self, graph: &mut FlowGraph) -> Result<bool>;
}
