//! # Flowplan
//!
//! A **stage planner** for batch dataflow graphs. Flowplan takes a logical
//! operator graph (operators connected port-to-port, annotated with stage
//! and shuffle boundaries) and compiles it into an ordered plan of
//! map/reduce execution stages.
//!
//! ## Key Features
//!
//! - **Graph validation** - dangling ports, unsupported port kinds, and
//!   cyclic dependencies are reported as structured diagnostics
//! - **Pluggable rewriters** - register [`GraphRewriter`]s to restructure or
//!   optimize the graph before planning
//! - **Normalization** - nested components are flattened, pass-through
//!   chains collapsed, global side effects fenced, and missing stage
//!   boundaries inserted automatically
//! - **Block extraction** - the graph is carved into map-side and
//!   reduce-side blocks along its boundaries, with dead regions compacted
//!   away and duplicated elements unified
//! - **Stage compression** - independent concurrent stages, and the blocks
//!   within a stage group, can be merged to cut job count
//! - **Deterministic output** - identical inputs always produce identical
//!   plans, including stage numbering
//!
//! ## Quick Start
//!
//! ```
//! use flowplan::testing::GraphBuilder;
//! use flowplan::{BoundaryKind, PlannerOptions, StagePlanner};
//!
//! let mut b = GraphBuilder::new("word-count");
//! b.input("in");
//! b.operator("tokenize", &["in"], &["out"]);
//! b.boundary("group", &["in"], &["out"], BoundaryKind::Shuffle);
//! b.operator("count", &["in"], &["out"]);
//! b.output("out");
//! b.connect("in", "tokenize");
//! b.connect("tokenize", "group");
//! b.connect("group", "count");
//! b.connect("count", "out");
//!
//! let mut planner = StagePlanner::with_options(PlannerOptions::default());
//! let plan = planner.plan(b.graph()).expect("graph is valid");
//! assert_eq!(plan.stages().len(), 1);
//! assert!(plan.stages()[0].has_reduce());
//! ```
//!
//! ## Core Concepts
//!
//! ### Operator graph
//!
//! A [`FlowGraph`] owns [`Element`]s in an arena and refers to them through
//! [`ElementId`] handles. Elements are ordinary operators, pass-through
//! identities, or nested component graphs; edges connect one output port to
//! one input port and require matching [`DataType`]s.
//!
//! ### Boundaries and blocks
//!
//! [`BoundaryKind::Stage`] marks where one stage ends and the next begins;
//! [`BoundaryKind::Shuffle`] marks the hand-off from a stage's map side to
//! its reduce side. Path analysis ([`FlowPath`]) sweeps between boundaries
//! and carves the graph into [`FlowBlock`]s, which detach into
//! self-contained subgraphs connected through the [`BlockGraph`].
//!
//! ### Stages
//!
//! A [`StageBlock`] groups the map blocks and reduce blocks of one
//! execution stage. The final [`StageGraph`] lists the stages numbered in a
//! sources-first topological order.
//!
//! ### Planning
//!
//! [`StagePlanner::plan`] never mutates its input and either returns a
//! [`StageGraph`] or a [`PlanFailure`] carrying every [`Diagnostic`] found.
//! [`PlannerOptions`] toggles the three compressions: component inlining,
//! concurrent-stage merging, and block-group merging.

pub mod block;
pub mod element;
pub mod graph;
pub mod graph_util;
pub mod ids;
pub mod options;
pub mod path;
pub mod planner;
pub mod rewrite;
pub mod stage;
pub mod testing;

pub use block::{
    BlockConnection, BlockGraph, BlockId, BlockInput, BlockInputRef, BlockOutput, BlockOutputRef,
    FlowBlock,
};
pub use element::{
    BoundaryKind, Connectivity, DataType, Element, ElementKind, InlinePolicy, Observation,
    OperatorClass, PortDecl, PortUsage,
};
pub use graph::FlowGraph;
pub use ids::{Connection, ElementId, InputRef, OriginId, OutputRef};
pub use options::{
    PlannerOptions, KEY_COMPRESS_CONCURRENT_STAGE, KEY_COMPRESS_FLOW_BLOCK_GROUP,
    KEY_COMPRESS_FLOW_PART,
};
pub use path::{Direction, FlowPath};
pub use planner::{Diagnostic, PlanFailure, StagePlanner};
pub use rewrite::{GraphRewriter, RewritePhase};
pub use stage::{StageBlock, StageGraph};
