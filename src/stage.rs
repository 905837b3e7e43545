//! The planner's output: execution stages over a block graph.

use std::collections::BTreeSet;

use crate::block::{BlockGraph, BlockId};

/// One execution stage: a set of map-side blocks and an optional set of
/// reduce-side blocks.
#[derive(Clone, Debug)]
pub struct StageBlock {
    map_blocks: BTreeSet<BlockId>,
    reduce_blocks: BTreeSet<BlockId>,
    number: Option<usize>,
}

impl StageBlock {
    /// Create a stage from its map-side and reduce-side blocks.
    pub fn new(map_blocks: BTreeSet<BlockId>, reduce_blocks: BTreeSet<BlockId>) -> Self {
        Self {
            map_blocks,
            reduce_blocks,
            number: None,
        }
    }

    /// Map-side blocks.
    pub fn map_blocks(&self) -> &BTreeSet<BlockId> {
        &self.map_blocks
    }

    /// Reduce-side blocks.
    pub fn reduce_blocks(&self) -> &BTreeSet<BlockId> {
        &self.reduce_blocks
    }

    /// Whether this stage has a reduce side.
    pub fn has_reduce(&self) -> bool {
        !self.reduce_blocks.is_empty()
    }

    /// Whether this stage has no blocks left.
    pub fn is_empty(&self) -> bool {
        self.map_blocks.is_empty() && self.reduce_blocks.is_empty()
    }

    pub(crate) fn remove_block(&mut self, id: BlockId) {
        self.map_blocks.remove(&id);
        self.reduce_blocks.remove(&id);
    }

    /// Execution order of this stage, starting at 1.
    ///
    /// # Panics
    ///
    /// Panics if the stage has not been numbered yet.
    pub fn number(&self) -> usize {
        match self.number {
            Some(number) => number,
            None => panic!("stage number has not been assigned"),
        }
    }

    pub(crate) fn set_number(&mut self, number: usize) {
        self.number = Some(number);
    }
}

/// A complete stage plan: the block graph, the distinguished input and
/// output blocks, and the stages in execution order.
#[derive(Clone, Debug)]
pub struct StageGraph {
    blocks: BlockGraph,
    input: BlockId,
    output: BlockId,
    stages: Vec<StageBlock>,
}

impl StageGraph {
    pub(crate) fn new(
        blocks: BlockGraph,
        input: BlockId,
        output: BlockId,
        stages: Vec<StageBlock>,
    ) -> Self {
        Self {
            blocks,
            input,
            output,
            stages,
        }
    }

    /// The block graph backing this plan.
    pub fn blocks(&self) -> &BlockGraph {
        &self.blocks
    }

    /// The block holding the graph's entry elements.
    pub fn input(&self) -> BlockId {
        self.input
    }

    /// The block holding the graph's exit elements.
    pub fn output(&self) -> BlockId {
        self.output
    }

    /// Stages sorted by execution order.
    pub fn stages(&self) -> &[StageBlock] {
        &self.stages
    }
}
