//! Planner configuration.

use anyhow::{bail, Result};

/// Key for [`PlannerOptions::compress_flow_part`].
pub const KEY_COMPRESS_FLOW_PART: &str = "compressFlowPart";
/// Key for [`PlannerOptions::compress_concurrent_stage`].
pub const KEY_COMPRESS_CONCURRENT_STAGE: &str = "compressConcurrentStage";
/// Key for [`PlannerOptions::compress_block_group`].
pub const KEY_COMPRESS_FLOW_BLOCK_GROUP: &str = "compressFlowBlockGroup";

/// Optimization toggles of the stage planner. Everything defaults to on.
#[derive(Clone, Copy, Debug)]
pub struct PlannerOptions {
    /// Merge component bodies into the surrounding stage structure instead
    /// of fencing them off with stage boundaries.
    pub compress_flow_part: bool,
    /// Merge stages with no mutual dependencies and equal critical-path
    /// distance into one stage.
    pub compress_concurrent_stage: bool,
    /// Merge the blocks of one stage group, and the map blocks feeding a
    /// reduce group, into single blocks.
    pub compress_block_group: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            compress_flow_part: true,
            compress_concurrent_stage: true,
            compress_block_group: true,
        }
    }
}

impl PlannerOptions {
    /// Set one option from its textual key and value, as found in build
    /// configuration files.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let enabled = match value {
            "enabled" | "true" => true,
            "disabled" | "false" => false,
            _ => bail!("invalid value {value:?} for planner option {key:?}"),
        };
        match key {
            KEY_COMPRESS_FLOW_PART => self.compress_flow_part = enabled,
            KEY_COMPRESS_CONCURRENT_STAGE => self.compress_concurrent_stage = enabled,
            KEY_COMPRESS_FLOW_BLOCK_GROUP => self.compress_block_group = enabled,
            _ => bail!("unknown planner option {key:?}"),
        }
        Ok(())
    }
}
