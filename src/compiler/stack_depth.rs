//! # Maximum Operand Stack Depth
//!
//! Worklist propagation of entry depths over the control flow graph. Each
//! block's entry depth is fixed the first time it is reached; reaching it
//! again with a different depth is an error, since the JCVM verifier rejects
//! such merges.

use super::cfg::ControlFlowGraph;
use super::ir::{Item, ResolvedCode};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;

/// Words added to the computed maximum
pub const SAFETY_MARGIN: u16 = 2;

/// Depth information for one method
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackAnalysis {
    /// Deepest point reached, in words, without the safety margin
    pub max_depth: u16,
    /// Entry depth of every reachable block, by block id
    pub entry_depths: BTreeMap<usize, u16>,
}

impl StackAnalysis {
    /// `max_stack` to declare for the method
    pub fn max_stack(&self) -> u16 {
        self.max_depth + SAFETY_MARGIN
    }
}

/// Walk every reachable path of `code` from depth 0
pub fn analyze(code: &[Item]) -> Result<StackAnalysis> {
    let resolved = ResolvedCode::resolve(code)?;
    let cfg = ControlFlowGraph::build(&resolved)?;
    analyze_cfg(&resolved, &cfg)
}

/// Same as [`analyze`] on an already built graph
pub fn analyze_cfg(code: &ResolvedCode<'_>, cfg: &ControlFlowGraph) -> Result<StackAnalysis> {
    let mut result = StackAnalysis::default();
    if cfg.blocks.is_empty() {
        return Ok(result);
    }

    let mut worklist = VecDeque::from([0usize]);
    result.entry_depths.insert(0, 0);
    let mut max_depth: i32 = 0;

    while let Some(id) = worklist.pop_front() {
        let block = &cfg.blocks[id];
        let mut depth = result.entry_depths[&id] as i32;
        for index in block.range() {
            let (pops, pushes) = code.instructions[index].stack_effect();
            depth -= pops as i32;
            if depth < 0 {
                return Err(Error::Verification(format!(
                    "stack underflow at instruction {} ({})",
                    index, code.instructions[index]
                )));
            }
            depth += pushes as i32;
            max_depth = max_depth.max(depth);
        }
        trace!(block = id, exit_depth = depth, "block analyzed");

        for &succ in &block.successors {
            match result.entry_depths.get(&succ) {
                None => {
                    result.entry_depths.insert(succ, depth as u16);
                    worklist.push_back(succ);
                }
                Some(&known) if known as i32 != depth => {
                    return Err(Error::StackDepthMismatch {
                        index: cfg.blocks[succ].start,
                        expected: known as i32,
                        found: depth,
                    });
                }
                Some(_) => {}
            }
        }
    }

    result.max_depth = u16::try_from(max_depth)
        .map_err(|_| Error::Verification(format!("stack depth {} out of range", max_depth)))?;
    Ok(result)
}

/// `max_stack` for `code`: deepest point plus the safety margin
pub fn max_stack(code: &[Item]) -> Result<u16> {
    analyze(code).map(|a| a.max_stack())
}
