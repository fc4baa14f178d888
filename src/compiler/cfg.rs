//! # Control Flow Graph
//!
//! Basic blocks over a resolved instruction stream. A block starts at the
//! method entry, at every label target and after every instruction that ends a
//! block (branch, switch, `goto`, return, throw).

use super::ir::{Instruction, ResolvedCode};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};

/// A maximal straight-line run of instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Block id, equal to its position in [`ControlFlowGraph::blocks`]
    pub id: usize,
    /// Index of the first instruction
    pub start: usize,
    /// Index one past the last instruction
    pub end: usize,
    /// Successor block ids in jump order (fallthrough last)
    pub successors: Vec<usize>,
    /// Predecessor block ids
    pub predecessors: Vec<usize>,
    /// Control can leave the block past the end of the method
    pub exits_code: bool,
}

impl BasicBlock {
    fn new(id: usize, start: usize, end: usize) -> Self {
        Self {
            id,
            start,
            end,
            successors: Vec::new(),
            predecessors: Vec::new(),
            exits_code: false,
        }
    }

    /// Instruction indices covered by the block
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Control flow graph of one method
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    /// Blocks in instruction order; block 0 is the entry
    pub blocks: Vec<BasicBlock>,
    /// First instruction index to block id
    pub block_at: BTreeMap<usize, usize>,
}

impl ControlFlowGraph {
    /// Partition `code` into blocks and connect them
    pub fn build(code: &ResolvedCode<'_>) -> Result<Self> {
        let instructions = &code.instructions;
        let len = instructions.len();
        if len == 0 {
            return Ok(Self::default());
        }

        // Leaders
        let mut leaders = BTreeSet::from([0]);
        for &target in code.labels.values() {
            if target < len {
                leaders.insert(target);
            }
        }
        for (i, instr) in instructions.iter().enumerate() {
            if instr.ends_block() && i + 1 < len {
                leaders.insert(i + 1);
            }
        }

        let starts: Vec<usize> = leaders.into_iter().collect();
        let mut cfg = ControlFlowGraph::default();
        for (id, &start) in starts.iter().enumerate() {
            let end = starts.get(id + 1).copied().unwrap_or(len);
            cfg.blocks.push(BasicBlock::new(id, start, end));
            cfg.block_at.insert(start, id);
        }

        // Edges
        for id in 0..cfg.blocks.len() {
            let end = cfg.blocks[id].end;
            let last: &Instruction = instructions[end - 1];
            let mut targets = Vec::new();
            for label in last.branch_targets() {
                targets.push(code.target(label)?);
            }
            if !last.is_unconditional_transfer() {
                targets.push(end);
            }
            for target in targets {
                match cfg.block_at.get(&target) {
                    Some(&succ) => cfg.add_edge(id, succ),
                    None => cfg.blocks[id].exits_code = true,
                }
            }
        }

        Ok(cfg)
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if !self.blocks[from].successors.contains(&to) {
            self.blocks[from].successors.push(to);
        }
        if !self.blocks[to].predecessors.contains(&from) {
            self.blocks[to].predecessors.push(from);
        }
    }

    /// Block by id
    pub fn block(&self, id: usize) -> Option<&BasicBlock> {
        self.blocks.get(id)
    }

    /// Block containing an instruction index
    pub fn block_of(&self, index: usize) -> Option<&BasicBlock> {
        self.block_at
            .range(..=index)
            .next_back()
            .and_then(|(_, &id)| self.blocks.get(id))
            .filter(|b| index < b.end)
    }

    /// Block ids reachable from the entry, in discovery order
    pub fn reachable(&self) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut stack = Vec::new();
        if !self.blocks.is_empty() {
            stack.push(0);
        }
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            for &succ in self.blocks[id].successors.iter().rev() {
                stack.push(succ);
            }
        }
        order
    }

    /// Whether a block is the target of a back edge
    pub fn is_loop_header(&self, id: usize) -> bool {
        self.blocks
            .get(id)
            .map(|b| b.predecessors.iter().any(|&pred| pred >= id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Cond, Item, LabelId, LocalKind, ReturnKind};

    #[test]
    fn test_empty_cfg() {
        let items: Vec<Item> = Vec::new();
        let code = ResolvedCode::resolve(&items).unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();
        assert!(cfg.blocks.is_empty());
        assert!(cfg.reachable().is_empty());
    }

    #[test]
    fn test_diamond() {
        let (else_l, end_l) = (LabelId(0), LabelId(1));
        let items = vec![
            Instruction::Load(LocalKind::Short, 0).into(),
            Instruction::If(Cond::Eq, else_l).into(),
            Instruction::SConst(1).into(),
            Instruction::Goto(end_l).into(),
            Item::Label(else_l),
            Instruction::SConst(2).into(),
            Item::Label(end_l),
            Instruction::Return(ReturnKind::Short).into(),
        ];
        let code = ResolvedCode::resolve(&items).unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();
        assert_eq!(cfg.blocks.len(), 4);
        assert_eq!(cfg.blocks[0].successors, vec![2, 1]);
        assert_eq!(cfg.blocks[3].predecessors.len(), 2);
        assert!(cfg.blocks[3].successors.is_empty());
        assert_eq!(cfg.block_of(4).map(|b| b.id), Some(2));
        assert_eq!(cfg.reachable().len(), 4);
    }

    #[test]
    fn test_loop_header_and_fall_off() {
        let top = LabelId(0);
        let items = vec![
            Item::Label(top),
            Instruction::Load(LocalKind::Short, 0).into(),
            Instruction::If(Cond::Ne, top).into(),
        ];
        let code = ResolvedCode::resolve(&items).unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();
        assert!(cfg.is_loop_header(0));
        assert!(cfg.blocks[0].exits_code);
    }
}
