//! Compiled method bodies and label resolution

use super::instruction::{Instruction, Item, LabelId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operand stack and local variable requirements of one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSize {
    /// Maximum operand stack depth in words
    pub max_stack: u16,
    /// Local variable slots in words
    pub max_locals: u16,
}

/// One function after code generation, optimization and stack analysis
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    /// Source-level name
    pub name: String,
    /// JCA method descriptor, e.g. `(SS)V`
    pub descriptor: String,
    /// Ordered instruction stream
    pub code: Vec<Item>,
    /// Frame requirements
    pub frame: FrameSize,
}

impl CompiledFunction {
    /// Instructions only, in order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.code.iter().filter_map(Item::instruction)
    }

    /// Encoded bytecode size
    pub fn code_size(&self) -> usize {
        self.instructions().map(Instruction::encoded_len).sum()
    }
}

/// Flattened instruction stream with labels resolved to instruction indices.
///
/// A label maps to the index of the instruction that follows it. Labels at the
/// very end of a stream map to `instructions.len()`.
#[derive(Debug, Clone)]
pub struct ResolvedCode<'a> {
    /// Instructions in order
    pub instructions: Vec<&'a Instruction>,
    /// Label to instruction index
    pub labels: BTreeMap<LabelId, usize>,
}

impl<'a> ResolvedCode<'a> {
    /// Resolve every label in `items`. Duplicate label definitions are an error.
    pub fn resolve(items: &'a [Item]) -> Result<Self> {
        let mut instructions = Vec::with_capacity(items.len());
        let mut labels = BTreeMap::new();
        for item in items {
            match item {
                Item::Instr(instr) => instructions.push(instr),
                Item::Label(label) => {
                    if labels.insert(*label, instructions.len()).is_some() {
                        return Err(Error::Verification(format!(
                            "label {} defined more than once",
                            label
                        )));
                    }
                }
            }
        }
        Ok(Self {
            instructions,
            labels,
        })
    }

    /// Instruction index a label points at
    pub fn target(&self, label: LabelId) -> Result<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| Error::Verification(format!("branch to undefined label {}", label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_labels() {
        let items = vec![
            Item::Label(LabelId(0)),
            Instruction::SConst(1).into(),
            Item::Label(LabelId(1)),
            Item::Label(LabelId(2)),
            Instruction::Goto(LabelId(0)).into(),
            Item::Label(LabelId(3)),
        ];
        let code = ResolvedCode::resolve(&items).unwrap();
        assert_eq!(code.instructions.len(), 2);
        assert_eq!(code.target(LabelId(0)).unwrap(), 0);
        assert_eq!(code.target(LabelId(2)).unwrap(), 1);
        assert_eq!(code.target(LabelId(3)).unwrap(), 2);
        assert!(code.target(LabelId(9)).is_err());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let items = vec![Item::Label(LabelId(0)), Item::Label(LabelId(0))];
        assert!(ResolvedCode::resolve(&items).is_err());
    }
}
