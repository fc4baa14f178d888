//! # JCVM Method Verifier
//!
//! Structural checks on a compiled method before it is handed to the
//! emitter. The on-card verifier rejects the same conditions, so catching
//! them here turns a load failure into a compile error with context.

use super::cfg::ControlFlowGraph;
use super::ir::{CompiledFunction, Instruction, ResolvedCode};
use super::stack_depth;
use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Largest method body the CAP format can describe
pub const MAX_CODE_SIZE: usize = 32767;

/// Verification result with warnings
#[derive(Debug)]
pub struct VerifyResult {
    /// Method is valid for emission
    pub valid: bool,
    /// Errors that prevent emission
    pub errors: Vec<VerifyError>,
    /// Warnings (non-fatal)
    pub warnings: Vec<String>,
    /// Statistics
    pub stats: MethodStats,
}

/// Method statistics
#[derive(Debug, Default)]
pub struct MethodStats {
    /// Instruction count
    pub instruction_count: usize,
    /// Encoded size in bytes
    pub code_size: usize,
    /// Stack depth required without the safety margin
    pub required_stack: u16,
    /// Basic blocks
    pub block_count: usize,
    /// Method calls
    pub invoke_count: usize,
}

/// Verification error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Labels could not be resolved.
    BadLabels(String),

    /// Method exceeds the encodable size.
    CodeTooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Maximum size in bytes
        limit: usize,
    },

    /// Control reaches the end of the method without returning.
    FallsOffEnd {
        /// First instruction of the offending block
        index: usize,
    },

    /// Stack analysis failed (underflow or inconsistent merge).
    Stack(String),

    /// Declared `max_stack` is below what the code needs.
    MaxStackTooSmall {
        /// Declared value
        declared: u16,
        /// Required value
        required: u16,
    },

    /// Local access beyond `max_locals`.
    LocalOutOfRange {
        /// Instruction index
        index: usize,
        /// Highest slot touched
        slot: u16,
        /// Declared locals
        max_locals: u16,
    },

    /// Lookup switch keys are not strictly ascending.
    UnsortedLookupSwitch {
        /// Instruction index
        index: usize,
    },

    /// Table switch whose target count disagrees with its bounds.
    MalformedTableSwitch {
        /// Instruction index
        index: usize,
    },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::BadLabels(msg) => write!(f, "{}", msg),
            VerifyError::CodeTooLarge { size, limit } => {
                write!(f, "Method too large: {} bytes (limit: {})", size, limit)
            }
            VerifyError::FallsOffEnd { index } => {
                write!(f, "Control falls off the end of the method from instruction {}", index)
            }
            VerifyError::Stack(msg) => write!(f, "{}", msg),
            VerifyError::MaxStackTooSmall { declared, required } => {
                write!(f, "max_stack {} is below the required {}", declared, required)
            }
            VerifyError::LocalOutOfRange {
                index,
                slot,
                max_locals,
            } => write!(
                f,
                "Instruction {} touches local {} but max_locals is {}",
                index, slot, max_locals
            ),
            VerifyError::UnsortedLookupSwitch { index } => {
                write!(f, "Lookup switch at instruction {} has unsorted keys", index)
            }
            VerifyError::MalformedTableSwitch { index } => {
                write!(f, "Table switch at instruction {} has the wrong target count", index)
            }
        }
    }
}

/// Highest local slot (exclusive) an instruction touches
fn local_extent(instr: &Instruction) -> Option<u16> {
    match instr {
        Instruction::Load(kind, slot) | Instruction::Store(kind, slot) => {
            Some(slot + kind.slots())
        }
        Instruction::SInc(slot, _) => Some(slot + 1),
        Instruction::IInc(slot, _) => Some(slot + 2),
        _ => None,
    }
}

/// Compiled method verifier
pub struct Verifier {
    /// Maximum encoded method size
    max_code_size: usize,
    /// Strict mode (treat warnings as errors)
    strict: bool,
}

impl Verifier {
    /// Creates a new verifier with the CAP format limits.
    pub fn new() -> Self {
        Self {
            max_code_size: MAX_CODE_SIZE,
            strict: false,
        }
    }

    /// Enable strict mode
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Set a custom method size limit
    pub fn max_code_size(mut self, limit: usize) -> Self {
        self.max_code_size = limit;
        self
    }

    /// Verify a method
    pub fn verify(&self, function: &CompiledFunction) -> VerifyResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut stats = MethodStats {
            instruction_count: function.instructions().count(),
            code_size: function.code_size(),
            invoke_count: function
                .instructions()
                .filter(|i| matches!(i, Instruction::Invoke { .. }))
                .count(),
            ..MethodStats::default()
        };

        if stats.code_size > self.max_code_size {
            errors.push(VerifyError::CodeTooLarge {
                size: stats.code_size,
                limit: self.max_code_size,
            });
        }

        for (index, instr) in function.instructions().enumerate() {
            if let Some(extent) = local_extent(instr) {
                if extent > function.frame.max_locals {
                    errors.push(VerifyError::LocalOutOfRange {
                        index,
                        slot: extent - 1,
                        max_locals: function.frame.max_locals,
                    });
                }
            }
            match instr {
                Instruction::LookupSwitch { pairs, .. } => {
                    if pairs.windows(2).any(|w| w[0].0 >= w[1].0) {
                        errors.push(VerifyError::UnsortedLookupSwitch { index });
                    }
                }
                Instruction::TableSwitch {
                    low, high, targets, ..
                } => {
                    let expected = (*high as i64 - *low as i64 + 1).max(0) as usize;
                    if targets.len() != expected {
                        errors.push(VerifyError::MalformedTableSwitch { index });
                    }
                }
                _ => {}
            }
        }

        match ResolvedCode::resolve(&function.code)
            .and_then(|code| ControlFlowGraph::build(&code).map(|cfg| (code, cfg)))
        {
            Err(e) => errors.push(VerifyError::BadLabels(e.to_string())),
            Ok((code, cfg)) => {
                stats.block_count = cfg.blocks.len();
                let reachable: BTreeSet<usize> = cfg.reachable().into_iter().collect();
                for block in &cfg.blocks {
                    if !reachable.contains(&block.id) {
                        warnings.push(format!(
                            "Unreachable code at instruction {} in '{}'",
                            block.start, function.name
                        ));
                    } else if block.exits_code {
                        errors.push(VerifyError::FallsOffEnd { index: block.start });
                    }
                }
                match stack_depth::analyze_cfg(&code, &cfg) {
                    Ok(analysis) => {
                        stats.required_stack = analysis.max_depth;
                        if function.frame.max_stack < analysis.max_depth {
                            errors.push(VerifyError::MaxStackTooSmall {
                                declared: function.frame.max_stack,
                                required: analysis.max_depth,
                            });
                        }
                    }
                    Err(e) => errors.push(VerifyError::Stack(e.to_string())),
                }
            }
        }

        let valid = errors.is_empty() && (!self.strict || warnings.is_empty());
        VerifyResult {
            valid,
            errors,
            warnings,
            stats,
        }
    }

    /// Verify and turn the first error into [`Error::Verification`]
    pub fn check(&self, function: &CompiledFunction) -> Result<()> {
        let result = self.verify(function);
        if result.valid {
            return Ok(());
        }
        let reason = result
            .errors
            .first()
            .map(ToString::to_string)
            .or_else(|| result.warnings.first().cloned())
            .unwrap_or_default();
        Err(Error::Verification(format!("'{}': {}", function.name, reason)))
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{
        Cond, FrameSize, Item, LabelId, LocalKind, ReturnKind, Width,
    };

    fn function(code: Vec<Item>, max_stack: u16, max_locals: u16) -> CompiledFunction {
        CompiledFunction {
            name: "f".to_string(),
            descriptor: "()V".to_string(),
            code,
            frame: FrameSize {
                max_stack,
                max_locals,
            },
        }
    }

    #[test]
    fn test_simple_valid_method() {
        let f = function(
            vec![
                Instruction::Load(LocalKind::Short, 0).into(),
                Instruction::Return(ReturnKind::Short).into(),
            ],
            3,
            1,
        );
        let result = Verifier::new().verify(&f);
        assert!(result.valid, "Errors: {:?}", result.errors);
        assert_eq!(result.stats.required_stack, 1);
    }

    #[test]
    fn test_falls_off_end() {
        let f = function(vec![Instruction::SConst(1).into(), Instruction::Pop.into()], 3, 0);
        let result = Verifier::new().verify(&f);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::FallsOffEnd { .. })));
    }

    #[test]
    fn test_local_out_of_range() {
        let f = function(
            vec![
                Instruction::IInc(1, 1).into(),
                Instruction::Return(ReturnKind::Void).into(),
            ],
            2,
            2,
        );
        assert!(matches!(
            Verifier::new().verify(&f).errors.as_slice(),
            [VerifyError::LocalOutOfRange { slot: 2, .. }]
        ));
    }

    #[test]
    fn test_unsorted_lookup_switch() {
        let l = LabelId(0);
        let f = function(
            vec![
                Instruction::Load(LocalKind::Short, 0).into(),
                Instruction::LookupSwitch {
                    width: Width::Short,
                    default: l,
                    pairs: vec![(5, l), (1, l)],
                }
                .into(),
                Item::Label(l),
                Instruction::Return(ReturnKind::Void).into(),
            ],
            3,
            1,
        );
        let err = Verifier::new().check(&f).unwrap_err();
        assert!(err.to_string().contains("unsorted keys"));
    }

    #[test]
    fn test_unreachable_is_warning_unless_strict() {
        let l = LabelId(0);
        let f = function(
            vec![
                Instruction::Goto(l).into(),
                Item::Label(LabelId(1)),
                Instruction::Load(LocalKind::Short, 0).into(),
                Instruction::If(Cond::Eq, LabelId(1)).into(),
                Item::Label(l),
                Instruction::Return(ReturnKind::Void).into(),
            ],
            3,
            1,
        );
        let lenient = Verifier::new().verify(&f);
        assert!(lenient.valid);
        assert_eq!(lenient.warnings.len(), 1);
        assert!(!Verifier::new().strict().verify(&f).valid);
    }
}
