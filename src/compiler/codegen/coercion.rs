//! Width conversions between logical types
//!
//! | from \ to | BYTE  | SHORT | INT  |
//! |-----------|-------|-------|------|
//! | BYTE      | -     | -     | s2i  |
//! | SHORT     | s2b   | -     | s2i  |
//! | INT       | i2b   | i2s   | -    |
//!
//! References only convert to themselves; an opaque reference may stand in
//! for a byte buffer.

use crate::compiler::ir::{Cond, Conversion, Instruction, LabelId, LogicalType, StackType};
use crate::error::{Error, Result};

/// Conversions that turn a `from` value into a `to` value
pub fn coerce(from: LogicalType, to: LogicalType) -> Result<Vec<Instruction>> {
    use LogicalType::*;
    let conv = match (from, to) {
        _ if from == to => return Ok(Vec::new()),
        (Byte, Short) => return Ok(Vec::new()),
        (Byte, Int) | (Short, Int) => Conversion::S2I,
        (Short, Byte) => Conversion::S2B,
        (Int, Byte) => Conversion::I2B,
        (Int, Short) => Conversion::I2S,
        (Ref, ByteArray) | (ByteArray, Ref) => return Ok(Vec::new()),
        (Void, _) => return Err(Error::type_error(to.to_string(), "void")),
        _ => return Err(Error::type_error(to.to_string(), from.to_string())),
    };
    Ok(vec![Instruction::Convert(conv)])
}

/// Array indices are shorts
pub fn coerce_index(ty: LogicalType) -> Result<Vec<Instruction>> {
    match ty {
        LogicalType::Byte | LogicalType::Short => Ok(Vec::new()),
        LogicalType::Int => Ok(vec![Instruction::Convert(Conversion::I2S)]),
        other => Err(Error::type_error("array index", other.to_string())),
    }
}

/// Branch to `target` when the value on the stack is true (`when_true`) or
/// false. INT values are compared against zero with `icmp` so that no high
/// bits are lost.
pub fn truth_branch(ty: LogicalType, when_true: bool, target: LabelId) -> Result<Vec<Instruction>> {
    let cond = if when_true { Cond::Ne } else { Cond::Eq };
    match ty.stack_type() {
        _ if ty == LogicalType::Void => Err(Error::type_error("condition", "void")),
        StackType::Short => Ok(vec![Instruction::If(cond, target)]),
        StackType::Int => Ok(vec![
            Instruction::IConst(0),
            Instruction::ICmp,
            Instruction::If(cond, target),
        ]),
        StackType::Ref if when_true => Ok(vec![Instruction::IfNonNull(target)]),
        StackType::Ref => Ok(vec![Instruction::IfNull(target)]),
    }
}
