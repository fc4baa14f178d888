//! Logical and stack types for JCVM code generation
//!
//! The JCVM has two stack widths (one 16-bit word and two words) but C has
//! three integer types. Tracking the logical type next to the stack type is
//! what lets the generator pick the right conversion, array opcode and
//! comparison family at every step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a value on the operand stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackType {
    /// One word: byte, short, boolean results
    Short,
    /// Two words
    Int,
    /// One word: array or object reference
    Ref,
}

impl StackType {
    /// Number of 16-bit words this type occupies
    pub fn slot_size(&self) -> u16 {
        match self {
            StackType::Int => 2,
            StackType::Short | StackType::Ref => 1,
        }
    }
}

/// The declared (C level) type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogicalType {
    /// 8-bit signed
    Byte,
    /// 16-bit signed
    Short,
    /// 32-bit signed
    Int,
    /// No value
    Void,
    /// Opaque object reference (an APDU, or a byte buffer obtained from one)
    Ref,
    /// `byte[]`
    ByteArray,
    /// `short[]`
    ShortArray,
    /// `int[]`
    IntArray,
}

impl LogicalType {
    /// The JCVM stack type for this logical type
    pub fn stack_type(&self) -> StackType {
        match self {
            LogicalType::Int => StackType::Int,
            LogicalType::Ref
            | LogicalType::ByteArray
            | LogicalType::ShortArray
            | LogicalType::IntArray => StackType::Ref,
            LogicalType::Byte | LogicalType::Short | LogicalType::Void => StackType::Short,
        }
    }

    /// Number of words this type occupies in a local slot or on the stack
    pub fn slot_size(&self) -> u16 {
        match self {
            LogicalType::Void => 0,
            other => other.stack_type().slot_size(),
        }
    }

    /// Byte, short or int
    pub fn is_primitive(&self) -> bool {
        matches!(self, LogicalType::Byte | LogicalType::Short | LogicalType::Int)
    }

    /// One of the three array types
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            LogicalType::ByteArray | LogicalType::ShortArray | LogicalType::IntArray
        )
    }

    /// Arrays and opaque references both support indexing; a bare reference
    /// is treated as a byte buffer.
    pub fn is_indexable(&self) -> bool {
        self.is_array() || *self == LogicalType::Ref
    }

    /// Element type of an indexable type
    pub fn element_type(&self) -> Option<LogicalType> {
        match self {
            LogicalType::ByteArray | LogicalType::Ref => Some(LogicalType::Byte),
            LogicalType::ShortArray => Some(LogicalType::Short),
            LogicalType::IntArray => Some(LogicalType::Int),
            _ => None,
        }
    }

    /// Array type whose elements are `self`
    pub fn to_array(&self) -> Option<LogicalType> {
        match self {
            LogicalType::Byte => Some(LogicalType::ByteArray),
            LogicalType::Short => Some(LogicalType::ShortArray),
            LogicalType::Int => Some(LogicalType::IntArray),
            _ => None,
        }
    }

    /// Representable range of a primitive type
    pub fn range(&self) -> Option<(i64, i64)> {
        match self {
            LogicalType::Byte => Some((i8::MIN as i64, i8::MAX as i64)),
            LogicalType::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            LogicalType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            _ => None,
        }
    }

    /// Width in bits of a primitive type
    pub fn bits(&self) -> Option<u32> {
        match self {
            LogicalType::Byte => Some(8),
            LogicalType::Short => Some(16),
            LogicalType::Int => Some(32),
            _ => None,
        }
    }

    /// JCA descriptor character(s)
    pub fn descriptor(&self) -> &'static str {
        match self {
            LogicalType::Byte => "B",
            LogicalType::Short => "S",
            LogicalType::Int => "I",
            LogicalType::Void => "V",
            LogicalType::Ref => "Ljavacard/framework/APDU;",
            LogicalType::ByteArray => "[B",
            LogicalType::ShortArray => "[S",
            LogicalType::IntArray => "[I",
        }
    }

    /// Result type of a binary arithmetic operation: INT if either side is
    /// INT, otherwise SHORT (bytes promote to short).
    pub fn promote(left: LogicalType, right: LogicalType) -> LogicalType {
        if left == LogicalType::Int || right == LogicalType::Int {
            LogicalType::Int
        } else {
            LogicalType::Short
        }
    }

    /// Wrap an integer into this type's range with two's-complement semantics
    pub fn wrap(&self, value: i64) -> i64 {
        match self {
            LogicalType::Byte => value as i8 as i64,
            LogicalType::Short => value as i16 as i64,
            LogicalType::Int => value as i32 as i64,
            _ => value,
        }
    }

    /// Whether a constant fits without wrapping
    pub fn fits(&self, value: i64) -> bool {
        self.range()
            .map(|(lo, hi)| value >= lo && value <= hi)
            .unwrap_or(false)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Byte => "byte",
            LogicalType::Short => "short",
            LogicalType::Int => "int",
            LogicalType::Void => "void",
            LogicalType::Ref => "ref",
            LogicalType::ByteArray => "byte[]",
            LogicalType::ShortArray => "short[]",
            LogicalType::IntArray => "int[]",
        };
        write!(f, "{}", name)
    }
}

/// A value's logical type together with what is actually on the stack.
///
/// Expression generation returns one of these for the value it leaves on the
/// operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedValue {
    /// Declared type
    pub logical: LogicalType,
    /// Stack representation
    pub stack: StackType,
}

impl TypedValue {
    /// Typed value whose stack type is derived from the logical type
    pub fn of(logical: LogicalType) -> Self {
        Self {
            logical,
            stack: logical.stack_type(),
        }
    }

    /// No value on the stack
    pub fn void() -> Self {
        Self::of(LogicalType::Void)
    }

    /// True for void results
    pub fn is_void(&self) -> bool {
        self.logical == LogicalType::Void
    }

    /// Words occupied on the stack
    pub fn slot_size(&self) -> u16 {
        self.logical.slot_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion() {
        use LogicalType::*;
        assert_eq!(LogicalType::promote(Byte, Byte), Short);
        assert_eq!(LogicalType::promote(Byte, Short), Short);
        assert_eq!(LogicalType::promote(Short, Int), Int);
        assert_eq!(LogicalType::promote(Int, Byte), Int);
    }

    #[test]
    fn test_slot_sizes() {
        assert_eq!(LogicalType::Int.slot_size(), 2);
        assert_eq!(LogicalType::Byte.slot_size(), 1);
        assert_eq!(LogicalType::IntArray.slot_size(), 1);
        assert_eq!(LogicalType::Void.slot_size(), 0);
    }

    #[test]
    fn test_wrap_is_twos_complement() {
        assert_eq!(LogicalType::Byte.wrap(200), -56);
        assert_eq!(LogicalType::Short.wrap(0x18000), -32768);
        assert_eq!(LogicalType::Int.wrap(0x1_0000_0001), 1);
    }

    #[test]
    fn test_ref_is_byte_buffer() {
        assert!(LogicalType::Ref.is_indexable());
        assert_eq!(LogicalType::Ref.element_type(), Some(LogicalType::Byte));
    }
}
