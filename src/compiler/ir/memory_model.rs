//! Storage classes and allocation records
//!
//! The JCVM has no generic word-addressed memory. Every variable lives in one
//! of a handful of physical homes, each specialised by element type:
//!
//! 1. **Fast slots**: per-call local variable slots, addressed by index
//! 2. **Offload stacks** (`STACK_B/S/I`): transient arrays addressed relative to
//!    a per-type stack pointer, for locals that do not fit the slot budget
//! 3. **Persistent memory** (`MEM_B/S/I`): static arrays shared by all globals
//! 4. **Read-only data** (`CONST_B/S/I`): one static array per constant table

use super::types::LogicalType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest element count a JCVM array may have (indices are signed shorts)
pub const MAX_ARRAY_ELEMENTS: u32 = 32767;

/// Which tier of memory a storage class belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryTier {
    /// Per-call local variable slots
    Slot,
    /// Transient offload stack arrays
    Offload,
    /// Persistent static arrays
    Persistent,
    /// Read-only initialized arrays
    ReadOnly,
}

/// Physical home of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageClass {
    /// Fast local variable slot
    LocalSlot,
    /// Byte offload stack
    StackB,
    /// Short offload stack (also holds emulated ints)
    StackS,
    /// Int offload stack
    StackI,
    /// Persistent byte memory
    MemB,
    /// Persistent short memory (also holds emulated ints)
    MemS,
    /// Persistent int memory
    MemI,
    /// Read-only byte table
    ConstB,
    /// Read-only short table
    ConstS,
    /// Read-only int table
    ConstI,
}

impl StorageClass {
    /// Array-backed classes that are shared by many symbols
    pub const SHARED: [StorageClass; 6] = [
        StorageClass::MemB,
        StorageClass::MemS,
        StorageClass::MemI,
        StorageClass::StackB,
        StorageClass::StackS,
        StorageClass::StackI,
    ];

    /// Offload stacks, in prologue order
    pub const OFFLOAD: [StorageClass; 3] =
        [StorageClass::StackB, StorageClass::StackS, StorageClass::StackI];

    /// Persistent memory class for an element type
    pub fn persistent(elem: LogicalType) -> Option<Self> {
        match elem {
            LogicalType::Byte => Some(StorageClass::MemB),
            LogicalType::Short => Some(StorageClass::MemS),
            LogicalType::Int => Some(StorageClass::MemI),
            _ => None,
        }
    }

    /// Offload stack class for an element type
    pub fn offload(elem: LogicalType) -> Option<Self> {
        match elem {
            LogicalType::Byte => Some(StorageClass::StackB),
            LogicalType::Short => Some(StorageClass::StackS),
            LogicalType::Int => Some(StorageClass::StackI),
            _ => None,
        }
    }

    /// Read-only class for an element type
    pub fn read_only(elem: LogicalType) -> Option<Self> {
        match elem {
            LogicalType::Byte => Some(StorageClass::ConstB),
            LogicalType::Short => Some(StorageClass::ConstS),
            LogicalType::Int => Some(StorageClass::ConstI),
            _ => None,
        }
    }

    /// Tier this class belongs to
    pub fn tier(&self) -> MemoryTier {
        match self {
            StorageClass::LocalSlot => MemoryTier::Slot,
            StorageClass::StackB | StorageClass::StackS | StorageClass::StackI => {
                MemoryTier::Offload
            }
            StorageClass::MemB | StorageClass::MemS | StorageClass::MemI => MemoryTier::Persistent,
            StorageClass::ConstB | StorageClass::ConstS | StorageClass::ConstI => {
                MemoryTier::ReadOnly
            }
        }
    }

    /// Element type of the backing array (slots have none)
    pub fn element_type(&self) -> Option<LogicalType> {
        match self {
            StorageClass::LocalSlot => None,
            StorageClass::StackB | StorageClass::MemB | StorageClass::ConstB => {
                Some(LogicalType::Byte)
            }
            StorageClass::StackS | StorageClass::MemS | StorageClass::ConstS => {
                Some(LogicalType::Short)
            }
            StorageClass::StackI | StorageClass::MemI | StorageClass::ConstI => {
                Some(LogicalType::Int)
            }
        }
    }

    /// Static field name of the backing array
    pub fn name(&self) -> &'static str {
        match self {
            StorageClass::LocalSlot => "LOCAL",
            StorageClass::StackB => "STACK_B",
            StorageClass::StackS => "STACK_S",
            StorageClass::StackI => "STACK_I",
            StorageClass::MemB => "MEM_B",
            StorageClass::MemS => "MEM_S",
            StorageClass::MemI => "MEM_I",
            StorageClass::ConstB => "CONST_B",
            StorageClass::ConstS => "CONST_S",
            StorageClass::ConstI => "CONST_I",
        }
    }

    /// Name of the stack pointer static for an offload class
    pub fn stack_pointer_name(&self) -> Option<&'static str> {
        match self {
            StorageClass::StackB => Some("SP_B"),
            StorageClass::StackS => Some("SP_S"),
            StorageClass::StackI => Some("SP_I"),
            _ => None,
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A contiguous range inside one storage class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Storage class holding the range
    pub class: StorageClass,
    /// First element (or slot) index
    pub offset: u16,
    /// Number of elements (or slots)
    pub count: u16,
}

impl Allocation {
    /// One past the last element
    pub fn end(&self) -> u32 {
        self.offset as u32 + self.count as u32
    }

    /// Whether two allocations share any element of the same class
    pub fn overlaps(&self, other: &Allocation) -> bool {
        self.class == other.class
            && (self.offset as u32) < other.end()
            && (other.offset as u32) < self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_for_element() {
        assert_eq!(
            StorageClass::persistent(LogicalType::Short),
            Some(StorageClass::MemS)
        );
        assert_eq!(
            StorageClass::offload(LogicalType::Int),
            Some(StorageClass::StackI)
        );
        assert_eq!(StorageClass::read_only(LogicalType::Ref), None);
        assert_eq!(StorageClass::StackS.stack_pointer_name(), Some("SP_S"));
        assert_eq!(StorageClass::MemS.tier(), MemoryTier::Persistent);
    }

    #[test]
    fn test_overlap() {
        let a = Allocation {
            class: StorageClass::MemS,
            offset: 0,
            count: 4,
        };
        let b = Allocation {
            class: StorageClass::MemS,
            offset: 4,
            count: 2,
        };
        let c = Allocation {
            class: StorageClass::MemB,
            offset: 0,
            count: 4,
        };
        assert!(!a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.overlaps(&Allocation { offset: 3, ..b }));
    }
}
