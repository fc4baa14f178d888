//! Symbol table produced by storage allocation
//!
//! Built once per translation unit by the [`StorageAllocator`] and then only
//! read by later phases. All maps are ordered so that every walk over the
//! table is deterministic.
//!
//! [`StorageAllocator`]: super::storage::StorageAllocator

use super::ir::{Allocation, LogicalType, SourceLoc, StorageClass};
use std::collections::BTreeMap;

/// Field of a struct type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    /// Field name
    pub name: String,
    /// Element type
    pub elem: LogicalType,
    /// Sub-array length when the field is an array
    pub array_size: Option<u16>,
}

impl StructField {
    /// Elements per struct instance (1 for scalar fields)
    pub fn per_element(&self) -> u16 {
        self.array_size.unwrap_or(1)
    }
}

/// Struct type layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Struct name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<StructField>,
}

impl StructLayout {
    /// Field by name
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One field of a struct array, stored as its own flat array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSymbol {
    /// Field name
    pub name: String,
    /// Element type
    pub elem: LogicalType,
    /// Sub-array length (1 for scalar fields)
    pub field_array_size: u16,
    /// Whether the field is itself an array
    pub is_array: bool,
    /// Storage range of the whole flattened field
    pub alloc: Allocation,
    /// INT stored as short pairs
    pub emulated: bool,
}

/// One field of a constant struct array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstFieldSymbol {
    /// Field name
    pub name: String,
    /// Element type
    pub elem: LogicalType,
    /// Sub-array length (1 for scalar fields)
    pub field_array_size: u16,
    /// Whether the field is itself an array
    pub is_array: bool,
    /// Logical values, element-major within the field
    pub values: Vec<i64>,
    /// Values as stored (INT split into short pairs when emulated)
    pub stored: Vec<i64>,
    /// Read-only class of the backing table
    pub class: StorageClass,
    /// INT stored as short pairs
    pub emulated: bool,
}

/// What kind of global a symbol is, with its storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalKind {
    /// Scalar in persistent memory
    Scalar {
        /// Declared type
        ty: LogicalType,
        /// Storage range (two shorts for emulated INT)
        alloc: Allocation,
        /// INT stored as a short pair
        emulated: bool,
        /// Literal initializer
        initial: Option<i64>,
    },
    /// Array in persistent memory
    Array {
        /// Element type
        elem: LogicalType,
        /// Logical element count
        len: u16,
        /// Storage range
        alloc: Allocation,
        /// INT stored as short pairs
        emulated: bool,
        /// Literal initializer
        initial: Option<Vec<i64>>,
    },
    /// Compile-time scalar constant, folded at every use
    Constant {
        /// Declared type
        ty: LogicalType,
        /// Value (already wrapped to `ty`)
        value: i64,
    },
    /// Read-only array with its literal values
    ConstArray {
        /// Element type
        elem: LogicalType,
        /// Logical values
        values: Vec<i64>,
        /// Values as stored
        stored: Vec<i64>,
        /// Read-only class of the backing table
        class: StorageClass,
        /// INT stored as short pairs
        emulated: bool,
    },
    /// Struct array decomposed into per-field arrays
    StructArray {
        /// Struct type name
        struct_name: String,
        /// Number of struct elements
        len: u16,
        /// Fields in declaration order
        fields: Vec<FieldSymbol>,
    },
    /// Read-only struct array decomposed into per-field tables
    ConstStructArray {
        /// Struct type name
        struct_name: String,
        /// Number of struct elements
        len: u16,
        /// Fields in declaration order
        fields: Vec<ConstFieldSymbol>,
    },
}

/// A global variable, array, constant or struct array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSymbol {
    /// Name (static locals are mangled as `function$name`)
    pub name: String,
    /// Kind and storage
    pub kind: GlobalKind,
    /// Declaration site
    pub loc: Option<SourceLoc>,
}

impl GlobalSymbol {
    /// Storage ranges this symbol owns in shared classes
    pub fn allocations(&self) -> Vec<Allocation> {
        match &self.kind {
            GlobalKind::Scalar { alloc, .. } | GlobalKind::Array { alloc, .. } => vec![*alloc],
            GlobalKind::StructArray { fields, .. } => fields.iter().map(|f| f.alloc).collect(),
            _ => Vec::new(),
        }
    }
}

/// Where a parameter or local lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLocation {
    /// Local variable slot
    Slot {
        /// Slot index
        slot: u16,
        /// Declared type
        ty: LogicalType,
        /// Parameters cannot hold array assignments
        is_param: bool,
    },
    /// Offload stack element, addressed relative to the stack pointer
    Offload {
        /// Offload class
        class: StorageClass,
        /// Offset within this function's frame for that class
        offset: u16,
        /// Declared type
        ty: LogicalType,
        /// INT stored as a short pair in `STACK_S`
        emulated: bool,
    },
}

impl VarLocation {
    /// Declared type
    pub fn ty(&self) -> LogicalType {
        match self {
            VarLocation::Slot { ty, .. } | VarLocation::Offload { ty, .. } => *ty,
        }
    }
}

/// Per-function storage decisions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionFrame {
    /// Parameters and locals by source name
    pub vars: BTreeMap<String, VarLocation>,
    /// Static locals: source name to mangled global name
    pub statics: BTreeMap<String, String>,
    /// Const locals folded at every use
    pub constants: BTreeMap<String, (LogicalType, i64)>,
    /// Slots taken by parameters
    pub param_slots: u16,
    /// Slots taken by parameters and fast locals
    pub fast_slots: u16,
    /// Elements used per offload class
    pub offload_usage: BTreeMap<StorageClass, u16>,
    /// Whether array references are cached in temporaries
    pub cache_array_refs: bool,
}

impl FunctionFrame {
    /// Elements of `class` used by this frame
    pub fn usage(&self, class: StorageClass) -> u16 {
        self.offload_usage.get(&class).copied().unwrap_or(0)
    }

    /// Whether the function touches any offload stack
    pub fn uses_offload(&self) -> bool {
        self.offload_usage.values().any(|&u| u > 0)
    }
}

/// Function signature plus its frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    /// Name
    pub name: String,
    /// Return type
    pub ret: LogicalType,
    /// Parameters in order
    pub params: Vec<(String, LogicalType)>,
    /// Storage decisions
    pub frame: FunctionFrame,
}

impl FunctionSymbol {
    /// JCA descriptor such as `(SB)S`
    pub fn descriptor(&self) -> String {
        let params: String = self.params.iter().map(|(_, ty)| ty.descriptor()).collect();
        format!("({}){}", params, self.ret.descriptor())
    }

    /// Parameter types in order
    pub fn param_types(&self) -> Vec<LogicalType> {
        self.params.iter().map(|(_, ty)| *ty).collect()
    }
}

/// Everything codegen needs to know about declarations
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    /// Struct layouts by name
    pub structs: BTreeMap<String, StructLayout>,
    /// Globals by name
    pub globals: BTreeMap<String, GlobalSymbol>,
    /// Global names in declaration order
    pub global_order: Vec<String>,
    /// Functions by name
    pub functions: BTreeMap<String, FunctionSymbol>,
    /// Function names in declaration order
    pub function_order: Vec<String>,
    /// Total elements allocated per shared class
    pub sizes: BTreeMap<StorageClass, u32>,
}

impl SymbolTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Global by (possibly mangled) name
    pub fn global(&self, name: &str) -> Option<&GlobalSymbol> {
        self.globals.get(name)
    }

    /// Function by name
    pub fn function(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.get(name)
    }

    /// Globals in declaration order
    pub fn globals_in_order(&self) -> impl Iterator<Item = &GlobalSymbol> {
        self.global_order.iter().filter_map(|n| self.globals.get(n))
    }

    /// Total elements allocated in a class
    pub fn size(&self, class: StorageClass) -> u32 {
        self.sizes.get(&class).copied().unwrap_or(0)
    }

    /// All storage ranges owned by globals in one class, by offset
    pub fn allocations_in(&self, class: StorageClass) -> Vec<Allocation> {
        let mut allocs: Vec<Allocation> = self
            .globals_in_order()
            .flat_map(|g| g.allocations())
            .filter(|a| a.class == class)
            .collect();
        allocs.sort_by_key(|a| a.offset);
        allocs
    }

    /// Largest offload frame of any function, per class
    pub fn offload_peak(&self, class: StorageClass) -> u16 {
        self.functions
            .values()
            .map(|f| f.frame.usage(class))
            .max()
            .unwrap_or(0)
    }
}
