//! # Intermediate Representation for JCVM compilation
//!
//! Two representations live here: the typed input IR handed to the compiler
//! by a front end, and the linear instruction stream that every phase after
//! code generation works on.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── ast.rs          # Expr, Stmt, declarations, pragmas (input IR)
//! ├── types.rs        # LogicalType, StackType, TypedValue
//! ├── memory_model.rs # StorageClass, Allocation
//! ├── instruction.rs  # Instruction, LabelId, Item, CallSignature
//! └── program.rs      # CompiledFunction, FrameSize, ResolvedCode
//! ```
//!
//! ## Key Types
//!
//! - [`Expr`] / [`Stmt`] - closed sum types dispatched with exhaustive `match`
//! - [`LogicalType`] - declared type, tracked next to its [`StackType`]
//! - [`Instruction`] - JCVM opcode with operands and a static stack effect
//! - [`Item`] - instruction or label; a method body is a `Vec<Item>`

pub mod ast;
mod instruction;
pub mod memory_model;
mod program;
mod types;

pub use ast::{
    BinaryOp, Expr, FieldDecl, FunctionDecl, GlobalDecl, IncDecOp, Initializer, LocalDecl,
    LocalStorage, ParamDecl, Pragma, SourceLoc, Stmt, StmtKind, StructDecl, SwitchCase,
    TranslationUnit, TypeSpec, UnaryOp, WideCmp, WideExpr,
};
pub use instruction::{
    ArithOp, ArrayElem, CallSignature, Cond, Conversion, Dispatch, Instruction, Item, LabelId,
    LocalKind, ReturnKind, StaticKind, Width,
};
pub use memory_model::{Allocation, MemoryTier, StorageClass, MAX_ARRAY_ELEMENTS};
pub use program::{CompiledFunction, FrameSize, ResolvedCode};
pub use types::{LogicalType, StackType, TypedValue};
