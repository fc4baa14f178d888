//! # jcvmc - A JavaCard VM Compiler Back End
//!
//! Compiles a typed intermediate representation of C-like programs into
//! JavaCard VM bytecode: a 16-bit-word stack machine with a handful of fast
//! local slots, transient offload arrays and persistent static storage.
//!
//! ## Features
//!
//! - **Storage allocation** - every global, struct field and local gets a
//!   storage class and offset, with 32-bit values split into short pairs on
//!   cards without native int arrays
//! - **Wide-integer lowering** - 64-bit bitmask idioms produced by upstream
//!   optimizers are traced back to narrow constant-table loads
//! - **Code generation** - type promotion, sign-extension hazard warnings and
//!   compile-time rejection of tautological comparisons
//! - **Peephole optimization** - label-aware rewrites to a fixed point
//! - **Stack analysis** - exact `max_stack` per method from the control flow graph
//!
//! ## Quick Start
//!
//! ```rust
//! use jcvmc::compiler::ir::{Expr, FunctionDecl, ParamDecl, Stmt, TranslationUnit, TypeSpec};
//! use jcvmc::compiler::{CompileOptions, Compiler};
//! use jcvmc::config::TargetConfig;
//!
//! # fn main() -> jcvmc::Result<()> {
//! let unit = TranslationUnit {
//!     functions: vec![FunctionDecl::new(
//!         "twice",
//!         TypeSpec::Short,
//!         vec![ParamDecl::new("x", TypeSpec::Short)],
//!     )
//!     .with_body(vec![Stmt::ret(Some(Expr::binary(
//!         jcvmc::compiler::ir::BinaryOp::Mul,
//!         Expr::var("x"),
//!         Expr::short(2),
//!     )))])],
//!     ..TranslationUnit::default()
//! };
//!
//! let compiler = Compiler::new(CompileOptions::default(), TargetConfig::default());
//! let result = compiler.compile(&unit)?;
//! let twice = result.function("twice").unwrap();
//! assert_eq!(twice.descriptor, "(S)S");
//! println!("{}", result.listing());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TranslationUnit → Storage → i64 Lowering → Codegen → Peephole → Stack Depth
//! ```
//!
//! ### Main Components
//!
//! - [`compiler`] - the pipeline and every phase
//! - [`config`] - target card description, loadable from JSON
//! - [`error`] - error type, diagnostics and warnings
//!
//! ## Error Handling
//!
//! Declaration problems are collected and reported together as
//! [`Error::Semantic`]; code generation stops at the first problem in a
//! function. Sign-extension hazards are warnings returned with the result.
//!
//! ```rust
//! use jcvmc::compiler::ir::{BinaryOp, Expr, FunctionDecl, LocalDecl, Stmt, TranslationUnit, TypeSpec};
//! use jcvmc::compiler::{CompileOptions, Compiler};
//! use jcvmc::config::TargetConfig;
//!
//! let mut f = FunctionDecl::new("f", TypeSpec::Void, vec![]);
//! f.locals.push(LocalDecl::new("b", TypeSpec::Byte));
//! f.body.push(Stmt::if_else(
//!     Expr::binary(BinaryOp::Eq, Expr::var("b"), Expr::short(200)),
//!     Stmt::ret(None),
//!     None,
//! ));
//! let unit = TranslationUnit { functions: vec![f], ..TranslationUnit::default() };
//!
//! let err = Compiler::new(CompileOptions::default(), TargetConfig::default())
//!     .compile(&unit)
//!     .unwrap_err();
//! assert!(err.to_string().contains("always false"));
//! ```

// Allow specific clippy warnings that are intentional design choices
#![allow(clippy::too_many_arguments)] // Context constructors take every shared table
#![allow(clippy::collapsible_match)] // Separate error handling for clarity

/// Version of the compiler
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod config;
pub mod error;

// Re-export main types
pub use compiler::{CompileOptions, CompileResult, Compiler};
pub use config::TargetConfig;
pub use error::{Diagnostic, Diagnostics, Error, ErrorClass, Result, Warning};
