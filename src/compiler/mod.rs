//! # JCVM Compiler - typed IR to JavaCard bytecode
//!
//! This module compiles a typed translation unit (globals, struct-of-arrays
//! declarations and functions) into per-method JCVM instruction streams with
//! their frame sizes and a shared constant pool.
//!
//! ## Architecture
//!
//! ```text
//! TranslationUnit → Storage → i64 Lowering → Codegen → Peephole → Stack Depth → CompileResult
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! compiler/
//! ├── mod.rs            # Compiler driver, options and result
//! ├── ir/               # Input IR and instruction stream
//! ├── storage.rs        # Storage classes and offsets for every variable
//! ├── symbols.rs        # Symbol table produced by storage allocation
//! ├── lower_i64.rs      # Wide bitmask idioms back to narrow table loads
//! ├── codegen/          # Expression and statement generation
//! ├── optimizer.rs      # Peephole passes over the flat stream
//! ├── cfg.rs            # Basic blocks and edges
//! ├── stack_depth.rs    # Maximum operand stack depth
//! ├── verifier.rs       # Structural checks on compiled methods
//! ├── constant_pool.rs  # Interned constant pool entries
//! ├── registry.rs       # Platform API class and method tokens
//! └── listing.rs        # JCA-style text output
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use jcvmc::compiler::{CompileOptions, Compiler};
//! use jcvmc::config::TargetConfig;
//!
//! let compiler = Compiler::new(CompileOptions::default(), TargetConfig::default());
//! let result = compiler.compile(&unit)?;
//! println!("{}", result.listing());
//! ```

pub mod cfg;
pub mod codegen;
pub mod constant_pool;
pub mod ir;
pub mod listing;
pub mod lower_i64;
pub mod optimizer;
pub mod registry;
pub mod stack_depth;
pub mod storage;
pub mod symbols;
pub mod verifier;

pub use cfg::{BasicBlock, ControlFlowGraph};
pub use codegen::{gen_expr, gen_stmt, GenerationContext};
pub use constant_pool::{ConstantPool, CpEntry, CpEntryKind};
pub use ir::{CompiledFunction, FrameSize, Instruction, Item, LabelId, TranslationUnit};
pub use optimizer::PeepholeOptimizer;
pub use registry::{ApiRegistry, MethodInfo};
pub use stack_depth::{max_stack, StackAnalysis};
pub use storage::{allocate_storage, StorageAllocator};
pub use symbols::SymbolTable;
pub use verifier::{Verifier, VerifyError, VerifyResult};

use crate::config::TargetConfig;
use crate::error::{Error, Result, Warning};
use tracing::{debug, info};

/// Compilation options
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Optimization level (0 disables the peephole optimizer)
    pub opt_level: u8,
    /// Name of the applet class owning the generated methods
    pub class_name: String,
    /// Run the structural verifier on every method
    pub verify: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: 2,
            class_name: "Main".to_string(),
            verify: true,
        }
    }
}

/// Compilation result
#[derive(Debug)]
pub struct CompileResult {
    /// One entry per function, in declaration order
    pub functions: Vec<CompiledFunction>,
    /// Storage decisions for the unit
    pub symbols: SymbolTable,
    /// Constant pool shared by all methods
    pub constant_pool: ConstantPool,
    /// Warnings generated during compilation
    pub warnings: Vec<Warning>,
}

impl CompileResult {
    /// Compiled function by name
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// JCA-style listing of the constant pool and every method
    pub fn listing(&self) -> String {
        listing::listing(&self.functions, &self.constant_pool)
    }
}

/// Typed IR to JCVM compiler
pub struct Compiler {
    options: CompileOptions,
    target: TargetConfig,
    registry: Option<ApiRegistry>,
}

impl Compiler {
    /// Create a new compiler with options and a target description
    pub fn new(options: CompileOptions, target: TargetConfig) -> Self {
        Self {
            options,
            target,
            registry: None,
        }
    }

    /// Resolve intrinsics against `registry` instead of the standard table
    pub fn with_registry(mut self, registry: ApiRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn registry(&self) -> &ApiRegistry {
        self.registry.as_ref().unwrap_or_else(|| ApiRegistry::standard())
    }

    /// Compile every function of `unit`
    pub fn compile(&self, unit: &TranslationUnit) -> Result<CompileResult> {
        self.target.validate()?;

        // Phase 1: Storage allocation
        let symbols = allocate_storage(unit, &self.target)?;
        debug!(
            globals = symbols.globals.len(),
            functions = symbols.functions.len(),
            "storage allocated"
        );

        // Phase 2: Wide-integer lowering
        let lowered = lower_i64::lower_unit(unit, &symbols)?;

        // Phases 3-5, one function at a time in declaration order
        let mut pool = ConstantPool::new(self.options.class_name.clone());
        let mut optimizer = PeepholeOptimizer::new(self.options.opt_level);
        let verifier = Verifier::new();
        let mut functions = Vec::with_capacity(lowered.functions.len());
        let mut warnings = Vec::new();

        for func in &lowered.functions {
            let symbol = symbols
                .function(&func.name)
                .ok_or_else(|| Error::UndefinedFunction {
                    name: func.name.clone(),
                })?;

            // Phase 3: Code generation
            let mut ctx = GenerationContext::new(
                &symbols,
                symbol,
                &mut pool,
                self.registry(),
                &self.target,
            );
            let generated = codegen::gen_function(func, &mut ctx)?;
            let mut code = generated.code;
            let raw_len = code.len();

            // Phase 4: Peephole optimization
            let passes = optimizer.optimize(&mut code);

            // Phase 5: Stack depth
            let max_stack = stack_depth::max_stack(&code)?;
            let frame = FrameSize {
                max_stack,
                max_locals: symbol.frame.fast_slots + generated.temp_slots,
            };
            debug!(
                function = %func.name,
                raw = raw_len,
                optimized = code.len(),
                passes,
                max_stack = frame.max_stack,
                max_locals = frame.max_locals,
                "function compiled"
            );

            let compiled = CompiledFunction {
                name: func.name.clone(),
                descriptor: symbol.descriptor(),
                code,
                frame,
            };
            if self.options.verify {
                verifier.check(&compiled)?;
            }
            warnings.extend(generated.warnings);
            functions.push(compiled);
        }

        info!(
            functions = functions.len(),
            constant_pool = pool.len(),
            warnings = warnings.len(),
            "compilation finished"
        );

        Ok(CompileResult {
            functions,
            symbols,
            constant_pool: pool,
            warnings,
        })
    }
}
