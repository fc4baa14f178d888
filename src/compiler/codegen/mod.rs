//! # JCVM code generation
//!
//! Turns one function of the input IR into a flat stream of [`Item`]s.
//!
//! ## Module Structure
//!
//! ```text
//! codegen/
//! ├── mod.rs       # Function driver, prologue/epilogue, Emit helper
//! ├── context.rs   # GenerationContext: labels, temps, warnings, loop targets
//! ├── coercion.rs  # Width conversions and truth tests
//! ├── access.rs    # Places: slots, array elements, struct fields, offload
//! ├── checks.rs    # Tautological comparisons, sign-extension hazards
//! ├── expr.rs      # gen_expr
//! └── stmt.rs      # gen_stmt
//! ```
//!
//! ## Stack discipline
//!
//! Every expression leaves exactly its value (one word, or two for INT) and
//! every statement leaves the stack as it found it. Both are checked again
//! after optimization by the stack depth analysis.

mod access;
mod checks;
mod coercion;
mod context;
mod expr;
mod stmt;

pub use coercion::{coerce, truth_branch};
pub use context::{Binding, GenerationContext};
pub use expr::{gen_expr, type_of};
pub use stmt::gen_stmt;

use super::ir::{
    ArithOp, FunctionDecl, Instruction, Item, LabelId, LogicalType, ReturnKind, StaticKind, Stmt,
    StorageClass, Width,
};
use crate::error::{Result, Warning};
use tracing::debug;

/// Instruction stream under construction
pub type Code = Vec<Item>;

/// Appending instructions and labels to a [`Code`] buffer
pub trait Emit {
    /// Append one instruction
    fn emit(&mut self, instr: Instruction);
    /// Append several instructions in order
    fn emit_all<I: IntoIterator<Item = Instruction>>(&mut self, instrs: I);
    /// Define a label at the current position
    fn label(&mut self, label: LabelId);
}

impl Emit for Code {
    fn emit(&mut self, instr: Instruction) {
        self.push(Item::Instr(instr));
    }

    fn emit_all<I: IntoIterator<Item = Instruction>>(&mut self, instrs: I) {
        self.extend(instrs.into_iter().map(Item::Instr));
    }

    fn label(&mut self, label: LabelId) {
        self.push(Item::Label(label));
    }
}

/// Raw output of generating one function
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    /// Unoptimized instruction stream
    pub code: Code,
    /// Local slots used by temporaries beyond the function's own locals
    pub temp_slots: u16,
    /// Sign-extension warnings
    pub warnings: Vec<Warning>,
}

/// Move every offload stack pointer by this function's usage
fn adjust_stack_pointers(ctx: &mut GenerationContext<'_>, op: ArithOp) -> Code {
    let mut code = Code::new();
    for class in StorageClass::OFFLOAD {
        let usage = ctx.function.frame.usage(class);
        if usage == 0 {
            continue;
        }
        let sp = ctx.pool.stack_pointer(class);
        code.emit_all([
            Instruction::GetStatic(StaticKind::Short, sp),
            Instruction::SConst(usage as i16),
            Instruction::Arith(Width::Short, op),
            Instruction::PutStatic(StaticKind::Short, sp),
        ]);
    }
    code
}

/// Reserve the function's offload frame
pub fn offload_prologue(ctx: &mut GenerationContext<'_>) -> Code {
    adjust_stack_pointers(ctx, ArithOp::Add)
}

/// Release the function's offload frame; emitted before every return
pub fn offload_epilogue(ctx: &mut GenerationContext<'_>) -> Code {
    adjust_stack_pointers(ctx, ArithOp::Sub)
}

/// Generate the body of `func`, whose storage is described by `ctx.function`
pub fn gen_function(func: &FunctionDecl, ctx: &mut GenerationContext<'_>) -> Result<GeneratedCode> {
    debug!(function = %func.name, "generating code");
    let mut code = offload_prologue(ctx);

    for local in func.locals.iter().filter(|l| l.init.is_some()) {
        let mut decl = Stmt::decl(local.clone());
        decl.loc = local.loc.clone();
        code.extend(gen_stmt(&decl, ctx)?);
    }
    for stmt in &func.body {
        code.extend(gen_stmt(stmt, ctx)?);
    }

    let returns = func.body.last().map(Stmt::always_returns).unwrap_or(false);
    if !returns {
        let ret = ctx.function.ret;
        code.extend(offload_epilogue(ctx));
        if ret != LogicalType::Void {
            code.emit(expr::gen_const(0, ret)?);
        }
        code.emit(Instruction::Return(ReturnKind::of(ret)));
    }

    Ok(GeneratedCode {
        code,
        temp_slots: ctx.temp_slots(),
        warnings: ctx.take_warnings(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::constant_pool::ConstantPool;
    use crate::compiler::ir::{
        BinaryOp, Cond, Conversion, Expr, GlobalDecl, IncDecOp, LocalDecl, LocalKind,
        LocalStorage, ParamDecl, Pragma, SourceLoc, StmtKind, SwitchCase, TranslationUnit,
        TypeSpec,
    };
    use crate::compiler::registry::ApiRegistry;
    use crate::compiler::storage::allocate_storage;
    use crate::config::TargetConfig;
    use crate::error::Error;

    fn generate(unit: &TranslationUnit, config: &TargetConfig) -> Result<GeneratedCode> {
        let symbols = allocate_storage(unit, config)?;
        let func = &unit.functions[0];
        let symbol = symbols.function(&func.name).expect("function symbol");
        let mut pool = ConstantPool::new("Main");
        let mut ctx = GenerationContext::new(
            &symbols,
            symbol,
            &mut pool,
            ApiRegistry::standard(),
            config,
        );
        gen_function(func, &mut ctx)
    }

    fn single(func: FunctionDecl) -> TranslationUnit {
        TranslationUnit {
            functions: vec![func],
            ..Default::default()
        }
    }

    fn instrs(code: &Code) -> Vec<Instruction> {
        code.iter().filter_map(|i| i.instruction().cloned()).collect()
    }

    fn byte_param_fn(body: Vec<Stmt>) -> FunctionDecl {
        FunctionDecl::new("f", TypeSpec::Short, vec![ParamDecl::new("b", TypeSpec::Byte)])
            .with_body(body)
    }

    #[test]
    fn test_tautological_byte_comparison_is_rejected() {
        let body = vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::Eq,
            Expr::var("b"),
            Expr::short(200),
        )))];
        let err = generate(&single(byte_param_fn(body)), &TargetConfig::default()).unwrap_err();
        match err {
            Error::TautologicalComparison(msg) => {
                assert_eq!(
                    msg,
                    "comparison of constant 200 with 'byte' is always false (valid range: -128 to 127)"
                );
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_relational_tautology_is_normalized() {
        let body = vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::Gt,
            Expr::short(200),
            Expr::var("b"),
        )))];
        let err = generate(&single(byte_param_fn(body)), &TargetConfig::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "comparison of 'byte' with constant 200 is always true (valid range: -128 to 127)"
        );
    }

    #[test]
    fn test_constant_comparison_is_rejected() {
        let body = vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::Lt,
            Expr::short(1),
            Expr::short(2),
        )))];
        let err = generate(&single(byte_param_fn(body)), &TargetConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "comparison 1 < 2 is always true");
    }

    #[test]
    fn test_zero_comparison_uses_single_operand_branch() {
        let body = vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::Lt,
            Expr::short(0),
            Expr::var("b"),
        )))];
        let out = generate(&single(byte_param_fn(body)), &TargetConfig::default()).unwrap();
        let code = instrs(&out.code);
        assert!(code.iter().any(|i| matches!(i, Instruction::If(Cond::Gt, _))));
        assert!(!code.iter().any(|i| matches!(i, Instruction::IfSCmp(..))));
    }

    #[test]
    fn test_sign_extension_warning_and_pragma() {
        let masked = Stmt::ret(Some(Expr::binary(
            BinaryOp::BitAnd,
            Expr::var("b"),
            Expr::short(0x1FF),
        )))
        .at(SourceLoc::new("main.c", 9));
        let out = generate(&single(byte_param_fn(vec![masked.clone()])), &TargetConfig::default())
            .unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(
            out.warnings[0].to_string(),
            "main.c:9: warning: byte in bitwise '&' may sign-extend; consider (val & 0xFF)"
        );

        let quiet = masked.with_pragma(Pragma::IgnoreSignExtension);
        let out = generate(&single(byte_param_fn(vec![quiet])), &TargetConfig::default()).unwrap();
        assert!(out.warnings.is_empty());

        let safe = Stmt::ret(Some(Expr::binary(
            BinaryOp::BitAnd,
            Expr::var("b"),
            Expr::short(0xFF),
        )));
        let out = generate(&single(byte_param_fn(vec![safe])), &TargetConfig::default()).unwrap();
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_byte_xor_with_variable_warns() {
        let body = vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::BitXor,
            Expr::var("b"),
            Expr::cast(LogicalType::Short, Expr::var("b")),
        )))];
        let out = generate(&single(byte_param_fn(body)), &TargetConfig::default()).unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(
            out.warnings[0].message,
            "byte in bitwise '^' may sign-extend; consider (val & 0xFF)"
        );
    }

    #[test]
    fn test_right_shift_of_byte_warns() {
        let body = vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::Shr,
            Expr::var("b"),
            Expr::short(2),
        )))];
        let out = generate(&single(byte_param_fn(body)), &TargetConfig::default()).unwrap();
        assert_eq!(
            out.warnings[0].message,
            "byte in right-shift may sign-extend; consider (val & 0xFF)"
        );
    }

    #[test]
    fn test_multiply_by_power_of_two_shifts() {
        let body = vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::Mul,
            Expr::var("b"),
            Expr::short(8),
        )))];
        let out = generate(&single(byte_param_fn(body)), &TargetConfig::default()).unwrap();
        let code = instrs(&out.code);
        assert!(code.contains(&Instruction::SConst(3)));
        assert!(code.contains(&Instruction::Arith(Width::Short, ArithOp::Shl)));
        assert!(!code.contains(&Instruction::Arith(Width::Short, ArithOp::Mul)));
    }

    #[test]
    fn test_local_increment_uses_sinc() {
        let mut func = FunctionDecl::new("f", TypeSpec::Void, vec![]);
        func.locals.push(LocalDecl::new("i", TypeSpec::Short).with_init(Expr::short(0)));
        func.body = vec![Stmt::expr(Expr::inc_dec(IncDecOp::PostInc, Expr::var("i")))];
        let out = generate(&single(func), &TargetConfig::default()).unwrap();
        assert_eq!(
            instrs(&out.code),
            vec![
                Instruction::SConst(0),
                Instruction::Store(LocalKind::Short, 0),
                Instruction::SInc(0, 1),
                Instruction::Return(ReturnKind::Void),
            ]
        );
    }

    #[test]
    fn test_offload_prologue_and_epilogue() {
        let mut func = FunctionDecl::new("f", TypeSpec::Short, vec![]);
        func.locals.push(LocalDecl::new("a", TypeSpec::Short));
        func.locals
            .push(LocalDecl::new("b", TypeSpec::Short).with_storage(LocalStorage::Offload));
        func.body = vec![
            Stmt::assign(Expr::var("b"), Expr::short(7)),
            Stmt::ret(Some(Expr::var("b"))),
        ];
        let out = generate(&single(func), &TargetConfig::default()).unwrap();
        let code = instrs(&out.code);
        let puts = code
            .iter()
            .filter(|i| matches!(i, Instruction::PutStatic(StaticKind::Short, _)))
            .count();
        assert_eq!(puts, 2);
        assert_eq!(code.last(), Some(&Instruction::Return(ReturnKind::Short)));
        assert!(code.contains(&Instruction::Arith(Width::Short, ArithOp::Sub)));
    }

    #[test]
    fn test_switch_selection() {
        let case = |v: i64| SwitchCase {
            value: Some(v),
            body: vec![Stmt::new(StmtKind::Break)],
        };
        let dense = Stmt::new(StmtKind::Switch {
            scrutinee: Expr::var("b"),
            cases: vec![case(1), case(2), case(3)],
        });
        let out = generate(&single(byte_param_fn(vec![dense])), &TargetConfig::default()).unwrap();
        assert!(instrs(&out.code)
            .iter()
            .any(|i| matches!(i, Instruction::TableSwitch { .. })));

        let sparse = Stmt::new(StmtKind::Switch {
            scrutinee: Expr::var("b"),
            cases: vec![case(1), case(50), case(100)],
        });
        let out = generate(&single(byte_param_fn(vec![sparse])), &TargetConfig::default()).unwrap();
        assert!(instrs(&out.code)
            .iter()
            .any(|i| matches!(i, Instruction::LookupSwitch { .. })));
    }

    #[test]
    fn test_switch_case_out_of_short_range() {
        let sw = Stmt::new(StmtKind::Switch {
            scrutinee: Expr::var("b"),
            cases: vec![SwitchCase {
                value: Some(40000),
                body: vec![],
            }],
        });
        let err = generate(&single(byte_param_fn(vec![sw])), &TargetConfig::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Codegen error: switch case value 40000 is out of range for short (valid range: -32768 to 32767)"
        );
    }

    #[test]
    fn test_write_to_const_array_is_rejected() {
        let mut unit = single(FunctionDecl::new("f", TypeSpec::Void, vec![]).with_body(vec![
            Stmt::assign(Expr::index(Expr::var("t"), Expr::short(0)), Expr::short(1)),
        ]));
        unit.globals
            .push(GlobalDecl::const_array("t", TypeSpec::Short, vec![1, 2, 3]));
        let err = generate(&unit, &TargetConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "Codegen error: cannot assign to read-only 't'");
    }

    #[test]
    fn test_call_arity_is_checked() {
        let callee = FunctionDecl::new("g", TypeSpec::Void, vec![ParamDecl::new("x", TypeSpec::Short)]);
        let caller = FunctionDecl::new("f", TypeSpec::Void, vec![])
            .with_body(vec![Stmt::expr(Expr::call("g", vec![]))]);
        let unit = TranslationUnit {
            functions: vec![caller, callee],
            ..Default::default()
        };
        let err = generate(&unit, &TargetConfig::default()).unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { expected: 1, got: 0, .. }));

        let unknown = single(
            FunctionDecl::new("f", TypeSpec::Void, vec![])
                .with_body(vec![Stmt::expr(Expr::call("nope", vec![]))]),
        );
        let err = generate(&unknown, &TargetConfig::default()).unwrap_err();
        assert!(matches!(err, Error::UndefinedFunction { .. }));
    }

    #[test]
    fn test_int_arithmetic_promotes_with_s2i() {
        let func = FunctionDecl::new(
            "f",
            TypeSpec::Int,
            vec![
                ParamDecl::new("a", TypeSpec::Short),
                ParamDecl::new("b", TypeSpec::Int),
            ],
        )
        .with_body(vec![Stmt::ret(Some(Expr::binary(
            BinaryOp::Add,
            Expr::var("a"),
            Expr::var("b"),
        )))]);
        let out = generate(&single(func), &TargetConfig::default()).unwrap();
        let code = instrs(&out.code);
        assert_eq!(code[1], Instruction::Convert(Conversion::S2I));
        assert!(code.contains(&Instruction::Arith(Width::Int, ArithOp::Add)));
        assert_eq!(code.last(), Some(&Instruction::Return(ReturnKind::Int)));
    }
}
