//! Expression code generation
//!
//! [`gen_expr`] leaves exactly one value on the operand stack (nothing for a
//! void call) and reports its logical type. Conversions are never implicit:
//! whoever consumes a value coerces it to the width it needs.

use super::access::{
    emit_address, emit_load, emit_split_store, resolve_place, stabilize, Place,
};
use super::checks::{
    check_bitwise_sign_extension, check_shift_sign_extension, check_tautology, comparison_cond,
};
use super::coercion::{coerce, truth_branch};
use super::context::{Binding, GenerationContext};
use super::{Code, Emit};
use crate::compiler::ir::ast::fold_binary;
use crate::compiler::ir::{
    ArithOp, ArrayElem, BinaryOp, CallSignature, Cond, Conversion, Dispatch, Expr, IncDecOp,
    Instruction, LabelId, LocalKind, LogicalType, StackType, UnaryOp, Width,
};
use crate::compiler::registry::ApiRegistry;
use crate::compiler::symbols::GlobalKind;
use crate::error::{Error, Result};

/// Generate code that pushes the value of `expr`
pub fn gen_expr(expr: &Expr, ctx: &mut GenerationContext<'_>) -> Result<(Code, LogicalType)> {
    match expr {
        Expr::Const { value, ty } => Ok((vec![gen_const(*value, *ty)?.into()], *ty)),
        Expr::Var(name) => {
            if let Binding::Constant { ty, value } = ctx.lookup(name)? {
                return Ok((vec![gen_const(value, ty)?.into()], ty));
            }
            load_place(expr, ctx)
        }
        Expr::ArrayRef { .. } | Expr::StructRef { .. } => load_place(expr, ctx),
        Expr::Binary { op, left, right } => gen_binary(*op, left, right, ctx),
        Expr::Unary { op, operand } => gen_unary(*op, operand, ctx),
        Expr::IncDec { op, target } => gen_inc_dec(*op, target, true, ctx),
        Expr::Call { name, args } => gen_call(name, args, ctx),
        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => gen_ternary(cond, then, otherwise, ctx),
        Expr::Cast { ty, expr } => gen_cast(*ty, expr, ctx),
        Expr::WideCompare { .. } => Err(Error::UnsupportedWideInteger(
            "64-bit comparison reached code generation; genuine i64 operations are not supported"
                .to_string(),
        )),
    }
}

/// Push a literal of the given type
pub fn gen_const(value: i64, ty: LogicalType) -> Result<Instruction> {
    match ty.stack_type() {
        StackType::Int => Ok(Instruction::IConst(value as i32)),
        StackType::Short => Ok(Instruction::SConst(value as i16)),
        StackType::Ref if value == 0 => Ok(Instruction::AConstNull),
        StackType::Ref => Err(Error::type_error(ty.to_string(), format!("constant {}", value))),
    }
}

/// Generate `expr` and convert it to `ty`
pub fn gen_coerced(expr: &Expr, ty: LogicalType, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    let (mut code, from) = gen_expr(expr, ctx)?;
    code.emit_all(coerce(from, ty)?);
    Ok(code)
}

fn load_place(expr: &Expr, ctx: &mut GenerationContext<'_>) -> Result<(Code, LogicalType)> {
    let place = resolve_place(expr, ctx)?;
    let ty = place.ty();
    if place.is_emulated() {
        let (mut code, place) = stabilize(place, ctx)?;
        code.extend(emit_load(&place, ctx)?);
        return Ok((code, ty));
    }
    Ok((emit_load(&place, ctx)?, ty))
}

// =============================================================================
// Static typing
// =============================================================================

/// Logical type of an expression without generating it
pub fn type_of(expr: &Expr, ctx: &GenerationContext<'_>) -> Result<LogicalType> {
    match expr {
        Expr::Const { ty, .. } | Expr::Cast { ty, .. } => Ok(*ty),
        Expr::Var(name) => Ok(match ctx.lookup(name)? {
            Binding::Constant { ty, .. } => ty,
            Binding::Local(loc) => loc.ty(),
            Binding::Global(global) => match &global.kind {
                GlobalKind::Scalar { ty, .. } | GlobalKind::Constant { ty, .. } => *ty,
                GlobalKind::Array { elem, .. } | GlobalKind::ConstArray { elem, .. } => {
                    elem.to_array().unwrap_or(LogicalType::Ref)
                }
                GlobalKind::StructArray { .. } | GlobalKind::ConstStructArray { .. } => {
                    LogicalType::Ref
                }
            },
        }),
        Expr::ArrayRef { array, .. } => match array.as_ref() {
            Expr::Var(_) => type_of(array, ctx)?
                .element_type()
                .ok_or_else(|| Error::type_error("array", format!("{:?}", array))),
            Expr::StructRef { base, field } => field_type(base, field, ctx),
            other => Err(Error::codegen(format!("unsupported array expression: {:?}", other))),
        },
        Expr::StructRef { base, field } => field_type(base, field, ctx),
        Expr::Binary { op, left, right } => {
            if op.is_comparison() || op.is_logical() {
                Ok(LogicalType::Short)
            } else {
                Ok(LogicalType::promote(type_of(left, ctx)?, type_of(right, ctx)?))
            }
        }
        Expr::Unary { op, operand } => match op {
            UnaryOp::LogicalNot => Ok(LogicalType::Short),
            UnaryOp::Neg | UnaryOp::BitNot => {
                Ok(LogicalType::promote(type_of(operand, ctx)?, LogicalType::Short))
            }
        },
        Expr::IncDec { target, .. } => type_of(target, ctx),
        Expr::Call { name, .. } => {
            if let Some(func) = ctx.symbols.function(name) {
                Ok(func.ret)
            } else if let Some(method) = ctx.registry.lookup_intrinsic(name) {
                Ok(method.signature()?.ret)
            } else {
                Err(Error::UndefinedFunction { name: name.clone() })
            }
        }
        Expr::Ternary {
            then, otherwise, ..
        } => {
            let (t, o) = (type_of(then, ctx)?, type_of(otherwise, ctx)?);
            Ok(if t.is_primitive() && o.is_primitive() {
                LogicalType::promote(t, o)
            } else {
                t
            })
        }
        Expr::WideCompare { .. } => Ok(LogicalType::Short),
    }
}

fn field_type(base: &Expr, field: &str, ctx: &GenerationContext<'_>) -> Result<LogicalType> {
    let name = match base {
        Expr::Var(name) => name,
        Expr::ArrayRef { array, .. } => match array.as_ref() {
            Expr::Var(name) => name,
            other => return Err(Error::codegen(format!("unsupported struct base: {:?}", other))),
        },
        other => return Err(Error::codegen(format!("unsupported struct base: {:?}", other))),
    };
    let unknown = || Error::UnknownField {
        base: name.clone(),
        field: field.to_string(),
    };
    match ctx.lookup(name)? {
        Binding::Global(global) => match &global.kind {
            GlobalKind::StructArray { fields, .. } => fields
                .iter()
                .find(|f| f.name == field)
                .map(|f| f.elem)
                .ok_or_else(unknown),
            GlobalKind::ConstStructArray { fields, .. } => fields
                .iter()
                .find(|f| f.name == field)
                .map(|f| f.elem)
                .ok_or_else(unknown),
            _ => Err(Error::type_error("struct", format!("'{}'", name))),
        },
        _ => Err(Error::type_error("struct", format!("'{}'", name))),
    }
}

// =============================================================================
// Binary operators
// =============================================================================

/// Instruction-level operator of an arithmetic or bitwise binary op
pub(super) fn arith_op(op: BinaryOp) -> Option<ArithOp> {
    Some(match op {
        BinaryOp::Add => ArithOp::Add,
        BinaryOp::Sub => ArithOp::Sub,
        BinaryOp::Mul => ArithOp::Mul,
        BinaryOp::Div => ArithOp::Div,
        BinaryOp::Rem => ArithOp::Rem,
        BinaryOp::BitAnd => ArithOp::And,
        BinaryOp::BitOr => ArithOp::Or,
        BinaryOp::BitXor => ArithOp::Xor,
        BinaryOp::Shl => ArithOp::Shl,
        BinaryOp::Shr => ArithOp::Shr,
        _ => return None,
    })
}

/// Exponent of a positive power of two above one
fn power_of_two(value: i64) -> Option<u32> {
    if value > 1 && (value as u64).is_power_of_two() {
        Some(value.trailing_zeros())
    } else {
        None
    }
}

fn gen_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &mut GenerationContext<'_>,
) -> Result<(Code, LogicalType)> {
    if let Some(cond) = comparison_cond(op) {
        let on_true = ctx.new_label();
        let branch = gen_compare_branch(cond, left, right, on_true, ctx)?;
        return Ok((materialize(branch, on_true, ctx), LogicalType::Short));
    }
    if op.is_logical() {
        return gen_logical(op, left, right, ctx);
    }
    let arith = arith_op(op).ok_or_else(|| Error::codegen(format!("unsupported operator {}", op.symbol())))?;

    let lt = type_of(left, ctx)?;
    let rt = type_of(right, ctx)?;
    if !lt.is_primitive() || !rt.is_primitive() {
        let bad = if lt.is_primitive() { rt } else { lt };
        return Err(Error::type_error("integer operand", bad.to_string()));
    }
    let ty = LogicalType::promote(lt, rt);

    if let (Some(l), Some(r)) = (left.fold_constant(), right.fold_constant()) {
        if let Some(value) = fold_binary(op, l, r, ty) {
            return Ok((vec![gen_const(value, ty)?.into()], ty));
        }
    }

    match op {
        BinaryOp::Shl | BinaryOp::Shr => check_shift_sign_extension(op, lt, ty, ctx),
        _ => check_bitwise_sign_extension(op, (left, lt), (right, rt), ty, ctx),
    }

    let width = Width::of(ty);
    if op == BinaryOp::Mul {
        let scaled = match (left.fold_constant(), right.fold_constant()) {
            (_, Some(r)) => power_of_two(r).map(|k| (left, k)),
            (Some(l), _) => power_of_two(l).map(|k| (right, k)),
            _ => None,
        };
        if let Some((value, k)) = scaled {
            let mut code = gen_coerced(value, ty, ctx)?;
            code.emit(Instruction::constant(width, k as i64));
            code.emit(Instruction::Arith(width, ArithOp::Shl));
            return Ok((code, ty));
        }
    }

    let mut code = gen_coerced(left, ty, ctx)?;
    code.extend(gen_coerced(right, ty, ctx)?);
    code.emit(Instruction::Arith(width, arith));
    Ok((code, ty))
}

/// `branch; sconst 0; goto end; on_true: sconst 1; end:`
pub fn materialize(branch: Code, on_true: LabelId, ctx: &mut GenerationContext<'_>) -> Code {
    let end = ctx.new_label();
    let mut code = branch;
    code.emit(Instruction::SConst(0));
    code.emit(Instruction::Goto(end));
    code.label(on_true);
    code.emit(Instruction::SConst(1));
    code.label(end);
    code
}

/// Code that jumps to `target` exactly when `left cond right` holds
pub fn gen_compare_branch(
    cond: Cond,
    left: &Expr,
    right: &Expr,
    target: LabelId,
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    check_tautology(cond, left, right, ctx)?;

    let lt = type_of(left, ctx)?;
    let rt = type_of(right, ctx)?;
    let lc = left.fold_constant();
    let rc = right.fold_constant();

    // One side is a constant: put the value first and the constant second
    let constant_side = match (lc, rc) {
        (_, Some(c)) if lc.is_none() => Some((left, lt, c, cond)),
        (Some(c), None) => Some((right, rt, c, cond.swap())),
        _ => None,
    };
    if let Some((value, value_ty, constant, cond)) = constant_side {
        let narrow = matches!(value_ty, LogicalType::Byte | LogicalType::Short);
        if constant == 0 && narrow {
            let (mut code, _) = gen_expr(value, ctx)?;
            code.emit(Instruction::If(cond, target));
            return Ok(code);
        }
        if constant == 0 && value_ty.stack_type() == StackType::Ref {
            let branch = match cond {
                Cond::Eq => Instruction::IfNull(target),
                Cond::Ne => Instruction::IfNonNull(target),
                _ => return Err(Error::type_error("integer operand", value_ty.to_string())),
            };
            let (mut code, _) = gen_expr(value, ctx)?;
            code.emit(branch);
            return Ok(code);
        }
        if narrow && LogicalType::Short.fits(constant) {
            let (mut code, _) = gen_expr(value, ctx)?;
            code.emit(Instruction::SConst(constant as i16));
            code.emit(Instruction::IfSCmp(cond, target));
            return Ok(code);
        }
    }

    match (lt.stack_type(), rt.stack_type()) {
        (StackType::Ref, StackType::Ref) => {
            if !matches!(cond, Cond::Eq | Cond::Ne) {
                return Err(Error::type_error("integer operand", lt.to_string()));
            }
            let (mut code, _) = gen_expr(left, ctx)?;
            code.extend(gen_expr(right, ctx)?.0);
            code.emit(Instruction::IfACmp(cond, target));
            Ok(code)
        }
        (StackType::Ref, _) | (_, StackType::Ref) => {
            Err(Error::type_error(lt.to_string(), rt.to_string()))
        }
        _ => {
            let ty = LogicalType::promote(lt, rt);
            let mut code = gen_coerced(left, ty, ctx)?;
            code.extend(gen_coerced(right, ty, ctx)?);
            if ty == LogicalType::Int {
                code.emit(Instruction::ICmp);
                code.emit(Instruction::If(cond, target));
            } else {
                code.emit(Instruction::IfSCmp(cond, target));
            }
            Ok(code)
        }
    }
}

/// Short-circuit `&&` / `||` producing 0 or 1
fn gen_logical(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &mut GenerationContext<'_>,
) -> Result<(Code, LogicalType)> {
    let is_and = op == BinaryOp::LogicalAnd;
    let short_circuit = ctx.new_label();
    let end = ctx.new_label();

    let (mut code, lt) = gen_expr(left, ctx)?;
    code.emit_all(truth_branch(lt, !is_and, short_circuit)?);

    let snapshot = ctx.array_ref_snapshot();
    let (right_code, rt) = gen_expr(right, ctx)?;
    ctx.restore_array_refs(snapshot);
    code.extend(right_code);
    code.emit_all(truth_branch(rt, !is_and, short_circuit)?);

    let (fallthrough, shortcut) = if is_and { (1, 0) } else { (0, 1) };
    code.emit(Instruction::SConst(fallthrough));
    code.emit(Instruction::Goto(end));
    code.label(short_circuit);
    code.emit(Instruction::SConst(shortcut));
    code.label(end);
    Ok((code, LogicalType::Short))
}

// =============================================================================
// Unary, cast, ternary
// =============================================================================

fn gen_unary(
    op: UnaryOp,
    operand: &Expr,
    ctx: &mut GenerationContext<'_>,
) -> Result<(Code, LogicalType)> {
    if op == UnaryOp::LogicalNot {
        let on_true = ctx.new_label();
        let end = ctx.new_label();
        let (mut code, ty) = gen_expr(operand, ctx)?;
        code.emit_all(truth_branch(ty, true, on_true)?);
        code.emit(Instruction::SConst(1));
        code.emit(Instruction::Goto(end));
        code.label(on_true);
        code.emit(Instruction::SConst(0));
        code.label(end);
        return Ok((code, LogicalType::Short));
    }

    let operand_ty = type_of(operand, ctx)?;
    if !operand_ty.is_primitive() {
        return Err(Error::type_error("integer operand", operand_ty.to_string()));
    }
    let ty = LogicalType::promote(operand_ty, LogicalType::Short);
    if let Some(v) = operand.fold_constant() {
        let value = match op {
            UnaryOp::Neg => -v,
            _ => !v,
        };
        return Ok((vec![gen_const(ty.wrap(value), ty)?.into()], ty));
    }

    let width = Width::of(ty);
    let mut code = gen_coerced(operand, ty, ctx)?;
    match op {
        UnaryOp::Neg => code.emit(Instruction::Neg(width)),
        _ => {
            code.emit(Instruction::constant(width, -1));
            code.emit(Instruction::Arith(width, ArithOp::Xor));
        }
    }
    Ok((code, ty))
}

fn gen_cast(
    ty: LogicalType,
    expr: &Expr,
    ctx: &mut GenerationContext<'_>,
) -> Result<(Code, LogicalType)> {
    if ty.is_primitive() {
        if let Some(v) = expr.fold_constant() {
            return Ok((vec![gen_const(ty.wrap(v), ty)?.into()], ty));
        }
    }
    Ok((gen_coerced(expr, ty, ctx)?, ty))
}

fn gen_ternary(
    cond: &Expr,
    then: &Expr,
    otherwise: &Expr,
    ctx: &mut GenerationContext<'_>,
) -> Result<(Code, LogicalType)> {
    let (t, o) = (type_of(then, ctx)?, type_of(otherwise, ctx)?);
    let ty = if t.is_primitive() && o.is_primitive() {
        LogicalType::promote(t, o)
    } else {
        t
    };
    let else_label = ctx.new_label();
    let end = ctx.new_label();

    let (mut code, cond_ty) = gen_expr(cond, ctx)?;
    code.emit_all(truth_branch(cond_ty, false, else_label)?);

    let snapshot = ctx.array_ref_snapshot();
    code.extend(gen_coerced(then, ty, ctx)?);
    ctx.restore_array_refs(snapshot.clone());
    code.emit(Instruction::Goto(end));

    code.label(else_label);
    code.extend(gen_coerced(otherwise, ty, ctx)?);
    ctx.restore_array_refs(snapshot);
    code.label(end);
    Ok((code, ty))
}

// =============================================================================
// Increment / decrement
// =============================================================================

/// `++`/`--` on any assignable target. With `want_value` false nothing is
/// left on the stack.
pub fn gen_inc_dec(
    op: IncDecOp,
    target: &Expr,
    want_value: bool,
    ctx: &mut GenerationContext<'_>,
) -> Result<(Code, LogicalType)> {
    if !matches!(
        target,
        Expr::Var(_) | Expr::ArrayRef { .. } | Expr::StructRef { .. }
    ) {
        return Err(Error::InvalidIncrementTarget(format!("{:?}", target)));
    }
    let place = resolve_place(target, ctx)?;
    place.check_writable()?;
    let ty = place.ty();
    if !ty.is_primitive() {
        return Err(Error::InvalidIncrementTarget(format!(
            "cannot increment a value of type {}",
            ty
        )));
    }
    let delta = op.delta();
    let pre = op.is_prefix();
    let mut code = Code::new();

    match &place {
        Place::Slot { slot, ty } if *ty == LogicalType::Byte => {
            code.emit(Instruction::Load(LocalKind::Short, *slot));
            if want_value && !pre {
                code.emit(Instruction::Dup);
            }
            code.emit(Instruction::SConst(delta));
            code.emit(Instruction::Arith(Width::Short, ArithOp::Add));
            code.emit(Instruction::Convert(Conversion::S2B));
            if want_value && pre {
                code.emit(Instruction::Dup);
            }
            code.emit(Instruction::Store(LocalKind::Short, *slot));
        }
        Place::Slot { slot, ty } => {
            let (kind, inc) = if *ty == LogicalType::Int {
                (LocalKind::Int, Instruction::IInc(*slot, delta))
            } else {
                (LocalKind::Short, Instruction::SInc(*slot, delta))
            };
            let load = Instruction::Load(kind, *slot);
            match (want_value, pre) {
                (false, _) => code.emit(inc),
                (true, true) => code.emit_all([inc, load]),
                (true, false) => code.emit_all([load, inc]),
            }
        }
        Place::Static { emulated: true, .. } => {
            let (prep, place) = stabilize(place.clone(), ctx)?;
            code.extend(prep);
            code.extend(emit_load(&place, ctx)?);
            if want_value && !pre {
                code.emit(Instruction::Dup2);
            }
            code.emit(Instruction::IConst(delta as i32));
            code.emit(Instruction::Arith(Width::Int, ArithOp::Add));
            if want_value && pre {
                code.emit(Instruction::Dup2);
            }
            code.extend(emit_split_store(&place, ctx)?);
        }
        _ => {
            let width = Width::of(ty);
            let dup_under = match width {
                Width::Short => Instruction::dup_short_under_pair(),
                Width::Int => Instruction::dup_int_under_pair(),
            };
            let elem = ArrayElem::of(ty);
            code.extend(emit_address(&place, 0, ctx)?);
            code.emit(Instruction::Dup2);
            code.emit(Instruction::ArrayLoad(elem));
            if want_value && !pre {
                code.emit(dup_under.clone());
            }
            code.emit(Instruction::constant(width, delta as i64));
            code.emit(Instruction::Arith(width, ArithOp::Add));
            if ty == LogicalType::Byte {
                code.emit(Instruction::Convert(Conversion::S2B));
            }
            if want_value && pre {
                code.emit(dup_under);
            }
            code.emit(Instruction::ArrayStore(elem));
        }
    }
    Ok((code, if want_value { ty } else { LogicalType::Void }))
}

// =============================================================================
// Calls
// =============================================================================

fn gen_call(
    name: &str,
    args: &[Expr],
    ctx: &mut GenerationContext<'_>,
) -> Result<(Code, LogicalType)> {
    let mut code = Code::new();
    let (symbols, registry) = (ctx.symbols, ctx.registry);

    if let Some(func) = symbols.function(name) {
        if args.len() != func.params.len() {
            return Err(Error::ArityMismatch {
                function: name.to_string(),
                expected: func.params.len(),
                got: args.len(),
            });
        }
        let params = func.param_types();
        for (arg, ty) in args.iter().zip(&params) {
            code.extend(gen_coerced(arg, *ty, ctx)?);
        }
        let descriptor = func.descriptor();
        let ret = func.ret;
        let cp = ctx.pool.user_method(name, &descriptor);
        code.emit(Instruction::Invoke {
            cp,
            signature: CallSignature::new_static(params, ret),
        });
        return Ok((code, ret));
    }

    if !ApiRegistry::is_intrinsic_name(name) {
        return Err(Error::UndefinedFunction {
            name: name.to_string(),
        });
    }
    let method = registry
        .lookup_intrinsic(name)
        .ok_or_else(|| Error::UndefinedFunction {
            name: name.to_string(),
        })?;
    let signature = method.signature()?;
    let receiver = usize::from(signature.dispatch != Dispatch::Static);
    let expected = signature.params.len() + receiver;
    if args.len() != expected {
        return Err(Error::ArityMismatch {
            function: name.to_string(),
            expected,
            got: args.len(),
        });
    }

    let (value_args, params) = if receiver == 1 {
        let (receiver_code, ty) = gen_expr(&args[0], ctx)?;
        if ty.stack_type() != StackType::Ref {
            return Err(Error::type_error("object reference", ty.to_string()));
        }
        code.extend(receiver_code);
        (&args[1..], &signature.params)
    } else {
        (args, &signature.params)
    };
    for (arg, ty) in value_args.iter().zip(params) {
        code.extend(gen_coerced(arg, *ty, ctx)?);
    }
    let ret = signature.ret;
    let cp = ctx.pool.api_method(method);
    code.emit(Instruction::Invoke { cp, signature });
    Ok((code, ret))
}
