//! Statement code generation

use super::access::{
    element_kind, emit_address, emit_assign, emit_load, emit_split_store, resolve_place,
    stabilize, Place,
};
use super::checks::{check_bitwise_sign_extension, check_shift_sign_extension};
use super::coercion::{coerce, truth_branch};
use super::context::GenerationContext;
use super::expr::{arith_op, gen_coerced, gen_expr, gen_inc_dec, type_of};
use super::{offload_epilogue, Code, Emit};
use crate::compiler::ir::{
    ArithOp, BinaryOp, Expr, Instruction, LabelId, LocalDecl, LocalKind, LocalStorage,
    LogicalType, ReturnKind, Stmt, StmtKind, SwitchCase, Width,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Generate one statement
pub fn gen_stmt(stmt: &Stmt, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    let scope = ctx.enter_statement(stmt);
    let result = gen_stmt_kind(stmt, ctx);
    ctx.leave_statement(scope);
    result
}

fn gen_stmt_kind(stmt: &Stmt, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    match &stmt.kind {
        StmtKind::Assign {
            op: None,
            target,
            value,
        } => gen_assign(target, value, ctx),
        StmtKind::Assign {
            op: Some(op),
            target,
            value,
        } => gen_compound(*op, target, value, ctx),
        StmtKind::If {
            cond,
            then,
            otherwise,
        } => gen_if(cond, then, otherwise.as_deref(), ctx),
        StmtKind::While { cond, body } => gen_while(cond, body, ctx),
        StmtKind::DoWhile { body, cond } => gen_do_while(body, cond, ctx),
        StmtKind::For {
            init,
            cond,
            next,
            body,
        } => gen_for(init.as_deref(), cond.as_ref(), next.as_deref(), body, ctx),
        StmtKind::Return(value) => gen_return(value.as_ref(), ctx),
        StmtKind::Break => Ok(vec![Instruction::Goto(ctx.break_target()?).into()]),
        StmtKind::Continue => Ok(vec![Instruction::Goto(ctx.continue_target()?).into()]),
        StmtKind::Switch { scrutinee, cases } => gen_switch(scrutinee, cases, ctx),
        StmtKind::Block(stmts) => gen_block(stmts, ctx),
        StmtKind::Expr(expr) => gen_expr_stmt(expr, ctx),
        StmtKind::Decl(decl) => gen_decl(decl, ctx),
        StmtKind::WideLet { name, .. } => Err(Error::UnsupportedWideInteger(format!(
            "64-bit temporary '{}' survived lowering; genuine i64 operations are not supported",
            name
        ))),
        StmtKind::Empty => Ok(Code::new()),
    }
}

fn gen_block(stmts: &[Stmt], ctx: &mut GenerationContext<'_>) -> Result<Code> {
    let mut code = Code::new();
    for stmt in stmts {
        code.extend(gen_stmt(stmt, ctx)?);
    }
    Ok(code)
}

fn gen_expr_stmt(expr: &Expr, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    if let Expr::IncDec { op, target } = expr {
        return Ok(gen_inc_dec(*op, target, false, ctx)?.0);
    }
    let (mut code, ty) = gen_expr(expr, ctx)?;
    match ty.slot_size() {
        0 => {}
        1 => code.emit(Instruction::Pop),
        _ => code.emit(Instruction::Pop2),
    }
    Ok(code)
}

fn gen_decl(decl: &LocalDecl, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    if decl.is_const || decl.storage == LocalStorage::Static {
        return Ok(Code::new());
    }
    match &decl.init {
        Some(init) => gen_assign(&Expr::var(decl.name.clone()), init, ctx),
        None => Ok(Code::new()),
    }
}

// =============================================================================
// Assignment
// =============================================================================

fn gen_assign(target: &Expr, value: &Expr, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    // `a[i] = a[i] op y` computes the address once
    if let Expr::Binary { op, left, right } = value {
        if left.as_ref() == target && !target.has_side_effects() && arith_op(*op).is_some() {
            let place = resolve_place(target, ctx)?;
            if place.is_addressable() {
                return gen_compound(*op, target, right, ctx);
            }
        }
    }
    let place = resolve_place(target, ctx)?;
    emit_assign(&place, value, ctx)
}

/// `target op= value`
fn gen_compound(
    op: BinaryOp,
    target: &Expr,
    value: &Expr,
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    let arith = arith_op(op).ok_or_else(|| {
        Error::codegen(format!("operator '{}' cannot be used in compound assignment", op.symbol()))
    })?;
    let place = resolve_place(target, ctx)?;
    place.check_writable()?;
    let target_ty = place.ty();
    let value_ty = type_of(value, ctx)?;
    if !target_ty.is_primitive() || !value_ty.is_primitive() {
        return Err(Error::type_error("integer operand", format!("{} {}= {}", target_ty, op.symbol(), value_ty)));
    }
    let ty = LogicalType::promote(target_ty, value_ty);
    match op {
        BinaryOp::Shl | BinaryOp::Shr => check_shift_sign_extension(op, target_ty, ty, ctx),
        _ => check_bitwise_sign_extension(op, (target, target_ty), (value, value_ty), ty, ctx),
    }
    let width = Width::of(ty);

    let mut code = Code::new();
    let operate = |code: &mut Code, ctx: &mut GenerationContext<'_>| -> Result<()> {
        code.emit_all(coerce(target_ty, ty)?);
        code.extend(gen_coerced(value, ty, ctx)?);
        code.emit(Instruction::Arith(width, arith));
        code.emit_all(coerce(ty, target_ty)?);
        Ok(())
    };

    match &place {
        Place::Slot { slot, ty: slot_ty } => {
            code.emit(Instruction::Load(LocalKind::of(*slot_ty), *slot));
            operate(&mut code, ctx)?;
            code.emit(Instruction::Store(LocalKind::of(*slot_ty), *slot));
        }
        Place::Static { emulated: true, .. } => {
            let (prep, place) = stabilize(place.clone(), ctx)?;
            code.extend(prep);
            code.extend(emit_load(&place, ctx)?);
            operate(&mut code, ctx)?;
            code.extend(emit_split_store(&place, ctx)?);
        }
        _ => {
            let elem = element_kind(&place);
            code.extend(emit_address(&place, 0, ctx)?);
            code.emit(Instruction::Dup2);
            code.emit(Instruction::ArrayLoad(elem));
            operate(&mut code, ctx)?;
            code.emit(Instruction::ArrayStore(elem));
        }
    }
    Ok(code)
}

// =============================================================================
// Control flow
// =============================================================================

/// Evaluate `cond` and jump to `target` when it is `when_true`
fn gen_condition(
    cond: &Expr,
    when_true: bool,
    target: LabelId,
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    let (mut code, ty) = gen_expr(cond, ctx)?;
    code.emit_all(truth_branch(ty, when_true, target)?);
    Ok(code)
}

fn is_always_true(cond: &Expr) -> bool {
    matches!(cond.fold_constant(), Some(v) if v != 0)
}

fn gen_if(
    cond: &Expr,
    then: &Stmt,
    otherwise: Option<&Stmt>,
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    let else_label = ctx.new_label();
    let mut code = gen_condition(cond, false, else_label, ctx)?;
    code.extend(gen_stmt(then, ctx)?);
    match otherwise {
        Some(otherwise) => {
            let end = ctx.new_label();
            if !then.always_exits() {
                code.emit(Instruction::Goto(end));
            }
            code.label(else_label);
            code.extend(gen_stmt(otherwise, ctx)?);
            code.label(end);
        }
        None => code.label(else_label),
    }
    Ok(code)
}

fn gen_loop_body(
    body: &Stmt,
    break_label: LabelId,
    continue_label: LabelId,
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    ctx.push_loop(break_label, continue_label);
    let body = gen_stmt(body, ctx);
    ctx.pop_loop();
    body
}

fn gen_while(cond: &Expr, body: &Stmt, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    let start = ctx.new_label();
    let end = ctx.new_label();
    let mut code = Code::new();
    code.label(start);
    if !is_always_true(cond) {
        code.extend(gen_condition(cond, false, end, ctx)?);
    }
    code.extend(gen_loop_body(body, end, start, ctx)?);
    code.emit(Instruction::Goto(start));
    code.label(end);
    Ok(code)
}

fn gen_do_while(body: &Stmt, cond: &Expr, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    let start = ctx.new_label();
    let cont = ctx.new_label();
    let end = ctx.new_label();
    let mut code = Code::new();
    code.label(start);
    code.extend(gen_loop_body(body, end, cont, ctx)?);
    code.label(cont);
    if is_always_true(cond) {
        code.emit(Instruction::Goto(start));
    } else {
        code.extend(gen_condition(cond, true, start, ctx)?);
    }
    code.label(end);
    Ok(code)
}

fn gen_for(
    init: Option<&Stmt>,
    cond: Option<&Expr>,
    next: Option<&Stmt>,
    body: &Stmt,
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    let start = ctx.new_label();
    let cont = ctx.new_label();
    let end = ctx.new_label();
    let mut code = Code::new();
    if let Some(init) = init {
        code.extend(gen_stmt(init, ctx)?);
    }
    code.label(start);
    if let Some(cond) = cond.filter(|c| !is_always_true(c)) {
        code.extend(gen_condition(cond, false, end, ctx)?);
    }
    code.extend(gen_loop_body(body, end, cont, ctx)?);
    code.label(cont);
    if let Some(next) = next {
        code.extend(gen_stmt(next, ctx)?);
    }
    code.emit(Instruction::Goto(start));
    code.label(end);
    Ok(code)
}

fn gen_return(value: Option<&Expr>, ctx: &mut GenerationContext<'_>) -> Result<Code> {
    let ret = ctx.function.ret;
    let mut code = match (value, ret) {
        (Some(_), LogicalType::Void) => {
            return Err(Error::codegen(format!(
                "return with a value in void function '{}'",
                ctx.function.name
            )))
        }
        (None, LogicalType::Void) => Code::new(),
        (None, _) => {
            return Err(Error::codegen(format!(
                "return without a value in function '{}' returning {}",
                ctx.function.name, ret
            )))
        }
        (Some(value), ret) => gen_coerced(value, ret, ctx)?,
    };
    code.extend(offload_epilogue(ctx));
    code.emit(Instruction::Return(ReturnKind::of(ret)));
    Ok(code)
}

// =============================================================================
// Switch
// =============================================================================

fn gen_switch(
    scrutinee: &Expr,
    cases: &[SwitchCase],
    ctx: &mut GenerationContext<'_>,
) -> Result<Code> {
    let (mut code, ty) = gen_expr(scrutinee, ctx)?;
    if !ty.is_primitive() {
        return Err(Error::type_error("integer switch value", ty.to_string()));
    }
    let ty = LogicalType::promote(ty, LogicalType::Short);
    let width = Width::of(ty);
    let (min, max) = ty.range().unwrap_or((i32::MIN as i64, i32::MAX as i64));

    if cases.is_empty() {
        code.emit(match width {
            Width::Short => Instruction::Pop,
            Width::Int => Instruction::Pop2,
        });
        return Ok(code);
    }

    let end = ctx.new_label();
    let mut default = None;
    let mut table: BTreeMap<i64, LabelId> = BTreeMap::new();
    let mut labels = Vec::with_capacity(cases.len());
    for case in cases {
        let label = ctx.new_label();
        labels.push(label);
        match case.value {
            None if default.is_some() => {
                return Err(Error::codegen("multiple default labels in one switch"))
            }
            None => default = Some(label),
            Some(v) if v < min || v > max => {
                return Err(Error::codegen(format!(
                    "switch case value {} is out of range for {} (valid range: {} to {})",
                    v, ty, min, max
                )))
            }
            Some(v) => {
                if table.insert(v, label).is_some() {
                    return Err(Error::codegen(format!("duplicate case value {}", v)));
                }
            }
        }
    }

    let default_target = default.unwrap_or(end);
    match (table.keys().next(), table.keys().next_back()) {
        (Some(&low), Some(&high)) => {
            let count = table.len() as i64;
            if high - low + 1 < 3 * count {
                let targets = (low..=high)
                    .map(|v| table.get(&v).copied().unwrap_or(default_target))
                    .collect();
                code.emit(Instruction::TableSwitch {
                    width,
                    default: default_target,
                    low: low as i32,
                    high: high as i32,
                    targets,
                });
            } else {
                code.emit(Instruction::LookupSwitch {
                    width,
                    default: default_target,
                    pairs: table.iter().map(|(v, l)| (*v as i32, *l)).collect(),
                });
            }
        }
        _ => {
            // Only a default arm
            code.emit(match width {
                Width::Short => Instruction::Pop,
                Width::Int => Instruction::Pop2,
            });
        }
    }

    ctx.push_switch(end);
    let bodies = cases
        .iter()
        .zip(&labels)
        .try_fold(Code::new(), |mut acc, (case, label)| {
            acc.label(*label);
            acc.extend(gen_block(&case.body, ctx)?);
            Ok::<_, Error>(acc)
        });
    let broke = ctx.pop_switch();
    code.extend(bodies?);
    if broke || default.is_none() {
        code.label(end);
    }
    Ok(code)
}
