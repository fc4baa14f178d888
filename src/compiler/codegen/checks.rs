//! Compile-time diagnostics on expressions
//!
//! Two families live here:
//!
//! - tautological comparisons, which are hard errors because the branch they
//!   guard is dead code the author almost certainly did not intend;
//! - sign-extension hazards, which are warnings that a narrow operand is
//!   widened with its sign bit before a bitwise or shift operation.

use super::context::{Binding, GenerationContext};
use crate::compiler::ir::{BinaryOp, Cond, Expr, LogicalType};
use crate::error::{Error, Result};

/// Comparison operator of a binary op
pub fn comparison_cond(op: BinaryOp) -> Option<Cond> {
    match op {
        BinaryOp::Eq => Some(Cond::Eq),
        BinaryOp::Ne => Some(Cond::Ne),
        BinaryOp::Lt => Some(Cond::Lt),
        BinaryOp::Le => Some(Cond::Le),
        BinaryOp::Gt => Some(Cond::Gt),
        BinaryOp::Ge => Some(Cond::Ge),
        _ => None,
    }
}

/// Narrow local variable type, used for range checks
fn narrow_local_type(expr: &Expr, ctx: &GenerationContext<'_>) -> Option<LogicalType> {
    let name = match expr {
        Expr::Var(name) => name,
        _ => return None,
    };
    match ctx.lookup(name).ok()? {
        Binding::Local(loc) => match loc.ty() {
            ty @ (LogicalType::Byte | LogicalType::Short) => Some(ty),
            _ => None,
        },
        _ => None,
    }
}

/// Reject comparisons whose outcome is fixed at compile time
pub fn check_tautology(
    cond: Cond,
    left: &Expr,
    right: &Expr,
    ctx: &GenerationContext<'_>,
) -> Result<()> {
    if let (Expr::Const { value: l, .. }, Expr::Const { value: r, .. }) = (left, right) {
        return Err(Error::TautologicalComparison(format!(
            "comparison {} {} {} is always {}",
            l,
            cond.symbol(),
            r,
            cond.holds(*l, *r)
        )));
    }

    let (constant, ty, cond) = match (left, right) {
        (var @ Expr::Var(_), Expr::Const { value, .. }) => match narrow_local_type(var, ctx) {
            Some(ty) => (*value, ty, cond),
            None => return Ok(()),
        },
        (Expr::Const { value, .. }, var @ Expr::Var(_)) => match narrow_local_type(var, ctx) {
            Some(ty) => (*value, ty, cond.swap()),
            None => return Ok(()),
        },
        _ => return Ok(()),
    };
    let (min, max) = match ty.range() {
        Some(range) => range,
        None => return Ok(()),
    };

    let out_of_range = constant < min || constant > max;
    match cond {
        Cond::Eq | Cond::Ne if out_of_range => {
            return Err(Error::TautologicalComparison(format!(
                "comparison of constant {} with '{}' is always {} (valid range: {} to {})",
                constant,
                ty,
                cond == Cond::Ne,
                min,
                max
            )));
        }
        _ => {}
    }

    let outcome = match cond {
        Cond::Lt if constant <= min => Some(false),
        Cond::Lt if constant > max => Some(true),
        Cond::Gt if constant >= max => Some(false),
        Cond::Gt if constant < min => Some(true),
        Cond::Le if constant < min => Some(false),
        Cond::Le if constant >= max => Some(true),
        Cond::Ge if constant > max => Some(false),
        Cond::Ge if constant <= min => Some(true),
        _ => None,
    };
    match outcome {
        Some(always) => Err(Error::TautologicalComparison(format!(
            "comparison of '{}' with constant {} is always {} (valid range: {} to {})",
            ty, constant, always, min, max
        ))),
        None => Ok(()),
    }
}

/// Warn when a bitwise operator widens a narrow operand with its sign
pub fn check_bitwise_sign_extension(
    op: BinaryOp,
    left: (&Expr, LogicalType),
    right: (&Expr, LogicalType),
    promoted: LogicalType,
    ctx: &mut GenerationContext<'_>,
) {
    if !matches!(op, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor) {
        return;
    }
    for ((_, ty), (other, _)) in [(left, right), (right, left)] {
        let constant = other.fold_constant();
        let message = match (ty, promoted) {
            (LogicalType::Byte, _) => match (op, constant) {
                (BinaryOp::BitAnd, Some(mask)) if (0..=0xFF).contains(&mask) => None,
                (BinaryOp::BitAnd, _) => {
                    Some("byte in bitwise '&' may sign-extend; consider (val & 0xFF)".to_string())
                }
                (_, Some(value)) if value <= 0x7F => None,
                _ => Some(format!(
                    "byte in bitwise '{}' may sign-extend; consider (val & 0xFF)",
                    op.symbol()
                )),
            },
            // A non-constant partner can carry any of the widened bits
            (LogicalType::Short, LogicalType::Int) => match (op, constant) {
                (BinaryOp::BitAnd, Some(mask)) if (0..=0xFFFF).contains(&mask) => None,
                (BinaryOp::BitAnd, _) => Some(
                    "short in bitwise '&' may sign-extend to int; consider (val & 0xFFFF)"
                        .to_string(),
                ),
                (_, Some(value)) if value <= 0x7FFF => None,
                _ => Some(format!(
                    "short in bitwise '{}' may sign-extend to int; consider (val & 0xFFFF)",
                    op.symbol()
                )),
            },
            _ => None,
        };
        if let Some(message) = message {
            ctx.warn_sign_extension(&message);
            return;
        }
    }
}

/// Warn when a right shift drags a narrow operand's sign bit in
pub fn check_shift_sign_extension(
    op: BinaryOp,
    value_ty: LogicalType,
    promoted: LogicalType,
    ctx: &mut GenerationContext<'_>,
) {
    if op != BinaryOp::Shr {
        return;
    }
    match (value_ty, promoted) {
        (LogicalType::Byte, _) => {
            ctx.warn_sign_extension("byte in right-shift may sign-extend; consider (val & 0xFF)")
        }
        (LogicalType::Short, LogicalType::Int) => ctx.warn_sign_extension(
            "short in right-shift may sign-extend to int; consider (val & 0xFFFF)",
        ),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_cond() {
        assert_eq!(comparison_cond(BinaryOp::Le), Some(Cond::Le));
        assert_eq!(comparison_cond(BinaryOp::Add), None);
        assert_eq!(comparison_cond(BinaryOp::LogicalAnd), None);
    }
}
