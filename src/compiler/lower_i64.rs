//! Wide-integer bitmask lowering
//!
//! Upstream optimizers like to fold "look up a small constant table and
//! compare" into a 64-bit bitmask test:
//!
//! ```text
//! t = (1 << zext(i)) & 0x00A5      // or (0x00A5 >> zext(i)) & 1
//! t == 0
//! ```
//!
//! The JCVM has no 64-bit type, so the mask is traced back to the constant
//! table it was built from and the original narrow load and compare is
//! restored. A mask can encode either one bit position of every element or
//! equality of every element with one value, possibly complemented.

use super::ir::{
    BinaryOp, Expr, FunctionDecl, LogicalType, Stmt, StmtKind, SwitchCase, TranslationUnit,
    WideCmp, WideExpr,
};
use super::symbols::{GlobalKind, SymbolTable};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Largest table a 64-bit mask can describe
const MAX_TABLE_LEN: usize = 64;

/// Depth limit when chasing wide temporaries
const MAX_TEMP_CHAIN: usize = 32;

/// A constant table the lowering may load from
#[derive(Debug, Clone)]
struct ConstTable {
    /// Flat array name, or the struct array name for fields
    array: String,
    /// Field name for struct array fields
    field: Option<String>,
    elem: LogicalType,
    values: Vec<i64>,
}

impl ConstTable {
    fn load(&self, index: Expr) -> Expr {
        let element = Expr::index(Expr::var(&self.array), index);
        match &self.field {
            Some(field) => Expr::field(element, field),
            None => element,
        }
    }
}

/// How a mask maps back onto a table
#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchKind {
    /// `table[i] & mask != 0` selects the set bits
    BitTest(i64),
    /// `table[i] == value` selects the set bits
    Equals(i64),
}

#[derive(Debug, Clone)]
struct Resolution {
    table: usize,
    kind: MatchKind,
    inverted: bool,
}

/// Constant tables in declaration order, struct fields exposed individually
fn collect_tables(symbols: &SymbolTable) -> Vec<ConstTable> {
    let mut tables = Vec::new();
    for global in symbols.globals_in_order() {
        match &global.kind {
            GlobalKind::ConstArray { elem, values, .. } => tables.push(ConstTable {
                array: global.name.clone(),
                field: None,
                elem: *elem,
                values: values.clone(),
            }),
            GlobalKind::ConstStructArray { fields, .. } => {
                for field in fields.iter().filter(|f| !f.is_array) {
                    tables.push(ConstTable {
                        array: global.name.clone(),
                        field: Some(field.name.clone()),
                        elem: field.elem,
                        values: field.values.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    tables
}

fn full_mask(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

fn membership(values: &[i64], pred: impl Fn(i64) -> bool) -> u64 {
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| pred(v))
        .fold(0u64, |acc, (i, _)| acc | (1u64 << i))
}

/// Find the first table (and encoding) that reproduces `mask`
fn resolve_mask(mask: u64, tables: &[ConstTable]) -> Option<Resolution> {
    for (ti, table) in tables.iter().enumerate() {
        let n = table.values.len();
        if n == 0 || n > MAX_TABLE_LEN {
            continue;
        }
        let all = full_mask(n);

        let bits = table.elem.bits().unwrap_or(16);
        for bit in 0..bits {
            let bit_mask = 1i64 << bit;
            let normal = membership(&table.values, |v| v & bit_mask != 0);
            if normal == mask {
                return Some(Resolution {
                    table: ti,
                    kind: MatchKind::BitTest(bit_mask),
                    inverted: false,
                });
            }
            if all ^ normal == mask {
                return Some(Resolution {
                    table: ti,
                    kind: MatchKind::BitTest(bit_mask),
                    inverted: true,
                });
            }
        }

        let mut unique: Vec<i64> = table.values.clone();
        unique.sort_unstable();
        unique.dedup();
        for value in unique {
            let normal = membership(&table.values, |v| v == value);
            if normal == mask {
                return Some(Resolution {
                    table: ti,
                    kind: MatchKind::Equals(value),
                    inverted: false,
                });
            }
            if all ^ normal == mask {
                return Some(Resolution {
                    table: ti,
                    kind: MatchKind::Equals(value),
                    inverted: true,
                });
            }
        }
    }
    None
}

/// Per-function lowering state
struct Lowering<'a> {
    function: &'a str,
    tables: &'a [ConstTable],
    temps: BTreeMap<String, WideExpr>,
    cache: BTreeMap<u64, Option<Resolution>>,
    lowered: usize,
}

impl<'a> Lowering<'a> {
    fn unsupported(&self) -> Error {
        Error::UnsupportedWideInteger(format!(
            "unsupported 64-bit integer expression in function '{}'. \
             Genuine i64 operations are not supported",
            self.function
        ))
    }

    /// Follow temporaries to the defining expression
    fn resolve<'e>(&'e self, expr: &'e WideExpr) -> Result<&'e WideExpr> {
        let mut current = expr;
        for _ in 0..MAX_TEMP_CHAIN {
            match current {
                WideExpr::Temp(name) => {
                    current = self.temps.get(name).ok_or_else(|| {
                        Error::UnsupportedWideInteger(format!(
                            "wide temporary '{}' used before definition in '{}'",
                            name, self.function
                        ))
                    })?;
                }
                other => return Ok(other),
            }
        }
        Err(self.unsupported())
    }

    fn constant(&self, expr: &WideExpr) -> Result<Option<u64>> {
        Ok(match self.resolve(expr)? {
            WideExpr::Const(c) => Some(*c),
            _ => None,
        })
    }

    fn zext_operand(&self, expr: &WideExpr) -> Result<Option<Expr>> {
        Ok(match self.resolve(expr)? {
            WideExpr::ZeroExtend(inner) => Some((**inner).clone()),
            _ => None,
        })
    }

    /// Match `and(shift, C)` and return the table mask and the index
    fn match_chain(&self, value: &WideExpr) -> Result<Option<(u64, Expr)>> {
        let WideExpr::And(a, b) = self.resolve(value)? else {
            return Ok(None);
        };
        let (and_const, shift) = match (self.constant(a)?, self.constant(b)?) {
            (_, Some(c)) => (c, a.as_ref()),
            (Some(c), None) => (c, b.as_ref()),
            (None, None) => return Ok(None),
        };
        match self.resolve(shift)? {
            // (1 << zext(i)) & MASK
            WideExpr::Shl(base, amount) if self.constant(base)? == Some(1) => {
                Ok(self.zext_operand(amount)?.map(|idx| (and_const, idx)))
            }
            // (MASK >> zext(i)) & 1
            WideExpr::LShr(base, amount) if and_const == 1 => match self.constant(base)? {
                Some(mask) => Ok(self.zext_operand(amount)?.map(|idx| (mask, idx))),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn lower_compare(&mut self, op: WideCmp, lhs: &WideExpr, rhs: &WideExpr) -> Result<Expr> {
        let value = match (self.constant(lhs)?, self.constant(rhs)?) {
            (_, Some(0)) => lhs,
            (Some(0), _) => rhs,
            _ => return Err(self.unsupported()),
        };
        let Some((mask, index)) = self.match_chain(value)? else {
            return Err(self.unsupported());
        };

        if !self.cache.contains_key(&mask) {
            let resolution = resolve_mask(mask, self.tables);
            self.cache.insert(mask, resolution);
        }
        let Some(res) = self.cache.get(&mask).cloned().flatten() else {
            return Err(Error::UnsupportedWideInteger(format!(
                "i64 constant {} could not be traced to any constant array. \
                 Genuine i64 operations are not supported",
                mask as i64
            )));
        };

        let table = &self.tables[res.table];
        let flipped = res.inverted ^ (op == WideCmp::Ne);
        let load = table.load(index);
        self.lowered += 1;
        Ok(match res.kind {
            MatchKind::BitTest(bit) => {
                let pred = if flipped { BinaryOp::Ne } else { BinaryOp::Eq };
                let masked = Expr::binary(
                    BinaryOp::BitAnd,
                    load,
                    Expr::constant(table.elem.wrap(bit), table.elem),
                );
                Expr::binary(pred, masked, Expr::constant(0, table.elem))
            }
            MatchKind::Equals(v) => {
                let pred = if flipped { BinaryOp::Eq } else { BinaryOp::Ne };
                Expr::binary(pred, load, Expr::constant(v, table.elem))
            }
        })
    }

    fn expr(&mut self, expr: &Expr) -> Result<Expr> {
        Ok(match expr {
            Expr::Const { .. } | Expr::Var(_) => expr.clone(),
            Expr::Binary { op, left, right } => Expr::binary(*op, self.expr(left)?, self.expr(right)?),
            Expr::Unary { op, operand } => Expr::unary(*op, self.expr(operand)?),
            Expr::IncDec { op, target } => Expr::inc_dec(*op, self.expr(target)?),
            Expr::Call { name, args } => Expr::call(
                name.clone(),
                args.iter().map(|a| self.expr(a)).collect::<Result<Vec<_>>>()?,
            ),
            Expr::ArrayRef { array, index } => Expr::index(self.expr(array)?, self.expr(index)?),
            Expr::StructRef { base, field } => Expr::field(self.expr(base)?, field.clone()),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => Expr::ternary(self.expr(cond)?, self.expr(then)?, self.expr(otherwise)?),
            Expr::Cast { ty, expr } => Expr::cast(*ty, self.expr(expr)?),
            Expr::WideCompare { op, lhs, rhs } => self.lower_compare(*op, lhs, rhs)?,
        })
    }

    fn opt_expr(&mut self, expr: &Option<Expr>) -> Result<Option<Expr>> {
        expr.as_ref().map(|e| self.expr(e)).transpose()
    }

    fn boxed(&mut self, stmt: &Stmt) -> Result<Box<Stmt>> {
        Ok(Box::new(self.stmt(stmt)?.unwrap_or_else(|| empty_like(stmt))))
    }

    /// Lower one statement; wide temporaries disappear (`None`)
    fn stmt(&mut self, stmt: &Stmt) -> Result<Option<Stmt>> {
        let kind = match &stmt.kind {
            StmtKind::WideLet { name, value } => {
                self.temps.insert(name.clone(), value.clone());
                return Ok(None);
            }
            StmtKind::Assign { op, target, value } => StmtKind::Assign {
                op: *op,
                target: self.expr(target)?,
                value: self.expr(value)?,
            },
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => StmtKind::If {
                cond: self.expr(cond)?,
                then: self.boxed(then)?,
                otherwise: match otherwise {
                    Some(o) => Some(self.boxed(o)?),
                    None => None,
                },
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: self.expr(cond)?,
                body: self.boxed(body)?,
            },
            StmtKind::DoWhile { body, cond } => StmtKind::DoWhile {
                body: self.boxed(body)?,
                cond: self.expr(cond)?,
            },
            StmtKind::For {
                init,
                cond,
                next,
                body,
            } => StmtKind::For {
                init: match init {
                    Some(i) => Some(self.boxed(i)?),
                    None => None,
                },
                cond: self.opt_expr(cond)?,
                next: match next {
                    Some(n) => Some(self.boxed(n)?),
                    None => None,
                },
                body: self.boxed(body)?,
            },
            StmtKind::Return(value) => StmtKind::Return(self.opt_expr(value)?),
            StmtKind::Switch { scrutinee, cases } => StmtKind::Switch {
                scrutinee: self.expr(scrutinee)?,
                cases: cases
                    .iter()
                    .map(|c| {
                        Ok(SwitchCase {
                            value: c.value,
                            body: self.block(&c.body)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            },
            StmtKind::Block(stmts) => StmtKind::Block(self.block(stmts)?),
            StmtKind::Expr(e) => StmtKind::Expr(self.expr(e)?),
            StmtKind::Decl(decl) => {
                let mut decl = decl.clone();
                decl.init = self.opt_expr(&decl.init)?;
                StmtKind::Decl(decl)
            }
            StmtKind::Break => StmtKind::Break,
            StmtKind::Continue => StmtKind::Continue,
            StmtKind::Empty => StmtKind::Empty,
        };
        Ok(Some(Stmt {
            kind,
            loc: stmt.loc.clone(),
            pragmas: stmt.pragmas.clone(),
        }))
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<Vec<Stmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some(s) = self.stmt(stmt)? {
                out.push(s);
            }
        }
        Ok(out)
    }
}

fn empty_like(stmt: &Stmt) -> Stmt {
    Stmt {
        kind: StmtKind::Empty,
        loc: stmt.loc.clone(),
        pragmas: Vec::new(),
    }
}

/// Lower every wide comparison in one function
pub fn lower_function(func: &FunctionDecl, symbols: &SymbolTable) -> Result<FunctionDecl> {
    let tables = collect_tables(symbols);
    lower_with_tables(func, &tables)
}

fn lower_with_tables(func: &FunctionDecl, tables: &[ConstTable]) -> Result<FunctionDecl> {
    let mut pass = Lowering {
        function: &func.name,
        tables,
        temps: BTreeMap::new(),
        cache: BTreeMap::new(),
        lowered: 0,
    };
    let body = pass.block(&func.body)?;
    if pass.lowered > 0 {
        debug!(function = %func.name, count = pass.lowered, "lowered wide bitmask comparisons");
    }
    let mut locals = func.locals.clone();
    for local in &mut locals {
        local.init = pass.opt_expr(&local.init)?;
    }
    Ok(FunctionDecl {
        body,
        locals,
        ..func.clone()
    })
}

/// Lower every function of a unit
pub fn lower_unit(unit: &TranslationUnit, symbols: &SymbolTable) -> Result<TranslationUnit> {
    let tables = collect_tables(symbols);
    let functions = unit
        .functions
        .iter()
        .map(|f| lower_with_tables(f, &tables))
        .collect::<Result<Vec<_>>>()?;
    Ok(TranslationUnit {
        functions,
        ..unit.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{GlobalDecl, TypeSpec};
    use crate::compiler::storage::allocate_storage;
    use crate::config::TargetConfig;

    fn symbols_with(values: Vec<i64>) -> SymbolTable {
        let unit = TranslationUnit {
            globals: vec![GlobalDecl::const_array("kinds", TypeSpec::Byte, values)],
            ..TranslationUnit::default()
        };
        allocate_storage(&unit, &TargetConfig::default()).unwrap()
    }

    fn bit_test(mask: u64, op: WideCmp) -> Expr {
        Expr::WideCompare {
            op,
            lhs: WideExpr::And(
                Box::new(WideExpr::Shl(
                    Box::new(WideExpr::Const(1)),
                    Box::new(WideExpr::ZeroExtend(Box::new(Expr::var("i")))),
                )),
                Box::new(WideExpr::Const(mask)),
            ),
            rhs: WideExpr::Const(0),
        }
    }

    fn lower_expr(expr: Expr, symbols: &SymbolTable) -> Result<Expr> {
        let func = FunctionDecl::new("f", TypeSpec::Void, vec![]).with_body(vec![Stmt::expr(expr)]);
        let lowered = lower_function(&func, symbols)?;
        match &lowered.body[0].kind {
            StmtKind::Expr(e) => Ok(e.clone()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bit_position_mask() {
        // bit 0 set at indices 0 and 2
        let symbols = symbols_with(vec![1, 2, 3, 4]);
        let e = lower_expr(bit_test(0b0101, WideCmp::Eq), &symbols).unwrap();
        let expected = Expr::binary(
            BinaryOp::Eq,
            Expr::binary(
                BinaryOp::BitAnd,
                Expr::index(Expr::var("kinds"), Expr::var("i")),
                Expr::constant(1, LogicalType::Byte),
            ),
            Expr::constant(0, LogicalType::Byte),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_equality_mask_inverted() {
        // 0b10101 is every index not holding 5; no bit position of the
        // entries (or its complement) yields that set
        let symbols = symbols_with(vec![3, 5, 6, 5, 0]);
        let e = lower_expr(bit_test(0b10101, WideCmp::Eq), &symbols).unwrap();
        let expected = Expr::binary(
            BinaryOp::Eq,
            Expr::index(Expr::var("kinds"), Expr::var("i")),
            Expr::constant(5, LogicalType::Byte),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_temporaries_are_followed_and_removed() {
        let symbols = symbols_with(vec![1, 0, 1, 0]);
        let func = FunctionDecl::new("f", TypeSpec::Void, vec![]).with_body(vec![
            Stmt::new(StmtKind::WideLet {
                name: "t".into(),
                value: WideExpr::LShr(
                    Box::new(WideExpr::Const(0b0101)),
                    Box::new(WideExpr::ZeroExtend(Box::new(Expr::var("i")))),
                ),
            }),
            Stmt::expr(Expr::WideCompare {
                op: WideCmp::Ne,
                lhs: WideExpr::And(Box::new(WideExpr::Temp("t".into())), Box::new(WideExpr::Const(1))),
                rhs: WideExpr::Const(0),
            }),
        ]);
        let lowered = lower_function(&func, &symbols).unwrap();
        assert_eq!(lowered.body.len(), 1);
    }

    #[test]
    fn test_untraceable_constant_is_an_error() {
        let symbols = symbols_with(vec![1, 2, 3, 4]);
        let err = lower_expr(bit_test(0xDEAD_BEEF, WideCmp::Eq), &symbols).unwrap_err();
        assert!(err.to_string().contains("could not be traced to any constant array"));
    }

    #[test]
    fn test_full_width_mask() {
        assert_eq!(full_mask(64), u64::MAX);
        assert_eq!(full_mask(3), 0b111);
    }
}
