//! Wide bitmask tests lowered back to table loads behave like the original
//!
//! Each case builds `f(i) = ((1 << zext(i)) & MASK) OP 0 ? 1 : 0` over a
//! constant table, compiles it and runs every valid index through the
//! simulator against the 64-bit reference.

mod common;

use common::{compile, Machine};
use jcvmc::compiler::ir::{
    Expr, FunctionDecl, GlobalDecl, ParamDecl, Stmt, StmtKind, TranslationUnit, TypeSpec, WideCmp,
    WideExpr,
};
use jcvmc::config::TargetConfig;
use proptest::prelude::*;

fn zext_i() -> Box<WideExpr> {
    Box::new(WideExpr::ZeroExtend(Box::new(Expr::var("i"))))
}

fn shl_test(mask: u64, op: WideCmp) -> Expr {
    Expr::WideCompare {
        op,
        lhs: WideExpr::And(
            Box::new(WideExpr::Shl(Box::new(WideExpr::Const(1)), zext_i())),
            Box::new(WideExpr::Const(mask)),
        ),
        rhs: WideExpr::Const(0),
    }
}

fn unit_with(values: Vec<i64>, body: Vec<Stmt>) -> TranslationUnit {
    let mut body = body;
    body.push(Stmt::ret(Some(Expr::short(0))));
    TranslationUnit {
        globals: vec![GlobalDecl::const_array("kinds", TypeSpec::Byte, values)],
        functions: vec![
            FunctionDecl::new("f", TypeSpec::Short, vec![ParamDecl::new("i", TypeSpec::Short)])
                .with_body(body),
        ],
        ..TranslationUnit::default()
    }
}

fn predicate_unit(values: Vec<i64>, cond: Expr) -> TranslationUnit {
    unit_with(
        values,
        vec![Stmt::if_else(cond, Stmt::ret(Some(Expr::short(1))), None)],
    )
}

/// Run `f` for every index and compare with the 64-bit reading of `mask`
fn assert_matches_reference(unit: &TranslationUnit, len: usize, mask: u64, op: WideCmp) {
    let result = compile(unit, &TargetConfig::default());
    let mut machine = Machine::new(&result);
    for i in 0..len {
        let bit_clear = (1u64 << i) & mask == 0;
        let expected = match op {
            WideCmp::Eq => bit_clear,
            WideCmp::Ne => !bit_clear,
        };
        let got = machine.call("f", &[i as i32]).unwrap();
        assert_eq!(got, Some(expected as i32), "index {} mask {:#b}", i, mask);
    }
}

fn bit_mask(values: &[i64], bit: u32) -> u64 {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| (**v >> bit) & 1 == 1)
        .fold(0, |acc, (i, _)| acc | (1u64 << i))
}

#[test]
fn inverted_equality_mask() {
    // 7 sits at indices 1 and 3, so 0b0101 is its complement
    let values = vec![8, 7, 16, 7];
    for op in [WideCmp::Eq, WideCmp::Ne] {
        let unit = predicate_unit(values.clone(), shl_test(0b0101, op));
        assert_matches_reference(&unit, values.len(), 0b0101, op);
    }
}

#[test]
fn logical_shift_form_through_temporary() {
    let values = vec![1, 0, 1, 0, 0, 1];
    let mask = 0b100101;
    let body = vec![
        Stmt::new(StmtKind::WideLet {
            name: "t".into(),
            value: WideExpr::LShr(Box::new(WideExpr::Const(mask)), zext_i()),
        }),
        Stmt::if_else(
            Expr::WideCompare {
                op: WideCmp::Ne,
                lhs: WideExpr::And(
                    Box::new(WideExpr::Temp("t".into())),
                    Box::new(WideExpr::Const(1)),
                ),
                rhs: WideExpr::Const(0),
            },
            Stmt::ret(Some(Expr::short(1))),
            None,
        ),
    ];
    let unit = unit_with(values.clone(), body);
    assert_matches_reference(&unit, values.len(), mask, WideCmp::Ne);
}

#[test]
fn untraceable_mask_is_rejected() {
    let unit = predicate_unit(vec![1, 2, 3, 4], shl_test(0xDEAD_BEEF, WideCmp::Eq));
    let err = jcvmc::Compiler::new(Default::default(), TargetConfig::default())
        .compile(&unit)
        .unwrap_err();
    assert!(err.to_string().contains("Genuine i64 operations are not supported"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bit_position_masks_match_reference(
        values in prop::collection::vec(-128i64..128, 2..20),
        bit in 0u32..7,
        ne in any::<bool>(),
    ) {
        let mask = bit_mask(&values, bit);
        let full = (1u64 << values.len()) - 1;
        prop_assume!(mask != 0 && mask != full);

        let op = if ne { WideCmp::Ne } else { WideCmp::Eq };
        let unit = predicate_unit(values.clone(), shl_test(mask, op));
        assert_matches_reference(&unit, values.len(), mask, op);
    }

    #[test]
    fn equality_masks_match_reference(
        values in prop::collection::vec(0i64..4, 2..20),
        pick in any::<prop::sample::Index>(),
    ) {
        let wanted = values[pick.index(values.len())];
        let mask = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == wanted)
            .fold(0u64, |acc, (i, _)| acc | (1u64 << i));
        let full = (1u64 << values.len()) - 1;
        prop_assume!(mask != full);

        let unit = predicate_unit(values.clone(), shl_test(mask, WideCmp::Eq));
        assert_matches_reference(&unit, values.len(), mask, WideCmp::Eq);
    }
}
