//! Emulated 32-bit ints survive every store/load path unchanged
//!
//! On targets without native int arrays each int lives in two shorts (high
//! half first). Globals, array elements and offloaded locals all use the
//! split sequences, so each path gets a round trip.

mod common;

use common::{compile, Machine};
use jcvmc::compiler::ir::{
    ArrayElem, BinaryOp, Expr, FunctionDecl, GlobalDecl, IncDecOp, LocalDecl, LocalStorage,
    ParamDecl, Stmt, TranslationUnit, TypeSpec,
};
use jcvmc::compiler::{CompileResult, Instruction, Item};
use jcvmc::config::TargetConfig;
use proptest::prelude::*;

const EDGES: [i32; 8] = [i32::MIN, i32::MAX, -1, 0, 1, 0x7FFF, 0x8000, -0x8000];

fn unit() -> TranslationUnit {
    let int = || TypeSpec::Int;
    let set_g = FunctionDecl::new("set_g", TypeSpec::Void, vec![ParamDecl::new("v", int())])
        .with_body(vec![Stmt::assign(Expr::var("g"), Expr::var("v"))]);
    let get_g = FunctionDecl::new("get_g", int(), vec![]).with_body(vec![Stmt::ret(Some(Expr::var("g")))]);

    let set_arr = FunctionDecl::new(
        "set_arr",
        TypeSpec::Void,
        vec![ParamDecl::new("i", TypeSpec::Short), ParamDecl::new("v", int())],
    )
    .with_body(vec![Stmt::assign(
        Expr::index(Expr::var("arr"), Expr::var("i")),
        Expr::var("v"),
    )]);
    let get_arr = FunctionDecl::new("get_arr", int(), vec![ParamDecl::new("i", TypeSpec::Short)])
        .with_body(vec![Stmt::ret(Some(Expr::index(Expr::var("arr"), Expr::var("i"))))]);

    let mut through_offload =
        FunctionDecl::new("through_offload", int(), vec![ParamDecl::new("v", int())]);
    through_offload.locals = vec![LocalDecl::new("t", int()).with_storage(LocalStorage::Offload)];
    through_offload.body = vec![
        Stmt::assign(Expr::var("t"), Expr::var("v")),
        Stmt::ret(Some(Expr::var("t"))),
    ];

    let bump = FunctionDecl::new("bump", int(), vec![ParamDecl::new("i", TypeSpec::Short)]).with_body(vec![
        Stmt::compound(
            BinaryOp::Add,
            Expr::index(Expr::var("arr"), Expr::var("i")),
            Expr::int(0x10001),
        ),
        Stmt::ret(Some(Expr::inc_dec(
            IncDecOp::PostInc,
            Expr::index(Expr::var("arr"), Expr::var("i")),
        ))),
    ]);

    TranslationUnit {
        globals: vec![
            GlobalDecl::scalar("g", int()),
            GlobalDecl::array("arr", int(), 4),
        ],
        functions: vec![set_g, get_g, set_arr, get_arr, through_offload, bump],
        ..TranslationUnit::default()
    }
}

fn compiled() -> CompileResult {
    compile(&unit(), &TargetConfig::default())
}

fn check_global_round_trip(result: &CompileResult, v: i32) {
    let mut m = Machine::new(result);
    m.call("set_g", &[v]).unwrap();
    assert_eq!(m.global("g", 0), v as i64);
    let mem = m.array("MEM_S");
    assert_eq!(mem[0], (v >> 16) as i16 as i32, "high half first");
    assert_eq!(mem[1], v as i16 as i32);
    assert_eq!(m.call("get_g", &[]).unwrap(), Some(v));
}

#[test]
fn edge_values_round_trip() {
    let result = compiled();
    for v in EDGES {
        check_global_round_trip(&result, v);

        let mut m = Machine::new(&result);
        m.call("set_arr", &[3, v]).unwrap();
        assert_eq!(m.global("arr", 3), v as i64);
        assert_eq!(m.call("get_arr", &[3]).unwrap(), Some(v));
        assert_eq!(m.call("through_offload", &[v]).unwrap(), Some(v));
    }
}

#[test]
fn no_native_int_memory_access() {
    let result = compiled();
    for f in &result.functions {
        assert!(
            !f.code.iter().any(|i| matches!(
                i,
                Item::Instr(Instruction::ArrayLoad(ArrayElem::Int))
                    | Item::Instr(Instruction::ArrayStore(ArrayElem::Int))
            )),
            "{} uses int arrays",
            f.name
        );
    }
}

#[test]
fn offload_frame_is_released() {
    let result = compiled();
    let mut m = Machine::new(&result);
    m.call("through_offload", &[12345]).unwrap();
    // Every stack pointer static is back at zero after the call
    let sp_entries: Vec<u16> = result
        .constant_pool
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| e.value.starts_with("short "))
        .map(|(i, _)| i as u16)
        .collect();
    assert!(!sp_entries.is_empty());
    for idx in sp_entries {
        assert_eq!(m.statics[&idx], 0);
    }
}

#[test]
fn compound_and_post_increment_carry_across_halves() {
    let result = compiled();
    let mut m = Machine::new(&result);
    m.call("set_arr", &[1, 0xFFFF]).unwrap();
    // 0xFFFF + 0x10001 = 0x20000, returned before the increment
    assert_eq!(m.call("bump", &[1]).unwrap(), Some(0x20000));
    assert_eq!(m.global("arr", 1), 0x20001);
}

proptest! {
    #[test]
    fn any_value_round_trips(v in any::<i32>(), i in 0i32..4) {
        let result = compiled();
        check_global_round_trip(&result, v);

        let mut m = Machine::new(&result);
        m.call("set_arr", &[i, v]).unwrap();
        prop_assert_eq!(m.call("get_arr", &[i]).unwrap(), Some(v));
        prop_assert_eq!(m.call("through_offload", &[v]).unwrap(), Some(v));
    }
}
