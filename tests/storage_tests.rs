//! Storage allocation properties
//!
//! Ranges inside one shared class never overlap, are handed out in
//! declaration order, and add up to the class size the allocator reports.

use jcvmc::compiler::ir::{
    FunctionDecl, GlobalDecl, LocalDecl, LocalStorage, ParamDecl, Stmt, StorageClass,
    TranslationUnit, TypeSpec,
};
use jcvmc::compiler::storage::allocate_storage;
use jcvmc::compiler::symbols::{GlobalKind, VarLocation};
use jcvmc::config::TargetConfig;
use jcvmc::{Error, ErrorClass};
use proptest::prelude::*;

const MEMORY: [StorageClass; 3] = [StorageClass::MemB, StorageClass::MemS, StorageClass::MemI];

fn type_spec(kind: u8) -> TypeSpec {
    match kind {
        0 => TypeSpec::Byte,
        1 => TypeSpec::Short,
        _ => TypeSpec::Int,
    }
}

fn unit_from(decls: &[(u8, i64, bool)]) -> TranslationUnit {
    let globals = decls
        .iter()
        .enumerate()
        .map(|(i, &(kind, size, is_array))| {
            let name = format!("g{}", i);
            if is_array {
                GlobalDecl::array(name, type_spec(kind), size)
            } else {
                GlobalDecl::scalar(name, type_spec(kind))
            }
        })
        .collect();
    TranslationUnit {
        globals,
        ..TranslationUnit::default()
    }
}

proptest! {
    #[test]
    fn allocations_never_overlap(
        decls in prop::collection::vec((0u8..3, 1i64..300, any::<bool>()), 1..24),
        native_int in any::<bool>(),
    ) {
        let config = TargetConfig { native_int, ..TargetConfig::default() };
        let symbols = allocate_storage(&unit_from(&decls), &config).unwrap();

        for class in MEMORY {
            let allocs = symbols.allocations_in(class);
            for (i, a) in allocs.iter().enumerate() {
                for b in &allocs[i + 1..] {
                    prop_assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
                }
            }
            let total: u32 = allocs.iter().map(|a| a.count as u32).sum();
            prop_assert_eq!(total, symbols.size(class));
        }
    }

    #[test]
    fn offsets_follow_declaration_order(
        decls in prop::collection::vec((0u8..3, 1i64..100, any::<bool>()), 1..16),
    ) {
        let symbols = allocate_storage(&unit_from(&decls), &TargetConfig::default()).unwrap();
        for class in MEMORY {
            let offsets: Vec<u16> = symbols
                .globals_in_order()
                .flat_map(|g| g.allocations())
                .filter(|a| a.class == class)
                .map(|a| a.offset)
                .collect();
            prop_assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

#[test]
fn emulated_int_takes_short_pairs() {
    let unit = unit_from(&[(2, 5, true), (2, 0, false)]);
    let symbols = allocate_storage(&unit, &TargetConfig::default()).unwrap();
    assert_eq!(symbols.size(StorageClass::MemS), 12);
    assert_eq!(symbols.size(StorageClass::MemI), 0);
    match &symbols.global("g1").unwrap().kind {
        GlobalKind::Scalar { alloc, emulated, .. } => {
            assert!(*emulated);
            assert_eq!((alloc.offset, alloc.count), (10, 2));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn semantic_errors_are_collected_together() {
    let unit = TranslationUnit {
        globals: vec![
            GlobalDecl::scalar("u", TypeSpec::Unsigned("unsigned short".into())),
            GlobalDecl::array("empty", TypeSpec::Short, 0),
            GlobalDecl::array("huge", TypeSpec::Byte, 40000),
            GlobalDecl::scalar("dup", TypeSpec::Short),
            GlobalDecl::scalar("dup", TypeSpec::Byte),
        ],
        ..TranslationUnit::default()
    };
    let err = allocate_storage(&unit, &TargetConfig::default()).unwrap_err();
    assert_eq!(err.classify(), ErrorClass::Batch);
    match err {
        Error::Semantic(diags) => assert_eq!(diags.len(), 4, "{}", diags),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn offloaded_locals_are_framed_per_function() {
    let mut f = FunctionDecl::new("f", TypeSpec::Void, vec![ParamDecl::new("p", TypeSpec::Int)]);
    f.body = vec![
        Stmt::decl(LocalDecl::new("a", TypeSpec::Byte).with_storage(LocalStorage::Offload)),
        Stmt::decl(LocalDecl::new("b", TypeSpec::Byte).with_storage(LocalStorage::Offload)),
    ];
    let mut g = FunctionDecl::new("g", TypeSpec::Void, vec![]);
    g.locals = vec![LocalDecl::new("c", TypeSpec::Byte).with_storage(LocalStorage::Offload)];
    let unit = TranslationUnit {
        functions: vec![f, g],
        ..TranslationUnit::default()
    };
    let symbols = allocate_storage(&unit, &TargetConfig::default()).unwrap();

    let f = &symbols.function("f").unwrap().frame;
    assert_eq!(f.param_slots, 2);
    assert_eq!(f.usage(StorageClass::StackB), 2);
    assert!(matches!(
        f.vars["b"],
        VarLocation::Offload { class: StorageClass::StackB, offset: 1, .. }
    ));
    // Frames are per function, so both start at offset 0
    let g = &symbols.function("g").unwrap().frame;
    assert!(matches!(g.vars["c"], VarLocation::Offload { offset: 0, .. }));
    assert_eq!(symbols.offload_peak(StorageClass::StackB), 2);
}
