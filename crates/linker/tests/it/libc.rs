use wasmlink::libc::{LibcBindings, ALLOC_STEP, NATIVES};
use wasmlink_core::symbol::well_known;
use wasmlink_core::{table_space, FuncType, SymbolTable};

#[test]
fn natives_follow_well_known_order() {
    assert_eq!(NATIVES.len(), well_known::LIBC_NAMES.len());
    for (native, name) in NATIVES.iter().zip(well_known::LIBC_NAMES) {
        assert_eq!(native.name, *name);
        assert!(
            FuncType::from_signature(native.signature).is_some(),
            "bad signature for {name}"
        );
    }
}

#[test]
fn bindings_are_created_once() {
    let mut symbols = SymbolTable::new();
    let mut libc = LibcBindings::default();
    assert!(libc.is_empty());

    let strlen = symbols.get("strlen").unwrap();
    assert_eq!(libc.bind(&symbols, strlen), Some(0));
    assert_eq!(libc.bind(&symbols, well_known::MALLOC), Some(1));
    assert_eq!(libc.bind(&symbols, strlen), Some(0));
    assert_eq!(libc.len(), 2);

    let binding = libc.get(0).unwrap();
    assert_eq!(binding.name, strlen);
    assert_eq!(binding.native.signature, "($)i");
    assert!(binding.ty.is_none());

    let helper = symbols.intern_str("helper");
    assert_eq!(libc.bind(&symbols, helper), None);
    assert_eq!(libc.bind(&symbols, well_known::ENV), None);
    assert_eq!(libc.len(), 2);
}

#[test]
fn bindings_grow_in_steps() {
    let symbols = SymbolTable::new();
    let mut libc = LibcBindings::default();

    for name in ["puts", "printf", "memcpy", "memset"] {
        libc.bind(&symbols, symbols.get(name).unwrap()).unwrap();
    }
    assert_eq!(libc.capacity(), ALLOC_STEP);

    libc.bind(&symbols, symbols.get("exit").unwrap()).unwrap();
    assert_eq!(libc.len(), 5);
    assert_eq!(libc.capacity(), ALLOC_STEP * 2);
}

#[test]
fn slots_are_in_the_libc_region() {
    assert_eq!(LibcBindings::slot(0), table_space::BUILTIN_LIBC_REGION_START);
    assert_eq!(
        table_space::SlotTarget::decode(LibcBindings::slot(3)),
        Ok(table_space::SlotTarget::Libc { index: 3 })
    );
}
