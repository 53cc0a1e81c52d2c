use std::sync::Arc;
use wasmlink::{
    load_dependency, Callee, FreeListHeap, InstanceId, LinkError, MemoryReader, ModuleKind,
    Program, ProgramFlags, ProgramOptions, Runtime, RuntimeConfig,
};

pub(crate) const LIBA: &str = r#"(module
    (func (export "run") (param i32) (result i32)
        local.get 0
        i32.const 1
        i32.add)
)"#;

const ROOT_IMPORTS_RUN: &str = r#"(module
    (import "liba" "run" (func $run (param i32) (result i32)))
    (func (export "main") (param i32) (result i32)
        local.get 0
        call $run)
)"#;

const LIBA_IMPORTS_RUN: &str = r#"(module
    (import "libb" "run" (func $run (param i32) (result i32)))
    (func (export "twice") (param i32) (result i32)
        local.get 0
        call $run
        call $run)
)"#;

fn liba() -> Vec<u8> {
    crate::shared(LIBA, (16, 2), (0, 0), &[])
}

#[test]
fn root_imports_from_first_dependency() {
    let mut runtime = crate::runtime(vec![("liba.wasm", liba())]);
    let root = crate::shared(ROOT_IMPORTS_RUN, (0, 0), (0, 0), &["liba.wasm"]);
    let root = crate::parse(&mut runtime, &root);
    let mut program =
        Program::create(&mut runtime, root, crate::options(ProgramFlags::empty())).unwrap();

    let liba = runtime.symbols().get("liba").unwrap();
    let dependency = program.instance_by_name(liba).unwrap();
    let id = dependency.id();
    assert_eq!(id.get(), 2);
    assert_eq!(dependency.import_refs(), 0);
    assert_eq!(dependency.export_refs(), 0);
    assert_eq!(dependency.table_base(), 1024);
    assert_eq!(dependency.memory_base(), 0x1000);
    assert_eq!(dependency.memory().map(|region| region.size), Some(19));

    let callee = program
        .resolve_import_call(&mut runtime, InstanceId::ROOT, 0)
        .unwrap();

    assert_eq!(
        callee,
        Callee::Function {
            instance: id,
            index: 0
        }
    );
    assert_eq!(program.instance(id).unwrap().import_refs(), 1);
    assert_eq!(program.root().resolved_import(liba), Some(id));
    assert_eq!(program.root().import_link(0), Some(callee));

    // The stored link is reused, and the dependency is only counted once.
    assert_eq!(
        program.resolve_import_call(&mut runtime, InstanceId::ROOT, 0),
        Ok(callee)
    );
    assert_eq!(program.instance(id).unwrap().import_refs(), 1);
}

#[test]
fn only_first_needed_module_is_instantiated() {
    let mut runtime = crate::runtime(vec![
        ("liba.wasm", liba()),
        ("libb.wasm", crate::shared(LIBA, (0, 0), (0, 0), &[])),
    ]);
    let root = crate::shared(
        ROOT_IMPORTS_RUN,
        (0, 0),
        (0, 0),
        &["liba.wasm", "libb.wasm"],
    );
    let root = crate::parse(&mut runtime, &root);
    let program =
        Program::create(&mut runtime, root, crate::options(ProgramFlags::empty())).unwrap();

    assert_eq!(runtime.module_count(), 2);
    assert_eq!(program.instance_count(), 2);
    assert!(program
        .instance_by_name(runtime.symbols().get("libb").unwrap())
        .is_none());
}

#[test]
fn open_dependency_counts_handles() {
    let mut runtime = crate::runtime(vec![("liba.wasm", liba())]);
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::empty());

    let first = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    let second = program.open_dependency(&mut runtime, "liba").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.id().get(), 2);

    let instance = program.instance(first.id()).unwrap();
    assert_eq!(instance.export_refs(), 2);
    assert_eq!(instance.import_refs(), 0);
    assert_eq!(program.instance_count(), 2);

    assert_eq!(
        program.lookup_exported_symbol_table_slot(&runtime, first, "run"),
        Ok(2047)
    );
    assert_eq!(
        program.lookup_exported_symbol_table_slot(&runtime, first, "nope"),
        Err(LinkError::UnlinkedImport {
            module: "liba".to_string(),
            field: "nope".to_string(),
        })
    );
}

#[test]
fn early_binding_resolves_imports_on_instantiation() {
    let mut runtime = crate::runtime(vec![
        ("liba.wasm", crate::shared(LIBA_IMPORTS_RUN, (0, 0), (0, 0), &[])),
        ("libb.wasm", crate::shared(LIBA, (0, 0), (0, 0), &[])),
    ]);
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::EARLY_BINDING);

    let handle = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    let libb = program
        .instance_by_name(runtime.symbols().get("libb").unwrap())
        .unwrap()
        .id();

    assert_eq!(program.instance(libb).unwrap().import_refs(), 1);
    assert_eq!(
        program.instance(handle.id()).unwrap().import_link(0),
        Some(Callee::Function {
            instance: libb,
            index: 0
        })
    );
}

#[test]
fn missing_and_malformed_modules() {
    let mut runtime = crate::runtime(vec![
        ("bad.wasm", b"\0asm\x01\0\0\0\x7f".to_vec()),
        ("plain.wasm", wat::parse_str(LIBA).unwrap()),
    ]);
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::empty());

    assert_eq!(
        program.open_dependency(&mut runtime, "missing.wasm"),
        Err(LinkError::UnlinkedModule {
            module: "missing.wasm".to_string()
        })
    );

    assert!(matches!(
        program.open_dependency(&mut runtime, "bad.wasm"),
        Err(LinkError::Malformed { module, .. }) if module == "bad.wasm"
    ));

    assert_eq!(
        program.open_dependency(&mut runtime, "plain.wasm"),
        Err(LinkError::NotShared {
            module: "plain".to_string()
        })
    );

    assert_eq!(program.instance_count(), 1);
}

#[test]
fn no_reader_means_unlinked() {
    let mut runtime = Runtime::default();
    assert_eq!(
        load_dependency(&mut runtime, "liba.wasm", ModuleKind::Bytecode).map(|_| ()),
        Err(LinkError::UnlinkedModule {
            module: "liba.wasm".to_string()
        })
    );
}

#[test]
fn registered_modules_are_reused() {
    let mut runtime = crate::runtime(vec![("liba.wasm", liba())]);

    let first = load_dependency(&mut runtime, "liba.wasm", ModuleKind::Bytecode).unwrap();
    let second = load_dependency(&mut runtime, "liba", ModuleKind::Bytecode).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(runtime.module_count(), 1);
    assert_eq!(first.name(), runtime.symbols().get("liba"));

    assert_eq!(
        load_dependency(&mut runtime, "liba.aot", ModuleKind::Native).map(|_| ()),
        Err(LinkError::KindMismatch {
            module: "liba.aot".to_string(),
            expected: "native",
            actual: "bytecode",
        })
    );
}

#[test]
fn registered_module_must_be_shared() {
    let mut runtime = crate::runtime(Vec::new());
    let plain = crate::parse(&mut runtime, &wat::parse_str(LIBA).unwrap());
    let name = runtime.symbols_mut().intern_str("plain");
    runtime.register_module(name, plain);

    assert_eq!(
        load_dependency(&mut runtime, "plain.wasm", ModuleKind::Bytecode).map(|_| ()),
        Err(LinkError::NotShared {
            module: "plain.wasm".to_string()
        })
    );
}

#[test]
fn extension_is_upgraded_for_native_modules() {
    let mut runtime = Runtime::new(RuntimeConfig::default().with_auto_update_extension(true));
    runtime.register_module_reader(Box::new(
        MemoryReader::new().with_module("liba.aot", liba()),
    ));

    assert_eq!(
        runtime.upgrade_extension("liba.wasm", ModuleKind::Native),
        "liba.aot"
    );
    assert_eq!(
        runtime.upgrade_extension("liba.aot", ModuleKind::Native),
        "liba.aot"
    );
    assert_eq!(
        runtime.upgrade_extension("liba.aot", ModuleKind::Bytecode),
        "liba.wasm"
    );
    assert_eq!(runtime.upgrade_extension("liba", ModuleKind::Native), "liba");

    let module = load_dependency(&mut runtime, "liba.wasm", ModuleKind::Native).unwrap();
    assert_eq!(module.kind(), ModuleKind::Native);

    let unchanged = Runtime::default();
    assert_eq!(
        unchanged.upgrade_extension("liba.wasm", ModuleKind::Native),
        "liba.wasm"
    );
}

#[test]
fn dependency_memory_comes_from_root_heap() {
    let mut runtime = crate::runtime(vec![(
        "liba.wasm",
        crate::shared(LIBA, (64, 0), (0, 0), &[]),
    )]);
    let root = crate::parse(&mut runtime, &wat::parse_str(crate::PLAIN_ROOT).unwrap());
    let heap = FreeListHeap::new(0x1000, 16);
    let options = ProgramOptions::new(ProgramFlags::empty(), Box::new(heap));
    let mut program = Program::create(&mut runtime, root, options).unwrap();

    assert_eq!(
        program.open_dependency(&mut runtime, "liba.wasm"),
        Err(LinkError::OutOfMemory { requested: 64 })
    );
    assert_eq!(program.instance_count(), 1);
}

#[test]
fn table_space_is_bounded() {
    let mut runtime = crate::runtime(vec![(
        "liba.wasm",
        crate::shared(LIBA, (0, 0), (2000, 0), &[]),
    )]);
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::empty());

    assert_eq!(
        program.open_dependency(&mut runtime, "liba.wasm"),
        Err(LinkError::TableSpaceExhausted { needed: 2001 })
    );
}

#[test]
fn instance_ids_are_handed_out_in_order() {
    let mut runtime = crate::runtime(Vec::new());
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::empty());

    assert_eq!(program.root().id(), InstanceId::ROOT);
    assert_eq!(program.alloc_instance_id().map(InstanceId::get), Ok(2));
    assert_eq!(program.alloc_instance_id().map(InstanceId::get), Ok(3));
    assert_eq!(program.instance_count(), 1);
}

#[test]
fn standalone_runtimes_only_link_registered_modules() {
    let mut reader = MemoryReader::new();
    reader.insert("liba.wasm", liba());

    let mut runtime = Runtime::new(RuntimeConfig::default().with_standalone(true));
    runtime.register_module_reader(Box::new(reader));

    let root = crate::shared(ROOT_IMPORTS_RUN, (0, 0), (0, 0), &["liba.wasm"]);
    let root = crate::parse(&mut runtime, &root);
    let mut program =
        Program::create(&mut runtime, root, crate::options(ProgramFlags::empty())).unwrap();
    assert_eq!(program.instance_count(), 1);
    assert_eq!(runtime.module_count(), 0);

    assert_eq!(
        program.open_dependency(&mut runtime, "liba.wasm"),
        Err(LinkError::UnlinkedModule {
            module: "liba.wasm".to_owned()
        })
    );

    let module = crate::parse(&mut runtime, &liba());
    let name = runtime.symbols_mut().intern_str("liba");
    runtime.register_module(name, module);

    let handle = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    assert_eq!(handle.id().get(), 2);
    assert_eq!(
        program.resolve_import_call(&mut runtime, InstanceId::ROOT, 0),
        Ok(Callee::Function {
            instance: handle.id(),
            index: 0
        })
    );
}
