use wasmlink::{
    Callee, FuncType, GlobalValue, InstanceId, LinkError, ProgramFlags, Runtime, ValType,
};

const USES_LIBB: &str = r#"(module
    (import "libb" "run" (func $run (param i32) (result i32)))
    (func (export "twice") (param i32) (result i32)
        local.get 0
        call $run
        call $run)
)"#;

fn runtime() -> Runtime {
    crate::runtime(vec![
        ("liba.wasm", crate::shared(USES_LIBB, (16, 2), (0, 0), &[])),
        ("libd.wasm", crate::shared(USES_LIBB, (16, 2), (0, 0), &[])),
        (
            "libb.wasm",
            crate::shared(crate::loader::LIBA, (16, 2), (0, 0), &[]),
        ),
    ])
}

#[test]
fn closing_last_handle_reclaims_transitive_dependencies() {
    let mut runtime = runtime();
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::empty());

    let liba = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    program
        .resolve_import_call(&mut runtime, liba.id(), 0)
        .unwrap();

    let libb_name = runtime.symbols().get("libb").unwrap();
    let libb = program.instance_by_name(libb_name).unwrap();
    assert_eq!(libb.import_refs(), 1);
    assert_eq!(libb.memory().map(|region| region.allocation), Some(0x1018));
    assert_eq!(program.instance_count(), 3);

    program.close_dependency(liba);
    assert_eq!(program.instance_count(), 1);
    assert!(program.instance(liba.id()).is_none());
    assert!(program.instance_by_name(libb_name).is_none());

    // Closing again does nothing.
    program.close_dependency(liba);
    assert_eq!(program.instance_count(), 1);

    // Released memory is reused.
    let reopened = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    let instance = program.instance(reopened.id()).unwrap();
    assert_eq!(instance.memory().map(|region| region.allocation), Some(0x1000));
    assert_eq!(instance.export_refs(), 1);
    assert_eq!(instance.import_refs(), 0);
}

#[test]
fn open_dependencies_survive() {
    let mut runtime = runtime();
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::empty());

    let liba = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    program
        .resolve_import_call(&mut runtime, liba.id(), 0)
        .unwrap();
    let libb = program.open_dependency(&mut runtime, "libb.wasm").unwrap();

    program.close_dependency(liba);
    assert_eq!(program.instance_count(), 2);
    let instance = program.instance(libb.id()).unwrap();
    assert_eq!(instance.import_refs(), 0);
    assert_eq!(instance.export_refs(), 1);

    program.close_dependency(libb);
    assert_eq!(program.instance_count(), 1);
}

#[test]
fn shared_dependencies_survive_until_every_importer_is_gone() {
    let mut runtime = runtime();
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::EARLY_BINDING);

    let liba = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    let libd = program.open_dependency(&mut runtime, "libd.wasm").unwrap();
    let libb_name = runtime.symbols().get("libb").unwrap();
    assert_eq!(program.instance_by_name(libb_name).unwrap().import_refs(), 2);

    program.close_dependency(liba);
    assert_eq!(program.instance_count(), 3);
    assert_eq!(program.instance_by_name(libb_name).unwrap().import_refs(), 1);

    program.close_dependency(libd);
    assert_eq!(program.instance_count(), 1);
}

#[test]
fn importers_keep_dependencies_alive() {
    let mut runtime = runtime();
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::EARLY_BINDING);

    let liba = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    let libb = program.open_dependency(&mut runtime, "libb.wasm").unwrap();

    // Still imported from by liba.
    program.close_dependency(libb);
    assert_eq!(program.instance_count(), 3);

    program.close_dependency(liba);
    assert_eq!(program.instance_count(), 1);
}

#[test]
fn got_entries_keep_their_supplier_alive() {
    let supplier = r#"(module
        (global (export "counter") i32 (i32.const 8))
        (func (export "run") (param i32) (result i32)
            local.get 0)
    )"#;
    let user = r#"(module
        (import "GOT.func" "run" (global (mut i32)))
        (import "GOT.mem" "counter" (global (mut i32)))
    )"#;

    let mut runtime = crate::runtime(vec![
        ("liba.wasm", crate::shared(supplier, (16, 2), (0, 0), &[])),
        ("user.wasm", crate::shared(user, (0, 0), (0, 0), &[])),
    ]);
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::empty());

    let liba = program.open_dependency(&mut runtime, "liba.wasm").unwrap();
    let user = program.open_dependency(&mut runtime, "user.wasm").unwrap();
    let values = program
        .instance(user.id())
        .unwrap()
        .globals()
        .iter()
        .map(|global| global.value)
        .collect::<Vec<_>>();
    assert_eq!(values, [GlobalValue::Value(2047), GlobalValue::Value(0x1008)]);
    assert_eq!(program.instance(liba.id()).unwrap().import_refs(), 1);

    program.close_dependency(liba);
    assert_eq!(program.instance_count(), 3);
    assert_eq!(
        program.resolve_indirect_call(
            &mut runtime,
            user.id(),
            2047,
            &FuncType::new([ValType::I32], [ValType::I32])
        ),
        Ok(Callee::Function {
            instance: liba.id(),
            index: 0
        })
    );

    program.close_dependency(user);
    assert_eq!(program.instance_count(), 1);
}

#[test]
fn reclaimed_instances_leave_the_resolving_cache() {
    let mut runtime = crate::runtime(vec![(
        "liba.wasm",
        crate::shared(crate::indirect::TABLE_LIBRARY, (0, 0), (3, 0), &[]),
    )]);
    let mut program = crate::plain_program(&mut runtime, ProgramFlags::RESOLVING_CACHE);
    let liba = program.open_dependency(&mut runtime, "liba.wasm").unwrap();

    let unary = FuncType::new([ValType::I32], [ValType::I32]);
    assert_eq!(
        program.resolve_indirect_call(&mut runtime, InstanceId::ROOT, 1024, &unary),
        Ok(Callee::Function {
            instance: liba.id(),
            index: 0
        })
    );
    assert!(program.resolving_cache().lookup(1024).is_some());

    program.close_dependency(liba);
    assert!(program.resolving_cache().lookup(1024).is_none());
    assert!(program.resolving_cache().is_empty());
    assert_eq!(
        program.resolve_indirect_call(&mut runtime, InstanceId::ROOT, 1024, &unary),
        Err(LinkError::UndefinedElement { slot: 1024 })
    );
}
