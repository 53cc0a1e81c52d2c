//! Integration tests for [`wasmlink`].

mod libc;
mod loader;
mod reclaim;

use wasmlink::{
    FreeListHeap, MemoryReader, Module, ModuleKind, Program, ProgramFlags, ProgramOptions,
    Runtime, RuntimeConfig,
};

fn leb(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn name(text: &str, out: &mut Vec<u8>) {
    leb(text.len() as u32, out);
    out.extend_from_slice(text.as_bytes());
}

/// Parses WAT text, appending a `dylink.0` section describing the module's memory and table
/// requirements, and the modules it needs. Alignments are given as powers of two.
fn shared(wat: &str, memory: (u32, u32), table: (u32, u32), needed: &[&str]) -> Vec<u8> {
    let mut contents = Vec::new();

    let mut mem_info = Vec::new();
    for value in [memory.0, memory.1, table.0, table.1] {
        leb(value, &mut mem_info);
    }
    contents.push(1);
    leb(mem_info.len() as u32, &mut contents);
    contents.extend_from_slice(&mem_info);

    if !needed.is_empty() {
        let mut list = Vec::new();
        leb(needed.len() as u32, &mut list);
        for module in needed {
            name(module, &mut list);
        }
        contents.push(2);
        leb(list.len() as u32, &mut contents);
        contents.extend_from_slice(&list);
    }

    let mut section = Vec::new();
    name("dylink.0", &mut section);
    section.extend_from_slice(&contents);

    let mut wasm = wat::parse_str(wat).unwrap();
    wasm.push(0);
    leb(section.len() as u32, &mut wasm);
    wasm.extend_from_slice(&section);
    wasm
}

fn runtime(modules: Vec<(&str, Vec<u8>)>) -> Runtime {
    let mut reader = MemoryReader::new();
    for (file_name, bytes) in modules {
        reader.insert(file_name, bytes);
    }

    let mut runtime = Runtime::new(RuntimeConfig::default());
    runtime.register_module_reader(Box::new(reader));
    runtime
}

fn parse(runtime: &mut Runtime, wasm: &[u8]) -> Module {
    runtime.parse_module(wasm, ModuleKind::Bytecode).unwrap()
}

fn options(flags: ProgramFlags) -> ProgramOptions {
    ProgramOptions::new(flags, Box::new(FreeListHeap::new(0x1000, 0x1000)))
}

const PLAIN_ROOT: &str = r#"(module
    (func (export "main") (result i32)
        i32.const 0)
)"#;

/// Creates a program whose root does not need any modules.
fn plain_program(runtime: &mut Runtime, flags: ProgramFlags) -> Program {
    let root = parse(runtime, &wat::parse_str(PLAIN_ROOT).unwrap());
    Program::create(runtime, root, options(flags)).unwrap()
}
