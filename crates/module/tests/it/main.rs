//! Unit tests for [`wasmlink_module`].


/// Encodes an unsigned LEB128 integer.
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

fn subsection(kind: u8, contents: &[u8], out: &mut Vec<u8>) {
    out.push(kind);
    leb(contents.len() as u32, out);
    out.extend_from_slice(contents);
}

/// Builds the contents of a `dylink.0` section with a memory info and a needed subsection.
fn dylink_contents(memory: (u32, u32), table: (u32, u32), needed: &[&str]) -> Vec<u8> {
    let mut contents = Vec::new();

    let mut mem_info = Vec::new();
    for value in [memory.0, memory.1, table.0, table.1] {
        leb(value, &mut mem_info);
    }
    subsection(1, &mem_info, &mut contents);

    if !needed.is_empty() {
        let mut list = Vec::new();
        leb(needed.len() as u32, &mut list);
        for module in needed {
            name(module, &mut list);
        }
        subsection(2, &list, &mut contents);
    }

    contents
}

/// Parses WAT text, and appends a `dylink.0` custom section with the given contents.
fn shared_module(wat: &str, dylink: &[u8]) -> Vec<u8> {
    let mut wasm = wat::parse_str(wat).unwrap();
    let mut section = Vec::new();
    name("dylink.0", &mut section);
    section.extend_from_slice(dylink);

    wasm.push(0);
    leb(section.len() as u32, &mut wasm);
    wasm.extend_from_slice(&section);
    wasm
}
