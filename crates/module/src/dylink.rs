//! Parsing of the [`dylink.0` custom section], which marks a module as a shared module.
//!
//! [`dylink.0` custom section]: https://github.com/WebAssembly/tool-conventions/blob/main/DynamicLinking.md

use anyhow::Context;
use wasmlink_core::{Symbol, SymbolTable};

/// The name of the custom section containing dynamic linking metadata.
pub const SECTION_NAME: &str = "dylink.0";

const WASM_DYLINK_MEM_INFO: u8 = 1;
const WASM_DYLINK_NEEDED: u8 = 2;
const WASM_DYLINK_EXPORT_INFO: u8 = 3;
const WASM_DYLINK_IMPORT_INFO: u8 = 4;

/// Additional information about a symbol exported or imported by a shared module.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct SymbolInfo {
    /// The module that the symbol is imported from, or `None` for exports.
    pub module: Option<Symbol>,
    #[allow(missing_docs)]
    pub field: Symbol,
    /// The `WASM_SYM_*` flags of the symbol.
    pub flags: u32,
}

/// Dynamic linking metadata of a shared module.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct DylinkInfo {
    /// The number of bytes of linear memory the module requires.
    pub memory_size: u32,
    /// The required alignment of the module's linear memory, in bytes.
    pub memory_alignment: u32,
    /// The number of table entries the module requires.
    pub table_size: u32,
    /// The required alignment of the module's table entries.
    pub table_alignment: u32,
    /// Names of the modules that this module depends on, in load order.
    pub needed: Box<[Symbol]>,
    #[allow(missing_docs)]
    pub export_info: Box<[SymbolInfo]>,
    #[allow(missing_docs)]
    pub import_info: Box<[SymbolInfo]>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn read_u8(&mut self) -> anyhow::Result<u8> {
        let byte = *self
            .bytes
            .get(self.offset)
            .with_context(|| format!("unexpected end of section @ {:#X}", self.offset))?;
        self.offset += 1;
        Ok(byte)
    }

    fn read_var_u32(&mut self) -> anyhow::Result<u32> {
        let start = self.offset;
        let mut result = 0u32;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 28 && byte > 0x0F {
                anyhow::bail!("integer too large @ {start:#X}");
            }

            result |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }

            shift += 7;
        }
    }

    fn read_bytes(&mut self, length: u32) -> anyhow::Result<&'a [u8]> {
        let start = self.offset;
        let end = start
            .checked_add(length as usize)
            .filter(|end| *end <= self.bytes.len())
            .with_context(|| format!("unexpected end of section @ {start:#X}"))?;
        self.offset = end;
        Ok(&self.bytes[start..end])
    }

    fn read_name(&mut self, symbols: &mut SymbolTable) -> anyhow::Result<Symbol> {
        let start = self.offset;
        let length = self.read_var_u32()?;
        let name = self.read_bytes(length)?;
        symbols
            .intern(name)
            .with_context(|| format!("invalid name @ {start:#X}"))
    }
}

fn alignment(log2: u32) -> anyhow::Result<u32> {
    1u32.checked_shl(log2)
        .with_context(|| format!("alignment 2^{log2} is too large"))
}

/// Parses the contents of a `dylink.0` custom section.
///
/// # Errors
///
/// Returns an error if the section is truncated, or contains an unknown subsection.
pub fn parse(contents: &[u8], symbols: &mut SymbolTable) -> anyhow::Result<DylinkInfo> {
    let mut reader = Reader {
        bytes: contents,
        offset: 0,
    };

    let mut info = DylinkInfo {
        memory_alignment: 1,
        table_alignment: 1,
        ..Default::default()
    };

    while !reader.is_empty() {
        let kind = reader.read_u8()?;
        let length = reader.read_var_u32()?;
        let subsection_offset = reader.offset;
        let mut subsection = Reader {
            bytes: reader.read_bytes(length)?,
            offset: 0,
        };

        let mut read_subsection = || -> anyhow::Result<()> {
            match kind {
                WASM_DYLINK_MEM_INFO => {
                    info.memory_size = subsection.read_var_u32()?;
                    info.memory_alignment = alignment(subsection.read_var_u32()?)?;
                    info.table_size = subsection.read_var_u32()?;
                    info.table_alignment = alignment(subsection.read_var_u32()?)?;
                }
                WASM_DYLINK_NEEDED => {
                    let count = subsection.read_var_u32()?;
                    let mut needed = Vec::with_capacity(count.min(64) as usize);
                    for _ in 0..count {
                        needed.push(subsection.read_name(symbols)?);
                    }
                    info.needed = needed.into_boxed_slice();
                }
                WASM_DYLINK_EXPORT_INFO => {
                    let count = subsection.read_var_u32()?;
                    let mut exports = Vec::with_capacity(count.min(64) as usize);
                    for _ in 0..count {
                        let field = subsection.read_name(symbols)?;
                        let flags = subsection.read_var_u32()?;
                        exports.push(SymbolInfo {
                            module: None,
                            field,
                            flags,
                        });
                    }
                    info.export_info = exports.into_boxed_slice();
                }
                WASM_DYLINK_IMPORT_INFO => {
                    let count = subsection.read_var_u32()?;
                    let mut imports = Vec::with_capacity(count.min(64) as usize);
                    for _ in 0..count {
                        let module = subsection.read_name(symbols)?;
                        let field = subsection.read_name(symbols)?;
                        let flags = subsection.read_var_u32()?;
                        imports.push(SymbolInfo {
                            module: Some(module),
                            field,
                            flags,
                        });
                    }
                    info.import_info = imports.into_boxed_slice();
                }
                unknown => anyhow::bail!("unknown subsection {unknown}"),
            }

            Ok(())
        };

        read_subsection().with_context(|| {
            format!("invalid {SECTION_NAME} subsection @ {subsection_offset:#X}")
        })?;
    }

    Ok(info)
}
