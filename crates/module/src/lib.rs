//! Describes the parts of a WebAssembly module that matter when linking it with other modules.
//!
//! A [`Module`] is produced by [`decode()`] from a WebAssembly binary, and is never modified
//! afterwards except to give it a name with [`Module::with_name()`]. Instruction bodies are
//! validated but not retained.

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![deny(unreachable_pub)]
#![forbid(unsafe_code)]
#![deny(clippy::exhaustive_enums)]

mod decode;
pub mod dylink;

pub use decode::decode;
pub use dylink::DylinkInfo;

use wasmlink_core::{FuncType, Symbol, ValType};

/// Indicates how a module was compiled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum ModuleKind {
    /// The module is interpreted from WebAssembly bytecode.
    Bytecode,
    /// The module was compiled ahead of time to native code.
    Native,
}

impl ModuleKind {
    /// The file extension conventionally used for modules of this kind.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Bytecode => "wasm",
            Self::Native => "aot",
        }
    }

    /// A short description of the kind.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bytecode => "bytecode",
            Self::Native => "native",
        }
    }
}

impl core::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A constant expression, used for global initializers and element segment offsets.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    /// Bit pattern of an `f32` constant.
    F32(u32),
    /// Bit pattern of an `f64` constant.
    F64(u64),
    GlobalGet(u32),
    RefNull,
    RefFunc(u32),
}

/// What kind of entity an import refers to.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ImportDesc {
    /// A function of the given type.
    Func(FuncType),
    /// A global.
    #[allow(missing_docs)]
    Global { ty: ValType, mutable: bool },
    /// A table.
    Table,
    /// A linear memory.
    Memory,
}

/// A WebAssembly import.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Import {
    /// The name of the module the import is resolved against.
    pub module: Symbol,
    /// The name of the imported entity.
    pub field: Symbol,
    #[allow(missing_docs)]
    pub desc: ImportDesc,
}

/// The kind of entity that an [`Export`] refers to.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// A WebAssembly export.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct Export {
    #[allow(missing_docs)]
    pub name: Symbol,
    #[allow(missing_docs)]
    pub kind: ExportKind,
    /// Index of the exported entity in its index space.
    pub index: u32,
}

/// A global defined by a module.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct Global {
    #[allow(missing_docs)]
    pub ty: ValType,
    #[allow(missing_docs)]
    pub mutable: bool,
    #[allow(missing_docs)]
    pub init: ConstExpr,
}

/// The limits of a module's table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct TableType {
    #[allow(missing_docs)]
    pub initial: u32,
    #[allow(missing_docs)]
    pub maximum: Option<u32>,
}

/// An active element segment, which initializes entries of the module's first table.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ElementSegment {
    /// Index of the first table entry that is initialized.
    pub offset: ConstExpr,
    /// Indices of the functions placed into the table, or `None` for null references.
    pub functions: Box<[Option<u32>]>,
}

/// A loaded WebAssembly module, either bytecode or natively compiled.
#[derive(Debug)]
pub struct Module {
    kind: ModuleKind,
    name: Option<Symbol>,
    func_types: Box<[FuncType]>,
    imports: Box<[Import]>,
    import_func_count: u32,
    import_global_count: u32,
    globals: Box<[Global]>,
    table: Option<TableType>,
    elements: Box<[ElementSegment]>,
    exports: Box<[Export]>,
    dylink: Option<DylinkInfo>,
}

impl Module {
    /// Gives the module a name, which is used to find it when it is imported by other modules.
    pub fn with_name(mut self, name: Symbol) -> Self {
        self.name = Some(name);
        self
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    #[allow(missing_docs)]
    pub fn name(&self) -> Option<Symbol> {
        self.name
    }

    /// Gets the dynamic linking metadata, which is present only in shared modules.
    pub fn dylink(&self) -> Option<&DylinkInfo> {
        self.dylink.as_ref()
    }

    /// Returns `true` if the module can be loaded as a dependency of another module.
    pub fn is_shared(&self) -> bool {
        self.dylink.is_some()
    }

    /// The number of functions, including imported functions.
    pub fn function_count(&self) -> u32 {
        self.func_types.len() as u32
    }

    /// Gets the type of the function at the given index in the function index space.
    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        self.func_types.get(index as usize)
    }

    #[allow(missing_docs)]
    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// The number of imported functions, which occupy the start of the function index space.
    pub fn import_func_count(&self) -> u32 {
        self.import_func_count
    }

    /// The number of imported globals, which occupy the start of the global index space.
    pub fn import_global_count(&self) -> u32 {
        self.import_global_count
    }

    /// Iterates over the imported functions, in function index order.
    pub fn func_imports(&self) -> impl Iterator<Item = (&Import, &FuncType)> + '_ {
        self.imports.iter().filter_map(|import| match &import.desc {
            ImportDesc::Func(ty) => Some((import, ty)),
            _ => None,
        })
    }

    /// Gets the imported function at the given index in the function index space.
    pub fn func_import(&self, index: u32) -> Option<(&Import, &FuncType)> {
        self.func_imports().nth(index as usize)
    }

    /// Iterates over the imported globals, in global index order.
    pub fn global_imports(&self) -> impl Iterator<Item = &Import> + '_ {
        self.imports
            .iter()
            .filter(|import| matches!(import.desc, ImportDesc::Global { .. }))
    }

    /// Gets the globals defined by the module, which follow the imported globals in the global
    /// index space.
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    /// Gets the first table, whether imported or defined.
    pub fn table(&self) -> Option<&TableType> {
        self.table.as_ref()
    }

    /// Gets the active element segments that initialize the first table.
    pub fn elements(&self) -> &[ElementSegment] {
        &self.elements
    }

    #[allow(missing_docs)]
    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Iterates over the exported functions, in the order they are exported.
    pub fn exported_functions(&self) -> impl Iterator<Item = &Export> + '_ {
        self.exports
            .iter()
            .filter(|export| export.kind == ExportKind::Func)
    }

    /// Finds an export with the given name and kind.
    pub fn export(&self, name: Symbol, kind: ExportKind) -> Option<&Export> {
        self.exports
            .iter()
            .find(|export| export.name == name && export.kind == kind)
    }
}
