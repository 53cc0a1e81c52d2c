//! Module instances within a [`Program`](crate::Program).

use std::collections::BTreeMap;
use std::sync::Arc;
use wasmlink_core::{table_space, FuncType, Symbol, ValType};
use wasmlink_module::Module;

/// Identifies a module instance within a [`Program`](crate::Program).
///
/// The id also determines which region of the indirect call table space the instance occupies,
/// see [`table_space::region_for()`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct InstanceId(u32);

impl InstanceId {
    /// The id of the root module instance, which is never reused.
    pub const ROOT: Self = Self(table_space::ROOT_INSTANCE_ID);

    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    #[allow(missing_docs)]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Gets the first slot of the region of the table space belonging to this instance.
    pub const fn region_start(self) -> u32 {
        (self.0 - 1) << table_space::TABLE_SPACE_BITS_LEN
    }
}

impl core::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The function that a call resolves to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum Callee {
    /// A function defined by a module instance.
    Function {
        #[allow(missing_docs)]
        instance: InstanceId,
        /// Index of the function in the instance's function index space.
        index: u32,
    },
    /// A function import of a module instance that is supplied by the embedder, such as a WASI or
    /// `env` function.
    Host {
        #[allow(missing_docs)]
        instance: InstanceId,
        /// Index of the imported function in the instance's function index space.
        index: u32,
    },
    /// A function provided by the builtin libc pseudo-module.
    Native {
        /// Index into the program's builtin libc bindings.
        index: u32,
    },
}

impl Callee {
    /// Gets the module instance that the function belongs to, or `None` for builtin libc
    /// functions.
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            Self::Function { instance, .. } | Self::Host { instance, .. } => Some(*instance),
            Self::Native { .. } => None,
        }
    }
}

/// The value of a global in a module instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum GlobalValue {
    /// An imported global that has not been linked yet.
    Unresolved,
    /// An imported global supplied by the embedder.
    Host,
    /// The bit pattern of the global's value.
    Value(u64),
    /// The global shares the storage of a global in another module instance.
    Alias {
        #[allow(missing_docs)]
        instance: InstanceId,
        /// Index of the global in the other instance's global index space.
        index: u32,
    },
}

/// A global in a module instance.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct GlobalInstance {
    #[allow(missing_docs)]
    pub ty: ValType,
    #[allow(missing_docs)]
    pub mutable: bool,
    #[allow(missing_docs)]
    pub value: GlobalValue,
}

/// A range of the root module instance's linear memory lent to a dependency.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct MemoryRegion {
    /// The address returned by the [`RootHeap`](crate::heap::RootHeap), which is released when
    /// the instance is reclaimed.
    pub allocation: u32,
    /// The aligned address of the instance's data, given to it as `__memory_base`.
    pub base: u32,
    /// The number of bytes allocated.
    pub size: u32,
}

/// Marks an entry of an indirect call table that does not refer to a function yet.
pub const UNBOUND: u32 = u32::MAX;

/// One instantiation of a [`Module`] within a [`Program`](crate::Program).
#[derive(Debug)]
pub struct ModuleInstance {
    pub(crate) id: InstanceId,
    pub(crate) name: Option<Symbol>,
    pub(crate) module: Arc<Module>,
    /// The number of handles to this instance held by the embedder.
    pub(crate) export_refs: u32,
    /// The number of other instances that import from this instance.
    pub(crate) import_refs: u32,
    /// Maps the name of each module that this instance imports from to the instance supplying
    /// those imports.
    pub(crate) resolved_imports: BTreeMap<Symbol, InstanceId>,
    /// The resolved target of each imported function.
    pub(crate) import_links: Box<[Option<Callee>]>,
    /// Function indices of the exported functions, in export order.
    pub(crate) export_functions: Box<[u32]>,
    pub(crate) export_names: Box<[Symbol]>,
    /// Function indices stored in the indirect call table, or [`UNBOUND`].
    pub(crate) table: Vec<u32>,
    /// Index of the first table entry caching an exported function.
    pub(crate) export_cells: Option<u32>,
    pub(crate) globals: Vec<GlobalInstance>,
    pub(crate) memory: Option<MemoryRegion>,
}

impl ModuleInstance {
    pub(crate) fn new(id: InstanceId, name: Option<Symbol>, module: Arc<Module>) -> Self {
        let exports = module
            .exported_functions()
            .map(|export| (export.name, export.index))
            .collect::<Vec<_>>();

        let globals = module
            .imports()
            .iter()
            .filter_map(|import| match import.desc {
                wasmlink_module::ImportDesc::Global { ty, mutable } => Some(GlobalInstance {
                    ty,
                    mutable,
                    value: GlobalValue::Unresolved,
                }),
                _ => None,
            })
            .chain(module.globals().iter().map(|global| GlobalInstance {
                ty: global.ty,
                mutable: global.mutable,
                value: GlobalValue::Unresolved,
            }))
            .collect();

        Self {
            id,
            name,
            export_refs: 0,
            import_refs: 0,
            resolved_imports: BTreeMap::new(),
            import_links: vec![None; module.import_func_count() as usize].into_boxed_slice(),
            export_functions: exports.iter().map(|(_, index)| *index).collect(),
            export_names: exports.iter().map(|(name, _)| *name).collect(),
            table: Vec::new(),
            export_cells: None,
            globals,
            memory: None,
            module,
        }
    }

    #[allow(missing_docs)]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The name other modules use to import from this instance.
    pub fn name(&self) -> Option<Symbol> {
        self.name
    }

    #[allow(missing_docs)]
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// The number of handles to this instance held by the embedder.
    pub fn export_refs(&self) -> u32 {
        self.export_refs
    }

    /// The number of other module instances that import from this instance.
    pub fn import_refs(&self) -> u32 {
        self.import_refs
    }

    /// Gets the instance that supplies the imports from the module with the given name.
    pub fn resolved_import(&self, module: Symbol) -> Option<InstanceId> {
        self.resolved_imports.get(&module).copied()
    }

    /// Gets the target of an imported function, if it has been resolved.
    pub fn import_link(&self, func_index: u32) -> Option<Callee> {
        self.import_links.get(func_index as usize).copied().flatten()
    }

    /// The first slot of this instance's region of the table space, given to it as
    /// `__table_base`.
    pub fn table_base(&self) -> u32 {
        self.id.region_start()
    }

    /// The entries of the instance's indirect call table.
    pub fn table(&self) -> &[u32] {
        &self.table
    }

    #[allow(missing_docs)]
    pub fn globals(&self) -> &[GlobalInstance] {
        &self.globals
    }

    /// The range of the root module instance's memory used by this instance.
    pub fn memory(&self) -> Option<&MemoryRegion> {
        self.memory.as_ref()
    }

    /// The address where this instance's data starts.
    pub fn memory_base(&self) -> u32 {
        self.memory.map(|region| region.base).unwrap_or(0)
    }

    /// The number of exported functions.
    pub fn export_count(&self) -> u32 {
        self.export_functions.len() as u32
    }

    /// Finds the position of an exported function in export order.
    pub fn find_export(&self, name: Symbol) -> Option<u32> {
        self.export_names
            .iter()
            .position(|export| *export == name)
            .map(|index| index as u32)
    }

    /// Gets the slot through which an exported function is called indirectly.
    pub fn export_slot(&self, export_index: u32) -> u32 {
        table_space::export_slot(self.id.get(), self.export_count(), export_index)
    }

    pub(crate) fn func_type(&self, index: u32) -> Option<&FuncType> {
        self.module.func_type(index)
    }

    pub(crate) fn is_import(&self, func_index: u32) -> bool {
        func_index < self.module.import_func_count()
    }
}
