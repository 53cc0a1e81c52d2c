//! The [`Program`], which owns a root module instance and all of its dependencies.

use crate::cache::ResolvingCache;
use crate::heap::RootHeap;
use crate::instance::{InstanceId, ModuleInstance};
use crate::libc::LibcBindings;
use crate::runtime::Runtime;
use std::collections::BTreeMap;
use std::sync::Arc;
use wasmlink_core::symbol::well_known;
use wasmlink_core::{table_space, LinkError, Result, Symbol};
use wasmlink_module::{ExportKind, Module};

bitflags::bitflags! {
    /// Options used when a [`Program`] is created.
    ///
    /// The bits match the layout of the configuration mask accepted by
    /// [`ProgramFlags::from_mask()`].
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct ProgramFlags: u32 {
        /// Resolve every import when a module is instantiated, rather than on first use.
        const EARLY_BINDING = 0x1;
        /// Supply `malloc`, `free` and `realloc` from the root module rather than from the builtin
        /// libc.
        const MEMOP_FROM_ROOT = 0x2;
        /// Reserve extra indirect call table entries in each shared module to cache its exported
        /// functions.
        const TABLE_AS_CACHE = 0x4;
        /// The root module uses AssemblyScript names for its allocator exports.
        const ROOT_IS_ASSEMBLYSCRIPT = 0x8;
        /// Cache the targets of indirect calls that cross module boundaries.
        const RESOLVING_CACHE = 0x10;
    }
}

impl ProgramFlags {
    /// Decodes a configuration mask, ignoring unknown bits.
    pub fn from_mask(mask: u32) -> Self {
        Self::from_bits_truncate(mask)
    }

    #[allow(missing_docs)]
    pub fn binding_mode(self) -> BindingMode {
        if self.contains(Self::EARLY_BINDING) {
            BindingMode::Early
        } else {
            BindingMode::Lazy
        }
    }

    #[allow(missing_docs)]
    pub fn memop_source(self) -> MemopSource {
        if self.contains(Self::MEMOP_FROM_ROOT) {
            MemopSource::Root
        } else {
            MemopSource::BuiltinLibc
        }
    }
}

/// When imported functions are resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum BindingMode {
    /// Imports are resolved the first time they are called.
    Lazy,
    /// Imports are resolved when a module is instantiated.
    Early,
}

/// Which module supplies `malloc`, `free` and `realloc` to dependencies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum MemopSource {
    /// The root module's exports.
    Root,
    /// The builtin libc pseudo-module.
    BuiltinLibc,
}

/// Configures a [`Program`].
#[derive(Debug)]
#[non_exhaustive]
pub struct ProgramOptions {
    #[allow(missing_docs)]
    pub flags: ProgramFlags,
    /// The heap of the root module instance, from which dependency memory is allocated.
    pub heap: Box<dyn RootHeap>,
}

impl ProgramOptions {
    #[allow(missing_docs)]
    pub fn new(flags: ProgramFlags, heap: Box<dyn RootHeap>) -> Self {
        Self { flags, heap }
    }
}

/// A handle to a dependency opened by the embedder with [`Program::open_dependency()`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DependencyHandle(pub(crate) InstanceId);

impl DependencyHandle {
    /// The id of the module instance that the handle refers to.
    pub fn id(self) -> InstanceId {
        self.0
    }
}

/// A running program, made of a root module instance and the dependency module instances loaded
/// on its behalf.
///
/// Every operation that changes a program takes `&mut self`, so a program shared between threads
/// must be guarded by a single lock, along with its [`Runtime`].
#[derive(Debug)]
pub struct Program {
    pub(crate) flags: ProgramFlags,
    /// Owns every module instance.
    pub(crate) instances: BTreeMap<InstanceId, ModuleInstance>,
    pub(crate) names: BTreeMap<Symbol, InstanceId>,
    pub(crate) cache: ResolvingCache,
    pub(crate) libc: LibcBindings,
    pub(crate) heap: Box<dyn RootHeap>,
    next_id: u32,
}

impl Program {
    /// Creates a program, instantiating the `root` module with the id [`InstanceId::ROOT`].
    ///
    /// If the root module is a shared module, every module it needs is loaded, but only the first
    /// is instantiated. The others are instantiated once they are first referred to. Nothing is
    /// loaded if the runtime is [standalone](crate::RuntimeConfig::standalone).
    ///
    /// # Errors
    ///
    /// Returns an error if the root module could not be instantiated, or if its first needed
    /// module could not be loaded.
    pub fn create(runtime: &mut Runtime, root: Module, options: ProgramOptions) -> Result<Self> {
        let flags = options.flags;
        log::debug!("creating program with flags {flags:?}");

        let root = match root.name() {
            Some(name) => runtime.register_module(name, root),
            None => Arc::new(root),
        };

        let mut program = Self {
            flags,
            instances: BTreeMap::new(),
            names: BTreeMap::new(),
            cache: ResolvingCache::default(),
            libc: LibcBindings::default(),
            heap: options.heap,
            next_id: table_space::ROOT_INSTANCE_ID,
        };

        let instance = ModuleInstance::new(InstanceId::ROOT, root.name(), root.clone());
        let table_len = program.table_len(&root)?;
        program.link_instance(runtime, instance, table_len)?;

        if runtime.config().standalone {
            log::debug!("standalone runtime, needed modules are not loaded");
        } else if let Some(dylink) = root.dylink() {
            let needed = dylink
                .needed
                .iter()
                .map(|name| runtime.symbols().resolve(*name).to_owned())
                .collect::<Vec<_>>();

            for (index, name) in needed.iter().enumerate() {
                let module = crate::loader::load_dependency(runtime, name, root.kind())?;
                if index == 0 {
                    program.instantiate_dependency(runtime, module)?;
                }
            }
        }

        program.validate_mode_compatibility(runtime);
        Ok(program)
    }

    #[allow(missing_docs)]
    pub fn flags(&self) -> ProgramFlags {
        self.flags
    }

    #[allow(missing_docs)]
    pub fn binding_mode(&self) -> BindingMode {
        self.flags.binding_mode()
    }

    #[allow(missing_docs)]
    pub fn memop_source(&self) -> MemopSource {
        self.flags.memop_source()
    }

    #[allow(missing_docs)]
    pub fn root(&self) -> &ModuleInstance {
        &self.instances[&InstanceId::ROOT]
    }

    #[allow(missing_docs)]
    pub fn instance(&self, id: InstanceId) -> Option<&ModuleInstance> {
        self.instances.get(&id)
    }

    /// Finds a module instance by the name it is imported with.
    pub fn instance_by_name(&self, name: Symbol) -> Option<&ModuleInstance> {
        self.names.get(&name).and_then(|id| self.instances.get(id))
    }

    /// Iterates over every module instance, in id order.
    pub fn instances(&self) -> impl Iterator<Item = &ModuleInstance> + '_ {
        self.instances.values()
    }

    /// The number of live module instances, including the root.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    #[allow(missing_docs)]
    pub fn resolving_cache(&self) -> &ResolvingCache {
        &self.cache
    }

    /// The builtin libc functions referred to by the program's modules.
    pub fn libc(&self) -> &LibcBindings {
        &self.libc
    }

    #[allow(missing_docs)]
    pub fn heap(&self) -> &dyn RootHeap {
        self.heap.as_ref()
    }

    pub(crate) fn get(&self, id: InstanceId) -> Result<&ModuleInstance> {
        self.instances
            .get(&id)
            .ok_or(LinkError::UnknownInstance { id: id.get() })
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Result<&mut ModuleInstance> {
        self.instances
            .get_mut(&id)
            .ok_or(LinkError::UnknownInstance { id: id.get() })
    }

    /// Allocates an id for a new module instance.
    ///
    /// Ids are handed out in increasing order, wrapping around once the largest id is reached.
    /// The root's id is never handed out again.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InstanceIdsExhausted`] if every id is in use.
    pub fn alloc_instance_id(&mut self) -> Result<InstanceId> {
        let mut id = self.next_id;
        for _ in 0..table_space::MAX_INSTANCE_ID {
            if id == 0 || id > table_space::MAX_INSTANCE_ID {
                id = table_space::ROOT_INSTANCE_ID + 1;
            }

            let candidate = InstanceId::new(id);
            id += 1;
            if !self.instances.contains_key(&candidate) {
                self.next_id = id;
                return Ok(candidate);
            }
        }

        Err(LinkError::InstanceIdsExhausted)
    }

    /// Removes a module instance from the id map, allowing its id to be reused.
    ///
    /// The instance stays in the name map. The root's id is never freed.
    pub(crate) fn free_instance_id(&mut self, id: InstanceId) -> Option<ModuleInstance> {
        if id == InstanceId::ROOT {
            return None;
        }

        self.instances.remove(&id)
    }

    /// The number of indirect call table entries needed by an instance of a module.
    pub(crate) fn table_len(&self, module: &Module) -> Result<u32> {
        let declared = module.table().map(|table| table.initial).unwrap_or(0);
        let Some(dylink) = module.dylink() else {
            return Ok(declared);
        };

        let mut len = dylink.table_size.max(declared);
        if self.flags.contains(ProgramFlags::TABLE_AS_CACHE) {
            len = len.saturating_add(module.exported_functions().count() as u32);
        }

        let alignment = dylink.table_alignment.max(1);
        len.checked_next_multiple_of(alignment)
            .ok_or(LinkError::TableSpaceExhausted { needed: len })
    }

    /// Gets the name the root module exports a memory management routine with.
    pub(crate) fn root_memop_export(&self, name: Symbol) -> Symbol {
        if self.flags.contains(ProgramFlags::ROOT_IS_ASSEMBLYSCRIPT) {
            well_known::assemblyscript_alias(name).unwrap_or(name)
        } else {
            name
        }
    }

    pub(crate) fn root_stack_pointer_export(&self) -> Symbol {
        if self.flags.contains(ProgramFlags::ROOT_IS_ASSEMBLYSCRIPT) {
            well_known::USER_STACK_POINTER
        } else {
            well_known::STACK_POINTER
        }
    }

    /// Checks that the root module exports what dependencies rely on under the program's flags,
    /// logging a warning for everything that is missing.
    ///
    /// Returns `true` if nothing is missing.
    pub fn validate_mode_compatibility(&self, runtime: &Runtime) -> bool {
        let root = self.root().module();
        let mut compatible = true;

        if self.memop_source() == MemopSource::Root {
            for memop in [well_known::MALLOC, well_known::FREE, well_known::REALLOC] {
                let name = self.root_memop_export(memop);
                if root.export(name, ExportKind::Func).is_none() {
                    log::warn!(
                        "root module supplies memory operations, but does not export {:?}",
                        runtime.symbols().resolve(name)
                    );
                    compatible = false;
                }
            }
        }

        let stack_pointer = self.root_stack_pointer_export();
        if root.dylink().is_some() && root.export(stack_pointer, ExportKind::Global).is_none() {
            log::warn!(
                "root module does not export its stack pointer {:?}",
                runtime.symbols().resolve(stack_pointer)
            );
            compatible = false;
        }

        compatible
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        let referenced = self
            .instances
            .values()
            .filter(|instance| instance.id != InstanceId::ROOT)
            .filter(|instance| instance.export_refs > 0 || instance.import_refs > 0)
            .count();

        log::debug!(
            "destroying program with {} instances ({referenced} still referenced)",
            self.instances.len()
        );
    }
}
