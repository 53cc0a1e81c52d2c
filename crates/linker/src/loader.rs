//! Loading and instantiation of dependencies.

use crate::instance::{GlobalValue, InstanceId, MemoryRegion, ModuleInstance, UNBOUND};
use crate::program::{BindingMode, DependencyHandle, Program, ProgramFlags};
use crate::runtime::Runtime;
use std::sync::Arc;
use wasmlink_core::{symbol, table_space, LinkError, Result, Symbol};
use wasmlink_module::{ConstExpr, Module, ModuleKind};

/// Loads the module with the given file `name`, or returns it if it was already loaded.
///
/// Modules are registered under their file name without its extension. A module that is not
/// registered yet is fetched with the [`ModuleReader`](crate::runtime::ModuleReader), after its
/// extension is [upgraded](Runtime::upgrade_extension) to match `expected_kind`.
///
/// # Errors
///
/// Returns [`LinkError::KindMismatch`] if the module was already loaded as a different kind,
/// [`LinkError::NotShared`] if the already loaded module is not a shared module,
/// [`LinkError::UnlinkedModule`] if the module could not be read (or the runtime is
/// [standalone](crate::RuntimeConfig::standalone)), or [`LinkError::Malformed`] if
/// it could not be parsed.
pub fn load_dependency(
    runtime: &mut Runtime,
    name: &str,
    expected_kind: ModuleKind,
) -> Result<Arc<Module>> {
    let key = runtime
        .symbols_mut()
        .intern_filename_without_extension(name.as_bytes())?;

    if let Some(existing) = runtime.find_module_by_name(key) {
        if existing.kind() != expected_kind {
            return Err(LinkError::KindMismatch {
                module: name.to_owned(),
                expected: expected_kind.name(),
                actual: existing.kind().name(),
            });
        }

        if !existing.is_shared() {
            return Err(LinkError::NotShared {
                module: name.to_owned(),
            });
        }

        return Ok(existing);
    }

    let unlinked = || LinkError::UnlinkedModule {
        module: name.to_owned(),
    };

    if runtime.config().standalone {
        log::debug!("standalone runtime cannot load module {name:?}");
        return Err(unlinked());
    }

    let file_name = runtime.upgrade_extension(name, expected_kind).into_owned();

    let bytes = runtime
        .reader()
        .ok_or_else(unlinked)?
        .read(&file_name)
        .map_err(|error| {
            log::debug!("could not read module {file_name:?}: {error}");
            unlinked()
        })?;

    let parsed = runtime.parse_module(&bytes, expected_kind);
    if let Some(reader) = runtime.reader() {
        reader.release(bytes);
    }

    let module = parsed.map_err(|error| LinkError::Malformed {
        module: name.to_owned(),
        message: format!("{error:#}"),
    })?;

    log::debug!("loaded {expected_kind} module {file_name:?}");
    Ok(runtime.register_module(key, module))
}

fn const_bits(expr: ConstExpr) -> u64 {
    match expr {
        ConstExpr::I32(value) => u64::from(value as u32),
        ConstExpr::I64(value) => value as u64,
        ConstExpr::F32(bits) => u64::from(bits),
        ConstExpr::F64(bits) => bits,
        ConstExpr::RefFunc(index) => u64::from(index),
        _ => u64::MAX,
    }
}

impl Program {
    /// Instantiates a shared module as a dependency of the program.
    ///
    /// The instance's indirect call table holds the module's declared table size, plus an entry for
    /// each exported function if [`ProgramFlags::TABLE_AS_CACHE`] is set, rounded up to the
    /// declared alignment. Its linear memory is allocated from the root module instance's heap.
    ///
    /// If a module instance with the same name already exists, its id is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotShared`] if the module is not a shared module,
    /// [`LinkError::OutOfMemory`] if its memory could not be allocated, or any error raised while
    /// linking its globals (and under [`BindingMode::Early`], its functions).
    pub fn instantiate_dependency(
        &mut self,
        runtime: &mut Runtime,
        module: Arc<Module>,
    ) -> Result<InstanceId> {
        let name = module.name();
        if let Some(existing) = name.and_then(|name| self.names.get(&name)) {
            return Ok(*existing);
        }

        let module_name = || {
            name.map(|name| runtime.symbols().resolve(name).to_owned())
                .unwrap_or_default()
        };

        let Some(dylink) = module.dylink() else {
            return Err(LinkError::NotShared {
                module: module_name(),
            });
        };

        let table_len = self.table_len(&module)?;
        let export_count = module.exported_functions().count() as u32;
        let mut needed = table_len;
        if !self.flags.contains(ProgramFlags::TABLE_AS_CACHE) {
            needed = needed.saturating_add(export_count);
        }

        if needed > table_space::SLOT_SIZE {
            return Err(LinkError::TableSpaceExhausted { needed });
        }

        let alignment = dylink.memory_alignment.max(1);
        let memory = if dylink.memory_size > 0 {
            let size = dylink
                .memory_size
                .checked_add(alignment - 1)
                .ok_or(LinkError::OutOfMemory {
                    requested: u32::MAX,
                })?;

            let allocation = self
                .heap
                .allocate(size)
                .ok_or(LinkError::OutOfMemory { requested: size })?;

            Some(MemoryRegion {
                allocation,
                base: allocation.next_multiple_of(alignment),
                size,
            })
        } else {
            None
        };

        let id = match self.alloc_instance_id() {
            Ok(id) => id,
            Err(error) => {
                if let Some(region) = memory {
                    self.heap.release(region.allocation);
                }
                return Err(error);
            }
        };

        log::debug!(
            "instantiating {:?} as {id} with {table_len} table entries",
            module_name()
        );

        let mut instance = ModuleInstance::new(id, name, module);
        instance.memory = memory;
        self.link_instance(runtime, instance, table_len)?;
        Ok(id)
    }

    /// Registers an instance in the program, then links its globals, fills its indirect call
    /// table, and under [`BindingMode::Early`] resolves all of its imported functions.
    ///
    /// A dependency that fails to link is reclaimed.
    pub(crate) fn link_instance(
        &mut self,
        runtime: &mut Runtime,
        mut instance: ModuleInstance,
        table_len: u32,
    ) -> Result<()> {
        let id = instance.id;
        table_space::region_for(id.get(), table_len)?;

        instance.table = vec![UNBOUND; table_len as usize];
        if self.flags.contains(ProgramFlags::TABLE_AS_CACHE) && instance.module.is_shared() {
            instance.export_cells = Some(table_len - instance.export_count());
        }

        if let Some(name) = instance.name {
            self.names.insert(name, id);
        }
        self.instances.insert(id, instance);

        let result = self.initialize_instance(runtime, id);
        if result.is_err() && id != InstanceId::ROOT {
            self.reclaim(id);
        }

        result
    }

    fn initialize_instance(&mut self, runtime: &mut Runtime, id: InstanceId) -> Result<()> {
        let module = self.get(id)?.module.clone();
        let defined = module.import_global_count() as usize;

        // Constant globals are set first, since `GOT.mem` imports may refer to them.
        let instance = self.get_mut(id)?;
        for (offset, global) in module.globals().iter().enumerate() {
            if !matches!(global.init, ConstExpr::GlobalGet(_)) {
                instance.globals[defined + offset].value =
                    GlobalValue::Value(const_bits(global.init));
            }
        }

        for index in 0..module.import_global_count() {
            self.resolve_got_global(runtime, id, index)?;
        }

        for (offset, global) in module.globals().iter().enumerate() {
            if let ConstExpr::GlobalGet(source) = global.init {
                let value = self
                    .global_bits(id, source)
                    .map(GlobalValue::Value)
                    .unwrap_or(GlobalValue::Host);

                self.get_mut(id)?.globals[defined + offset].value = value;
            }
        }

        let table_base = self.get(id)?.table_base();
        for segment in module.elements() {
            let offset = match segment.offset {
                ConstExpr::I32(offset) => offset as u32,
                ConstExpr::GlobalGet(global) => self.global_bits(id, global).unwrap_or(0) as u32,
                _ => 0,
            };

            // Offsets computed from `__table_base` are relative to the instance's region.
            let start = if offset >= table_base {
                offset - table_base
            } else {
                offset
            };

            let instance = self.get_mut(id)?;
            for (position, function) in segment.functions.iter().enumerate() {
                let local = start as usize + position;
                let cell = instance
                    .table
                    .get_mut(local)
                    .ok_or(LinkError::UndefinedElement {
                        slot: table_base + local as u32,
                    })?;

                *cell = function.unwrap_or(UNBOUND);
            }
        }

        if self.binding_mode() == BindingMode::Early {
            for index in 0..module.import_func_count() {
                self.resolve_import_call(runtime, id, index)?;
            }

            let instance = self.get_mut(id)?;
            if let Some(start) = instance.export_cells {
                for (export, function) in instance.export_functions.iter().enumerate() {
                    instance.table[start as usize + export] = *function;
                }
            }
        }

        Ok(())
    }

    /// Finds the module instance imported with the given module name, loading and instantiating
    /// the module if no such instance exists yet.
    pub(crate) fn find_or_instantiate(
        &mut self,
        runtime: &mut Runtime,
        module_name: Symbol,
        kind: ModuleKind,
    ) -> Result<(Symbol, InstanceId)> {
        let file_name = runtime.symbols().resolve(module_name).to_owned();
        let key = runtime
            .symbols_mut()
            .intern_str(symbol::strip_extension(&file_name));

        if let Some(id) = self.names.get(&key) {
            return Ok((key, *id));
        }

        let module = load_dependency(runtime, &file_name, kind)?;
        let id = self.instantiate_dependency(runtime, module)?;
        Ok((key, id))
    }

    /// Records that `importer` imports from the module instance `target` under the given name.
    ///
    /// The first time a name is recorded, the target's import count is incremented.
    pub(crate) fn record_resolved_import(
        &mut self,
        importer: InstanceId,
        name: Symbol,
        target: InstanceId,
    ) -> Result<()> {
        if importer == target {
            return Ok(());
        }

        let instance = self.get_mut(importer)?;
        if instance.resolved_imports.contains_key(&name) {
            return Ok(());
        }

        instance.resolved_imports.insert(name, target);
        let target = self.get_mut(target)?;
        target.import_refs += 1;
        log::trace!(
            "{importer} imports from {}, which now has {} importers",
            target.id,
            target.import_refs
        );
        Ok(())
    }

    /// Opens a dependency on behalf of the embedder, loading and instantiating it if needed.
    ///
    /// Each handle must be closed with [`Program::close_dependency()`].
    ///
    /// # Errors
    ///
    /// Returns an error if the dependency could not be loaded or instantiated.
    pub fn open_dependency(
        &mut self,
        runtime: &mut Runtime,
        name: &str,
    ) -> Result<DependencyHandle> {
        let name = runtime.symbols_mut().intern(name.as_bytes())?;
        let kind = self.root().module().kind();
        let (_, id) = self.find_or_instantiate(runtime, name, kind)?;

        let instance = self.get_mut(id)?;
        instance.export_refs += 1;
        log::debug!(
            "opened {id}, which now has {} open handles",
            instance.export_refs
        );
        Ok(DependencyHandle(id))
    }

    /// Gets the slot through which an exported function of an opened dependency is called
    /// indirectly.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnlinkedImport`] if the dependency does not export a function with
    /// the given name.
    pub fn lookup_exported_symbol_table_slot(
        &self,
        runtime: &Runtime,
        handle: DependencyHandle,
        name: &str,
    ) -> Result<u32> {
        let instance = self.get(handle.0)?;
        runtime
            .symbols()
            .get(name)
            .and_then(|symbol| instance.find_export(symbol))
            .map(|export| instance.export_slot(export))
            .ok_or_else(|| LinkError::UnlinkedImport {
                module: instance
                    .name
                    .map(|module| runtime.symbols().resolve(module).to_owned())
                    .unwrap_or_default(),
                field: name.to_owned(),
            })
    }
}
