//! Resolution of imported functions and globals.

use crate::instance::{Callee, GlobalValue, InstanceId};
use crate::libc::LibcBindings;
use crate::program::{MemopSource, Program};
use crate::runtime::Runtime;
use wasmlink_core::symbol::well_known;
use wasmlink_core::{LinkError, Result, Symbol, ValType};
use wasmlink_module::{ExportKind, ImportDesc};

fn unlinked(runtime: &Runtime, module: Symbol, field: Symbol) -> LinkError {
    LinkError::UnlinkedImport {
        module: runtime.symbols().resolve(module).to_owned(),
        field: runtime.symbols().resolve(field).to_owned(),
    }
}

fn global_type(ty: ValType, mutable: bool) -> String {
    if mutable {
        format!("(mut {ty})")
    } else {
        ty.to_string()
    }
}

impl Program {
    /// Resolves the function that a call to `func_index` in the `caller` instance refers to.
    ///
    /// Imports are followed through every module that re-exports them, and the result is stored
    /// for the caller and every module along the way. Modules that have not been instantiated yet
    /// are loaded on demand.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnlinkedImport`] if an import could not be found,
    /// [`LinkError::TypeMismatch`] if an export has a different type than its import, or any error
    /// raised while loading a module.
    pub fn resolve_import_call(
        &mut self,
        runtime: &mut Runtime,
        caller: InstanceId,
        func_index: u32,
    ) -> Result<Callee> {
        let instance = self.get(caller)?;
        if !instance.is_import(func_index) {
            return Ok(Callee::Function {
                instance: caller,
                index: func_index,
            });
        }

        if let Some(link) = instance.import_link(func_index) {
            return Ok(link);
        }

        let mut hops = Vec::<(InstanceId, u32)>::new();
        let (mut current, mut index) = (caller, func_index);
        let callee = loop {
            let module = self.get(current)?.module.clone();
            let Some((import, import_ty)) = module.func_import(index) else {
                break Callee::Function {
                    instance: current,
                    index,
                };
            };

            if hops.contains(&(current, index)) {
                log::debug!("import cycle detected at {current} function {index}");
                return Err(unlinked(runtime, import.module, import.field));
            }

            hops.push((current, index));

            let (target, export_name) = if import.module == well_known::ENV {
                if !well_known::is_memop(import.field) {
                    break Callee::Host {
                        instance: current,
                        index,
                    };
                }

                match self.memop_source() {
                    MemopSource::BuiltinLibc => {
                        let binding = self
                            .libc
                            .bind(runtime.symbols(), import.field)
                            .ok_or_else(|| unlinked(runtime, import.module, import.field))?;

                        if let Err(mismatch) = self.libc.check_type(binding, import_ty, 0) {
                            log::debug!("{mismatch}");
                            let actual = self
                                .libc
                                .get(binding)
                                .and_then(|binding| binding.ty.as_ref())
                                .map(ToString::to_string)
                                .unwrap_or_default();

                            return Err(LinkError::TypeMismatch {
                                module: runtime.symbols().resolve(import.module).to_owned(),
                                field: runtime.symbols().resolve(import.field).to_owned(),
                                expected: import_ty.to_string(),
                                actual,
                            });
                        }

                        break Callee::Native { index: binding };
                    }
                    MemopSource::Root if current == InstanceId::ROOT => {
                        break Callee::Host {
                            instance: current,
                            index,
                        };
                    }
                    MemopSource::Root => (InstanceId::ROOT, self.root_memop_export(import.field)),
                }
            } else {
                let (key, target) =
                    self.find_or_instantiate(runtime, import.module, module.kind())?;
                self.record_resolved_import(current, key, target)?;
                (target, import.field)
            };

            let supplier = self.get(target)?;
            let function = supplier
                .find_export(export_name)
                .and_then(|export| supplier.export_functions.get(export as usize).copied())
                .ok_or_else(|| unlinked(runtime, import.module, import.field))?;

            let export_ty = supplier
                .func_type(function)
                .ok_or_else(|| unlinked(runtime, import.module, import.field))?;

            if export_ty != import_ty {
                return Err(LinkError::TypeMismatch {
                    module: runtime.symbols().resolve(import.module).to_owned(),
                    field: runtime.symbols().resolve(import.field).to_owned(),
                    expected: import_ty.to_string(),
                    actual: export_ty.to_string(),
                });
            }

            if !supplier.is_import(function) {
                break Callee::Function {
                    instance: target,
                    index: function,
                };
            }

            if let Some(link) = supplier.import_link(function) {
                break link;
            }

            current = target;
            index = function;
        };

        for (id, index) in hops {
            if let Some(link) = self
                .instances
                .get_mut(&id)
                .and_then(|instance| instance.import_links.get_mut(index as usize))
            {
                *link = Some(callee);
            }
        }

        log::trace!("{caller} function {func_index} resolved to {callee:?}");
        Ok(callee)
    }

    /// Links an imported global of a module instance, storing and returning its value.
    ///
    /// Besides globals exported by other modules, this handles the globals that the dynamic
    /// linking convention expects the linker to supply: `__memory_base`, `__table_base`,
    /// `__stack_pointer`, and the `GOT.func` and `GOT.mem` entries used to take the address of
    /// functions and data.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnlinkedImport`] if the global could not be found, or
    /// [`LinkError::TypeMismatch`] if the export has a different type than the import.
    pub fn resolve_got_global(
        &mut self,
        runtime: &mut Runtime,
        id: InstanceId,
        global_index: u32,
    ) -> Result<GlobalValue> {
        let instance = self.get(id)?;
        let module = instance.module.clone();
        let Some(import) = module.global_imports().nth(global_index as usize) else {
            return instance
                .globals
                .get(global_index as usize)
                .map(|global| global.value)
                .ok_or_else(|| LinkError::UnknownInstance { id: id.get() });
        };

        let ImportDesc::Global { ty, mutable } = import.desc else {
            return Ok(GlobalValue::Host);
        };

        let value = match import.module {
            well_known::ENV => match import.field {
                well_known::STACK_POINTER if id != InstanceId::ROOT => {
                    let root = self.root();
                    let name = self.root_stack_pointer_export();
                    let exported = root
                        .module
                        .export(name, ExportKind::Global)
                        .and_then(|export| {
                            Some((export.index, root.globals.get(export.index as usize)?))
                        });

                    match exported {
                        Some((_, global)) if global.ty != ty || global.mutable != mutable => {
                            return Err(LinkError::TypeMismatch {
                                module: runtime.symbols().resolve(import.module).to_owned(),
                                field: runtime.symbols().resolve(import.field).to_owned(),
                                expected: global_type(ty, mutable),
                                actual: global_type(global.ty, global.mutable),
                            });
                        }
                        Some((index, _)) if mutable => GlobalValue::Alias {
                            instance: InstanceId::ROOT,
                            index,
                        },
                        Some((index, _)) => self
                            .global_bits(InstanceId::ROOT, index)
                            .map(GlobalValue::Value)
                            .unwrap_or(GlobalValue::Host),
                        None => GlobalValue::Host,
                    }
                }
                well_known::MEMORY_BASE => GlobalValue::Value(u64::from(instance.memory_base())),
                well_known::TABLE_BASE => GlobalValue::Value(u64::from(instance.table_base())),
                _ => GlobalValue::Host,
            },
            well_known::GOT_FUNC => {
                GlobalValue::Value(u64::from(self.got_func_slot(runtime, id, import.field)?))
            }
            well_known::GOT_MEM => {
                GlobalValue::Value(u64::from(self.got_mem_address(runtime, id, import.field)?))
            }
            other => {
                let (key, target) = self.find_or_instantiate(runtime, other, module.kind())?;
                self.record_resolved_import(id, key, target)?;

                let supplier = self.get(target)?;
                let (index, exported) = supplier
                    .module
                    .export(import.field, ExportKind::Global)
                    .and_then(|export| {
                        Some((export.index, supplier.globals.get(export.index as usize)?))
                    })
                    .ok_or_else(|| unlinked(runtime, import.module, import.field))?;

                if exported.ty != ty || exported.mutable != mutable {
                    return Err(LinkError::TypeMismatch {
                        module: runtime.symbols().resolve(import.module).to_owned(),
                        field: runtime.symbols().resolve(import.field).to_owned(),
                        expected: global_type(ty, mutable),
                        actual: global_type(exported.ty, exported.mutable),
                    });
                }

                if mutable {
                    GlobalValue::Alias {
                        instance: target,
                        index,
                    }
                } else {
                    self.global_bits(target, index)
                        .map(GlobalValue::Value)
                        .ok_or_else(|| unlinked(runtime, import.module, import.field))?
                }
            }
        };

        if let Some(global) = self.get_mut(id)?.globals.get_mut(global_index as usize) {
            global.value = value;
        }

        Ok(value)
    }

    /// Gets the bit pattern of a global's value, following aliases to other module instances.
    ///
    /// Returns `None` if the global is supplied by the embedder or has not been linked.
    pub fn global_bits(&self, id: InstanceId, index: u32) -> Option<u64> {
        let (mut id, mut index) = (id, index);
        for _ in 0..=self.instances.len() {
            match self.instances.get(&id)?.globals.get(index as usize)?.value {
                GlobalValue::Value(bits) => return Some(bits),
                GlobalValue::Alias {
                    instance,
                    index: aliased,
                } => {
                    id = instance;
                    index = aliased;
                }
                GlobalValue::Host | GlobalValue::Unresolved => return None,
            }
        }

        None
    }

    /// The order in which module instances are searched for `GOT` entries: the instance itself,
    /// then the root, then every other instance.
    fn got_search_order(&self, id: InstanceId) -> Vec<InstanceId> {
        let mut order = vec![id];
        if id != InstanceId::ROOT {
            order.push(InstanceId::ROOT);
        }

        order.extend(
            self.instances
                .keys()
                .copied()
                .filter(|other| *other != id && *other != InstanceId::ROOT),
        );
        order
    }

    fn got_func_slot(&mut self, runtime: &Runtime, id: InstanceId, field: Symbol) -> Result<u32> {
        match self.memop_source() {
            MemopSource::Root if well_known::is_memop(field) => {
                let root = self.root();
                if let Some(export) = root.find_export(self.root_memop_export(field)) {
                    return Ok(root.export_slot(export));
                }
            }
            MemopSource::BuiltinLibc => {
                if let Some(binding) = self.libc.bind(runtime.symbols(), field) {
                    return Ok(LibcBindings::slot(binding));
                }
            }
            MemopSource::Root => (),
        }

        for candidate in self.got_search_order(id) {
            let instance = self.get(candidate)?;
            if let Some(export) = instance.find_export(field) {
                let slot = instance.export_slot(export);
                self.record_got_supplier(id, candidate)?;
                return Ok(slot);
            }
        }

        Err(unlinked(runtime, well_known::GOT_FUNC, field))
    }

    fn got_mem_address(
        &mut self,
        runtime: &Runtime,
        id: InstanceId,
        field: Symbol,
    ) -> Result<u32> {
        for candidate in self.got_search_order(id) {
            let instance = self.get(candidate)?;
            let Some(export) = instance.module.export(field, ExportKind::Global) else {
                continue;
            };

            let address = self
                .global_bits(candidate, export.index)
                .ok_or_else(|| unlinked(runtime, well_known::GOT_MEM, field))?;

            let base = if instance.module.is_shared() {
                instance.memory_base()
            } else {
                0
            };

            self.record_got_supplier(id, candidate)?;
            return Ok((address as u32).wrapping_add(base));
        }

        Err(unlinked(runtime, well_known::GOT_MEM, field))
    }

    /// Records that `holder` keeps the address of a function or data of `supplier`, so that the
    /// supplier is not reclaimed while the address is in use.
    fn record_got_supplier(&mut self, holder: InstanceId, supplier: InstanceId) -> Result<()> {
        if supplier == InstanceId::ROOT {
            return Ok(());
        }

        match self.get(supplier)?.name {
            Some(name) => self.record_resolved_import(holder, name, supplier),
            None => Ok(()),
        }
    }
}
