//! Resolution of indirect calls through the shared table space.

use crate::instance::{Callee, InstanceId, UNBOUND};
use crate::program::{BindingMode, Program, ProgramFlags};
use crate::runtime::Runtime;
use wasmlink_core::table_space::{self, SlotTarget};
use wasmlink_core::{FuncType, LinkError, Result};

impl Program {
    /// Resolves the function that an indirect call through `slot` made by the `caller` refers to.
    ///
    /// The slot is decoded into the module instance owning it, whose indirect call table is then
    /// consulted. Calls that cross module instance boundaries are cached if
    /// [`ProgramFlags::RESOLVING_CACHE`] is set.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UndefinedElement`] if the slot does not refer to a function,
    /// [`LinkError::UninitializedElement`] if the table entry was never set, or
    /// [`LinkError::IndirectCallTypeMismatch`] if the function does not have the `expected` type.
    pub fn resolve_indirect_call(
        &mut self,
        runtime: &mut Runtime,
        caller: InstanceId,
        slot: u32,
        expected: &FuncType,
    ) -> Result<Callee> {
        let owner = match SlotTarget::decode(slot)? {
            SlotTarget::Libc { index } => {
                self.libc.check_type(index, expected, slot)?;
                return Ok(Callee::Native { index });
            }
            SlotTarget::Root { local: 0 } => return Err(LinkError::UninitializedElement { slot }),
            SlotTarget::Root { .. } => InstanceId::ROOT,
            SlotTarget::Instance { id, .. } => InstanceId::new(id),
        };

        let cached = owner != caller && self.flags.contains(ProgramFlags::RESOLVING_CACHE);
        if cached {
            if let Some(entry) = self.cache.lookup(slot).copied() {
                return if self.callee_type(&entry.callee) == Some(expected) {
                    Ok(entry.callee)
                } else {
                    Err(LinkError::IndirectCallTypeMismatch { slot })
                };
            }
        }

        let function = self.bind_local(owner, slot & (table_space::SLOT_SIZE - 1), slot)?;
        let instance = self.get(owner)?;
        if function >= instance.module.function_count() {
            return Err(LinkError::UndefinedElement { slot });
        }

        if instance.func_type(function) != Some(expected) {
            return Err(LinkError::IndirectCallTypeMismatch { slot });
        }

        let callee = if instance.is_import(function) {
            self.resolve_import_call(runtime, owner, function)?
        } else {
            Callee::Function {
                instance: owner,
                index: function,
            }
        };

        if cached {
            self.cache.insert(slot, callee, owner);
        }

        Ok(callee)
    }

    /// Gets the function index stored at `local` in the region of the `owner` instance.
    ///
    /// Locals at the top of the region refer to exported functions. When the instance keeps
    /// cells for its exports in its table, those cells are filled on first use under
    /// [`BindingMode::Lazy`].
    fn bind_local(&mut self, owner: InstanceId, local: u32, slot: u32) -> Result<u32> {
        let lazy = self.binding_mode() == BindingMode::Lazy;
        let instance = self
            .instances
            .get_mut(&owner)
            .ok_or(LinkError::UndefinedElement { slot })?;

        let table_len = instance.table.len() as u32;
        let export_start = table_space::SLOT_SIZE.saturating_sub(instance.export_count());
        // Export slots take precedence over table entries that reach the top of the region.
        let cell = match instance.export_cells {
            Some(start) if local >= export_start => start + (local - export_start),
            _ if local < table_len => local,
            None if local >= export_start => {
                return instance
                    .export_functions
                    .get((local - export_start) as usize)
                    .copied()
                    .ok_or(LinkError::UndefinedElement { slot })
            }
            _ => return Err(LinkError::UndefinedElement { slot }),
        };

        let bound = instance
            .table
            .get(cell as usize)
            .copied()
            .ok_or(LinkError::UndefinedElement { slot })?;

        if bound != UNBOUND {
            return Ok(bound);
        }

        let export = instance
            .export_cells
            .and_then(|start| cell.checked_sub(start))
            .and_then(|export| instance.export_functions.get(export as usize).copied());

        match export {
            Some(function) if lazy => {
                log::trace!("binding slot {slot:#X} of {owner} to function {function}");
                instance.table[cell as usize] = function;
                Ok(function)
            }
            _ => Err(LinkError::UninitializedElement { slot }),
        }
    }

    fn callee_type(&self, callee: &Callee) -> Option<&FuncType> {
        match callee {
            Callee::Function { instance, index } | Callee::Host { instance, index } => {
                self.instances.get(instance)?.func_type(*index)
            }
            Callee::Native { index } => self.libc.get(*index)?.ty.as_ref(),
        }
    }
}
