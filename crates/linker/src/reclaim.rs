//! Reclamation of module instances that are no longer referenced.

use crate::instance::InstanceId;
use crate::program::{DependencyHandle, Program};

impl Program {
    /// Closes a handle returned by [`Program::open_dependency()`].
    ///
    /// Once a module instance is neither imported from nor held open by the embedder, it is
    /// removed along with every dependency that only it referred to. Closing a handle to an
    /// instance that no longer exists does nothing.
    pub fn close_dependency(&mut self, handle: DependencyHandle) {
        let Some(instance) = self.instances.get_mut(&handle.0) else {
            return;
        };

        instance.export_refs = instance.export_refs.saturating_sub(1);
        let removed = self.reclaim(handle.0);
        log::debug!("closed {}, reclaiming {removed} instances", handle.0);
    }

    /// Removes an unreferenced module instance and every dependency left unreferenced by its
    /// removal, returning the number of instances removed.
    ///
    /// The root module instance is never removed.
    pub(crate) fn reclaim(&mut self, id: InstanceId) -> usize {
        if id == InstanceId::ROOT {
            return 0;
        }

        match self.instances.get(&id) {
            Some(instance) if instance.export_refs == 0 && instance.import_refs == 0 => (),
            _ => return 0,
        }

        let mut worklist = vec![id];
        let mut cursor = 0;
        while let Some(current) = worklist.get(cursor).copied() {
            cursor += 1;

            let dependencies = self
                .instances
                .get(&current)
                .map(|instance| instance.resolved_imports.values().copied().collect::<Vec<_>>())
                .unwrap_or_default();

            for dependency in dependencies {
                let Some(instance) = self.instances.get_mut(&dependency) else {
                    continue;
                };

                instance.import_refs = instance.import_refs.saturating_sub(1);
                let unreferenced = instance.import_refs == 0 && instance.export_refs == 0;
                if unreferenced
                    && dependency != InstanceId::ROOT
                    && !worklist.contains(&dependency)
                {
                    worklist.push(dependency);
                }
            }
        }

        let mut removed = 0;
        for id in worklist {
            let open = self
                .instances
                .get(&id)
                .is_some_and(|instance| instance.export_refs > 0);

            if !open {
                self.remove_instance(id);
                removed += 1;
            }
        }

        removed
    }

    fn remove_instance(&mut self, id: InstanceId) {
        self.cache.invalidate(id);

        let Some(instance) = self.free_instance_id(id) else {
            return;
        };

        if let Some(region) = instance.memory {
            self.heap.release(region.allocation);
        }

        if let Some(name) = instance.name {
            if self.names.get(&name) == Some(&id) {
                self.names.remove(&name);
            }
        }

        log::debug!("reclaimed module instance {id}");
    }
}
