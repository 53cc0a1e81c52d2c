//! A small direct-mapped cache of resolved indirect calls.

use crate::instance::{Callee, InstanceId};

/// The number of lines in a [`ResolvingCache`].
pub const LINE_COUNT: usize = 16;

/// The number of entries in each line of a [`ResolvingCache`].
pub const LINE_LEN: usize = 2;

/// A cached result of an indirect call resolution.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct CacheEntry {
    /// The slot that was called.
    pub slot: u32,
    /// The function that the slot resolved to.
    pub callee: Callee,
    /// The module instance that owns the function.
    pub instance: InstanceId,
}

/// Caches the targets of indirect calls that cross module instance boundaries.
///
/// Entries are keyed by the low bits of the slot. Each line holds two entries; inserting into a
/// full line evicts the first.
#[derive(Clone, Debug, Default)]
pub struct ResolvingCache {
    lines: [[Option<CacheEntry>; LINE_LEN]; LINE_COUNT],
}

impl ResolvingCache {
    fn line_index(slot: u32) -> usize {
        slot as usize & (LINE_COUNT - 1)
    }

    /// Looks up the entry for a slot.
    pub fn lookup(&self, slot: u32) -> Option<&CacheEntry> {
        self.lines[Self::line_index(slot)]
            .iter()
            .flatten()
            .find(|entry| entry.slot == slot)
    }

    /// Inserts an entry into the line for `slot`, replacing an existing entry for the same slot.
    pub fn insert(&mut self, slot: u32, callee: Callee, instance: InstanceId) {
        let line = &mut self.lines[Self::line_index(slot)];
        let entry = Some(CacheEntry {
            slot,
            callee,
            instance,
        });

        let way = line
            .iter()
            .position(|existing| matches!(existing, Some(existing) if existing.slot == slot))
            .or_else(|| line.iter().position(Option::is_none))
            .unwrap_or(0);

        line[way] = entry;
    }

    /// Removes every entry that refers to a module instance.
    pub fn invalidate(&mut self, instance: InstanceId) {
        for entry in self.lines.iter_mut().flatten() {
            let stale = entry.is_some_and(|cached| {
                cached.instance == instance || cached.callee.instance() == Some(instance)
            });

            if stale {
                *entry = None;
            }
        }
    }

    /// The number of cached entries.
    pub fn len(&self) -> usize {
        self.lines.iter().flatten().flatten().count()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
