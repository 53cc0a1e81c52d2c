//! Partitioning of the indirect call table space between module instances.
//!
//! Every function reachable through an indirect call is addressed by a 32-bit *slot*. The slot
//! space is split into fixed size regions of [`SLOT_SIZE`] slots, and the region used by a module
//! instance is computed from its id alone, so a slot can always be decoded back into the instance
//! that owns it and an index local to that instance.

use crate::LinkError;

/// The number of low bits of a slot that hold the index local to a module instance.
pub const TABLE_SPACE_BITS_LEN: u32 = 10;

/// The number of slots in the region given to each module instance.
pub const SLOT_SIZE: u32 = 1 << TABLE_SPACE_BITS_LEN;

/// Slots at or above this boundary are never given to ordinary module instances.
pub const TOP_BOUNDARY: u32 = 0x0fff_0000;

/// The largest id that can be given to a module instance.
pub const MAX_INSTANCE_ID: u32 = (TOP_BOUNDARY >> TABLE_SPACE_BITS_LEN) + 1;

/// The id of the module instance that every program starts with.
pub const ROOT_INSTANCE_ID: u32 = 1;

/// The id reserved for the builtin libc pseudo-module.
pub const BUILTIN_LIBC_INSTANCE_ID: u32 = MAX_INSTANCE_ID + 10;

/// The first slot of the region reserved for the builtin libc pseudo-module.
pub const BUILTIN_LIBC_REGION_START: u32 = (BUILTIN_LIBC_INSTANCE_ID - 1) << TABLE_SPACE_BITS_LEN;

/// Gets the first slot of the region belonging to the module instance with the given `id`.
///
/// # Errors
///
/// Returns [`LinkError::TableSpaceExhausted`] if the instance requires more than [`SLOT_SIZE`]
/// slots, or if `id` does not have a region.
pub fn region_for(id: u32, needed: u32) -> Result<u32, LinkError> {
    let valid_id =
        (ROOT_INSTANCE_ID..=MAX_INSTANCE_ID).contains(&id) || id == BUILTIN_LIBC_INSTANCE_ID;
    if needed > SLOT_SIZE || !valid_id {
        return Err(LinkError::TableSpaceExhausted { needed });
    }

    Ok(region_start(id))
}

const fn region_start(id: u32) -> u32 {
    (id - 1) << TABLE_SPACE_BITS_LEN
}

/// Gets the slot referring to an exported function.
///
/// The exported functions of a module instance occupy the top `export_count` slots of its region,
/// in the order they are exported.
pub fn export_slot(id: u32, export_count: u32, export_index: u32) -> u32 {
    debug_assert!(export_index < export_count && export_count <= SLOT_SIZE);
    region_start(id) + SLOT_SIZE - export_count + export_index
}

/// The module instance that a slot refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum SlotTarget {
    /// A slot in the region of the root module instance.
    Root {
        /// Index within the root module instance's region.
        local: u32,
    },
    /// A slot in the region of a dependency module instance.
    Instance {
        /// The id of the module instance.
        id: u32,
        /// Index within the module instance's region.
        local: u32,
    },
    /// A slot referring to a function in the builtin libc pseudo-module.
    Libc {
        /// Index into the program's builtin libc bindings.
        index: u32,
    },
}

impl SlotTarget {
    /// Decodes a slot.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UndefinedElement`] if the slot does not belong to any region.
    pub fn decode(slot: u32) -> Result<Self, LinkError> {
        if slot > i32::MAX as u32 {
            return Err(LinkError::UndefinedElement { slot });
        }

        let id = (slot >> TABLE_SPACE_BITS_LEN) + 1;
        let local = slot & (SLOT_SIZE - 1);
        match id {
            ROOT_INSTANCE_ID => Ok(Self::Root { local }),
            BUILTIN_LIBC_INSTANCE_ID => Ok(Self::Libc { index: local }),
            2..=MAX_INSTANCE_ID => Ok(Self::Instance { id, local }),
            _ => Err(LinkError::UndefinedElement { slot }),
        }
    }

    /// The id of the module instance that owns the slot.
    pub fn instance_id(&self) -> u32 {
        match self {
            Self::Root { .. } => ROOT_INSTANCE_ID,
            Self::Instance { id, .. } => *id,
            Self::Libc { .. } => BUILTIN_LIBC_INSTANCE_ID,
        }
    }

    /// The index of the slot within its region.
    pub fn local(&self) -> u32 {
        match self {
            Self::Root { local } | Self::Instance { local, .. } => *local,
            Self::Libc { index } => *index,
        }
    }

    /// Encodes the slot.
    pub fn encode(&self) -> u32 {
        region_start(self.instance_id()) + self.local()
    }
}
