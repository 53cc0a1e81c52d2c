/// Errors raised while loading, instantiating or linking WebAssembly modules.
///
/// Resolution failures are reported to the execution layer, which turns them into traps (see
/// [`LinkError::is_trap()`]). Names are stored as rendered strings so that an error remains
/// meaningful after the [`SymbolTable`](crate::SymbolTable) that produced it is gone.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum LinkError {
    /// A module, import or export name was not valid UTF-8.
    #[error("name is not valid UTF-8")]
    InvalidEncoding,
    /// An allocation from the root module's heap failed.
    #[error("out of memory while allocating {requested} bytes")]
    OutOfMemory {
        /// The number of bytes that were requested.
        requested: u32,
    },
    /// A dependency does not carry dynamic linking metadata.
    #[error("module {module:?} is not a shared module")]
    NotShared {
        /// Name of the module.
        module: String,
    },
    /// A module was already loaded, but is of a different kind than the one requested.
    #[error("module {module:?} was loaded as {actual}, but {expected} was expected")]
    KindMismatch {
        /// Name of the module.
        module: String,
        /// The kind of module the caller required.
        expected: &'static str,
        /// The kind of the module that was already loaded.
        actual: &'static str,
    },
    /// A required module could not be found or read.
    #[error("unlinked module {module:?}")]
    UnlinkedModule {
        /// Name of the module.
        module: String,
    },
    /// A required symbol could not be found in the module supplying it.
    #[error("unlinked import (import {module:?} {field:?})")]
    UnlinkedImport {
        /// Name of the module the symbol was imported from.
        module: String,
        /// Name of the symbol.
        field: String,
    },
    /// The type of an export did not match the type declared by the import.
    #[error(
        "type mismatch for (import {module:?} {field:?}), expected {expected} but got {actual}"
    )]
    TypeMismatch {
        /// Name of the module the symbol was imported from.
        module: String,
        /// Name of the symbol.
        field: String,
        /// The type declared by the import.
        expected: String,
        /// The type of the export that was found.
        actual: String,
    },
    /// The function referred to by an indirect call slot has an unexpected type.
    #[error("indirect call type mismatch for slot {slot:#X}")]
    IndirectCallTypeMismatch {
        /// The slot that was called.
        slot: u32,
    },
    /// An indirect call slot was not initialized.
    #[error("uninitialized element {slot:#X}")]
    UninitializedElement {
        /// The slot that was called.
        slot: u32,
    },
    /// An indirect call slot was out of bounds.
    #[error("undefined element {slot:#X}")]
    UndefinedElement {
        /// The slot that was called.
        slot: u32,
    },
    /// A module instance required more table slots than its region provides.
    #[error("table space exhausted, {needed} slots required")]
    TableSpaceExhausted {
        /// The number of slots that were required.
        needed: u32,
    },
    /// No module instance with the given id exists.
    #[error("module instance #{id} does not exist")]
    UnknownInstance {
        /// The id of the module instance.
        id: u32,
    },
    /// No more module instance ids are available.
    #[error("no more module instance ids are available")]
    InstanceIdsExhausted,
    /// A module binary could not be decoded.
    #[error("could not load module {module:?}: {message}")]
    Malformed {
        /// Name of the module.
        module: String,
        /// Description of the decoding error.
        message: String,
    },
}

impl LinkError {
    /// Returns `true` if the error is raised while resolving a call, and should be reported as a
    /// trap by the execution layer.
    pub fn is_trap(&self) -> bool {
        matches!(
            self,
            Self::UnlinkedModule { .. }
                | Self::UnlinkedImport { .. }
                | Self::TypeMismatch { .. }
                | Self::IndirectCallTypeMismatch { .. }
                | Self::UninitializedElement { .. }
                | Self::UndefinedElement { .. }
        )
    }
}
