//! Dynamic linker for programs made of multiple WebAssembly modules.
//!
//! A [`Program`] starts from a root module, and loads the shared modules it depends on through the
//! [`Runtime`]'s [`ModuleReader`]. Each module instance is given its own region of a 32-bit table
//! space, so that function pointers remain valid across module boundaries, and its own range of
//! the root module instance's linear memory.
//!
//! Imported functions are resolved with [`Program::resolve_import_call()`], and indirect calls
//! with [`Program::resolve_indirect_call()`]. The execution layer is expected to call these when
//! a call is first made (or when a module is instantiated, under [`BindingMode::Early`]), and to
//! turn any [`LinkError`] into a trap.

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![deny(unreachable_pub)]
#![forbid(unsafe_code)]
#![deny(clippy::exhaustive_enums)]

pub mod cache;
pub mod heap;
pub mod libc;
pub mod runtime;

mod indirect;
mod instance;
mod loader;
mod program;
mod reclaim;
mod resolve;

pub use heap::{FreeListHeap, RootHeap};
pub use instance::{
    Callee, GlobalInstance, GlobalValue, InstanceId, MemoryRegion, ModuleInstance, UNBOUND,
};
pub use loader::load_dependency;
pub use program::{
    BindingMode, DependencyHandle, MemopSource, Program, ProgramFlags, ProgramOptions,
};
pub use runtime::{
    DirectoryReader, MemoryReader, ModuleLoader, ModuleReader, Runtime, RuntimeConfig, WasmLoader,
};
pub use wasmlink_core::{FuncType, LinkError, Result, Symbol, SymbolTable, ValType};
pub use wasmlink_module::{Module, ModuleKind};
