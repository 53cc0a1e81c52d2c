//! Foundation types shared by the `wasmlink` crates.
//!
//! This crate provides the interned [`Symbol`] table used for every module, import and export
//! name, the function signatures compared during linking, the [`table_space`] addressing scheme
//! that maps 32-bit indirect-call slots to module instances, and the [`LinkError`] taxonomy.

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![deny(unreachable_pub)]
#![forbid(unsafe_code)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]

mod error;
pub mod symbol;
pub mod table_space;
pub mod types;

pub use error::LinkError;
pub use symbol::{Symbol, SymbolTable};
pub use types::{FuncType, ValType};

/// Result type used throughout the `wasmlink` crates.
pub type Result<T> = core::result::Result<T, LinkError>;
