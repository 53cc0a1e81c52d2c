//! Unit tests for [`wasmlink_core`].

mod table_space;
