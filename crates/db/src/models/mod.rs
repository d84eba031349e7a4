//! Domain model structs.
//!
//! Each submodule contains the domain struct handed around the dispatcher
//! and, where it differs, the `FromRow` struct matching the database row.

pub mod task;
