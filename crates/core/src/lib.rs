//! Domain types shared by every relay crate.
//!
//! Lives at the bottom of the dependency graph: no internal deps, no I/O.
//! Holds the task lifecycle vocabulary, the closed set of service types with
//! their workflow templates, and the backend selection rule.

pub mod error;
pub mod scheduling;
pub mod service;
pub mod task;
pub mod types;
pub mod workflows;
