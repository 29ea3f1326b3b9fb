//! Test-only adapters that live inside the domain crate for convenience.
//!
//! These are intended purely for unit testing and local demos. Real adapters
//! (the hosted table store, etc.) live in separate crates.

pub mod memory_repo;
