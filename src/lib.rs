//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `whitelist-workspace`,
//! enable `desktop-shims`, and reach the service façade through the
//! re-export below without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
