//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - Multi-statement writes run inside a single transaction
//!
//! ## Available Repositories
//!
//! - `CatalogRepository` - Songs, albums, artists and playlists with their mappings
//! - `WhitelistStore` - Snapshot persistence and the cascading purge used by the
//!   whitelist sync engine

pub mod catalog;
pub mod whitelist;

pub use catalog::{CatalogCounts, CatalogRepository, SqliteCatalogRepository};
pub use whitelist::{SqliteWhitelistStore, WhitelistStore};
