//! # Library Management Module
//!
//! Owns the local music catalog database and the persisted whitelist snapshot.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite connection pooling and schema migrations
//! - Catalog models (songs, albums, artists, playlists) and their repository
//! - The whitelist storage contract used by the sync engine, with a
//!   transactional SQLite implementation of the cascading purge

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result, StorageError, StorageResult};
