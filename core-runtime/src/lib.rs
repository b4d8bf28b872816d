//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the whitelist engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! Every other core crate depends on this one for its configuration types and
//! for the conventions used when emitting logs and events.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{FeatureFlags, FetchRetryPolicy, WhitelistConfig, WhitelistConfigBuilder};
pub use error::{Error, Result};
