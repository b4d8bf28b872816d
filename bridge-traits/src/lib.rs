//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the whitelist core and
//! platform-specific implementations. The core needs very little from its
//! host: a way to read a published document over HTTP and a time source.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP GET with retry and TLS handled by the host
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive error when a required capability is
//! missing, e.g. when no `HttpClient` was injected and the desktop adapters
//! are disabled:
//!
//! ```ignore
//! let http_client = config.http_client
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "HttpClient".to_string(),
//!         message: "Enable `desktop-shims` or inject an adapter".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should classify transport failures as `Timeout` or `Connection` so the
//! sync layer can decide whether a retry makes sense.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so one adapter instance can be
//! shared by the startup sync, the background loop and manual refreshes.

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
