//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - `HttpClient` using `reqwest` with rustls
//!
//! The clock needs no desktop adapter; `bridge_traits::SystemClock` is used
//! directly.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let config = WhitelistConfig::builder()
//!     .whitelist_url("https://example.com/artists.json")
//!     .http_client(http_client)
//!     .build()?;
//! ```

mod http;

pub use http::ReqwestHttpClient;
