//! # Core Configuration Module
//!
//! Provides configuration management for the whitelist sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `WhitelistConfig` instance that holds the injected bridges and all sync
//! settings. It enforces fail-fast validation so a bad URL or an out-of-range
//! timeout is reported before any sync work starts.
//!
//! ## Required Settings
//!
//! - `whitelist_url` - HTTP(S) location of the published artist list
//! - `database_path` - SQLite file holding the catalog and the snapshot
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `Clock` - Time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::WhitelistConfig;
//! use std::time::Duration;
//!
//! let config = WhitelistConfig::builder()
//!     .whitelist_url("https://cdn.example.com/approved-artists.json")
//!     .database_path("/path/to/library.db")
//!     .startup_timeout(Duration::from_secs(3))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! The builder names the offending setting in every error:
//!
//! ```should_panic
//! use core_runtime::config::WhitelistConfig;
//!
//! let config = WhitelistConfig::builder()
//!     .database_path("/path/to/library.db")
//!     .build()
//!     .expect("Should fail - missing whitelist URL");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default wait for the startup sync before the app proceeds with the
/// persisted snapshot.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound accepted for the startup timeout.
pub const MAX_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default period of the background sync loop.
pub const DEFAULT_BACKGROUND_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default per-request fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry policy for fetching the remote whitelist.
///
/// Only transient failures are retried. Delays grow exponentially from
/// `base_delay` and never exceed `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl FetchRetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before the next attempt, given the 1-based attempt that failed.
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "retry_policy.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::Config(
                "retry_policy.base_delay must not exceed retry_policy.max_delay".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FetchRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run the recurring background sync after startup
    pub enable_background_sync: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_sync: true,
        }
    }
}

/// Configuration for the whitelist sync engine.
///
/// Use [`WhitelistConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct WhitelistConfig {
    /// Location of the published artist list
    pub whitelist_url: String,

    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// How long the startup sync may block readiness
    pub startup_timeout: Duration,

    /// Period of the background loop
    pub background_interval: Duration,

    /// Timeout for a single fetch of the remote list
    pub fetch_timeout: Duration,

    /// Retry policy for transient fetch failures
    pub retry_policy: FetchRetryPolicy,

    /// HTTP client used by the fetcher
    pub http_client: Arc<dyn HttpClient>,

    /// Time source for snapshot and state timestamps
    pub clock: Arc<dyn Clock>,

    /// Features flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for WhitelistConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitelistConfig")
            .field("whitelist_url", &crate::logging::redact_url(&self.whitelist_url))
            .field("database_path", &self.database_path)
            .field("startup_timeout", &self.startup_timeout)
            .field("background_interval", &self.background_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("http_client", &"HttpClient { ... }")
            .field("clock", &"Clock { ... }")
            .field("features", &self.features)
            .finish()
    }
}

impl WhitelistConfig {
    /// Creates a new builder for constructing a `WhitelistConfig`.
    pub fn builder() -> WhitelistConfigBuilder {
        WhitelistConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The whitelist URL is an absolute http(s) URL
    /// - Database path is not empty
    /// - Startup timeout lies within 1 ms ..= 60 s
    /// - Background interval and fetch timeout are non-zero
    /// - Retry policy is consistent
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.whitelist_url)?;

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.startup_timeout < Duration::from_millis(1) {
            return Err(Error::Config(
                "startup_timeout must be at least 1 ms".to_string(),
            ));
        }

        if self.startup_timeout > MAX_STARTUP_TIMEOUT {
            return Err(Error::Config(
                "startup_timeout exceeds maximum of 60 seconds".to_string(),
            ));
        }

        if self.background_interval.is_zero() {
            return Err(Error::Config(
                "background_interval must be greater than zero".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(Error::Config(
                "fetch_timeout must be greater than zero".to_string(),
            ));
        }

        self.retry_policy.validate()
    }
}

fn validate_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            Error::Config(format!(
                "whitelist_url must use http or https, got '{}'",
                crate::logging::redact_url(url)
            ))
        })?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(Error::Config(
            "whitelist_url is missing a host".to_string(),
        ));
    }

    Ok(())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(fetch_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(fetch_timeout)
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_fetch_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "An HttpClient is required to fetch the artist whitelist. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Other hosts: inject a platform-native client with .http_client()."
            .to_string(),
    })
}

/// Builder for constructing [`WhitelistConfig`] instances.
///
/// Unset durations fall back to the module defaults; the URL and database
/// path are required.
#[derive(Default)]
pub struct WhitelistConfigBuilder {
    whitelist_url: Option<String>,
    database_path: Option<PathBuf>,
    startup_timeout: Option<Duration>,
    background_interval: Option<Duration>,
    fetch_timeout: Option<Duration>,
    retry_policy: Option<FetchRetryPolicy>,
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl WhitelistConfigBuilder {
    /// Sets the URL of the published artist list.
    pub fn whitelist_url(mut self, url: impl Into<String>) -> Self {
        self.whitelist_url = Some(url.into());
        self
    }

    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::WhitelistConfig;
    ///
    /// let builder = WhitelistConfig::builder()
    ///     .database_path("/path/to/library.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets how long the startup sync may block. Default: 5 s.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Sets the period of the background loop. Default: 1 h.
    pub fn background_interval(mut self, interval: Duration) -> Self {
        self.background_interval = Some(interval);
        self
    }

    /// Sets the timeout of one fetch attempt. Default: 10 s.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, policy: FetchRetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables or disables the recurring background sync.
    ///
    /// Default: true
    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `WhitelistConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when a required setting is missing or out of range
    /// - `Error::CapabilityMissing` when no `HttpClient` was injected and no
    ///   platform default is available
    pub fn build(self) -> Result<WhitelistConfig> {
        let whitelist_url = self.whitelist_url.ok_or_else(|| {
            Error::Config(
                "whitelist_url is required. Use .whitelist_url() to set it.".to_string(),
            )
        })?;

        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let fetch_timeout = self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT);

        // Validate before touching platform defaults.
        validate_url(&whitelist_url)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(fetch_timeout)?,
        };

        let config = WhitelistConfig {
            whitelist_url,
            database_path,
            startup_timeout: self.startup_timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT),
            background_interval: self
                .background_interval
                .unwrap_or(DEFAULT_BACKGROUND_INTERVAL),
            fetch_timeout,
            retry_policy: self.retry_policy.unwrap_or_default(),
            http_client,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse};

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            Err(BridgeError::NotAvailable("mock".to_string()))
        }
    }

    fn builder() -> WhitelistConfigBuilder {
        WhitelistConfig::builder()
            .whitelist_url("https://cdn.example.com/artists.json")
            .database_path("/tmp/library.db")
            .http_client(Arc::new(MockHttpClient))
    }

    #[test]
    fn test_builder_applies_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.startup_timeout, DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(config.background_interval, Duration::from_secs(3600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_policy, FetchRetryPolicy::default());
        assert!(config.features.enable_background_sync);
    }

    #[test]
    fn test_builder_requires_whitelist_url() {
        let result = WhitelistConfig::builder()
            .database_path("/tmp/library.db")
            .http_client(Arc::new(MockHttpClient))
            .build();

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("whitelist_url")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_requires_database_path() {
        let result = WhitelistConfig::builder()
            .whitelist_url("https://cdn.example.com/artists.json")
            .http_client(Arc::new(MockHttpClient))
            .build();

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("Database path")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = builder().whitelist_url("ftp://cdn.example.com/a.json").build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = builder().whitelist_url("https:///a.json").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_accepts_plain_http_url() {
        let config = builder()
            .whitelist_url("http://localhost:8080/artists.json")
            .build()
            .unwrap();
        assert_eq!(config.whitelist_url, "http://localhost:8080/artists.json");
    }

    #[test]
    fn test_startup_timeout_bounds() {
        assert!(builder().startup_timeout(Duration::ZERO).build().is_err());
        assert!(builder()
            .startup_timeout(Duration::from_secs(61))
            .build()
            .is_err());
        assert!(builder()
            .startup_timeout(Duration::from_millis(1))
            .build()
            .is_ok());
        assert!(builder()
            .startup_timeout(Duration::from_secs(60))
            .build()
            .is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_fetch_timeout() {
        assert!(builder().background_interval(Duration::ZERO).build().is_err());
        assert!(builder().fetch_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn test_retry_policy_validation() {
        let zero_attempts = FetchRetryPolicy {
            max_attempts: 0,
            ..FetchRetryPolicy::default()
        };
        assert!(builder().retry_policy(zero_attempts).build().is_err());

        let inverted = FetchRetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
        };
        assert!(builder().retry_policy(inverted).build().is_err());
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        let policy = FetchRetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(10));
        assert_eq!(FetchRetryPolicy::no_retry().backoff_for(1), Duration::ZERO);
    }

    #[test]
    fn test_feature_flags() {
        let config = builder().enable_background_sync(false).build().unwrap();
        assert!(!config.features.enable_background_sync);
        assert!(FeatureFlags::default().enable_background_sync);
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_http_client_is_capability_error() {
        let result = WhitelistConfig::builder()
            .whitelist_url("https://cdn.example.com/artists.json")
            .database_path("/tmp/library.db")
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient")
            }
            other => panic!("expected capability error, got {:?}", other),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_default_http_client() {
        let config = WhitelistConfig::builder()
            .whitelist_url("https://cdn.example.com/artists.json")
            .database_path("/tmp/library.db")
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn test_debug_redacts_url_and_elides_bridges() {
        let config = builder()
            .whitelist_url("https://cdn.example.com/artists.json?token=secret")
            .build()
            .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("HttpClient { ... }"));
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = builder().build().unwrap();
        let cloned = config.clone();
        assert_eq!(config.whitelist_url, cloned.whitelist_url);
        assert_eq!(config.database_path, cloned.database_path);
    }
}
