//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host configuration, the SQLite catalog and the HTTP
//! bridge into a running whitelist sync engine. Desktop apps typically enable
//! the `desktop-shims` feature, which lets [`WhitelistConfig`] fall back to
//! the reqwest-based client from `bridge-desktop` when no `HttpClient` is
//! injected.
//!
//! ```rust,ignore
//! use core_runtime::WhitelistConfig;
//! use core_service::WhitelistService;
//!
//! let config = WhitelistConfig::builder()
//!     .whitelist_url("https://lists.example.com/artists.json")
//!     .database_path("library.db")
//!     .build()?;
//!
//! let service = WhitelistService::bootstrap(config).await?;
//! let mut states = service.progress().subscribe();
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::{SqliteCatalogRepository, SqliteWhitelistStore};
use core_runtime::events::{EventBus, DEFAULT_EVENT_BUFFER_SIZE};
use core_runtime::WhitelistConfig;
use core_whitelist::{
    BackgroundSyncHandle, HttpWhitelistFetcher, ProgressPublisher, SyncConfig, SyncCoordinator,
    SyncOutcome,
};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Primary façade exposed to host applications.
pub struct WhitelistService {
    config: WhitelistConfig,
    store: Arc<SqliteWhitelistStore>,
    catalog: Arc<SqliteCatalogRepository>,
    coordinator: Arc<SyncCoordinator>,
    events: EventBus,
    background: Mutex<Option<BackgroundSyncHandle>>,
    startup_outcome: SyncOutcome,
}

impl WhitelistService {
    /// Open the catalog, run the startup sync and start the background loop.
    ///
    /// A failed or slow startup sync is not fatal: the last persisted
    /// snapshot stays in effect and the outcome is available through
    /// [`startup_outcome`](Self::startup_outcome).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, no Tokio runtime is
    /// available, or the database cannot be opened and migrated.
    #[instrument(skip(config), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: WhitelistConfig) -> Result<Self> {
        config.validate()?;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CoreError::InitializationFailed(
                "WhitelistService must be bootstrapped inside a Tokio runtime".to_string(),
            ));
        }

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let store = Arc::new(SqliteWhitelistStore::new(pool.clone()));
        let catalog = Arc::new(SqliteCatalogRepository::new(pool));

        let fetcher = HttpWhitelistFetcher::new(
            config.http_client.clone(),
            config.whitelist_url.clone(),
            config.fetch_timeout,
        );
        let events = EventBus::new(DEFAULT_EVENT_BUFFER_SIZE);
        let coordinator = Arc::new(SyncCoordinator::new(
            SyncConfig::from(&config),
            Arc::new(fetcher),
            store.clone(),
            events.clone(),
            config.clock.clone(),
        ));

        let startup_outcome = coordinator.sync_blocking(config.startup_timeout).await;
        match &startup_outcome {
            Ok(report) => info!(
                hash = %report.content_hash,
                changed = report.changed_count(),
                "Startup whitelist sync finished"
            ),
            Err(e) => {
                let fallback = coordinator
                    .current_snapshot()
                    .await
                    .ok()
                    .flatten()
                    .map(|s| s.content_hash);
                warn!(
                    fallback_hash = fallback.as_deref().unwrap_or("<none>"),
                    "Startup whitelist sync failed, continuing with last snapshot: {}",
                    e
                );
            }
        }

        let background = if config.features.enable_background_sync {
            Some(coordinator.start_background_loop(config.background_interval))
        } else {
            info!("Background whitelist sync disabled");
            None
        };

        Ok(Self {
            config,
            store,
            catalog,
            coordinator,
            events,
            background: Mutex::new(background),
            startup_outcome,
        })
    }

    pub fn config(&self) -> &WhitelistConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Observable sync state
    pub fn progress(&self) -> Arc<ProgressPublisher> {
        self.coordinator.progress()
    }

    /// Event bus carrying sync and purge events
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> Arc<SqliteWhitelistStore> {
        Arc::clone(&self.store)
    }

    /// Catalog repository for adding and reading library content
    pub fn catalog(&self) -> Arc<SqliteCatalogRepository> {
        Arc::clone(&self.catalog)
    }

    /// Result of the sync performed during bootstrap.
    pub fn startup_outcome(&self) -> &SyncOutcome {
        &self.startup_outcome
    }

    /// Manual refresh.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.coordinator.sync_now().await
    }

    /// Stop the background loop, let an in-flight cycle finish and close the
    /// database.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.background.lock().await.take() {
            handle.shutdown().await;
        }
        self.coordinator.shutdown().await;
        self.store.pool().close().await;
        info!("Whitelist service shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use bridge_traits::BridgeError;
    use bytes::Bytes;
    use core_library::repositories::WhitelistStore;
    use core_runtime::FetchRetryPolicy;
    use core_whitelist::{SyncError, SyncState};
    use mockall::mock;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    struct TempDb(PathBuf);

    impl TempDb {
        fn new() -> Self {
            Self(std::env::temp_dir().join(format!("core-service-{}.db", uuid::Uuid::new_v4())))
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", self.0.display(), suffix));
            }
        }
    }

    fn config(db: &TempDb, http: MockHttpClient, background: bool) -> WhitelistConfig {
        WhitelistConfig::builder()
            .whitelist_url("https://lists.example.com/artists.json")
            .database_path(&db.0)
            .http_client(Arc::new(http))
            .retry_policy(FetchRetryPolicy::no_retry())
            .startup_timeout(Duration::from_secs(5))
            .enable_background_sync(background)
            .build()
            .unwrap()
    }

    fn serving(body: &'static str) -> MockHttpClient {
        let mut http = MockHttpClient::new();
        http.expect_execute().returning(move |_| {
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: Bytes::from_static(body.as_bytes()),
            })
        });
        http
    }

    #[tokio::test]
    async fn test_bootstrap_runs_startup_sync() {
        let db = TempDb::new();
        let http = serving(r#"{"hash":"h1","artists":[{"id":"A","name":"Alpha"}]}"#);

        let service = WhitelistService::bootstrap(config(&db, http, true))
            .await
            .unwrap();

        let report = service.startup_outcome().as_ref().unwrap();
        assert_eq!(report.content_hash, "h1");
        assert!(matches!(
            service.progress().current(),
            SyncState::Succeeded { .. }
        ));

        let snapshot = service.store().get_snapshot().await.unwrap().unwrap();
        assert!(snapshot.contains("A"));

        service.shutdown().await;
        assert!(!service.coordinator().stop_background_loop());
    }

    #[tokio::test]
    async fn test_startup_failure_is_not_fatal() {
        let db = TempDb::new();
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::Connection("connection refused".to_string())));

        let service = WhitelistService::bootstrap(config(&db, http, false))
            .await
            .unwrap();

        assert!(matches!(
            service.startup_outcome(),
            Err(SyncError::FetchFailed(_))
        ));
        assert!(service.progress().current().is_failed());
        assert!(service.store().get_snapshot().await.unwrap().is_none());
        assert!(!service.coordinator().stop_background_loop());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let db = TempDb::new();
        let body = r#"{"hash":"h1","artists":[{"id":"A","name":"Alpha"}]}"#;

        let first = WhitelistService::bootstrap(config(&db, serving(body), false))
            .await
            .unwrap();
        first.shutdown().await;

        let second = WhitelistService::bootstrap(config(&db, serving(body), false))
            .await
            .unwrap();
        let report = second.startup_outcome().as_ref().unwrap();
        assert!(report.unchanged);
        second.shutdown().await;
    }
}
