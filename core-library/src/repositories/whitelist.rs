//! Whitelist storage contract and its SQLite implementation
//!
//! The sync engine never touches SQL directly. It reads the persisted
//! snapshot, asks which catalog entities an artist is attached to, and hands
//! back a precomputed [`DeletionPlan`] that is applied in one transaction.

use crate::error::{StorageError, StorageResult};
use crate::models::{
    CatalogEntityRef, CleanupReport, DeletionPlan, EntityKind, WhitelistEntry, WhitelistSnapshot,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{query, query_as, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Narrow persistence contract consumed by the whitelist sync engine.
///
/// Every mutating method is transactional: it either applies completely or
/// leaves the database untouched.
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    /// Load the last committed snapshot, if any.
    async fn get_snapshot(&self) -> StorageResult<Option<WhitelistSnapshot>>;

    /// Replace the persisted snapshot.
    async fn commit_snapshot(&self, snapshot: &WhitelistSnapshot) -> StorageResult<()>;

    /// All songs, albums and playlists associated with an artist.
    ///
    /// A playlist is associated through the songs it contains.
    async fn find_entities_by_artist(&self, artist_id: &str)
        -> StorageResult<Vec<CatalogEntityRef>>;

    /// Complete artist association set of one entity.
    ///
    /// For a playlist this is the union over its member songs.
    async fn artist_ids_for(&self, entity: &CatalogEntityRef) -> StorageResult<HashSet<String>>;

    /// Song ids contained in a playlist.
    async fn playlist_song_ids(&self, playlist_id: &str) -> StorageResult<Vec<String>>;

    /// Apply a deletion plan in dependency order inside one transaction.
    async fn delete_cascade(&self, plan: &DeletionPlan) -> StorageResult<CleanupReport>;

    /// Apply a deletion plan and replace the snapshot in the same transaction.
    async fn delete_cascade_and_commit(
        &self,
        plan: &DeletionPlan,
        snapshot: &WhitelistSnapshot,
    ) -> StorageResult<CleanupReport>;
}

/// SQLite implementation of [`WhitelistStore`]
#[derive(Clone)]
pub struct SqliteWhitelistStore {
    pool: SqlitePool,
}

impl SqliteWhitelistStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin(&self) -> StorageResult<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to open storage transaction");
            StorageError::from(e)
        })
    }
}

// ============================================================================
// Transaction steps
// ============================================================================

async fn write_snapshot(
    tx: &mut Transaction<'static, Sqlite>,
    snapshot: &WhitelistSnapshot,
) -> StorageResult<()> {
    query("DELETE FROM whitelist_entries")
        .execute(&mut **tx)
        .await?;

    for entry in snapshot.entries() {
        query("INSERT INTO whitelist_entries (artist_id, display_name) VALUES (?, ?)")
            .bind(&entry.artist_id)
            .bind(&entry.display_name)
            .execute(&mut **tx)
            .await?;
    }

    query(
        r#"
        INSERT INTO whitelist_snapshot (id, content_hash, fetched_at)
        VALUES (1, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            content_hash = excluded.content_hash,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(&snapshot.content_hash)
    .bind(snapshot.fetched_at.timestamp_millis())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Run `sql` once per id and sum the affected rows.
async fn delete_each<'a, I>(
    tx: &mut Transaction<'static, Sqlite>,
    sql: &str,
    ids: I,
) -> StorageResult<u64>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut affected = 0;
    for id in ids {
        affected += query(sql).bind(id).execute(&mut **tx).await?.rows_affected();
    }
    Ok(affected)
}

async fn apply_plan(
    tx: &mut Transaction<'static, Sqlite>,
    plan: &DeletionPlan,
) -> StorageResult<CleanupReport> {
    let mut report = CleanupReport::default();

    // 1. playlist-song mappings, from both ends
    report.mappings_deleted += delete_each(
        tx,
        "DELETE FROM playlist_songs WHERE song_id = ?",
        &plan.candidate_song_ids,
    )
    .await?;
    report.mappings_deleted += delete_each(
        tx,
        "DELETE FROM playlist_songs WHERE playlist_id = ?",
        &plan.candidate_playlist_ids,
    )
    .await?;

    // 2. artist mappings of doomed songs and albums
    report.mappings_deleted += delete_each(
        tx,
        "DELETE FROM song_artists WHERE song_id = ?",
        &plan.candidate_song_ids,
    )
    .await?;
    report.mappings_deleted += delete_each(
        tx,
        "DELETE FROM album_artists WHERE album_id = ?",
        &plan.candidate_album_ids,
    )
    .await?;

    // 3. songs
    report.songs_deleted = delete_each(
        tx,
        "DELETE FROM songs WHERE id = ?",
        &plan.candidate_song_ids,
    )
    .await?;

    // 4. albums; surviving songs lose their album link first
    report.mappings_deleted += delete_each(
        tx,
        "UPDATE songs SET album_id = NULL WHERE album_id = ?",
        &plan.candidate_album_ids,
    )
    .await?;
    report.albums_deleted = delete_each(
        tx,
        "DELETE FROM albums WHERE id = ?",
        &plan.candidate_album_ids,
    )
    .await?;

    // 5. playlists
    report.playlists_deleted = delete_each(
        tx,
        "DELETE FROM playlists WHERE id = ?",
        &plan.candidate_playlist_ids,
    )
    .await?;

    // 6. removed artists that no longer own anything
    for artist_id in &plan.removed_artist_ids {
        report.artists_deleted += query(
            r#"
            DELETE FROM artists
            WHERE id = ?1
              AND NOT EXISTS (SELECT 1 FROM song_artists WHERE artist_id = ?1)
              AND NOT EXISTS (SELECT 1 FROM album_artists WHERE artist_id = ?1)
            "#,
        )
        .bind(artist_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }

    Ok(report)
}

#[async_trait]
impl WhitelistStore for SqliteWhitelistStore {
    async fn get_snapshot(&self) -> StorageResult<Option<WhitelistSnapshot>> {
        // Header and entries must come from the same read transaction.
        let mut tx = self.begin().await?;

        let header: Option<(String, i64)> =
            query_as("SELECT content_hash, fetched_at FROM whitelist_snapshot WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await?;

        let Some((content_hash, fetched_at_ms)) = header else {
            tx.commit().await?;
            return Ok(None);
        };

        let entries = query_as::<_, WhitelistEntry>(
            "SELECT artist_id, display_name FROM whitelist_entries ORDER BY artist_id",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let fetched_at = Utc
            .timestamp_millis_opt(fetched_at_ms)
            .single()
            .ok_or_else(|| {
                StorageError::Constraint(format!(
                    "Stored snapshot timestamp {} is out of range",
                    fetched_at_ms
                ))
            })?;

        Ok(Some(WhitelistSnapshot::new(content_hash, entries, fetched_at)))
    }

    #[instrument(skip(self, snapshot), fields(hash = %snapshot.content_hash, entries = snapshot.len()))]
    async fn commit_snapshot(&self, snapshot: &WhitelistSnapshot) -> StorageResult<()> {
        let mut tx = self.begin().await?;
        write_snapshot(&mut tx, snapshot).await?;
        tx.commit().await?;

        debug!("Whitelist snapshot committed");
        Ok(())
    }

    async fn find_entities_by_artist(
        &self,
        artist_id: &str,
    ) -> StorageResult<Vec<CatalogEntityRef>> {
        let songs: Vec<(String,)> =
            query_as("SELECT song_id FROM song_artists WHERE artist_id = ? ORDER BY song_id")
                .bind(artist_id)
                .fetch_all(&self.pool)
                .await?;

        let albums: Vec<(String,)> =
            query_as("SELECT album_id FROM album_artists WHERE artist_id = ? ORDER BY album_id")
                .bind(artist_id)
                .fetch_all(&self.pool)
                .await?;

        let playlists: Vec<(String,)> = query_as(
            r#"
            SELECT DISTINCT ps.playlist_id
            FROM playlist_songs ps
            JOIN song_artists sa ON sa.song_id = ps.song_id
            WHERE sa.artist_id = ?
            ORDER BY ps.playlist_id
            "#,
        )
        .bind(artist_id)
        .fetch_all(&self.pool)
        .await?;

        let entities = songs
            .into_iter()
            .map(|(id,)| CatalogEntityRef::song(id))
            .chain(albums.into_iter().map(|(id,)| CatalogEntityRef::album(id)))
            .chain(
                playlists
                    .into_iter()
                    .map(|(id,)| CatalogEntityRef::playlist(id)),
            )
            .collect();

        Ok(entities)
    }

    async fn artist_ids_for(&self, entity: &CatalogEntityRef) -> StorageResult<HashSet<String>> {
        let sql = match entity.kind {
            EntityKind::Song => "SELECT artist_id FROM song_artists WHERE song_id = ?",
            EntityKind::Album => "SELECT artist_id FROM album_artists WHERE album_id = ?",
            EntityKind::Playlist => {
                r#"
                SELECT DISTINCT sa.artist_id
                FROM playlist_songs ps
                JOIN song_artists sa ON sa.song_id = ps.song_id
                WHERE ps.playlist_id = ?
                "#
            }
        };

        let rows: Vec<(String,)> = query_as(sql)
            .bind(&entity.id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn playlist_song_ids(&self, playlist_id: &str) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = query_as(
            "SELECT song_id FROM playlist_songs WHERE playlist_id = ? ORDER BY position ASC",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    #[instrument(skip(self, plan), fields(candidates = plan.candidate_count()))]
    async fn delete_cascade(&self, plan: &DeletionPlan) -> StorageResult<CleanupReport> {
        let mut tx = self.begin().await?;
        let report = apply_plan(&mut tx, plan).await?;
        tx.commit().await?;

        info!(
            songs = report.songs_deleted,
            albums = report.albums_deleted,
            playlists = report.playlists_deleted,
            artists = report.artists_deleted,
            mappings = report.mappings_deleted,
            "Cascade delete committed"
        );
        Ok(report)
    }

    #[instrument(
        skip(self, plan, snapshot),
        fields(candidates = plan.candidate_count(), hash = %snapshot.content_hash)
    )]
    async fn delete_cascade_and_commit(
        &self,
        plan: &DeletionPlan,
        snapshot: &WhitelistSnapshot,
    ) -> StorageResult<CleanupReport> {
        let mut tx = self.begin().await?;
        let report = apply_plan(&mut tx, plan).await?;
        write_snapshot(&mut tx, snapshot).await?;
        tx.commit().await?;

        info!(
            songs = report.songs_deleted,
            albums = report.albums_deleted,
            playlists = report.playlists_deleted,
            artists = report.artists_deleted,
            mappings = report.mappings_deleted,
            "Cascade delete and snapshot committed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Album, Artist, Playlist, Song};
    use crate::repositories::{CatalogRepository, SqliteCatalogRepository};
    use std::collections::BTreeSet;

    struct Fixture {
        store: SqliteWhitelistStore,
        catalog: SqliteCatalogRepository,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        let catalog = SqliteCatalogRepository::new(pool.clone());
        for (id, name) in [("A", "Alpha"), ("B", "Beta"), ("C", "Gamma"), ("D", "Delta")] {
            catalog.insert_artist(&Artist::new(id, name)).await.unwrap();
        }
        Fixture {
            store: SqliteWhitelistStore::new(pool),
            catalog,
        }
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn snapshot(hash: &str, artists: &[&str]) -> WhitelistSnapshot {
        WhitelistSnapshot::new(
            hash,
            artists.iter().map(|a| WhitelistEntry::new(*a, *a)),
            Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_replace() {
        let fx = setup().await;
        assert!(fx.store.get_snapshot().await.unwrap().is_none());

        let first = snapshot("h1", &["A", "B", "C"]);
        fx.store.commit_snapshot(&first).await.unwrap();
        assert_eq!(fx.store.get_snapshot().await.unwrap(), Some(first));

        let second = snapshot("h2", &["A"]);
        fx.store.commit_snapshot(&second).await.unwrap();
        let loaded = fx.store.get_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.content_hash, "h2");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_reads_are_never_torn_by_concurrent_commits() {
        use crate::db::{create_pool, DatabaseConfig};

        let path = std::env::temp_dir().join(format!("whitelist-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(DatabaseConfig::new(&path).max_connections(4))
            .await
            .unwrap();
        let store = SqliteWhitelistStore::new(pool.clone());

        let h1 = snapshot("h1", &["A", "B", "C"]);
        let h2 = snapshot("h2", &["X"]);
        store.commit_snapshot(&h1).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let next = if i % 2 == 0 { &h2 } else { &h1 };
                    store.commit_snapshot(next).await.unwrap();
                }
            })
        };

        let mut reads = 0;
        while !writer.is_finished() {
            let current = store.get_snapshot().await.unwrap().unwrap();
            let ids: Vec<&str> = current
                .entries()
                .iter()
                .map(|e| e.artist_id.as_str())
                .collect();
            match current.content_hash.as_str() {
                "h1" => assert_eq!(ids, ["A", "B", "C"]),
                "h2" => assert_eq!(ids, ["X"]),
                other => panic!("unexpected hash {}", other),
            }
            reads += 1;
        }
        writer.await.unwrap();
        assert!(reads > 0);

        pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_find_entities_and_artist_sets() {
        let fx = setup().await;
        let song = Song::new("Shared").with_id("s1");
        fx.catalog.insert_song(&song, &["B", "D"]).await.unwrap();
        let album = Album::new("Record").with_id("al1");
        fx.catalog.insert_album(&album, &["B"]).await.unwrap();
        let playlist = Playlist::new("Mix").with_id("p1");
        fx.catalog.insert_playlist(&playlist).await.unwrap();
        fx.catalog.add_song_to_playlist("p1", "s1", 0).await.unwrap();

        let found = fx.store.find_entities_by_artist("B").await.unwrap();
        assert_eq!(
            found,
            vec![
                CatalogEntityRef::song("s1"),
                CatalogEntityRef::album("al1"),
                CatalogEntityRef::playlist("p1"),
            ]
        );

        let song_artists = fx
            .store
            .artist_ids_for(&CatalogEntityRef::song("s1"))
            .await
            .unwrap();
        assert_eq!(song_artists, HashSet::from(["B".to_string(), "D".to_string()]));

        let playlist_artists = fx
            .store
            .artist_ids_for(&CatalogEntityRef::playlist("p1"))
            .await
            .unwrap();
        assert_eq!(playlist_artists, song_artists);

        assert_eq!(fx.store.playlist_song_ids("p1").await.unwrap(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_delete_cascade_respects_dependency_order() {
        let fx = setup().await;
        let album = Album::new("Record").with_id("al1");
        fx.catalog.insert_album(&album, &["B"]).await.unwrap();
        fx.catalog
            .insert_song(&Song::new("Doomed").with_id("s1").on_album("al1"), &["B"])
            .await
            .unwrap();
        fx.catalog
            .insert_song(&Song::new("Kept").with_id("s2").on_album("al1"), &["A", "B"])
            .await
            .unwrap();
        fx.catalog
            .insert_playlist(&Playlist::new("Mix").with_id("p1"))
            .await
            .unwrap();
        fx.catalog.add_song_to_playlist("p1", "s1", 0).await.unwrap();
        fx.catalog.add_song_to_playlist("p1", "s2", 1).await.unwrap();

        let plan = DeletionPlan {
            removed_artist_ids: ids(&["B"]),
            candidate_song_ids: ids(&["s1"]),
            candidate_album_ids: ids(&["al1"]),
            candidate_playlist_ids: BTreeSet::new(),
        };

        let report = fx.store.delete_cascade(&plan).await.unwrap();
        assert_eq!(report.songs_deleted, 1);
        assert_eq!(report.albums_deleted, 1);
        assert_eq!(report.playlists_deleted, 0);
        // B still credited on s2
        assert_eq!(report.artists_deleted, 0);
        // playlist row, song_artists row, album_artists row, s2 album link
        assert_eq!(report.mappings_deleted, 4);

        let kept = fx.catalog.find_song("s2").await.unwrap().unwrap();
        assert_eq!(kept.album_id, None);
        assert!(fx.catalog.find_song("s1").await.unwrap().is_none());
        assert_eq!(fx.store.playlist_song_ids("p1").await.unwrap(), vec!["s2"]);
    }

    #[tokio::test]
    async fn test_orphaned_removed_artist_is_deleted() {
        let fx = setup().await;
        fx.catalog
            .insert_song(&Song::new("Solo").with_id("s1"), &["B"])
            .await
            .unwrap();

        let plan = DeletionPlan {
            removed_artist_ids: ids(&["B"]),
            candidate_song_ids: ids(&["s1"]),
            ..DeletionPlan::default()
        };
        let report = fx.store.delete_cascade(&plan).await.unwrap();

        assert_eq!(report.artists_deleted, 1);
        assert!(fx.catalog.find_artist("B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_cascade_rolls_back_everything() {
        let fx = setup().await;
        fx.catalog
            .insert_album(&Album::new("Locked").with_id("al1"), &["B"])
            .await
            .unwrap();
        fx.catalog
            .insert_song(&Song::new("Doomed").with_id("s1"), &["B"])
            .await
            .unwrap();
        fx.store
            .commit_snapshot(&snapshot("h1", &["A", "B"]))
            .await
            .unwrap();

        sqlx::query(
            "CREATE TRIGGER lock_albums BEFORE DELETE ON albums BEGIN SELECT RAISE(ABORT, 'albums are locked'); END",
        )
        .execute(fx.store.pool())
        .await
        .unwrap();

        let plan = DeletionPlan {
            removed_artist_ids: ids(&["B"]),
            candidate_song_ids: ids(&["s1"]),
            candidate_album_ids: ids(&["al1"]),
            ..DeletionPlan::default()
        };

        let result = fx
            .store
            .delete_cascade_and_commit(&plan, &snapshot("h2", &["A"]))
            .await;
        assert!(result.is_err());

        assert!(fx.catalog.find_song("s1").await.unwrap().is_some());
        assert_eq!(
            fx.store
                .artist_ids_for(&CatalogEntityRef::song("s1"))
                .await
                .unwrap(),
            HashSet::from(["B".to_string()])
        );
        let persisted = fx.store.get_snapshot().await.unwrap().unwrap();
        assert_eq!(persisted.content_hash, "h1");
    }

    #[tokio::test]
    async fn test_empty_plan_is_noop() {
        let fx = setup().await;
        let report = fx
            .store
            .delete_cascade(&DeletionPlan::default())
            .await
            .unwrap();
        assert_eq!(report, CleanupReport::default());
    }
}
