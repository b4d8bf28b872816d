//! Catalog repository trait and implementation
//!
//! Writes catalog rows together with their artist mappings. The whitelist
//! store only reads these tables and deletes from them; everything that adds
//! content goes through here.

use crate::error::{LibraryError, Result};
use crate::models::{Album, Artist, Playlist, Song};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

/// Catalog entity counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub songs: i64,
    pub albums: i64,
    pub artists: i64,
    pub playlists: i64,
}

/// Catalog repository interface for data access operations
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn insert_artist(&self, artist: &Artist) -> Result<()>;

    /// Insert an album credited to `artist_ids`.
    ///
    /// # Errors
    /// Returns error if validation fails or an artist does not exist.
    async fn insert_album(&self, album: &Album, artist_ids: &[&str]) -> Result<()>;

    /// Insert a song credited to `artist_ids`. An empty slice stores an
    /// unattributed song.
    async fn insert_song(&self, song: &Song, artist_ids: &[&str]) -> Result<()>;

    async fn insert_playlist(&self, playlist: &Playlist) -> Result<()>;

    /// Append a song to a playlist at `position`.
    async fn add_song_to_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
        position: i32,
    ) -> Result<()>;

    async fn find_artist(&self, id: &str) -> Result<Option<Artist>>;

    async fn find_album(&self, id: &str) -> Result<Option<Album>>;

    async fn find_song(&self, id: &str) -> Result<Option<Song>>;

    async fn find_playlist(&self, id: &str) -> Result<Option<Playlist>>;

    /// Songs credited to an artist, ordered by title.
    async fn songs_by_artist(&self, artist_id: &str) -> Result<Vec<Song>>;

    async fn counts(&self) -> Result<CatalogCounts>;
}

/// SQLite implementation of CatalogRepository
pub struct SqliteCatalogRepository {
    pool: SqlitePool,
}

impl SqliteCatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn invalid(field: &str, message: String) -> LibraryError {
    LibraryError::InvalidInput {
        field: field.to_string(),
        message,
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn insert_artist(&self, artist: &Artist) -> Result<()> {
        artist.validate().map_err(|e| invalid("Artist", e))?;

        query(
            r#"
            INSERT INTO artists (id, name, normalized_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&artist.id)
        .bind(&artist.name)
        .bind(&artist.normalized_name)
        .bind(artist.created_at)
        .bind(artist.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_album(&self, album: &Album, artist_ids: &[&str]) -> Result<()> {
        album.validate().map_err(|e| invalid("Album", e))?;

        let mut tx = self.pool.begin().await?;

        query(
            r#"
            INSERT INTO albums (id, name, normalized_name, year, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&album.id)
        .bind(&album.name)
        .bind(&album.normalized_name)
        .bind(album.year)
        .bind(album.created_at)
        .bind(album.updated_at)
        .execute(&mut *tx)
        .await?;

        for artist_id in artist_ids {
            query("INSERT INTO album_artists (album_id, artist_id) VALUES (?, ?)")
                .bind(&album.id)
                .bind(artist_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_song(&self, song: &Song, artist_ids: &[&str]) -> Result<()> {
        song.validate().map_err(|e| invalid("Song", e))?;

        let mut tx = self.pool.begin().await?;

        query(
            r#"
            INSERT INTO songs (
                id, title, normalized_title, album_id, duration_ms, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&song.id)
        .bind(&song.title)
        .bind(&song.normalized_title)
        .bind(&song.album_id)
        .bind(song.duration_ms)
        .bind(song.created_at)
        .bind(song.updated_at)
        .execute(&mut *tx)
        .await?;

        for artist_id in artist_ids {
            query("INSERT INTO song_artists (song_id, artist_id) VALUES (?, ?)")
                .bind(&song.id)
                .bind(artist_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_playlist(&self, playlist: &Playlist) -> Result<()> {
        playlist.validate().map_err(|e| invalid("Playlist", e))?;

        query(
            r#"
            INSERT INTO playlists (id, name, normalized_name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&playlist.id)
        .bind(&playlist.name)
        .bind(&playlist.normalized_name)
        .bind(&playlist.description)
        .bind(playlist.created_at)
        .bind(playlist.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_song_to_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
        position: i32,
    ) -> Result<()> {
        query(
            r#"
            INSERT INTO playlist_songs (playlist_id, song_id, position, added_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(playlist_id)
        .bind(song_id)
        .bind(position)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_artist(&self, id: &str) -> Result<Option<Artist>> {
        let artist = query_as::<_, Artist>("SELECT * FROM artists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(artist)
    }

    async fn find_album(&self, id: &str) -> Result<Option<Album>> {
        let album = query_as::<_, Album>("SELECT * FROM albums WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(album)
    }

    async fn find_song(&self, id: &str) -> Result<Option<Song>> {
        let song = query_as::<_, Song>("SELECT * FROM songs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(song)
    }

    async fn find_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        let playlist = query_as::<_, Playlist>("SELECT * FROM playlists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(playlist)
    }

    async fn songs_by_artist(&self, artist_id: &str) -> Result<Vec<Song>> {
        let songs = query_as::<_, Song>(
            r#"
            SELECT s.* FROM songs s
            JOIN song_artists sa ON sa.song_id = s.id
            WHERE sa.artist_id = ?
            ORDER BY s.normalized_title ASC
            "#,
        )
        .bind(artist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(songs)
    }

    async fn counts(&self) -> Result<CatalogCounts> {
        let (songs, albums, artists, playlists): (i64, i64, i64, i64) = query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM songs),
                (SELECT COUNT(*) FROM albums),
                (SELECT COUNT(*) FROM artists),
                (SELECT COUNT(*) FROM playlists)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogCounts {
            songs,
            albums,
            artists,
            playlists,
        })
    }
}
