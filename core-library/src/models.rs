//! Domain models for the music catalog and the artist whitelist
//!
//! This module contains the catalog rows with validation and database mapping,
//! plus the whitelist and cleanup value types exchanged with the sync layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use uuid::Uuid;

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

// =============================================================================
// Catalog Entities
// =============================================================================

/// Artist known to the local catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Artist {
    /// Identifier shared with the remote whitelist
    pub id: String,
    pub name: String,
    /// Normalized name for searching
    pub normalized_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Artist {
    /// Create an artist with an id taken from the upstream catalog
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now().timestamp();
        Self {
            id: id.into(),
            normalized_name: normalize(&name),
            name,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Artist id cannot be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("Artist name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Album with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    /// Release year
    pub year: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Album {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            normalized_name: normalize(&name),
            name,
            year: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the generated id, e.g. with one from the upstream catalog
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Album name cannot be empty".to_string());
        }

        if let Some(year) = self.year {
            if !(1900..=2100).contains(&year) {
                return Err(format!("Album year {} is out of valid range", year));
            }
        }

        Ok(())
    }
}

/// Song (a single track in the catalog)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub normalized_title: String,
    /// Album the song belongs to, if any
    pub album_id: Option<String>,
    pub duration_ms: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Song {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            normalized_title: normalize(&title),
            title,
            album_id: None,
            duration_ms: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn on_album(mut self, album_id: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Song title cannot be empty".to_string());
        }
        if self.duration_ms < 0 {
            return Err("Duration cannot be negative".to_string());
        }
        Ok(())
    }
}

/// User playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            normalized_name: normalize(&name),
            name,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Playlist name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Kind of catalog entity that can be purged by the whitelist policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Song,
    Album,
    Playlist,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Song => "song",
            EntityKind::Album => "album",
            EntityKind::Playlist => "playlist",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one catalog entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogEntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl CatalogEntityRef {
    pub fn song(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Song,
            id: id.into(),
        }
    }

    pub fn album(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Album,
            id: id.into(),
        }
    }

    pub fn playlist(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Playlist,
            id: id.into(),
        }
    }
}

impl fmt::Display for CatalogEntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// =============================================================================
// Whitelist
// =============================================================================

/// One approved artist as published remotely
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct WhitelistEntry {
    pub artist_id: String,
    pub display_name: String,
}

impl WhitelistEntry {
    pub fn new(artist_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            artist_id: artist_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Last successfully applied remote whitelist.
///
/// Entries are unique by `artist_id` and kept sorted by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistSnapshot {
    pub content_hash: String,
    entries: Vec<WhitelistEntry>,
    pub fetched_at: DateTime<Utc>,
}

impl WhitelistSnapshot {
    /// Build a snapshot; duplicate artist ids keep their first occurrence.
    pub fn new(
        content_hash: impl Into<String>,
        entries: impl IntoIterator<Item = WhitelistEntry>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            entries: normalize_entries(entries),
            fetched_at,
        }
    }

    pub fn entries(&self) -> &[WhitelistEntry] {
        &self.entries
    }

    pub fn artist_ids(&self) -> HashSet<String> {
        self.entries.iter().map(|e| e.artist_id.clone()).collect()
    }

    pub fn contains(&self, artist_id: &str) -> bool {
        self.entries
            .binary_search_by(|e| e.artist_id.as_str().cmp(artist_id))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deduplicate by artist id (first occurrence wins) and sort by id.
pub fn normalize_entries(entries: impl IntoIterator<Item = WhitelistEntry>) -> Vec<WhitelistEntry> {
    let mut seen = HashSet::new();
    let mut unique: Vec<WhitelistEntry> = entries
        .into_iter()
        .filter(|e| seen.insert(e.artist_id.clone()))
        .collect();
    unique.sort_by(|a, b| a.artist_id.cmp(&b.artist_id));
    unique
}

// =============================================================================
// Cleanup
// =============================================================================

/// Entities to purge for a set of removed artists. Computed, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionPlan {
    pub removed_artist_ids: BTreeSet<String>,
    pub candidate_song_ids: BTreeSet<String>,
    pub candidate_album_ids: BTreeSet<String>,
    pub candidate_playlist_ids: BTreeSet<String>,
}

impl DeletionPlan {
    /// No catalog entity is scheduled for deletion.
    pub fn has_no_candidates(&self) -> bool {
        self.candidate_song_ids.is_empty()
            && self.candidate_album_ids.is_empty()
            && self.candidate_playlist_ids.is_empty()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidate_song_ids.len()
            + self.candidate_album_ids.len()
            + self.candidate_playlist_ids.len()
    }
}

/// Row counts removed by a successful cascade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub songs_deleted: u64,
    pub albums_deleted: u64,
    pub playlists_deleted: u64,
    pub artists_deleted: u64,
    /// Mapping rows removed plus song-to-album links cleared
    pub mappings_deleted: u64,
}

impl CleanupReport {
    pub fn entities_deleted(&self) -> u64 {
        self.songs_deleted + self.albums_deleted + self.playlists_deleted + self.artists_deleted
    }
}
