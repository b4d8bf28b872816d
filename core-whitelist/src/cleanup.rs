//! Cascade cleanup of catalog content owned by de-listed artists
//!
//! Cleanup runs in two steps. [`CascadeCleanupEngine::plan`] walks the
//! catalog through the storage contract and decides which songs, albums and
//! playlists lose their last whitelisted artist. The resulting
//! [`DeletionPlan`] is then applied by the store in one transaction.
//!
//! Retention rule: an entity survives if at least one of its artists is
//! still whitelisted, or if it has no artist at all.

use core_library::models::{
    CatalogEntityRef, CleanupReport, DeletionPlan, EntityKind, WhitelistSnapshot,
};
use core_library::repositories::WhitelistStore;
use core_library::StorageResult;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Plans and applies deletions through a [`WhitelistStore`].
#[derive(Clone)]
pub struct CascadeCleanupEngine {
    store: Arc<dyn WhitelistStore>,
}

impl CascadeCleanupEngine {
    pub fn new(store: Arc<dyn WhitelistStore>) -> Self {
        Self { store }
    }

    /// Compute the deletion plan for `removed` artists against the new
    /// `whitelist`.
    ///
    /// Songs and albums are candidates when their artist set is non-empty and
    /// disjoint from `whitelist`. A playlist is a candidate only when it has
    /// songs, every one of them is a candidate, and none of its artists is
    /// whitelisted.
    #[instrument(skip(self, removed, whitelist), fields(removed = removed.len()))]
    pub async fn plan(
        &self,
        removed: &BTreeSet<String>,
        whitelist: &HashSet<String>,
    ) -> StorageResult<DeletionPlan> {
        let mut plan = DeletionPlan {
            removed_artist_ids: removed.clone(),
            ..DeletionPlan::default()
        };

        let mut seen: HashSet<CatalogEntityRef> = HashSet::new();
        let mut playlists: Vec<CatalogEntityRef> = Vec::new();

        for artist_id in removed {
            for entity in self.store.find_entities_by_artist(artist_id).await? {
                if !seen.insert(entity.clone()) {
                    continue;
                }

                match entity.kind {
                    // Playlists depend on the song decisions; defer them.
                    EntityKind::Playlist => playlists.push(entity),
                    EntityKind::Song | EntityKind::Album => {
                        if self.loses_all_artists(&entity, whitelist).await? {
                            debug!(entity = %entity, "Scheduled for deletion");
                            match entity.kind {
                                EntityKind::Song => plan.candidate_song_ids.insert(entity.id),
                                _ => plan.candidate_album_ids.insert(entity.id),
                            };
                        }
                    }
                }
            }
        }

        for playlist in playlists {
            if !self.loses_all_artists(&playlist, whitelist).await? {
                continue;
            }

            let songs = self.store.playlist_song_ids(&playlist.id).await?;
            let all_songs_doomed = !songs.is_empty()
                && songs
                    .iter()
                    .all(|song_id| plan.candidate_song_ids.contains(song_id));

            if all_songs_doomed {
                debug!(entity = %playlist, "Scheduled for deletion");
                plan.candidate_playlist_ids.insert(playlist.id);
            }
        }

        info!(
            songs = plan.candidate_song_ids.len(),
            albums = plan.candidate_album_ids.len(),
            playlists = plan.candidate_playlist_ids.len(),
            "Deletion plan computed"
        );
        Ok(plan)
    }

    /// Apply a plan in one transaction.
    pub async fn apply(&self, plan: &DeletionPlan) -> StorageResult<CleanupReport> {
        if plan.has_no_candidates() && plan.removed_artist_ids.is_empty() {
            return Ok(CleanupReport::default());
        }
        self.store.delete_cascade(plan).await
    }

    /// Apply a plan and replace the persisted snapshot in the same
    /// transaction.
    pub async fn apply_and_commit(
        &self,
        plan: &DeletionPlan,
        snapshot: &WhitelistSnapshot,
    ) -> StorageResult<CleanupReport> {
        self.store.delete_cascade_and_commit(plan, snapshot).await
    }

    async fn loses_all_artists(
        &self,
        entity: &CatalogEntityRef,
        whitelist: &HashSet<String>,
    ) -> StorageResult<bool> {
        let artists = self.store.artist_ids_for(entity).await?;
        Ok(!artists.is_empty() && artists.iter().all(|a| !whitelist.contains(a)))
    }
}
