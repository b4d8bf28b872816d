//! Whitelist diffing
//!
//! Compares the last applied snapshot with a freshly fetched payload. The
//! content hash is the fast path; when it differs the full id sets are
//! compared.

use core_library::models::WhitelistSnapshot;
use std::collections::BTreeSet;

use crate::fetcher::RemotePayload;

/// Set difference between two whitelists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Artist ids present remotely but not in the previous snapshot
    pub added: BTreeSet<String>,
    /// Artist ids in the previous snapshot that are no longer published
    pub removed: BTreeSet<String>,
    /// The content hash matched; nothing needs to be written
    pub unchanged: bool,
}

impl DiffResult {
    pub fn changed_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Compare `incoming` against the previously applied snapshot.
///
/// With no previous snapshot every incoming artist counts as added.
pub fn diff(previous: Option<&WhitelistSnapshot>, incoming: &RemotePayload) -> DiffResult {
    let Some(previous) = previous else {
        return DiffResult {
            added: artist_ids(incoming),
            removed: BTreeSet::new(),
            unchanged: false,
        };
    };

    if previous.content_hash == incoming.content_hash {
        return DiffResult {
            unchanged: true,
            ..DiffResult::default()
        };
    }

    let incoming_ids = artist_ids(incoming);

    let previous_ids: BTreeSet<String> = previous
        .entries()
        .iter()
        .map(|e| e.artist_id.clone())
        .collect();

    DiffResult {
        added: incoming_ids.difference(&previous_ids).cloned().collect(),
        removed: previous_ids.difference(&incoming_ids).cloned().collect(),
        unchanged: false,
    }
}

fn artist_ids(payload: &RemotePayload) -> BTreeSet<String> {
    payload
        .entries
        .iter()
        .map(|e| e.artist_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_library::models::WhitelistEntry;

    fn entries(ids: &[&str]) -> Vec<WhitelistEntry> {
        ids.iter().map(|id| WhitelistEntry::new(*id, *id)).collect()
    }

    fn snapshot(hash: &str, ids: &[&str]) -> WhitelistSnapshot {
        WhitelistSnapshot::new(hash, entries(ids), Utc::now())
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_run_adds_everything() {
        let result = diff(None, &RemotePayload::new("h1", entries(&["A", "B"])));
        assert_eq!(result.added, set(&["A", "B"]));
        assert!(result.removed.is_empty());
        assert!(!result.unchanged);
        assert_eq!(result.changed_count(), 2);
    }

    #[test]
    fn test_same_hash_short_circuits() {
        let previous = snapshot("h1", &["A", "B"]);
        // Same hash wins even if the payload content looks different.
        let result = diff(Some(&previous), &RemotePayload::new("h1", entries(&["C"])));
        assert!(result.unchanged);
        assert!(result.added.is_empty());
        assert!(result.removed.is_empty());
        assert_eq!(result.changed_count(), 0);
    }

    #[test]
    fn test_changed_hash_compares_full_sets() {
        let previous = snapshot("h1", &["A", "B", "C"]);
        let result = diff(Some(&previous), &RemotePayload::new("h2", entries(&["A", "C", "D"])));

        assert_eq!(result.added, set(&["D"]));
        assert_eq!(result.removed, set(&["B"]));
        assert!(!result.unchanged);
        assert!(result.added.is_disjoint(&result.removed));
    }

    #[test]
    fn test_new_hash_with_identical_sets() {
        let previous = snapshot("h1", &["A"]);
        let result = diff(Some(&previous), &RemotePayload::new("h2", entries(&["A"])));
        assert!(!result.unchanged);
        assert_eq!(result.changed_count(), 0);
    }

    #[test]
    fn test_everything_removed() {
        let previous = snapshot("h1", &["A", "B"]);
        let result = diff(Some(&previous), &RemotePayload::new("h2", Vec::new()));
        assert_eq!(result.removed, set(&["A", "B"]));
        assert!(result.added.is_empty());
    }
}
