//! Tests for incremental truncation and bulk cache population.

use super::*;
use crate::cache::db::DbHistoryCache;
use crate::cache::file::FileHistoryCache;
use crate::history::HistoryEntry;
use crate::test_support::{FakeRepository, touch};
use std::time::Duration;

fn history_of(revs: &[&str]) -> History {
    History::from_entries(revs.iter().map(|r| HistoryEntry::new(*r, None, "alice")).collect())
}

fn revisions(h: &History) -> Vec<&str> {
    h.entries().iter().map(|e| e.revision.as_str()).collect()
}

fn file_cache(tmp: &Path) -> FileHistoryCache {
    let cache = FileHistoryCache::new(
        tmp.join("data").join("historycache"),
        canonical_or_normalized(tmp),
        Duration::from_secs(30),
    );
    cache.initialize().unwrap();
    cache
}

// ─── Truncation ─────────────────────────────────────────────────────

#[test]
fn test_truncate_keeps_newer_entries() {
    let h = truncate_at_revision(history_of(&["5", "4", "3", "2", "1"]), "3").unwrap();
    assert_eq!(revisions(&h), vec!["5", "4"]);
}

#[test]
fn test_truncate_at_head_is_empty() {
    let h = truncate_at_revision(history_of(&["5", "4"]), "5").unwrap();
    assert!(h.is_empty());
}

#[test]
fn test_truncate_missing_boundary_is_an_error() {
    let err = truncate_at_revision(history_of(&["5", "4"]), "9").unwrap_err();
    match err {
        HistoryError::IncrementalBoundary { expected, found } => {
            assert_eq!(expected, "9");
            assert_eq!(found.as_deref(), Some("4"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_remove_and_verify_oldest() {
    let mut h = history_of(&["3", "2"]);
    remove_and_verify_oldest(&mut h, "2").unwrap();
    assert_eq!(revisions(&h), vec!["3"]);

    let mut empty = History::new();
    assert!(matches!(
        remove_and_verify_oldest(&mut empty, "2"),
        Err(HistoryError::IncrementalBoundary { found: None, .. })
    ));
}

// ─── create_cache ───────────────────────────────────────────────────

#[test]
fn test_create_cache_full_then_incremental() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("proj");
    let a = touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["a.c"]);
    repo.push_commit("r2", "bob", "two", &["a.c"]);
    let cache = file_cache(tmp.path());

    create_cache(&repo, &cache, None).unwrap();
    assert_eq!(cache.latest_cached_revision(&repo).unwrap().as_deref(), Some("r2"));

    repo.push_commit("r3", "carol", "three", &["a.c"]);
    create_cache(&repo, &cache, Some("r2")).unwrap();
    assert_eq!(cache.latest_cached_revision(&repo).unwrap().as_deref(), Some("r3"));
    let h = cache.get(&a, &repo, false).unwrap().unwrap();
    assert_eq!(revisions(&h), vec!["r3", "r2", "r1"]);
}

#[test]
fn test_create_cache_falls_back_to_full_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("proj");
    let a = touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["a.c"]);
    let cache = DbHistoryCache::new(tmp.path().join("history.db"));
    cache.initialize().unwrap();

    // a stale entry that is no longer part of the history
    let mut stale = history_of(&["gone"]);
    stale.entries_mut()[0].add_file("a.c");
    cache.store(&stale, &repo).unwrap();

    repo.push_commit("r2", "alice", "two", &["a.c"]);
    repo.set_fail_incremental(true);
    create_cache(&repo, &cache, Some("gone")).unwrap();

    let h = cache.get(&a, &repo, false).unwrap().unwrap();
    assert_eq!(revisions(&h), vec!["r2", "r1"]);
    assert_eq!(cache.latest_cached_revision(&repo).unwrap().as_deref(), Some("r2"));
}

#[test]
fn test_full_rebuild_leaves_nested_repository_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let outer_root = tmp.path().join("outer");
    touch(&outer_root, "a.c");
    let inner_file = touch(&outer_root, "sub/b.c");
    let outer = FakeRepository::new(&outer_root);
    outer.push_commit("o1", "alice", "outer", &["a.c"]);
    let inner = FakeRepository::new(&outer_root.join("sub"));
    inner.push_commit("i1", "bob", "inner", &["b.c"]);
    let cache = DbHistoryCache::new(tmp.path().join("history.db"));
    cache.initialize().unwrap();
    create_cache(&outer, &cache, None).unwrap();
    create_cache(&inner, &cache, None).unwrap();

    outer.push_commit("o2", "alice", "more", &["a.c"]);
    outer.set_fail_incremental(true);
    create_cache(&outer, &cache, Some("o1")).unwrap();

    assert_eq!(cache.latest_cached_revision(&outer).unwrap().as_deref(), Some("o2"));
    assert_eq!(cache.latest_cached_revision(&inner).unwrap().as_deref(), Some("i1"));
    let h = cache.get(&inner_file, &inner, false).unwrap().unwrap();
    assert_eq!(revisions(&h), vec!["i1"]);
}

#[test]
fn test_create_cache_full_failure_propagates() {
    let tmp = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let repo = FakeRepository::new(outside.path());
    repo.push_commit("r1", "alice", "one", &["a.c"]);
    // the repository lies outside the cache's source root
    let cache = file_cache(tmp.path());
    assert!(create_cache(&repo, &cache, None).is_err());
}

#[test]
fn test_create_cache_skips_unusable_repositories() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("proj");
    touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["a.c"]);
    repo.set_working(false);
    let cache = file_cache(tmp.path());

    create_cache(&repo, &cache, None).unwrap();
    assert_eq!(repo.history_calls(), 0);
    assert_eq!(cache.latest_cached_revision(&repo).unwrap(), None);
}

// ─── Property-based tests (proptest) ────────────────────────────────

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Full history equals the history up to a cut plus what came after it.
        #[test]
        fn truncate_then_prepend_rebuilds_full(n in 1usize..40, cut in 0usize..40) {
            let cut = cut % n;
            let revs: Vec<String> = (0..n).rev().map(|i| format!("r{i}")).collect();
            let refs: Vec<&str> = revs.iter().map(String::as_str).collect();
            let full = history_of(&refs);

            // what a cache holding everything up to `boundary` contains
            let boundary = format!("r{cut}");
            let mut cached = History::from_entries(full.entries()[n - 1 - cut..].to_vec());
            let newer = truncate_at_revision(full.clone(), &boundary).unwrap();
            prop_assert_eq!(newer.len(), n - 1 - cut);
            cached.prepend(newer);
            prop_assert_eq!(cached, full);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        /// Incremental database population yields the same history as a full one.
        #[test]
        fn incremental_db_matches_full(n in 2usize..12, cut in 1usize..12) {
            let cut = 1 + cut % (n - 1);
            let tmp = tempfile::tempdir().unwrap();
            let root = tmp.path().join("proj");
            touch(&root, "a.c");
            let repo = FakeRepository::new(&root);
            for i in 0..cut {
                repo.push_commit(&format!("r{i}"), "alice", "c", &["a.c"]);
            }
            let cache = DbHistoryCache::new(tmp.path().join("history.db"));
            cache.initialize().unwrap();
            create_cache(&repo, &cache, None).unwrap();

            for i in cut..n {
                repo.push_commit(&format!("r{i}"), "bob", "c", &["a.c"]);
            }
            let since = cache.latest_cached_revision(&repo).unwrap();
            create_cache(&repo, &cache, since.as_deref()).unwrap();

            let cached = cache.get(&root, &repo, false).unwrap().unwrap();
            let mut full = repo.history(&root).unwrap();
            full.strip_files();
            prop_assert_eq!(revisions(&cached), revisions(&full));
        }
    }
}
