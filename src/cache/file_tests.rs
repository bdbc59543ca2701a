//! Tests for the file-backed history cache.

use super::*;
use crate::test_support::{FakeRepository, touch};
use std::time::SystemTime;

const SLOW: Duration = Duration::from_secs(3600);

fn setup() -> (tempfile::TempDir, FileHistoryCache) {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    let cache = FileHistoryCache::new(
        tmp.path().join("data").join("historycache"),
        canonical_or_normalized(&tmp.path().join("src")),
        SLOW,
    );
    cache.initialize().unwrap();
    (tmp, cache)
}

fn revisions(h: &History) -> Vec<&str> {
    h.entries().iter().map(|e| e.revision.as_str()).collect()
}

#[test]
fn test_store_then_get_serves_from_cache() {
    let (tmp, cache) = setup();
    let root = tmp.path().join("src").join("proj");
    let a = touch(&root, "a.c");
    touch(&root, "lib/b.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "add a", &["a.c"]);
    repo.push_commit("r2", "bob", "add b", &["lib/b.c"]);
    repo.push_commit("r3", "carol", "touch both", &["a.c", "lib/b.c"]);

    let full = repo.history(&root).unwrap();
    cache.store(&full, &repo).unwrap();
    let calls = repo.history_calls();

    let h = cache.get(&a, &repo, false).unwrap().unwrap();
    assert_eq!(revisions(&h), vec!["r3", "r1"]);
    assert!(!h.has_file_list());
    assert_eq!(h.entries()[0].author, "carol");
    assert_eq!(h.entries()[0].date, full.entries()[0].date);
    assert_eq!(repo.history_calls(), calls);
    assert_eq!(cache.latest_cached_revision(&repo).unwrap().as_deref(), Some("r3"));
}

#[test]
fn test_incremental_store_merges_head_first() {
    let (tmp, cache) = setup();
    let root = tmp.path().join("src").join("proj");
    let a = touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["a.c"]);
    repo.push_commit("r2", "alice", "two", &["a.c"]);
    cache.store(&repo.history(&root).unwrap(), &repo).unwrap();

    repo.push_commit("r3", "alice", "three", &["a.c"]);
    let newer = repo.history_since(&root, Some("r2")).unwrap();
    assert_eq!(revisions(&newer), vec!["r3"]);
    cache.store(&newer, &repo).unwrap();

    let h = load_blob(&cache.cache_path(&a).unwrap()).unwrap();
    assert_eq!(revisions(&h), vec!["r3", "r2", "r1"]);
    assert_eq!(cache.latest_cached_revision(&repo).unwrap().as_deref(), Some("r3"));
}

#[test]
fn test_stale_entry_is_reparsed() {
    let (tmp, cache) = setup();
    let root = tmp.path().join("src").join("proj");
    let a = touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["a.c"]);
    cache.store(&repo.history(&root).unwrap(), &repo).unwrap();

    repo.push_commit("r2", "alice", "two", &["a.c"]);
    fs::File::options()
        .write(true)
        .open(&a)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    let calls = repo.history_calls();
    let h = cache.get(&a, &repo, false).unwrap().unwrap();
    assert_eq!(revisions(&h), vec!["r2", "r1"]);
    assert_eq!(repo.history_calls(), calls + 1);
}

#[test]
fn test_corrupt_blob_is_a_miss() {
    let (tmp, cache) = setup();
    let root = tmp.path().join("src").join("proj");
    let a = touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["a.c"]);

    let blob = cache.cache_path(&a).unwrap();
    fs::create_dir_all(blob.parent().unwrap()).unwrap();
    fs::write(&blob, b"garbage, not a cache file").unwrap();
    assert!(load_blob(&blob).is_err());

    let h = cache.get(&a, &repo, true).unwrap().unwrap();
    assert_eq!(revisions(&h), vec!["r1"]);
    assert!(h.entries()[0].files.contains("a.c"));
    // an existing entry is always rewritten after a re-parse
    assert_eq!(revisions(&load_blob(&blob).unwrap()), vec!["r1"]);
}

#[test]
fn test_fast_miss_is_not_stored() {
    let (tmp, cache) = setup();
    let root = tmp.path().join("src").join("proj");
    let a = touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["a.c"]);

    assert_eq!(cache.get(&a, &repo, false).unwrap().unwrap().len(), 1);
    assert!(!cache.cache_path(&a).unwrap().exists());
}

#[test]
fn test_directory_history_bypasses_cache() {
    let (tmp, cache) = setup();
    let root = tmp.path().join("src").join("proj");
    touch(&root, "lib/b.c");
    let repo = FakeRepository::new(&root);
    repo.push_commit("r1", "alice", "one", &["lib/b.c"]);

    let h = cache.get(&root.join("lib"), &repo, true).unwrap().unwrap();
    assert!(h.entries()[0].files.contains("lib/b.c"));
    let h = cache.get(&root.join("lib"), &repo, false).unwrap().unwrap();
    assert!(!h.has_file_list());
    assert_eq!(repo.history_calls(), 2);
}

#[test]
fn test_clear_only_touches_one_repository() {
    let (tmp, cache) = setup();
    let src = tmp.path().join("src");
    let a = touch(&src.join("proj-a"), "x.c");
    let b = touch(&src.join("proj-ab"), "x.c");
    let repo_a = FakeRepository::new(&src.join("proj-a"));
    let repo_b = FakeRepository::new(&src.join("proj-ab"));
    for repo in [&repo_a, &repo_b] {
        repo.push_commit("r1", "alice", "one", &["x.c"]);
        cache.store(&repo.history(repo.directory()).unwrap(), repo).unwrap();
    }
    assert!(cache.has_cache_for_directory(repo_a.directory(), &repo_a).unwrap());

    cache.clear(repo_a.directory()).unwrap();
    assert!(!cache.cache_path(&a).unwrap().exists());
    assert!(cache.cache_path(&b).unwrap().exists());
    assert!(!cache.has_cache_for_directory(repo_a.directory(), &repo_a).unwrap());
    assert_eq!(cache.latest_cached_revision(&repo_a).unwrap(), None);
    assert_eq!(cache.latest_cached_revision(&repo_b).unwrap().as_deref(), Some("r1"));
}

#[test]
fn test_invalidate_keeps_nested_repository() {
    let (tmp, cache) = setup();
    let outer_root = tmp.path().join("src").join("outer");
    let a = touch(&outer_root, "a.c");
    let deep = touch(&outer_root, "lib/deep.c");
    let b = touch(&outer_root, "sub/b.c");
    let outer = FakeRepository::new(&outer_root);
    outer.push_commit("o1", "alice", "outer", &["a.c", "lib/deep.c"]);
    let inner = FakeRepository::new(&outer_root.join("sub"));
    inner.push_commit("i1", "bob", "inner", &["b.c"]);
    for repo in [&outer, &inner] {
        cache.store(&repo.history(repo.directory()).unwrap(), repo).unwrap();
    }

    cache.invalidate(&outer).unwrap();
    assert!(!cache.cache_path(&a).unwrap().exists());
    assert!(!cache.cache_path(&deep).unwrap().exists());
    assert_eq!(cache.latest_cached_revision(&outer).unwrap(), None);

    assert!(cache.cache_path(&b).unwrap().exists());
    assert_eq!(cache.latest_cached_revision(&inner).unwrap().as_deref(), Some("i1"));
    let h = cache.get(&b, &inner, false).unwrap().unwrap();
    assert_eq!(revisions(&h), vec!["i1"]);
}

#[test]
fn test_path_outside_source_root_is_rejected() {
    let (_tmp, cache) = setup();
    let other = tempfile::tempdir().unwrap();
    assert!(matches!(
        cache.cache_path(&other.path().join("x.c")),
        Err(HistoryError::InvalidPath(_))
    ));
}

#[test]
fn test_concurrent_stores_leave_a_readable_blob() {
    let (tmp, cache) = setup();
    let root = tmp.path().join("src").join("proj");
    let a = touch(&root, "a.c");
    let repo = FakeRepository::new(&root);
    for i in 0..20 {
        repo.push_commit(&format!("r{i}"), "alice", "change", &["a.c"]);
    }
    let history = repo.history(&root).unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| cache.store(&history, &repo).unwrap());
        }
    });

    let h = load_blob(&cache.cache_path(&a).unwrap()).unwrap();
    assert_eq!(h.len(), 20);
    assert_eq!(h.head_revision(), Some("r19"));
}

#[test]
fn test_format_version_mismatch_is_rejected() {
    let (tmp, _cache) = setup();
    let path = tmp.path().join("old.hist");
    let mut bytes = CACHE_MAGIC.to_vec();
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    bincode::serialize_into(
        &mut encoder,
        &CacheFile {
            format_version: FORMAT_VERSION + 1,
            entries: Vec::new(),
        },
    )
    .unwrap();
    bytes.extend(encoder.finish().unwrap());
    fs::write(&path, bytes).unwrap();

    let err = load_blob(&path).unwrap_err();
    assert!(err.to_string().contains("format version"));
}
