//! Unit tests for the Git repository and its parsers.
//!
//! Parser tests use captured output. The repository tests build a scratch
//! repository and are skipped when `git` is not in PATH.

use super::*;
use crate::executor::Executor;
use crate::parser::parse_bytes;
use crate::repository::{create_cache, truncate_at_revision};
use chrono::{Datelike, Timelike};
use std::fs;

const LOG: &str = "\
commit 1111111111111111111111111111111111111111
Author:     Alice Example <alice@example.com>
AuthorDate: 2018-01-12T10:00:00+01:00
Commit:     Alice Example <alice@example.com>
CommitDate: 2018-01-12T10:00:00+01:00

    Fix the frobnicator

    Second paragraph.

src/frob.c
src/frob.h

commit 2222222222222222222222222222222222222222
Merge: aaaaaaa bbbbbbb
Author:     Bob <bob@example.com>
AuthorDate: 2017-12-31T23:59:59+00:00
Commit:     Bob <bob@example.com>
CommitDate: 2017-12-31T23:59:59+00:00

    Merge branch 'x'

commit 3333333333333333333333333333333333333333
Author:     Carol <carol@example.com>
AuthorDate: not a date
Commit:     Carol <carol@example.com>
CommitDate: 2017-01-01T00:00:00+00:00

    Initial import

README
";

#[test]
fn test_parse_fuller_log() {
    let h = parse_bytes(&mut GitLogParser, LOG.as_bytes()).unwrap();
    assert_eq!(h.len(), 3);

    let first = &h.entries()[0];
    assert_eq!(first.revision, "1111111111111111111111111111111111111111");
    assert_eq!(first.author, "Alice Example <alice@example.com>");
    assert_eq!(first.message, "Fix the frobnicator\nSecond paragraph.");
    let date = first.date.unwrap();
    assert_eq!((date.year(), date.hour()), (2018, 9));
    assert_eq!(first.files.iter().cloned().collect::<Vec<_>>(), vec!["src/frob.c", "src/frob.h"]);

    let merge = &h.entries()[1];
    assert_eq!(merge.message, "Merge branch 'x'");
    assert!(merge.files.is_empty());
}

#[test]
fn test_parse_keeps_entry_with_bad_date() {
    let h = parse_bytes(&mut GitLogParser, LOG.as_bytes()).unwrap();
    let last = &h.entries()[2];
    assert_eq!(last.date, None);
    assert_eq!(last.message, "Initial import");
    assert!(last.files.contains("README"));
}

#[test]
fn test_parse_empty_output() {
    let h = parse_bytes(&mut GitLogParser, b"").unwrap();
    assert!(h.is_empty());
}

#[test]
fn test_parse_decorated_commit_line() {
    let log = "commit 4444444444444444444444444444444444444444 (HEAD -> main, tag: v1)\nAuthor: D <d@x>\n\n    msg\n";
    let h = parse_bytes(&mut GitLogParser, log.as_bytes()).unwrap();
    assert_eq!(h.entries()[0].revision, "4444444444444444444444444444444444444444");
}

// ─── Porcelain blame ────────────────────────────────────────────────

const PORCELAIN: &str = "\
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa 1 1 2
author Alice
author-mail <alice@example.com>
author-time 1700000000
author-tz +0100
summary first
filename f.txt
\tline one
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa 2 2
\tline two
bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb 1 3 1
author Bob
author-mail <bob@example.com>
author-time 1700001000
author-tz +0000
summary second
filename f.txt
\tline three
0000000000000000000000000000000000000000 4 4 1
author Not Committed Yet
author-mail <not.committed.yet>
filename f.txt
\tline four
";

#[test]
fn test_parse_blame_porcelain_reuses_authors() {
    let ann = parse_blame_porcelain("f.txt", PORCELAIN);
    assert_eq!(ann.size(), 4);
    assert_eq!(ann.author(1), Some("Alice"));
    assert_eq!(ann.author(2), Some("Alice"));
    assert_eq!(ann.author(3), Some("Bob"));
    assert_eq!(ann.revision(3), Some("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"));
    assert!(!ann.is_enabled(4));
    assert_eq!(ann.widest_revision(), 40);
}

#[test]
fn test_parse_tag_list() {
    let out = "\
abc:1700000000:HEAD -> main, tag: v2.0, origin/main:
def:1600000000:tag: v1.0:
fed:1500000000:origin/old:
";
    let tags = parse_tag_list(out);
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].tags, "v2.0");
    assert_eq!(tags[1].tags, "v1.0");
}

// ─── Against a real repository ──────────────────────────────────────

fn git_available() -> bool {
    Executor::new("git", std::env::temp_dir()).arg("--version").succeeds()
}

fn git(dir: &Path, args: &[&str]) {
    Executor::new("git", dir)
        .args(["-c", "user.name=Tester", "-c", "user.email=tester@example.com", "-c", "commit.gpgsign=false"])
        .args(args.iter().copied())
        .env("GIT_AUTHOR_DATE", "2020-01-01T00:00:00Z")
        .env("GIT_COMMITTER_DATE", "2020-01-01T00:00:00Z")
        .run_checked()
        .unwrap();
}

/// Scratch repository with `commits` commits, each appending a line to `a.txt`.
fn scratch_repo(commits: usize) -> (tempfile::TempDir, GitRepository) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = crate::canonical_or_normalized(tmp.path());
    git(&dir, &["init", "-q"]);
    let mut content = String::new();
    for i in 0..commits {
        content.push_str(&format!("line {}\n", i));
        fs::write(dir.join("a.txt"), &content).unwrap();
        if i == 0 {
            fs::create_dir_all(dir.join("sub")).unwrap();
            fs::write(dir.join("sub").join("b.txt"), "b\n").unwrap();
        }
        git(&dir, &["add", "-A"]);
        git(&dir, &["commit", "-q", "-m", &format!("commit {}", i)]);
    }
    let repo = GitRepository::new(dir, Arc::new(CommandEnv::default()));
    (tmp, repo)
}

#[test]
fn test_real_history_of_file_and_directory() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let (_tmp, repo) = scratch_repo(3);
    let file = repo.directory().join("a.txt");

    let h = repo.history(&file).unwrap();
    assert_eq!(h.len(), 3);
    assert_eq!(h.entries()[0].message, "commit 2");
    assert_eq!(h.entries()[2].message, "commit 0");
    assert_eq!(h.entries()[0].author, "Tester <tester@example.com>");

    let dir_history = repo.history(repo.directory()).unwrap();
    assert!(dir_history.entries()[2].files.contains("sub/b.txt"));

    // idempotent
    assert_eq!(repo.history(&file).unwrap(), h);
}

#[test]
fn test_real_incremental_matches_truncation() {
    if !git_available() {
        return;
    }
    let (_tmp, repo) = scratch_repo(4);
    let dir = repo.directory().to_path_buf();
    let full = repo.history(&dir).unwrap();
    let since = full.entries()[2].revision.clone();

    let native = repo.history_since(&dir, Some(&since)).unwrap();
    let truncated = truncate_at_revision(full.clone(), &since).unwrap();
    assert_eq!(native, truncated);
    assert_eq!(native.len(), 2);

    let err = repo
        .history_since(&dir, Some("ffffffffffffffffffffffffffffffffffffffff"))
        .unwrap_err();
    assert!(matches!(err, HistoryError::IncrementalBoundary { .. }));
}

#[test]
fn test_real_annotate_and_content() {
    if !git_available() {
        return;
    }
    let (_tmp, repo) = scratch_repo(2);
    let file = repo.directory().join("a.txt");
    let ann = repo.annotate(&file, None).unwrap();
    assert_eq!(ann.size(), 2);
    assert_eq!(ann.author(1), Some("Tester"));
    assert_ne!(ann.revision(1), ann.revision(2));

    let h = repo.history(&file).unwrap();
    let oldest = &h.entries()[1].revision;
    let content = repo.content_at(repo.directory(), "a.txt", oldest).unwrap();
    assert_eq!(content, b"line 0\n");
}

#[test]
fn test_real_update_without_remote_is_noop() {
    if !git_available() {
        return;
    }
    let (_tmp, repo) = scratch_repo(1);
    repo.update().unwrap();
}

#[test]
fn test_real_create_cache_into_file_cache() {
    if !git_available() {
        return;
    }
    let (tmp, repo) = scratch_repo(2);
    let data = tempfile::tempdir().unwrap();
    let cache = crate::cache::file::FileHistoryCache::new(
        data.path().join("historycache"),
        crate::canonical_or_normalized(tmp.path()),
        std::time::Duration::from_secs(30),
    );
    create_cache(&repo, &cache, None).unwrap();
    use crate::cache::HistoryCache;
    let head = repo.history(repo.directory()).unwrap().head_revision().map(str::to_string);
    assert_eq!(cache.latest_cached_revision(&repo).unwrap(), head);
}
