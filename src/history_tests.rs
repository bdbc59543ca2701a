//! Unit tests for the history data model.

use super::*;
use chrono::TimeZone;

fn entry(rev: &str) -> HistoryEntry {
    HistoryEntry::new(rev, None, "alice")
}

fn history_of(revs: &[&str]) -> History {
    History::from_entries(revs.iter().map(|r| entry(r)).collect())
}

// ─── HistoryEntry ───────────────────────────────────────────────────

#[test]
fn test_append_message_swallows_blank_lines() {
    let mut e = entry("1");
    e.append_message("    First line");
    e.append_message("");
    e.append_message("   ");
    e.append_message("    Second line   ");
    e.seal();
    assert_eq!(e.message, "First line\nSecond line");
}

#[test]
fn test_seal_on_empty_message() {
    let mut e = entry("1");
    e.seal();
    assert_eq!(e.message, "");
}

#[test]
fn test_add_file_ignores_empty_and_duplicates() {
    let mut e = entry("1");
    e.add_file("src/a.c");
    e.add_file("");
    e.add_file("src/a.c");
    e.add_file("README");
    assert_eq!(e.files.len(), 2);
    e.strip_files();
    assert!(e.files.is_empty());
}

#[test]
fn test_add_tag_joins() {
    let mut e = entry("1");
    e.add_tag("v1");
    e.add_tag("stable");
    assert_eq!(e.tags.as_deref(), Some("v1, stable"));
}

// ─── Paging ─────────────────────────────────────────────────────────

#[test]
fn test_page_middle_of_eight() {
    let h = history_of(&["8", "7", "6", "5", "4", "3", "2", "1"]);
    let page: Vec<&str> = h.page(5, 2).iter().map(|e| e.revision.as_str()).collect();
    assert_eq!(page, vec!["6", "5", "4", "3", "2"]);
}

#[test]
fn test_page_past_end() {
    let h = history_of(&["3", "2", "1"]);
    assert!(h.page(5, 10).is_empty());
    assert_eq!(h.page(5, 1).len(), 2);
}

#[test]
fn test_page_zero_limit_means_rest() {
    let h = history_of(&["3", "2", "1"]);
    assert_eq!(h.page(0, 1).len(), 2);
}

#[test]
fn test_has_file_list() {
    let mut h = history_of(&["2", "1"]);
    assert!(!h.has_file_list());
    h.entries_mut()[1].add_file("a.txt");
    assert!(h.has_file_list());
    h.strip_files();
    assert!(!h.has_file_list());
}

#[test]
fn test_head_revision() {
    assert_eq!(history_of(&["9", "3"]).head_revision(), Some("9"));
    assert_eq!(History::new().head_revision(), None);
}

// ─── Merging ────────────────────────────────────────────────────────

#[test]
fn test_prepend_dedupes_overlap() {
    let mut old = history_of(&["3", "2", "1"]);
    old.prepend(history_of(&["5", "4", "3"]));
    let revs: Vec<&str> = old.entries().iter().map(|e| e.revision.as_str()).collect();
    assert_eq!(revs, vec!["5", "4", "3", "2", "1"]);
}

// ─── Revision matching ──────────────────────────────────────────────

#[test]
fn test_revision_matches_mercurial_local() {
    assert!(revision_matches("3:8a7b6c5d4e3f", "3"));
    assert!(!revision_matches("13:8a7b6c5d4e3f", "3"));
}

#[test]
fn test_revision_matches_short_hash() {
    let full = "0123456789abcdef0123456789abcdef01234567";
    assert!(revision_matches(full, "0123456"));
    assert!(!revision_matches(full, "012345"));
    assert!(!revision_matches("12345678", "1234567"));
}

// ─── LineInfo ───────────────────────────────────────────────────────

#[test]
fn test_attach_annotation_compresses_runs() {
    let mut h = history_of(&["R2", "R1"]);
    let mut ann = Annotation::new("f");
    for _ in 0..8 {
        ann.add_line("R1", "alice", true);
    }
    for _ in 0..3 {
        ann.add_line("R2", "bob", true);
    }
    h.attach_annotation(&ann);
    assert_eq!(
        h.line_info(),
        &[
            LineInfo { line: 1, entry: Some(1) },
            LineInfo { line: 9, entry: Some(0) }
        ]
    );
    assert_eq!(h.entry_for_line(5).map(|e| e.revision.as_str()), Some("R1"));
    assert_eq!(h.entry_for_line(9).map(|e| e.revision.as_str()), Some("R2"));
    assert_eq!(h.entry_for_line(11).map(|e| e.revision.as_str()), Some("R2"));
    assert!(h.entry_for_line(0).is_none());
}

#[test]
fn test_attach_annotation_unknown_revision_breaks_run() {
    let mut h = history_of(&["R1"]);
    let mut ann = Annotation::new("f");
    ann.add_line("R1", "a", true);
    ann.add_line("0000000", "Not Committed Yet", false);
    ann.add_line("R1", "a", true);
    h.attach_annotation(&ann);
    assert_eq!(h.line_info().len(), 3);
    assert!(h.entry_for_line(2).is_none());
    assert!(h.entry_for_line(3).is_some());
}

#[test]
fn test_serde_json_shape() {
    let mut e = HistoryEntry::new("abc", Some(Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()), "bob")
        .with_message("fix");
    e.add_file("x.rs");
    let h = History::from_entries(vec![e]);
    let json = serde_json::to_string(&h).unwrap();
    assert!(json.contains("\"revision\":\"abc\""));
    assert!(json.contains("2021-03-04T05:06:07Z"));
    assert!(json.contains("x.rs"));
    let back: History = serde_json::from_str(&json).unwrap();
    assert_eq!(back, h);
}

// ─── Property-based tests (proptest) ────────────────────────────────

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every line resolves to the entry its annotation names.
        #[test]
        fn line_info_matches_dense_annotation(picks in proptest::collection::vec(0usize..4, 1..60)) {
            let mut h = history_of(&["r3", "r2", "r1", "r0"]);
            let mut ann = Annotation::new("f");
            for p in &picks {
                ann.add_line(format!("r{}", p), "a", true);
            }
            h.attach_annotation(&ann);
            prop_assert!(h.line_info().len() <= picks.len());
            for (idx, p) in picks.iter().enumerate() {
                let e = h.entry_for_line(idx as u32 + 1);
                prop_assert_eq!(e.map(|e| e.revision.clone()), Some(format!("r{}", p)));
            }
        }

        /// Paging never yields more than `limit` and always a contiguous slice.
        #[test]
        fn page_is_contiguous_slice(n in 0usize..30, limit in 1usize..10, offset in 0usize..40) {
            let revs: Vec<String> = (0..n).rev().map(|i| i.to_string()).collect();
            let refs: Vec<&str> = revs.iter().map(String::as_str).collect();
            let h = history_of(&refs);
            let page = h.page(limit, offset);
            prop_assert!(page.len() <= limit);
            if !page.is_empty() {
                prop_assert_eq!(&page[0], &h.entries()[offset]);
            }
        }
    }
}
