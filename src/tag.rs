//! VCS tags and their placement in a head-first [`History`].
//!
//! A [`TagEntry`] points either at a linear revision number (Bazaar,
//! Mercurial local numbers, Subversion) or at a date (Git, where hashes carry
//! no order). Each flavour compares itself against a [`HistoryEntry`]'s native
//! revision string.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::history::{History, HistoryEntry};

/// Where a tag sits in the revision order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TagPoint {
    Revision(i64),
    Date(DateTime<Utc>),
}

/// How to read an entry's revision string when comparing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagFlavor {
    /// Plain integer revisions (`1234`, Bazaar `42`, Subversion `r42` without the `r`).
    Linear,
    /// `local:hash`, compared by the local number.
    Mercurial,
    /// Compared by entry date.
    Dated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagEntry {
    pub point: TagPoint,
    pub tags: String,
    flavor: TagFlavor,
}

impl TagEntry {
    pub fn at_revision(flavor: TagFlavor, revision: i64, tags: impl Into<String>) -> Self {
        TagEntry {
            point: TagPoint::Revision(revision),
            tags: tags.into(),
            flavor,
        }
    }

    pub fn at_date(date: DateTime<Utc>, tags: impl Into<String>) -> Self {
        TagEntry {
            point: TagPoint::Date(date),
            tags: tags.into(),
            flavor: TagFlavor::Dated,
        }
    }

    /// Order of this tag relative to `entry`: `Greater` means the tag is newer.
    ///
    /// Entries whose revision cannot be read in this flavour compare as
    /// `Less` so a tag is never attached to them.
    pub fn compare_to(&self, entry: &HistoryEntry) -> Ordering {
        match (&self.point, self.flavor) {
            (TagPoint::Revision(rev), TagFlavor::Mercurial) => {
                let local = entry.revision.split(':').next().unwrap_or("");
                match local.trim().parse::<i64>() {
                    Ok(n) => rev.cmp(&n),
                    Err(_) => Ordering::Less,
                }
            }
            (TagPoint::Revision(rev), _) => match entry.revision.trim().parse::<i64>() {
                Ok(n) => rev.cmp(&n),
                Err(_) => Ordering::Less,
            },
            (TagPoint::Date(date), _) => match entry.date {
                Some(d) => date.cmp(&d),
                None => Ordering::Less,
            },
        }
    }
}

/// Attach tags to the newest entry that is not newer than each tag.
///
/// `tags` may be in any order; it is sorted newest first internally.
pub fn assign_tags(history: &mut History, tags: &[TagEntry]) {
    let mut sorted: Vec<&TagEntry> = tags.iter().collect();
    sorted.sort_by(|a, b| b.point.cmp(&a.point));

    let mut pending = sorted.into_iter().peekable();
    for entry in history.entries_mut().iter_mut() {
        while let Some(tag) = pending.peek() {
            if tag.compare_to(entry) != Ordering::Less {
                entry.add_tag(&tag.tags);
                pending.next();
            } else {
                break;
            }
        }
        if pending.peek().is_none() {
            break;
        }
    }
    let unplaced = pending.count();
    if unplaced > 0 {
        debug!(unplaced, "Tags older than the oldest history entry were not assigned");
    }
}
