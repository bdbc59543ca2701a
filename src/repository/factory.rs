//! Repository detection: an ordered list of probes, first match wins.
//!
//! Nested markers (a Mercurial subrepo inside a Mercurial repo) are not
//! resolved here; the scan in [`crate::guru`] re-runs detection one level
//! below repositories that support sub-repositories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    Repository, RepositoryKind, accurev, bazaar, clearcase, cvs, git, mercurial, monotone,
    perforce, rcs, sccs, subversion,
};
use crate::canonical_or_normalized;
use crate::error::HistoryError;
use crate::executor::CommandEnv;

type Detect = fn(&Path, &CommandEnv) -> bool;
type Create = fn(PathBuf, Arc<CommandEnv>) -> Result<Arc<dyn Repository>, HistoryError>;

/// One repository type: its detection predicate and constructor.
pub struct Probe {
    pub kind: RepositoryKind,
    pub detect: Detect,
    pub create: Create,
}

/// Detection order. Earlier entries shadow later ones for the same directory.
pub const PROBES: &[Probe] = &[
    Probe {
        kind: RepositoryKind::Mercurial,
        detect: mercurial::is_repository_for,
        create: |d, c| Ok(Arc::new(mercurial::MercurialRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::AccuRev,
        detect: accurev::is_repository_for,
        create: |d, c| Ok(Arc::new(accurev::AccuRevRepository::new(d, c)?)),
    },
    Probe {
        kind: RepositoryKind::Bazaar,
        detect: bazaar::is_repository_for,
        create: |d, c| Ok(Arc::new(bazaar::BazaarRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::Git,
        detect: git::is_repository_for,
        create: |d, c| Ok(Arc::new(git::GitRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::Monotone,
        detect: monotone::is_repository_for,
        create: |d, c| Ok(Arc::new(monotone::MonotoneRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::Subversion,
        detect: subversion::is_repository_for,
        create: |d, c| Ok(Arc::new(subversion::SubversionRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::Sccs,
        detect: sccs::is_repository_for,
        create: |d, c| Ok(Arc::new(sccs::SccsRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::ClearCase,
        detect: clearcase::is_repository_for,
        create: |d, c| Ok(Arc::new(clearcase::ClearCaseRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::Perforce,
        detect: perforce::is_repository_for,
        create: |d, c| Ok(Arc::new(perforce::PerforceRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::Rcs,
        detect: rcs::is_repository_for,
        create: |d, c| Ok(Arc::new(rcs::RcsRepository::new(d, c))),
    },
    Probe {
        kind: RepositoryKind::Cvs,
        detect: cvs::is_repository_for,
        create: |d, c| Ok(Arc::new(cvs::CvsRepository::new(d, c))),
    },
];

/// Which kind of repository, if any, owns `dir` directly.
pub fn detect_kind(dir: &Path, commands: &CommandEnv) -> Option<RepositoryKind> {
    PROBES
        .iter()
        .find(|probe| (probe.detect)(dir, commands))
        .map(|probe| probe.kind)
}

/// Instantiate the repository rooted at `dir`, or `None` when no probe matches.
///
/// Construction failures are logged and reported as "no repository" so a
/// directory scan can continue past them.
pub fn detect(dir: &Path, commands: &Arc<CommandEnv>) -> Option<Arc<dyn Repository>> {
    if !dir.is_dir() {
        return None;
    }
    let probe = PROBES.iter().find(|probe| (probe.detect)(dir, commands))?;
    let canonical = canonical_or_normalized(dir);
    match (probe.create)(canonical.clone(), Arc::clone(commands)) {
        Ok(repo) => {
            debug!(dir = %canonical.display(), kind = %probe.kind, "Detected repository");
            Some(repo)
        }
        Err(e) => {
            warn!(dir = %canonical.display(), kind = %probe.kind, error = %e, "Failed to create repository");
            None
        }
    }
}
