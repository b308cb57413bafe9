//! Bounded total-size discovery.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use jwalk::{Parallelism, WalkDir};

/// Bytes and units under a set of roots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// Regular-file bytes.
    pub bytes: u64,
    /// Entries of any type, roots included.
    pub items: u64,
}

impl Totals {
    fn add(&mut self, meta: &fs::Metadata) {
        self.items += 1;
        if meta.is_file() {
            self.bytes += meta.len();
        }
    }
}

/// How a discovery pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Every root was walked.
    Complete(Totals),
    /// The time budget ran out; totals stay unknown.
    TimedOut,
    /// The task was aborted during discovery.
    Interrupted,
}

/// Walk `roots` and sum their sizes until `deadline`.
///
/// Unreadable entries are skipped; they surface as errors when the task
/// reaches them.
pub fn discover(
    roots: &[PathBuf],
    recursive: bool,
    follow_symlinks: bool,
    deadline: Instant,
    should_stop: &dyn Fn() -> bool,
) -> Discovery {
    let mut totals = Totals::default();

    for root in roots {
        if should_stop() {
            return Discovery::Interrupted;
        }
        if Instant::now() >= deadline {
            return Discovery::TimedOut;
        }

        let Ok(meta) = stat(root, follow_symlinks) else {
            continue;
        };
        totals.add(&meta);
        if !recursive || !meta.is_dir() {
            continue;
        }

        for entry in below(root, follow_symlinks).into_iter().flatten() {
            if should_stop() {
                return Discovery::Interrupted;
            }
            if Instant::now() >= deadline {
                return Discovery::TimedOut;
            }
            if let Ok(meta) = entry.metadata() {
                totals.add(&meta);
            }
        }
    }

    Discovery::Complete(totals)
}

/// Sum the sizes under one path without a time budget.
pub fn tree_totals(path: &Path, follow_symlinks: bool) -> Totals {
    let mut totals = Totals::default();
    let Ok(meta) = stat(path, follow_symlinks) else {
        return totals;
    };
    totals.add(&meta);
    if meta.is_dir() {
        for entry in below(path, follow_symlinks).into_iter().flatten() {
            if let Ok(meta) = entry.metadata() {
                totals.add(&meta);
            }
        }
    }
    totals
}

/// Everything beneath `root`, hidden entries included, in no particular order.
fn below(root: &Path, follow_symlinks: bool) -> WalkDir {
    WalkDir::new(root)
        .parallelism(Parallelism::Serial)
        .skip_hidden(false)
        .sort(false)
        .follow_links(follow_symlinks)
        .min_depth(1)
}

pub(crate) fn stat(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}
