//! Duplicate resolution stage
//!
//! The similarity search itself sits behind [`DuplicateSearch`]; this module
//! only decides what to copy for review and what to delete.

mod mse;

pub use mse::MseSearch;

use log::{info, warn};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, Similarity};
use crate::decision::{Decider, Prompt};
use crate::error::Result;
use crate::logging::{log_file_error, log_fs_modification};
use crate::safety::SafetyManager;
use crate::types::{DuplicateGroup, DuplicateReport, Failure, SearchOutcome};

/// Near-duplicate search over a directory
pub trait DuplicateSearch {
    fn search(&self, directory: &Path, similarity: Similarity) -> Result<SearchOutcome>;
}

/// Search `directory` for duplicates, optionally keep review copies, then
/// optionally delete the removal set
///
/// Only paths in the removal set are ever deleted. An empty removal set ends
/// the stage before any listing or prompting.
pub fn resolve_duplicates(
    directory: &Path,
    config: &Config,
    search: &dyn DuplicateSearch,
    decider: &dyn Decider,
) -> Result<DuplicateReport> {
    info!("Looking for duplicates in {}", directory.display());
    let outcome = search.search(directory, config.similarity)?;

    let mut report = DuplicateReport::default();
    if outcome.removal_set.is_empty() {
        info!("No duplicates found");
        return Ok(report);
    }
    report.groups = outcome.groups.len();

    let review_dir = &config.directories.duplicates;
    let copy_for_review = config.allow_review_copies
        && decider.confirm(&Prompt::CopyForReview {
            destination: review_dir.clone(),
        });
    if copy_for_review {
        fs::create_dir_all(review_dir)?;
    }

    info!("List of duplicate/similar images (original -> duplicates):");
    let mut copy_failed = false;
    for group in &outcome.groups {
        log_group(group);
        if copy_for_review {
            match copy_group(group, review_dir, config.variation_threshold) {
                Ok(copied) => report.copied += copied,
                Err(failure) => {
                    copy_failed = true;
                    report.failures.push(failure);
                }
            }
        }
    }

    if !config.allow_deleting {
        return Ok(report);
    }
    if copy_failed {
        // Deleting now could destroy the only copy of an unreviewed variation
        warn!("Review copies are incomplete, not deleting any duplicates");
        return Ok(report);
    }
    if !decider.confirm(&Prompt::DeleteDuplicates {
        count: outcome.removal_set.len(),
    }) {
        return Ok(report);
    }

    let safety = SafetyManager::new(directory);
    let (deleted, failures) = delete_images(&outcome.removal_set, &safety);
    report.deleted = deleted;
    report.failures.extend(failures);

    Ok(report)
}

fn log_group(group: &DuplicateGroup) {
    let name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    info!("{}", group.original.display());
    for duplicate in &group.duplicates {
        info!("\t{} [{:.2}]", name(&duplicate.path), duplicate.distance);
    }
}

/// Copy an original and its meaningful variations into `review_dir`
///
/// Files are named `<stem> original.<ext>` and `<stem> variation <n>.<ext>`,
/// where `n` counts the copied variations from 1. Duplicates closer than
/// `variation_threshold` are not copied and take no number.
fn copy_group(
    group: &DuplicateGroup,
    review_dir: &Path,
    variation_threshold: f64,
) -> std::result::Result<usize, Failure> {
    let stem = group
        .original
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("image"));

    let mut copied = 0;
    let original = review_name(review_dir, &stem, "original", &group.original);
    copy_for_review(&group.original, &original)?;
    copied += 1;

    for (index, duplicate) in group.variations(variation_threshold).enumerate() {
        let label = format!("variation {}", index + 1);
        let target = review_name(review_dir, &stem, &label, &duplicate.path);
        copy_for_review(&duplicate.path, &target)?;
        copied += 1;
    }

    Ok(copied)
}

fn review_name(review_dir: &Path, stem: &OsString, label: &str, source: &Path) -> PathBuf {
    let mut name = stem.clone();
    name.push(" ");
    name.push(label);
    if let Some(ext) = source.extension() {
        name.push(".");
        name.push(ext);
    }
    review_dir.join(name)
}

fn copy_for_review(source: &Path, target: &Path) -> std::result::Result<(), Failure> {
    match fs::copy(source, target) {
        Ok(_) => {
            log_fs_modification("copy", target, Some(&source.display().to_string()));
            Ok(())
        }
        Err(e) => {
            log_file_error(source, "copy", &e);
            Err(Failure {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

/// Delete every path independently, returning the number deleted and the failures
pub fn delete_images(paths: &[PathBuf], safety: &SafetyManager) -> (usize, Vec<Failure>) {
    let mut deleted = 0;
    let mut failures = Vec::new();
    let mut seen = HashSet::new();

    for path in paths {
        if !seen.insert(path) {
            continue;
        }
        let result = safety
            .check_removal(path)
            .and_then(|_| fs::remove_file(path).map_err(Into::into));
        match result {
            Ok(()) => {
                deleted += 1;
                log_fs_modification("delete", path, None);
            }
            Err(e) => {
                warn!("Could not delete image {}: {}", path.display(), e);
                failures.push(Failure {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!("Deleted {} images", deleted);
    (deleted, failures)
}
