use log::{error, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::processing::encoder::{existing_output, Reencoder};
use crate::processing::progress::{stage_progress, Stopwatch};
use crate::types::{Failure, OptimizeReport, WorkingSet};

/// Outcome of one re-encode job
enum Outcome {
    Encoded,
    Missing,
    Failed(Failure),
}

/// Re-encode every image in `images` into `destination`
///
/// A destination that already exists is never rewritten, which makes a
/// restart after interruption cheap. The flip side is that changed settings
/// do not apply to outputs from earlier runs.
///
/// Destinations are claimed in working-set order before any work starts: when
/// two sources share a stem only the first is encoded and the others are
/// reported as failures, so no two workers ever race on the same output file. Files that vanished are counted as missing,
/// images that fail to decode or encode are collected as failures; neither
/// stops the pass.
pub fn optimize_images(
    images: &WorkingSet,
    destination: &Path,
    reencoder: &Reencoder<'_>,
    threads: usize,
    shutdown: &AtomicBool,
) -> Result<OptimizeReport> {
    let total = images.len();
    info!(
        "Optimizing {} images and saving them to {}",
        total,
        destination.display()
    );
    let stopwatch = Stopwatch::start("Optimizing");

    let mut report = OptimizeReport {
        total,
        ..Default::default()
    };

    let mut claimed: HashMap<OsString, &PathBuf> = HashMap::new();
    let mut jobs: Vec<&PathBuf> = Vec::new();
    for source in images {
        let Some(stem) = source.file_stem() else {
            report.skipped += 1;
            continue;
        };
        if let Some(first) = claimed.get(stem) {
            warn!(
                "{} shares its output name with {}, not optimizing it",
                source.display(),
                first.display()
            );
            report.failures.push(Failure {
                path: source.clone(),
                reason: format!("output name already taken by {}", first.display()),
            });
            continue;
        }
        claimed.insert(stem.to_os_string(), source);
        if existing_output(destination, stem).is_some() {
            report.skipped += 1;
        } else {
            jobs.push(source);
        }
    }

    let progress_bar = stage_progress(total, "Optimizing images");
    progress_bar.set_position((report.skipped + report.failures.len()) as u64);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(if threads == 0 { num_cpus::get() } else { threads })
        .build()
        .map_err(|e| Error::Configuration(format!("Failed to build thread pool: {}", e)))?;

    let outcomes: Vec<Result<Outcome>> = pool.install(|| {
        jobs.par_iter()
            .map(|source| {
                if shutdown.load(Ordering::Relaxed) {
                    return Err(Error::Interrupted);
                }
                let outcome = match reencoder.reencode_file(source, destination) {
                    Ok(_) => Outcome::Encoded,
                    Err(e) if e.is_transient() => {
                        warn!("{} vanished before it could be optimized", source.display());
                        Outcome::Missing
                    }
                    Err(e) => {
                        error!("Failed to optimize {}: {}", source.display(), e);
                        Outcome::Failed(Failure {
                            path: source.to_path_buf(),
                            reason: e.to_string(),
                        })
                    }
                };
                progress_bar.inc(1);
                Ok(outcome)
            })
            .collect()
    });

    for outcome in outcomes {
        match outcome? {
            Outcome::Encoded => report.encoded += 1,
            Outcome::Missing => report.missing += 1,
            Outcome::Failed(failure) => report.failures.push(failure),
        }
    }

    progress_bar.finish_with_message(format!(
        "Optimized {} new, {} already done",
        report.encoded, report.skipped
    ));
    info!(
        "Optimizing images: [{}/{}] ({} encoded, {} skipped, {} missing, {} failed)",
        report.processed(),
        total,
        report.encoded,
        report.skipped,
        report.missing,
        report.failures.len()
    );
    stopwatch.stop();

    Ok(report)
}
