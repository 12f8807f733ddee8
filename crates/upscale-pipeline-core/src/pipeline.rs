//! The staged run from source images to optimized upscaled output
//!
//! Stages communicate only through the configured directories. Each stage
//! indexes its input directory afresh, so a run that was interrupted can be
//! restarted and will skip whatever was already finished.

use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{Config, SkipPolicy};
use crate::decision::{Decider, Prompt, StaticDecider};
use crate::deduplication::{resolve_duplicates, DuplicateSearch, MseSearch};
use crate::discovery::{check_directory, index_images};
use crate::error::{Error, Result};
use crate::logging::log_fs_modification;
use crate::processing::encoder::Reencoder;
use crate::processing::lossless::{self, LosslessOptimizer};
use crate::processing::optimize::optimize_images;
use crate::processing::progress::Stopwatch;
use crate::types::{PipelineReport, WorkingSet};
use crate::upscale::{gate_images, upscale_remaining, GateTargets, RealEsrganUpscaler, Upscaler};

/// Pipeline states in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    OptimizeBase,
    FindDuplicates,
    IndexOptimized,
    GateAndUpscale,
    IndexUpscaled,
    OptimizeUpscaled,
    Cleanup,
    Done,
}

impl Stage {
    pub const FIRST: Stage = Stage::OptimizeBase;

    /// The state that follows this one; `Done` is terminal
    pub fn next(self) -> Stage {
        match self {
            Stage::OptimizeBase => Stage::FindDuplicates,
            Stage::FindDuplicates => Stage::IndexOptimized,
            Stage::IndexOptimized => Stage::GateAndUpscale,
            Stage::GateAndUpscale => Stage::IndexUpscaled,
            Stage::IndexUpscaled => Stage::OptimizeUpscaled,
            Stage::OptimizeUpscaled => Stage::Cleanup,
            Stage::Cleanup | Stage::Done => Stage::Done,
        }
    }

    /// 1-based position, as shown in stage headers
    pub fn number(self) -> usize {
        self as usize + 1
    }

    fn label(self) -> &'static str {
        match self {
            Stage::OptimizeBase => "Optimize base images",
            Stage::FindDuplicates => "Find duplicates",
            Stage::IndexOptimized => "Index optimized images",
            Stage::GateAndUpscale => "Upscale images",
            Stage::IndexUpscaled => "Index upscaled images",
            Stage::OptimizeUpscaled => "Optimize upscaled images",
            Stage::Cleanup => "Cleanup",
            Stage::Done => "Done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Orchestrates one run over the configured directories
pub struct Pipeline {
    config: Config,
    search: Box<dyn DuplicateSearch>,
    upscaler: Box<dyn Upscaler>,
    optimizer: Box<dyn LosslessOptimizer>,
    decider: Box<dyn Decider>,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    /// Build a pipeline with the default collaborators
    ///
    /// Unattended defaults: review copies and deletion are confirmed (still
    /// subject to the configuration flags), missing directories are only
    /// created when `create_missing_dirs` is set.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            search: Box::new(MseSearch::new(&config)),
            upscaler: Box::new(RealEsrganUpscaler::new(&config.upscale)),
            optimizer: lossless::from_config(config.lossless_optimizer.as_ref()),
            decider: Box::new(StaticDecider {
                create_directories: false,
                copy_for_review: true,
                delete_duplicates: true,
            }),
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    pub fn with_search(mut self, search: Box<dyn DuplicateSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn with_upscaler(mut self, upscaler: Box<dyn Upscaler>) -> Self {
        self.upscaler = upscaler;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn LosslessOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_decider(mut self, decider: Box<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    /// Flag that stops the run at the next image or stage boundary when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check the source directory and upscaler, and create working directories
    pub fn prepare(&self) -> Result<()> {
        let dirs = &self.config.directories;
        check_directory(&dirs.base)?;
        debug!("base: {}", dirs.base.display());

        self.ensure_directory("optimized_base", &dirs.optimized_base)?;
        self.ensure_directory("optimized_upscaled", &dirs.optimized_upscaled)?;
        if self.config.allow_review_copies {
            self.ensure_directory("duplicates", &dirs.duplicates)?;
        }
        self.ensure_directory("upscaled", &dirs.upscaled)?;

        self.upscaler.verify()?;
        debug!("Settings: {:?}", self.config);
        Ok(())
    }

    fn ensure_directory(&self, name: &'static str, path: &Path) -> Result<()> {
        if path.exists() {
            if !path.is_dir() {
                return Err(Error::NotADirectory(path.to_path_buf()));
            }
            debug!("{}: {}", name, path.display());
            return Ok(());
        }

        let create = self.config.create_missing_dirs
            || self.decider.confirm(&Prompt::CreateDirectory {
                name,
                path: path.to_path_buf(),
            });
        if !create {
            return Err(Error::DirectoryNotFound(path.to_path_buf()));
        }

        fs::create_dir_all(path)?;
        log_fs_modification("mkdir", path, Some(name));
        Ok(())
    }

    /// Run every stage in order
    ///
    /// A fatal error stops the run where it happened and leaves every
    /// directory as it was for inspection.
    pub fn run(&self) -> Result<PipelineReport> {
        self.prepare()?;

        let config = &self.config;
        let dirs = &config.directories;
        let reencoder =
            Reencoder::new(config.quality, &config.transparency, self.optimizer.as_ref())
                .with_max_pixels(config.max_image_pixels);

        let mut report = PipelineReport::default();
        let mut images = WorkingSet::default();
        let mut stage = Stage::FIRST;

        while stage != Stage::Done {
            if self.shutdown.load(Ordering::Relaxed) {
                warn!("Stopping before stage {}: {}", stage.number(), stage);
                return Err(Error::Interrupted);
            }
            info!("{}. {}", stage.number(), stage);
            let stopwatch = Stopwatch::start(stage.label());

            match stage {
                Stage::OptimizeBase => {
                    let base = index_images(&dirs.base, config)?;
                    report.optimize_base = optimize_images(
                        &base,
                        &dirs.optimized_base,
                        &reencoder,
                        config.threads,
                        &self.shutdown,
                    )?;
                }
                Stage::FindDuplicates => {
                    report.duplicates = resolve_duplicates(
                        &dirs.optimized_base,
                        config,
                        self.search.as_ref(),
                        self.decider.as_ref(),
                    )?;
                }
                Stage::IndexOptimized => {
                    images = index_images(&dirs.optimized_base, config)?;
                }
                Stage::GateAndUpscale => {
                    let skip_dir = match config.upscale.skip_policy {
                        SkipPolicy::MoveToFinal => &dirs.optimized_upscaled,
                        SkipPolicy::Reoptimize => &dirs.upscaled,
                    };
                    let targets = GateTargets {
                        final_dir: &dirs.optimized_upscaled,
                        skip_dir,
                        pixel_threshold: config.upscale.skip_pixel_threshold(),
                    };
                    let (remaining, gate) = gate_images(std::mem::take(&mut images), &targets)?;
                    report.gate = gate;
                    report.upscaled = upscale_remaining(
                        &remaining,
                        &dirs.optimized_base,
                        &dirs.upscaled,
                        self.upscaler.as_ref(),
                    )?;
                }
                Stage::IndexUpscaled => {
                    images = index_images(&dirs.upscaled, config)?;
                }
                Stage::OptimizeUpscaled => {
                    report.optimize_upscaled = optimize_images(
                        &images,
                        &dirs.optimized_upscaled,
                        &reencoder,
                        config.threads,
                        &self.shutdown,
                    )?;
                }
                Stage::Cleanup => {
                    if config.cleanup_on_exit {
                        self.remove_temporary(report.optimize_upscaled.failures.len())?;
                    } else {
                        debug!("Keeping temporary directories");
                    }
                }
                Stage::Done => {}
            }

            stopwatch.stop();
            stage = stage.next();
        }

        info!(
            "Finished: {} upscaled, {} moved without upscaling, {} failure(s)",
            report.upscaled,
            report.gate.skipped_large.len(),
            report.failures().count()
        );
        Ok(report)
    }

    /// Remove the temporary directories
    ///
    /// The optimized base and raw upscale directories are removed with their
    /// contents. The review and final directories are only removed when
    /// empty.
    pub fn cleanup(&self) -> Result<()> {
        self.remove_temporary(0)
    }

    /// Cleanup after a run; raw upscaler output is the only copy of any image
    /// that failed the last optimization pass, so it stays when there are some
    fn remove_temporary(&self, failed_upscaled: usize) -> Result<()> {
        let dirs = &self.config.directories;
        remove_tree(&dirs.optimized_base)?;
        if failed_upscaled > 0 {
            warn!(
                "Keeping {} for {} failed image(s)",
                dirs.upscaled.display(),
                failed_upscaled
            );
        } else {
            remove_tree(&dirs.upscaled)?;
        }
        remove_if_empty(&dirs.duplicates)?;
        remove_if_empty(&dirs.optimized_upscaled)?;
        Ok(())
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            info!("Deleted temporary directory {}", path.display());
            log_fs_modification("rmdir", path, None);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_empty(path: &Path) -> Result<()> {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if entries.next().is_some() {
        debug!("Keeping {} as it is not empty", path.display());
        return Ok(());
    }

    fs::remove_dir(path)?;
    info!("Deleted empty directory {}", path.display());
    log_fs_modification("rmdir", path, None);
    Ok(())
}
