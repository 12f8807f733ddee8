use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::WorkingSet;

/// Index the images in `directory` into a fresh working set
///
/// Entries are sorted by file name at every level so that an unchanged
/// directory always yields the same sequence. Files that disappear during the
/// walk are left out silently.
pub fn index_images(directory: &Path, config: &Config) -> Result<WorkingSet> {
    check_directory(directory)?;

    info!(
        "Indexing [{}] images in {}",
        config.extensions.join("|"),
        directory.display()
    );
    let start = Instant::now();

    let max_depth = if config.recursive { usize::MAX } else { 1 };

    let images: Vec<PathBuf> = WalkDir::new(directory)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| config.accepts_extension(path))
        // Recheck: the walk reports what the directory listing said, not what is there now
        .filter(|path| path.is_file())
        .collect();

    info!("Indexed {} images", images.len());
    debug!(
        "Indexing took {:.2} seconds",
        start.elapsed().as_secs_f64()
    );

    Ok(WorkingSet::new(images))
}

/// Fail unless `directory` exists and is a directory
pub fn check_directory(directory: &Path) -> Result<()> {
    if !directory.exists() {
        return Err(Error::DirectoryNotFound(directory.to_path_buf()));
    }
    if !directory.is_dir() {
        return Err(Error::NotADirectory(directory.to_path_buf()));
    }
    Ok(())
}

// -- Tests --
