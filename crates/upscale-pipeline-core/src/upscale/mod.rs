//! Upscale gating and invocation

mod realesrgan;

pub use realesrgan::RealEsrganUpscaler;

use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{Error, Result};
use crate::logging::log_fs_modification;
use crate::processing::encoder::existing_output;
use crate::processing::progress::Stopwatch;
use crate::types::{Failure, GateReport, WorkingSet};

/// External batch upscaler owning its whole input directory
pub trait Upscaler {
    /// Fail with a configuration error if the upscaler cannot run at all
    fn verify(&self) -> Result<()>;

    /// Upscale every image in `input` into `output`, blocking until done
    fn upscale(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Where gated images go
pub struct GateTargets<'a> {
    /// Final output directory, checked for work done by earlier runs
    pub final_dir: &'a Path,

    /// Destination of images large enough to skip upscaling
    pub skip_dir: &'a Path,

    /// Pixel count above which an image skips upscaling
    pub pixel_threshold: u64,
}

/// Remove images from upscaling consideration
///
/// An image whose output already sits in the final directory was finished by
/// an earlier run: its source is deleted. An image above the pixel threshold
/// is moved to the skip directory unchanged. Both leave the working set, and
/// because they are physically gone from the input directory the upscaler
/// will not see them either. What remains needs upscaling.
pub fn gate_images(
    images: WorkingSet,
    targets: &GateTargets<'_>,
) -> Result<(WorkingSet, GateReport)> {
    debug!("Determining which images have enough quality to not be upscaled");
    let mut report = GateReport::default();
    let mut remaining = Vec::with_capacity(images.len());

    for image in images {
        let Some(file_name) = image.file_name() else {
            continue;
        };

        if already_upscaled(&image, targets.final_dir) {
            debug!("{} is already present in upscaled images", image.display());
            match fs::remove_file(&image) {
                Ok(()) => log_fs_modification("delete", &image, Some("already upscaled")),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            report.already_upscaled.push(image);
            continue;
        }

        let (width, height) = match image::image_dimensions(&image) {
            Ok(dimensions) => dimensions,
            Err(image::ImageError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
                warn!("{} vanished before gating", image.display());
                report.failures.push(Failure {
                    path: image,
                    reason: "file vanished before gating".to_string(),
                });
                continue;
            }
            Err(e) => {
                // Left for the upscaler, which processes the whole directory anyway
                warn!("Could not read dimensions of {}: {}", image.display(), e);
                report.failures.push(Failure {
                    path: image.clone(),
                    reason: e.to_string(),
                });
                remaining.push(image);
                continue;
            }
        };

        let pixels = width as u64 * height as u64;
        if pixels > targets.pixel_threshold {
            debug!(
                "{} will be skipped as it has {} pixels ({}x{})",
                image.display(),
                pixels,
                width,
                height
            );
            let target = targets.skip_dir.join(file_name);
            match move_file(&image, &target) {
                Ok(()) => report.skipped_large.push(target),
                Err(e) if e.is_transient() => {
                    warn!("{} vanished before it could be moved", image.display())
                }
                Err(e) => return Err(e),
            }
            continue;
        }

        remaining.push(image);
    }

    if !report.already_upscaled.is_empty() {
        info!(
            "Skipping {} image(s) that are already present in upscaled images {}",
            report.already_upscaled.len(),
            targets.final_dir.display()
        );
    }
    if !report.skipped_large.is_empty() {
        info!(
            "{} image(s) are of high quality to not be upscaled, they were moved to {}",
            report.skipped_large.len(),
            targets.skip_dir.display()
        );
    }

    Ok((WorkingSet::new(remaining), report))
}

/// Run the upscaler over `input` if anything is left to upscale
///
/// Returns the number of images handed over; zero means it was not invoked.
pub fn upscale_remaining(
    remaining: &WorkingSet,
    input: &Path,
    output: &Path,
    upscaler: &dyn Upscaler,
) -> Result<usize> {
    if remaining.is_empty() {
        info!("No images left to upscale");
        return Ok(0);
    }

    info!(
        "Upscaling {} image(s), you can check progress by looking in {}",
        remaining.len(),
        output.display()
    );
    let stopwatch = Stopwatch::start("Upscaling");
    upscaler.upscale(input, output)?;
    stopwatch.stop();

    Ok(remaining.len())
}

/// Whether the final directory already holds this image's output
fn already_upscaled(image: &Path, final_dir: &Path) -> bool {
    if let Some(name) = image.file_name() {
        if final_dir.join(name).is_file() {
            return true;
        }
    }
    image
        .file_stem()
        .and_then(|stem| existing_output(final_dir, stem))
        .is_some()
}

/// Move a file, falling back to copy and delete across filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Err(Error::FileNotFound(from.to_path_buf()));
    }
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    log_fs_modification("move", from, Some(&to.display().to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct RecordingUpscaler {
        calls: RefCell<Vec<(PathBuf, PathBuf)>>,
    }

    impl Upscaler for RecordingUpscaler {
        fn verify(&self) -> Result<()> {
            Ok(())
        }

        fn upscale(&self, input: &Path, output: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push((input.to_path_buf(), output.to_path_buf()));
            Ok(())
        }
    }

    fn image_of(path: &Path, width: u32, height: u32) -> PathBuf {
        RgbImage::from_pixel(width, height, Rgb([50, 60, 70]))
            .save(path)
            .unwrap();
        path.to_path_buf()
    }

    struct Dirs {
        _root: tempfile::TempDir,
        input: PathBuf,
        final_dir: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempdir().unwrap();
        let input = root.path().join("in");
        let final_dir = root.path().join("final");
        fs::create_dir(&input).unwrap();
        fs::create_dir(&final_dir).unwrap();
        Dirs {
            _root: root,
            input,
            final_dir,
        }
    }

    #[test]
    fn test_large_image_is_moved_unchanged() {
        let d = dirs();
        let big = image_of(&d.input.join("big.png"), 40, 30);
        let small = image_of(&d.input.join("small.png"), 10, 10);
        let original_bytes = fs::read(&big).unwrap();

        let targets = GateTargets {
            final_dir: &d.final_dir,
            skip_dir: &d.final_dir,
            pixel_threshold: 1_000,
        };
        let (remaining, report) =
            gate_images(WorkingSet::new(vec![big.clone(), small.clone()]), &targets).unwrap();

        assert_eq!(remaining.paths(), &[small]);
        assert!(!big.exists());
        assert_eq!(fs::read(d.final_dir.join("big.png")).unwrap(), original_bytes);
        assert_eq!(report.skipped_large, vec![d.final_dir.join("big.png")]);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let d = dirs();
        let edge = image_of(&d.input.join("edge.png"), 25, 40);

        let targets = GateTargets {
            final_dir: &d.final_dir,
            skip_dir: &d.final_dir,
            pixel_threshold: 1_000,
        };
        let (remaining, report) = gate_images(WorkingSet::new(vec![edge.clone()]), &targets).unwrap();

        assert_eq!(remaining.paths(), &[edge]);
        assert!(report.skipped_large.is_empty());
    }

    #[test]
    fn test_already_upscaled_source_is_deleted() {
        let d = dirs();
        let done = image_of(&d.input.join("done.jpg"), 10, 10);
        fs::write(d.final_dir.join("done.jpg"), b"final").unwrap();
        let alpha = image_of(&d.input.join("alpha.png"), 10, 10);
        fs::write(d.final_dir.join("alpha.jpg"), b"final").unwrap();

        let targets = GateTargets {
            final_dir: &d.final_dir,
            skip_dir: &d.final_dir,
            pixel_threshold: 1_000_000,
        };
        let (remaining, report) =
            gate_images(WorkingSet::new(vec![done.clone(), alpha.clone()]), &targets).unwrap();

        assert!(remaining.is_empty());
        assert!(!done.exists());
        assert!(!alpha.exists());
        assert_eq!(report.already_upscaled, vec![done, alpha]);
        assert_eq!(fs::read(d.final_dir.join("done.jpg")).unwrap(), b"final");
    }

    #[test]
    fn test_vanished_image_is_dropped() {
        let d = dirs();
        let gone = d.input.join("gone.png");

        let targets = GateTargets {
            final_dir: &d.final_dir,
            skip_dir: &d.final_dir,
            pixel_threshold: 1_000,
        };
        let (remaining, report) = gate_images(WorkingSet::new(vec![gone]), &targets).unwrap();

        assert!(remaining.is_empty());
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_upscaler_not_invoked_for_empty_set() {
        let d = dirs();
        let upscaler = RecordingUpscaler {
            calls: RefCell::new(vec![]),
        };

        let count =
            upscale_remaining(&WorkingSet::default(), &d.input, &d.final_dir, &upscaler).unwrap();

        assert_eq!(count, 0);
        assert!(upscaler.calls.borrow().is_empty());
    }

    #[test]
    fn test_upscaler_invoked_once_with_directories() {
        let d = dirs();
        let upscaler = RecordingUpscaler {
            calls: RefCell::new(vec![]),
        };
        let remaining = WorkingSet::new(vec![d.input.join("a.jpg"), d.input.join("b.jpg")]);

        let count = upscale_remaining(&remaining, &d.input, &d.final_dir, &upscaler).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            *upscaler.calls.borrow(),
            vec![(d.input.clone(), d.final_dir.clone())]
        );
    }
}
