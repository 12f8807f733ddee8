use image::imageops::FilterType;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::{Config, Similarity};
use crate::deduplication::DuplicateSearch;
use crate::discovery::index_images;
use crate::error::Result;
use crate::processing::encoder::open_image;
use crate::types::{Duplicate, DuplicateGroup, SearchOutcome};

/// Edge length of the thumbnails compared by mean squared error
const THUMBNAIL_SIZE: u32 = 50;

/// Everything the comparison needs about one image
struct Fingerprint {
    path: PathBuf,
    size: u64,
    content_hash: blake3::Hash,
    thumbnail: Vec<u8>,
}

/// Mean squared error search over downscaled thumbnails
///
/// Byte-identical files are matched by content hash at distance 0. Every
/// other pair is compared on 50×50 RGB thumbnails; the squared channel
/// differences are summed and divided by the pixel count. Within a group the
/// largest file is kept and every other member goes into the removal set.
pub struct MseSearch {
    config: Config,
}

impl MseSearch {
    /// Index with the same extensions and recursion as the pipeline
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl DuplicateSearch for MseSearch {
    fn search(&self, directory: &Path, similarity: Similarity) -> Result<SearchOutcome> {
        let images = index_images(directory, &self.config)?;
        let threshold = similarity.mse_threshold();
        debug!("Comparing {} images at MSE <= {}", images.len(), threshold);

        let fingerprints: Vec<Fingerprint> = images
            .paths()
            .par_iter()
            .filter_map(|path| match fingerprint(path, self.config.max_image_pixels) {
                Ok(fp) => Some(fp),
                Err(e) => {
                    warn!("Excluding {} from duplicate search: {}", path.display(), e);
                    None
                }
            })
            .collect();

        let outcome = group_fingerprints(&fingerprints, threshold);
        info!(
            "Found {} duplicate groups, {} images flagged as lower quality",
            outcome.groups.len(),
            outcome.removal_set.len()
        );
        Ok(outcome)
    }
}

fn fingerprint(path: &Path, max_pixels: Option<u64>) -> Result<Fingerprint> {
    let size = std::fs::metadata(path)?.len();
    let content_hash = hash_file(path)?;
    let thumbnail = open_image(path, max_pixels)?
        .resize_exact(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle)
        .to_rgb8()
        .into_raw();

    Ok(Fingerprint {
        path: path.to_path_buf(),
        size,
        content_hash,
        thumbnail,
    })
}

fn hash_file(path: &Path) -> Result<blake3::Hash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize())
}

fn distance(a: &Fingerprint, b: &Fingerprint) -> f64 {
    if a.content_hash == b.content_hash {
        return 0.0;
    }
    let sum: f64 = a
        .thumbnail
        .iter()
        .zip(&b.thumbnail)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    sum / (THUMBNAIL_SIZE * THUMBNAIL_SIZE) as f64
}

/// Group fingerprints whose distance to a group's original is within `threshold`
///
/// Originals are taken in index order; an image already placed in a group is
/// not compared again.
fn group_fingerprints(fingerprints: &[Fingerprint], threshold: f64) -> SearchOutcome {
    let mut assigned = vec![false; fingerprints.len()];
    let mut outcome = SearchOutcome::default();

    for i in 0..fingerprints.len() {
        if assigned[i] {
            continue;
        }
        let mut members = vec![i];
        let mut duplicates = Vec::new();

        for j in (i + 1)..fingerprints.len() {
            if assigned[j] {
                continue;
            }
            let d = distance(&fingerprints[i], &fingerprints[j]);
            if d <= threshold {
                assigned[j] = true;
                members.push(j);
                duplicates.push(Duplicate {
                    path: fingerprints[j].path.clone(),
                    distance: d,
                });
            }
        }

        if duplicates.is_empty() {
            continue;
        }

        // Largest file wins, the earliest one on ties
        let keep = members.iter().copied().fold(i, |best, m| {
            if fingerprints[m].size > fingerprints[best].size {
                m
            } else {
                best
            }
        });
        outcome.removal_set.extend(
            members
                .iter()
                .filter(|&&m| m != keep)
                .map(|&m| fingerprints[m].path.clone()),
        );
        outcome.groups.push(DuplicateGroup {
            original: fingerprints[i].path.clone(),
            duplicates,
        });
    }

    outcome
}
