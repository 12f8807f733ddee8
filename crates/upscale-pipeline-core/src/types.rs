use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ordered set of image paths the current stage operates on
///
/// Rebuilt by the indexer whenever a stage needs it and handed from stage to
/// stage by value. Entries existed at index time but may vanish before use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    images: Vec<PathBuf>,
}

impl WorkingSet {
    pub fn new(images: Vec<PathBuf>) -> Self {
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.images
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.images.iter().any(|p| p == path)
    }
}

impl IntoIterator for WorkingSet {
    type Item = PathBuf;
    type IntoIter = std::vec::IntoIter<PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

impl<'a> IntoIterator for &'a WorkingSet {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}

/// A near-duplicate of some original, with its distance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Duplicate {
    pub path: PathBuf,

    /// Larger is more different; zero means identical
    pub distance: f64,
}

/// One original image and its near-duplicates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub original: PathBuf,
    pub duplicates: Vec<Duplicate>,
}

impl DuplicateGroup {
    /// Duplicates whose distance reaches `threshold`, in group order
    pub fn variations(&self, threshold: f64) -> impl Iterator<Item = &Duplicate> {
        self.duplicates
            .iter()
            .filter(move |d| d.distance >= threshold)
    }
}

/// Result of a duplicate search over one directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Files judged strictly lower quality than a kept counterpart
    pub removal_set: Vec<PathBuf>,

    /// Groups in discovery order
    pub groups: Vec<DuplicateGroup>,
}

/// A per-image failure that did not stop the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub path: PathBuf,
    pub reason: String,
}

/// Summary of one optimization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeReport {
    /// Working set size
    pub total: usize,

    /// Images re-encoded in this pass
    pub encoded: usize,

    /// Images whose destination already existed
    pub skipped: usize,

    /// Images that vanished before they could be read
    pub missing: usize,

    pub failures: Vec<Failure>,
}

impl OptimizeReport {
    /// Images accounted for, whether encoded, skipped, missing or failed
    pub fn processed(&self) -> usize {
        self.encoded + self.skipped + self.missing + self.failures.len()
    }
}

/// Summary of the duplicate resolution stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Number of duplicate groups found
    pub groups: usize,

    /// Files copied into the review directory
    pub copied: usize,

    /// Files successfully deleted
    pub deleted: usize,

    /// Files that could not be deleted
    pub failures: Vec<Failure>,
}

/// Summary of the upscale gating stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    /// Sources removed because their final output already existed
    pub already_upscaled: Vec<PathBuf>,

    /// Sources moved on because they were large enough
    pub skipped_large: Vec<PathBuf>,

    /// Sources that vanished or could not be measured
    pub failures: Vec<Failure>,
}

/// Summary of a full pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub optimize_base: OptimizeReport,
    pub duplicates: DuplicateReport,
    pub gate: GateReport,

    /// Images handed to the upscaler; zero when it was not invoked
    pub upscaled: usize,

    pub optimize_upscaled: OptimizeReport,
}

impl PipelineReport {
    /// Every per-image failure collected during the run
    pub fn failures(&self) -> impl Iterator<Item = &Failure> {
        self.optimize_base
            .failures
            .iter()
            .chain(self.duplicates.failures.iter())
            .chain(self.gate.failures.iter())
            .chain(self.optimize_upscaled.failures.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variations_respect_threshold() {
        let group = DuplicateGroup {
            original: PathBuf::from("a.jpg"),
            duplicates: vec![
                Duplicate {
                    path: PathBuf::from("b.jpg"),
                    distance: 0.0,
                },
                Duplicate {
                    path: PathBuf::from("c.jpg"),
                    distance: 0.6,
                },
                Duplicate {
                    path: PathBuf::from("d.jpg"),
                    distance: 37.2,
                },
            ],
        };

        let variations: Vec<_> = group.variations(1.0).map(|d| d.path.clone()).collect();
        assert_eq!(variations, vec![PathBuf::from("d.jpg")]);
    }

    #[test]
    fn test_working_set_keeps_index_order() {
        let set = WorkingSet::new(vec![PathBuf::from("2.jpg"), PathBuf::from("1.jpg")]);
        let order: Vec<_> = set.into_iter().collect();
        assert_eq!(order, vec![PathBuf::from("2.jpg"), PathBuf::from("1.jpg")]);
    }

    #[test]
    fn test_working_set_contains() {
        let set = WorkingSet::new(vec![PathBuf::from("1.jpg"), PathBuf::from("3.jpg")]);
        assert!(set.contains(Path::new("3.jpg")));
        assert!(!set.contains(Path::new("2.jpg")));
    }

    #[test]
    fn test_processed_counts_every_outcome() {
        let report = OptimizeReport {
            total: 5,
            encoded: 2,
            skipped: 1,
            missing: 1,
            failures: vec![Failure {
                path: PathBuf::from("x.png"),
                reason: "corrupt".to_string(),
            }],
        };
        assert_eq!(report.processed(), report.total);
    }
}
