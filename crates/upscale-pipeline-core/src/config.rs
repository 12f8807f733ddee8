use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directories shared between stages
    pub directories: Directories,

    /// Allowed image extensions, compared case-insensitively and without the dot
    pub extensions: Vec<String>,

    /// Whether indexing descends into subdirectories
    pub recursive: bool,

    /// Lossy encoding quality (0-100)
    pub quality: u8,

    /// How similar two images must be to count as duplicates
    pub similarity: Similarity,

    /// Distances at or above this value are variations worth a review copy
    pub variation_threshold: f64,

    /// Whether lower quality duplicates may be deleted
    pub allow_deleting: bool,

    /// Whether originals and variations may be copied for manual review
    pub allow_review_copies: bool,

    /// Handling of images with an alpha channel
    pub transparency: TransparencyPolicy,

    /// External upscaler settings
    pub upscale: UpscaleSettings,

    /// Optional external lossless JPEG optimizer, fed through stdin/stdout
    pub lossless_optimizer: Option<ExternalCommand>,

    /// Number of threads to use for re-encoding (0 = auto)
    pub threads: usize,

    /// Images with more pixels than this are not decoded; `None` lifts the cap
    pub max_image_pixels: Option<u64>,

    /// Create missing working directories without asking
    pub create_missing_dirs: bool,

    /// Remove temporary directories after a successful run
    pub cleanup_on_exit: bool,

    /// Log level
    pub log_level: LogLevel,
}

/// Directories the stages communicate through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directories {
    /// Source images, never modified
    pub base: PathBuf,

    /// First optimization output and duplicate search input
    pub optimized_base: PathBuf,

    /// Review copies of duplicate groups
    pub duplicates: PathBuf,

    /// Final output
    pub optimized_upscaled: PathBuf,

    /// Raw upscaler output
    pub upscaled: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        let root = PathBuf::from("Images");
        Self {
            base: root.join("Base"),
            optimized_base: root.join("OptimizedBase"),
            duplicates: root.join("Duplicates"),
            optimized_upscaled: root.join("OptimizedUpscaled"),
            upscaled: root.join("Upscaled"),
        }
    }
}

impl Directories {
    /// All directories rooted under `root` with their default names
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            base: root.join("Base"),
            optimized_base: root.join("OptimizedBase"),
            duplicates: root.join("Duplicates"),
            optimized_upscaled: root.join("OptimizedUpscaled"),
            upscaled: root.join("Upscaled"),
        }
    }

    fn named(&self) -> [(&'static str, &Path); 5] {
        [
            ("base", &self.base),
            ("optimized_base", &self.optimized_base),
            ("duplicates", &self.duplicates),
            ("optimized_upscaled", &self.optimized_upscaled),
            ("upscaled", &self.upscaled),
        ]
    }
}

/// Named similarity presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityPreset {
    Low,
    Normal,
    High,
}

/// Similarity requirement for the duplicate search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Similarity {
    Preset(SimilarityPreset),

    /// Explicit mean squared error threshold
    Mse(f64),
}

impl Similarity {
    /// Mean squared error at or below which two images match
    pub fn mse_threshold(&self) -> f64 {
        match self {
            Similarity::Preset(SimilarityPreset::Low) => 1000.0,
            Similarity::Preset(SimilarityPreset::Normal) => 200.0,
            Similarity::Preset(SimilarityPreset::High) => 0.1,
            Similarity::Mse(value) => *value,
        }
    }
}

impl FromStr for Similarity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Similarity::Preset(SimilarityPreset::Low)),
            "normal" => Ok(Similarity::Preset(SimilarityPreset::Normal)),
            "high" => Ok(Similarity::Preset(SimilarityPreset::High)),
            other => other.parse::<f64>().map(Similarity::Mse).map_err(|_| {
                Error::Configuration(format!(
                    "similarity must be low, normal, high or a number, got '{}'",
                    s
                ))
            }),
        }
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Similarity::Preset(SimilarityPreset::Low) => write!(f, "low"),
            Similarity::Preset(SimilarityPreset::Normal) => write!(f, "normal"),
            Similarity::Preset(SimilarityPreset::High) => write!(f, "high"),
            Similarity::Mse(value) => write!(f, "{}", value),
        }
    }
}

/// What to do with images that carry an alpha channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransparencyPolicy {
    /// Flatten transparency onto a background and encode lossy
    pub replace: bool,

    /// Fixed background color
    pub color: [u8; 3],

    /// Use the average color of the image instead of `color`
    pub use_average: bool,
}

impl Default for TransparencyPolicy {
    fn default() -> Self {
        Self {
            replace: false,
            color: [255, 255, 255],
            use_average: false,
        }
    }
}

/// Background choice for flattening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Fixed([u8; 3]),
    Average,
}

impl TransparencyPolicy {
    /// The fill to use, or `None` when alpha must be preserved
    pub fn fill(&self) -> Option<Fill> {
        if !self.replace {
            return None;
        }
        if self.use_average {
            Some(Fill::Average)
        } else {
            Some(Fill::Fixed(self.color))
        }
    }
}

/// Where images large enough to skip upscaling go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Move straight into the final directory untouched
    MoveToFinal,

    /// Move into the upscaled directory so the last optimization pass re-encodes them
    Reoptimize,
}

/// Settings for the external upscaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleSettings {
    /// Path to the upscaler executable
    pub executable: PathBuf,

    /// Model name passed to the upscaler
    pub model: String,

    /// Integer scale factor
    pub scale: u32,

    /// GPU device id
    pub gpu_id: u32,

    /// Output format of upscaled images
    pub output_format: String,

    /// Images with more than this many megapixels are not upscaled
    pub skip_min_megapixels: f64,

    /// Destination of images skipped for size
    pub skip_policy: SkipPolicy,
}

impl Default for UpscaleSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("Real-ESRGAN/realesrgan-ncnn-vulkan"),
            model: "realesrgan-x4plus-anime".to_string(),
            scale: 4,
            gpu_id: 0,
            output_format: "jpg".to_string(),
            skip_min_megapixels: 10.0,
            skip_policy: SkipPolicy::MoveToFinal,
        }
    }
}

impl UpscaleSettings {
    /// Pixel count above which an image skips upscaling
    pub fn skip_pixel_threshold(&self) -> u64 {
        (self.skip_min_megapixels * 1_000_000.0) as u64
    }
}

/// An external program and its fixed arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Log level for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directories: Directories::default(),
            extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "webp".to_string(),
            ],
            recursive: true,
            quality: 70,
            similarity: Similarity::Preset(SimilarityPreset::Low),
            variation_threshold: 1.0,
            allow_deleting: true,
            allow_review_copies: true,
            transparency: TransparencyPolicy::default(),
            upscale: UpscaleSettings::default(),
            lossless_optimizer: None,
            threads: 0, // Auto
            max_image_pixels: Some(1_000_000_000),
            create_missing_dirs: true,
            cleanup_on_exit: true,
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Configuration(format!("Failed to open config file: {}", e)))?;

        let config: Config = serde_json::from_reader(file)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .map_err(|e| Error::Configuration(format!("Failed to create config file: {}", e)))?;

        serde_json::to_writer_pretty(file, self)
            .map_err(|e| Error::Configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Whether `path` carries one of the configured extensions
    pub fn accepts_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').to_lowercase() == ext)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(Error::Configuration(
                "Quality must be between 0 and 100".to_string(),
            ));
        }

        if self.extensions.is_empty() {
            return Err(Error::Configuration(
                "At least one image extension must be allowed".to_string(),
            ));
        }

        let threshold = self.similarity.mse_threshold();
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::Configuration(format!(
                "Similarity threshold must be a non-negative number, got {}",
                threshold
            )));
        }

        if self.upscale.scale == 0 {
            return Err(Error::Configuration(
                "Upscale factor must be at least 1".to_string(),
            ));
        }

        if !self.upscale.skip_min_megapixels.is_finite() || self.upscale.skip_min_megapixels < 0.0
        {
            return Err(Error::Configuration(
                "Upscale skip threshold must be a non-negative number of megapixels".to_string(),
            ));
        }

        if self.upscale.output_format.trim().is_empty() {
            return Err(Error::Configuration(
                "Upscale output format must not be empty".to_string(),
            ));
        }

        // Upscaled images are re-indexed with the same extension filter
        let upscaled_name = format!("upscaled.{}", self.upscale.output_format.trim());
        if !self.accepts_extension(Path::new(&upscaled_name)) {
            return Err(Error::Configuration(format!(
                "Upscale output format {} is not among the allowed extensions [{}]",
                self.upscale.output_format,
                self.extensions.join(", ")
            )));
        }

        if self.max_image_pixels == Some(0) {
            return Err(Error::Configuration(
                "Maximum image size must be at least one pixel".to_string(),
            ));
        }

        // Every stage relies on reading and writing distinct directories
        let named = self.directories.named();
        for (i, (name_a, dir_a)) in named.iter().enumerate() {
            for (name_b, dir_b) in named.iter().skip(i + 1) {
                if dir_a == dir_b {
                    return Err(Error::Configuration(format!(
                        "Directories {} and {} must differ (both {})",
                        name_a,
                        name_b,
                        dir_a.display()
                    )));
                }
            }
        }

        Ok(())
    }
}
