#![allow(dead_code)]

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use upscale_pipeline_core::{Config, Directories, Error, Result, Upscaler};

/// Write a uniformly colored opaque image
pub fn create_rgb_image(dir: &Path, name: &str, width: u32, height: u32, color: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb(color))
        .save(&path)
        .unwrap();
    path
}

/// Write a PNG whose left half is opaque `color` and right half fully transparent
pub fn create_half_transparent_png(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_fn(20, 20, |x, _| {
        if x < 10 {
            Rgba([color[0], color[1], color[2], 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
    .save(&path)
    .unwrap();
    path
}

/// File names in `dir`, sorted; empty when the directory does not exist
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => vec![],
    };
    names.sort();
    names
}

/// A temporary image tree with the base directory in place
pub struct TestTree {
    pub root: TempDir,
    pub config: Config,
}

impl TestTree {
    /// Unattended configuration with a 10,000 pixel skip threshold
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config {
            directories: Directories::under(root.path()),
            allow_review_copies: false,
            cleanup_on_exit: false,
            threads: 2,
            ..Default::default()
        };
        config.upscale.skip_min_megapixels = 0.01;
        fs::create_dir_all(&config.directories.base).unwrap();
        Self { root, config }
    }

    pub fn dirs(&self) -> &Directories {
        &self.config.directories
    }
}

/// Stands in for Real-ESRGAN: records what it saw and copies its input over
#[derive(Clone, Default)]
pub struct FakeUpscaler {
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeUpscaler {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_input(&self) -> Vec<String> {
        self.calls.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl Upscaler for FakeUpscaler {
    fn verify(&self) -> Result<()> {
        Ok(())
    }

    fn upscale(&self, input: &Path, output: &Path) -> Result<()> {
        let names = file_names(input);
        for name in &names {
            fs::copy(input.join(name), output.join(name))?;
        }
        self.calls.lock().unwrap().push(names);
        Ok(())
    }
}

/// Exits cleanly but writes output nothing can decode
pub struct CorruptingUpscaler;

impl Upscaler for CorruptingUpscaler {
    fn verify(&self) -> Result<()> {
        Ok(())
    }

    fn upscale(&self, input: &Path, output: &Path) -> Result<()> {
        for name in file_names(input) {
            fs::write(output.join(name), b"truncated gpu output")?;
        }
        Ok(())
    }
}

/// Always fails the way a crashed upscaler would
pub struct FailingUpscaler;

impl Upscaler for FailingUpscaler {
    fn verify(&self) -> Result<()> {
        Ok(())
    }

    fn upscale(&self, _input: &Path, _output: &Path) -> Result<()> {
        Err(Error::SubprocessSpawn {
            program: "realesrgan-ncnn-vulkan".to_string(),
            source: io::Error::new(io::ErrorKind::Other, "device lost"),
        })
    }
}
