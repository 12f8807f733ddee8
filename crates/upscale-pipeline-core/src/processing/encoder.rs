//! Transparency-aware re-encoding of a single image

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::io::{Limits, Reader};
use image::{ColorType, DynamicImage, ImageEncoder, RgbImage};
use log::debug;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use crate::config::{Fill, TransparencyPolicy};
use crate::error::{Error, Result};
use crate::processing::lossless::LosslessOptimizer;
use crate::processing::transparency;

/// Container format the re-encoder writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy, followed by a lossless optimization pass
    Jpeg,

    /// Lossless with alpha, never optimized
    Png,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    /// Every format the re-encoder may produce
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Jpeg, OutputFormat::Png];
}

/// How a decoded image is turned into output bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePlan {
    /// No alpha channel: convert to RGB, encode lossy
    Opaque,

    /// Alpha channel replaced by a background before lossy encoding
    Flatten(Fill),

    /// Alpha channel kept, encoded losslessly
    PreserveAlpha,
}

impl EncodePlan {
    /// Decide the plan for `image` under `policy`
    pub fn for_image(image: &DynamicImage, policy: &TransparencyPolicy) -> Self {
        if !image.color().has_alpha() {
            return EncodePlan::Opaque;
        }
        match policy.fill() {
            Some(fill) => EncodePlan::Flatten(fill),
            None => EncodePlan::PreserveAlpha,
        }
    }

    pub fn output_format(self) -> OutputFormat {
        match self {
            EncodePlan::Opaque | EncodePlan::Flatten(_) => OutputFormat::Jpeg,
            EncodePlan::PreserveAlpha => OutputFormat::Png,
        }
    }
}

/// Encoded image bytes and their format
#[derive(Debug, Clone)]
pub struct Encoded {
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

/// Re-encodes images according to quality and transparency settings
pub struct Reencoder<'a> {
    quality: u8,
    transparency: &'a TransparencyPolicy,
    optimizer: &'a dyn LosslessOptimizer,
    max_pixels: Option<u64>,
}

impl<'a> Reencoder<'a> {
    pub fn new(
        quality: u8,
        transparency: &'a TransparencyPolicy,
        optimizer: &'a dyn LosslessOptimizer,
    ) -> Self {
        Self {
            quality,
            transparency,
            optimizer,
            max_pixels: None,
        }
    }

    /// Refuse to decode sources with more than `max_pixels` pixels
    pub fn with_max_pixels(mut self, max_pixels: Option<u64>) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Encode a decoded image
    pub fn encode(&self, image: &DynamicImage) -> Result<Encoded> {
        let plan = EncodePlan::for_image(image, self.transparency);

        let bytes = match plan {
            EncodePlan::Opaque => self.encode_jpeg(&image.to_rgb8())?,
            EncodePlan::Flatten(fill) => {
                let rgba = image.to_rgba8();
                let background = match fill {
                    Fill::Fixed(color) => color,
                    Fill::Average => transparency::average_color(&rgba)
                        .unwrap_or(self.transparency.color),
                };
                debug!("Flattening transparency onto {:?}", background);
                self.encode_jpeg(&transparency::flatten(&rgba, background))?
            }
            EncodePlan::PreserveAlpha => encode_png(image)?,
        };

        Ok(Encoded {
            format: plan.output_format(),
            bytes,
        })
    }

    /// Decode `source`, re-encode it and write the result into `destination_dir`
    ///
    /// The output is named after the source stem with the extension of the
    /// chosen format. Nothing is written unless encoding succeeded, and a
    /// failed write removes the partial file.
    pub fn reencode_file(&self, source: &Path, destination_dir: &Path) -> Result<PathBuf> {
        let image = open_image(source, self.max_pixels)?;
        let encoded = self.encode(&image).map_err(|e| match e {
            Error::Image(err) => Error::Codec {
                path: source.to_path_buf(),
                message: err.to_string(),
            },
            other => other,
        })?;

        let stem = source
            .file_stem()
            .ok_or_else(|| Error::FileNotFound(source.to_path_buf()))?;
        let destination = output_path(destination_dir, stem, encoded.format);

        if let Err(e) = fs::write(&destination, &encoded.bytes) {
            let _ = fs::remove_file(&destination);
            return Err(e.into());
        }

        Ok(destination)
    }

    fn encode_jpeg(&self, rgb: &RgbImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        // The encoder's quantization tables are only defined for 1-100
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.quality.clamp(1, 100));
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
        self.optimizer.optimize(bytes)
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        ColorType::Rgba8,
    )?;
    Ok(bytes)
}

/// Decode an image, reporting a vanished file as `FileNotFound`
///
/// An image with more than `max_pixels` pixels is rejected as a codec
/// failure before its pixel data is decoded.
pub fn open_image(path: &Path, max_pixels: Option<u64>) -> Result<DynamicImage> {
    let codec_error = |message: String| Error::Codec {
        path: path.to_path_buf(),
        message,
    };

    let mut limits = Limits::no_limits();
    if let Some(max) = max_pixels {
        let (width, height) = image_reader(path)?
            .into_dimensions()
            .map_err(|e| codec_error(e.to_string()))?;
        let pixels = width as u64 * height as u64;
        if pixels > max {
            return Err(codec_error(format!(
                "{}x{} image exceeds the limit of {} pixels",
                width, height, max
            )));
        }
        // No single side can exceed the pixel cap either
        let side = u32::try_from(max).unwrap_or(u32::MAX);
        limits.max_image_width = Some(side);
        limits.max_image_height = Some(side);
    }

    let mut reader = image_reader(path)?;
    reader.limits(limits);
    reader.decode().map_err(|e| codec_error(e.to_string()))
}

fn image_reader(path: &Path) -> Result<Reader<BufReader<File>>> {
    let reader = Reader::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::FileNotFound(path.to_path_buf())
        } else {
            Error::Io(e)
        }
    })?;
    Ok(reader.with_guessed_format()?)
}

/// Where the re-encoder writes `stem` in `format`
///
/// The extension is appended rather than substituted so stems containing dots
/// survive intact.
pub fn output_path(dir: &Path, stem: &OsStr, format: OutputFormat) -> PathBuf {
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(format.extension());
    dir.join(name)
}

/// The first existing re-encoder output for `stem` in `dir`
pub fn existing_output(dir: &Path, stem: &OsStr) -> Option<PathBuf> {
    OutputFormat::ALL.iter().find_map(|format| {
        let candidate = output_path(dir, stem, *format);
        candidate.is_file().then_some(candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::lossless::Passthrough;
    use image::{Rgb, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Counts optimizer calls and leaves the bytes alone
    #[derive(Default)]
    struct CountingOptimizer {
        calls: AtomicUsize,
    }

    impl LosslessOptimizer for CountingOptimizer {
        fn optimize(&self, jpeg: Vec<u8>) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(jpeg)
        }
    }

    fn transparent_image() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgba([30, 60, 90, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        }))
    }

    #[test]
    fn test_plan_opaque_ignores_transparency_policy() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])));
        let policy = TransparencyPolicy {
            replace: true,
            use_average: true,
            ..Default::default()
        };
        assert_eq!(EncodePlan::for_image(&image, &policy), EncodePlan::Opaque);
    }

    #[test]
    fn test_plan_with_alpha() {
        let image = transparent_image();

        let keep = TransparencyPolicy::default();
        assert_eq!(EncodePlan::for_image(&image, &keep), EncodePlan::PreserveAlpha);

        let replace = TransparencyPolicy {
            replace: true,
            color: [9, 9, 9],
            use_average: false,
        };
        assert_eq!(
            EncodePlan::for_image(&image, &replace),
            EncodePlan::Flatten(Fill::Fixed([9, 9, 9]))
        );
    }

    #[test]
    fn test_opaque_image_becomes_optimized_jpeg() {
        let optimizer = CountingOptimizer::default();
        let policy = TransparencyPolicy::default();
        let reencoder = Reencoder::new(70, &policy, &optimizer);

        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([120, 10, 200])));
        let encoded = reencoder.encode(&image).unwrap();

        assert_eq!(encoded.format, OutputFormat::Jpeg);
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(optimizer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_preserved_alpha_is_png_and_not_optimized() {
        let optimizer = CountingOptimizer::default();
        let policy = TransparencyPolicy::default();
        let reencoder = Reencoder::new(70, &policy, &optimizer);

        let encoded = reencoder.encode(&transparent_image()).unwrap();

        assert_eq!(encoded.format, OutputFormat::Png);
        assert_eq!(optimizer.calls.load(Ordering::SeqCst), 0);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.to_rgba8().get_pixel(12, 3).0[3], 0);
    }

    #[test]
    fn test_flattened_alpha_uses_fixed_color() {
        let policy = TransparencyPolicy {
            replace: true,
            color: [0, 255, 0],
            use_average: false,
        };
        let reencoder = Reencoder::new(100, &policy, &Passthrough);

        let encoded = reencoder.encode(&transparent_image()).unwrap();
        assert_eq!(encoded.format, OutputFormat::Jpeg);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgb8();
        let [r, g, b] = decoded.get_pixel(14, 8).0;
        assert!(r < 20 && g > 235 && b < 20, "got {:?}", [r, g, b]);
    }

    #[test]
    fn test_flattened_alpha_uses_average_color() {
        let policy = TransparencyPolicy {
            replace: true,
            color: [255, 255, 255],
            use_average: true,
        };
        let reencoder = Reencoder::new(100, &policy, &Passthrough);

        let encoded = reencoder.encode(&transparent_image()).unwrap();
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgb8();

        // The transparent half takes the color of the opaque half
        let [r, g, b] = decoded.get_pixel(14, 8).0;
        assert!((r as i32 - 30).abs() <= 4, "red {}", r);
        assert!((g as i32 - 60).abs() <= 4, "green {}", g);
        assert!((b as i32 - 90).abs() <= 4, "blue {}", b);
    }

    #[test]
    fn test_reencode_file_names_output_after_stem() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("photo.webp.png");
        RgbaImage::from_pixel(4, 4, Rgba([5, 5, 5, 255]))
            .save(&source)
            .unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let policy = TransparencyPolicy::default();
        let reencoder = Reencoder::new(70, &policy, &Passthrough);
        let written = reencoder.reencode_file(&source, &out).unwrap();

        // RGBA source keeps its alpha channel even when fully opaque
        assert_eq!(written, out.join("photo.webp.png"));
        assert!(!out.join("photo.png").exists());
        assert!(written.is_file());
        assert_eq!(existing_output(&out, OsStr::new("photo.webp")), Some(written));
    }

    #[test]
    fn test_reencode_missing_file_is_transient() {
        let dir = tempdir().unwrap();
        let policy = TransparencyPolicy::default();
        let reencoder = Reencoder::new(70, &policy, &Passthrough);

        let err = reencoder
            .reencode_file(&dir.path().join("gone.png"), dir.path())
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_corrupt_file_is_codec_error_and_writes_nothing() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        fs::write(&source, b"definitely not a jpeg").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let policy = TransparencyPolicy::default();
        let reencoder = Reencoder::new(70, &policy, &Passthrough);
        let result = reencoder.reencode_file(&source, &out);

        assert!(result.is_err());
        assert!(existing_output(&out, OsStr::new("broken")).is_none());
    }

    #[test]
    fn test_pixel_cap_rejects_large_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("wide.png");
        RgbImage::from_pixel(12, 10, Rgb([1, 2, 3]))
            .save(&source)
            .unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let policy = TransparencyPolicy::default();
        let capped = Reencoder::new(70, &policy, &Passthrough).with_max_pixels(Some(100));
        let err = capped.reencode_file(&source, &out).unwrap_err();

        assert!(matches!(err, Error::Codec { .. }));
        assert!(!err.is_transient());
        assert!(existing_output(&out, OsStr::new("wide")).is_none());

        // 120 pixels fit exactly
        let roomy = Reencoder::new(70, &policy, &Passthrough).with_max_pixels(Some(120));
        assert!(roomy.reencode_file(&source, &out).is_ok());
    }

    #[test]
    fn test_open_image_without_cap() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("plain.png");
        RgbImage::from_pixel(3, 2, Rgb([9, 9, 9])).save(&source).unwrap();

        let image = open_image(&source, None).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }
}
