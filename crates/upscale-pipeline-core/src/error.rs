use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Custom error types for the upscale-pipeline library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Codec failure tied to a specific file
    #[error("Failed to re-encode {}: {message}", path.display())]
    Codec { path: PathBuf, message: String },

    /// File vanished between indexing and use
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Required directory is missing
    #[error("Directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Upscaler executable is missing
    #[error("Upscaler executable not found: {0}")]
    UpscalerNotFound(PathBuf),

    /// External process could not be started
    #[error("Failed to start {program}: {source}")]
    SubprocessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// External process exited unsuccessfully
    #[error("{program} exited with {status}")]
    Subprocess { program: String, status: ExitStatus },

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Safety check failure
    #[error("Safety check failed: {0}")]
    SafetyCheck(String),

    /// User requested shutdown
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether the error only affects a single file and processing may go on
    pub fn is_transient(&self) -> bool {
        match self {
            Error::FileNotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether the error belongs to the configuration class
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::DirectoryNotFound(_)
                | Error::NotADirectory(_)
                | Error::UpscalerNotFound(_)
        )
    }
}
