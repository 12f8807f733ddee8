use log::debug;
use std::io::Write;
use std::process::{Command, Stdio};

use crate::config::ExternalCommand;
use crate::error::{Error, Result};

/// Byte-level JPEG optimization that keeps the decoded image unchanged
pub trait LosslessOptimizer: Send + Sync {
    fn optimize(&self, jpeg: Vec<u8>) -> Result<Vec<u8>>;
}

/// Returns the encoded bytes untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl LosslessOptimizer for Passthrough {
    fn optimize(&self, jpeg: Vec<u8>) -> Result<Vec<u8>> {
        Ok(jpeg)
    }
}

/// Pipes JPEG bytes through an external optimizer such as
/// `jpegtran -optimize -copy none`
#[derive(Debug, Clone)]
pub struct ExternalOptimizer {
    command: ExternalCommand,
}

impl ExternalOptimizer {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }

    fn program_name(&self) -> String {
        self.command.program.display().to_string()
    }
}

impl LosslessOptimizer for ExternalOptimizer {
    fn optimize(&self, jpeg: Vec<u8>) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::SubprocessSpawn {
                program: self.program_name(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| Error::SubprocessSpawn {
            program: self.program_name(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin unavailable"),
        })?;

        // Feed stdin from a separate thread so a full stdout pipe cannot deadlock us
        let writer = std::thread::spawn(move || stdin.write_all(&jpeg));

        let output = child.wait_with_output()?;
        let written = writer.join().unwrap_or_else(|_| {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "optimizer input thread panicked",
            ))
        });

        // A failing optimizer usually closes stdin early, so its status explains more
        if !output.status.success() {
            return Err(Error::Subprocess {
                program: self.program_name(),
                status: output.status,
            });
        }
        written?;

        debug!(
            "{} produced {} bytes",
            self.program_name(),
            output.stdout.len()
        );
        Ok(output.stdout)
    }
}

/// The optimizer described by the configuration
pub fn from_config(command: Option<&ExternalCommand>) -> Box<dyn LosslessOptimizer> {
    match command {
        Some(command) => Box::new(ExternalOptimizer::new(command.clone())),
        None => Box::new(Passthrough),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_passthrough_keeps_bytes() {
        let bytes = vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9];
        assert_eq!(Passthrough.optimize(bytes.clone()).unwrap(), bytes);
    }

    #[test]
    fn test_missing_optimizer_fails_to_spawn() {
        let optimizer = ExternalOptimizer::new(ExternalCommand {
            program: PathBuf::from("/definitely/not/a/jpeg/optimizer"),
            args: vec![],
        });
        let result = optimizer.optimize(vec![1, 2, 3]);
        assert!(matches!(result, Err(Error::SubprocessSpawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_optimizer_pipes_bytes() {
        let optimizer = ExternalOptimizer::new(ExternalCommand {
            program: PathBuf::from("cat"),
            args: vec![],
        });
        let bytes: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(optimizer.optimize(bytes.clone()).unwrap(), bytes);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_optimizer_failure_status() {
        let optimizer = ExternalOptimizer::new(ExternalCommand {
            program: PathBuf::from("false"),
            args: vec![],
        });
        assert!(matches!(
            optimizer.optimize(vec![1]),
            Err(Error::Subprocess { .. })
        ));
    }
}
