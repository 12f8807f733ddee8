use log::{debug, info};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::UpscaleSettings;
use crate::error::{Error, Result};
use crate::upscale::Upscaler;

/// Real-ESRGAN ncnn/Vulkan command-line upscaler
///
/// The executable is run once per batch with the whole input directory. Its
/// own output is discarded; only the exit status matters.
#[derive(Debug, Clone)]
pub struct RealEsrganUpscaler {
    settings: UpscaleSettings,
}

impl RealEsrganUpscaler {
    pub fn new(settings: &UpscaleSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    fn program_name(&self) -> String {
        self.settings.executable.display().to_string()
    }

    /// Resolve the executable, looking it up on `PATH` for bare names
    fn resolve_executable(&self) -> Option<PathBuf> {
        let executable = &self.settings.executable;
        if executable.is_file() {
            return Some(executable.clone());
        }
        if executable.components().count() != 1 {
            return None;
        }
        let search_path = env::var_os("PATH")?;
        env::split_paths(&search_path)
            .map(|dir| dir.join(executable))
            .find(|candidate| candidate.is_file())
    }

    /// Command line arguments for one batch
    pub fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-i".into(),
            input.as_os_str().to_os_string(),
            "-o".into(),
            output.as_os_str().to_os_string(),
            "-n".into(),
            self.settings.model.clone().into(),
            "-s".into(),
            self.settings.scale.to_string().into(),
            "-g".into(),
            self.settings.gpu_id.to_string().into(),
            "-f".into(),
            self.settings.output_format.clone().into(),
        ]
    }
}

impl Upscaler for RealEsrganUpscaler {
    fn verify(&self) -> Result<()> {
        match self.resolve_executable() {
            Some(path) => {
                debug!("Using upscaler at {}", path.display());
                Ok(())
            }
            None => Err(Error::UpscalerNotFound(self.settings.executable.clone())),
        }
    }

    fn upscale(&self, input: &Path, output: &Path) -> Result<()> {
        let executable = self
            .resolve_executable()
            .ok_or_else(|| Error::UpscalerNotFound(self.settings.executable.clone()))?;
        let args = self.args(input, output);
        info!(
            "Running {} with model {} at x{}",
            executable.display(),
            self.settings.model,
            self.settings.scale
        );

        let status = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| Error::SubprocessSpawn {
                program: self.program_name(),
                source,
            })?;

        if !status.success() {
            return Err(Error::Subprocess {
                program: self.program_name(),
                status,
            });
        }
        Ok(())
    }
}
