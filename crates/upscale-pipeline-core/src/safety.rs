use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Guards destructive file operations to a single root directory
pub struct SafetyManager {
    root: PathBuf,
}

impl SafetyManager {
    /// Allow deletions only below `root`
    pub fn new(root: &Path) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    /// Check that `path` is a regular file inside the guarded root
    ///
    /// A file that no longer exists is reported as `FileNotFound` so callers
    /// can treat it as a soft failure.
    pub fn check_removal(&self, path: &Path) -> Result<()> {
        let resolved = path
            .canonicalize()
            .map_err(|_| Error::FileNotFound(path.to_path_buf()))?;

        if !resolved.starts_with(&self.root) {
            return Err(Error::SafetyCheck(format!(
                "{} is outside {}",
                path.display(),
                self.root.display()
            )));
        }

        if !resolved.is_file() {
            return Err(Error::SafetyCheck(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        Ok(())
    }
}
