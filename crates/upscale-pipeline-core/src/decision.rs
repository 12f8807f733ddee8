use std::fmt;
use std::path::PathBuf;

/// A yes/no question the pipeline needs answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// A working directory is missing
    CreateDirectory { name: &'static str, path: PathBuf },

    /// Copy originals and their variations for manual review before deleting
    CopyForReview { destination: PathBuf },

    /// Delete the lower quality duplicates
    DeleteDuplicates { count: usize },
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::CreateDirectory { name, path } => write!(
                f,
                "{}: {} does not exist. Do you want to create it?",
                name,
                path.display()
            ),
            Prompt::CopyForReview { destination } => {
                write!(f, "Save originals vs duplicates to {}?", destination.display())
            }
            Prompt::DeleteDuplicates { count } => {
                write!(f, "Delete {} lower quality duplicates?", count)
            }
        }
    }
}

/// Answers prompts on behalf of a user
pub trait Decider {
    fn confirm(&self, prompt: &Prompt) -> bool;
}

/// Fixed answers for unattended runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticDecider {
    pub create_directories: bool,
    pub copy_for_review: bool,
    pub delete_duplicates: bool,
}

impl StaticDecider {
    /// Give the same answer to every prompt
    pub fn always(answer: bool) -> Self {
        Self {
            create_directories: answer,
            copy_for_review: answer,
            delete_duplicates: answer,
        }
    }
}

impl Decider for StaticDecider {
    fn confirm(&self, prompt: &Prompt) -> bool {
        match prompt {
            Prompt::CreateDirectory { .. } => self.create_directories,
            Prompt::CopyForReview { .. } => self.copy_for_review,
            Prompt::DeleteDuplicates { .. } => self.delete_duplicates,
        }
    }
}
