use std::path::PathBuf;
use thiserror::Error;

/// Precondition failures. These are reported immediately and never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("nugetcommand parameter cannot be empty.")]
    EmptyCommand,
    #[error("project parameter cannot be empty.")]
    EmptyProjectPath,
    #[error("{} was not found.", .0.display())]
    ProjectNotFound(PathBuf),
    #[error("vsversion parameter cannot be empty.")]
    EmptyHostVersion,
}

/// Everything one run needs from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Console command text, sent verbatim ahead of the hand-off instructions.
    pub command: String,
    pub project_path: PathBuf,
    /// Host version identifier, e.g. `15.0`.
    pub host_version: String,
}

impl RunRequest {
    pub fn new(
        command: impl Into<String>,
        project_path: impl Into<PathBuf>,
        host_version: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            project_path: project_path.into(),
            host_version: host_version.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.command.trim().is_empty() {
            return Err(ValidationError::EmptyCommand);
        }
        if self.project_path.to_string_lossy().trim().is_empty() {
            return Err(ValidationError::EmptyProjectPath);
        }
        if self.host_version.trim().is_empty() {
            return Err(ValidationError::EmptyHostVersion);
        }
        if !self.project_path.is_file() {
            return Err(ValidationError::ProjectNotFound(self.project_path.clone()));
        }
        Ok(())
    }
}
