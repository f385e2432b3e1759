//! Out-of-band completion signal for the final console command.
//!
//! Executing a command in the host returns as soon as the host accepts it, so the command text
//! itself is extended to write its error stream into an output file and flip a flag file.
//! The flag keeps the host's convention: `True` while the command is running, `False` once done.

use crate::cancel::CancelToken;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;

pub const FLAG_RUNNING: &str = "True";
pub const FLAG_DONE: &str = "False";

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("failed to create hand-off file: {0}")]
    Create(#[source] io::Error),
    #[error("failed to read completion flag '{}': {source}", .path.display())]
    ReadFlag {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read command output '{}': {source}", .path.display())]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("interrupted while waiting for the command to finish")]
    Cancelled,
}

/// The flag file and output file shared with the host-side command.
pub struct ResultHandoff {
    flag: NamedTempFile,
    output: NamedTempFile,
}

impl ResultHandoff {
    /// Create both files with the flag set to the running marker.
    pub fn create() -> Result<Self, HandoffError> {
        let mut flag = NamedTempFile::new().map_err(HandoffError::Create)?;
        writeln!(flag, "{FLAG_RUNNING}").map_err(HandoffError::Create)?;
        flag.as_file().sync_all().map_err(HandoffError::Create)?;
        let output = NamedTempFile::new().map_err(HandoffError::Create)?;
        Ok(Self { flag, output })
    }

    pub fn flag_path(&self) -> &Path {
        self.flag.path()
    }

    pub fn output_path(&self) -> &Path {
        self.output.path()
    }

    /// Append the hand-off instructions to the user's console command.
    pub fn completion_script(&self, command: &str) -> String {
        format!(
            "{command}; $error > {} ; \"{FLAG_DONE}\" > {}",
            quote_path(self.output_path()),
            quote_path(self.flag_path())
        )
    }

    /// Read the flag once. Content the host is in the middle of rewriting counts as running.
    pub fn is_running(&self) -> Result<bool, HandoffError> {
        let bytes = fs::read(self.flag_path()).map_err(|source| HandoffError::ReadFlag {
            path: self.flag_path().to_path_buf(),
            source,
        })?;
        let text = decode_text(&bytes);
        Ok(match parse_flag(&text) {
            Some(running) => running,
            None => {
                tracing::debug!(content = %text.trim(), "Completion flag not readable yet");
                true
            }
        })
    }

    /// Poll the flag until it reports completion. The first read happens after one interval.
    pub fn wait_for_completion(
        &self,
        interval: Duration,
        cancel: &CancelToken,
    ) -> Result<(), HandoffError> {
        loop {
            if !cancel.sleep(interval) {
                return Err(HandoffError::Cancelled);
            }
            if !self.is_running()? {
                return Ok(());
            }
        }
    }

    /// Consume the hand-off and return the captured output. Both files go away afterwards.
    pub fn read_output(self) -> Result<String, HandoffError> {
        let path = self.output_path().to_path_buf();
        let bytes = fs::read(&path).map_err(|source| HandoffError::ReadOutput { path, source })?;
        Ok(decode_text(&bytes))
    }
}

/// `true` = still running, `false` = done; `None` for anything else.
pub fn parse_flag(text: &str) -> Option<bool> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case(FLAG_RUNNING) {
        Some(true)
    } else if trimmed.eq_ignore_ascii_case(FLAG_DONE) {
        Some(false)
    } else {
        None
    }
}

/// Decode file content, honoring a UTF-8 or UTF-16 byte-order mark. Console redirection in the
/// host writes UTF-16LE by default.
pub fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|ch| ch.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Single-quoted console literal; embedded quotes are doubled.
fn quote_path(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}
