use std::fs;
use std::path::{Path, PathBuf};

use crate::config::defs::PipelineError;

/// The run transcript: stage outputs and diagnostics, written once at the end of a run.
/// Without a file path the transcript is only kept in memory.
#[derive(Debug, Default)]
pub struct RunLog {
    file: Option<PathBuf>,
    entries: Vec<String>,
}

impl RunLog {
    pub fn new(file: Option<PathBuf>) -> Self {
        RunLog {
            file,
            entries: Vec::new(),
        }
    }

    /// Appends an entry, newline-terminated.
    pub fn add(&mut self, entry: impl Into<String>) {
        let mut entry = entry.into();
        if !entry.ends_with('\n') {
            entry.push('\n');
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn contents(&self) -> String {
        self.entries.concat()
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Writes the whole transcript to the log file, replacing earlier content.
    pub fn write(&self) -> Result<(), PipelineError> {
        if let Some(file) = &self.file {
            fs::write(file, self.contents())
                .map_err(|e| PipelineError::IOError(format!("Can't write log {}: {}", file.display(), e)))?;
        }
        Ok(())
    }
}
