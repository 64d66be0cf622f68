use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use glob::{glob, Pattern};
use log::{debug, warn};

use crate::config::defs::{PipelineError, SEQUENCE_FILE_GLOB};

pub fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir)
        .map_err(|e| PipelineError::IOError(format!("Can't create directory {}: {}", dir.display(), e)))
}

fn dir_pattern(dir: &Path, pattern: &str) -> String {
    format!("{}/{}", Pattern::escape(&dir.to_string_lossy()), pattern)
}

/// Files of `dir` matching the glob `pattern`, sorted. Directories are skipped.
pub fn glob_files(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    match glob(&dir_pattern(dir, pattern)) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            warn!("Bad file pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

/// Expands `pattern` inside `dir` the way a shell would: every match, or the
/// unexpanded pattern when nothing matches so the tool reports the missing input.
pub fn expand_or_literal(dir: &Path, pattern: &str) -> Vec<String> {
    let matches: Vec<String> = glob_files(dir, pattern)
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    if matches.is_empty() {
        let literal = dir.join(pattern);
        warn!("No files match {}", literal.display());
        vec![literal.to_string_lossy().into_owned()]
    } else {
        matches
    }
}


/// Deletes every `*.gz` below `dir`.
///
/// # Arguments
///
/// * `dir` - The run output directory.
///
/// # Returns
/// Number of files removed.
pub fn remove_sequence_files(dir: &Path) -> Result<usize, PipelineError> {
    let pattern = dir_pattern(dir, &format!("**/{}", SEQUENCE_FILE_GLOB));
    let paths = glob(&pattern).map_err(|e| PipelineError::Other(e.into()))?;

    let mut removed = 0;
    for path in paths.filter_map(Result::ok).filter(|p| p.is_file()) {
        fs::remove_file(&path)
            .map_err(|e| PipelineError::IOError(format!("Can't remove {}: {}", path.display(), e)))?;
        debug!("Removed {}", path.display());
        removed += 1;
    }
    Ok(removed)
}


/// Writes `dir` into a gzip tarball at `archive`, replacing an existing one.
/// Entries are stored relative to `dir`.
pub fn compress_dir(dir: &Path, archive: &Path) -> Result<(), PipelineError> {
    let io_err = |e: std::io::Error| PipelineError::IOError(format!("Can't write {}: {}", archive.display(), e));

    if archive.exists() {
        fs::remove_file(archive).map_err(io_err)?;
    }
    let file = File::create(archive).map_err(io_err)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append_dir_all(".", dir).map_err(io_err)?;
    builder.into_inner().map_err(io_err)?.finish().map_err(io_err)?;
    Ok(())
}
