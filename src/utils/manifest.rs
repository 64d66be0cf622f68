// src/utils/manifest.rs: SampleInfo manifest discovery and parsing

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::config::defs::SAMPLE_INFO_GLOB;

pub const MANIFEST_FIELDS: usize = 9;

lazy_static! {
    static ref HEADER_RE: Regex = Regex::new(r"(^|\s)R1\s+R2(\s|$)").unwrap();
    static ref SAMPLE_INFO_PATTERN: Pattern = Pattern::new(SAMPLE_INFO_GLOB).unwrap();
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("No SampleInfo file in the directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("It seems there are several SampleInfo files (it needs only one):\n1) {}\n2) {}", .first.display(), .second.display())]
    Ambiguous { first: PathBuf, second: PathBuf },

    #[error("Wrong record in SampleInfo file: {}\nline: {line}", .file.display())]
    Malformed { file: PathBuf, line: String },

    #[error("Wrong format of SampleInfo file (no samples): {}", .0.display())]
    Empty(PathBuf),

    #[error("No barcode for sample {sample} in SampleInfo file: {}", .file.display())]
    MissingBarcode { file: PathBuf, sample: String },

    #[error("Wrong read file name for sample {sample} in SampleInfo file: {} ({} is missing)", .file.display(), .path.display())]
    MissingReads { file: PathBuf, sample: String, path: PathBuf },

    #[error("Can't read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}


/// One sample row of the SampleInfo file.
/// `baseline`, `subject_id`, `antigen` and `reads_expected` are carried but unused by the stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub sample_name: String,
    pub chain: String,
    pub barcode: String,
    pub r1: String,
    pub r2: String,
    pub baseline: String,
    pub subject_id: String,
    pub antigen: String,
    pub reads_expected: String,
}

impl SampleRecord {
    fn from_fields(fields: &[&str]) -> Option<Self> {
        if fields.len() != MANIFEST_FIELDS {
            return None;
        }
        let f = |i: usize| fields[i].trim().to_string();
        Some(SampleRecord {
            sample_name: f(0),
            chain: f(1),
            barcode: f(2),
            r1: f(3),
            r2: f(4),
            baseline: f(5),
            subject_id: f(6),
            antigen: f(7),
            reads_expected: f(8),
        })
    }

    /// R1 and R2 paths resolved against the input directory.
    /// Only the file name of each declared path is kept.
    pub fn read_paths(&self, input_dir: &Path) -> (PathBuf, PathBuf) {
        (relocate(input_dir, &self.r1), relocate(input_dir, &self.r2))
    }
}

fn relocate(dir: &Path, declared: &str) -> PathBuf {
    match Path::new(declared).file_name() {
        Some(name) => dir.join(name),
        None => dir.join(declared),
    }
}


/// Finds the single SampleInfo file of a directory.
/// Non-recursive; names are matched case-insensitively against `*sample*info*`.
/// Hidden files (`._SampleInfo.txt` sidecars, editor swap files) never match.
///
/// # Arguments
///
/// * `dir` - Directory to scan.
///
/// # Returns
/// Path of the manifest, or NotFound / Ambiguous.
pub fn locate(dir: &Path) -> Result<PathBuf, ManifestError> {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Err(ManifestError::NotFound(dir.to_path_buf())),
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| SAMPLE_INFO_PATTERN.matches_with(&name.to_string_lossy(), options))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    let mut candidates = candidates.into_iter();
    match (candidates.next(), candidates.next()) {
        (None, _) => Err(ManifestError::NotFound(dir.to_path_buf())),
        (Some(first), Some(second)) => Err(ManifestError::Ambiguous { first, second }),
        (Some(only), None) => Ok(only),
    }
}


/// Parses a SampleInfo file into records, in file order.
/// Blank lines and the `R1 R2` header line are skipped.
pub fn parse(path: &Path) -> Result<Vec<SampleRecord>, ManifestError> {
    let content = fs::read_to_string(path).map_err(|e| ManifestError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if HEADER_RE.is_match(line) {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let record = SampleRecord::from_fields(&fields).ok_or_else(|| ManifestError::Malformed {
            file: path.to_path_buf(),
            line: line.trim().to_string(),
        })?;
        records.push(record);
    }

    if records.is_empty() {
        return Err(ManifestError::Empty(path.to_path_buf()));
    }
    Ok(records)
}

/// locate + parse in one step.
pub fn load(dir: &Path) -> Result<(PathBuf, Vec<SampleRecord>), ManifestError> {
    let path = locate(dir)?;
    let records = parse(&path)?;
    Ok((path, records))
}
