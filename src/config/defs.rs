use std::path::{Path, PathBuf};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::cli::{Arguments, Instrument};
use crate::utils::manifest::ManifestError;
use crate::utils::tools::ToolDirectory;

// External software
pub const JAVA_TAG: &str = "java";
pub const RSCRIPT_TAG: &str = "Rscript";
pub const MIGEC_TAG: &str = "migec";
pub const MIXCR_TAG: &str = "mixcr";
pub const VDJTOOLS_TAG: &str = "vdjtools";

/// How a missing dependency is brought into the managed tool directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Zip distribution unpacked into its own subdirectory; the artifact is a jar.
    JavaArchive,
    /// Single file written directly into the tool directory.
    UtilFile,
    /// R package installed through Rscript.
    RPackage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub url: &'static str,
    pub kind: ToolKind,
}

pub const CRAN_URL: &str = "https://cran.rstudio.com";

pub const MIGEC: ToolDescriptor = ToolDescriptor {
    name: "migec*.jar",
    url: "https://github.com/mikessh/migec/releases/download/1.2.9/migec-1.2.9.zip",
    kind: ToolKind::JavaArchive,
};

pub const MIXCR: ToolDescriptor = ToolDescriptor {
    name: "mixcr*.jar",
    url: "https://github.com/milaboratory/mixcr/releases/download/v3.0.13/mixcr-3.0.13.zip",
    kind: ToolKind::JavaArchive,
};

pub const VDJTOOLS: ToolDescriptor = ToolDescriptor {
    name: "vdjtools*.jar",
    url: "https://github.com/mikessh/vdjtools/releases/download/1.2.1/vdjtools-1.2.1.zip",
    kind: ToolKind::JavaArchive,
};

pub const MIGEC_HISTOGRAM: ToolDescriptor = ToolDescriptor {
    name: "histogram.R",
    url: "https://github.com/mikessh/migec/blob/master/util/histogram.R?raw=true",
    kind: ToolKind::UtilFile,
};

pub const GGPLOT2: ToolDescriptor = ToolDescriptor {
    name: "ggplot2",
    url: CRAN_URL,
    kind: ToolKind::RPackage,
};

pub const RESHAPE: ToolDescriptor = ToolDescriptor {
    name: "reshape",
    url: CRAN_URL,
    kind: ToolKind::RPackage,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MigecSubcommand {
    CheckoutBatch,
    Histogram,
    AssembleBatch,
}

impl MigecSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigecSubcommand::CheckoutBatch => "CheckoutBatch",
            MigecSubcommand::Histogram => "Histogram",
            MigecSubcommand::AssembleBatch => "AssembleBatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixcrSubcommand {
    Analyze,
    Align,
    Assemble,
    ExportClones,
}

impl MixcrSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MixcrSubcommand::Analyze => "analyze",
            MixcrSubcommand::Align => "align",
            MixcrSubcommand::Assemble => "assemble",
            MixcrSubcommand::ExportClones => "exportClones",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VdjtoolsSubcommand {
    Convert,
    FilterNonFunctional,
}

impl VdjtoolsSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            VdjtoolsSubcommand::Convert => "Convert",
            VdjtoolsSubcommand::FilterNonFunctional => "FilterNonFunctional",
        }
    }
}

// Static directory names
pub const OUTPUT_DIRNAME: &str = "output";
pub const CHECKOUT_DIRNAME: &str = "checkout";
pub const HISTOGRAM_DIRNAME: &str = "histogram";
pub const ASSEMBLE_DIRNAME: &str = "assemble";
pub const ANALYZE_DIRNAME: &str = "analyze";
pub const ALIGNMENT_DIRNAME: &str = "alignment";
pub const CLONES_DIRNAME: &str = "clones";
pub const VDJ_DIRNAME: &str = "vdj";
pub const TOOL_DIRNAME: &str = "bin";

// Static filenames
pub const BARCODES_FILE: &str = "barcodes.csv";
pub const ALIGNMENT_REPORT: &str = "alignmentReport.txt";
pub const ASSEMBLE_REPORT: &str = "assembleReport.txt";
pub const VDJ_PREFIX: &str = "vdj";
pub const NON_FUNCTIONAL_PREFIX: &str = "nc";
pub const SAMPLE_INFO_GLOB: &str = "*sample*info*";
pub const CLONOTYPES_GLOB: &str = "*clonotypes*.txt";
pub const VDJ_CLONOTYPES_GLOB: &str = "vdj.*clonotypes*.txt";
pub const SEQUENCE_FILE_GLOB: &str = "*.gz";

// Static parameters
pub const DEFAULT_MEMORY: &str = "6G";
pub const MIXCR_SPECIES: &str = "hsa";
pub const DONE_MARKER: &str = "...done";

lazy_static! {
    static ref MEMORY_LIMIT_RE: Regex = Regex::new(r"^(\d+)([GM])$").unwrap();
}


/// JVM heap limit shared by every Java tool of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLimit {
    value: String,
    bytes: u64,
}

impl MemoryLimit {
    /// Validates a limit such as `6G` or `512M`.
    ///
    /// # Arguments
    ///
    /// * `value` - Digits followed by `G` or `M`.
    ///
    /// # Returns
    /// MemoryLimit, or PipelineError::InvalidConfig for anything else.
    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        let invalid = || {
            PipelineError::InvalidConfig(format!(
                "Wrong value of memory usage limit: {} (default value is '{}')",
                value, DEFAULT_MEMORY
            ))
        };
        let caps = MEMORY_LIMIT_RE.captures(value).ok_or_else(invalid)?;
        let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
        let unit: u64 = if &caps[2] == "G" { 1 << 30 } else { 1 << 20 };
        let bytes = amount.checked_mul(unit).ok_or_else(invalid)?;

        Ok(MemoryLimit {
            value: value.to_string(),
            bytes,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn jvm_flag(&self) -> String {
        format!("-Xmx{}", self.value)
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        MemoryLimit {
            value: DEFAULT_MEMORY.to_string(),
            bytes: 6 << 30,
        }
    }
}


/// Everything a run is configured with; built once in main and shared read-only.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub instrument: Instrument,
    pub input_dir: PathBuf,
    pub out_dir: PathBuf,
    pub memory: MemoryLimit,
    pub tool_dir: ToolDirectory,
    pub java: PathBuf,
    pub rscript: PathBuf,
    pub log_file: Option<PathBuf>,
    pub force_overseq: u32,
    pub collision_filter: bool,
    pub plot_histogram: bool,
    pub command_timeout: Option<Duration>,
}

impl RunConfig {
    pub fn from_args(args: &Arguments, tool_dir: ToolDirectory) -> Result<Self, PipelineError> {
        let memory = MemoryLimit::parse(&args.memory)?;
        if args.input_dir.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("Input directory is required".to_string()));
        }
        let input_dir = PathBuf::from(&args.input_dir);
        let out_dir = resolve_out_dir(&input_dir, args.out_dir.as_deref());

        Ok(RunConfig {
            instrument: args.instrument,
            input_dir,
            out_dir,
            memory,
            tool_dir,
            java: PathBuf::from(&args.java),
            rscript: PathBuf::from(&args.rscript),
            log_file: args.log_file.as_ref().map(PathBuf::from),
            force_overseq: args.force_overseq,
            collision_filter: args.collision_filter,
            plot_histogram: args.plot_histogram,
            command_timeout: args.timeout.map(Duration::from_secs),
        })
    }
}


/// Picks the output directory for a run.
/// Unset  means `<input>/output`; `.`, `..` and `/` get an `output` child.
///
/// # Arguments
///
/// * `input_dir` - The run input directory.
/// * `out_dir` - Output directory as given on the command line.
///
/// # Returns
/// PathBuf of the output directory (not created).
pub fn resolve_out_dir(input_dir: &Path, out_dir: Option<&str>) -> PathBuf {
    match out_dir {
        None => input_dir.join(OUTPUT_DIRNAME),
        Some(dir) if matches!(dir.trim_end_matches('/'), "." | ".." | "") => {
            let base = if dir.starts_with('/') { "/" } else { dir.trim_end_matches('/') };
            PathBuf::from(base).join(OUTPUT_DIRNAME)
        }
        Some(dir) => PathBuf::from(dir),
    }
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Tool not found in {dir}: {name}")]
    ToolNotFound { name: String, dir: PathBuf },

    #[error("Can't install the tool {tool} from: {url}")]
    ToolInstall { tool: String, url: String },

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("{stage} stage failed: {message}")]
    StageExecution { stage: String, message: String },

    #[error("The pipeline has no stages")]
    EmptyPipeline,

    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    #[error("can't start: an instance is running or port {port} is taken ({reason})")]
    Exclusivity { port: u16, reason: String },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
