// src/utils/command/migec.rs: MIGEC, the barcode checkout and UMI error-correction stage

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::config::defs::{
    MigecSubcommand, PipelineError, RunConfig, ToolDescriptor, ASSEMBLE_DIRNAME, BARCODES_FILE,
    CHECKOUT_DIRNAME, GGPLOT2, HISTOGRAM_DIRNAME, MIGEC, MIGEC_HISTOGRAM, MIGEC_TAG, RESHAPE,
};
use crate::utils::command::{java_command, option_args, resolve_tool, CommandLine};
use crate::utils::file::ensure_dir;
use crate::utils::manifest::{self, ManifestError};

#[derive(Debug, Clone)]
pub struct MigecConfig {
    pub subcommand: MigecSubcommand,
    pub option_fields: Vec<(String, Option<String>)>,
    pub positional: Vec<PathBuf>,
}

pub fn arg_generator(config: &RunConfig, jar: &Path, migec_config: &MigecConfig) -> CommandLine {
    let mut cmd = java_command(config, jar)
        .arg(migec_config.subcommand.as_str())
        .args(option_args(&migec_config.option_fields));
    for path in &migec_config.positional {
        cmd = cmd.path_arg(path);
    }
    cmd
}


/// Wraps the MIGEC sub-commands for one run.
/// Building one validates the manifest against the input directory and writes `barcodes.csv`.
#[derive(Debug)]
pub struct Migec {
    config: Arc<RunConfig>,
    checkout_dir: PathBuf,
    histogram_dir: PathBuf,
    assemble_dir: PathBuf,
    barcodes_file: Option<PathBuf>,
}

impl Migec {
    pub fn new(config: Arc<RunConfig>) -> Result<Self, PipelineError> {
        let barcodes_file = inspector(&config.input_dir, &config.out_dir)?;
        Ok(Migec {
            checkout_dir: config.out_dir.join(CHECKOUT_DIRNAME),
            histogram_dir: config.out_dir.join(HISTOGRAM_DIRNAME),
            assemble_dir: config.out_dir.join(ASSEMBLE_DIRNAME),
            barcodes_file,
            config,
        })
    }

    pub fn dependencies(&self) -> Vec<ToolDescriptor> {
        if self.config.plot_histogram {
            vec![MIGEC, MIGEC_HISTOGRAM, GGPLOT2, RESHAPE]
        } else {
            vec![MIGEC]
        }
    }

    fn command(&self, migec_config: &MigecConfig) -> Result<CommandLine, PipelineError> {
        manifest::load(&self.config.input_dir)?;
        let jar = resolve_tool(&self.config.tool_dir, &MIGEC)?;
        Ok(arg_generator(&self.config, &jar, migec_config))
    }

    pub async fn checkout_batch(&self) -> Result<String, PipelineError> {
        let barcodes_file = self.barcodes_file.as_ref().ok_or_else(|| PipelineError::ToolExecution {
            tool: MIGEC_TAG.to_string(),
            error: "CheckoutBatch: no barcodes file".to_string(),
        })?;
        let cmd = self.command(&MigecConfig {
            subcommand: MigecSubcommand::CheckoutBatch,
            option_fields: vec![("-cute".to_string(), None)],
            positional: vec![barcodes_file.clone(), self.checkout_dir.clone()],
        })?;
        ensure_dir(&self.checkout_dir)?;
        cmd.run(self.config.command_timeout).await
    }

    pub async fn histogram(&self) -> Result<String, PipelineError> {
        let cmd = self.command(&MigecConfig {
            subcommand: MigecSubcommand::Histogram,
            option_fields: Vec::new(),
            positional: vec![self.checkout_dir.clone(), self.histogram_dir.clone()],
        })?;
        ensure_dir(&self.histogram_dir)?;
        cmd.run(self.config.command_timeout).await
    }

    /// AssembleBatch, with the collision filter only honoured when an overseq threshold is forced.
    pub async fn assemble_batch(&self, overseq: u32, collisions: bool) -> Result<String, PipelineError> {
        let cmd = self.command(&assemble_batch_config(
            overseq,
            collisions,
            &self.checkout_dir,
            &self.histogram_dir,
            &self.assemble_dir,
        ))?;
        ensure_dir(&self.assemble_dir)?;
        cmd.run(self.config.command_timeout).await
    }

    /// Plots the overseq histograms with `histogram.R`, run from inside the histogram directory.
    pub async fn draw(&self) -> Result<String, PipelineError> {
        manifest::load(&self.config.input_dir)?;
        let script = resolve_tool(&self.config.tool_dir, &MIGEC_HISTOGRAM)?;
        ensure_dir(&self.histogram_dir)?;
        CommandLine::new(&self.config.rscript)
            .path_arg(&script)
            .current_dir(&self.histogram_dir)
            .run(self.config.command_timeout)
            .await
    }

    pub fn get_checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    pub fn get_assemble_dir(&self) -> &Path {
        &self.assemble_dir
    }

    pub fn get_barcodes_file(&self) -> Option<&Path> {
        self.barcodes_file.as_deref()
    }
}

fn assemble_batch_config(
    overseq: u32,
    collisions: bool,
    checkout_dir: &Path,
    histogram_dir: &Path,
    assemble_dir: &Path,
) -> MigecConfig {
    let mut option_fields = Vec::new();
    if overseq > 0 {
        option_fields.push(("--force-overseq".to_string(), Some(overseq.to_string())));
        if collisions {
            option_fields.push(("--force-collision-filter".to_string(), None));
        }
    }
    option_fields.push(("-c".to_string(), None));

    MigecConfig {
        subcommand: MigecSubcommand::AssembleBatch,
        option_fields,
        positional: vec![
            checkout_dir.to_path_buf(),
            histogram_dir.to_path_buf(),
            assemble_dir.to_path_buf(),
        ],
    }
}


/// Cross-checks every manifest record and materializes the MIGEC barcode table.
/// Nothing is written unless every record has a barcode and both read files exist.
///
/// # Arguments
///
/// * `input_dir` - Directory with the manifest and the raw reads.
/// * `out_dir` - Run output directory; receives `barcodes.csv`.
///
/// # Returns
/// Path of the barcode table, or None if it could not be written.
fn inspector(input_dir: &Path, out_dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let (info_file, records) = manifest::load(input_dir)?;

    let mut barcodes = String::new();
    for record in &records {
        let (r1, r2) = record.read_paths(input_dir);
        if record.barcode.is_empty() {
            return Err(ManifestError::MissingBarcode {
                file: info_file,
                sample: record.sample_name.clone(),
            }
            .into());
        }
        for read in [&r1, &r2] {
            if !read.is_file() {
                return Err(ManifestError::MissingReads {
                    file: info_file,
                    sample: record.sample_name.clone(),
                    path: read.clone(),
                }
                .into());
            }
        }
        barcodes.push_str(&format!(
            "{}\t{}\t\t{}\t{}\n",
            record.sample_name,
            record.barcode,
            r1.display(),
            r2.display()
        ));
    }

    ensure_dir(out_dir)?;
    let barcodes_file = out_dir.join(BARCODES_FILE);
    match fs::write(&barcodes_file, barcodes) {
        Ok(()) => Ok(Some(barcodes_file)),
        Err(e) => {
            warn!("Can't create barcode file {}: {}", barcodes_file.display(), e);
            Ok(None)
        }
    }
}
