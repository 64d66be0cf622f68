// src/utils/command/mixcr.rs: MiXCR, alignment and clonotype assembly

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;

use crate::config::defs::{
    MixcrSubcommand, PipelineError, RunConfig, ToolDescriptor, ALIGNMENT_DIRNAME, ALIGNMENT_REPORT,
    ANALYZE_DIRNAME, ASSEMBLE_REPORT, CLONES_DIRNAME, MIXCR, MIXCR_SPECIES,
};
use crate::utils::command::{java_command, option_args, resolve_tool, CommandLine};
use crate::utils::file::{ensure_dir, expand_or_literal};
use crate::utils::manifest::{self, SampleRecord};

#[derive(Debug, Clone)]
pub struct MixcrConfig {
    pub subcommand: MixcrSubcommand,
    pub option_fields: Vec<(String, Option<String>)>,
    pub positional: Vec<String>,
}

pub fn arg_generator(config: &RunConfig, jar: &Path, mixcr_config: &MixcrConfig) -> CommandLine {
    let mut cmd = java_command(config, jar).arg(mixcr_config.subcommand.as_str());
    if mixcr_config.subcommand == MixcrSubcommand::Analyze {
        cmd = cmd.arg("amplicon");
    }
    cmd.args(option_args(&mixcr_config.option_fields))
        .args(mixcr_config.positional.iter().cloned())
}

fn opt(flag: &str, value: Option<&str>) -> (String, Option<String>) {
    (flag.to_string(), value.map(str::to_string))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `<dir>/<sample>_R1.*.fastq.gz` and the R2 counterpart, expanded against the filesystem.
fn read_pair(in_dir: &Path, sample: &str) -> Vec<String> {
    let sample = Pattern::escape(sample);
    let mut reads = expand_or_literal(in_dir, &format!("{}_R1.*.fastq.gz", sample));
    reads.extend(expand_or_literal(in_dir, &format!("{}_R2.*.fastq.gz", sample)));
    reads
}


pub fn analyze_config(record: &SampleRecord, in_dir: &Path, analyze_dir: &Path) -> MixcrConfig {
    let mut positional = read_pair(in_dir, &record.sample_name);
    positional.push(path_string(&analyze_dir.join(&record.sample_name)));
    MixcrConfig {
        subcommand: MixcrSubcommand::Analyze,
        option_fields: vec![
            opt("-s", Some(MIXCR_SPECIES)),
            opt("--starting-material", Some("rna")),
            opt("--5-end", Some("no-v-primers")),
            opt("--3-end", Some("c-primers")),
            opt("--adapters", Some("no-adapters")),
            opt("--receptor-type", Some(record.chain.as_str())),
        ],
        positional,
    }
}

pub fn align_config(record: &SampleRecord, in_dir: &Path, alignment_dir: &Path) -> MixcrConfig {
    let mut positional = read_pair(in_dir, &record.sample_name);
    positional.push(path_string(
        &alignment_dir.join(format!("{}_alignments.vdjca", record.sample_name)),
    ));
    MixcrConfig {
        subcommand: MixcrSubcommand::Align,
        option_fields: vec![
            // relative orientation of paired reads
            opt("-OreadsLayout=Collinear", None),
            opt("-s", Some(MIXCR_SPECIES)),
            opt("-r", Some(path_string(&alignment_dir.join(ALIGNMENT_REPORT)).as_str())),
        ],
        positional,
    }
}

pub fn assemble_config(record: &SampleRecord, in_dir: &Path, clones_dir: &Path) -> MixcrConfig {
    MixcrConfig {
        subcommand: MixcrSubcommand::Assemble,
        option_fields: vec![opt("-r", Some(path_string(&clones_dir.join(ASSEMBLE_REPORT)).as_str()))],
        positional: vec![
            path_string(&in_dir.join(format!("{}_alignments.vdjca", record.sample_name))),
            path_string(&clones_dir.join(format!("{}_clonotypes.clns", record.sample_name))),
        ],
    }
}

pub fn export_config(record: &SampleRecord, clones_dir: &Path) -> MixcrConfig {
    MixcrConfig {
        subcommand: MixcrSubcommand::ExportClones,
        option_fields: vec![opt("-t", None), opt("-o", None), opt("-c", Some(record.chain.as_str()))],
        positional: vec![
            path_string(&clones_dir.join(format!("{}_clonotypes.clns", record.sample_name))),
            path_string(&clones_dir.join(format!("{}_clonotypes.txt", record.sample_name))),
        ],
    }
}


/// Wraps the MiXCR sub-commands; every call issues one command per manifest record.
#[derive(Debug)]
pub struct Mixcr {
    config: Arc<RunConfig>,
    analyze_dir: PathBuf,
    alignment_dir: PathBuf,
    clones_dir: PathBuf,
}

impl Mixcr {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Mixcr {
            analyze_dir: config.out_dir.join(ANALYZE_DIRNAME),
            alignment_dir: config.out_dir.join(ALIGNMENT_DIRNAME),
            clones_dir: config.out_dir.join(CLONES_DIRNAME),
            config,
        }
    }

    pub fn dependencies(&self) -> Vec<ToolDescriptor> {
        vec![MIXCR]
    }

    /// Runs `build` for every manifest record, concatenating outputs under `>>>sample<<<` headers.
    async fn per_sample<F>(&self, out_dir: &Path, build: F) -> Result<String, PipelineError>
    where
        F: Fn(&SampleRecord) -> MixcrConfig,
    {
        let (_, records) = manifest::load(&self.config.input_dir)?;
        let jar = resolve_tool(&self.config.tool_dir, &MIXCR)?;
        ensure_dir(out_dir)?;

        let mut output = String::new();
        for record in &records {
            let cmd = arg_generator(&self.config, &jar, &build(record));
            let text = cmd.run(self.config.command_timeout).await?;
            output.push_str(&format!(">>>{}<<<\n{}", record.sample_name, text));
        }
        Ok(output)
    }

    /// One-shot `analyze amplicon` on the reads found in `in_dir`.
    pub async fn analyze(&self, in_dir: &Path) -> Result<String, PipelineError> {
        self.per_sample(&self.analyze_dir, |record| analyze_config(record, in_dir, &self.analyze_dir))
            .await
    }

    pub async fn align(&self, in_dir: &Path) -> Result<String, PipelineError> {
        self.per_sample(&self.alignment_dir, |record| align_config(record, in_dir, &self.alignment_dir))
            .await
    }

    /// Assembles the `.vdjca` alignments found in `in_dir` into `.clns` clone sets.
    pub async fn assemble(&self, in_dir: &Path) -> Result<String, PipelineError> {
        self.per_sample(&self.clones_dir, |record| assemble_config(record, in_dir, &self.clones_dir))
            .await
    }

    pub async fn export(&self) -> Result<String, PipelineError> {
        self.per_sample(&self.clones_dir, |record| export_config(record, &self.clones_dir))
            .await
    }

    pub fn get_analyze_dir(&self) -> &Path {
        &self.analyze_dir
    }

    pub fn get_alignment_dir(&self) -> &Path {
        &self.alignment_dir
    }

    pub fn get_clones_dir(&self) -> &Path {
        &self.clones_dir
    }
}
