// src/utils/command/vdjtools.rs: VDJtools, clonotype conversion and filtering

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::defs::{
    PipelineError, RunConfig, ToolDescriptor, VdjtoolsSubcommand, CLONOTYPES_GLOB,
    NON_FUNCTIONAL_PREFIX, VDJTOOLS, VDJ_CLONOTYPES_GLOB, VDJ_DIRNAME, VDJ_PREFIX,
};
use crate::utils::command::{java_command, option_args, resolve_tool, CommandLine};
use crate::utils::file::{ensure_dir, glob_files};
use crate::utils::manifest;

#[derive(Debug, Clone)]
pub struct VdjtoolsConfig {
    pub subcommand: VdjtoolsSubcommand,
    pub option_fields: Vec<(String, Option<String>)>,
    pub input: PathBuf,
    pub output_prefix: PathBuf,
}

pub fn arg_generator(config: &RunConfig, jar: &Path, vdj_config: &VdjtoolsConfig) -> CommandLine {
    java_command(config, jar)
        .arg(vdj_config.subcommand.as_str())
        .args(option_args(&vdj_config.option_fields))
        .path_arg(&vdj_config.input)
        .path_arg(&vdj_config.output_prefix)
}


#[derive(Debug)]
pub struct Vdjtools {
    config: Arc<RunConfig>,
    vdj_dir: PathBuf,
}

impl Vdjtools {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Vdjtools {
            vdj_dir: config.out_dir.join(VDJ_DIRNAME),
            config,
        }
    }

    pub fn dependencies(&self) -> Vec<ToolDescriptor> {
        vec![VDJTOOLS]
    }

    /// Runs one command per file of `dir` matching `pattern`, concatenating outputs under `>file<` headers.
    async fn per_file<F>(&self, dir: &Path, pattern: &str, build: F) -> Result<String, PipelineError>
    where
        F: Fn(PathBuf) -> VdjtoolsConfig,
    {
        manifest::load(&self.config.input_dir)?;
        let jar = resolve_tool(&self.config.tool_dir, &VDJTOOLS)?;
        ensure_dir(&self.vdj_dir)?;

        let mut output = String::new();
        for file in glob_files(dir, pattern) {
            output.push_str(&format!(">{}<\n", file.display()));
            let cmd = arg_generator(&self.config, &jar, &build(file));
            output.push_str(&cmd.run(self.config.command_timeout).await?);
        }
        Ok(output)
    }

    /// Converts every MiXCR clonotype table of `dir` into VDJtools format.
    pub async fn convert(&self, dir: &Path) -> Result<String, PipelineError> {
        self.per_file(dir, CLONOTYPES_GLOB, |file| VdjtoolsConfig {
            subcommand: VdjtoolsSubcommand::Convert,
            option_fields: vec![("-S".to_string(), Some("mixcr".to_string()))],
            input: file,
            output_prefix: self.vdj_dir.join(VDJ_PREFIX),
        })
        .await
    }

    /// Drops non-functional clonotypes from the converted tables; `dir` defaults to the vdj directory.
    pub async fn filter(&self, dir: Option<&Path>) -> Result<String, PipelineError> {
        let dir = dir.unwrap_or(&self.vdj_dir);
        self.per_file(dir, VDJ_CLONOTYPES_GLOB, |file| VdjtoolsConfig {
            subcommand: VdjtoolsSubcommand::FilterNonFunctional,
            option_fields: Vec::new(),
            input: file,
            output_prefix: self.vdj_dir.join(NON_FUNCTIONAL_PREFIX),
        })
        .await
    }

    pub fn get_vdj_dir(&self) -> &Path {
        &self.vdj_dir
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Instrument;
    use crate::config::defs::MemoryLimit;
    use crate::utils::tools::ToolDirectory;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_arg_generator_convert() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig {
            instrument: Instrument::NextSeq,
            input_dir: tmp.path().to_path_buf(),
            out_dir: tmp.path().join("output"),
            memory: MemoryLimit::parse("512M").unwrap(),
            tool_dir: ToolDirectory::ensure(Some(&tmp.path().join("bin"))).unwrap(),
            java: PathBuf::from("/usr/bin/java"),
            rscript: PathBuf::from("Rscript"),
            log_file: None,
            force_overseq: 0,
            collision_filter: false,
            plot_histogram: false,
            command_timeout: None,
        };
        let cmd = arg_generator(
            &config,
            Path::new("/bin/vdjtools-1.2.1.jar"),
            &VdjtoolsConfig {
                subcommand: VdjtoolsSubcommand::Convert,
                option_fields: vec![("-S".to_string(), Some("mixcr".to_string()))],
                input: PathBuf::from("/o/clones/s1_clonotypes.txt"),
                output_prefix: PathBuf::from("/o/vdj/vdj"),
            },
        );
        assert_eq!(
            cmd.to_string(),
            "/usr/bin/java -Xmx512M -jar /bin/vdjtools-1.2.1.jar Convert -S mixcr /o/clones/s1_clonotypes.txt /o/vdj/vdj"
        );
    }

    #[test]
    fn test_clonotype_globs() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        for name in ["s1.clonotypes.TRA.txt", "s1.report.txt", "vdj.s1.clonotypes.TRA.txt", "s2_clonotypes.clns"] {
            fs::write(tmp.path().join(name), "")?;
        }
        let converted = glob_files(tmp.path(), CLONOTYPES_GLOB);
        assert_eq!(
            converted,
            vec![tmp.path().join("s1.clonotypes.TRA.txt"), tmp.path().join("vdj.s1.clonotypes.TRA.txt")]
        );
        let filtered = glob_files(tmp.path(), VDJ_CLONOTYPES_GLOB);
        assert_eq!(filtered, vec![tmp.path().join("vdj.s1.clonotypes.TRA.txt")]);
        Ok(())
    }
}
