// src/pipelines/tcr_repertoire.rs: correction -> assembly -> filtering, fail-fast

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};

use crate::cli::Instrument;
use crate::config::defs::{
    PipelineError, RunConfig, ToolDescriptor, ANALYZE_DIRNAME, ASSEMBLE_DIRNAME, CLONES_DIRNAME,
    DONE_MARKER, MIGEC_TAG, MIXCR_TAG, VDJTOOLS_TAG,
};
use crate::utils::command::contains_error_marker;
use crate::utils::command::migec::Migec;
use crate::utils::command::mixcr::Mixcr;
use crate::utils::command::vdjtools::Vdjtools;
use crate::utils::run_log::RunLog;
use crate::utils::tools::ToolInstaller;

/// Stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Correction,
    Assembly,
    Filtering,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Correction => "correction",
            StageKind::Assembly => "assembly",
            StageKind::Filtering => "filtering",
        };
        write!(f, "{}", name)
    }
}


/// Which MiXCR sub-commands make up the assembly stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyPlan {
    /// `analyze amplicon`, one command per sample.
    Analyze,
    /// `align`, then `assemble`, then `exportClones`.
    AlignAssembleExport,
}

impl From<Instrument> for AssemblyPlan {
    fn from(instrument: Instrument) -> Self {
        match instrument {
            Instrument::MiSeq => AssemblyPlan::Analyze,
            Instrument::NextSeq => AssemblyPlan::AlignAssembleExport,
        }
    }
}

impl AssemblyPlan {
    /// Subdirectory of the output tree holding the clonotype tables of this plan.
    pub fn output_dirname(&self) -> &'static str {
        match self {
            AssemblyPlan::Analyze => ANALYZE_DIRNAME,
            AssemblyPlan::AlignAssembleExport => CLONES_DIRNAME,
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Constructed,
    Checked,
    Running(StageKind),
    Completed,
    Failed(StageKind),
}


#[derive(Debug)]
pub enum Stage {
    Correction(Migec),
    Assembly(Mixcr, AssemblyPlan),
    Filtering(Vdjtools),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Correction(_) => StageKind::Correction,
            Stage::Assembly(..) => StageKind::Assembly,
            Stage::Filtering(_) => StageKind::Filtering,
        }
    }

    pub fn dependencies(&self) -> Vec<ToolDescriptor> {
        match self {
            Stage::Correction(migec) => migec.dependencies(),
            Stage::Assembly(mixcr, _) => mixcr.dependencies(),
            Stage::Filtering(vdjtools) => vdjtools.dependencies(),
        }
    }
}


/// Adds a step's output to the transcript and applies the error-marker scan.
fn record_step(log: &mut RunLog, step: &str, output: String) -> Result<(), PipelineError> {
    let failed = contains_error_marker(&output);
    log.add(output);
    if failed {
        return Err(PipelineError::ToolExecution {
            tool: step.to_string(),
            error: "error reported in the tool output".to_string(),
        });
    }
    Ok(())
}


/// One run over the stages registered with it.
/// Stages always execute correction first, then assembly, then filtering, whatever
/// the registration order. Each stage reads the directory the previous one produced.
#[derive(Debug)]
pub struct Pipeline {
    config: Arc<RunConfig>,
    stages: Vec<Stage>,
    overseq: u32,
    collisions: bool,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Pipeline {
            overseq: config.force_overseq,
            collisions: config.collision_filter,
            config,
            stages: Vec::new(),
            state: PipelineState::Constructed,
        }
    }

    /// The three stages for the configured instrument, thresholds taken from the run config.
    /// Fails before anything runs when the manifest or the declared read files are invalid.
    pub fn standard(config: Arc<RunConfig>) -> Result<Self, PipelineError> {
        let migec = Migec::new(config.clone())?;
        let plan = AssemblyPlan::from(config.instrument);

        let mut pipeline = Pipeline::new(config.clone());
        pipeline.register(Stage::Correction(migec))?;
        pipeline.register(Stage::Assembly(Mixcr::new(config.clone()), plan))?;
        pipeline.register(Stage::Filtering(Vdjtools::new(config)))?;
        Ok(pipeline)
    }

    pub fn register(&mut self, stage: Stage) -> Result<(), PipelineError> {
        self.ensure_not_started("register a stage")?;
        self.stages.push(stage);
        self.stages.sort_by_key(Stage::kind);
        Ok(())
    }

    pub fn set_overseq_threshold(&mut self, overseq: u32) -> Result<(), PipelineError> {
        self.ensure_not_started("set the overseq threshold")?;
        self.overseq = overseq;
        Ok(())
    }

    pub fn set_collision_filter(&mut self, collisions: bool) -> Result<(), PipelineError> {
        self.ensure_not_started("set the collision filter")?;
        self.collisions = collisions;
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn ensure_not_started(&self, action: &str) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Constructed | PipelineState::Checked => Ok(()),
            state => Err(PipelineError::InvalidState(format!("can't {} in state {:?}", action, state))),
        }
    }

    /// Verifies, installing where missing, every dependency of every registered stage.
    ///
    /// # Returns
    /// Number of tools verified or installed.
    pub async fn check(&mut self) -> Result<usize, PipelineError> {
        if self.state != PipelineState::Constructed {
            return Err(PipelineError::InvalidState(format!(
                "can't check dependencies in state {:?}",
                self.state
            )));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        let mut tools: Vec<ToolDescriptor> = Vec::new();
        for tool in self.stages.iter().flat_map(Stage::dependencies) {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }

        let installer = ToolInstaller::new(
            &self.config.tool_dir,
            self.config.rscript.clone(),
            self.config.command_timeout,
        );
        let count = installer.check_all(&tools).await?;
        info!("{} tools ready", count);
        self.state = PipelineState::Checked;
        Ok(count)
    }

    /// Runs every stage in order, appending all tool output to `log`.
    /// The first failing stage ends the run: its diagnostic becomes the last log entry,
    /// the log is written and later stages never start.
    ///
    /// # Arguments
    ///
    /// * `log` - Transcript of the run; written on success and on failure.
    ///
    /// # Returns
    /// Ok(()) with the log ending in the done marker, or PipelineError::StageExecution.
    pub async fn execute(&mut self, log: &mut RunLog) -> Result<(), PipelineError> {
        self.ensure_not_started("execute")?;
        if self.stages.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }

        let mut previous: Option<PathBuf> = None;
        for stage in &self.stages {
            let kind = stage.kind();
            self.state = PipelineState::Running(kind);
            info!("Running the {} stage", kind);

            match self.run_stage(stage, previous.as_deref(), log).await {
                Ok(out_dir) => previous = Some(out_dir),
                Err(e) => {
                    let failure = PipelineError::StageExecution {
                        stage: kind.to_string(),
                        message: e.to_string(),
                    };
                    error!("{}", failure);
                    log.add(failure.to_string());
                    if let Err(write_err) = log.write() {
                        warn!("{}", write_err);
                    }
                    self.state = PipelineState::Failed(kind);
                    return Err(failure);
                }
            }
        }

        self.state = PipelineState::Completed;
        log.add(DONE_MARKER);
        log.write()
    }

    /// Runs one stage and returns the directory it produced.
    async fn run_stage(
        &self,
        stage: &Stage,
        input: Option<&Path>,
        log: &mut RunLog,
    ) -> Result<PathBuf, PipelineError> {
        match stage {
            Stage::Correction(migec) => {
                record_step(log, &format!("{} CheckoutBatch", MIGEC_TAG), migec.checkout_batch().await?)?;
                record_step(log, &format!("{} Histogram", MIGEC_TAG), migec.histogram().await?)?;
                if self.config.plot_histogram {
                    record_step(log, "histogram.R", migec.draw().await?)?;
                }
                record_step(
                    log,
                    &format!("{} AssembleBatch", MIGEC_TAG),
                    migec.assemble_batch(self.overseq, self.collisions).await?,
                )?;
                Ok(migec.get_assemble_dir().to_path_buf())
            }
            Stage::Assembly(mixcr, plan) => {
                let default_input = self.config.out_dir.join(ASSEMBLE_DIRNAME);
                let input = input.unwrap_or(&default_input);
                match plan {
                    AssemblyPlan::Analyze => {
                        record_step(log, &format!("{} analyze", MIXCR_TAG), mixcr.analyze(input).await?)?;
                        Ok(mixcr.get_analyze_dir().to_path_buf())
                    }
                    AssemblyPlan::AlignAssembleExport => {
                        record_step(log, &format!("{} align", MIXCR_TAG), mixcr.align(input).await?)?;
                        record_step(
                            log,
                            &format!("{} assemble", MIXCR_TAG),
                            mixcr.assemble(mixcr.get_alignment_dir()).await?,
                        )?;
                        record_step(log, &format!("{} exportClones", MIXCR_TAG), mixcr.export().await?)?;
                        Ok(mixcr.get_clones_dir().to_path_buf())
                    }
                }
            }
            Stage::Filtering(vdjtools) => {
                let default_input = self
                    .config
                    .out_dir
                    .join(AssemblyPlan::from(self.config.instrument).output_dirname());
                let input = input.unwrap_or(&default_input);
                record_step(log, &format!("{} Convert", VDJTOOLS_TAG), vdjtools.convert(input).await?)?;
                record_step(
                    log,
                    &format!("{} FilterNonFunctional", VDJTOOLS_TAG),
                    vdjtools.filter(None).await?,
                )?;
                Ok(vdjtools.get_vdj_dir().to_path_buf())
            }
        }
    }
}
