// src/lib.rs
pub mod cli;
pub mod config;
pub mod pipelines;
pub mod utils;

pub use cli::{Arguments, Instrument};
pub use config::defs::{PipelineError, RunConfig};
pub use pipelines::tcr_repertoire::{AssemblyPlan, Pipeline, PipelineState, Stage, StageKind};
