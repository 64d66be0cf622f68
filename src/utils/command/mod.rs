/// Functions and structs for composing and running external command lines

pub mod migec;
pub mod mixcr;
pub mod vdjtools;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use tokio::process::Command;

use crate::config::defs::{PipelineError, RunConfig, ToolDescriptor};
use crate::utils::tools::ToolResolver;

lazy_static! {
    static ref ERROR_MARKER_RE: Regex = Regex::new(r"(?i)error").unwrap();
}


/// Output-text error detection.
/// The wrapped tools don't report failures through exit codes consistently, so any
/// case-insensitive "error" in captured output counts as a failure. This is
/// imprecise: a sample or path named "error" trips it too.
pub fn contains_error_marker(output: &str) -> bool {
    ERROR_MARKER_RE.is_match(output)
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandLine {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Runs the command to completion and captures its output.
    /// The exit status is not used to decide success; see `contains_error_marker`.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Optional wall-clock limit; the child is killed when it expires.
    ///
    /// # Returns
    /// stdout followed by stderr, as text.
    pub async fn run(&self, timeout: Option<Duration>) -> Result<String, PipelineError> {
        debug!("Running: {}", self);
        let tool = self.program.display().to_string();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| PipelineError::ToolExecution {
                    tool: tool.clone(),
                    error: format!("timed out after {} s", limit.as_secs()),
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool.clone(),
            error: format!("Failed to spawn: {}", e),
        })?;

        if !output.status.success() {
            warn!("{} exited with {}", tool, output.status);
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}


/// `java -Xmx<limit> -jar <jar>`, the prefix of every Java tool invocation.
pub fn java_command(config: &RunConfig, jar: &Path) -> CommandLine {
    CommandLine::new(&config.java)
        .arg(config.memory.jvm_flag())
        .arg("-jar")
        .path_arg(jar)
}

/// Resolves a tool artifact in the managed tool directory.
pub fn resolve_tool(resolver: &impl ToolResolver, tool: &ToolDescriptor) -> Result<PathBuf, PipelineError> {
    resolver.find(tool.name).ok_or_else(|| PipelineError::ToolNotFound {
        name: tool.name.to_string(),
        dir: resolver.root().to_path_buf(),
    })
}

/// Flattens `(flag, value)` option pairs into arguments, keeping their order.
pub fn option_args(option_fields: &[(String, Option<String>)]) -> Vec<String> {
    let mut args_vec = Vec::new();
    for (flag, value) in option_fields {
        args_vec.push(flag.clone());
        if let Some(value) = value {
            args_vec.push(value.clone());
        }
    }
    args_vec
}
