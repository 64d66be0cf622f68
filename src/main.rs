use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use tcrfactory_pipelines::cli::{parse, Arguments};
use tcrfactory_pipelines::config::defs::{PipelineError, RunConfig, DONE_MARKER};
use tcrfactory_pipelines::pipelines::tcr_repertoire::Pipeline;
use tcrfactory_pipelines::utils::file::{compress_dir, remove_sequence_files};
use tcrfactory_pipelines::utils::guard::SingleInstanceGuard;
use tcrfactory_pipelines::utils::run_log::RunLog;
use tcrfactory_pipelines::utils::system::check_memory_limit;
use tcrfactory_pipelines::utils::tools::ToolDirectory;


fn fail(e: impl std::fmt::Display) -> ! {
    error!("{}", e);
    process::exit(1);
}

/// Like `fail`, but the diagnostic is also written to the run log first.
fn fail_logged(run_log: &mut RunLog, e: PipelineError) -> ! {
    run_log.add(e.to_string());
    if let Err(write_err) = run_log.write() {
        error!("{}", write_err);
    }
    fail(e);
}

/// Optional clean-up of the output tree once the run is over.
fn post_process(args: &Arguments, out_dir: &Path) -> Result<(), PipelineError> {
    if args.remove_seq {
        let removed = remove_sequence_files(out_dir)?;
        info!("Removed {} sequence files from {}", removed, out_dir.display());
    }
    if let Some(archive) = &args.compressed {
        let archive = PathBuf::from(archive);
        compress_dir(out_dir, &archive)?;
        fs::remove_dir_all(out_dir)
            .map_err(|e| PipelineError::IOError(format!("Can't remove {}: {}", out_dir.display(), e)))?;
        info!("Output compressed to {}", archive.display());
    }
    Ok(())
}


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n TCRFactory\n-------------\n");

    let tool_dir = ToolDirectory::locate(args.bin_dir.as_deref().map(Path::new)).unwrap_or_else(|e| fail(e));
    let config = Arc::new(RunConfig::from_args(&args, tool_dir).unwrap_or_else(|e| fail(e)));

    let guard = SingleInstanceGuard::acquire(args.port).await.unwrap_or_else(|e| fail(e));

    config.tool_dir.create().unwrap_or_else(|e| fail(e));
    check_memory_limit(&config.memory);
    info!("Instrument: {:?}", config.instrument);
    info!("Input directory: {}", config.input_dir.display());
    info!("Output directory: {}", config.out_dir.display());

    let mut run_log = RunLog::new(config.log_file.clone());
    if let Some(file) = run_log.file() {
        info!("Run log: {}", file.display());
    }

    let mut pipeline = match Pipeline::standard(config.clone()) {
        Ok(pipeline) => pipeline,
        Err(e) => fail_logged(&mut run_log, e),
    };

    if args.initialized {
        debug!("Skipping the tool check");
    } else if let Err(e) = pipeline.check().await {
        fail_logged(&mut run_log, e);
    }

    // execute writes the log itself on failure
    if let Err(e) = pipeline.execute(&mut run_log).await {
        fail(e);
    }

    if let Some(guard) = guard {
        guard.release();
    }

    if let Err(e) = post_process(&args, &config.out_dir) {
        fail_logged(&mut run_log, e);
    }

    info!("Run finished in {:?}", run_start.elapsed());
    println!("{}", DONE_MARKER);
    Ok(())
}
