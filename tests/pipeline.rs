// End-to-end runs with `echo` standing in for the JVM: every composed command line
// lands in the transcript instead of running a real tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use tcrfactory_pipelines::cli::Instrument;
use tcrfactory_pipelines::config::defs::{MemoryLimit, PipelineError, RunConfig, DONE_MARKER};
use tcrfactory_pipelines::pipelines::tcr_repertoire::{Pipeline, PipelineState, StageKind};
use tcrfactory_pipelines::utils::guard::SingleInstanceGuard;
use tcrfactory_pipelines::utils::manifest::ManifestError;
use tcrfactory_pipelines::utils::run_log::RunLog;
use tcrfactory_pipelines::utils::tools::ToolDirectory;

const MANIFEST: &str = "Sample\tChain\tBarcode\tR1\tR2\tBaseline\tSubject\tAntigen\tReads\n\
s1\tTRA\tACGTACGT\ts1_R1.fastq.gz\ts1_R2.fastq.gz\tyes\tP01\tCMV\t1000\n\
s2\tTRB\tTTGGCCAA\ts2_R1.fastq.gz\ts2_R2.fastq.gz\tno\tP02\tEBV\t2000\n";

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
}

impl Fixture {
    /// Input directory with the manifest and reads, plus empty jars for the three tools.
    fn new(migec_subdir: &str, skip_read: Option<&str>) -> Result<Self> {
        let tmp = TempDir::new()?;
        let root = tmp.path().to_path_buf();
        let input = root.join("run");
        fs::create_dir_all(&input)?;
        fs::write(input.join("SampleInfo.txt"), MANIFEST)?;
        for read in ["s1_R1.fastq.gz", "s1_R2.fastq.gz", "s2_R1.fastq.gz", "s2_R2.fastq.gz"] {
            if skip_read != Some(read) {
                fs::write(input.join(read), "")?;
            }
        }

        for (dir, jar) in [
            (migec_subdir, "migec-1.2.9.jar"),
            ("mixcr-3.0.13", "mixcr.jar"),
            ("vdjtools-1.2.1", "vdjtools-1.2.1.jar"),
        ] {
            let dir = root.join("bin").join(dir);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(jar), "")?;
        }
        Ok(Fixture { _tmp: tmp, root })
    }

    fn config(&self, instrument: Instrument) -> Result<Arc<RunConfig>> {
        Ok(Arc::new(RunConfig {
            instrument,
            input_dir: self.root.join("run"),
            out_dir: self.root.join("run/output"),
            memory: MemoryLimit::parse("6G")?,
            tool_dir: ToolDirectory::ensure(Some(&self.root.join("bin")))?,
            java: PathBuf::from("echo"),
            rscript: PathBuf::from("Rscript"),
            log_file: Some(self.root.join("pipeline.log")),
            force_overseq: 5,
            collision_filter: true,
            plot_histogram: false,
            command_timeout: None,
        }))
    }

    fn log_path(&self) -> PathBuf {
        self.root.join("pipeline.log")
    }
}

fn assert_dirs(out: &Path, present: &[&str], absent: &[&str]) {
    for dir in present {
        assert!(out.join(dir).is_dir(), "{} should exist", dir);
    }
    for dir in absent {
        assert!(!out.join(dir).exists(), "{} should not exist", dir);
    }
}

#[tokio::test]
async fn test_miseq_run() -> Result<()> {
    let fixture = Fixture::new("migec-1.2.9", None)?;
    let config = fixture.config(Instrument::MiSeq)?;
    let mut log = RunLog::new(config.log_file.clone());

    let mut pipeline = Pipeline::standard(config.clone())?;
    assert_eq!(pipeline.check().await?, 3);
    assert_eq!(pipeline.state(), PipelineState::Checked);

    let analyze = config.out_dir.join("analyze");
    fs::create_dir_all(&analyze)?;
    fs::write(analyze.join("s1.clonotypes.TRA.txt"), "")?;

    pipeline.execute(&mut log).await?;
    assert_eq!(pipeline.state(), PipelineState::Completed);

    assert_dirs(
        &config.out_dir,
        &["checkout", "histogram", "assemble", "analyze", "vdj"],
        &["alignment", "clones"],
    );
    let barcodes = fs::read_to_string(config.out_dir.join("barcodes.csv"))?;
    assert!(barcodes.starts_with("s1\tACGTACGT\t\t"));
    assert_eq!(barcodes.lines().count(), 2);

    let transcript = fs::read_to_string(fixture.log_path())?;
    assert!(transcript.contains("-Xmx6G -jar"));
    assert!(transcript.contains("CheckoutBatch -cute"));
    assert!(transcript.contains("AssembleBatch --force-overseq 5 --force-collision-filter -c"));
    assert!(transcript.contains(">>>s2<<<"));
    assert!(transcript.contains("analyze amplicon"));
    assert!(transcript.contains("--receptor-type TRB"));
    assert!(transcript.contains("Convert -S mixcr"));
    assert!(!transcript.contains("exportClones"));
    assert_eq!(transcript.lines().last(), Some(DONE_MARKER));
    Ok(())
}

#[tokio::test]
async fn test_nextseq_run() -> Result<()> {
    let fixture = Fixture::new("migec-1.2.9", None)?;
    let config = fixture.config(Instrument::NextSeq)?;
    let mut log = RunLog::new(config.log_file.clone());

    let mut pipeline = Pipeline::standard(config.clone())?;
    pipeline.set_overseq_threshold(0)?;
    pipeline.execute(&mut log).await?;

    assert_dirs(
        &config.out_dir,
        &["checkout", "histogram", "assemble", "alignment", "clones", "vdj"],
        &["analyze"],
    );
    let transcript = log.contents();
    assert!(transcript.contains("AssembleBatch -c"));
    assert!(!transcript.contains("--force-overseq"));
    assert!(transcript.contains("-OreadsLayout=Collinear"));
    assert!(transcript.contains("s2_alignments.vdjca"));
    assert!(transcript.contains("exportClones -t -o -c TRA"));
    assert!(!transcript.contains("analyze amplicon"));
    assert_eq!(log.last(), Some("...done\n"));
    Ok(())
}

#[tokio::test]
async fn test_correction_failure_stops_run() -> Result<()> {
    let fixture = Fixture::new("migec-error", None)?;
    let config = fixture.config(Instrument::MiSeq)?;
    let mut log = RunLog::new(config.log_file.clone());

    let mut pipeline = Pipeline::standard(config.clone())?;
    match pipeline.execute(&mut log).await {
        Err(PipelineError::StageExecution { stage, .. }) => assert_eq!(stage, "correction"),
        other => panic!("expected a correction failure, got {:?}", other),
    }
    assert_eq!(pipeline.state(), PipelineState::Failed(StageKind::Correction));

    assert_dirs(&config.out_dir, &["checkout"], &["histogram", "analyze", "vdj"]);
    let transcript = fs::read_to_string(fixture.log_path())?;
    let last = transcript.lines().last().unwrap_or_default();
    assert!(last.starts_with("correction stage failed"), "last entry: {}", last);
    assert!(!transcript.contains(DONE_MARKER));
    Ok(())
}

#[tokio::test]
async fn test_missing_read_file() -> Result<()> {
    let fixture = Fixture::new("migec-1.2.9", Some("s2_R2.fastq.gz"))?;
    let config = fixture.config(Instrument::MiSeq)?;

    match Pipeline::standard(config.clone()) {
        Err(PipelineError::Manifest(ManifestError::MissingReads { sample, .. })) => assert_eq!(sample, "s2"),
        other => panic!("expected MissingReads, got {:?}", other.map(|p| p.state())),
    }
    assert!(!config.out_dir.exists());
    assert!(!fixture.log_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_single_instance() -> Result<()> {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = probe.local_addr()?.port();
    drop(probe);

    let (first, second) = tokio::join!(SingleInstanceGuard::acquire(port), SingleInstanceGuard::acquire(port));
    let results = [first, second];
    let held = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(PipelineError::Exclusivity { .. })))
        .count();
    assert_eq!((held, refused), (1, 1));
    Ok(())
}
