// src/utils/tools.rs: managed tool directory, tool lookup and installation

use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use glob::{glob, Pattern};
use lazy_static::lazy_static;
use log::{debug, error, info};
use regex::Regex;

use crate::config::defs::{PipelineError, ToolDescriptor, ToolKind, RSCRIPT_TAG, TOOL_DIRNAME};
use crate::utils::command::{contains_error_marker, CommandLine};

lazy_static! {
    static ref UNSAFE_NAME_CHARS_RE: Regex = Regex::new(r"[^A-Za-z0-9._-]").unwrap();
    static ref FINAL_EXT_RE: Regex = Regex::new(r"\.[^.]*$").unwrap();
}


/// Locates tool artifacts. Stage tools only care that a name pattern resolves to a path.
pub trait ToolResolver {
    fn root(&self) -> &Path;

    /// First path under `root()` matching the glob-style `name_pattern`, at any depth.
    fn find(&self, name_pattern: &str) -> Option<PathBuf>;
}


/// The process-wide root under which every tool is searched for and installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDirectory {
    root: PathBuf,
}

impl ToolDirectory {
    /// Resolves the tool directory without touching the filesystem.
    /// Defaults to `bin/` next to the running executable.
    ///
    /// # Arguments
    ///
    /// * `explicit` - Optional override from the command line.
    ///
    /// # Returns
    /// ToolDirectory with an absolute root, possibly not created yet.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, PipelineError> {
        let root = match explicit {
            Some(dir) => dir.to_path_buf(),
            None => default_tool_dir()?,
        };
        let root = std::path::absolute(&root)
            .map_err(|e| PipelineError::IOError(format!("Can't resolve tool directory {}: {}", root.display(), e)))?;
        Ok(ToolDirectory { root })
    }

    /// Creates the root if it is absent. Calling it again is a no-op.
    pub fn create(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            PipelineError::IOError(format!("Can't create tool directory {}: {}", self.root.display(), e))
        })?;
        debug!("Tool directory: {}", self.root.display());
        Ok(())
    }

    /// `locate` and `create` in one step, with the root canonicalized.
    pub fn ensure(explicit: Option<&Path>) -> Result<Self, PipelineError> {
        let located = Self::locate(explicit)?;
        located.create()?;
        let root = located
            .root
            .canonicalize()
            .map_err(|e| PipelineError::IOError(format!("Can't resolve tool directory {}: {}", located.root.display(), e)))?;
        Ok(ToolDirectory { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl ToolResolver for ToolDirectory {
    fn root(&self) -> &Path {
        &self.root
    }

    fn find(&self, name_pattern: &str) -> Option<PathBuf> {
        let name_pattern = name_pattern.trim_start_matches('/');
        if name_pattern.is_empty()
            || Path::new(name_pattern).components().any(|c| matches!(c, Component::ParentDir))
        {
            return None;
        }

        let full_pattern = format!(
            "{}/**/{}",
            Pattern::escape(&self.root.to_string_lossy()),
            name_pattern
        );
        glob(&full_pattern)
            .ok()?
            .filter_map(Result::ok)
            .find(|path| path.starts_with(&self.root))
    }
}

fn default_tool_dir() -> Result<PathBuf, PipelineError> {
    let exe = std::env::current_exe()
        .map_err(|e| PipelineError::IOError(format!("Can't locate the running program: {}", e)))?;
    let parent = exe
        .parent()
        .ok_or_else(|| PipelineError::IOError(format!("No parent directory for {}", exe.display())))?;
    Ok(parent.join(TOOL_DIRNAME))
}


/// Filesystem-safe install subdirectory for a tool name pattern.
/// `vdjtools*.jar` installs into `vdjtools`.
pub fn install_dir_name(name_pattern: &str) -> String {
    let safe = UNSAFE_NAME_CHARS_RE.replace_all(name_pattern, "");
    FINAL_EXT_RE.replace(&safe, "").into_owned()
}

fn is_http_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}


/// Reads a distribution from a URL, a `file://` URL or a plain path.
///
/// # Arguments
///
/// * `source` - Location of the archive or file.
///
/// # Returns
/// Raw bytes of the source.
pub async fn fetch_source(source: &str) -> Result<Vec<u8>, PipelineError> {
    if is_http_source(source) {
        let response = reqwest::get(source)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::IOError(format!("Could not fetch '{}': {}", source, e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::IOError(format!("Could not read '{}': {}", source, e)))?;
        return Ok(bytes.to_vec());
    }

    let path = source.strip_prefix("file://").unwrap_or(source);
    tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::IOError(format!("Could not open source file '{}': {}", path, e)))
}

fn unpack_archive(bytes: &[u8], dest: &Path) -> Result<(), PipelineError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::IOError(format!("Not a zip archive: {}", e)))?;
    fs::create_dir_all(dest)
        .map_err(|e| PipelineError::IOError(format!("Can't create {}: {}", dest.display(), e)))?;
    archive
        .extract(dest)
        .map_err(|e| PipelineError::IOError(format!("Can't unpack into {}: {}", dest.display(), e)))
}


/// Verifies tools and installs the missing ones into the managed directory.
pub struct ToolInstaller<'a, R: ToolResolver> {
    resolver: &'a R,
    rscript: PathBuf,
    timeout: Option<Duration>,
}

impl<'a, R: ToolResolver> ToolInstaller<'a, R> {
    pub fn new(resolver: &'a R, rscript: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        ToolInstaller {
            resolver,
            rscript: rscript.into(),
            timeout,
        }
    }

    /// Resolves a tool, installing it first if it is absent.
    /// R packages resolve to the Rscript launcher that can load them.
    pub async fn ensure(&self, tool: &ToolDescriptor) -> Result<PathBuf, PipelineError> {
        match tool.kind {
            ToolKind::RPackage => self.ensure_r_package(tool).await,
            ToolKind::JavaArchive | ToolKind::UtilFile => self.ensure_file(tool).await,
        }
    }

    /// Applies `ensure` to every tool, stopping at the first failure.
    ///
    /// # Returns
    /// Number of tools verified or installed.
    pub async fn check_all(&self, tools: &[ToolDescriptor]) -> Result<usize, PipelineError> {
        let mut count = 0;
        for tool in tools {
            let path = self.ensure(tool).await?;
            debug!("{} -> {}", tool.name, path.display());
            count += 1;
        }
        Ok(count)
    }

    async fn ensure_file(&self, tool: &ToolDescriptor) -> Result<PathBuf, PipelineError> {
        if let Some(path) = self.resolver.find(tool.name) {
            return Ok(path);
        }
        let install_failed = || PipelineError::ToolInstall {
            tool: tool.name.to_string(),
            url: tool.url.to_string(),
        };
        if tool.url.is_empty() {
            return Err(install_failed());
        }

        info!("Installing: {}", tool.url);
        let bytes = fetch_source(tool.url).await.map_err(|e| {
            error!("{}", e);
            install_failed()
        })?;

        let written = match tool.kind {
            ToolKind::JavaArchive => {
                let dest = self.resolver.root().join(install_dir_name(tool.name));
                tokio::task::spawn_blocking(move || unpack_archive(&bytes, &dest))
                    .await
                    .map_err(|e| PipelineError::Other(e.into()))?
            }
            _ => {
                let dest = self.resolver.root().join(tool.name);
                tokio::fs::write(&dest, bytes)
                    .await
                    .map_err(|e| PipelineError::IOError(format!("Can't write {}: {}", dest.display(), e)))
            }
        };
        if let Err(e) = written {
            error!("{}", e);
            return Err(install_failed());
        }

        match self.resolver.find(tool.name) {
            Some(path) => {
                info!("Installing: {} ...OK", tool.name);
                Ok(path)
            }
            None => Err(install_failed()),
        }
    }

    async fn ensure_r_package(&self, tool: &ToolDescriptor) -> Result<PathBuf, PipelineError> {
        let banner = CommandLine::new(&self.rscript).run(self.timeout).await;
        match banner {
            Ok(output) if output.contains("Usage:") => {}
            _ => {
                return Err(PipelineError::ToolExecution {
                    tool: RSCRIPT_TAG.to_string(),
                    error: format!("{} doesn't seem to be installed", self.rscript.display()),
                });
            }
        }

        if self.r_package_loads(tool).await? {
            return Ok(self.rscript.clone());
        }

        info!("Installing: {} from {}", tool.name, tool.url);
        let output = CommandLine::new(&self.rscript)
            .arg("-e")
            .arg(format!("install.packages(\"{}\", repos=\"{}\")", tool.name, tool.url))
            .run(self.timeout)
            .await?;
        debug!("{}", output);

        if self.r_package_loads(tool).await? {
            info!("Installing: {} ...OK", tool.name);
            Ok(self.rscript.clone())
        } else {
            Err(PipelineError::ToolInstall {
                tool: tool.name.to_string(),
                url: tool.url.to_string(),
            })
        }
    }

    async fn r_package_loads(&self, tool: &ToolDescriptor) -> Result<bool, PipelineError> {
        let output = CommandLine::new(&self.rscript)
            .arg("-e")
            .arg(format!("library({})", tool.name))
            .run(self.timeout)
            .await?;
        Ok(!contains_error_marker(&output))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn leak(s: String) -> &'static str {
        Box::leak(s.into_boxed_str())
    }

    fn write_zip(path: &Path, entries: &[&str]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for entry in entries {
            writer.start_file(*entry, options).unwrap();
            writer.write_all(b"PK-jar-content").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_install_dir_name() {
        assert_eq!(install_dir_name("vdjtools*.jar"), "vdjtools");
        assert_eq!(install_dir_name("mixcr*.jar"), "mixcr");
        assert_eq!(install_dir_name("histogram.R"), "histogram");
        assert_eq!(install_dir_name("my tool?.v2.tar"), "mytool.v2");
    }

    #[test]
    fn test_ensure_directory_idempotent() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let requested = tmp.path().join("tools");
        let first = ToolDirectory::ensure(Some(&requested))?;
        let second = ToolDirectory::ensure(Some(&requested))?;
        assert!(requested.is_dir());
        assert_eq!(first, second);
        assert!(first.path().is_absolute());
        Ok(())
    }

    #[test]
    fn test_locate_creates_nothing() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let requested = tmp.path().join("later").join("bin");
        let tools = ToolDirectory::locate(Some(&requested))?;
        assert!(tools.path().is_absolute());
        assert!(!requested.exists());

        tools.create()?;
        tools.create()?;
        assert!(requested.is_dir());
        assert!(tools.find("mixcr*.jar").is_none());
        Ok(())
    }

    #[test]
    fn test_find_recursive() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let tools = ToolDirectory::ensure(Some(tmp.path()))?;
        assert!(tools.find("mixcr*.jar").is_none());

        let nested = tools.path().join("mixcr").join("mixcr-3.0.13");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("mixcr.jar"), "")?;
        fs::write(tools.path().join("histogram.R"), "")?;

        assert_eq!(tools.find("mixcr*.jar"), Some(nested.join("mixcr.jar")));
        assert_eq!(tools.find("/histogram.R"), Some(tools.path().join("histogram.R")));
        assert!(tools.find("../*.jar").is_none());
        assert!(tools.find("").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_archive_installs_once() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let tools = ToolDirectory::ensure(Some(&tmp.path().join("bin")))?;
        let archive = tmp.path().join("migec-1.2.9.zip");
        write_zip(&archive, &["migec-1.2.9/migec-1.2.9.jar", "migec-1.2.9/README.md"]);

        let tool = ToolDescriptor {
            name: "migec*.jar",
            url: leak(format!("file://{}", archive.display())),
            kind: ToolKind::JavaArchive,
        };
        let installer = ToolInstaller::new(&tools, "Rscript", None);

        let first = installer.ensure(&tool).await?;
        assert_eq!(first, tools.path().join("migec/migec-1.2.9/migec-1.2.9.jar"));

        // the source is gone, so a second install attempt would fail
        fs::remove_file(&archive)?;
        let second = installer.ensure(&tool).await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_util_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let tools = ToolDirectory::ensure(Some(&tmp.path().join("bin")))?;
        let source = tmp.path().join("histogram_source.R");
        fs::write(&source, "library(ggplot2)\n")?;

        let tool = ToolDescriptor {
            name: "histogram.R",
            url: leak(source.display().to_string()),
            kind: ToolKind::UtilFile,
        };
        let installer = ToolInstaller::new(&tools, "Rscript", None);
        let path = installer.ensure(&tool).await?;
        assert_eq!(path, tools.path().join("histogram.R"));
        assert_eq!(fs::read_to_string(path)?, "library(ggplot2)\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_failures() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let tools = ToolDirectory::ensure(Some(&tmp.path().join("bin")))?;
        let installer = ToolInstaller::new(&tools, "Rscript", None);

        let archive = tmp.path().join("other.zip");
        write_zip(&archive, &["other/other.jar"]);
        let wrong_content = ToolDescriptor {
            name: "vdjtools*.jar",
            url: leak(archive.display().to_string()),
            kind: ToolKind::JavaArchive,
        };
        assert!(matches!(
            installer.ensure(&wrong_content).await,
            Err(PipelineError::ToolInstall { .. })
        ));

        let missing_source = ToolDescriptor {
            name: "mixcr*.jar",
            url: leak(tmp.path().join("absent.zip").display().to_string()),
            kind: ToolKind::JavaArchive,
        };
        assert!(matches!(
            installer.ensure(&missing_source).await,
            Err(PipelineError::ToolInstall { .. })
        ));

        let no_url = ToolDescriptor { name: "tool*.jar", url: "", kind: ToolKind::JavaArchive };
        assert!(installer.check_all(&[no_url]).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_check_all_counts() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let tools = ToolDirectory::ensure(Some(tmp.path()))?;
        fs::create_dir_all(tools.path().join("migec"))?;
        fs::write(tools.path().join("migec/migec-1.2.9.jar"), "")?;
        fs::write(tools.path().join("histogram.R"), "")?;

        let installer = ToolInstaller::new(&tools, "Rscript", None);
        let count = installer
            .check_all(&[crate::config::defs::MIGEC, crate::config::defs::MIGEC_HISTOGRAM])
            .await?;
        assert_eq!(count, 2);
        Ok(())
    }
}
