//! Source acquisition.
//!
//! Ensures a complete source tree for a [`TargetSpec`] exists at a
//! deterministic path (`<work>/<target>/src`). Acquisition is idempotent: a
//! stamp file next to the tree records which locator and version produced it,
//! and a matching stamp short-circuits the fetch entirely.
//!
//! There is no retry policy. Network failures, corrupt archives and
//! unexpected archive layouts are all fatal.

use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::common::{ensure_dir, hash_file, remove_if_exists};
use crate::exec::{CommandRunner, CommandSpec, run_checked};
use crate::types::{BuildError, SourceLocator, Stage, TargetSpec, render_version};

const STAMP_FILE: &str = ".source-stamp";

/// Downloads a URL to a local file.
pub trait SourceFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), BuildError>;
}

/// [`SourceFetcher`] backed by a blocking `reqwest` client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, BuildError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("xcforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BuildError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), BuildError> {
        log::info!("Downloading {}", url);
        let fail = |message: String| Stage::Acquisition.error(url, message, None);

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fail(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(fail(format!("server responded with {}", response.status())));
        }

        // Download next to the destination, then rename, so an interrupted
        // transfer never looks like a complete archive.
        let partial = dest.with_extension("partial");
        let mut file = fs::File::create(&partial)
            .map_err(|e| fail(format!("cannot create {}: {}", partial.display(), e)))?;
        response
            .copy_to(&mut file)
            .map_err(|e| fail(format!("download interrupted: {}", e)))?;
        fs::rename(&partial, dest)
            .map_err(|e| fail(format!("cannot move download into place: {}", e)))?;
        Ok(())
    }
}

/// A source tree ready for the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    pub root: PathBuf,
    /// Whether this call actually fetched anything.
    pub fetched: bool,
}

/// Acquires pinned source trees under a work directory.
pub struct SourceAcquirer<'a> {
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn SourceFetcher,
    work_dir: PathBuf,
}

impl<'a> SourceAcquirer<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn SourceFetcher,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            fetcher,
            work_dir: work_dir.into(),
        }
    }

    /// Deterministic source path for a target.
    pub fn source_dir(&self, spec: &TargetSpec) -> PathBuf {
        match &spec.source {
            SourceLocator::Local { path } => path.clone(),
            _ => self.work_dir.join(&spec.name).join("src"),
        }
    }

    /// Makes sure the target's source tree exists, fetching it at most once.
    pub fn acquire(&self, spec: &TargetSpec) -> Result<SourceTree, BuildError> {
        let context = format!("{} {}", spec.name, spec.version);

        if let SourceLocator::Local { path } = &spec.source {
            if !path.is_dir() {
                return Err(Stage::Acquisition.error(
                    &context,
                    format!(
                        "pre-populated checkout not found at {}.\n\n\
                         Clone the sources there or point the target at an archive instead.",
                        path.display()
                    ),
                    None,
                ));
            }
            log::info!("Using local checkout for {} at {}", spec.name, path.display());
            return Ok(SourceTree {
                root: path.clone(),
                fetched: false,
            });
        }

        let target_dir = self.work_dir.join(&spec.name);
        let root = target_dir.join("src");
        let stamp_path = target_dir.join(STAMP_FILE);
        let stamp = spec.source.describe(&spec.version);

        if root.is_dir() && fs::read_to_string(&stamp_path).ok().as_deref() == Some(stamp.as_str()) {
            log::info!("Source for {} already present at {}", context, root.display());
            return Ok(SourceTree {
                root,
                fetched: false,
            });
        }

        // Stale or partial tree from an older version or an interrupted run.
        remove_if_exists(&root, Stage::Acquisition, &context)?;
        remove_if_exists(&stamp_path, Stage::Acquisition, &context)?;
        ensure_dir(&target_dir, Stage::Acquisition, &context)?;

        let staging = target_dir.join("staging");
        remove_if_exists(&staging, Stage::Acquisition, &context)?;
        ensure_dir(&staging, Stage::Acquisition, &context)?;

        let extracted = match &spec.source {
            SourceLocator::Archive {
                url,
                top_dir,
                sha256,
            } => {
                let url = render_version(url, &spec.version);
                let top_dir = render_version(top_dir, &spec.version);
                let archive = self.download(&url, sha256.as_deref(), &target_dir, &context)?;
                self.extract(&archive, &staging, &top_dir, &context)?
            }
            SourceLocator::Git { url, rev } => {
                let rev = render_version(rev, &spec.version);
                let checkout = staging.join("checkout");
                log::info!("Cloning {} at {}", url, rev);
                let clone = CommandSpec::new("git")
                    .args(["clone", "--depth", "1", "--branch"])
                    .arg(rev)
                    .arg(url.clone())
                    .path_arg(&checkout);
                run_checked(self.runner, &clone, Stage::Acquisition, &context)?;
                checkout
            }
            SourceLocator::Local { .. } => unreachable!("handled above"),
        };

        fs::rename(&extracted, &root).map_err(|e| {
            Stage::Acquisition.error(
                &context,
                format!(
                    "Failed to move {} to {}: {}",
                    extracted.display(),
                    root.display(),
                    e
                ),
                None,
            )
        })?;
        remove_if_exists(&staging, Stage::Acquisition, &context)?;
        fs::write(&stamp_path, &stamp)?;

        log::info!("Acquired {} into {}", context, root.display());
        Ok(SourceTree {
            root,
            fetched: true,
        })
    }

    /// Downloads an archive into `<target>/downloads`, reusing a verified copy.
    fn download(
        &self,
        url: &str,
        sha256: Option<&str>,
        target_dir: &Path,
        context: &str,
    ) -> Result<PathBuf, BuildError> {
        let file_name = url
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .filter(|name| name.contains('.'))
            .ok_or_else(|| {
                BuildError::Config(format!(
                    "cannot derive an archive file name from URL '{}'",
                    url
                ))
            })?;
        let downloads = target_dir.join("downloads");
        ensure_dir(&downloads, Stage::Acquisition, context)?;
        let archive = downloads.join(file_name);

        if archive.is_file() && checksum_matches(&archive, sha256)? {
            log::debug!("Reusing download {}", archive.display());
            return Ok(archive);
        }
        remove_if_exists(&archive, Stage::Acquisition, context)?;

        self.fetcher.fetch(url, &archive)?;
        if !archive.is_file() {
            return Err(Stage::Acquisition.error(
                context,
                format!("download of {} produced no file", url),
                None,
            ));
        }
        if !checksum_matches(&archive, sha256)? {
            let actual = hash_file(&archive)?;
            remove_if_exists(&archive, Stage::Acquisition, context)?;
            return Err(Stage::Acquisition.error(
                context,
                format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    url,
                    sha256.unwrap_or_default(),
                    actual
                ),
                None,
            ));
        }
        Ok(archive)
    }

    /// Extracts an archive and returns the expected top-level directory.
    fn extract(
        &self,
        archive: &Path,
        staging: &Path,
        top_dir: &str,
        context: &str,
    ) -> Result<PathBuf, BuildError> {
        log::info!("Extracting {}", archive.display());
        let tar = CommandSpec::new("tar")
            .arg("-xf")
            .path_arg(archive)
            .arg("-C")
            .path_arg(staging);
        run_checked(self.runner, &tar, Stage::Acquisition, context)?;

        let expected = staging.join(top_dir);
        if !expected.is_dir() {
            let mut found: Vec<String> = fs::read_dir(staging)?
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            found.sort();
            return Err(Stage::Acquisition.error(
                context,
                format!(
                    "archive {} did not extract to the expected directory '{}'. Found: [{}]",
                    archive.display(),
                    top_dir,
                    found.join(", ")
                ),
                None,
            ));
        }
        Ok(expected)
    }
}

fn checksum_matches(path: &Path, expected: Option<&str>) -> Result<bool, BuildError> {
    match expected {
        Some(expected) => Ok(hash_file(path)?.eq_ignore_ascii_case(expected.trim())),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use std::cell::{Cell, RefCell};

    /// Writes a placeholder archive and counts calls.
    #[derive(Default)]
    struct CountingFetcher {
        calls: Cell<usize>,
    }

    impl SourceFetcher for CountingFetcher {
        fn fetch(&self, _url: &str, dest: &Path) -> Result<(), BuildError> {
            self.calls.set(self.calls.get() + 1);
            fs::write(dest, b"archive-bytes")?;
            Ok(())
        }
    }

    /// Simulates `tar -xf <archive> -C <dir>` by creating `<dir>/<top>/configure`.
    struct FakeTar {
        top_dir: String,
        commands: RefCell<Vec<CommandSpec>>,
    }

    impl FakeTar {
        fn new(top_dir: &str) -> Self {
            Self {
                top_dir: top_dir.to_string(),
                commands: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for FakeTar {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BuildError> {
            self.commands.borrow_mut().push(spec.clone());
            let dest = PathBuf::from(&spec.args[3]).join(&self.top_dir);
            fs::create_dir_all(&dest)?;
            fs::write(dest.join("configure"), "#!/bin/sh\n")?;
            Ok(CommandOutput::ok(""))
        }
    }

    fn archive_spec(version: &str) -> TargetSpec {
        TargetSpec::new(
            "alpha",
            version,
            SourceLocator::Archive {
                url: "https://example.com/alpha-{version}.tar.gz".into(),
                top_dir: "alpha-{version}".into(),
                sha256: None,
            },
            "libalpha.a",
        )
    }

    #[test]
    fn test_acquire_twice_fetches_once() {
        let work = tempfile::tempdir().unwrap();
        let fetcher = CountingFetcher::default();
        let runner = FakeTar::new("alpha-1.2.3");
        let acquirer = SourceAcquirer::new(&runner, &fetcher, work.path());
        let spec = archive_spec("1.2.3");

        let first = acquirer.acquire(&spec).unwrap();
        let second = acquirer.acquire(&spec).unwrap();

        assert_eq!(fetcher.calls.get(), 1);
        assert!(first.fetched);
        assert!(!second.fetched);
        assert_eq!(first.root, second.root);
        assert!(first.root.join("configure").is_file());
        assert_eq!(runner.commands.borrow().len(), 1);
    }

    #[test]
    fn test_unexpected_layout_is_fatal() {
        let work = tempfile::tempdir().unwrap();
        let fetcher = CountingFetcher::default();
        let runner = FakeTar::new("something-else");
        let acquirer = SourceAcquirer::new(&runner, &fetcher, work.path());

        let err = acquirer.acquire(&archive_spec("1.2.3")).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, BuildError::Acquisition { .. }));
        assert!(msg.contains("alpha-1.2.3"));
        assert!(msg.contains("something-else"));
    }

    #[test]
    fn test_version_change_reacquires() {
        let work = tempfile::tempdir().unwrap();
        let fetcher = CountingFetcher::default();

        let runner = FakeTar::new("alpha-1.2.3");
        SourceAcquirer::new(&runner, &fetcher, work.path())
            .acquire(&archive_spec("1.2.3"))
            .unwrap();

        let runner = FakeTar::new("alpha-1.3.0");
        let tree = SourceAcquirer::new(&runner, &fetcher, work.path())
            .acquire(&archive_spec("1.3.0"))
            .unwrap();

        assert!(tree.fetched);
        assert_eq!(fetcher.calls.get(), 2);
    }

    #[test]
    fn test_checksum_mismatch_is_fatal() {
        let work = tempfile::tempdir().unwrap();
        let fetcher = CountingFetcher::default();
        let runner = FakeTar::new("alpha-1.2.3");
        let acquirer = SourceAcquirer::new(&runner, &fetcher, work.path());
        let mut spec = archive_spec("1.2.3");
        spec.source = SourceLocator::Archive {
            url: "https://example.com/alpha-{version}.tar.gz".into(),
            top_dir: "alpha-{version}".into(),
            sha256: Some("00".repeat(32)),
        };

        let err = acquirer.acquire(&spec).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(runner.commands.borrow().is_empty());
    }

    #[test]
    fn test_missing_local_checkout() {
        let work = tempfile::tempdir().unwrap();
        let fetcher = CountingFetcher::default();
        let runner = FakeTar::new("unused");
        let acquirer = SourceAcquirer::new(&runner, &fetcher, work.path());
        let spec = TargetSpec::new(
            "beta",
            "1.0",
            SourceLocator::Local {
                path: work.path().join("missing"),
            },
            "libbeta.a",
        );

        let err = acquirer.acquire(&spec).unwrap_err();
        assert!(matches!(err, BuildError::Acquisition { .. }));
        assert_eq!(fetcher.calls.get(), 0);
    }
}
