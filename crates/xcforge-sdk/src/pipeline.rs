//! End-to-end driver: acquire, build, assemble, install.
//!
//! Targets are processed strictly one after another in dependency order, and
//! every external command blocks until it exits. The target graph and its
//! edges are validated before the first command runs. A failure anywhere
//! aborts the run; nothing after the failing step is attempted.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::builders::assemble::BundleAssembler;
use crate::builders::autotools::{AutotoolsBuilder, BuildRequest, DependencyInputs, ToolHandoff};
use crate::builders::common::{ensure_dir, remove_if_exists};
use crate::exec::CommandRunner;
use crate::graph::build_order;
use crate::install::{InstallOutcome, Installer};
use crate::source::{SourceAcquirer, SourceFetcher, SourceTree};
use crate::toolchain::ToolchainResolver;
use crate::types::{
    BuildArtifact, BuildError, BuildMode, MultiPlatformPackage, Stage, TargetPair, TargetSpec,
};

/// File name of the run report written into the output directory.
pub const REPORT_FILE: &str = "xcforge-report.json";

/// Directories the pipeline reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Source trees, build prefixes and intermediate bundles.
    pub work_dir: PathBuf,
    /// Final xcframeworks and the run report.
    pub output_dir: PathBuf,
    /// Optional consumer directory packages are published into.
    pub install_dir: Option<PathBuf>,
}

impl Layout {
    pub fn target_dir(&self, spec: &TargetSpec) -> PathBuf {
        self.work_dir.join(&spec.name)
    }

    /// Install prefix for one build; distinct per mode and pair.
    pub fn prefix(&self, spec: &TargetSpec, mode: BuildMode, pair: TargetPair) -> PathBuf {
        let leaf = match mode {
            BuildMode::Host => "host".to_string(),
            BuildMode::Cross => pair.to_string(),
        };
        self.target_dir(spec).join("build").join(leaf)
    }

    pub fn package_path(&self, spec: &TargetSpec) -> PathBuf {
        self.output_dir
            .join(format!("{}.xcframework", spec.package_name))
    }

    /// Removes work directories, packages and the report for the given targets.
    ///
    /// Local source trees are left alone; the next build resets them anyway.
    pub fn clean(&self, specs: &[TargetSpec]) -> Result<(), BuildError> {
        for spec in specs {
            let context = spec.name.as_str();
            for path in [self.target_dir(spec), self.package_path(spec)] {
                if path.exists() {
                    log::info!("Removing {}", path.display());
                }
                remove_if_exists(&path, Stage::Build, context)?;
            }
        }
        remove_if_exists(&self.output_dir.join(REPORT_FILE), Stage::Build, "report")
    }
}

/// Summary of one successful run, written as JSON next to the packages.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub generated_at: String,
    pub targets: Vec<TargetReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub version: String,
    /// Whether the source was fetched this run (false when reused).
    pub source_fetched: bool,
    pub host_tool: Option<PathBuf>,
    pub artifacts: Vec<BuildArtifact>,
    pub package: MultiPlatformPackage,
    /// Where the package was published, if anywhere.
    pub installed: Option<PathBuf>,
}

/// Sequential build orchestrator.
pub struct Pipeline<'a> {
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn SourceFetcher,
    layout: Layout,
    jobs: usize,
    verify_headers: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn SourceFetcher,
        layout: Layout,
    ) -> Self {
        Self {
            runner,
            fetcher,
            layout,
            jobs: 1,
            verify_headers: false,
        }
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn verify_headers(mut self, verify: bool) -> Self {
        self.verify_headers = verify;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Builds, packages and publishes every target.
    pub fn run(&self, specs: &[TargetSpec]) -> Result<PipelineReport, BuildError> {
        let order = build_order(specs)?;
        log::info!(
            "Build order: {}",
            order
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        let acquirer = SourceAcquirer::new(self.runner, self.fetcher, &self.layout.work_dir);
        let builder = AutotoolsBuilder::new(self.runner).jobs(self.jobs);
        let assembler = BundleAssembler::new(self.runner).verify_headers(self.verify_headers);
        let mut resolver = ToolchainResolver::new(self.runner);

        let mut host_artifacts: HashMap<String, BuildArtifact> = HashMap::new();
        let mut cross_artifacts: Vec<BuildArtifact> = Vec::new();
        let mut targets = Vec::new();

        for spec in order {
            log::info!("== {} {} ==", spec.name, spec.version);
            let source = acquirer.acquire(spec)?;

            if spec.host_tool.is_some() {
                let toolchain = resolver.resolve_host(&spec.min_os)?;
                let request = BuildRequest {
                    spec,
                    source: &source,
                    toolchain: &toolchain,
                    mode: BuildMode::Host,
                    deps: DependencyInputs::default(),
                    prefix: self.layout.prefix(spec, BuildMode::Host, toolchain.pair()),
                };
                let artifact = builder.build(&request)?;
                host_artifacts.insert(spec.name.clone(), artifact);
            }

            let first = cross_artifacts.len();
            for &pair in &spec.pairs {
                let artifact = self.build_cross(
                    &builder,
                    &mut resolver,
                    spec,
                    specs,
                    &source,
                    pair,
                    &host_artifacts,
                    &cross_artifacts,
                )?;
                cross_artifacts.push(artifact);
            }

            let package = assembler.assemble(
                spec,
                &cross_artifacts[first..],
                &self.layout.target_dir(spec).join("assemble"),
                &self.layout.output_dir,
            )?;

            targets.push(TargetReport {
                name: spec.name.clone(),
                version: spec.version.clone(),
                source_fetched: source.fetched,
                host_tool: host_artifacts.get(&spec.name).and_then(|a| a.tool.clone()),
                artifacts: cross_artifacts[first..].to_vec(),
                package,
                installed: None,
            });
        }

        let installer = Installer::new(self.layout.install_dir.clone());
        for target in &mut targets {
            let tools: Vec<PathBuf> = target.host_tool.iter().cloned().collect();
            if let InstallOutcome::Installed { package, .. } =
                installer.publish(&target.package, &tools)?
            {
                target.installed = Some(package);
            }
        }

        let report = PipelineReport {
            generated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "unknown".to_string()),
            targets,
        };
        self.write_report(&report)?;
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_cross(
        &self,
        builder: &AutotoolsBuilder<'_>,
        resolver: &mut ToolchainResolver<'_>,
        spec: &TargetSpec,
        specs: &[TargetSpec],
        source: &SourceTree,
        pair: TargetPair,
        host_artifacts: &HashMap<String, BuildArtifact>,
        cross_artifacts: &[BuildArtifact],
    ) -> Result<BuildArtifact, BuildError> {
        let toolchain = resolver.resolve(pair, &spec.min_os)?;
        let mut deps = DependencyInputs::default();

        if let Some(host_tool) = &spec.host_tool {
            if let Some(flag) = &host_tool.cross_flag {
                deps.tools.push(ToolHandoff {
                    tool: host_tool.binary.clone(),
                    path: host_artifacts.get(&spec.name).and_then(|a| a.tool.clone()),
                    configure_flag: Some(flag.clone()),
                    env_var: None,
                });
            }
        }

        for dep in &spec.dependencies {
            if dep.needs_tool() {
                let host_tool = specs
                    .iter()
                    .find(|s| s.name == dep.target)
                    .and_then(|s| s.host_tool.as_ref())
                    .ok_or_else(|| {
                        BuildError::Config(format!(
                            "target `{}` takes a host tool from `{}`, which declares no host_tool",
                            spec.name, dep.target
                        ))
                    })?;
                deps.tools.push(ToolHandoff {
                    tool: host_tool.binary.clone(),
                    path: host_artifacts.get(&dep.target).and_then(|a| a.tool.clone()),
                    configure_flag: dep.tool_flag.clone(),
                    env_var: dep.tool_env.clone(),
                });
            }
            if dep.link {
                let artifact = cross_artifacts
                    .iter()
                    .find(|a| a.target == dep.target && a.pair == pair)
                    .ok_or_else(|| {
                        BuildError::Config(format!(
                            "target `{}` links against `{}`, which is not built for {}",
                            spec.name, dep.target, pair
                        ))
                    })?;
                deps.artifacts.push(artifact);
            }
        }

        let request = BuildRequest {
            spec,
            source,
            toolchain: &toolchain,
            mode: BuildMode::Cross,
            deps,
            prefix: self.layout.prefix(spec, BuildMode::Cross, pair),
        };
        builder.build(&request)
    }

    fn write_report(&self, report: &PipelineReport) -> Result<(), BuildError> {
        ensure_dir(&self.layout.output_dir, Stage::Assembly, "report")?;
        let json = serde_json::to_string_pretty(report).map_err(std::io::Error::from)?;
        fs::write(self.layout.output_dir.join(REPORT_FILE), json)?;
        Ok(())
    }
}
