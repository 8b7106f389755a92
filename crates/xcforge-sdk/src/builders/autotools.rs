//! Per-target builds through the upstream autotools build system.
//!
//! One [`AutotoolsBuilder::build`] call turns a source tree plus one
//! [`ToolchainDescriptor`] into one [`BuildArtifact`]. Every call starts with a
//! hermetic reset of the shared source tree: configuration cached for one
//! architecture or build mode corrupts the next build otherwise.
//!
//! The sequence is:
//!
//! 1. Validate host-tool handoffs (before any command runs)
//! 2. Reset prior build state (`make distclean`, cached configure files in
//!    every subproject, in-tree archives, mode stamp)
//! 3. Bootstrap with `./autogen.sh` when `configure` is missing
//! 4. `configure` with the toolchain injected through the environment
//! 5. `make` and `make install` into an isolated prefix
//! 6. Gather in-tree archives when the library is never installed, verify the
//!    declared library (and host tool) exist, collect headers

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::common::{copy_file, ensure_dir, list_files, remove_if_exists};
use crate::exec::{CommandRunner, CommandSpec, run_checked};
use crate::source::SourceTree;
use crate::toolchain::ToolchainDescriptor;
use crate::types::{BuildArtifact, BuildError, BuildMode, Stage, TargetSpec};

/// Stamp written after configure, recording which mode and triple own the tree.
pub const MODE_STAMP: &str = ".xcforge-build-mode";

/// Files autotools leaves behind that carry configuration between runs.
const CACHED_CONFIG_FILES: &[&str] = &[
    "config.cache",
    "config.status",
    "config.log",
    "libtool",
    MODE_STAMP,
];

/// Cached configuration that nested `configure` runs leave in subprojects.
const NESTED_CONFIG_FILES: &[&str] = &["config.cache", "config.status"];

/// A host tool handed from a dependency's host-mode build to this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolHandoff {
    /// Tool binary name, used in error messages.
    pub tool: String,
    /// Resolved path; `None` when the providing host build never happened.
    pub path: Option<PathBuf>,
    pub configure_flag: Option<String>,
    pub env_var: Option<String>,
}

/// Inputs a build receives from the targets it depends on.
#[derive(Debug, Clone, Default)]
pub struct DependencyInputs<'a> {
    pub tools: Vec<ToolHandoff>,
    /// Same-pair cross artifacts to compile and link against.
    pub artifacts: Vec<&'a BuildArtifact>,
}

/// Everything one build invocation needs.
pub struct BuildRequest<'a> {
    pub spec: &'a TargetSpec,
    pub source: &'a SourceTree,
    pub toolchain: &'a ToolchainDescriptor,
    pub mode: BuildMode,
    pub deps: DependencyInputs<'a>,
    /// Isolated install prefix for this (target, mode, pair).
    pub prefix: PathBuf,
}

impl BuildRequest<'_> {
    fn context(&self) -> String {
        format!(
            "{} ({}, {})",
            self.spec.name,
            self.mode.as_str(),
            self.toolchain.pair()
        )
    }
}

/// Runs configure / make / make install against one toolchain.
pub struct AutotoolsBuilder<'a> {
    runner: &'a dyn CommandRunner,
    jobs: usize,
}

impl<'a> AutotoolsBuilder<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner, jobs: 1 }
    }

    /// Parallelism passed to `make -j`.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Builds one artifact. All failures are fatal; nothing partial is returned.
    pub fn build(&self, request: &BuildRequest<'_>) -> Result<BuildArtifact, BuildError> {
        let context = request.context();
        let root = &request.source.root;

        // Tool handoffs are checked before touching the tree or any compiler.
        let tools = validate_handoffs(&request.deps.tools, &context)?;

        log::info!("Building {}", context);
        self.reset(request, &context)?;
        self.bootstrap(root, &context)?;

        let env = build_environment(request);
        let mut configure = CommandSpec::new("./configure")
            .current_dir(root)
            .envs(&env)
            .arg(format!("--prefix={}", request.prefix.display()))
            .args(["--disable-shared", "--enable-static"]);
        if request.mode == BuildMode::Cross {
            configure = configure.arg(format!("--host={}", request.toolchain.host_triple));
        }
        for (handoff, path) in &tools {
            if let Some(flag) = &handoff.configure_flag {
                configure = configure.arg(format!("{}={}", flag, path.display()));
            }
        }
        configure = configure.args(request.spec.configure_args.iter().cloned());
        run_checked(self.runner, &configure, Stage::Build, &context)?;

        fs::write(
            root.join(MODE_STAMP),
            format!("{} {}\n", request.mode.as_str(), request.toolchain.host_triple),
        )?;

        let make = CommandSpec::new("make")
            .current_dir(root)
            .envs(&env)
            .arg(format!("-j{}", self.jobs));
        run_checked(self.runner, &make, Stage::Build, &context)?;

        let install = CommandSpec::new("make")
            .current_dir(root)
            .envs(&env)
            .arg("install");
        run_checked(self.runner, &install, Stage::Build, &context)?;

        self.collect(request, &context)
    }

    /// Removes every trace of the previous configuration of the tree.
    fn reset(&self, request: &BuildRequest<'_>, context: &str) -> Result<(), BuildError> {
        let root = &request.source.root;
        if root.join("Makefile").is_file() {
            let distclean = CommandSpec::new("make").current_dir(root).arg("distclean");
            let output = self.runner.run(&distclean)?;
            if !output.success() {
                log::debug!(
                    "make distclean exited with {:?} in {}; removing cached files directly",
                    output.code,
                    root.display()
                );
            }
        }
        for name in CACHED_CONFIG_FILES {
            remove_if_exists(&root.join(name), Stage::Build, context)?;
        }
        // A failed distclean leaves subproject caches configured for the
        // previous triple.
        for relative in list_files(root)? {
            let nested = relative.parent().is_some_and(|p| !p.as_os_str().is_empty());
            let cached = relative
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| NESTED_CONFIG_FILES.contains(&n));
            if nested && cached {
                log::debug!("Removing stale {}", relative.display());
                remove_if_exists(&root.join(&relative), Stage::Build, context)?;
            }
        }
        for relative in &request.spec.library_path {
            remove_if_exists(&root.join(relative), Stage::Build, context)?;
        }
        remove_if_exists(&request.prefix, Stage::Build, context)?;
        ensure_dir(&request.prefix, Stage::Build, context)
    }

    fn bootstrap(&self, root: &Path, context: &str) -> Result<(), BuildError> {
        if root.join("configure").is_file() {
            return Ok(());
        }
        if !root.join("autogen.sh").is_file() {
            return Err(Stage::Build.error(
                context,
                format!(
                    "{} has neither a configure script nor autogen.sh; is this an autotools project?",
                    root.display()
                ),
                None,
            ));
        }
        let autogen = CommandSpec::new("./autogen.sh").current_dir(root);
        run_checked(self.runner, &autogen, Stage::Build, context)?;
        if !root.join("configure").is_file() {
            return Err(Stage::Build.error(
                context,
                "autogen.sh succeeded but did not generate configure",
                None,
            ));
        }
        Ok(())
    }

    /// Verifies declared outputs and assembles the artifact.
    fn collect(
        &self,
        request: &BuildRequest<'_>,
        context: &str,
    ) -> Result<BuildArtifact, BuildError> {
        let prefix = &request.prefix;
        let library = prefix.join("lib").join(&request.spec.library);
        if !request.spec.library_path.is_empty() {
            self.gather_library(request, &library, context)?;
        }
        if !library.is_file() {
            return Err(Stage::Build.error(
                context,
                format!(
                    "build reported success but the static library is missing.\n\n\
                     Expected: {}\n\n\
                     Check that `library` matches what `make install` produces, \
                     or set `library_path` to the archives the build leaves in the tree.",
                    library.display()
                ),
                None,
            ));
        }

        let tool = match (request.mode, &request.spec.host_tool) {
            (BuildMode::Host, Some(host_tool)) => {
                let path = prefix.join("bin").join(&host_tool.binary);
                if !path.is_file() {
                    return Err(Stage::Build.error(
                        context,
                        format!(
                            "host build reported success but the tool is missing.\n\nExpected: {}",
                            path.display()
                        ),
                        None,
                    ));
                }
                Some(path)
            }
            _ => None,
        };

        let headers = prefix.join("include");
        ensure_dir(&headers, Stage::Build, context)?;
        for relative in &request.spec.headers {
            let src = request.source.root.join(relative);
            if !src.is_file() {
                return Err(Stage::Build.error(
                    context,
                    format!("declared header {} not found", src.display()),
                    None,
                ));
            }
            let Some(file_name) = relative.file_name() else {
                return Err(BuildError::Config(format!(
                    "declared header '{}' has no file name",
                    relative.display()
                )));
            };
            copy_file(&src, &headers.join(file_name), Stage::Build, context)?;
        }

        log::info!("Built {} -> {}", context, library.display());
        Ok(BuildArtifact {
            target: request.spec.name.clone(),
            pair: request.toolchain.pair(),
            mode: request.mode,
            prefix: prefix.clone(),
            library,
            headers,
            tool,
        })
    }

    /// Places in-tree archives at `library`: one is copied, several are
    /// combined with `libtool -static`.
    fn gather_library(
        &self,
        request: &BuildRequest<'_>,
        library: &Path,
        context: &str,
    ) -> Result<(), BuildError> {
        let mut parts = Vec::with_capacity(request.spec.library_path.len());
        for relative in &request.spec.library_path {
            let part = request.source.root.join(relative);
            if !part.is_file() {
                return Err(Stage::Build.error(
                    context,
                    format!(
                        "build reported success but {} was not produced",
                        part.display()
                    ),
                    None,
                ));
            }
            parts.push(part);
        }

        if let [single] = parts.as_slice() {
            return copy_file(single, library, Stage::Build, context);
        }
        if let Some(lib_dir) = library.parent() {
            ensure_dir(lib_dir, Stage::Build, context)?;
        }
        let libtool = CommandSpec::new("xcrun")
            .args(["libtool", "-static", "-o"])
            .path_arg(library)
            .args(parts.iter().map(|p| p.display().to_string()));
        run_checked(self.runner, &libtool, Stage::Build, context)?;
        Ok(())
    }
}

/// Checks every handoff resolves to an existing tool.
fn validate_handoffs<'h>(
    handoffs: &'h [ToolHandoff],
    context: &str,
) -> Result<Vec<(&'h ToolHandoff, PathBuf)>, BuildError> {
    let mut resolved = Vec::with_capacity(handoffs.len());
    for handoff in handoffs {
        match &handoff.path {
            Some(path) if path.is_file() => resolved.push((handoff, path.clone())),
            Some(path) => {
                return Err(BuildError::MissingTool {
                    tool: handoff.tool.clone(),
                    context: format!("{} (expected at {})", context, path.display()),
                });
            }
            None => {
                return Err(BuildError::MissingTool {
                    tool: handoff.tool.clone(),
                    context: format!("{}; its host-mode build did not run", context),
                });
            }
        }
    }
    Ok(resolved)
}

/// Translates the toolchain descriptor and dependency inputs into the
/// environment autotools reads.
pub fn build_environment(request: &BuildRequest<'_>) -> BTreeMap<String, String> {
    let toolchain = request.toolchain;
    let base = toolchain.base_flags().join(" ");

    let mut cflags = vec![base.clone(), "-O2".to_string()];
    cflags.extend(request.spec.cflags.iter().cloned());
    let mut cxxflags = vec![base.clone(), "-O2".to_string()];
    cxxflags.extend(request.spec.cflags.iter().cloned());
    cxxflags.extend(request.spec.cxxflags.iter().cloned());

    let mut cppflags = Vec::new();
    let mut ldflags = vec![base];
    let mut pkg_config = Vec::new();
    for artifact in &request.deps.artifacts {
        cppflags.push(format!("-I{}", artifact.headers.display()));
        ldflags.push(format!("-L{}", artifact.lib_dir().display()));
        pkg_config.push(artifact.lib_dir().join("pkgconfig").display().to_string());
    }

    let mut env = BTreeMap::new();
    env.insert("CC".to_string(), toolchain.cc.display().to_string());
    env.insert("CXX".to_string(), toolchain.cxx.display().to_string());
    env.insert("AR".to_string(), toolchain.ar.display().to_string());
    env.insert("RANLIB".to_string(), toolchain.ranlib.display().to_string());
    env.insert("CFLAGS".to_string(), cflags.join(" "));
    env.insert("CXXFLAGS".to_string(), cxxflags.join(" "));
    env.insert("CPPFLAGS".to_string(), cppflags.join(" "));
    env.insert("LDFLAGS".to_string(), ldflags.join(" "));
    // Only dependency artifacts are visible to pkg-config; host packages
    // would otherwise leak into cross builds.
    env.insert("PKG_CONFIG_PATH".to_string(), pkg_config.join(":"));
    env.insert("PKG_CONFIG_LIBDIR".to_string(), pkg_config.join(":"));
    for handoff in &request.deps.tools {
        if let (Some(var), Some(path)) = (&handoff.env_var, &handoff.path) {
            env.insert(var.clone(), path.display().to_string());
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::types::{Arch, HostTool, Platform, SourceLocator};
    use std::cell::RefCell;

    /// Records commands; `make install` creates the files named in `outputs`
    /// under the prefix and those in `in_tree` under the source root.
    struct FakeAutotools {
        commands: RefCell<Vec<CommandSpec>>,
        outputs: Vec<&'static str>,
        in_tree: Vec<&'static str>,
    }

    impl FakeAutotools {
        fn new(outputs: Vec<&'static str>) -> Self {
            Self {
                commands: RefCell::new(Vec::new()),
                outputs,
                in_tree: Vec::new(),
            }
        }

        fn in_tree(mut self, archives: Vec<&'static str>) -> Self {
            self.in_tree = archives;
            self
        }

        fn lines(&self) -> Vec<String> {
            self.commands
                .borrow()
                .iter()
                .map(|c| c.display_line())
                .collect()
        }
    }

    impl CommandRunner for FakeAutotools {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BuildError> {
            self.commands.borrow_mut().push(spec.clone());
            if spec.program == "./configure" {
                let dir = spec.current_dir.clone().unwrap();
                fs::write(dir.join("config.cache"), spec.display_line())?;
                fs::write(dir.join("Makefile"), "all:\n")?;
            }
            if spec.program == "make" && spec.args == ["install"] {
                let prefix = self
                    .commands
                    .borrow()
                    .iter()
                    .rev()
                    .flat_map(|c| c.args.iter())
                    .find_map(|a| a.strip_prefix("--prefix=").map(PathBuf::from))
                    .unwrap();
                for output in &self.outputs {
                    let path = prefix.join(output);
                    fs::create_dir_all(path.parent().unwrap())?;
                    fs::write(path, b"!<arch>\n")?;
                }
                let root = spec.current_dir.clone().unwrap();
                for archive in &self.in_tree {
                    let path = root.join(archive);
                    fs::create_dir_all(path.parent().unwrap())?;
                    fs::write(path, *archive)?;
                }
            }
            if spec.program == "xcrun" && spec.args[0] == "libtool" {
                let mut combined = Vec::new();
                for input in &spec.args[4..] {
                    combined.push(fs::read_to_string(input)?);
                }
                fs::write(&spec.args[3], combined.join("+"))?;
            }
            Ok(CommandOutput::ok(""))
        }
    }

    fn toolchain(arch: Arch, platform: Platform) -> ToolchainDescriptor {
        ToolchainDescriptor {
            arch,
            platform,
            sdk_root: PathBuf::from(format!("/sdks/{}.sdk", platform.sdk_name())),
            cc: PathBuf::from("/usr/bin/clang"),
            cxx: PathBuf::from("/usr/bin/clang++"),
            ar: PathBuf::from("/usr/bin/ar"),
            ranlib: PathBuf::from("/usr/bin/ranlib"),
            min_os: "14.0".to_string(),
            host_triple: arch.host_triple().to_string(),
        }
    }

    fn spec() -> TargetSpec {
        let mut spec = TargetSpec::new(
            "alpha",
            "1.2.3",
            SourceLocator::Local {
                path: PathBuf::from("/unused"),
            },
            "libalpha.a",
        );
        spec.host_tool = Some(HostTool {
            binary: "alphac".to_string(),
            cross_flag: None,
        });
        spec
    }

    fn source_tree(dir: &Path) -> SourceTree {
        let root = dir.join("src");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("configure"), "#!/bin/sh\n").unwrap();
        SourceTree {
            root,
            fetched: false,
        }
    }

    #[test]
    fn test_host_then_cross_does_not_leak_configuration() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        let runner = FakeAutotools::new(vec!["lib/libalpha.a", "bin/alphac", "include/alpha.h"]);
        let builder = AutotoolsBuilder::new(&runner).jobs(4);
        let spec = spec();

        let host_tc = toolchain(Arch::X86_64, Platform::Macos);
        let host = builder
            .build(&BuildRequest {
                spec: &spec,
                source: &source,
                toolchain: &host_tc,
                mode: BuildMode::Host,
                deps: DependencyInputs::default(),
                prefix: temp.path().join("stage/host"),
            })
            .unwrap();
        assert!(host.tool.is_some());
        assert_eq!(
            fs::read_to_string(source.root.join(MODE_STAMP)).unwrap(),
            "host x86_64-apple-darwin\n"
        );

        let cross_tc = toolchain(Arch::Arm64, Platform::Device);
        let cross = builder
            .build(&BuildRequest {
                spec: &spec,
                source: &source,
                toolchain: &cross_tc,
                mode: BuildMode::Cross,
                deps: DependencyInputs::default(),
                prefix: temp.path().join("stage/arm64-device"),
            })
            .unwrap();

        assert_eq!(cross.tool, None);
        assert_eq!(cross.pair.to_string(), "arm64-device");

        // The tree was cleaned before the second configure.
        let lines = runner.lines();
        let distclean = lines.iter().position(|l| l == "make distclean").unwrap();
        let configures: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.starts_with("./configure"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(configures.len(), 2);
        assert!(configures[0] < distclean && distclean < configures[1]);

        // The cached configuration now belongs to the cross request only.
        let cache = fs::read_to_string(source.root.join("config.cache")).unwrap();
        assert!(cache.contains("--host=aarch64-apple-darwin"));
        assert!(!cache.contains("x86_64"));
        let commands = runner.commands.borrow();
        let cross_configure = &commands[configures[1]];
        assert!(cross_configure.env["CFLAGS"].contains("-miphoneos-version-min=14.0"));
        assert!(cross_configure.env["CFLAGS"].contains("-arch arm64"));
        assert!(!cross_configure.env["CFLAGS"].contains("macosx"));
        assert_eq!(
            fs::read_to_string(source.root.join(MODE_STAMP)).unwrap(),
            "cross aarch64-apple-darwin\n"
        );
    }

    #[test]
    fn test_success_without_library_fails() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        let runner = FakeAutotools::new(vec!["include/alpha.h"]);
        let builder = AutotoolsBuilder::new(&runner);
        let spec = spec();
        let tc = toolchain(Arch::Arm64, Platform::Device);

        let err = builder
            .build(&BuildRequest {
                spec: &spec,
                source: &source,
                toolchain: &tc,
                mode: BuildMode::Cross,
                deps: DependencyInputs::default(),
                prefix: temp.path().join("stage/arm64-device"),
            })
            .unwrap_err();

        assert!(matches!(err, BuildError::Build { .. }));
        assert!(err.to_string().contains("libalpha.a"));
    }

    #[test]
    fn test_missing_tool_fails_before_any_command() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        let runner = FakeAutotools::new(vec!["lib/libalpha.a"]);
        let builder = AutotoolsBuilder::new(&runner);
        let spec = spec();
        let tc = toolchain(Arch::Arm64, Platform::Device);

        let err = builder
            .build(&BuildRequest {
                spec: &spec,
                source: &source,
                toolchain: &tc,
                mode: BuildMode::Cross,
                deps: DependencyInputs {
                    tools: vec![ToolHandoff {
                        tool: "protoc".to_string(),
                        path: None,
                        configure_flag: Some("--with-protoc".to_string()),
                        env_var: Some("PROTOC".to_string()),
                    }],
                    artifacts: Vec::new(),
                },
                prefix: temp.path().join("stage/arm64-device"),
            })
            .unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("protoc"));
        assert!(runner.commands.borrow().is_empty());
    }

    #[test]
    fn test_handoff_and_dependency_paths_reach_configure() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        let protoc = temp.path().join("protoc");
        fs::write(&protoc, "#!/bin/sh\n").unwrap();
        let runner = FakeAutotools::new(vec!["lib/libalpha.a"]);
        let builder = AutotoolsBuilder::new(&runner);
        let spec = spec();
        let tc = toolchain(Arch::Arm64, Platform::Simulator);
        let dep = BuildArtifact {
            target: "protobuf".to_string(),
            pair: tc.pair(),
            mode: BuildMode::Cross,
            prefix: PathBuf::from("/stage/protobuf/arm64-simulator"),
            library: PathBuf::from("/stage/protobuf/arm64-simulator/lib/libprotobuf.a"),
            headers: PathBuf::from("/stage/protobuf/arm64-simulator/include"),
            tool: None,
        };

        builder
            .build(&BuildRequest {
                spec: &spec,
                source: &source,
                toolchain: &tc,
                mode: BuildMode::Cross,
                deps: DependencyInputs {
                    tools: vec![ToolHandoff {
                        tool: "protoc".to_string(),
                        path: Some(protoc.clone()),
                        configure_flag: Some("--with-protoc".to_string()),
                        env_var: Some("PROTOC".to_string()),
                    }],
                    artifacts: vec![&dep],
                },
                prefix: temp.path().join("stage/arm64-simulator"),
            })
            .unwrap();

        let commands = runner.commands.borrow();
        let configure = commands
            .iter()
            .find(|c| c.program == "./configure")
            .unwrap();
        assert!(configure
            .args
            .contains(&format!("--with-protoc={}", protoc.display())));
        assert_eq!(configure.env["PROTOC"], protoc.display().to_string());
        assert_eq!(
            configure.env["CPPFLAGS"],
            "-I/stage/protobuf/arm64-simulator/include"
        );
        assert!(configure.env["LDFLAGS"].ends_with("-L/stage/protobuf/arm64-simulator/lib"));
        assert_eq!(
            configure.env["PKG_CONFIG_PATH"],
            "/stage/protobuf/arm64-simulator/lib/pkgconfig"
        );
    }

    #[test]
    fn test_missing_configure_and_autogen() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("src");
        fs::create_dir_all(&root).unwrap();
        let source = SourceTree {
            root,
            fetched: false,
        };
        let runner = FakeAutotools::new(vec![]);
        let builder = AutotoolsBuilder::new(&runner);
        let spec = spec();
        let tc = toolchain(Arch::Arm64, Platform::Device);

        let err = builder
            .build(&BuildRequest {
                spec: &spec,
                source: &source,
                toolchain: &tc,
                mode: BuildMode::Cross,
                deps: DependencyInputs::default(),
                prefix: temp.path().join("stage"),
            })
            .unwrap_err();
        assert!(err.to_string().contains("autogen.sh"));
    }

    fn cross_request<'r>(
        spec: &'r TargetSpec,
        source: &'r SourceTree,
        tc: &'r ToolchainDescriptor,
        prefix: PathBuf,
    ) -> BuildRequest<'r> {
        BuildRequest {
            spec,
            source,
            toolchain: tc,
            mode: BuildMode::Cross,
            deps: DependencyInputs::default(),
            prefix,
        }
    }

    #[test]
    fn test_single_in_tree_archive_is_copied() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        let runner = FakeAutotools::new(Vec::new()).in_tree(vec!["src/libcore.a"]);
        let mut spec = spec();
        spec.library_path = vec![PathBuf::from("src/libcore.a")];
        let tc = toolchain(Arch::Arm64, Platform::Device);
        let prefix = temp.path().join("stage/arm64-device");

        let artifact = AutotoolsBuilder::new(&runner)
            .build(&cross_request(&spec, &source, &tc, prefix.clone()))
            .unwrap();

        assert_eq!(artifact.library, prefix.join("lib/libalpha.a"));
        assert_eq!(fs::read_to_string(&artifact.library).unwrap(), "src/libcore.a");
        assert!(!runner.lines().iter().any(|l| l.starts_with("xcrun libtool")));
    }

    #[test]
    fn test_in_tree_archives_are_combined() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        let runner = FakeAutotools::new(Vec::new())
            .in_tree(vec!["src/network/libnet.a", "src/util/libutil.a"]);
        let mut spec = spec();
        spec.library_path = vec![
            PathBuf::from("src/network/libnet.a"),
            PathBuf::from("src/util/libutil.a"),
        ];
        let tc = toolchain(Arch::Arm64, Platform::Simulator);

        let artifact = AutotoolsBuilder::new(&runner)
            .build(&cross_request(&spec, &source, &tc, temp.path().join("stage/sim")))
            .unwrap();

        assert_eq!(
            fs::read_to_string(&artifact.library).unwrap(),
            "src/network/libnet.a+src/util/libutil.a"
        );
        let libtool = runner
            .lines()
            .into_iter()
            .find(|l| l.starts_with("xcrun libtool -static -o"))
            .unwrap();
        assert!(libtool.ends_with("src/util/libutil.a"));
    }

    #[test]
    fn test_missing_in_tree_archive_fails() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        // Left over from a previous build; the reset must not let it through.
        let stale = source.root.join("src/libcore.a");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "x86_64").unwrap();
        let runner = FakeAutotools::new(vec!["lib/libalpha.a"]);
        let mut spec = spec();
        spec.library_path = vec![PathBuf::from("src/libcore.a")];
        let tc = toolchain(Arch::Arm64, Platform::Device);

        let err = AutotoolsBuilder::new(&runner)
            .build(&cross_request(&spec, &source, &tc, temp.path().join("stage/dev")))
            .unwrap_err();

        assert!(matches!(err, BuildError::Build { .. }));
        assert!(err.to_string().contains("libcore.a"));
    }

    #[test]
    fn test_reset_clears_subproject_caches() {
        let temp = tempfile::tempdir().unwrap();
        let source = source_tree(temp.path());
        let nested = source.root.join("third_party/googletest");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("config.status"), "x86_64").unwrap();
        fs::write(nested.join("config.cache"), "x86_64").unwrap();
        fs::write(nested.join("configure"), "#!/bin/sh\n").unwrap();
        let runner = FakeAutotools::new(vec!["lib/libalpha.a"]);
        let spec = spec();
        let tc = toolchain(Arch::Arm64, Platform::Device);

        AutotoolsBuilder::new(&runner)
            .build(&cross_request(&spec, &source, &tc, temp.path().join("stage/dev")))
            .unwrap();

        assert!(!nested.join("config.status").exists());
        assert!(!nested.join("config.cache").exists());
        assert!(nested.join("configure").is_file());
    }
}
