//! Bundle assembly: per-architecture artifacts to one `xcframework`.
//!
//! For each platform the assembler produces a [`PlatformBundle`] (fusing
//! architectures with `lipo` when there is more than one), wraps it in a
//! `<Name>.framework` directory with headers and an `Info.plist`, and finally
//! hands all framework directories to `xcodebuild -create-xcframework`.
//!
//! ## Header precondition
//!
//! Headers installed by the upstream build are assumed to be identical across
//! architectures. Each bundle takes its headers from exactly one designated
//! artifact (the first by architecture order) and never mixes trees. The
//! assumption is not checked unless [`BundleAssembler::verify_headers`] is
//! enabled, in which case any difference between header trees is fatal.

use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::common::{copy_dir_recursive, copy_file, ensure_dir, hash_tree, remove_if_exists};
use crate::exec::{CommandRunner, CommandSpec, run_checked};
use crate::manifest::{render_info_plist, render_module_map};
use crate::types::{
    Arch, BuildArtifact, BuildError, BuildMode, FrameworkBundle, MultiPlatformPackage, Platform,
    PlatformBundle, Stage, TargetSpec,
};

/// Assembles xcframeworks from cross-compiled artifacts.
pub struct BundleAssembler<'a> {
    runner: &'a dyn CommandRunner,
    verify_headers: bool,
}

impl<'a> BundleAssembler<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            verify_headers: false,
        }
    }

    /// Hash-compare header trees across architectures before merging.
    pub fn verify_headers(mut self, verify: bool) -> Self {
        self.verify_headers = verify;
        self
    }

    /// Produces `<output_dir>/<Package>.xcframework` from the target's artifacts.
    ///
    /// `work_dir` holds intermediate fat libraries and framework directories.
    pub fn assemble(
        &self,
        spec: &TargetSpec,
        artifacts: &[BuildArtifact],
        work_dir: &Path,
        output_dir: &Path,
    ) -> Result<MultiPlatformPackage, BuildError> {
        let context = format!("{} {}", spec.name, spec.version);
        log::info!("Assembling {}.xcframework", spec.package_name);

        let mut frameworks = Vec::new();
        for platform in spec.platforms() {
            let inputs = self.platform_inputs(spec, artifacts, platform, &context)?;
            let bundle = self.merge_platform(
                spec,
                platform,
                &inputs,
                &work_dir.join("platforms").join(platform.as_str()),
                &context,
            )?;
            let framework = self.create_framework(
                spec,
                &bundle,
                &work_dir.join("frameworks").join(platform.as_str()),
                &context,
            )?;
            frameworks.push(framework);
        }

        let path = self.create_xcframework(spec, &frameworks, output_dir, &context)?;
        log::info!("Created {}", path.display());

        Ok(MultiPlatformPackage {
            name: spec.package_name.clone(),
            version: spec.version.clone(),
            path,
            frameworks,
        })
    }

    /// Cross artifacts for one platform, ordered by architecture.
    fn platform_inputs<'b>(
        &self,
        spec: &TargetSpec,
        artifacts: &'b [BuildArtifact],
        platform: Platform,
        context: &str,
    ) -> Result<Vec<&'b BuildArtifact>, BuildError> {
        let mut inputs = Vec::new();
        for pair in spec.pairs.iter().filter(|p| p.platform == platform) {
            let artifact = artifacts
                .iter()
                .find(|a| a.target == spec.name && a.mode == BuildMode::Cross && a.pair == *pair)
                .ok_or_else(|| {
                    Stage::Assembly.error(
                        context,
                        format!("missing build artifact for {}", pair),
                        None,
                    )
                })?;
            if !artifact.library.is_file() {
                return Err(Stage::Assembly.error(
                    context,
                    format!(
                        "static library for {} no longer exists at {}",
                        pair,
                        artifact.library.display()
                    ),
                    None,
                ));
            }
            inputs.push(artifact);
        }
        inputs.sort_by_key(|a| a.pair.arch);
        inputs.dedup_by_key(|a| a.pair.arch);
        Ok(inputs)
    }

    /// Produces one architecture-homogenized library for a platform.
    pub fn merge_platform(
        &self,
        spec: &TargetSpec,
        platform: Platform,
        inputs: &[&BuildArtifact],
        out_dir: &Path,
        context: &str,
    ) -> Result<PlatformBundle, BuildError> {
        let Some(designated) = inputs.first() else {
            return Err(Stage::Assembly.error(
                context,
                format!("no artifacts to assemble for platform {}", platform),
                None,
            ));
        };
        let archs: Vec<Arch> = inputs.iter().map(|a| a.pair.arch).collect();

        remove_if_exists(out_dir, Stage::Assembly, context)?;
        ensure_dir(out_dir, Stage::Assembly, context)?;
        let library = out_dir.join(&spec.library);

        if inputs.len() == 1 {
            copy_file(&designated.library, &library, Stage::Assembly, context)?;
        } else {
            self.fuse(inputs, &library, context)?;
            self.check_slices(&library, &archs, context)?;
        }

        if self.verify_headers {
            let expected = hash_tree(&designated.headers)?;
            for other in &inputs[1..] {
                if hash_tree(&other.headers)? != expected {
                    return Err(Stage::Assembly.error(
                        context,
                        format!(
                            "header trees differ between {} and {} for platform {}; \
                             headers cannot be shared across architectures",
                            designated.pair.arch, other.pair.arch, platform
                        ),
                        None,
                    ));
                }
            }
        }

        Ok(PlatformBundle {
            platform,
            library,
            archs,
            headers: designated.headers.clone(),
            headers_from: designated.pair.arch,
        })
    }

    fn fuse(&self, inputs: &[&BuildArtifact], output: &Path, context: &str) -> Result<(), BuildError> {
        let mut lipo = CommandSpec::new("xcrun").args(["lipo", "-create"]);
        for artifact in inputs {
            lipo = lipo.path_arg(&artifact.library);
        }
        lipo = lipo.arg("-output").path_arg(output);
        run_checked(self.runner, &lipo, Stage::Assembly, context)?;
        if !output.is_file() {
            return Err(Stage::Assembly.error(
                context,
                format!("lipo reported success but {} was not created", output.display()),
                None,
            ));
        }
        Ok(())
    }

    /// The fused binary must contain exactly the input architectures.
    fn check_slices(&self, library: &Path, expected: &[Arch], context: &str) -> Result<(), BuildError> {
        let query = CommandSpec::new("xcrun")
            .args(["lipo", "-archs"])
            .path_arg(library);
        let output = run_checked(self.runner, &query, Stage::Assembly, context)?;
        let mut found: Vec<String> = output.stdout.split_whitespace().map(str::to_string).collect();
        found.sort();
        let mut wanted: Vec<String> = expected.iter().map(|a| a.as_str().to_string()).collect();
        wanted.sort();
        if found != wanted {
            return Err(Stage::Assembly.error(
                context,
                format!(
                    "fat library {} contains [{}], expected [{}]",
                    library.display(),
                    found.join(" "),
                    wanted.join(" ")
                ),
                None,
            ));
        }
        Ok(())
    }

    /// Wraps a platform bundle in `<Package>.framework`.
    pub fn create_framework(
        &self,
        spec: &TargetSpec,
        bundle: &PlatformBundle,
        out_dir: &Path,
        context: &str,
    ) -> Result<FrameworkBundle, BuildError> {
        let framework_dir = out_dir.join(format!("{}.framework", spec.package_name));
        remove_if_exists(&framework_dir, Stage::Assembly, context)?;

        let headers_dir = framework_dir.join("Headers");
        copy_dir_recursive(&bundle.headers, &headers_dir, Stage::Assembly, context)?;
        copy_file(
            &bundle.library,
            &framework_dir.join(&spec.package_name),
            Stage::Assembly,
            context,
        )?;

        let plist = render_info_plist(spec, bundle.platform)?;
        fs::write(framework_dir.join("Info.plist"), plist).map_err(|e| {
            Stage::Assembly.error(context, format!("Failed to write Info.plist: {}", e), None)
        })?;

        if let Some(module_map) = render_module_map(spec)? {
            let modules_dir = framework_dir.join("Modules");
            ensure_dir(&modules_dir, Stage::Assembly, context)?;
            fs::write(modules_dir.join("module.modulemap"), module_map).map_err(|e| {
                Stage::Assembly.error(
                    context,
                    format!("Failed to write module.modulemap: {}", e),
                    None,
                )
            })?;
        }

        Ok(FrameworkBundle {
            platform: bundle.platform.as_str().to_string(),
            path: framework_dir,
            archs: bundle.archs.iter().map(|a| a.as_str().to_string()).collect(),
        })
    }

    /// Runs `xcodebuild -create-xcframework` after clearing any stale package.
    fn create_xcframework(
        &self,
        spec: &TargetSpec,
        frameworks: &[FrameworkBundle],
        output_dir: &Path,
        context: &str,
    ) -> Result<PathBuf, BuildError> {
        let xcframework_path = output_dir.join(format!("{}.xcframework", spec.package_name));

        // xcodebuild refuses to overwrite an existing output.
        if xcframework_path.exists() {
            log::info!("Removing stale {}", xcframework_path.display());
        }
        remove_if_exists(&xcframework_path, Stage::Assembly, context)?;
        ensure_dir(output_dir, Stage::Assembly, context)?;

        let mut cmd = CommandSpec::new("xcodebuild").arg("-create-xcframework");
        for framework in frameworks {
            cmd = cmd.arg("-framework").path_arg(&framework.path);
        }
        cmd = cmd.arg("-output").path_arg(&xcframework_path);
        run_checked(self.runner, &cmd, Stage::Assembly, context)?;

        if !xcframework_path.is_dir() {
            return Err(Stage::Assembly.error(
                context,
                format!(
                    "xcodebuild reported success but {} does not exist",
                    xcframework_path.display()
                ),
                None,
            ));
        }
        Ok(xcframework_path)
    }
}
