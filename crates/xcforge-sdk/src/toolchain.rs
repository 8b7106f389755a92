//! Toolchain resolution.
//!
//! Maps an (architecture, platform) pair to a [`ToolchainDescriptor`]: the SDK
//! root, the compiler and archiver executables that belong to that SDK, the
//! minimum-OS flag and the autotools host triple. Lookups go through
//! `xcrun`; nothing else is touched.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::exec::{CommandRunner, CommandSpec};
use crate::types::{Arch, BuildError, Platform, TargetPair};

/// Everything the builder needs to target one (arch, platform) pair.
///
/// Read-only once resolved; passed by reference into the builder, which turns
/// it into whatever environment the upstream build system expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainDescriptor {
    pub arch: Arch,
    pub platform: Platform,
    pub sdk_root: PathBuf,
    pub cc: PathBuf,
    pub cxx: PathBuf,
    pub ar: PathBuf,
    pub ranlib: PathBuf,
    /// Minimum OS version passed through [`Platform::min_os_flag`].
    pub min_os: String,
    pub host_triple: String,
}

impl ToolchainDescriptor {
    pub fn pair(&self) -> TargetPair {
        TargetPair::new(self.arch, self.platform)
    }

    /// `-mios-simulator-version-min=14.0` and friends.
    pub fn min_os_arg(&self) -> String {
        format!("{}={}", self.platform.min_os_flag(), self.min_os)
    }

    /// Flags shared by the C compiler, C++ compiler and linker.
    pub fn base_flags(&self) -> Vec<String> {
        vec![
            "-arch".to_string(),
            self.arch.as_str().to_string(),
            "-isysroot".to_string(),
            self.sdk_root.display().to_string(),
            self.min_os_arg(),
        ]
    }
}

/// Resolves and caches descriptors for the duration of one run.
pub struct ToolchainResolver<'a> {
    runner: &'a dyn CommandRunner,
    cache: HashMap<(TargetPair, String), ToolchainDescriptor>,
    host_arch: Option<Arch>,
}

impl<'a> ToolchainResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            cache: HashMap::new(),
            host_arch: None,
        }
    }

    /// Resolves the descriptor for a cross-compilation pair.
    pub fn resolve(
        &mut self,
        pair: TargetPair,
        min_os: &str,
    ) -> Result<ToolchainDescriptor, BuildError> {
        let key = (pair, min_os.to_string());
        if let Some(descriptor) = self.cache.get(&key) {
            return Ok(descriptor.clone());
        }

        let sdk = pair.platform.sdk_name();
        let descriptor = ToolchainDescriptor {
            arch: pair.arch,
            platform: pair.platform,
            sdk_root: self.sdk_path(sdk)?,
            cc: self.find_tool(sdk, "clang")?,
            cxx: self.find_tool(sdk, "clang++")?,
            ar: self.find_tool(sdk, "ar")?,
            ranlib: self.find_tool(sdk, "ranlib")?,
            min_os: min_os.to_string(),
            host_triple: pair.arch.host_triple().to_string(),
        };
        log::debug!(
            "Resolved toolchain for {}: sdk={} triple={}",
            pair,
            descriptor.sdk_root.display(),
            descriptor.host_triple
        );
        self.cache.insert(key, descriptor.clone());
        Ok(descriptor)
    }

    /// Resolves the descriptor for host-mode builds on this machine.
    pub fn resolve_host(&mut self, min_os: &str) -> Result<ToolchainDescriptor, BuildError> {
        let arch = match self.host_arch {
            Some(arch) => arch,
            None => {
                let arch = self.machine_arch()?;
                self.host_arch = Some(arch);
                arch
            }
        };
        self.resolve(TargetPair::new(arch, Platform::Macos), min_os)
    }

    /// Architecture of the machine, not of this process: an x86_64 build of
    /// xcforge running under Rosetta still sees `hw.optional.arm64 = 1`.
    fn machine_arch(&self) -> Result<Arch, BuildError> {
        let sysctl = CommandSpec::new("sysctl").args(["-n", "hw.optional.arm64"]);
        match self.runner.run(&sysctl) {
            Ok(output) if output.success() && output.stdout.trim() == "1" => {
                return Ok(Arch::Arm64);
            }
            Ok(_) => {}
            Err(err) => log::debug!("sysctl hw.optional.arm64 unavailable: {}", err),
        }

        let uname = CommandSpec::new("uname").arg("-m");
        let output = self.runner.run(&uname)?;
        if !output.success() {
            return Err(BuildError::MissingTool {
                tool: "uname".to_string(),
                context: format!("host architecture detection (exit {:?})", output.code),
            });
        }
        let arch = Arch::from_machine(&output.stdout)?;
        log::debug!("Host architecture: {}", arch);
        Ok(arch)
    }

    fn sdk_path(&self, sdk: &str) -> Result<PathBuf, BuildError> {
        let spec = CommandSpec::new("xcrun").args(["--sdk", sdk, "--show-sdk-path"]);
        let output = self.runner.run(&spec)?;
        let path = output.stdout.trim();
        if !output.success() || path.is_empty() {
            return Err(BuildError::Config(format!(
                "SDK '{}' not found (xcrun --sdk {} --show-sdk-path exited with {:?}).\n\n\
                 Install Xcode and select it with: sudo xcode-select -s /Applications/Xcode.app",
                sdk, sdk, output.code
            )));
        }
        Ok(PathBuf::from(path))
    }

    fn find_tool(&self, sdk: &str, tool: &str) -> Result<PathBuf, BuildError> {
        let spec = CommandSpec::new("xcrun").args(["--sdk", sdk, "--find", tool]);
        let output = self.runner.run(&spec)?;
        let path = output.stdout.trim();
        if !output.success() || path.is_empty() {
            return Err(BuildError::MissingTool {
                tool: tool.to_string(),
                context: format!("the {} SDK toolchain", sdk),
            });
        }
        Ok(PathBuf::from(path))
    }
}
