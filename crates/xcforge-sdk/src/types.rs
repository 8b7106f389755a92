//! Core types for xcforge-sdk.
//!
//! This module defines the data model shared by every pipeline stage:
//!
//! - [`BuildError`] - Error taxonomy for configuration, acquisition, build and assembly
//! - [`Arch`] / [`Platform`] / [`TargetPair`] - What a library is built for
//! - [`TargetSpec`] - One buildable library and its dependencies
//! - [`BuildMode`] / [`BuildArtifact`] - Output of a single per-target build
//! - [`PlatformBundle`] / [`FrameworkBundle`] / [`MultiPlatformPackage`] - Assembly products

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error types for xcforge-sdk operations.
///
/// Every variant is fatal except where a caller explicitly chooses to log and
/// continue (only the install step does that, and only for a missing consumer
/// directory, which is not represented as an error at all).
///
/// # Example
///
/// ```
/// use xcforge_sdk::BuildError;
///
/// let err = BuildError::MissingTool {
///     tool: "protoc".to_string(),
///     context: "mosh (arm64-device)".to_string(),
/// };
/// assert!(err.is_configuration());
/// assert_eq!(err.exit_code(), 1);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Invalid or unsupported configuration: unknown architecture, unknown
    /// dependency, dependency cycle, malformed target definition.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required external tool or host-built tool is not available.
    #[error("required tool `{tool}` is missing (needed by {context}). Install it or build the target that provides it first")]
    MissingTool { tool: String, context: String },

    /// Fetching or extracting a source tree failed.
    #[error("source acquisition failed for {context}: {message}")]
    Acquisition {
        context: String,
        message: String,
        exit_code: Option<i32>,
    },

    /// The upstream build system failed, or claimed success without producing
    /// the declared outputs.
    #[error("build failed for {context}: {message}")]
    Build {
        context: String,
        message: String,
        exit_code: Option<i32>,
    },

    /// Fat-binary merge, framework synthesis or xcframework creation failed.
    #[error("assembly failed for {context}: {message}")]
    Assembly {
        context: String,
        message: String,
        exit_code: Option<i32>,
    },

    /// Publishing to an existing consumer directory failed.
    #[error("install failed for {context}: {message}")]
    Install { context: String, message: String },

    /// An I/O error occurred outside of a more specific stage context.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Returns `true` for configuration-class failures (bad config or missing tools).
    pub fn is_configuration(&self) -> bool {
        matches!(self, BuildError::Config(_) | BuildError::MissingTool { .. })
    }

    /// Process exit code to report for this failure.
    ///
    /// Propagates the first failing external tool's exit code when one is
    /// known, and falls back to `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        let code = match self {
            BuildError::Acquisition { exit_code, .. }
            | BuildError::Build { exit_code, .. }
            | BuildError::Assembly { exit_code, .. } => *exit_code,
            _ => None,
        };
        match code {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}

/// Pipeline stage an external command or failure belongs to.
///
/// Used to turn a failed command into the right [`BuildError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquisition,
    Build,
    Assembly,
    Install,
}

impl Stage {
    /// Builds the stage-specific error for a failure in `context`.
    pub fn error(
        self,
        context: impl Into<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> BuildError {
        let context = context.into();
        let message = message.into();
        match self {
            Stage::Acquisition => BuildError::Acquisition {
                context,
                message,
                exit_code,
            },
            Stage::Build => BuildError::Build {
                context,
                message,
                exit_code,
            },
            Stage::Assembly => BuildError::Assembly {
                context,
                message,
                exit_code,
            },
            Stage::Install => BuildError::Install { context, message },
        }
    }
}

/// CPU architecture a library slice is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    Arm64,
    X86_64,
    Armv7,
}

impl Arch {
    /// All supported architectures, in the order header sourcing prefers them.
    pub const ALL: [Arch; 3] = [Arch::Arm64, Arch::X86_64, Arch::Armv7];

    /// Name used by clang `-arch` and by `lipo`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::X86_64 => "x86_64",
            Arch::Armv7 => "armv7",
        }
    }

    /// Autotools host triple for this architecture.
    ///
    /// Depends on the architecture only; platform never changes the triple.
    pub fn host_triple(&self) -> &'static str {
        match self {
            Arch::Arm64 => "aarch64-apple-darwin",
            Arch::X86_64 => "x86_64-apple-darwin",
            Arch::Armv7 => "arm-apple-darwin",
        }
    }

    /// Maps a `uname -m` machine name to a host architecture.
    pub fn from_machine(machine: &str) -> Result<Arch, BuildError> {
        match machine.trim() {
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "x86_64" => Ok(Arch::X86_64),
            other => Err(BuildError::Config(format!(
                "unsupported host architecture '{}'; host-mode builds need arm64 or x86_64",
                other
            ))),
        }
    }
}

impl FromStr for Arch {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "x86_64" => Ok(Arch::X86_64),
            "armv7" => Ok(Arch::Armv7),
            other => Err(BuildError::Config(format!(
                "unknown architecture '{}'. Supported architectures: arm64, x86_64, armv7",
                other
            ))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Arch {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Apple platform a library slice runs on.
///
/// `Macos` is only ever used for host-mode builds of code generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    Device,
    Simulator,
    Macos,
}

impl Platform {
    /// Short name used in config files and directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Device => "device",
            Platform::Simulator => "simulator",
            Platform::Macos => "macos",
        }
    }

    /// SDK name understood by `xcrun --sdk`.
    pub fn sdk_name(&self) -> &'static str {
        match self {
            Platform::Device => "iphoneos",
            Platform::Simulator => "iphonesimulator",
            Platform::Macos => "macosx",
        }
    }

    /// Name of the compiler flag carrying the minimum OS version.
    pub fn min_os_flag(&self) -> &'static str {
        match self {
            Platform::Device => "-miphoneos-version-min",
            Platform::Simulator => "-mios-simulator-version-min",
            Platform::Macos => "-mmacosx-version-min",
        }
    }

    /// Value for `CFBundleSupportedPlatforms` in a framework manifest.
    pub fn bundle_platform(&self) -> &'static str {
        match self {
            Platform::Device => "iPhoneOS",
            Platform::Simulator => "iPhoneSimulator",
            Platform::Macos => "MacOSX",
        }
    }
}

impl FromStr for Platform {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" | "ios" | "iphoneos" => Ok(Platform::Device),
            "simulator" | "ios-simulator" | "iphonesimulator" => Ok(Platform::Simulator),
            "macos" | "macosx" => Ok(Platform::Macos),
            other => Err(BuildError::Config(format!(
                "unknown platform '{}'. Supported platforms: device, simulator",
                other
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One (architecture, platform) combination a target is built for.
///
/// Written as `<arch>-<platform>` in configuration, e.g. `arm64-device` or
/// `x86_64-simulator`.
///
/// ```
/// use xcforge_sdk::{Arch, Platform, TargetPair};
///
/// let pair: TargetPair = "x86_64-simulator".parse().unwrap();
/// assert_eq!(pair.arch, Arch::X86_64);
/// assert_eq!(pair.platform, Platform::Simulator);
/// assert_eq!(pair.to_string(), "x86_64-simulator");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetPair {
    pub arch: Arch,
    pub platform: Platform,
}

impl TargetPair {
    pub fn new(arch: Arch, platform: Platform) -> Self {
        Self { arch, platform }
    }
}

impl FromStr for TargetPair {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the first '-' after the arch: "x86_64-simulator" has no
        // dash inside the arch name, so the first dash is the separator.
        let (arch, platform) = s.split_once('-').ok_or_else(|| {
            BuildError::Config(format!(
                "invalid target pair '{}'; expected <arch>-<platform>, e.g. arm64-device",
                s
            ))
        })?;
        Ok(Self {
            arch: arch.parse()?,
            platform: platform.parse()?,
        })
    }
}

impl TryFrom<String> for TargetPair {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetPair> for String {
    fn from(pair: TargetPair) -> Self {
        pair.to_string()
    }
}

impl fmt::Display for TargetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.arch, self.platform)
    }
}

/// Where a target's pinned source tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// A release tarball. `url` and `top_dir` may contain `{version}`.
    Archive {
        url: String,
        top_dir: String,
        sha256: Option<String>,
    },
    /// A git repository checked out at `rev` (tag or branch).
    Git { url: String, rev: String },
    /// A pre-populated checkout used in place.
    Local { path: PathBuf },
}

impl SourceLocator {
    /// Stable description recorded next to an acquired tree.
    pub fn describe(&self, version: &str) -> String {
        match self {
            SourceLocator::Archive { url, .. } => {
                format!("archive {} @ {}", render_version(url, version), version)
            }
            SourceLocator::Git { url, rev } => format!("git {} @ {}", url, render_version(rev, version)),
            SourceLocator::Local { path } => format!("local {}", path.display()),
        }
    }
}

/// Replaces `{version}` placeholders in a locator field.
pub fn render_version(template: &str, version: &str) -> String {
    template.replace("{version}", version)
}

/// A host tool produced by a target's host-mode build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTool {
    /// Executable name under `<prefix>/bin`, e.g. `protoc`.
    pub binary: String,
    /// Pass the tool to this target's own cross builds as `<flag>=<path>`.
    pub cross_flag: Option<String>,
}

/// An edge in the dependency graph between two targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name of the target this one depends on.
    pub target: String,
    /// Pass the dependency's host tool to configure as `<flag>=<path>`.
    pub tool_flag: Option<String>,
    /// Export the dependency's host tool path in this environment variable.
    pub tool_env: Option<String>,
    /// Add the dependency's same-pair artifact to include/library search paths.
    pub link: bool,
}

impl Dependency {
    /// Returns `true` when this edge hands a host tool over.
    pub fn needs_tool(&self) -> bool {
        self.tool_flag.is_some() || self.tool_env.is_some()
    }
}

/// Identifies one buildable library and everything needed to package it.
///
/// Immutable once created; built from static configuration at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// Short name used for work directories and dependency references.
    pub name: String,
    /// Name of the xcframework and of the binary inside each framework.
    pub package_name: String,
    /// Pinned upstream version.
    pub version: String,
    pub source: SourceLocator,
    /// Every (arch, platform) pair the library must be built for.
    pub pairs: Vec<TargetPair>,
    /// Static library file name expected under `<prefix>/lib`.
    pub library: String,
    /// In-tree archives, relative to the source root, that make up `library`
    /// when `make install` does not install it. Several are combined.
    pub library_path: Vec<PathBuf>,
    /// Extra headers, relative to the source root, copied into the header tree.
    pub headers: Vec<PathBuf>,
    /// Umbrella header for the framework module map, if any.
    pub umbrella_header: Option<String>,
    pub configure_args: Vec<String>,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub min_os: String,
    pub bundle_id: String,
    pub build_number: String,
    /// Tool produced by a host-mode build of this target.
    pub host_tool: Option<HostTool>,
    pub dependencies: Vec<Dependency>,
}

impl TargetSpec {
    /// Creates a spec with sensible defaults for everything but the essentials.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        source: SourceLocator,
        library: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            package_name: name.clone(),
            bundle_id: format!("dev.xcforge.{}", sanitize_bundle_id_component(&name)),
            name,
            version: version.into(),
            source,
            pairs: Vec::new(),
            library: library.into(),
            library_path: Vec::new(),
            headers: Vec::new(),
            umbrella_header: None,
            configure_args: Vec::new(),
            cflags: Vec::new(),
            cxxflags: Vec::new(),
            min_os: "14.0".to_string(),
            build_number: "1".to_string(),
            host_tool: None,
            dependencies: Vec::new(),
        }
    }

    /// Platforms covered by this target, deduplicated and ordered.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.pairs.iter().map(|p| p.platform).collect();
        platforms.sort();
        platforms.dedup();
        platforms
    }
}

/// Sanitizes a string into a bundle identifier component.
///
/// - "bench-mobile" -> "benchmobile"
/// - "Protobuf_C_" -> "protobufc"
pub fn sanitize_bundle_id_component(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Build variant. Host builds produce tools for the build machine; cross
/// builds produce the library for a target pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Host,
    Cross,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Host => "host",
            BuildMode::Cross => "cross",
        }
    }
}

/// Result of one successful per-target build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
    pub target: String,
    pub pair: TargetPair,
    pub mode: BuildMode,
    /// Install prefix the build wrote into.
    pub prefix: PathBuf,
    pub library: PathBuf,
    pub headers: PathBuf,
    /// Host tool path, only for host-mode builds of targets that declare one.
    pub tool: Option<PathBuf>,
}

impl BuildArtifact {
    pub fn lib_dir(&self) -> PathBuf {
        self.prefix.join("lib")
    }
}

/// One architecture-homogenized library for a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformBundle {
    pub platform: Platform,
    pub library: PathBuf,
    pub archs: Vec<Arch>,
    /// Header tree, taken from exactly one artifact.
    pub headers: PathBuf,
    /// Architecture whose artifact supplied the headers.
    pub headers_from: Arch,
}

/// A `<Name>.framework` directory built from one [`PlatformBundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkBundle {
    pub platform: String,
    pub path: PathBuf,
    pub archs: Vec<String>,
}

/// The final `<Name>.xcframework` deliverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiPlatformPackage {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub frameworks: Vec<FrameworkBundle>,
}
