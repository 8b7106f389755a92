//! Configuration file support for xcforge.
//!
//! Targets and directories live in an `xcforge.toml` file so a build is fully
//! described by the repository it runs in.
//!
//! ## Configuration File Location
//!
//! The configuration file is searched for in the following order:
//! 1. Current working directory (`./xcforge.toml`)
//! 2. Parent directories (up to the repository root or filesystem root)
//!
//! When no file is found, the built-in reference configuration (Protobuf and
//! Mosh for iOS device and simulator) is used.
//!
//! ## Example Configuration
//!
//! ```toml
//! [project]
//! work_dir = "target/xcforge/work"
//! output_dir = "target/xcforge/output"
//! install_dir = "../App/Frameworks"
//! versioned_target = "mosh"
//!
//! [[targets]]
//! name = "protobuf"
//! package_name = "Protobuf_C_"
//! version = "3.21.12"
//! library = "libprotobuf.a"
//! pairs = ["arm64-device", "arm64-simulator", "x86_64-simulator"]
//! host_tool = { binary = "protoc", cross_flag = "--with-protoc" }
//! source = { kind = "archive", url = "https://example.com/protobuf-{version}.tar.gz", top_dir = "protobuf-{version}" }
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use xcforge_sdk::{Dependency, HostTool, Platform, SourceLocator, TargetPair, TargetSpec};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "xcforge.toml";

const DEFAULT_PAIRS: [&str; 3] = ["arm64-device", "arm64-simulator", "x86_64-simulator"];

/// Root configuration structure for `xcforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XcforgeConfig {
    /// Directories and run-wide settings.
    pub project: ProjectConfig,

    /// Libraries to build, in declaration order.
    pub targets: Vec<TargetConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Source trees, build prefixes and intermediate bundles.
    ///
    /// Defaults to `target/xcforge/work`.
    pub work_dir: PathBuf,

    /// Where finished xcframeworks are written.
    ///
    /// Defaults to `target/xcforge/output`.
    pub output_dir: PathBuf,

    /// Consumer directory packages are copied into after a successful build.
    ///
    /// Publishing is skipped when unset or when the directory does not exist.
    pub install_dir: Option<PathBuf>,

    /// Parallel jobs passed to `make`.
    ///
    /// Defaults to the number of available CPUs.
    pub jobs: Option<usize>,

    /// Hash-compare header trees across architectures before merging them.
    pub verify_headers: bool,

    /// Target whose version the `build [VERSION]` argument overrides.
    ///
    /// Defaults to the first target.
    pub versioned_target: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("target/xcforge/work"),
            output_dir: PathBuf::from("target/xcforge/output"),
            install_dir: None,
            jobs: None,
            verify_headers: false,
            versioned_target: None,
        }
    }
}

/// One `[[targets]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    /// Name of the xcframework and binary. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    pub version: String,
    pub source: SourceConfig,
    /// Static library produced under `<prefix>/lib`.
    pub library: String,
    /// Archives the build leaves in the source tree, relative to its root,
    /// combined into `library` when `make install` does not install it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library_path: Vec<PathBuf>,
    /// `<arch>-<platform>` pairs. Defaults to arm64 device plus arm64 and
    /// x86_64 simulator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pairs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umbrella_header: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configure_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cflags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cxxflags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_tool: Option<HostToolConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyConfig>,
}

/// Where a target's source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Archive {
        url: String,
        top_dir: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
    Git {
        url: String,
        rev: String,
    },
    Local {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostToolConfig {
    pub binary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_flag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_env: Option<String>,
    #[serde(default = "default_link")]
    pub link: bool,
}

fn default_link() -> bool {
    true
}

impl XcforgeConfig {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: XcforgeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from the specified directory.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// The Protobuf + Mosh pipeline for iOS device and simulator.
    ///
    /// Mosh needs `protoc` at build time and links against the Protobuf
    /// runtime, so Protobuf is built for the host first and its tool handed to
    /// both Protobuf's and Mosh's cross builds.
    pub fn reference() -> Self {
        let pairs: Vec<String> = DEFAULT_PAIRS.iter().map(|p| p.to_string()).collect();
        let protobuf = TargetConfig {
            name: "protobuf".to_string(),
            package_name: Some("Protobuf_C_".to_string()),
            version: "3.21.12".to_string(),
            source: SourceConfig::Archive {
                url: "https://github.com/protocolbuffers/protobuf/releases/download/v{version}/protobuf-cpp-{version}.tar.gz"
                    .to_string(),
                top_dir: "protobuf-{version}".to_string(),
                sha256: None,
            },
            library: "libprotobuf.a".to_string(),
            library_path: Vec::new(),
            pairs: pairs.clone(),
            headers: Vec::new(),
            umbrella_header: None,
            configure_args: Vec::new(),
            cflags: Vec::new(),
            cxxflags: vec!["-std=c++11".to_string()],
            min_os: Some("14.0".to_string()),
            bundle_id: Some("dev.xcforge.protobuf".to_string()),
            build_number: None,
            host_tool: Some(HostToolConfig {
                binary: "protoc".to_string(),
                cross_flag: Some("--with-protoc".to_string()),
            }),
            dependencies: Vec::new(),
        };
        let mosh = TargetConfig {
            name: "mosh".to_string(),
            package_name: Some("mosh".to_string()),
            version: "1.4.0".to_string(),
            source: SourceConfig::Git {
                url: "https://github.com/mobile-shell/mosh.git".to_string(),
                rev: "mosh-{version}".to_string(),
            },
            library: "libmoshios.a".to_string(),
            // With client and server disabled upstream installs nothing; the
            // iOS library is the union of its internal archives.
            library_path: [
                "src/protobufs/libmoshprotos.a",
                "src/network/libmoshnetwork.a",
                "src/crypto/libmoshcrypto.a",
                "src/statesync/libmoshstatesync.a",
                "src/terminal/libmoshterminal.a",
                "src/util/libmoshutil.a",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            pairs,
            headers: Vec::new(),
            umbrella_header: None,
            configure_args: vec![
                "--disable-server".to_string(),
                "--disable-client".to_string(),
                "--with-crypto-library=apple-common-crypto".to_string(),
            ],
            cflags: Vec::new(),
            cxxflags: Vec::new(),
            min_os: Some("14.0".to_string()),
            bundle_id: Some("dev.xcforge.mosh".to_string()),
            build_number: None,
            host_tool: None,
            dependencies: vec![DependencyConfig {
                target: "protobuf".to_string(),
                tool_flag: None,
                tool_env: Some("PROTOC".to_string()),
                link: true,
            }],
        };

        Self {
            project: ProjectConfig {
                versioned_target: Some("mosh".to_string()),
                ..ProjectConfig::default()
            },
            targets: vec![protobuf, mosh],
        }
    }

    /// Converts the configured targets into SDK target specs.
    pub fn to_specs(&self) -> Result<Vec<TargetSpec>> {
        if self.targets.is_empty() {
            bail!("no targets configured. Add a [[targets]] table to {}", CONFIG_FILE_NAME);
        }
        self.targets.iter().map(TargetConfig::to_spec).collect()
    }

    /// Name of the target a version override applies to.
    pub fn versioned_target(&self) -> Option<&str> {
        self.project
            .versioned_target
            .as_deref()
            .or_else(|| self.targets.first().map(|t| t.name.as_str()))
    }

    /// Generates a starter configuration file as a formatted TOML string.
    ///
    /// This is the reference configuration with comments explaining each
    /// project option.
    pub fn generate_starter_toml() -> Result<String> {
        let reference = Self::reference();
        let targets = toml::to_string_pretty(&TargetsOnly {
            targets: &reference.targets,
        })
        .context("Failed to serialize reference targets")?;

        Ok(format!(
            r#"# xcforge configuration file
# Each [[targets]] entry is cross-compiled for every listed pair and packaged
# as <package_name>.xcframework. CLI flags override these settings.

[project]
# Source trees, build prefixes and intermediate bundles
work_dir = "target/xcforge/work"

# Finished xcframeworks and xcforge-report.json
output_dir = "target/xcforge/output"

# Consumer directory to publish into (skipped when missing)
# install_dir = "../App/Frameworks"

# Parallel make jobs (default: number of CPUs)
# jobs = 8

# Fail when header trees differ between architectures
verify_headers = false

# Target whose version `xcforge build <VERSION>` overrides
versioned_target = "mosh"

{targets}"#
        ))
    }
}

#[derive(Serialize)]
struct TargetsOnly<'a> {
    targets: &'a [TargetConfig],
}

impl TargetConfig {
    /// Builds the SDK spec, validating pairs and names.
    pub fn to_spec(&self) -> Result<TargetSpec> {
        if self.name.trim().is_empty() {
            bail!("target name must not be empty");
        }
        let source = match &self.source {
            SourceConfig::Archive {
                url,
                top_dir,
                sha256,
            } => SourceLocator::Archive {
                url: url.clone(),
                top_dir: top_dir.clone(),
                sha256: sha256.clone(),
            },
            SourceConfig::Git { url, rev } => SourceLocator::Git {
                url: url.clone(),
                rev: rev.clone(),
            },
            SourceConfig::Local { path } => SourceLocator::Local { path: path.clone() },
        };

        let mut spec = TargetSpec::new(&self.name, &self.version, source, &self.library);
        let pairs: Vec<&str> = if self.pairs.is_empty() {
            DEFAULT_PAIRS.to_vec()
        } else {
            self.pairs.iter().map(String::as_str).collect()
        };
        for pair in pairs {
            let parsed: TargetPair = pair
                .parse()
                .with_context(|| format!("Invalid pair in target '{}'", self.name))?;
            if parsed.platform == Platform::Macos {
                bail!(
                    "Invalid pair '{}' in target '{}': macOS is only used for host-mode builds. \
                     Supported platforms: device, simulator",
                    pair,
                    self.name
                );
            }
            if !spec.pairs.contains(&parsed) {
                spec.pairs.push(parsed);
            }
        }

        if let Some(package_name) = &self.package_name {
            spec.package_name = package_name.clone();
        }
        if let Some(min_os) = &self.min_os {
            spec.min_os = min_os.clone();
        }
        if let Some(bundle_id) = &self.bundle_id {
            spec.bundle_id = bundle_id.clone();
        }
        if let Some(build_number) = &self.build_number {
            spec.build_number = build_number.clone();
        }
        spec.library_path = self.library_path.clone();
        spec.headers = self.headers.clone();
        spec.umbrella_header = self.umbrella_header.clone();
        spec.configure_args = self.configure_args.clone();
        spec.cflags = self.cflags.clone();
        spec.cxxflags = self.cxxflags.clone();
        spec.host_tool = self.host_tool.as_ref().map(|t| HostTool {
            binary: t.binary.clone(),
            cross_flag: t.cross_flag.clone(),
        });
        spec.dependencies = self
            .dependencies
            .iter()
            .map(|d| Dependency {
                target: d.target.clone(),
                tool_flag: d.tool_flag.clone(),
                tool_env: d.tool_env.clone(),
                link: d.link,
            })
            .collect();
        Ok(spec)
    }
}

/// Configuration resolver that merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values, which take
/// precedence over the built-in reference configuration.
#[derive(Debug)]
pub struct ConfigResolver {
    /// Effective configuration.
    pub config: XcforgeConfig,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Loads `explicit` when given, otherwise discovers `xcforge.toml`.
    pub fn new(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self {
                config: XcforgeConfig::load_from_file(path)?,
                config_path: Some(path.to_path_buf()),
            });
        }
        match XcforgeConfig::discover()? {
            Some((config, path)) => Ok(Self {
                config,
                config_path: Some(path),
            }),
            None => Ok(Self {
                config: XcforgeConfig::reference(),
                config_path: None,
            }),
        }
    }

    /// Directories relative to the config file are resolved against its folder.
    fn anchor(&self, path: &Path) -> PathBuf {
        match self.config_path.as_deref().and_then(Path::parent) {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.anchor(&self.config.project.work_dir)
    }

    pub fn output_dir(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.unwrap_or_else(|| self.anchor(&self.config.project.output_dir))
    }

    pub fn install_dir(&self, cli: Option<PathBuf>) -> Option<PathBuf> {
        cli.or_else(|| {
            self.config
                .project
                .install_dir
                .as_deref()
                .map(|p| self.anchor(p))
        })
    }

    pub fn jobs(&self, cli: Option<usize>) -> usize {
        self.resolve(
            cli,
            |c| c.project.jobs,
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }

    pub fn verify_headers(&self, cli: bool) -> bool {
        cli || self.config.project.verify_headers
    }

    /// Target specs with an optional version override applied.
    pub fn specs(&self, version: Option<&str>) -> Result<Vec<TargetSpec>> {
        let mut specs = self.config.to_specs()?;
        if let Some(version) = version {
            let Some(name) = self.config.versioned_target() else {
                bail!("no target to apply version {} to", version);
            };
            let Some(spec) = specs.iter_mut().find(|s| s.name == name) else {
                bail!(
                    "versioned_target '{}' does not name a configured target",
                    name
                );
            };
            spec.version = version.to_string();
        }
        for spec in &mut specs {
            if let SourceLocator::Local { path } = &spec.source {
                spec.source = SourceLocator::Local {
                    path: self.anchor(path),
                };
            }
        }
        Ok(specs)
    }

    /// Resolves a CLI value, using config as fallback.
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&XcforgeConfig) -> Option<T>,
    {
        cli_value
            .or_else(|| config_getter(&self.config))
            .unwrap_or(default)
    }
}
