//! # xcforge
//!
//! Command-line tool that cross-compiles autotools libraries for iOS device and
//! simulator and packages each one as an `xcframework`.
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter configuration (Protobuf + Mosh)
//! xcforge init
//!
//! # Build everything at the pinned versions
//! xcforge build
//!
//! # Build with a different version of the versioned target
//! xcforge build 1.4.0
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `build [VERSION]` | Acquire, build, assemble and install every target |
//! | `plan` | Print build order, pairs and tool handoffs |
//! | `clean` | Remove work directories, packages and the run report |
//! | `init` | Write a starter `xcforge.toml` |
//!
//! ## Output Directory
//!
//! ```text
//! target/xcforge/
//! ├── work/<target>/src        # acquired source tree
//! ├── work/<target>/build/     # one install prefix per (mode, pair)
//! └── output/
//!     ├── <Package>.xcframework
//!     └── xcforge-report.json
//! ```
//!
//! ## Exit Codes
//!
//! `0` on success. On failure, the exit code of the first external tool that
//! failed, or `1` when the failure did not come from a tool.
//!
//! ## Modules
//!
//! - [`config`] - Configuration file support for `xcforge.toml`

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use xcforge_sdk::{BuildError, HttpFetcher, Layout, Pipeline, SystemRunner, TargetSpec};

pub mod config;

use config::{ConfigResolver, XcforgeConfig};

/// Cross-compile autotools libraries for iOS and package them as xcframeworks.
#[derive(Parser, Debug)]
#[command(name = "xcforge", author, version, about, long_about = None)]
struct Cli {
    /// Path to xcforge.toml (default: discovered from the current directory upward)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print verbose output including all commands
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, package and install every configured target.
    Build {
        /// Version of the versioned target to build instead of the pinned one
        version: Option<String>,
        #[arg(long, help = "Output directory for xcframeworks (default: target/xcforge/output)")]
        output_dir: Option<PathBuf>,
        #[arg(long, help = "Consumer directory to publish packages into")]
        install_dir: Option<PathBuf>,
        #[arg(long, short = 'j', help = "Parallel make jobs (default: number of CPUs)")]
        jobs: Option<usize>,
        #[arg(long, help = "Fail when header trees differ between architectures")]
        verify_headers: bool,
    },
    /// Print the build order, pairs and tool handoffs without building.
    Plan {
        /// Version override, as for `build`
        version: Option<String>,
    },
    /// Remove work directories, packages and the run report.
    Clean {
        #[arg(long, help = "Output directory to clean (default: from config)")]
        output_dir: Option<PathBuf>,
    },
    /// Write a starter xcforge.toml.
    Init {
        #[arg(long, default_value = "xcforge.toml")]
        output: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Build {
            version,
            output_dir,
            install_dir,
            jobs,
            verify_headers,
        } => {
            let resolver = ConfigResolver::new(cli.config.as_deref())?;
            cmd_build(
                &resolver,
                version.as_deref(),
                output_dir,
                install_dir,
                jobs,
                verify_headers,
            )?;
        }
        Command::Plan { version } => {
            let resolver = ConfigResolver::new(cli.config.as_deref())?;
            cmd_plan(&resolver, version.as_deref())?;
        }
        Command::Clean { output_dir } => {
            let resolver = ConfigResolver::new(cli.config.as_deref())?;
            cmd_clean(&resolver, output_dir)?;
        }
        Command::Init { output } => {
            write_config_template(&output)?;
            println!("Wrote starter config to {:?}", output);
        }
    }

    Ok(())
}

/// Process exit code for a failed run.
///
/// The first external tool's exit code when the failure came from one, `1`
/// otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BuildError>())
        .map(BuildError::exit_code)
        .unwrap_or(1)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .try_init();
}

fn cmd_build(
    resolver: &ConfigResolver,
    version: Option<&str>,
    output_dir: Option<PathBuf>,
    install_dir: Option<PathBuf>,
    jobs: Option<usize>,
    verify_headers: bool,
) -> Result<()> {
    if let Some(config_path) = &resolver.config_path {
        log::info!("Using config file: {:?}", config_path);
    } else {
        log::info!("No {} found; using the reference configuration", config::CONFIG_FILE_NAME);
    }

    let specs = resolver.specs(version)?;
    let layout = Layout {
        work_dir: resolver.work_dir(),
        output_dir: resolver.output_dir(output_dir),
        install_dir: resolver.install_dir(install_dir),
    };
    let fetcher = HttpFetcher::new()?;
    let pipeline = Pipeline::new(&SystemRunner, &fetcher, layout)
        .jobs(resolver.jobs(jobs))
        .verify_headers(resolver.verify_headers(verify_headers));

    let report = pipeline.run(&specs).context("Build failed")?;

    println!();
    println!("Build complete:");
    for target in &report.targets {
        println!(
            "  {} {} -> {}",
            target.name,
            target.version,
            target.package.path.display()
        );
        if let Some(installed) = &target.installed {
            println!("    installed at {}", installed.display());
        }
    }
    Ok(())
}

fn cmd_plan(resolver: &ConfigResolver, version: Option<&str>) -> Result<()> {
    let specs = resolver.specs(version)?;
    let order = xcforge_sdk::build_order(&specs)?;
    print!("{}", render_plan(&order));
    Ok(())
}

fn render_plan(order: &[&TargetSpec]) -> String {
    let mut out = String::new();
    for (i, spec) in order.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} {} -> {}.xcframework\n",
            i + 1,
            spec.name,
            spec.version,
            spec.package_name
        ));
        out.push_str(&format!(
            "   source: {}\n",
            spec.source.describe(&spec.version)
        ));
        if let Some(tool) = &spec.host_tool {
            out.push_str(&format!("   host build: {}\n", tool.binary));
        }
        if !spec.library_path.is_empty() {
            out.push_str(&format!(
                "   library: {} from {} in-tree archive(s)\n",
                spec.library,
                spec.library_path.len()
            ));
        }
        let pairs: Vec<String> = spec.pairs.iter().map(|p| p.to_string()).collect();
        out.push_str(&format!("   pairs: {}\n", pairs.join(", ")));
        for dep in &spec.dependencies {
            let mut handoff = Vec::new();
            if let Some(flag) = &dep.tool_flag {
                handoff.push(format!("tool via {}", flag));
            }
            if let Some(var) = &dep.tool_env {
                handoff.push(format!("tool via ${}", var));
            }
            if dep.link {
                handoff.push("links same-pair artifact".to_string());
            }
            out.push_str(&format!(
                "   depends on {}: {}\n",
                dep.target,
                handoff.join(", ")
            ));
        }
    }
    out
}

fn cmd_clean(resolver: &ConfigResolver, output_dir: Option<PathBuf>) -> Result<()> {
    let specs = resolver.specs(None)?;
    let layout = Layout {
        work_dir: resolver.work_dir(),
        output_dir: resolver.output_dir(output_dir),
        install_dir: None,
    };
    layout.clean(&specs)?;
    println!("Clean complete");
    Ok(())
}

fn write_config_template(path: &Path) -> Result<()> {
    ensure_can_write(path)?;
    let contents = XcforgeConfig::generate_starter_toml()?;
    fs::write(path, contents).with_context(|| format!("writing file {:?}", path))
}

fn ensure_can_write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file: {:?}", path);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory {:?}", parent))?;
    }
    Ok(())
}
