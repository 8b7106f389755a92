//! Multi-target native build orchestration for Apple platforms
//!
//! `xcforge-sdk` cross-compiles autotools-based C/C++ libraries for several
//! (architecture, platform) pairs and packages each library as an
//! `xcframework` that Xcode projects can link directly.
//!
//! # Pipeline
//!
//! For every configured target, in dependency order:
//!
//! 1. **Source acquisition** - fetch the pinned release once into a work dir
//! 2. **Toolchain resolution** - ask `xcrun` for the SDK and compilers per pair
//! 3. **Per-target builds** - an optional host build (for tools such as
//!    `protoc`), then one cross build per pair, each after a hermetic reset
//! 4. **Bundle assembly** - `lipo` per platform, framework synthesis,
//!    `xcodebuild -create-xcframework`
//! 5. **Install** - publish into a consumer directory when one exists
//!
//! External tools are reached only through [`exec::CommandRunner`], so every
//! stage can be exercised without Xcode installed.
//!
//! # Example
//!
//! ```ignore
//! use xcforge_sdk::{HttpFetcher, Layout, Pipeline, SystemRunner};
//!
//! let fetcher = HttpFetcher::new()?;
//! let layout = Layout {
//!     work_dir: "target/xcforge/work".into(),
//!     output_dir: "target/xcforge/output".into(),
//!     install_dir: None,
//! };
//! let report = Pipeline::new(&SystemRunner, &fetcher, layout)
//!     .jobs(8)
//!     .run(&specs)?;
//! for target in &report.targets {
//!     println!("{}", target.package.path.display());
//! }
//! # Ok::<(), xcforge_sdk::BuildError>(())
//! ```

pub mod builders;
pub mod exec;
pub mod graph;
pub mod install;
pub mod manifest;
pub mod pipeline;
pub mod source;
pub mod toolchain;
pub mod types;

pub use exec::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use graph::build_order;
pub use install::{InstallOutcome, Installer};
pub use pipeline::{Layout, Pipeline, PipelineReport, TargetReport};
pub use source::{HttpFetcher, SourceAcquirer, SourceFetcher, SourceTree};
pub use toolchain::{ToolchainDescriptor, ToolchainResolver};
pub use types::{
    Arch, BuildArtifact, BuildError, BuildMode, Dependency, FrameworkBundle, HostTool,
    MultiPlatformPackage, Platform, PlatformBundle, SourceLocator, TargetPair, TargetSpec,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
