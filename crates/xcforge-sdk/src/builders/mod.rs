//! Build and packaging stages.
//!
//! | Module | Input | Output |
//! |--------|-------|--------|
//! | [`autotools`] | source tree + toolchain | [`BuildArtifact`](crate::types::BuildArtifact) per (mode, pair) |
//! | [`assemble`] | cross artifacts of one target | `<Package>.xcframework` |
//!
//! The `common` module holds the filesystem helpers both stages (and the
//! installer) share: copying trees, removing stale outputs and hashing header
//! directories.

pub mod assemble;
pub mod autotools;
pub mod common;

pub use assemble::BundleAssembler;
pub use autotools::{AutotoolsBuilder, BuildRequest, DependencyInputs, ToolHandoff};
