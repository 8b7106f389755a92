//! Publishing packages into a consumer project.
//!
//! The consumer directory is optional. When it is not configured or does not
//! exist, publishing is skipped with a warning and the packages stay in the
//! output directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::common::{copy_dir_recursive, copy_file, ensure_dir, remove_if_exists};
use crate::types::{BuildError, MultiPlatformPackage, Stage};

/// What happened to a package during publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        package: PathBuf,
        tools: Vec<PathBuf>,
    },
    Skipped {
        reason: String,
    },
}

/// Copies xcframeworks and host tools into the consumer directory.
#[derive(Debug, Clone)]
pub struct Installer {
    install_dir: Option<PathBuf>,
}

impl Installer {
    pub fn new(install_dir: Option<PathBuf>) -> Self {
        Self { install_dir }
    }

    /// Publishes `package` and any host `tools` it carries along.
    ///
    /// Existing copies are replaced: the new copy is staged next to the
    /// destination first, so a failed copy never leaves a half-written package.
    pub fn publish(
        &self,
        package: &MultiPlatformPackage,
        tools: &[PathBuf],
    ) -> Result<InstallOutcome, BuildError> {
        let Some(install_dir) = &self.install_dir else {
            let reason = "no install directory configured".to_string();
            log::warn!("Skipping install of {}: {}", package.name, reason);
            return Ok(InstallOutcome::Skipped { reason });
        };
        if !install_dir.is_dir() {
            let reason = format!("install directory {} does not exist", install_dir.display());
            log::warn!("Skipping install of {}: {}", package.name, reason);
            return Ok(InstallOutcome::Skipped { reason });
        }

        let context = format!("{} {}", package.name, package.version);
        let file_name = package.path.file_name().ok_or_else(|| {
            Stage::Install.error(
                &context,
                format!("package path {} has no file name", package.path.display()),
                None,
            )
        })?;
        let dest = install_dir.join(file_name);
        replace_with_copy(&package.path, &dest, &context)?;
        log::info!("Installed {}", dest.display());

        let mut installed_tools = Vec::new();
        for tool in tools {
            let Some(name) = tool.file_name() else {
                continue;
            };
            let tool_dest = install_dir.join("bin").join(name);
            replace_with_copy(tool, &tool_dest, &context)?;
            log::info!("Installed {}", tool_dest.display());
            installed_tools.push(tool_dest);
        }

        Ok(InstallOutcome::Installed {
            package: dest,
            tools: installed_tools,
        })
    }
}

fn replace_with_copy(src: &Path, dest: &Path, context: &str) -> Result<(), BuildError> {
    let mut staging_name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    staging_name.push(".partial");
    let staging = dest.with_file_name(staging_name);

    remove_if_exists(&staging, Stage::Install, context)?;
    if let Some(parent) = dest.parent() {
        ensure_dir(parent, Stage::Install, context)?;
    }
    if src.is_dir() {
        copy_dir_recursive(src, &staging, Stage::Install, context)?;
    } else {
        copy_file(src, &staging, Stage::Install, context)?;
        preserve_permissions(src, &staging, context)?;
    }

    remove_if_exists(dest, Stage::Install, context)?;
    fs::rename(&staging, dest).map_err(|e| {
        Stage::Install.error(
            context,
            format!(
                "Failed to move {} into place at {}: {}",
                staging.display(),
                dest.display(),
                e
            ),
            None,
        )
    })
}

fn preserve_permissions(src: &Path, dest: &Path, context: &str) -> Result<(), BuildError> {
    let permissions = fs::metadata(src)?.permissions();
    fs::set_permissions(dest, permissions).map_err(|e| {
        Stage::Install.error(
            context,
            format!("Failed to set permissions on {}: {}", dest.display(), e),
            None,
        )
    })
}
