//! Filesystem helpers shared by the builder, assembler and installer.
//!
//! All functions attach the offending path to their errors so a failure is
//! diagnosable from the message alone.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::types::{BuildError, Stage};

/// Removes a file or directory tree if it exists.
pub fn remove_if_exists(path: &Path, stage: Stage, context: &str) -> Result<(), BuildError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return Ok(());
    };
    result.map_err(|e| {
        stage.error(
            context,
            format!("Failed to remove {}: {}", path.display(), e),
            None,
        )
    })
}

/// Creates a directory and its parents.
pub fn ensure_dir(path: &Path, stage: Stage, context: &str) -> Result<(), BuildError> {
    fs::create_dir_all(path).map_err(|e| {
        stage.error(
            context,
            format!("Failed to create directory {}: {}", path.display(), e),
            None,
        )
    })
}

/// Copies a single file, creating the destination's parent directory.
pub fn copy_file(src: &Path, dest: &Path, stage: Stage, context: &str) -> Result<(), BuildError> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent, stage, context)?;
    }
    fs::copy(src, dest).map_err(|e| {
        stage.error(
            context,
            format!(
                "Failed to copy {} to {}: {}",
                src.display(),
                dest.display(),
                e
            ),
            None,
        )
    })?;
    Ok(())
}

/// Recursively copies a directory.
pub fn copy_dir_recursive(
    src: &Path,
    dest: &Path,
    stage: Stage,
    context: &str,
) -> Result<(), BuildError> {
    ensure_dir(dest, stage, context)?;

    let entries = fs::read_dir(src).map_err(|e| {
        stage.error(
            context,
            format!("Failed to read directory {}: {}", src.display(), e),
            None,
        )
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            stage.error(
                context,
                format!("Failed to read entry in {}: {}", src.display(), e),
                None,
            )
        })?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if path.is_dir() {
            copy_dir_recursive(&path, &dest_path, stage, context)?;
        } else {
            copy_file(&path, &dest_path, stage, context)?;
        }
    }

    Ok(())
}

/// Lists regular files under `root`, as sorted paths relative to `root`.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// SHA-256 over a directory tree: relative paths and file contents, in path order.
pub fn hash_tree(root: &Path) -> Result<String, BuildError> {
    let mut hasher = Sha256::new();
    for relative in list_files(root)? {
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(root.join(&relative))?);
        hasher.update([0u8]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a single file, lowercase hex.
pub fn hash_file(path: &Path) -> Result<String, BuildError> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_dir_recursive_nested() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("google/protobuf")).unwrap();
        fs::write(src.join("google/protobuf/message.h"), "// message").unwrap();
        fs::write(src.join("top.h"), "// top").unwrap();

        let dest = temp.path().join("dest");
        copy_dir_recursive(&src, &dest, Stage::Assembly, "test").unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("google/protobuf/message.h")).unwrap(),
            "// message"
        );
        assert_eq!(
            list_files(&dest).unwrap(),
            vec![PathBuf::from("google/protobuf/message.h"), PathBuf::from("top.h")]
        );
    }

    #[test]
    fn test_remove_if_exists_is_quiet_for_missing_paths() {
        let temp = tempfile::tempdir().unwrap();
        remove_if_exists(&temp.path().join("absent"), Stage::Build, "test").unwrap();

        let file = temp.path().join("config.cache");
        fs::write(&file, "ac_cv_host=x86_64").unwrap();
        remove_if_exists(&file, Stage::Build, "test").unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_hash_tree_detects_content_drift() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        for dir in [&a, &b] {
            fs::create_dir_all(dir).unwrap();
            fs::write(dir.join("config.h"), "#define HAVE_X 1\n").unwrap();
        }
        assert_eq!(hash_tree(&a).unwrap(), hash_tree(&b).unwrap());

        fs::write(b.join("config.h"), "#define HAVE_X 0\n").unwrap();
        assert_ne!(hash_tree(&a).unwrap(), hash_tree(&b).unwrap());
    }

    #[test]
    fn test_hash_file_known_digest() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
