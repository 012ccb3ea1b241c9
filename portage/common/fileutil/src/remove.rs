// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Runs `f` with `path`'s permission bits temporarily set to `mode`,
/// restoring the original permissions once `f` returns (success or not).
pub fn with_permissions<T>(path: &Path, mode: u32, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let original = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .permissions();

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {}", path.display()))?;

    let result = f();

    fs::set_permissions(path, original)
        .with_context(|| format!("Failed to restore permissions on {}", path.display()))?;

    result
}

/// Adds owner read/write/execute bits to `path`'s current mode, ignoring a
/// missing file.
fn grant_owner_rwx(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    };
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let mode = meta.permissions().mode() | 0o700;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {}", path.display()))
}

/// Removes a single file, first granting its parent directory owner
/// read/write/execute bits.
///
/// Build output captured from a container root, or a tree whose ownership
/// was simulated by the fakefs interceptor, can end up with a parent
/// directory that isn't owner-writable, which would otherwise make a plain
/// [`std::fs::remove_file`] fail with `EACCES`.
pub fn remove_file_with_chmod(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        grant_owner_rwx(parent)?;
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Recursively removes `path`, first restoring owner read/write/execute
/// bits on every directory in the tree (including `path`'s parent).
///
/// This is the "directory-remove-with-chmod pass" scratch-dir teardown
/// needs: a tree assembled under the container executor, or one whose
/// ownership was faked by the fakefs interceptor, can contain directories
/// with mode bits that block traversal or deletion by their real
/// (unprivileged) owner. Restoring owner rwx on every directory bottom-up
/// before the final [`std::fs::remove_dir_all`] makes the removal succeed
/// regardless of the tree's original mode bits.
pub fn remove_dir_all_with_chmod(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    }

    // Walk top-down so a parent is writable before we need to chmod or
    // remove anything beneath it.
    for entry in WalkDir::new(path).contents_first(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_dir() {
            grant_owner_rwx(entry.path())?;
        }
    }

    if let Some(parent) = path.parent() {
        grant_owner_rwx(parent)?;
    }

    fs::remove_dir_all(path).with_context(|| format!("Failed to remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir, create_dir_all, write};

    #[test]
    fn with_permissions_restores_original_mode() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("f");
        write(&file, "hello")?;
        fs::set_permissions(&file, fs::Permissions::from_mode(0o400))?;

        with_permissions(&file, 0o600, || {
            write(&file, "world").context("write")
        })?;

        let mode = fs::metadata(&file)?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o400);
        assert_eq!(std::fs::read_to_string(&file)?, "world");
        Ok(())
    }

    #[test]
    fn removes_file_behind_readonly_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("sub");
        create_dir(&sub)?;
        let file = sub.join("f");
        write(&file, "data")?;
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o500))?;

        remove_file_with_chmod(&file)?;

        assert!(!file.exists());
        Ok(())
    }

    #[test]
    fn removes_tree_with_unwritable_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("target");
        let nested = target.join("a").join("b");
        create_dir_all(&nested)?;
        write(nested.join("f"), "data")?;

        for d in [&target, &target.join("a"), &nested] {
            fs::set_permissions(d, fs::Permissions::from_mode(0o500))?;
        }

        remove_dir_all_with_chmod(&target)?;

        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn missing_path_is_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        remove_dir_all_with_chmod(&dir.path().join("does-not-exist"))?;
        remove_file_with_chmod(&dir.path().join("also-missing"))?;
        Ok(())
    }
}
