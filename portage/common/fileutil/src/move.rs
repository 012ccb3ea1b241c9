// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;
use std::process::Command;

use anyhow::{ensure, Context, Result};

/// Moves every entry of `src` into `dst`, leaving `src` empty.
///
/// `dst` must already exist. Shells out to `/bin/mv` rather than using
/// [`std::fs::rename`] so the move succeeds even when `src` and `dst` live
/// on different file systems — e.g. a container's tmpfs-backed overlay
/// upper directory being moved into a bind-mounted output directory.
pub fn move_dir_contents(src: &Path, dst: &Path) -> Result<()> {
    ensure!(
        dst.is_dir(),
        "move_dir_contents destination {} is not a directory",
        dst.display()
    );

    for entry in
        std::fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))?
    {
        let entry = entry.with_context(|| format!("Failed to read {}", src.display()))?;
        let target = dst.join(entry.file_name());
        let status = Command::new("/bin/mv")
            .arg("--")
            .arg(entry.path())
            .arg(&target)
            .status()
            .with_context(|| format!("Failed to spawn mv for {}", entry.path().display()))?;
        ensure!(
            status.success(),
            "mv {} -> {} failed: {:?}",
            entry.path().display(),
            target.display(),
            status
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir, write};

    #[test]
    fn moves_all_entries() -> Result<()> {
        let src = tempfile::tempdir()?;
        let dst = tempfile::tempdir()?;

        write(src.path().join("a.txt"), "a")?;
        create_dir(src.path().join("sub"))?;
        write(src.path().join("sub").join("b.txt"), "b")?;

        move_dir_contents(src.path(), dst.path())?;

        assert_eq!(std::fs::read_to_string(dst.path().join("a.txt"))?, "a");
        assert_eq!(
            std::fs::read_to_string(dst.path().join("sub").join("b.txt"))?,
            "b"
        );
        assert_eq!(std::fs::read_dir(src.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn rejects_missing_destination() {
        let src = tempfile::tempdir().unwrap();
        let missing = src.path().join("does-not-exist");
        assert!(move_dir_contents(src.path(), &missing).is_err());
    }
}
