// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, ensure, Context, Result};
use itertools::Itertools;
use nix::mount::{mount, umount2, MntFlags, MsFlags};

fn ensure_dir_is_empty(dir: &Path) -> Result<()> {
    match std::fs::read_dir(dir)?.next() {
        None => Ok(()),
        Some(Ok(entry)) => bail!(
            "{} is not empty: {} exists",
            dir.display(),
            entry.file_name().to_string_lossy()
        ),
        Some(Err(e)) => Err(e.into()),
    }
}

/// Unmounts an mount point on drop.
#[must_use]
pub(crate) struct MountGuard {
    dir: Option<PathBuf>,
}

impl MountGuard {
    fn new(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
        }
    }

    // Forgets this mount point. After calling this method, it is your responsibility to unmount it.
    // It is often safe to use this method, e.g. when this mount point is under another mount point
    // and you're sure it's unmounted recursively.
    pub(crate) fn leak(mut self) {
        self.dir = None;
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            umount2(&dir, MntFlags::MNT_DETACH).expect("Failed to unmount");
        }
    }
}

/// Bind-mounts given paths.
pub(crate) fn bind_mount(old_dir: &Path, new_dir: &Path) -> Result<MountGuard> {
    mount(
        Some(old_dir),
        new_dir,
        Some(""),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        Some(""),
    )
    .with_context(|| {
        format!(
            "Bind-mounting {} to {} failed",
            old_dir.display(),
            new_dir.display()
        )
    })?;
    Ok(MountGuard::new(new_dir))
}

pub(crate) fn remount_readonly(path: &Path) -> Result<()> {
    mount(
        Some(""),
        path,
        Some(""),
        MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
        Some(""),
    )
    .with_context(|| format!("Failed remounting {} as read-only", path.display()))?;
    Ok(())
}

/// Mounts overlayfs at the specified path.
///
/// `scratch_dir` should point to an empty directory where the function will
/// create arbitrary files/directories needed to mount overlayfs. The directory
/// must be on the same file system as the upper directory as an overlayfs work
/// directory is allocated there. Callers must remove the directory *after*
/// unmounting the overlayfs by dropping the returned [`MountGuard`].
pub(crate) fn mount_overlayfs(
    mount_dir: &Path,
    lower_dirs: &[&Path],
    upper_dir: &Path,
    scratch_dir: &Path,
) -> Result<MountGuard> {
    ensure_dir_is_empty(scratch_dir)?;
    ensure!(
        !lower_dirs.is_empty(),
        "Mounting overlayfs with zero lower directories is not supported"
    );

    let lowers_dir = scratch_dir.join("lowers");
    let work_dir = scratch_dir.join("work");

    let mut dir_builder = std::fs::DirBuilder::new();
    dir_builder.recursive(true).mode(0o755);

    for dir in [&lowers_dir, &work_dir] {
        dir_builder.create(dir)?;
    }

    // Bind-mount lower directories so we can refer to them in overlayfs options
    // in very short file paths because the maximum length of option strings for
    // mount(2) is constrained.
    let mut short_lower_dirs: Vec<String> = Vec::new();
    let mut lower_dir_bind_mount_guards: Vec<MountGuard> = Vec::new();

    for (i, lower_dir) in lower_dirs.iter().enumerate() {
        let name = i.to_string();
        let path = lowers_dir.join(&name);

        dir_builder.create(&path)?;
        let guard = bind_mount(lower_dir, &path)?;

        short_lower_dirs.push(name);
        lower_dir_bind_mount_guards.push(guard);
    }

    // overlayfs fails to mount if there are 500+ lower layers. Check the
    // condition in advance for better diagnostics.
    ensure!(
        short_lower_dirs.len() <= 500,
        "Too many overlayfs lower dirs ({} > 500)",
        short_lower_dirs.len()
    );

    let overlay_options = format!(
        "upperdir={},workdir={},lowerdir={}",
        upper_dir.display(),
        work_dir.display(),
        // Overlayfs option treats the first lower directory as the least lower
        // directory, while we order filesystem layers in the opposite order.
        short_lower_dirs.into_iter().rev().join(":")
    );

    // Mount overlayfs via overlayfs_mount_helper.
    // We don't call mount(2) directly because it requires us to change the
    // working directory of the current process, which introduces tricky issues
    // in multi-threaded programs, including unit tests.
    let runfiles = runfiles::Runfiles::create()?;
    let helper_path = runfiles
        .rlocation("cros/bazel/portage/bin/overlayfs_mount_helper/overlayfs_mount_helper")
        .canonicalize()?;
    let status = Command::new(helper_path)
        .arg(overlay_options)
        .arg(mount_dir)
        .current_dir(&lowers_dir)
        .status()?;
    ensure!(status.success(), "Failed to mount overlayfs: {:?}", status);
    let overlayfs_mount_guard = MountGuard::new(mount_dir);

    Ok(overlayfs_mount_guard)
}
