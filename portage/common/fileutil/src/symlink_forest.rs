// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Resolves a possible "symlink forest" directory to the real directory it
/// mirrors.
///
/// A layer or input directory handed to us by the build system is
/// sometimes not a real directory at all, but a tree of symlinks mirroring
/// some other real directory's layout (the shape a sandboxed build's
/// runfiles tree takes). Bind-mounting the forest itself into a container
/// doesn't work: its symlinks point outside the forest, to host paths that
/// won't exist once the mount namespace is set up. This walks one entry of
/// the tree, follows its symlink target, and recovers the real directory
/// the forest mirrors by stripping the entry's path (relative to the
/// forest root) from the end of its resolved target. A directory that
/// isn't a symlink forest at all — every entry already lives for real
/// under `path` — resolves to itself.
pub fn resolve_symlink_forest(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize {}", path.display()))?;

    if !root.is_dir() {
        return Ok(root);
    }

    for entry in WalkDir::new(&root).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let rel = entry
            .path()
            .strip_prefix(&root)
            .expect("WalkDir yields paths under its root");
        let depth = rel.components().count();

        let target = entry
            .path()
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", entry.path().display()))?;

        if let Some(real_root) = target.ancestors().nth(depth) {
            if real_root.join(rel) == target {
                return Ok(real_root.to_path_buf());
            }
        }
    }

    Ok(root)
}
