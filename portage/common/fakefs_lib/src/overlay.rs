// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The on-disk override record: a small fixed-width blob stored in a single
//! extended attribute per path, recording the uid/gid a path should appear
//! to be owned by.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Name of the extended attribute that carries an [`Override`].
pub const OVERRIDE_XATTR: &str = "user.fakefs.override";

const RECORD_LEN: usize = 9;
const FLAG_SYMLINK: u8 = 1 << 0;

/// An overridden owner recorded for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Override {
    pub uid: u32,
    pub gid: u32,
    /// True if the override target is a symlink, so callers know to use the
    /// `l`-prefixed xattr calls (`lgetxattr`/`lsetxattr`) to reach it rather
    /// than the attribute of whatever the symlink points to.
    pub is_symlink: bool,
}

impl Override {
    fn to_bytes(self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..4].copy_from_slice(&self.uid.to_le_bytes());
        buf[4..8].copy_from_slice(&self.gid.to_le_bytes());
        buf[8] = if self.is_symlink { FLAG_SYMLINK } else { 0 };
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != RECORD_LEN {
            bail!(
                "fakefs override xattr has unexpected length {} (want {})",
                buf.len(),
                RECORD_LEN
            );
        }
        Ok(Self {
            uid: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            gid: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            is_symlink: buf[8] & FLAG_SYMLINK != 0,
        })
    }
}

/// Reads the override recorded for `path`, if any.
pub fn read_override(path: &Path) -> Result<Option<Override>> {
    let raw = match xattr::get(path, OVERRIDE_XATTR)
        .with_context(|| format!("reading fakefs override xattr of {}", path.display()))?
    {
        Some(raw) => raw,
        None => return Ok(None),
    };
    Ok(Some(Override::from_bytes(&raw)?))
}

/// Records `overlay` as the override for `path`, replacing any existing one.
pub fn write_override(path: &Path, overlay: Override) -> Result<()> {
    xattr::set(path, OVERRIDE_XATTR, &overlay.to_bytes())
        .with_context(|| format!("writing fakefs override xattr of {}", path.display()))
}

/// Removes any override recorded for `path`. A missing xattr is not an
/// error.
pub fn clear_override(path: &Path) -> Result<()> {
    match xattr::remove(path, OVERRIDE_XATTR) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("clearing fakefs override xattr of {}", path.display()))
        }
    }
}

/// `(uid_t)-1`/`(gid_t)-1` as `chown(2)` and friends represent "leave this
/// half of the pair alone".
const KEEP_ID: u32 = u32::MAX;

/// Applies a `chown`/`lchown`/`fchown`/`fchownat`-shaped request to `path`
/// by recording (or updating) its fakefs override, honoring [`KEEP_ID`] for
/// either half of the pair. Shared by the ptrace supervisor's authoritative
/// path and `fakefs_preload`'s direct fast path so the two can never
/// disagree about how a partial chown merges with what's already there.
pub fn apply_chown(path: &Path, uid: u32, gid: u32, is_symlink: bool) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let previous = read_override(path)?;
    let real = std::fs::symlink_metadata(path).ok();
    let keep_uid = || {
        previous
            .map(|o| o.uid)
            .or_else(|| real.as_ref().map(|m| m.uid()))
            .unwrap_or(0)
    };
    let keep_gid = || {
        previous
            .map(|o| o.gid)
            .or_else(|| real.as_ref().map(|m| m.gid()))
            .unwrap_or(0)
    };
    write_override(
        path,
        Override {
            uid: if uid == KEEP_ID { keep_uid() } else { uid },
            gid: if gid == KEEP_ID { keep_gid() } else { gid },
            is_symlink,
        },
    )
}
