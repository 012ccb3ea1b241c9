// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// `<XPAK key>=[?]<output file>`: writes the named XPAK metadata value to a
/// host path, optionally tolerating a missing key.
#[derive(Clone, Debug)]
pub struct XpakSpec {
    pub xpak_header: String,
    pub target_path: PathBuf,
    pub optional: bool,
}

impl FromStr for XpakSpec {
    type Err = anyhow::Error;

    fn from_str(spec: &str) -> Result<Self> {
        let (header, rest) = spec
            .split_once('=')
            .with_context(|| format!("Invalid xpak spec (want <key>=<path>): {spec:?}"))?;
        if header.is_empty() {
            bail!("Invalid xpak spec, empty key: {spec:?}");
        }

        let (optional, target_path) = match rest.strip_prefix('?') {
            Some(path) => (true, path),
            None => (false, rest),
        };
        if target_path.is_empty() {
            bail!("Invalid xpak spec, empty output path: {spec:?}");
        }

        Ok(Self {
            xpak_header: header.to_string(),
            target_path: PathBuf::from(target_path),
            optional,
        })
    }
}

/// `<inside path>=<outside path>`: extracts a single file from the binary
/// package's tarball body and writes it to a host path.
#[derive(Clone, Debug)]
pub struct OutputFileSpec {
    pub inside_path: String,
    pub target_path: PathBuf,
}

impl FromStr for OutputFileSpec {
    type Err = anyhow::Error;

    fn from_str(spec: &str) -> Result<Self> {
        let (inside_path, target_path) = spec
            .split_once('=')
            .with_context(|| format!("Invalid output-file spec (want <in>=<out>): {spec:?}"))?;
        if inside_path.is_empty() || target_path.is_empty() {
            bail!("Invalid output-file spec, empty path: {spec:?}");
        }
        if !inside_path.starts_with('/') {
            bail!("Invalid output-file spec, inside path must be absolute: {spec:?}");
        }

        Ok(Self {
            inside_path: inside_path.to_string(),
            target_path: PathBuf::from(target_path),
        })
    }
}
