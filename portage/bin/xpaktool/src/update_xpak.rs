// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use binarypackage::BinaryPackage;
use clap::Parser;
use std::path::PathBuf;

/// Parse a single key-value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    s.split_once('=')
        .with_context(|| format!("Invalid key-value: {:?}", s))
        .map(|(k, v)| (k.to_string(), v.to_string()))
}

/// Compares two packages.
#[derive(Parser, PartialEq, Eq, Debug)]
pub struct UpdateXpakArgs {
    /// Portage binary package to update.
    #[arg(long)]
    binpkg: PathBuf,

    /// Values to override. Format: key=value.
    /// Note: value must be valid UTF-8.
    #[arg(value_parser = parse_key_val)]
    values: Vec<(String, String)>,
}

pub fn do_update_xpak(args: UpdateXpakArgs) -> Result<()> {
    let pkg = BinaryPackage::open(&args.binpkg).with_context(|| format!("{:?}", args.binpkg))?;

    let mut xpak = pkg.xpak().clone();

    for (k, v) in args.values {
        xpak.insert(k, v.into_bytes());
    }

    pkg.replace_xpak(&xpak)?;

    Ok(())
}
