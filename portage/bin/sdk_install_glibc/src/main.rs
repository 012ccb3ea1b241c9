// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Installs a prebuilt glibc tarball into the SDK sysroot inside a
//! throwaway container, producing a durable tree of the resulting overlay.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use cliutil::cli_main;
use container::{enter_mount_namespace, BindMount, CommonArgs, ContainerSettings};
use durabletree::DurableTree;
use fileutil::resolve_symlink_forest;

use std::{path::PathBuf, process::ExitCode};

const MAIN_SCRIPT: &str = "/mnt/host/.sdk_install_glibc/setup.sh";

#[derive(Parser, Debug)]
#[clap()]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// A path to a directory where the output durable tree is written.
    #[arg(long, required = true)]
    output: PathBuf,

    /// A path to the prebuilt glibc binary package tarball to install.
    #[arg(long, required = true)]
    glibc_tarball: PathBuf,
}

fn do_main() -> Result<()> {
    let args = Cli::try_parse()?;

    let mut settings = ContainerSettings::new();
    settings.apply_common_args(&args.common)?;

    let r = runfiles::Runfiles::create()?;

    settings.push_bind_mount(BindMount {
        source: resolve_symlink_forest(&runfiles::rlocation!(
            r,
            "cros/bazel/portage/bin/sdk_install_glibc/setup.sh"
        ))?,
        mount_path: PathBuf::from(MAIN_SCRIPT),
        rw: false,
    });
    settings.push_bind_mount(BindMount {
        source: resolve_symlink_forest(&args.glibc_tarball)?,
        mount_path: PathBuf::from("/mnt/host/.sdk_install_glibc/glibc.tbz2"),
        rw: false,
    });

    let mut container = settings.prepare()?;

    let mut command = container.command(MAIN_SCRIPT);
    let status = command.status()?;
    ensure!(status.success(), "Command failed: {:?}", status);

    DurableTree::convert(&args.output)?;

    Ok(())
}

fn main() -> ExitCode {
    enter_mount_namespace().expect("Failed to enter a mount namespace");
    cli_main(do_main, Default::default())
}
