// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, ensure, Context, Result};

/// The name of the environment variable controlling whether to regenerate
/// golden data.
const REGENERATE_VAR_NAME: &str = "ALCHEMY_REGENERATE_GOLDEN";

fn is_running_under_bazel() -> bool {
    std::option_env!("CARGO_MAKEFLAGS").is_none()
}

// Renames output files as required to ensure that bazel doesn't interpret them as bazel packages.
fn rename_bazel_special_files(dir: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.file_name() == Some(std::ffi::OsStr::new("BUILD.bazel")) {
            std::fs::rename(path, path.with_file_name("BUILD.golden.bazel"))?;
        }
    }
    Ok(())
}

fn compute_real_golden_path(golden: &Path, regenerate: bool) -> Result<PathBuf> {
    if is_running_under_bazel() {
        ensure!(
            golden.is_relative(),
            "Golden path must be relative under Bazel! \
            See the description of compare_with_golden_data."
        );
        if regenerate {
            // When regenerating under Bazel, we have to write to the real
            // directory under the workspace tree.
            let workspace_dir =
                PathBuf::from(std::env::var_os("BUILD_WORKSPACE_DIRECTORY").context(
                    "BUILD_WORKSPACE_DIRECTORY is not set; run tests with \"bazel run\"",
                )?);
            return Ok(workspace_dir.join(golden));
        }
    }
    Ok(golden.to_owned())
}

/// Compares contents of the two directories and returns an error if there is
/// any mismatch.
///
/// When this function is called from tests running under Bazel, the golden
/// directory path must be a relative path. Bazel sets up the initial current
/// directory for tests to the associated runfiles directory, so you should be
/// able to refer to Git-committed golden data simply in relative paths.
///
/// # Updating golden data
///
/// This function updates the golden data with the output data if the
/// environment variable `ALCHEMY_REGENERATE_GOLDEN` is set to a non-empty
/// value.
///
/// When tests are run under Bazel with `bazel test`, it is impossible to
/// automatically update golden data due to the Bazel sandbox. Use `bazel run`
/// instead, e.g.
///
/// ```sh
/// ALCHEMY_REGENERATE_GOLDEN=1 bazel run :foo_test
/// ```
///
/// When tests are run under Cargo, you can just pass the environment variable
/// to `cargo test`.
///
/// ```sh
/// ALCHEMY_REGENERATE_GOLDEN=1 cargo test
/// ```
pub fn compare_with_golden_data(output: &Path, golden: &Path) -> Result<()> {
    let regenerate = std::env::var(REGENERATE_VAR_NAME).unwrap_or_default() != "";
    let real_golden = &compute_real_golden_path(golden, regenerate)?;

    if output.is_dir() {
        rename_bazel_special_files(output)?;
    }

    if regenerate {
        if real_golden.is_dir() {
            std::fs::remove_dir_all(real_golden)?;
        } else if real_golden.is_file() {
            std::fs::remove_file(real_golden)?;
        } else {
            ensure!(!real_golden.try_exists()?, "Unknown file type");
        }
        let status = Command::new("cp")
            .args(["--recursive", "--dereference", "--"])
            .arg(output)
            .arg(real_golden)
            .status()?;
        ensure!(
            status.success(),
            "Failed to update golden data: {:?}",
            status
        );
    } else {
        let status = Command::new("diff")
            .args(["-Naru", "--"])
            .arg(output)
            .arg(real_golden)
            .status()?;
        if !status.success() {
            // Print a friendly instruction if we're running under Bazel.
            if let Ok(bazel_target) = std::env::var("TEST_TARGET") {
                bail!(
                    "Found mismatch with golden data; \
                    consider regenerating them with: ALCHEMY_REGENERATE_GOLDEN=1 bazel run {}",
                    bazel_target,
                )
            } else {
                bail!("Found mismatch with golden data");
            }
        }
    }
    Ok(())
}
