// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use binarypackage::BinaryPackage;
use bzip2::read::BzDecoder;
use clap::Parser;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

fn use_flag_arg_parser(
    value: &str,
) -> std::result::Result<HashMap<String, bool>, clap::error::Error> {
    if value.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(value
        .split(',')
        .map(|flag| {
            if let Some(flag) = flag.strip_prefix('+') {
                (flag.to_string(), true)
            } else if let Some(flag) = flag.strip_prefix('-') {
                (flag.to_string(), false)
            } else {
                (flag.to_string(), true)
            }
        })
        .collect())
}

/// Performs validations on a binpkg.
#[derive(Parser, Debug, PartialEq, Eq)]
pub struct ValidatePackageArgs {
    /// Portage binary packages to validate
    #[arg(long)]
    package: PathBuf,

    /// Comma separated list of USE flags the package should have been built with.
    #[arg(
        long,
        value_parser = use_flag_arg_parser,
    )]
    use_flags: Option<HashMap<String, bool>>,

    /// Bazel requires a file to be generated for all actions
    #[arg(long, hide = true)]
    touch: Option<PathBuf>,

    /// Checks if the environment has non-hermetic variables declared.
    /// e.g., MAKEOPTS, SRANDOM, etc.
    #[arg(long)]
    check_non_hermetic_variables: bool,

    /// Do not exit abnormally on finding package differences
    #[arg(long)]
    report_only: bool,
}

/// Returns a set of the USE flags that were enabled when the package was built.
/// This doesn't include any flags that were disabled.
fn extract_use_flags(package: &binarypackage::BinaryPackage) -> Result<HashSet<&str>> {
    let use_flags = std::str::from_utf8(
        package
            .xpak()
            .get("USE")
            .context("USE XPAK entry not found")?,
    )?;

    Ok(use_flags.split_whitespace().collect())
}

/// Returns a set of all possible USE flags that could have been enabled
/// when the package was built.
fn extract_iuse_effective_flags(package: &binarypackage::BinaryPackage) -> Result<HashSet<&str>> {
    let use_flags = std::str::from_utf8(
        package
            .xpak()
            .get("IUSE_EFFECTIVE")
            .context("IUSE_EFFECTIVE XPAK entry not found")?,
    )?;

    Ok(use_flags.split_whitespace().collect())
}

fn extract_environment(pkg: &BinaryPackage) -> Result<String> {
    let bz2_env = pkg
        .xpak()
        .get("environment.bz2")
        .context("Failed to locate environment.bz2")?;

    let mut decoder = BzDecoder::new(bz2_env.as_slice());

    let mut env = String::new();
    decoder
        .read_to_string(&mut env)
        .context("Failed to decompress environment.bz2")?;

    Ok(env)
}

/// Inspects the environment for a `declare VARIABLE` statement and returns it.
///
/// This function only tries to be best effort. It doesn't try and parse
/// bash functions.
fn contains_declare<'a>(env: &'a str, var: &str) -> Option<&'a str> {
    lazy_static! {
        static ref RE: Regex =
            Regex::new(r"(?m)^declare(:?\s+-[\w\-]+)?\s+([\w_]+)(?:=.*$|$)").unwrap();
    }

    RE.captures_iter(env)
        .find(|c| &c[2] == var)
        .map(|c| c.get(0).unwrap().as_str())
}

fn validate_env(package: &BinaryPackage) -> Result<()> {
    let env = extract_environment(package)?;

    let errors = [
        "EPOCHREALTIME",
        "EPOCHSECONDS",
        "GCE_METADATA_HOST",
        "MAKEOPTS",
        "NINJAOPTS",
        "REPROXY_CFG_FILE",
        "SRANDOM",
        "USE_REMOTEEXEC",
    ]
    .into_iter()
    .filter_map(|var| {
        contains_declare(&env, var).map(|declare_line| {
            format!(
                "Found non hermetic variable {} in environment.bz2: {}",
                var, declare_line
            )
        })
    })
    .collect_vec();

    if errors.is_empty() {
        Ok(())
    } else {
        bail!(errors.join("\n"))
    }
}

pub fn do_validate_package(args: ValidatePackageArgs) -> Result<()> {
    let package =
        BinaryPackage::open(&args.package).with_context(|| format!("{:?}", args.package))?;

    // Reports a validation error. If --report-only is set, it just prints the error to stdout and
    // return success. Otherwise, it returns an error value with the given message.
    let report = |message: std::fmt::Arguments| -> Result<()> {
        if args.report_only {
            println!("{}", message);
            return Ok(());
        }
        bail!("{}", message)
    };

    if let Some(input_use_flags) = args.use_flags {
        let actual_use_flags = extract_use_flags(&package)?;
        let expected_use_flags = input_use_flags
            .iter()
            .filter_map(|(k, v)| v.then_some(k.as_ref()))
            .collect();

        if actual_use_flags != expected_use_flags {
            report(format_args!(
                "\n* USE Flag mismatch!\n  \
                Expected USE: {}\n  \
                Actual USE: {}\n  \
                Extra flags: {}\n  \
                Missing flags: {}\n  \
                ",
                expected_use_flags.iter().sorted().join(", "),
                actual_use_flags.iter().sorted().join(", "),
                actual_use_flags
                    .difference(&expected_use_flags)
                    .sorted()
                    .join(", "),
                expected_use_flags
                    .difference(&actual_use_flags)
                    .sorted()
                    .join(", "),
            ))?;
        }

        let actual_iuse_effective_flags = extract_iuse_effective_flags(&package)?;
        let expected_iuse_effective_flags = input_use_flags.keys().map(|k| k.as_ref()).collect();

        if actual_iuse_effective_flags != expected_iuse_effective_flags {
            report(format_args!(
                "\n* IUSE Flag mismatch!\n  \
                Expected IUSE: {}\n  \
                Actual IUSE: {}\n  \
                Extra flags: {}\n  \
                Missing flags: {}\n  \
                ",
                expected_iuse_effective_flags.iter().sorted().join(", "),
                actual_iuse_effective_flags.iter().sorted().join(", "),
                actual_iuse_effective_flags
                    .difference(&expected_iuse_effective_flags)
                    .sorted()
                    .join(", "),
                expected_iuse_effective_flags
                    .difference(&actual_iuse_effective_flags)
                    .sorted()
                    .join(", "),
            ))?;
        }
    }

    if args.check_non_hermetic_variables {
        if let Err(env_error) = validate_env(&package) {
            report(format_args!("{}", env_error))?;
        }
    }

    if let Some(touch) = args.touch {
        File::create(&touch).with_context(|| format!("touch file: {touch:?}"))?;
    }

    Ok(())
}
