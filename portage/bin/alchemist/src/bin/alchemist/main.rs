// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod alchemist;
mod digest_repo;
mod dump_package;
mod dump_profile;
mod ver_rs;

use std::process::ExitCode;

use crate::alchemist::alchemist_main;
use clap::{Parser, Subcommand};
use ver_rs::ver_rs_main;
use ver_test::ver_test_main;

#[derive(Parser, Debug)]
#[command(multicall(true))]
struct Cli {
    #[clap(subcommand)]
    executables: Executables,
}

#[derive(Subcommand, Debug)]
enum Executables {
    Alchemist(alchemist::Args),

    #[command(name = "ver_rs")] // Otherwise we get ver-rs
    VerRs(ver_rs::Args),

    #[command(name = "ver_test")] // Otherwise we get ver-test
    VerTest(ver_test::Args),
}

fn report_error(err: anyhow::Error) -> ExitCode {
    eprintln!("ERROR: {:?}", err);
    if std::env::var("RUST_BACKTRACE").is_err() {
        eprintln!("Hint: Set RUST_BACKTRACE=1 to print stack traces");
    }
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    match Cli::parse().executables {
        // ver_test reports a boolean test result as its exit code rather
        // than an application error, so it's threaded through separately
        // from the other two subcommands, which always exit 0 unless
        // something actually failed.
        Executables::VerTest(args) => match ver_test_main(args) {
            Ok(code) => code,
            Err(err) => report_error(err),
        },
        Executables::Alchemist(args) => match alchemist_main(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => report_error(err),
        },
        Executables::VerRs(args) => match ver_rs_main(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => report_error(err),
        },
    }
}
