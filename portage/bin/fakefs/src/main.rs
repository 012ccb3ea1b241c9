// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use clap::Parser;
use cliutil::{cli_main, handle_top_level_result, log_current_command_line};
use fakefs_lib::Supervisor;
use nix::sys::signal::{raise, Signal};
use nix::unistd::execvp;
use processes::status_to_exit_code;
use std::ffi::CString;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

#[derive(Parser, Debug)]
#[clap(trailing_var_arg = true)]
struct Cli {
    /// Logs every traced syscall instead of just setup/teardown.
    #[arg(long)]
    verbose: bool,

    /// An LD_PRELOAD shared object to inject into the traced command, i.e.
    /// fakefs_preload's cdylib output.
    #[arg(long)]
    preload: Option<PathBuf>,

    /// Marks this process as the re-exec'd tracee. Never set this directly;
    /// fakefs sets it on the child it spawns for itself to seize.
    #[arg(long, hide = true)]
    tracee: bool,

    /// The command to run under the interceptor, after `--`.
    #[arg(required = true)]
    cmd: Vec<String>,
}

pub fn main() -> ExitCode {
    let args = Cli::parse();

    if args.verbose && std::env::var_os("RUST_LOG").is_none() {
        // `LoggingConfig::from_env` reads RUST_LOG; --verbose is just a
        // friendlier spelling of setting it to a broader filter, letting
        // the supervisor's trace!()/warn!() lines (normally filtered out)
        // surface.
        std::env::set_var("RUST_LOG", "debug");
    }

    if args.tracee {
        cli_main(|| run_tracee(args), Default::default())
    } else {
        let _guard = cliutil::LoggingConfig::from_env().unwrap().setup().unwrap();
        log_current_command_line();
        handle_top_level_result(run_supervisor(args))
    }
}

/// The original, un-seized process: spawns a copy of itself as the tracee,
/// seizes it once it has stopped itself, then drives the ptrace event loop
/// to completion and propagates the tracee's final exit status.
fn run_supervisor(args: Cli) -> Result<ExitCode> {
    let exe = std::env::current_exe().context("resolving fakefs's own executable path")?;

    let mut tracee_cmd = Command::new(&exe);
    tracee_cmd.arg("--tracee");
    if args.verbose {
        tracee_cmd.arg("--verbose");
    }
    if let Some(preload) = &args.preload {
        tracee_cmd.arg("--preload").arg(preload);
    }
    tracee_cmd.arg("--").args(&args.cmd);

    let child = tracee_cmd
        .spawn()
        .with_context(|| format!("spawning tracee {:?}", args.cmd))?;

    let supervisor = Supervisor::seize(&child).context("seizing the tracee")?;
    let status = supervisor
        .run_to_completion()
        .context("running the ptrace supervisor loop")?;

    Ok(status_to_exit_code(&status))
}

/// The re-exec'd tracee: stops itself so the parent can seize it with no
/// race against its first syscall, then (once resumed) execs the real
/// command, optionally injecting `LD_PRELOAD` for `fakefs_preload` first.
fn run_tracee(args: Cli) -> Result<ExitCode> {
    raise(Signal::SIGSTOP).context("stopping before being seized")?;

    if let Some(preload) = &args.preload {
        std::env::set_var("LD_PRELOAD", preload);
    }

    let program =
        CString::new(args.cmd[0].clone()).context("command name contains a NUL byte")?;
    let argv = args
        .cmd
        .iter()
        .map(|s| CString::new(s.clone()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("argument contains an embedded NUL byte")?;

    // execvp replaces this process image; on success it never returns.
    execvp(&program, &argv).with_context(|| format!("exec of {:?} failed", args.cmd))?;
    unreachable!("execvp returned without replacing the process image");
}
