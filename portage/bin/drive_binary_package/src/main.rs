// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs a merged package's `pkg_setup`/`pkg_preinst`/`pkg_postinst`/
//! `pkg_prerm`/`pkg_postrm` phase hooks against the `environment.raw` saved
//! in its VDB entry, the way Portage does once a binary package's contents
//! have already been extracted onto disk.

use std::{
    ffi::OsString,
    fs,
    path::PathBuf,
    process::{Command, ExitCode},
};

use anyhow::{bail, ensure, Context, Result};
use vdb::get_vdb_dir;

const PRELUDE: &str = include_str!("drive_binary_package_prelude.sh");

const KNOWN_PHASES: &[&str] = &["setup", "unpack", "preinst", "postinst", "prerm", "postrm"];

struct Args {
    root_dir: PathBuf,
    image_dir: PathBuf,
    temp_dir: PathBuf,
    cpf: String,
    no_clobber: bool,
    phases: Vec<String>,
}

impl Args {
    fn parse(raw: impl IntoIterator<Item = OsString>) -> Result<Self> {
        let mut root_dir = None;
        let mut image_dir = None;
        let mut temp_dir = None;
        let mut cpf = None;
        let mut no_clobber = false;
        let mut phases = Vec::new();

        let mut it = raw.into_iter();
        while let Some(arg) = it.next() {
            let arg = arg
                .into_string()
                .map_err(|s| anyhow::anyhow!("INTERNAL ERROR: argument {s:?} is not UTF-8"))?;
            match arg.as_str() {
                "-r" => root_dir = Some(PathBuf::from(next_value(&mut it, "-r")?)),
                "-d" => image_dir = Some(PathBuf::from(next_value(&mut it, "-d")?)),
                "-t" => temp_dir = Some(PathBuf::from(next_value(&mut it, "-t")?)),
                "-p" => cpf = Some(next_value(&mut it, "-p")?),
                "-n" => no_clobber = true,
                _ if arg.starts_with('-') => {
                    bail!("INTERNAL ERROR: unrecognized option {arg:?}");
                }
                _ => phases.push(arg),
            }
        }

        for phase in &phases {
            ensure!(
                KNOWN_PHASES.contains(&phase.as_str()),
                "INTERNAL ERROR: unknown phase {phase:?}"
            );
        }

        Ok(Self {
            root_dir: root_dir.context("INTERNAL ERROR: -r ROOT is required")?,
            image_dir: image_dir.context("INTERNAL ERROR: -d IMAGE is required")?,
            temp_dir: temp_dir.context("INTERNAL ERROR: -t TEMP is required")?,
            cpf: cpf.context("INTERNAL ERROR: -p CPF is required")?,
            no_clobber,
            phases,
        })
    }
}

fn next_value(it: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<String> {
    let value = it
        .next()
        .with_context(|| format!("INTERNAL ERROR: {flag} requires a value"))?;
    value
        .into_string()
        .map_err(|s| anyhow::anyhow!("INTERNAL ERROR: value {s:?} for {flag} is not UTF-8"))
}

/// Builds the bash script that runs the requested phases and then dumps the
/// resulting environment, and returns it together with the path it will be
/// dumped to.
fn build_script(args: &Args, environment: &str) -> (String, PathBuf) {
    let output_path = args.temp_dir.join(format!(
        "drive_binary_package.{}.environment",
        std::process::id()
    ));

    let mut script = String::new();
    script.push_str(PRELUDE);
    script.push('\n');
    script.push_str(environment);
    script.push('\n');
    for phase in &args.phases {
        script.push_str(&format!("run_phase_if_defined pkg_{phase}\n"));
    }
    script.push_str("__xbuild_dump_environment\n");

    (script, output_path)
}

fn run(args: &Args) -> Result<()> {
    let vdb_dir = get_vdb_dir(&args.root_dir, &args.cpf);
    let environment_path = vdb_dir.join("environment.raw");
    let environment = fs::read_to_string(&environment_path)
        .with_context(|| format!("failed to read {}", environment_path.display()))?;

    let (script, output_path) = build_script(args, &environment);

    let script_path = args
        .temp_dir
        .join(format!("drive_binary_package.{}.sh", std::process::id()));
    fs::write(&script_path, &script)
        .with_context(|| format!("failed to write {}", script_path.display()))?;

    let status = Command::new("/bin/bash")
        .arg(&script_path)
        .env_clear()
        .env("PATH", "/usr/bin:/bin")
        .env("ROOT", &args.root_dir)
        .env("D", &args.image_dir)
        .env("__xbuild_out_environment", &output_path)
        .status()
        .context("failed to spawn bash")?;
    ensure!(status.success(), "phase hooks exited with {status}");

    if !args.no_clobber {
        let new_environment = fs::read_to_string(&output_path)
            .context("failed to read back the updated environment")?;
        fs::write(&environment_path, new_environment)
            .with_context(|| format!("failed to write {}", environment_path.display()))?;
    }

    let _ = fs::remove_file(&script_path);
    let _ = fs::remove_file(&output_path);

    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::parse(std::env::args_os().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err:?}");
            return ExitCode::FAILURE;
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        }
    }
}
