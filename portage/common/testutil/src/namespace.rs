// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A standalone copy of `container::enter_mount_namespace`'s namespace-entry
//! logic, usable as an `.init_array` constructor from test binaries.
//!
//! This crate can't depend on `container` (several of `container`'s own
//! tests depend on `testutil`, so the reverse would be circular), and an
//! `.init_array` constructor must be a bare `extern "C" fn()` that runs
//! before `main` — too early to propagate a `Result` anywhere — so this
//! uses raw `libc` calls directly instead of `nix`'s typed wrappers (kept as
//! a dev-dependency here, since nothing else in this crate's public API
//! needs it).

use std::ffi::CString;
use std::io;

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn ensure_single_threaded() -> io::Result<()> {
    let count = std::fs::read_dir("/proc/self/task")?.count();
    if count != 1 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "the current process is multi-threaded",
        ));
    }
    Ok(())
}

fn enter_unprivileged_user_namespace() -> io::Result<()> {
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    check(unsafe { libc::unshare(libc::CLONE_NEWUSER) })?;
    std::fs::write("/proc/self/setgroups", "deny")?;
    std::fs::write("/proc/self/uid_map", format!("0 {uid} 1\n"))?;
    std::fs::write("/proc/self/gid_map", format!("0 {gid} 1\n"))?;
    Ok(())
}

fn enter_mount_namespace() -> io::Result<()> {
    ensure_single_threaded()?;

    let ret = unsafe { libc::unshare(libc::CLONE_NEWNS) };
    if ret == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) {
        // Unprivileged: fall back to an unprivileged user namespace, inside
        // which we're root and can unshare the mount namespace too.
        enter_unprivileged_user_namespace()?;
        check(unsafe { libc::unshare(libc::CLONE_NEWNS) })?;
    } else {
        check(ret)?;
    }

    // Remount everything as private so nothing we do leaks back to the
    // namespace this process started in.
    let root = CString::new("/").unwrap();
    let empty = CString::new("").unwrap();
    check(unsafe {
        libc::mount(
            empty.as_ptr(),
            root.as_ptr(),
            empty.as_ptr(),
            (libc::MS_PRIVATE | libc::MS_REC) as libc::c_ulong,
            std::ptr::null(),
        )
    })?;

    Ok(())
}

/// Enters a mount namespace (and, if unprivileged, a user namespace first)
/// before `main` runs.
///
/// Several tests across this workspace need capabilities only available as
/// the root user of a fresh namespace — chowning files, mounting tmpfs —
/// which an ordinary unprivileged test process doesn't have on the host.
/// Registering this as an `.init_array` constructor (`#[used]
/// #[link_section = ".init_array"] static _CTOR: extern "C" fn() =
/// testutil::ctor_enter_mount_namespace;`) runs it once, before any test
/// thread exists, which is required: entering a user namespace from a
/// multi-threaded process always fails.
pub extern "C" fn ctor_enter_mount_namespace() {
    if let Err(e) = enter_mount_namespace() {
        eprintln!("Failed to enter a mount namespace for tests: {e}");
        std::process::abort();
    }
}
