// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! `LD_PRELOAD`ed interposers for the libc entry points fakefs needs to
//! fake: the `stat` family and the `chown` family.
//!
//! Every exported symbol here runs *inside* the tracee's own address space,
//! so it can patch a caller's output buffer directly with no IPC at all.
//! `chown`/`lchown`/`fchown`/`fchownat` never touch the real syscall: they
//! record the override locally (`setxattr`/`getxattr` aren't on the ptrace
//! supervisor's trace list, so this needs no cooperation from it) and
//! report success. `stat`/`lstat`/`fstat`/`fstatat`/`statx` still need the
//! kernel's real answer, so they call through to the real libc symbol —
//! but first arm the supervisor's one-shot suppression via the backdoor
//! syscall (see `fakefs_lib::BACKDOOR_SYSCALL`) so it skips its own,
//! redundant xattr lookup for the syscall this function is about to issue.
//!
//! Falls back to the real libc function whenever anything about the fast
//! path doesn't apply (no override recorded, path can't be resolved, …),
//! leaving the ptrace supervisor as the sole authority for that call.

use fakefs_lib::overlay;
use fakefs_lib::{BackdoorRequest, BACKDOOR_KEY, BACKDOOR_SYSCALL};
use libc::{c_char, c_int, c_long};
use once_cell::sync::OnceCell;
use std::ffi::CStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

fn resolve_real<F: Copy>(cell: &OnceCell<F>, name: &'static str) -> F {
    *cell.get_or_init(|| unsafe {
        let cname = std::ffi::CString::new(name).unwrap();
        let sym = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
        if sym.is_null() {
            // A missing symbol means this preload is loaded into a process
            // that doesn't actually link libc's copy of it, which should
            // never happen for these names; fail loudly rather than
            // segfault through a null function pointer later.
            libc::abort();
        }
        std::mem::transmute_copy(&sym)
    })
}

macro_rules! real_fn {
    ($name:literal, $ty:ty) => {{
        static CELL: OnceCell<$ty> = OnceCell::new();
        resolve_real(&CELL, $name)
    }};
}

type StatFn = unsafe extern "C" fn(*const c_char, *mut libc::stat) -> c_int;
type FstatFn = unsafe extern "C" fn(c_int, *mut libc::stat) -> c_int;
type FstatatFn = unsafe extern "C" fn(c_int, *const c_char, *mut libc::stat, c_int) -> c_int;
type StatxFn =
    unsafe extern "C" fn(c_int, *const c_char, c_int, libc::c_uint, *mut libc::statx) -> c_int;
type ChownFn = unsafe extern "C" fn(*const c_char, libc::uid_t, libc::gid_t) -> c_int;
type FchownFn = unsafe extern "C" fn(c_int, libc::uid_t, libc::gid_t) -> c_int;
type FchownatFn =
    unsafe extern "C" fn(c_int, *const c_char, libc::uid_t, libc::gid_t, c_int) -> c_int;

fn real_stat() -> StatFn {
    real_fn!("stat", StatFn)
}
fn real_lstat() -> StatFn {
    real_fn!("lstat", StatFn)
}
fn real_fstat() -> FstatFn {
    real_fn!("fstat", FstatFn)
}
fn real_fstatat() -> FstatatFn {
    real_fn!("fstatat", FstatatFn)
}
fn real_statx() -> StatxFn {
    real_fn!("statx", StatxFn)
}
fn real_chown() -> ChownFn {
    real_fn!("chown", ChownFn)
}
fn real_lchown() -> ChownFn {
    real_fn!("lchown", ChownFn)
}
fn real_fchown() -> FchownFn {
    real_fn!("fchown", FchownFn)
}
fn real_fchownat() -> FchownatFn {
    real_fn!("fchownat", FchownatFn)
}

fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

/// Arms the supervisor's one-shot suppression for the next matching
/// stat-family syscall this thread issues. The path bytes must stay valid
/// (i.e. be the caller's own, still-live buffer) across this call, since
/// the supervisor reads them out of our address space via
/// `process_vm_readv` while we're stopped at the backdoor syscall.
fn arm_stat_suppression(path: &[u8]) {
    let mut request = BackdoorRequest {
        path_ptr: path.as_ptr() as u64,
        path_len: path.len() as u64,
        applied: 0,
        uid: 0,
        gid: 0,
    };
    unsafe {
        libc::syscall(
            BACKDOOR_SYSCALL as c_long,
            BACKDOOR_KEY,
            &mut request as *mut BackdoorRequest as u64,
        );
    }
}

/// Looks up a fakefs override for `path` without involving the ptrace
/// supervisor at all (`getxattr` isn't on its trace list). Returns the
/// override only if its `is_symlink` flag matches `nofollow`, per the
/// invariant that `lstat` must never see a target's override and `stat`
/// must never see a symlink-only one.
fn local_override(path: &Path, nofollow: bool) -> Option<(u32, u32)> {
    match overlay::read_override(path) {
        Ok(Some(over)) if over.is_symlink == nofollow => Some((over.uid, over.gid)),
        _ => None,
    }
}

unsafe fn patch_stat(buf: *mut libc::stat, uid: u32, gid: u32) {
    if !buf.is_null() {
        (*buf).st_uid = uid;
        (*buf).st_gid = gid;
    }
}

unsafe fn patch_statx(buf: *mut libc::statx, uid: u32, gid: u32) {
    if !buf.is_null() {
        (*buf).stx_uid = uid;
        (*buf).stx_gid = gid;
        (*buf).stx_mask |= libc::STATX_UID | libc::STATX_GID;
    }
}

#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    fast_stat_by_path(path, buf, false)
}

#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    fast_stat_by_path(path, buf, true)
}

unsafe fn fast_stat_by_path(path: *const c_char, buf: *mut libc::stat, nofollow: bool) -> c_int {
    if path.is_null() {
        return real_if_nofollow(nofollow)(path, buf);
    }
    let path_bytes = CStr::from_ptr(path).to_bytes();
    let resolved = bytes_to_path(path_bytes);
    match local_override(&resolved, nofollow) {
        Some((uid, gid)) => {
            arm_stat_suppression(path_bytes);
            let rc = real_if_nofollow(nofollow)(path, buf);
            if rc == 0 {
                patch_stat(buf, uid, gid);
            }
            rc
        }
        None => real_if_nofollow(nofollow)(path, buf),
    }
}

fn real_if_nofollow(nofollow: bool) -> StatFn {
    if nofollow {
        real_lstat()
    } else {
        real_stat()
    }
}

#[no_mangle]
pub unsafe extern "C" fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int {
    let link = format!("/proc/self/fd/{fd}");
    match std::fs::read_link(&link) {
        Ok(target) => match local_override(&target, false) {
            Some((uid, gid)) => {
                arm_stat_suppression(link.as_bytes());
                let rc = real_fstat()(fd, buf);
                if rc == 0 {
                    patch_stat(buf, uid, gid);
                }
                rc
            }
            None => real_fstat()(fd, buf),
        },
        Err(_) => real_fstat()(fd, buf),
    }
}

#[no_mangle]
pub unsafe extern "C" fn fstatat(
    dirfd: c_int,
    path: *const c_char,
    buf: *mut libc::stat,
    flags: c_int,
) -> c_int {
    let nofollow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
    let path_bytes = if path.is_null() {
        &[]
    } else {
        CStr::from_ptr(path).to_bytes()
    };
    let empty_path = flags & libc::AT_EMPTY_PATH != 0 && path_bytes.is_empty();
    let resolved = if empty_path {
        match std::fs::read_link(format!("/proc/self/fd/{dirfd}")) {
            Ok(p) => Some(p),
            Err(_) => None,
        }
    } else if path_bytes.first() == Some(&b'/') {
        Some(bytes_to_path(path_bytes))
    } else {
        // A relative path against a directory fd: resolve through /proc so
        // the local probe agrees with what the kernel will actually open.
        std::fs::read_link(format!("/proc/self/fd/{dirfd}"))
            .ok()
            .map(|base| base.join(bytes_to_path(path_bytes)))
    };

    match resolved.and_then(|p| local_override(&p, nofollow).map(|ov| (p, ov))) {
        Some((resolved, (uid, gid))) => {
            let resolved_bytes = resolved.as_os_str().as_bytes();
            arm_stat_suppression(resolved_bytes);
            let rc = real_fstatat()(dirfd, path, buf, flags);
            if rc == 0 {
                patch_stat(buf, uid, gid);
            }
            rc
        }
        None => real_fstatat()(dirfd, path, buf, flags),
    }
}

#[no_mangle]
pub unsafe extern "C" fn statx(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mask: libc::c_uint,
    buf: *mut libc::statx,
) -> c_int {
    let nofollow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
    let path_bytes = if path.is_null() {
        &[]
    } else {
        CStr::from_ptr(path).to_bytes()
    };
    let resolved = if path_bytes.first() == Some(&b'/') {
        Some(bytes_to_path(path_bytes))
    } else {
        std::fs::read_link(format!("/proc/self/fd/{dirfd}"))
            .ok()
            .map(|base| base.join(bytes_to_path(path_bytes)))
    };

    match resolved.and_then(|p| local_override(&p, nofollow).map(|ov| (p, ov))) {
        Some((resolved, (uid, gid))) => {
            arm_stat_suppression(resolved.as_os_str().as_bytes());
            let rc = real_statx()(dirfd, path, flags, mask, buf);
            if rc == 0 {
                patch_statx(buf, uid, gid);
            }
            rc
        }
        None => real_statx()(dirfd, path, flags, mask, buf),
    }
}

#[no_mangle]
pub unsafe extern "C" fn chown(path: *const c_char, uid: libc::uid_t, gid: libc::gid_t) -> c_int {
    fast_chown_by_path(path, uid, gid, false)
}

#[no_mangle]
pub unsafe extern "C" fn lchown(path: *const c_char, uid: libc::uid_t, gid: libc::gid_t) -> c_int {
    fast_chown_by_path(path, uid, gid, true)
}

unsafe fn fast_chown_by_path(
    path: *const c_char,
    uid: libc::uid_t,
    gid: libc::gid_t,
    is_symlink: bool,
) -> c_int {
    if path.is_null() {
        set_errno(libc::EFAULT);
        return -1;
    }
    let resolved = bytes_to_path(CStr::from_ptr(path).to_bytes());
    if std::fs::symlink_metadata(&resolved).is_err() {
        set_errno(libc::ENOENT);
        return -1;
    }
    match overlay::apply_chown(&resolved, uid, gid, is_symlink) {
        Ok(()) => 0,
        Err(_) => {
            // Fall back to the authoritative ptrace path rather than report
            // a made-up errno for a failure we don't understand locally
            // (e.g. a read-only xattr namespace).
            if is_symlink {
                real_lchown()(path, uid, gid)
            } else {
                real_chown()(path, uid, gid)
            }
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn fchown(fd: c_int, uid: libc::uid_t, gid: libc::gid_t) -> c_int {
    match std::fs::read_link(format!("/proc/self/fd/{fd}")) {
        Ok(resolved) => match overlay::apply_chown(&resolved, uid, gid, false) {
            Ok(()) => 0,
            Err(_) => real_fchown()(fd, uid, gid),
        },
        Err(_) => real_fchown()(fd, uid, gid),
    }
}

#[no_mangle]
pub unsafe extern "C" fn fchownat(
    dirfd: c_int,
    path: *const c_char,
    uid: libc::uid_t,
    gid: libc::gid_t,
    flags: c_int,
) -> c_int {
    let nofollow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
    let path_bytes = if path.is_null() {
        &[]
    } else {
        CStr::from_ptr(path).to_bytes()
    };
    let empty_path = flags & libc::AT_EMPTY_PATH != 0 && path_bytes.is_empty();
    let resolved = if empty_path {
        std::fs::read_link(format!("/proc/self/fd/{dirfd}")).ok()
    } else if path_bytes.first() == Some(&b'/') {
        Some(bytes_to_path(path_bytes))
    } else {
        std::fs::read_link(format!("/proc/self/fd/{dirfd}"))
            .ok()
            .map(|base| base.join(bytes_to_path(path_bytes)))
    };

    match resolved {
        Some(resolved) => match overlay::apply_chown(&resolved, uid, gid, nofollow) {
            Ok(()) => 0,
            Err(_) => real_fchownat()(dirfd, path, uid, gid, flags),
        },
        None => real_fchownat()(dirfd, path, uid, gid, flags),
    }
}

unsafe fn set_errno(code: c_int) {
    *libc::__errno_location() = code;
}
