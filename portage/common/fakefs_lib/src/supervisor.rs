// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The ptrace side of fakefs: seizes a tracee tree, intercepts the syscalls
//! listed in spec.md §4.D, and answers them from the override xattr
//! recorded by [`crate::overlay`] instead of letting the kernel's real
//! answer through.
//!
//! Only the x86_64 syscall/register ABI is decoded: syscall number and
//! return value live in `orig_rax`/`rax`, and the first six arguments in
//! `rdi`, `rsi`, `rdx`, `r10`, `r8`, `r9`. A 32-bit build would need its own
//! register layout; nothing here generalizes to it.

#[cfg(not(target_arch = "x86_64"))]
compile_error!("fakefs_lib::supervisor decodes the x86_64 syscall register ABI only");

use crate::overlay::{self, Override, OVERRIDE_XATTR};
use crate::{BackdoorRequest, BACKDOOR_KEY, BACKDOOR_SYSCALL};
use anyhow::{bail, Context, Result};
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{lstat, stat, FileStat};
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use tracing::{trace, warn};

/// One syscall this supervisor knows how to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Traced {
    Stat,
    Lstat,
    Fstat,
    Newfstatat,
    Statx,
    Listxattr,
    Llistxattr,
    Flistxattr,
    Chown,
    Lchown,
    Fchown,
    Fchownat,
    Backdoor,
}

impl Traced {
    fn from_nr(nr: i64) -> Option<Self> {
        Some(match nr {
            libc::SYS_stat => Self::Stat,
            libc::SYS_lstat => Self::Lstat,
            libc::SYS_fstat => Self::Fstat,
            libc::SYS_newfstatat => Self::Newfstatat,
            libc::SYS_statx => Self::Statx,
            libc::SYS_listxattr => Self::Listxattr,
            libc::SYS_llistxattr => Self::Llistxattr,
            libc::SYS_flistxattr => Self::Flistxattr,
            libc::SYS_chown => Self::Chown,
            libc::SYS_lchown => Self::Lchown,
            libc::SYS_fchown => Self::Fchown,
            libc::SYS_fchownat => Self::Fchownat,
            nr if nr == BACKDOOR_SYSCALL => Self::Backdoor,
            _ => return None,
        })
    }
}

/// What to do at the matching syscall-exit-stop, computed while we still
/// have the real arguments at hand during the entry-stop.
enum Pending {
    /// Rewrite `orig_rax` to an invalid syscall at entry (so the kernel
    /// never runs it) and set this return value / write these bytes to
    /// `dest` in the tracee's memory at exit.
    Fake { retval: i64, write: Option<(u64, Vec<u8>)> },
    /// Let the real syscall run; just patch tracee memory at exit and clear
    /// the key register so it can't be observed afterwards.
    Backdoor { request_ptr: u64, response: BackdoorRequest },
}

struct TraceeState {
    /// `true` if the next syscall-stop we see for this pid is an
    /// entry-stop. Toggles every stop.
    expect_entry: bool,
    pending: Option<Pending>,
    /// Set by a backdoor query that found an override: `fakefs_preload`
    /// already has the uid/gid it needs and will patch the caller's buffer
    /// itself once the real stat syscall returns, so the next matching
    /// stat-family entry-stop from this tid should pass straight through
    /// without the supervisor redoing the xattr lookup and memory write.
    suppress_next_stat: bool,
}

impl Default for TraceeState {
    fn default() -> Self {
        Self {
            expect_entry: true,
            pending: None,
            suppress_next_stat: false,
        }
    }
}

/// Drives the ptrace event loop for one seized tracee tree until every
/// tracee has exited.
pub struct Supervisor {
    root: Pid,
    tracees: HashMap<Pid, TraceeState>,
}

fn seize_options() -> Options {
    Options::PTRACE_O_TRACESYSGOOD
        | Options::PTRACE_O_EXITKILL
        | Options::PTRACE_O_TRACECLONE
        | Options::PTRACE_O_TRACEFORK
        | Options::PTRACE_O_TRACEVFORK
}

impl Supervisor {
    /// Seizes `child`, which must still be stopped on the `SIGSTOP` it
    /// raised against itself before `exec`ing (see `fakefs`'s tracee
    /// re-exec path), and resumes it.
    pub fn seize(child: &Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);
        match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => {}
            other => bail!("tracee did not stop as expected before seize: {other:?}"),
        }
        ptrace::seize(pid, seize_options()).context("PTRACE_SEIZE failed")?;
        kill(pid, Signal::SIGCONT).context("resuming the tracee after seize")?;
        ptrace::syscall(pid, None).context("starting the syscall-stop loop")?;

        let mut tracees = HashMap::new();
        tracees.insert(pid, TraceeState::default());
        Ok(Self { root: pid, tracees })
    }

    /// Runs until every tracee (the root process and anything it forked)
    /// has exited, returning the root's exit status.
    pub fn run_to_completion(mut self) -> Result<ExitStatus> {
        let mut root_status: Option<ExitStatus> = None;
        loop {
            if self.tracees.is_empty() {
                return Ok(root_status.unwrap_or_else(|| ExitStatus::from_raw(0)));
            }
            match waitpid(None, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.tracees.remove(&pid);
                    if pid == self.root {
                        root_status = Some(ExitStatus::from_raw(code << 8));
                    }
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    self.tracees.remove(&pid);
                    if pid == self.root {
                        root_status = Some(ExitStatus::from_raw(sig as i32));
                    }
                }
                Ok(WaitStatus::PtraceSyscall(pid)) => {
                    if let Err(e) = self.handle_syscall_stop(pid) {
                        warn!("fakefs: syscall-stop handling failed for {pid}: {e:#}");
                    }
                    ptrace::syscall(pid, None)
                        .with_context(|| format!("resuming {pid} after syscall-stop"))?;
                }
                Ok(WaitStatus::PtraceEvent(pid, _sig, _event)) => {
                    // PTRACE_EVENT_{CLONE,FORK,VFORK}: the new child reports its own
                    // initial stop separately and gets registered there; just resume
                    // the parent.
                    ptrace::syscall(pid, None)
                        .with_context(|| format!("resuming {pid} after ptrace-event"))?;
                }
                Ok(WaitStatus::Stopped(pid, sig)) => {
                    self.tracees.entry(pid).or_default();
                    let forward = (sig != Signal::SIGTRAP).then_some(sig);
                    ptrace::syscall(pid, forward)
                        .with_context(|| format!("resuming {pid} after signal-stop"))?;
                }
                Ok(WaitStatus::Continued(_)) | Ok(WaitStatus::StillAlive) => {}
                Ok(other) => trace!("fakefs: unhandled wait status: {other:?}"),
                Err(nix::errno::Errno::ECHILD) => {
                    return Ok(root_status.unwrap_or_else(|| ExitStatus::from_raw(0)))
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e).context("waitpid failed"),
            }
        }
    }

    fn handle_syscall_stop(&mut self, pid: Pid) -> Result<()> {
        let state = self.tracees.entry(pid).or_default();
        let is_entry = state.expect_entry;
        state.expect_entry = !is_entry;

        let mut regs = ptrace::getregs(pid).context("PTRACE_GETREGS")?;

        if is_entry {
            let Some(syscall) = Traced::from_nr(regs.orig_rax as i64) else {
                return Ok(());
            };
            let pending = match syscall {
                Traced::Backdoor => {
                    let (pending, suppress) = handle_backdoor_entry(pid, &regs)?;
                    if suppress {
                        self.tracees.get_mut(&pid).unwrap().suppress_next_stat = true;
                    }
                    pending
                }
                Traced::Stat | Traced::Lstat | Traced::Fstat | Traced::Newfstatat | Traced::Statx
                    if std::mem::take(&mut self.tracees.get_mut(&pid).unwrap().suppress_next_stat) =>
                {
                    // fakefs_preload already resolved this one and will patch
                    // the caller's buffer itself; let the real syscall run.
                    None
                }
                _ => handle_stat_or_chown_entry(pid, syscall, &regs)?,
            };
            if let Some(Pending::Fake { .. }) = &pending {
                // Route around the real syscall entirely: an invalid syscall
                // number makes the kernel fail it with ENOSYS without side
                // effects, and we overwrite the return value ourselves at
                // exit.
                regs.orig_rax = u64::MAX;
                ptrace::setregs(pid, regs).context("PTRACE_SETREGS (faking syscall number)")?;
            }
            self.tracees.get_mut(&pid).unwrap().pending = pending;
        } else {
            let pending = self.tracees.get_mut(&pid).unwrap().pending.take();
            match pending {
                Some(Pending::Fake { retval, write }) => {
                    if let Some((dest, bytes)) = write {
                        write_tracee_memory(pid, dest, &bytes)?;
                    }
                    regs.rax = retval as u64;
                    ptrace::setregs(pid, regs).context("PTRACE_SETREGS (faking return value)")?;
                }
                Some(Pending::Backdoor {
                    request_ptr,
                    mut response,
                }) => {
                    // Real getpid() already ran; just deliver our answer and
                    // scrub the key so it never shows up in a register dump
                    // again.
                    response.path_ptr = 0;
                    response.path_len = 0;
                    let bytes = unsafe {
                        std::slice::from_raw_parts(
                            &response as *const BackdoorRequest as *const u8,
                            std::mem::size_of::<BackdoorRequest>(),
                        )
                    };
                    write_tracee_memory(pid, request_ptr, bytes)?;
                    regs.rdi = 0;
                    ptrace::setregs(pid, regs).context("PTRACE_SETREGS (clearing backdoor key)")?;
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Resolves `dirfd`/`path` (as seen by `tid`) to a path the supervisor can
/// open directly, rewriting `/proc/self/...` to `/proc/<tid>/...` per
/// spec.md §4.D.
fn resolve_path(tid: Pid, dirfd: i32, path: &std::path::Path) -> PathBuf {
    let rewritten: PathBuf = if let Ok(rest) = path.strip_prefix("/proc/self") {
        PathBuf::from(format!("/proc/{tid}")).join(rest)
    } else {
        path.to_path_buf()
    };
    if rewritten.is_absolute() {
        return rewritten;
    }
    let base = if dirfd == libc::AT_FDCWD {
        PathBuf::from(format!("/proc/{tid}/cwd"))
    } else {
        PathBuf::from(format!("/proc/{tid}/fd/{dirfd}"))
    };
    base.join(rewritten)
}

fn read_tracee_string(pid: Pid, addr: u64, max_len: usize) -> Result<Vec<u8>> {
    if addr == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; max_len];
    let local = [IoSliceMut::new(&mut buf)];
    let remote = [RemoteIoVec {
        base: addr as usize,
        len: max_len,
    }];
    let n = process_vm_readv(pid, &local, &remote).context("process_vm_readv (path)")?;
    buf.truncate(n);
    if let Some(nul) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul);
    }
    Ok(buf)
}

fn write_tracee_memory(pid: Pid, addr: u64, bytes: &[u8]) -> Result<()> {
    if addr == 0 || bytes.is_empty() {
        return Ok(());
    }
    let local = [IoSlice::new(bytes)];
    let remote = [RemoteIoVec {
        base: addr as usize,
        len: bytes.len(),
    }];
    process_vm_writev(pid, &local, &remote).context("process_vm_writev")?;
    Ok(())
}

fn handle_backdoor_entry(
    pid: Pid,
    regs: &libc::user_regs_struct,
) -> Result<(Option<Pending>, bool)> {
    if regs.rdi != BACKDOOR_KEY {
        // A genuine getpid() call from the tracee; let it run untouched.
        return Ok((None, false));
    }
    let request_ptr = regs.rsi;
    // Read the BackdoorRequest struct itself.
    let mut raw = [0u8; std::mem::size_of::<BackdoorRequest>()];
    let remote = [RemoteIoVec {
        base: request_ptr as usize,
        len: raw.len(),
    }];
    process_vm_readv(pid, &mut [IoSliceMut::new(&mut raw)], &remote)
        .context("process_vm_readv (BackdoorRequest)")?;
    let request: BackdoorRequest = unsafe { std::ptr::read_unaligned(raw.as_ptr() as *const _) };

    let path_bytes = read_tracee_string(pid, request.path_ptr, request.path_len as usize)?;
    let path = std::path::PathBuf::from(std::ffi::OsString::from(
        String::from_utf8_lossy(&path_bytes).into_owned(),
    ));
    let resolved = resolve_path(pid, libc::AT_FDCWD, &path);

    let (response, suppress) = match overlay::read_override(&resolved) {
        Ok(Some(Override { uid, gid, .. })) => (
            BackdoorRequest {
                path_ptr: request.path_ptr,
                path_len: request.path_len,
                applied: 1,
                uid,
                gid,
            },
            true,
        ),
        _ => (
            BackdoorRequest {
                path_ptr: request.path_ptr,
                path_len: request.path_len,
                applied: 0,
                uid: 0,
                gid: 0,
            },
            false,
        ),
    };
    Ok((
        Some(Pending::Backdoor {
            request_ptr,
            response,
        }),
        suppress,
    ))
}

fn handle_stat_or_chown_entry(
    pid: Pid,
    syscall: Traced,
    regs: &libc::user_regs_struct,
) -> Result<Option<Pending>> {
    match syscall {
        Traced::Stat | Traced::Lstat => {
            let path_bytes = read_tracee_string(pid, regs.rdi, libc::PATH_MAX as usize)?;
            let path = std::path::PathBuf::from(std::ffi::OsString::from(
                String::from_utf8_lossy(&path_bytes).into_owned(),
            ));
            let resolved = resolve_path(pid, libc::AT_FDCWD, &path);
            fake_stat(&resolved, syscall == Traced::Lstat, regs.rsi)
        }
        Traced::Fstat => {
            let fd = regs.rdi as i32;
            let resolved = PathBuf::from(format!("/proc/{pid}/fd/{fd}"));
            fake_stat(&resolved, false, regs.rsi)
        }
        Traced::Newfstatat => {
            let dirfd = regs.rdi as i32;
            let path_bytes = read_tracee_string(pid, regs.rsi, libc::PATH_MAX as usize)?;
            let flags = regs.r10 as i32;
            let nofollow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
            let empty_path = flags & libc::AT_EMPTY_PATH != 0 && path_bytes.is_empty();
            let resolved = if empty_path {
                if dirfd == libc::AT_FDCWD {
                    PathBuf::from(format!("/proc/{pid}/cwd"))
                } else {
                    PathBuf::from(format!("/proc/{pid}/fd/{dirfd}"))
                }
            } else {
                let path = std::path::PathBuf::from(std::ffi::OsString::from(
                    String::from_utf8_lossy(&path_bytes).into_owned(),
                ));
                resolve_path(pid, dirfd, &path)
            };
            fake_stat(&resolved, nofollow, regs.rdx)
        }
        Traced::Statx => {
            // Only the fields fakefs cares about (uid/gid/mask) are faked;
            // everything else statx reports comes from the real call.
            // statx(dirfd, pathname, flags, mask, statxbuf): 5th syscall arg
            // (statxbuf) lives in r8, not r9 — r9 is the unused 6th slot.
            let dirfd = regs.rdi as i32;
            let path_bytes = read_tracee_string(pid, regs.rsi, libc::PATH_MAX as usize)?;
            let flags = regs.rdx as i32;
            let nofollow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
            let path = std::path::PathBuf::from(std::ffi::OsString::from(
                String::from_utf8_lossy(&path_bytes).into_owned(),
            ));
            let resolved = resolve_path(pid, dirfd, &path);
            fake_statx(&resolved, nofollow, regs.r8)
        }
        Traced::Listxattr | Traced::Llistxattr => {
            let path_bytes = read_tracee_string(pid, regs.rdi, libc::PATH_MAX as usize)?;
            let path = std::path::PathBuf::from(std::ffi::OsString::from(
                String::from_utf8_lossy(&path_bytes).into_owned(),
            ));
            let resolved = resolve_path(pid, libc::AT_FDCWD, &path);
            let deref = syscall == Traced::Listxattr;
            fake_listxattr(&resolved, deref, regs.rsi, regs.rdx as usize)
        }
        Traced::Flistxattr => {
            let fd = regs.rdi as i32;
            let resolved = PathBuf::from(format!("/proc/{pid}/fd/{fd}"));
            fake_listxattr(&resolved, true, regs.rsi, regs.rdx as usize)
        }
        Traced::Chown | Traced::Lchown => {
            let path_bytes = read_tracee_string(pid, regs.rdi, libc::PATH_MAX as usize)?;
            let path = std::path::PathBuf::from(std::ffi::OsString::from(
                String::from_utf8_lossy(&path_bytes).into_owned(),
            ));
            let resolved = resolve_path(pid, libc::AT_FDCWD, &path);
            fake_chown(&resolved, syscall == Traced::Lchown, regs.rsi as u32, regs.rdx as u32)
        }
        Traced::Fchown => {
            let fd = regs.rdi as i32;
            let resolved = PathBuf::from(format!("/proc/{pid}/fd/{fd}"));
            fake_chown(&resolved, false, regs.rsi as u32, regs.rdx as u32)
        }
        Traced::Fchownat => {
            // fchownat(dirfd, pathname, owner, group, flags): 5th syscall arg
            // (flags) lives in r8, not r9.
            let dirfd = regs.rdi as i32;
            let path_bytes = read_tracee_string(pid, regs.rsi, libc::PATH_MAX as usize)?;
            let path = std::path::PathBuf::from(std::ffi::OsString::from(
                String::from_utf8_lossy(&path_bytes).into_owned(),
            ));
            let flags = regs.r8 as i32;
            let nofollow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
            let resolved = resolve_path(pid, dirfd, &path);
            fake_chown(&resolved, nofollow, regs.rdx as u32, regs.r10 as u32)
        }
        Traced::Backdoor => unreachable!("handled separately"),
    }
}

/// Reads real metadata, overlays any recorded override's uid/gid, and
/// stages the resulting `struct stat` to be written into the tracee's
/// buffer at the matching exit-stop. Returns `None` (no simulation) if the
/// path has no override, letting the real syscall run unmolested.
fn fake_stat(resolved: &std::path::Path, nofollow: bool, dest: u64) -> Result<Option<Pending>> {
    let Some(over) = overlay::read_override(resolved)? else {
        return Ok(None);
    };
    // `lstat` on a symlink must report the link's own override, never the
    // target's (spec.md §4.D invariant iii); a plain `stat`/follow must not
    // apply a symlink-only override to the thing it points at.
    if over.is_symlink != nofollow {
        return Ok(None);
    }
    let mut st: FileStat = if nofollow {
        lstat(resolved)
    } else {
        stat(resolved)
    }
    .context("reading real metadata to overlay a fakefs override onto")?;
    st.st_uid = over.uid;
    st.st_gid = over.gid;
    let bytes = unsafe {
        std::slice::from_raw_parts(&st as *const FileStat as *const u8, std::mem::size_of::<FileStat>())
    }
    .to_vec();
    Ok(Some(Pending::Fake {
        retval: 0,
        write: Some((dest, bytes)),
    }))
}

/// `statx` simulation: only the uid/gid/mode-bearing fields are corrected;
/// attribute and mount-id fields pass through from the real call untouched.
fn fake_statx(resolved: &std::path::Path, nofollow: bool, dest: u64) -> Result<Option<Pending>> {
    let Some(over) = overlay::read_override(resolved)? else {
        return Ok(None);
    };
    if over.is_symlink != nofollow {
        return Ok(None);
    }
    let real = if nofollow { lstat(resolved) } else { stat(resolved) }
        .context("reading real metadata for a faked statx")?;
    let mut stx: libc::statx = unsafe { std::mem::zeroed() };
    stx.stx_mask = libc::STATX_UID | libc::STATX_GID;
    stx.stx_uid = over.uid;
    stx.stx_gid = over.gid;
    stx.stx_mode = real.st_mode as u16;
    stx.stx_blocks = real.st_blocks as u64;
    stx.stx_size = real.st_size as u64;
    let bytes = unsafe {
        std::slice::from_raw_parts(&stx as *const libc::statx as *const u8, std::mem::size_of::<libc::statx>())
    }
    .to_vec();
    Ok(Some(Pending::Fake {
        retval: 0,
        write: Some((dest, bytes)),
    }))
}

fn fake_listxattr(
    resolved: &std::path::Path,
    deref: bool,
    dest: u64,
    size: usize,
) -> Result<Option<Pending>> {
    let names = if deref {
        xattr::list_deref(resolved)
    } else {
        xattr::list(resolved)
    }
    .with_context(|| format!("listxattr of {}", resolved.display()))?;

    let mut out = Vec::new();
    for name in names {
        if name == std::ffi::OsStr::new(OVERRIDE_XATTR) {
            continue;
        }
        out.extend_from_slice(name.as_encoded_bytes());
        out.push(0);
    }

    // `size == 0` is the standard "give me just the length" probe.
    if size == 0 {
        return Ok(Some(Pending::Fake {
            retval: out.len() as i64,
            write: None,
        }));
    }
    if out.len() > size {
        return Ok(Some(Pending::Fake {
            retval: -(libc::ERANGE as i64),
            write: None,
        }));
    }
    Ok(Some(Pending::Fake {
        retval: out.len() as i64,
        write: Some((dest, out)),
    }))
}

fn fake_chown(resolved: &std::path::Path, is_symlink: bool, uid: u32, gid: u32) -> Result<Option<Pending>> {
    overlay::apply_chown(resolved, uid, gid, is_symlink)?;
    Ok(Some(Pending::Fake {
        retval: 0,
        write: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_proc_self_to_the_tracee_tid() {
        let tid = Pid::from_raw(4242);
        let got = resolve_path(tid, libc::AT_FDCWD, std::path::Path::new("/proc/self/fd/3"));
        assert_eq!(got, PathBuf::from("/proc/4242/fd/3"));
    }

    #[test]
    fn resolves_a_relative_path_against_the_tracee_cwd() {
        let tid = Pid::from_raw(4242);
        let got = resolve_path(tid, libc::AT_FDCWD, std::path::Path::new("foo/bar"));
        assert_eq!(got, PathBuf::from("/proc/4242/cwd/foo/bar"));
    }

    #[test]
    fn resolves_a_relative_path_against_a_directory_fd() {
        let tid = Pid::from_raw(4242);
        let got = resolve_path(tid, 7, std::path::Path::new("baz"));
        assert_eq!(got, PathBuf::from("/proc/4242/fd/7/baz"));
    }

    #[test]
    fn leaves_an_unrelated_absolute_path_untouched() {
        let tid = Pid::from_raw(4242);
        let got = resolve_path(tid, libc::AT_FDCWD, std::path::Path::new("/etc/passwd"));
        assert_eq!(got, PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn chown_minus_one_preserves_the_other_half_of_the_pair() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("f");
        std::fs::write(&path, b"hi")?;

        fake_chown(&path, false, 123, 456)?;
        assert_eq!(
            overlay::read_override(&path)?,
            Some(Override {
                uid: 123,
                gid: 456,
                is_symlink: false
            })
        );

        // chown(path, -1, 789) should only touch gid.
        fake_chown(&path, false, u32::MAX, 789)?;
        assert_eq!(
            overlay::read_override(&path)?,
            Some(Override {
                uid: 123,
                gid: 789,
                is_symlink: false
            })
        );
        Ok(())
    }
}
