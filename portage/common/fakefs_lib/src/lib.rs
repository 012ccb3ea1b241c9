// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Makes `chown`/`chgrp` and the `stat` family of syscalls appear to succeed
//! and report an overridden owner for an unprivileged process tree, by
//! recording the "as if" uid/gid in a filesystem extended attribute and
//! rewriting syscall results to match it.
//!
//! Two cooperating pieces apply the override:
//!   - the sibling `fakefs_preload` crate `LD_PRELOAD`s a `cdylib` that
//!     fast-paths calls made from a process it's injected into, patching the
//!     `struct stat` in place after the real libc call returns.
//!   - [`Supervisor`] ptrace-attaches to a tracee tree and performs the same
//!     patch for syscalls the preload can't or doesn't intercept (statically
//!     linked binaries, `chown(2)` itself, children that don't inherit
//!     `LD_PRELOAD`).
//!
//! The two communicate through the [`BACKDOOR_SYSCALL`] side channel: the
//! preload issues it instead of performing the real syscall, and
//! [`Supervisor`] recognizes the pattern at the ptrace syscall-entry stop and
//! answers it directly rather than letting it reach the kernel. This avoids
//! a redundant stop/trap round trip for the common case where the preload
//! already has everything it needs in its own address space.

pub mod overlay;
pub mod supervisor;

pub use overlay::{Override, OVERRIDE_XATTR};
pub use supervisor::Supervisor;

/// The syscall used as a side channel between `fakefs_preload` and
/// [`Supervisor`]. `getpid` was picked because its real behavior has no
/// observable side effect worth emulating, and because the supervisor
/// already fully intercepts it on every tracee to apply our backdoor check.
pub const BACKDOOR_SYSCALL: i64 = libc::SYS_getpid;

/// The value the preload places in the syscall's first argument register to
/// mark a backdoor request. Chosen to be a value `getpid(2)`'s real argument
/// (none) could never carry, and unlikely to collide with a tracee's own use
/// of inline `syscall(SYS_getpid)` for an actual pid lookup.
pub const BACKDOOR_KEY: u64 = 0x66616b65_66735f31; // "fakefs_1" in ASCII hex.

/// A request the preload writes into its own memory before issuing the
/// backdoor syscall, and a pointer to which it passes as the syscall's
/// second argument. [`Supervisor`] reads it via `process_vm_readv` and
/// writes the response back into the same struct before resuming the
/// tracee.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BackdoorRequest {
    /// Address and length of the path to resolve, in the tracee's memory.
    pub path_ptr: u64,
    pub path_len: u64,
    /// Set by the supervisor: 1 if an override was found and applied.
    pub applied: u8,
    pub uid: u32,
    pub gid: u32,
}
