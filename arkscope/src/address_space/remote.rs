//! Cross-process memory access via ptrace

#![allow(unsafe_code)] // ptrace(2) and waitpid(2)

use anyhow::{bail, Result};
use log::{debug, warn};
use std::io;

use super::AddressSpace;
use crate::domain::{MemoryReadFailure, Pid};

/// Another process's memory, read one word per `PTRACE_PEEKDATA`
///
/// The target must already be ptrace-stopped by this thread (see
/// [`PtraceSession`]); otherwise every peek fails with `ESRCH`.
#[derive(Debug, Clone, Copy)]
pub struct PtraceSpace {
    pid: Pid,
}

impl PtraceSpace {
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl AddressSpace for PtraceSpace {
    fn read_word(&self, addr: u64) -> Result<u64, MemoryReadFailure> {
        if addr == 0 {
            return Err(MemoryReadFailure { addr });
        }
        let remote = usize::try_from(addr).map_err(|_| MemoryReadFailure { addr })?;

        // PEEKDATA returns the word itself, so -1 is only an error when errno
        // was set by this call.
        // SAFETY: errno is thread-local; PEEKDATA writes nothing into our
        // address space.
        let word = unsafe {
            *libc::__errno_location() = 0;
            libc::ptrace(
                libc::PTRACE_PEEKDATA,
                self.pid.0,
                remote as *mut libc::c_void,
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if word == -1 && io::Error::last_os_error().raw_os_error().unwrap_or(0) != 0 {
            return Err(MemoryReadFailure { addr });
        }
        Ok(u64::from_ne_bytes(word.to_ne_bytes()))
    }
}

/// Frame registers of a stopped thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRegisters {
    pub fp: u64,
    pub sp: u64,
    pub pc: u64,
}

/// A ptrace attachment that detaches on drop
pub struct PtraceSession {
    pid: Pid,
}

impl PtraceSession {
    /// Attach to `pid` and wait for it to stop
    ///
    /// # Errors
    /// Returns an error if attaching fails (permissions, `ptrace_scope`, or
    /// the process is gone) or the wait does not observe a stop.
    pub fn attach(pid: Pid) -> Result<Self> {
        // SAFETY: plain syscalls on a pid; no memory is shared.
        let rc = unsafe {
            libc::ptrace(
                libc::PTRACE_ATTACH,
                pid.0,
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if rc == -1 {
            bail!("Failed to attach to {pid}: {}", io::Error::last_os_error());
        }

        let mut status = 0;
        // SAFETY: status is a valid out-pointer for the duration of the call.
        let waited = unsafe { libc::waitpid(pid.0, &mut status, libc::__WALL) };
        if waited == -1 || !libc::WIFSTOPPED(status) {
            let err = io::Error::last_os_error();
            let session = Self { pid };
            drop(session);
            bail!("Process {pid} did not stop after attach: {err}");
        }

        debug!("Attached to {pid}");
        Ok(Self { pid })
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Address space of the stopped process
    #[must_use]
    pub fn space(&self) -> PtraceSpace {
        PtraceSpace::new(self.pid)
    }

    /// Frame pointer, stack pointer and pc of the stopped thread
    ///
    /// # Errors
    /// Returns an error if `PTRACE_GETREGS` fails
    #[cfg(target_arch = "x86_64")]
    pub fn registers(&self) -> Result<FrameRegisters> {
        // SAFETY: user_regs_struct is plain old data, zero is a valid value.
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        // SAFETY: GETREGS writes exactly one user_regs_struct.
        let rc = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGS,
                self.pid.0,
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::addr_of_mut!(regs).cast::<libc::c_void>(),
            )
        };
        if rc == -1 {
            bail!("PTRACE_GETREGS failed for {}: {}", self.pid, io::Error::last_os_error());
        }
        Ok(FrameRegisters { fp: regs.rbp, sp: regs.rsp, pc: regs.rip })
    }

    /// Frame registers are only read on x86_64; pass `--fp` elsewhere
    ///
    /// # Errors
    /// Always
    #[cfg(not(target_arch = "x86_64"))]
    pub fn registers(&self) -> Result<FrameRegisters> {
        bail!("Reading registers is not supported on this architecture; pass --fp")
    }
}

impl Drop for PtraceSession {
    fn drop(&mut self) {
        // SAFETY: detaching an attached tracee; failure leaves it attached
        // until we exit, which the kernel also cleans up.
        let rc = unsafe {
            libc::ptrace(
                libc::PTRACE_DETACH,
                self.pid.0,
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if rc == -1 {
            warn!("Failed to detach from {}: {}", self.pid, io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_without_attach_fails_gracefully() {
        // We are not tracing ourselves, so the peek must fail and not crash
        let value: u64 = 5;
        let space = PtraceSpace::new(Pid::current());
        assert!(space.read_word(std::ptr::addr_of!(value) as u64).is_err());
    }

    #[test]
    fn test_null_peek_is_rejected_without_syscall() {
        let space = PtraceSpace::new(Pid(1));
        assert_eq!(space.read_word(0).unwrap_err(), MemoryReadFailure { addr: 0 });
    }

    #[test]
    fn test_attach_to_missing_process_fails() {
        assert!(PtraceSession::attach(Pid(999_999_999)).is_err());
    }
}
