//! # Address Spaces
//!
//! Every algorithm above this module (frame walking, method resolution, JIT
//! capture) reads memory through the single [`AddressSpace`] capability and is
//! therefore identical for every backend given identical memory contents.
//!
//! ## Backends
//!
//! - [`LocalSpace`]: direct dereference inside our own process, optionally
//!   gated by a readable-region check so best-effort diagnostics on a live
//!   process can't fault mid-symbolication.
//! - [`PtraceSpace`]: `PTRACE_PEEKDATA` into another (attached) process, one
//!   system call per word.
//! - [`CallbackSpace`]: a C `(context, address) -> word` reader supplied by an
//!   out-of-process tool through the boundary functions.
//! - [`SnapshotSpace`]: captured memory segments held in our own heap, used
//!   for offline analysis and for building synthetic stacks in tests.
//!
//! All reads are native-endian words; sub-word reads are carved out of the
//! containing aligned words so a remote backend never needs more than
//! word-granular peeks.

pub mod callback;
pub mod local;
pub mod remote;
pub mod snapshot;

pub use callback::CallbackSpace;
pub use local::LocalSpace;
pub use remote::{PtraceSession, PtraceSpace};
pub use snapshot::SnapshotSpace;

use crate::domain::MemoryReadFailure;
use arkscope_common::WORD_SIZE;

/// Read capability over some process's memory
pub trait AddressSpace {
    /// Read the native-endian word at `addr`
    ///
    /// # Errors
    /// Returns [`MemoryReadFailure`] when `addr` is not readable
    fn read_word(&self, addr: u64) -> Result<u64, MemoryReadFailure>;

    /// Read `len` bytes starting at `addr`, word by word
    ///
    /// # Errors
    /// Fails as a whole if any covering word is unreadable
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryReadFailure> {
        let mut out = Vec::with_capacity(len);
        if len == 0 {
            return Ok(out);
        }

        let end = addr
            .checked_add(len as u64)
            .ok_or(MemoryReadFailure { addr })?;
        let mut word_addr = addr - addr % WORD_SIZE;
        while word_addr < end {
            let bytes = self.read_word(word_addr)?.to_ne_bytes();
            for (i, byte) in bytes.iter().enumerate() {
                let at = word_addr
                    .checked_add(i as u64)
                    .ok_or(MemoryReadFailure { addr: word_addr })?;
                if at >= addr && at < end {
                    out.push(*byte);
                }
            }
            // the last word of the address space is never a complete span
            word_addr = word_addr
                .checked_add(WORD_SIZE)
                .ok_or(MemoryReadFailure { addr: word_addr })?;
        }
        Ok(out)
    }

    /// Read the native-endian `u32` at `addr`
    ///
    /// # Errors
    /// Returns [`MemoryReadFailure`] when any covering word is unreadable
    fn read_u32(&self, addr: u64) -> Result<u32, MemoryReadFailure> {
        let bytes = self.read_bytes(addr, 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes);
        Ok(u32::from_ne_bytes(raw))
    }
}

impl<A: AddressSpace + ?Sized> AddressSpace for &A {
    fn read_word(&self, addr: u64) -> Result<u64, MemoryReadFailure> {
        (**self).read_word(addr)
    }

    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryReadFailure> {
        (**self).read_bytes(addr, len)
    }

    fn read_u32(&self, addr: u64) -> Result<u32, MemoryReadFailure> {
        (**self).read_u32(addr)
    }
}
