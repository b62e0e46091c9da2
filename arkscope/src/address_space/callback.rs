//! Memory access through a caller-supplied C reader

#![allow(unsafe_code)] // invokes a foreign function pointer

use std::ffi::c_void;

use super::AddressSpace;
use crate::domain::MemoryReadFailure;
use arkscope_common::ReadMemFn;

/// Out-of-process reader handed in over the C boundary
///
/// The tool that owns the target process (a debugger, a crash collector)
/// gives us an opaque context plus a function that reads one word from it.
pub struct CallbackSpace {
    ctx: *mut c_void,
    read: ReadMemFn,
}

impl CallbackSpace {
    /// # Safety
    /// `read` must be safe to call with `ctx` for any address for as long as
    /// this value lives, and must only write through its out-pointer.
    #[must_use]
    pub unsafe fn new(ctx: *mut c_void, read: ReadMemFn) -> Self {
        Self { ctx, read }
    }
}

impl AddressSpace for CallbackSpace {
    fn read_word(&self, addr: u64) -> Result<u64, MemoryReadFailure> {
        let at = usize::try_from(addr).map_err(|_| MemoryReadFailure { addr })?;
        let mut value: usize = 0;
        // SAFETY: upheld by the contract of `CallbackSpace::new`.
        let ok = unsafe { (self.read)(self.ctx, at, &mut value) };
        if ok {
            Ok(value as u64)
        } else {
            Err(MemoryReadFailure { addr })
        }
    }
}
