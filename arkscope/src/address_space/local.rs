//! In-process memory access

#![allow(unsafe_code)] // raw dereference of runtime-owned memory

use anyhow::Result;

use super::AddressSpace;
use crate::domain::{MemoryReadFailure, Pid};
use crate::symbolization::memory_maps::{readable_ranges, MemoryRange};
use arkscope_common::WORD_SIZE;

/// Our own process, read by pointer dereference
///
/// With a region list every read is first checked for membership in a
/// readable mapping; without one, reads go straight to memory and a bad
/// address faults the process. Diagnostics running on a live process should
/// always carry regions.
#[derive(Debug, Clone, Default)]
pub struct LocalSpace {
    regions: Option<Vec<MemoryRange>>,
}

impl LocalSpace {
    /// Dereference without any membership check
    ///
    /// Only for callers that already know every address they will hand us is
    /// mapped (e.g. the runtime walking its own, well-formed stack).
    #[must_use]
    pub fn unchecked() -> Self {
        Self { regions: None }
    }

    /// Gate every read on the given readable ranges (sorted by start)
    #[must_use]
    pub fn with_regions(mut regions: Vec<MemoryRange>) -> Self {
        regions.sort_by_key(|r| r.start);
        Self { regions: Some(regions) }
    }

    /// Gate reads on the readable mappings currently in /proc/self/maps
    ///
    /// # Errors
    /// Returns an error if /proc/self/maps cannot be read
    pub fn from_self_maps() -> Result<Self> {
        Ok(Self::with_regions(readable_ranges(Pid::current())?))
    }

    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.regions.is_some()
    }

    fn permits(&self, addr: u64, len: u64) -> bool {
        let Some(regions) = &self.regions else {
            return true;
        };
        let idx = regions.partition_point(|r| r.start <= addr);
        idx > 0 && regions[idx - 1].contains_span(addr, len)
    }
}

impl AddressSpace for LocalSpace {
    fn read_word(&self, addr: u64) -> Result<u64, MemoryReadFailure> {
        if addr == 0 || !self.permits(addr, WORD_SIZE) {
            return Err(MemoryReadFailure { addr });
        }
        let ptr = usize::try_from(addr).map_err(|_| MemoryReadFailure { addr })? as *const u64;
        // SAFETY: the address is non-null and, when regions are configured,
        // lies inside a readable mapping; unaligned frame slots are allowed.
        Ok(unsafe { ptr.read_unaligned() })
    }

    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryReadFailure> {
        if len == 0 {
            return Ok(Vec::new());
        }
        if addr == 0 || !self.permits(addr, len as u64) {
            return Err(MemoryReadFailure { addr });
        }
        let ptr = usize::try_from(addr).map_err(|_| MemoryReadFailure { addr })? as *const u8;
        // SAFETY: same contract as `read_word`, for `len` bytes.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
    }
}
