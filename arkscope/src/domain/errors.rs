//! Structured error types for arkscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every error here is local and non-fatal: callers degrade (skip a frame,
//! print `?`, skip one JIT body) instead of aborting the whole operation.

use thiserror::Error;

/// A single word could not be read from the target address space
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Failed to read memory at 0x{addr:x}")]
pub struct MemoryReadFailure {
    pub addr: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnwindError {
    #[error(transparent)]
    MemoryRead(#[from] MemoryReadFailure),

    #[error("Malformed heap reference 0x{value:x}: {reason}")]
    MalformedTag { value: u64, reason: &'static str },

    #[error("Unknown frame type tag {raw} at 0x{addr:x} (runtime ABI mismatch)")]
    UnknownFrameType { raw: u64, addr: u64 },

    #[error("Frame pointer is null")]
    NullFrame,

    #[error("Stack deeper than {0} frames")]
    DepthExceeded(usize),
}

#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("No code range covers pc 0x{0:x}")]
    UnresolvedSymbol(u64),

    #[error("Code ranges of {first} and {second} overlap")]
    OverlappingRanges { first: u32, second: u32 },

    #[error("Failed to parse image: {0}")]
    ImageParse(String),

    #[error("Image has no function symbols")]
    NoMethodTable,

    #[error(transparent)]
    Dwarf(#[from] gimli::Error),
}

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Failed to serialize ELF image: {0}")]
    ElfWrite(String),

    #[error("No machine code was captured")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_failure_display() {
        let err = MemoryReadFailure { addr: 0xdead_beef };
        assert_eq!(err.to_string(), "Failed to read memory at 0xdeadbeef");
    }

    #[test]
    fn test_unwind_error_wraps_read_failure() {
        let err: UnwindError = MemoryReadFailure { addr: 0x10 }.into();
        assert!(matches!(err, UnwindError::MemoryRead(MemoryReadFailure { addr: 0x10 })));
        assert!(err.to_string().contains("0x10"));
    }

    #[test]
    fn test_unknown_frame_type_mentions_abi() {
        let err = UnwindError::UnknownFrameType { raw: 99, addr: 0x7000 };
        assert!(err.to_string().contains("ABI mismatch"));
        assert!(err.to_string().contains("99"));
    }
}
