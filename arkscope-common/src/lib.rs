//! # Shared ABI Definitions (runtime ↔ diagnostics tooling)
//!
//! Defines the frame-type tags, fixed-size structures and status codes shared
//! between the managed runtime, this crate's unwinder, and external diagnostics
//! tools that link against the `arkscope` C boundary with a different
//! toolchain. All structures use `#[repr(C)]` so their layout is stable across
//! that build boundary.
//!
//! ## Key Types
//!
//! - [`FrameType`] - Tag stored immediately below every frame pointer
//! - [`JsFunction`] - Symbolication result for one frame
//! - [`JitCodeEntry`] - A fast-JIT body observed while stepping
//! - [`ReadMemFn`] - Pluggable `(context, address) -> word` reader

#![cfg_attr(not(test), no_std)]

use core::ffi::c_void;

// ============================================================================
// Status Codes
// ============================================================================

/// Returned by every boundary function on success
pub const STATUS_OK: i32 = 1;

/// Returned by every boundary function on failure
///
/// Failures are always local: the caller keeps whatever it already has.
pub const STATUS_FAIL: i32 = -1;

/// Capacity of [`JsFunction::function_name`], including the NUL terminator
pub const FUNCTION_NAME_MAX: usize = 1024;

/// Capacity of [`JsFunction::url`], including the NUL terminator
pub const URL_MAX: usize = 1024;

/// Width of one stack/heap word on supported targets
pub const WORD_SIZE: u64 = 8;

// ============================================================================
// Frame Types
// ============================================================================

/// Tag identifying the memory layout of one call frame
///
/// The numeric values are part of the runtime ABI: the runtime's trampolines
/// push them verbatim, so they must never be renumbered.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameType {
    OptimizedFrame = 0,
    OptimizedEntryFrame = 1,
    OptimizedJsFunctionFrame = 2,
    OptimizedJsFastCallFunctionFrame = 3,
    FastJitFunctionFrame = 4,
    FastJitFastCallFunctionFrame = 5,
    AsmBridgeFrame = 6,
    LeaveFrame = 7,
    LeaveFrameWithArgv = 8,
    BuiltinCallLeaveFrame = 9,
    InterpretedFrame = 10,
    AsmInterpreterFrame = 11,
    InterpretedConstructorFrame = 12,
    BuiltinFrame = 13,
    BuiltinFrameWithArgv = 14,
    BuiltinEntryFrame = 15,
    InterpretedBuiltinFrame = 16,
    InterpretedFastNewFrame = 17,
    InterpretedEntryFrame = 18,
    AsmInterpreterEntryFrame = 19,
    AsmInterpreterBridgeFrame = 20,
    OptimizedJsFunctionArgsConfigFrame = 21,
    OptimizedJsFunctionUnfoldArgvFrame = 22,
    BuiltinFrameWithArgvStackOverflowFrame = 23,
    BaselineBuiltinFrame = 24,
    BaselineFrame = 25,
}

/// Number of declared frame types (tags are dense from zero)
pub const FRAME_TYPE_COUNT: usize = 26;

impl FrameType {
    /// Every declared frame type, in tag order
    pub const ALL: [FrameType; FRAME_TYPE_COUNT] = [
        FrameType::OptimizedFrame,
        FrameType::OptimizedEntryFrame,
        FrameType::OptimizedJsFunctionFrame,
        FrameType::OptimizedJsFastCallFunctionFrame,
        FrameType::FastJitFunctionFrame,
        FrameType::FastJitFastCallFunctionFrame,
        FrameType::AsmBridgeFrame,
        FrameType::LeaveFrame,
        FrameType::LeaveFrameWithArgv,
        FrameType::BuiltinCallLeaveFrame,
        FrameType::InterpretedFrame,
        FrameType::AsmInterpreterFrame,
        FrameType::InterpretedConstructorFrame,
        FrameType::BuiltinFrame,
        FrameType::BuiltinFrameWithArgv,
        FrameType::BuiltinEntryFrame,
        FrameType::InterpretedBuiltinFrame,
        FrameType::InterpretedFastNewFrame,
        FrameType::InterpretedEntryFrame,
        FrameType::AsmInterpreterEntryFrame,
        FrameType::AsmInterpreterBridgeFrame,
        FrameType::OptimizedJsFunctionArgsConfigFrame,
        FrameType::OptimizedJsFunctionUnfoldArgvFrame,
        FrameType::BuiltinFrameWithArgvStackOverflowFrame,
        FrameType::BaselineBuiltinFrame,
        FrameType::BaselineFrame,
    ];

    /// Decode a raw tag word read from a frame
    ///
    /// Returns `None` for undeclared tags; callers treat that as an ABI
    /// mismatch, never as a frame to guess a layout for.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<FrameType> {
        usize::try_from(raw).ok().and_then(|idx| Self::ALL.get(idx)).copied()
    }

    /// Raw tag value as pushed by the runtime
    #[must_use]
    pub const fn raw(self) -> u64 {
        self as u64
    }
}

// ============================================================================
// Boundary Structures
// ============================================================================

/// Symbolication result for a single managed frame
///
/// Strings are NUL-terminated and truncated to fit their buffers.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct JsFunction {
    /// Method display name
    pub function_name: [u8; FUNCTION_NAME_MAX],

    /// Source file (after source-map translation, if any)
    pub url: [u8; URL_MAX],

    /// 1-based line, or 0 when unknown
    pub line: i32,

    /// 1-based column, or 0 when unknown
    pub column: i32,

    /// Start of the method's code inside the parsed image
    pub code_begin: u64,

    /// Size of the method's code in bytes
    pub code_size: u64,
}

impl Default for JsFunction {
    fn default() -> Self {
        Self {
            function_name: [0; FUNCTION_NAME_MAX],
            url: [0; URL_MAX],
            line: 0,
            column: 0,
            code_begin: 0,
            code_size: 0,
        }
    }
}

/// A fast-JIT body observed while stepping a remote stack
///
/// Collected by the stepping boundary and later handed back to the JIT dump
/// writer, which reads the machine-code object through the same reader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JitCodeEntry {
    /// Method id of the compiled method
    pub method_id: u64,

    /// Address of the machine-code heap object
    pub machine_code: u64,
}

/// Memory reader supplied by an out-of-process caller
///
/// Must store the word at `addr` into `*value` and return `true`, or return
/// `false` without touching `*value`.
pub type ReadMemFn = unsafe extern "C" fn(ctx: *mut c_void, addr: usize, value: *mut usize) -> bool;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_round_trips_through_raw() {
        for (idx, ty) in FrameType::ALL.iter().enumerate() {
            assert_eq!(ty.raw(), idx as u64);
            assert_eq!(FrameType::from_raw(ty.raw()), Some(*ty));
        }
    }

    #[test]
    fn test_undeclared_tag_is_rejected() {
        assert_eq!(FrameType::from_raw(FRAME_TYPE_COUNT as u64), None);
        assert_eq!(FrameType::from_raw(u64::MAX), None);
    }
}
