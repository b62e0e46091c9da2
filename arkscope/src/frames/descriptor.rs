//! Static per-frame-type layout facts
//!
//! Every frame the runtime pushes is a fixed record whose last-written word
//! (the type tag) sits immediately below the frame pointer. The rest of the
//! record is described relative to the record's base:
//!
//! ```text
//!   base + type_offset           = fp - 8      (tag)
//!   base + prev_frame_offset     -> caller fp
//!   base + return_address_offset -> native return pc (compiled/bridge frames)
//!   base + function slot         -> tagged JS function
//!   base + pc slot               -> absolute bytecode pc (interpreted frames)
//! ```
//!
//! All offsets are in bytes. One table entry exists per declared
//! [`FrameType`], indexed by its raw tag.

use arkscope_common::{FrameType, FRAME_TYPE_COUNT, WORD_SIZE};

/// Coarse family a frame type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCategory {
    Entry,
    Bridge,
    Interpreted,
    AsmInterpreted,
    OptimizedAot,
    FastJit,
    Baseline,
    Builtin,
    Leave,
}

/// Where a frame keeps its JS function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionSlot {
    /// Bridges, leave frames and entries carry no function
    None,
    /// Function at a constant offset from the base
    Fixed(u64),
    /// Function follows `argc` argument words that start one word after the
    /// argument count
    AfterArgv { argc_offset: u64 },
}

/// How a frame's position is recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcSource {
    /// The frame stores an absolute bytecode pc at this offset
    Bytecode(u64),
    /// Native code: the pc is the return address pushed by the callee
    Native,
}

/// Layout of one frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub frame_type: FrameType,
    pub category: FrameCategory,
    pub type_offset: u64,
    pub prev_frame_offset: u64,
    pub return_address_offset: Option<u64>,
    pub function: FunctionSlot,
    pub pc: PcSource,
    /// Frame executes JS code (as opposed to runtime/builtin glue)
    pub managed: bool,
    /// Walking stops here and reports the native caller
    pub terminal: bool,
}

impl FrameDescriptor {
    /// Base of the frame record whose tag lives at `tag_addr`
    #[must_use]
    pub fn base_from_tag(&self, tag_addr: u64) -> Option<u64> {
        tag_addr.checked_sub(self.type_offset)
    }

    /// Address holding the caller's frame pointer
    #[must_use]
    pub fn prev_frame_slot(&self, base: u64) -> u64 {
        base.wrapping_add(self.prev_frame_offset)
    }

    /// Caller stack pointer once this record has been popped
    #[must_use]
    pub fn caller_sp(&self, base: u64) -> u64 {
        let top = self.return_address_offset.unwrap_or(self.type_offset);
        base.wrapping_add(top).wrapping_add(WORD_SIZE)
    }
}

/// Largest argument count trusted from a variable-argv builtin frame
///
/// A garbage count would otherwise send the function read far off the stack.
pub const MAX_ARGV_LEN: u64 = 0xFFFF;

// Record shapes shared by several frame types.

const fn optimized(frame_type: FrameType, category: FrameCategory) -> FrameDescriptor {
    FrameDescriptor {
        frame_type,
        category,
        type_offset: 0,
        prev_frame_offset: 8,
        return_address_offset: Some(16),
        function: FunctionSlot::None,
        pc: PcSource::Native,
        managed: false,
        terminal: false,
    }
}

const fn optimized_js(frame_type: FrameType, category: FrameCategory) -> FrameDescriptor {
    FrameDescriptor {
        function: FunctionSlot::Fixed(24),
        managed: true,
        ..optimized(frame_type, category)
    }
}

const fn interpreted(frame_type: FrameType) -> FrameDescriptor {
    FrameDescriptor {
        frame_type,
        category: FrameCategory::Interpreted,
        type_offset: 48,
        prev_frame_offset: 40,
        return_address_offset: None,
        function: FunctionSlot::Fixed(0),
        pc: PcSource::Bytecode(32),
        managed: true,
        terminal: false,
    }
}

const fn builtin(frame_type: FrameType) -> FrameDescriptor {
    FrameDescriptor {
        frame_type,
        category: FrameCategory::Builtin,
        type_offset: 8,
        prev_frame_offset: 16,
        return_address_offset: Some(24),
        function: FunctionSlot::Fixed(40),
        pc: PcSource::Native,
        managed: false,
        terminal: false,
    }
}

const fn builtin_with_argv(frame_type: FrameType) -> FrameDescriptor {
    FrameDescriptor {
        function: FunctionSlot::AfterArgv { argc_offset: 24 },
        ..optimized(frame_type, FrameCategory::Builtin)
    }
}

/// Indexed by raw tag; `test_table_is_indexed_by_tag` keeps the two in step
pub static FRAME_DESCRIPTORS: [FrameDescriptor; FRAME_TYPE_COUNT] = [
    optimized(FrameType::OptimizedFrame, FrameCategory::Bridge),
    FrameDescriptor {
        terminal: true,
        ..optimized(FrameType::OptimizedEntryFrame, FrameCategory::Entry)
    },
    optimized_js(FrameType::OptimizedJsFunctionFrame, FrameCategory::OptimizedAot),
    optimized_js(FrameType::OptimizedJsFastCallFunctionFrame, FrameCategory::OptimizedAot),
    optimized_js(FrameType::FastJitFunctionFrame, FrameCategory::FastJit),
    optimized_js(FrameType::FastJitFastCallFunctionFrame, FrameCategory::FastJit),
    optimized(FrameType::AsmBridgeFrame, FrameCategory::Bridge),
    optimized(FrameType::LeaveFrame, FrameCategory::Leave),
    optimized(FrameType::LeaveFrameWithArgv, FrameCategory::Leave),
    optimized(FrameType::BuiltinCallLeaveFrame, FrameCategory::Leave),
    interpreted(FrameType::InterpretedFrame),
    FrameDescriptor {
        frame_type: FrameType::AsmInterpreterFrame,
        category: FrameCategory::AsmInterpreted,
        type_offset: 64,
        prev_frame_offset: 56,
        return_address_offset: None,
        function: FunctionSlot::Fixed(0),
        pc: PcSource::Bytecode(48),
        managed: true,
        terminal: false,
    },
    interpreted(FrameType::InterpretedConstructorFrame),
    builtin(FrameType::BuiltinFrame),
    builtin_with_argv(FrameType::BuiltinFrameWithArgv),
    builtin(FrameType::BuiltinEntryFrame),
    FrameDescriptor {
        frame_type: FrameType::InterpretedBuiltinFrame,
        category: FrameCategory::Interpreted,
        type_offset: 24,
        prev_frame_offset: 16,
        return_address_offset: None,
        function: FunctionSlot::Fixed(0),
        pc: PcSource::Bytecode(8),
        managed: false,
        terminal: false,
    },
    interpreted(FrameType::InterpretedFastNewFrame),
    FrameDescriptor {
        frame_type: FrameType::InterpretedEntryFrame,
        category: FrameCategory::Entry,
        type_offset: 16,
        prev_frame_offset: 8,
        return_address_offset: None,
        function: FunctionSlot::None,
        pc: PcSource::Bytecode(0),
        managed: false,
        terminal: false,
    },
    FrameDescriptor {
        frame_type: FrameType::AsmInterpreterEntryFrame,
        category: FrameCategory::Entry,
        type_offset: 8,
        prev_frame_offset: 16,
        return_address_offset: Some(24),
        function: FunctionSlot::None,
        pc: PcSource::Bytecode(0),
        managed: false,
        terminal: true,
    },
    optimized(FrameType::AsmInterpreterBridgeFrame, FrameCategory::Bridge),
    optimized(FrameType::OptimizedJsFunctionArgsConfigFrame, FrameCategory::OptimizedAot),
    optimized(FrameType::OptimizedJsFunctionUnfoldArgvFrame, FrameCategory::OptimizedAot),
    builtin_with_argv(FrameType::BuiltinFrameWithArgvStackOverflowFrame),
    optimized(FrameType::BaselineBuiltinFrame, FrameCategory::Baseline),
    FrameDescriptor {
        frame_type: FrameType::BaselineFrame,
        category: FrameCategory::Baseline,
        type_offset: 32,
        prev_frame_offset: 24,
        return_address_offset: None,
        function: FunctionSlot::Fixed(0),
        pc: PcSource::Bytecode(16),
        managed: true,
        terminal: false,
    },
];

/// Layout of a declared frame type
///
/// Total over [`FrameType`]: undeclared raw tags never get this far because
/// [`FrameType::from_raw`] refuses them.
#[must_use]
pub fn lookup(frame_type: FrameType) -> &'static FrameDescriptor {
    &FRAME_DESCRIPTORS[frame_type as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_tag() {
        for (idx, desc) in FRAME_DESCRIPTORS.iter().enumerate() {
            assert_eq!(desc.frame_type.raw(), idx as u64, "entry {idx} is out of place");
        }
    }

    #[test]
    fn test_exactly_two_terminal_entries() {
        let terminal: Vec<FrameType> = FRAME_DESCRIPTORS
            .iter()
            .filter(|d| d.terminal)
            .map(|d| d.frame_type)
            .collect();
        assert_eq!(
            terminal,
            vec![FrameType::OptimizedEntryFrame, FrameType::AsmInterpreterEntryFrame]
        );
        assert!(terminal.iter().all(|t| lookup(*t).category == FrameCategory::Entry));
    }

    #[test]
    fn test_terminal_frames_carry_return_address() {
        for desc in FRAME_DESCRIPTORS.iter().filter(|d| d.terminal) {
            assert!(desc.return_address_offset.is_some(), "{:?}", desc.frame_type);
        }
    }

    #[test]
    fn test_slots_do_not_collide_with_tag_or_link() {
        for desc in &FRAME_DESCRIPTORS {
            assert_ne!(desc.type_offset, desc.prev_frame_offset, "{:?}", desc.frame_type);
            if let FunctionSlot::Fixed(off) = desc.function {
                assert_ne!(off, desc.type_offset);
                assert_ne!(off, desc.prev_frame_offset);
            }
            if let Some(ret) = desc.return_address_offset {
                assert_ne!(ret, desc.prev_frame_offset);
            }
        }
    }

    #[test]
    fn test_managed_frames_have_a_function() {
        for desc in FRAME_DESCRIPTORS.iter().filter(|d| d.managed) {
            assert_ne!(desc.function, FunctionSlot::None, "{:?}", desc.frame_type);
        }
    }

    #[test]
    fn test_caller_sp_sits_past_return_address() {
        let entry = lookup(FrameType::OptimizedEntryFrame);
        // tag at fp-8 makes the base fp-8: saved fp at fp, return at fp+8
        let fp = 0x7000;
        let base = entry.base_from_tag(fp - 8).unwrap();
        assert_eq!(entry.prev_frame_slot(base), fp);
        assert_eq!(entry.caller_sp(base), fp + 16);
    }
}
