//! Callee → caller stack walking
//!
//! The walker is an explicit loop over a [`StackCursor`]. Each step reads
//! the tag below the current frame pointer, classifies the record through
//! the descriptor table and follows the record's caller link:
//!
//! ```text
//!            ┌──────────┐  tag is Entry (terminal)  ┌──────────┐
//!   fp ────▶ │ Walking  │ ────────────────────────▶ │ AtEntry  │  native fp/sp/pc
//!            └────┬─────┘                           └──────────┘
//!                 │ tag/link/pc read fails,
//!                 │ unknown tag, depth bound
//!                 ▼
//!            ┌──────────┐
//!            │  Error   │  frames walked so far are kept
//!            └──────────┘
//! ```
//!
//! Only structural reads (tag, caller link, return address, bytecode pc)
//! end a walk. Method resolution is best effort: a frame whose function or
//! method can't be decoded is still reported, just without an identity.

use log::{error, trace, warn};

use super::descriptor::{lookup, FrameCategory, FrameDescriptor, FunctionSlot, PcSource};
use crate::address_space::AddressSpace;
use crate::config::UnwindConfig;
use crate::domain::{MemoryReadFailure, MethodId, UnwindError};
use crate::heap::{HeapLayout, MethodIdentityResolver, ResolvedMethod};
use arkscope_common::{FrameType, JitCodeEntry, WORD_SIZE};

/// Registers carried from one step to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackCursor {
    pub fp: u64,
    pub sp: u64,
    /// Native pc of the frame at `fp`, when the callee pushed one
    pub pc: Option<u64>,
}

impl StackCursor {
    #[must_use]
    pub fn new(fp: u64, sp: u64, pc: u64) -> Self {
        Self { fp, sp, pc: (pc != 0).then_some(pc) }
    }
}

/// Position inside a frame's code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePc {
    /// Absolute bytecode pc, and its offset into the method when the method
    /// was resolved
    Bytecode { pc: u64, offset: Option<u32> },
    /// Native instruction address; translated through a code-range index
    Native(u64),
    /// Native frame entered from a frame that pushes no return address
    Unknown,
}

/// One classified frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkedFrame {
    pub frame_type: FrameType,
    pub category: FrameCategory,
    pub fp: u64,
    pub managed: bool,
    pub pc: FramePc,
    pub method: Option<ResolvedMethod>,
    /// Compiled body of a fast-JIT frame, for later capture
    pub jit: Option<JitCodeEntry>,
}

impl WalkedFrame {
    #[must_use]
    pub fn method_id(&self) -> Option<MethodId> {
        self.method.map(|m| m.identity.method)
    }
}

/// Native caller reported by a terminal Entry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFrame {
    pub fp: u64,
    pub sp: u64,
    pub pc: u64,
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Frame(WalkedFrame),
    Entry(NativeFrame),
}

/// Outcome of stepping until a managed frame or an Entry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedStep {
    Managed(WalkedFrame),
    Native(NativeFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEnd {
    AtEntry(NativeFrame),
    Error(UnwindError),
}

/// A whole walk: every frame visited, then how it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walk {
    pub frames: Vec<WalkedFrame>,
    pub end: WalkEnd,
}

impl Walk {
    /// True when the walk reached an Entry frame
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.end, WalkEnd::AtEntry(_))
    }

    pub fn managed_frames(&self) -> impl Iterator<Item = &WalkedFrame> {
        self.frames.iter().filter(|f| f.managed)
    }

    pub fn jit_entries(&self) -> impl Iterator<Item = JitCodeEntry> + '_ {
        self.frames.iter().filter_map(|f| f.jit)
    }
}

pub struct FrameWalker<'a, A: AddressSpace + ?Sized> {
    space: &'a A,
    resolver: MethodIdentityResolver<'a, A>,
    config: UnwindConfig,
}

impl<'a, A: AddressSpace + ?Sized> FrameWalker<'a, A> {
    #[must_use]
    pub fn new(space: &'a A, layout: &'a HeapLayout, config: UnwindConfig) -> Self {
        Self { space, resolver: MethodIdentityResolver::new(space, layout), config }
    }

    #[must_use]
    pub fn resolver(&self) -> &MethodIdentityResolver<'a, A> {
        &self.resolver
    }

    /// Walk from `fp` (with the innermost native `pc`, 0 if unknown) to the
    /// first Entry frame
    #[must_use]
    pub fn walk(&self, fp: u64, pc: u64) -> Walk {
        let mut cursor = StackCursor::new(fp, 0, pc);
        let mut frames = Vec::new();

        loop {
            if frames.len() >= self.config.max_depth {
                warn!("Stack walk stopped after {} frames", frames.len());
                let end = WalkEnd::Error(UnwindError::DepthExceeded(self.config.max_depth));
                return Walk { frames, end };
            }
            match self.step(&mut cursor) {
                Ok(Step::Frame(frame)) => frames.push(frame),
                Ok(Step::Entry(native)) => return Walk { frames, end: WalkEnd::AtEntry(native) },
                Err(err) => return Walk { frames, end: WalkEnd::Error(err) },
            }
        }
    }

    /// Step over non-managed frames until a managed one or an Entry frame
    ///
    /// On return the cursor already points at the caller of whatever was
    /// reported, so the next call continues the walk.
    ///
    /// # Errors
    /// Any structural read failure, an unknown tag, or more than
    /// `max_depth` frames without reaching either stop.
    pub fn step_to_managed(&self, cursor: &mut StackCursor) -> Result<ManagedStep, UnwindError> {
        for _ in 0..self.config.max_depth {
            match self.step(cursor)? {
                Step::Frame(frame) if frame.managed => return Ok(ManagedStep::Managed(frame)),
                Step::Frame(_) => {}
                Step::Entry(native) => return Ok(ManagedStep::Native(native)),
            }
        }
        Err(UnwindError::DepthExceeded(self.config.max_depth))
    }

    /// Classify the frame at `cursor.fp` and move the cursor to its caller
    ///
    /// # Errors
    /// Structural read failures and unknown tags. The cursor is left
    /// untouched on error.
    pub fn step(&self, cursor: &mut StackCursor) -> Result<Step, UnwindError> {
        let (desc, base) = self.classify(cursor.fp)?;

        if desc.terminal {
            let native = self.entry_caller(desc, base)?;
            trace!("{:?} at 0x{:x}: native caller fp=0x{:x}", desc.frame_type, cursor.fp, native.fp);
            *cursor = StackCursor { fp: native.fp, sp: native.sp, pc: Some(native.pc) };
            return Ok(Step::Entry(native));
        }

        let bytecode_pc = match desc.pc {
            PcSource::Bytecode(slot) => Some(self.space.read_word(base.wrapping_add(slot))?),
            PcSource::Native => None,
        };
        let prev_fp = self.space.read_word(desc.prev_frame_slot(base))?;
        let return_pc = desc
            .return_address_offset
            .map(|offset| self.space.read_word(base.wrapping_add(offset)))
            .transpose()?;

        let method = self.resolve_method(desc, base);
        let pc = match bytecode_pc {
            Some(pc) => FramePc::Bytecode {
                pc,
                offset: method.and_then(|m| self.resolver.bytecode_offset(m.method, pc)),
            },
            None => cursor.pc.map_or(FramePc::Unknown, FramePc::Native),
        };
        let jit = if desc.category == FrameCategory::FastJit { self.jit_entry(method) } else { None };

        let frame = WalkedFrame {
            frame_type: desc.frame_type,
            category: desc.category,
            fp: cursor.fp,
            managed: desc.managed,
            pc,
            method,
            jit,
        };
        trace!("{:?} at 0x{:x} -> caller fp 0x{:x}", desc.frame_type, cursor.fp, prev_fp);

        *cursor = StackCursor { fp: prev_fp, sp: desc.caller_sp(base), pc: return_pc };
        Ok(Step::Frame(frame))
    }

    fn classify(&self, fp: u64) -> Result<(&'static FrameDescriptor, u64), UnwindError> {
        if fp == 0 {
            return Err(UnwindError::NullFrame);
        }
        let tag_addr = fp.checked_sub(WORD_SIZE).ok_or(UnwindError::NullFrame)?;
        let raw = self.space.read_word(tag_addr)?;
        let Some(frame_type) = FrameType::from_raw(raw) else {
            error!("Unknown frame type {raw} at 0x{tag_addr:x}; runtime ABI does not match");
            return Err(UnwindError::UnknownFrameType { raw, addr: tag_addr });
        };
        let desc = lookup(frame_type);
        let base = desc
            .base_from_tag(tag_addr)
            .ok_or(UnwindError::MemoryRead(MemoryReadFailure { addr: tag_addr }))?;
        Ok((desc, base))
    }

    fn entry_caller(&self, desc: &FrameDescriptor, base: u64) -> Result<NativeFrame, UnwindError> {
        let fp = self.space.read_word(desc.prev_frame_slot(base))?;
        let pc = match desc.return_address_offset {
            Some(offset) => self.space.read_word(base.wrapping_add(offset))?,
            None => 0,
        };
        Ok(NativeFrame { fp, sp: desc.caller_sp(base), pc })
    }

    fn resolve_method(&self, desc: &FrameDescriptor, base: u64) -> Option<ResolvedMethod> {
        if !self.config.resolve_methods || desc.function == FunctionSlot::None {
            return None;
        }
        match self.resolver.resolve(base, desc) {
            Ok(method) => Some(method),
            Err(err) => {
                if desc.managed {
                    warn!("Unresolved {:?} frame at base 0x{base:x}: {err}", desc.frame_type);
                }
                None
            }
        }
    }

    fn jit_entry(&self, method: Option<ResolvedMethod>) -> Option<JitCodeEntry> {
        let method = method?;
        match self.resolver.machine_code(method.function) {
            Ok(code) => Some(JitCodeEntry {
                method_id: u64::from(method.identity.method.0),
                machine_code: code.object,
            }),
            Err(err) => {
                warn!("No machine code for {}: {err}", method.identity);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::SnapshotSpace;

    fn push(space: &mut SnapshotSpace, fp: u64, ty: FrameType, prev: u64, ret: u64, slot: u64) {
        let desc = lookup(ty);
        let base = fp - WORD_SIZE - desc.type_offset;
        space.map_bytes(base, &[0; 0x80]);
        space.write_word(fp - WORD_SIZE, ty.raw());
        space.write_word(desc.prev_frame_slot(base), prev);
        if let Some(offset) = desc.return_address_offset {
            space.write_word(base + offset, ret);
        }
        if let PcSource::Bytecode(offset) = desc.pc {
            space.write_word(base + offset, slot);
        }
    }

    fn walker<'a>(space: &'a SnapshotSpace, layout: &'a HeapLayout) -> FrameWalker<'a, SnapshotSpace> {
        let config = UnwindConfig { resolve_methods: false, ..UnwindConfig::default() };
        FrameWalker::new(space, layout, config)
    }

    #[test]
    fn test_walk_stops_at_entry_with_native_caller() {
        let mut space = SnapshotSpace::new();
        push(&mut space, 0x1100, FrameType::OptimizedJsFunctionFrame, 0x2100, 0xC0DE_0002, 0);
        push(&mut space, 0x2100, FrameType::AsmBridgeFrame, 0x3100, 0xC0DE_0003, 0);
        push(&mut space, 0x3100, FrameType::OptimizedEntryFrame, 0x9000, 0xBEEF, 0);
        let layout = HeapLayout::default();

        let walk = walker(&space, &layout).walk(0x1100, 0xC0DE_0001);
        assert!(walk.is_complete());
        assert_eq!(walk.frames.len(), 2);
        assert_eq!(walk.frames[0].pc, FramePc::Native(0xC0DE_0001));
        assert_eq!(walk.frames[1].pc, FramePc::Native(0xC0DE_0002));
        assert_eq!(walk.end, WalkEnd::AtEntry(NativeFrame { fp: 0x9000, sp: 0x3110, pc: 0xBEEF }));
    }

    #[test]
    fn test_interpreted_frame_reports_bytecode_pc() {
        let mut space = SnapshotSpace::new();
        push(&mut space, 0x1100, FrameType::AsmInterpreterFrame, 0x2100, 0, 0x5000_0040);
        push(&mut space, 0x2100, FrameType::LeaveFrame, 0x3100, 0, 0);
        push(&mut space, 0x3100, FrameType::AsmInterpreterEntryFrame, 0x9000, 0xBEEF, 0);
        let layout = HeapLayout::default();

        let walk = walker(&space, &layout).walk(0x1100, 0);
        assert_eq!(walk.frames[0].pc, FramePc::Bytecode { pc: 0x5000_0040, offset: None });
        // the interpreter frame pushes no return address for its caller
        assert_eq!(walk.frames[1].pc, FramePc::Unknown);
        assert!(walk.is_complete());
    }

    #[test]
    fn test_unknown_tag_ends_walk_loudly() {
        let mut space = SnapshotSpace::new();
        push(&mut space, 0x1100, FrameType::AsmBridgeFrame, 0x2100, 1, 0);
        space.map_words(0x2000, &[0; 0x20]);
        space.write_word(0x2100 - 8, 0x77);
        let layout = HeapLayout::default();

        let walk = walker(&space, &layout).walk(0x1100, 0);
        assert_eq!(walk.frames.len(), 1);
        assert_eq!(walk.end, WalkEnd::Error(UnwindError::UnknownFrameType { raw: 0x77, addr: 0x20F8 }));
    }

    #[test]
    fn test_null_frame_pointer() {
        let space = SnapshotSpace::new();
        let layout = HeapLayout::default();
        let walk = walker(&space, &layout).walk(0, 0);
        assert!(walk.frames.is_empty());
        assert_eq!(walk.end, WalkEnd::Error(UnwindError::NullFrame));
    }

    #[test]
    fn test_cycle_is_bounded_by_max_depth() {
        let mut space = SnapshotSpace::new();
        push(&mut space, 0x1100, FrameType::AsmBridgeFrame, 0x1100, 1, 0);
        let layout = HeapLayout::default();
        let config =
            UnwindConfig { resolve_methods: false, ..UnwindConfig::default() }.with_max_depth(8);

        let walk = FrameWalker::new(&space, &layout, config).walk(0x1100, 0);
        assert_eq!(walk.frames.len(), 8);
        assert_eq!(walk.end, WalkEnd::Error(UnwindError::DepthExceeded(8)));
    }

    /// Every word reads as the same value
    struct Flooded(u64);

    impl AddressSpace for Flooded {
        fn read_word(&self, _addr: u64) -> Result<u64, MemoryReadFailure> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_argv_frame_near_top_of_address_space_does_not_stop_walk() {
        let space = Flooded(FrameType::BuiltinFrameWithArgv.raw());
        let layout = HeapLayout::default();

        let walk = FrameWalker::new(&space, &layout, UnwindConfig::default()).walk(u64::MAX - 23, 0);
        assert_eq!(walk.frames.len(), 1);
        assert_eq!(walk.frames[0].frame_type, FrameType::BuiltinFrameWithArgv);
        assert!(walk.frames[0].method.is_none());
        assert!(matches!(walk.end, WalkEnd::Error(UnwindError::MemoryRead(_))));
    }

    #[test]
    fn test_step_to_managed_skips_glue_frames() {
        let mut space = SnapshotSpace::new();
        push(&mut space, 0x1100, FrameType::LeaveFrame, 0x2100, 0xA1, 0);
        push(&mut space, 0x2100, FrameType::BuiltinFrame, 0x3100, 0xA2, 0);
        push(&mut space, 0x3100, FrameType::OptimizedJsFunctionFrame, 0x4100, 0xA3, 0);
        push(&mut space, 0x4100, FrameType::OptimizedEntryFrame, 0x9000, 0xA4, 0);
        let layout = HeapLayout::default();
        let walker = walker(&space, &layout);

        let mut cursor = StackCursor::new(0x1100, 0, 0xA0);
        let first = walker.step_to_managed(&mut cursor).unwrap();
        let ManagedStep::Managed(frame) = first else { panic!("expected a managed frame") };
        assert_eq!(frame.frame_type, FrameType::OptimizedJsFunctionFrame);
        assert_eq!(frame.pc, FramePc::Native(0xA2));
        assert_eq!(cursor.fp, 0x4100);
        assert_eq!(cursor.pc, Some(0xA3));

        let second = walker.step_to_managed(&mut cursor).unwrap();
        assert!(matches!(second, ManagedStep::Native(NativeFrame { fp: 0x9000, pc: 0xA4, .. })));
    }

    #[test]
    fn test_failed_step_leaves_cursor_in_place() {
        let space = SnapshotSpace::new();
        let layout = HeapLayout::default();
        let mut cursor = StackCursor::new(0x1100, 0x1000, 0xA0);
        assert!(walker(&space, &layout).step(&mut cursor).is_err());
        assert_eq!(cursor, StackCursor::new(0x1100, 0x1000, 0xA0));
    }
}
