//! Synthetic stacks and heaps for integration tests

#![allow(dead_code)]

use arkscope::address_space::{AddressSpace, SnapshotSpace};
use arkscope::domain::MemoryReadFailure;
use arkscope::frames::{lookup, FunctionSlot, PcSource};
use arkscope::heap::HeapLayout;
use arkscope_common::{FrameType, WORD_SIZE};
use std::cell::{Cell, RefCell};
use std::ffi::c_void;

/// Hidden class whose bit-field says "function"
pub const FUNCTION_HCLASS: u64 = 0x20_0000;

/// Lay out one frame whose type tag sits at `fp - 8`
pub fn push_frame(space: &mut SnapshotSpace, fp: u64, ty: FrameType, prev: u64, ret: u64) {
    let desc = lookup(ty);
    let base = fp - WORD_SIZE - desc.type_offset;
    space.map_bytes(base, &[0; 0x80]);
    space.write_word(fp - WORD_SIZE, ty.raw());
    space.write_word(desc.prev_frame_slot(base), prev);
    if let Some(offset) = desc.return_address_offset {
        space.write_word(base + offset, ret);
    }
}

/// Frame base of the frame at `fp`
pub fn frame_base(fp: u64, ty: FrameType) -> u64 {
    fp - WORD_SIZE - lookup(ty).type_offset
}

/// Store the bytecode pc of an interpreted frame
pub fn set_bytecode_pc(space: &mut SnapshotSpace, fp: u64, ty: FrameType, pc: u64) {
    let PcSource::Bytecode(slot) = lookup(ty).pc else {
        panic!("{ty:?} has no bytecode pc slot");
    };
    space.write_word(frame_base(fp, ty) + slot, pc);
}

/// Store the function object of a frame with a fixed function slot
pub fn set_function(space: &mut SnapshotSpace, fp: u64, ty: FrameType, function: u64) {
    let FunctionSlot::Fixed(slot) = lookup(ty).function else {
        panic!("{ty:?} has no fixed function slot");
    };
    space.write_word(frame_base(fp, ty) + slot, function);
}

/// One function object with its method
pub struct FakeMethod {
    pub function: u64,
    pub method: u64,
    pub method_id: u32,
    pub bytecode_start: u64,
    pub file: u64,
}

impl FakeMethod {
    pub fn new(function: u64, method_id: u32) -> Self {
        Self {
            function,
            method: function + 0x1000,
            method_id,
            bytecode_start: function + 0x8000,
            file: 0x40_0000,
        }
    }

    pub fn install(&self, space: &mut SnapshotSpace, layout: &HeapLayout) {
        space.map_words(FUNCTION_HCLASS, &[0, u64::from(layout.function_type_first)]);
        space.map_bytes(self.function, &[0; 0x40]);
        space.write_word(self.function, FUNCTION_HCLASS);
        space.write_word(self.function + layout.function_method_offset, self.method);
        space.map_bytes(self.method, &[0; 0x30]);
        space.write_word(self.method + layout.method_bytecode_offset, self.bytecode_start);
        space.write_word(
            self.method + layout.method_literal_info_offset,
            0xFFFF_0000_0000_0000 | u64::from(self.method_id),
        );
        space.write_word(self.method + layout.method_file_offset, self.file);
    }

    /// Attach compiled code: a machine-code object describing `body`
    pub fn install_machine_code(
        &self,
        space: &mut SnapshotSpace,
        layout: &HeapLayout,
        code_object: u64,
        body_addr: u64,
        body: &[u8],
    ) {
        space.map_bytes(code_object, &[0; 0x18]);
        space.write_word(code_object + layout.machine_code_instr_size_offset, body.len() as u64);
        space.write_word(code_object + layout.machine_code_func_addr_offset, body_addr);
        // code pages are at least word granular; word-by-word readers need the tail
        space.map_bytes(body_addr, &vec![0; body.len().next_multiple_of(8)]);
        space.map_bytes(body_addr, body);
        space.write_word(self.function + layout.function_machine_code_offset, code_object);
    }
}

/// Counts reads and remembers whether any happened after the first failure
pub struct CountingSpace<'a> {
    pub inner: &'a SnapshotSpace,
    pub reads: Cell<usize>,
    pub failed: Cell<bool>,
    pub reads_after_failure: Cell<usize>,
    pub addresses: RefCell<Vec<u64>>,
}

impl<'a> CountingSpace<'a> {
    pub fn new(inner: &'a SnapshotSpace) -> Self {
        Self {
            inner,
            reads: Cell::new(0),
            failed: Cell::new(false),
            reads_after_failure: Cell::new(0),
            addresses: RefCell::new(Vec::new()),
        }
    }
}

impl AddressSpace for CountingSpace<'_> {
    fn read_word(&self, addr: u64) -> Result<u64, MemoryReadFailure> {
        self.reads.set(self.reads.get() + 1);
        self.addresses.borrow_mut().push(addr);
        if self.failed.get() {
            self.reads_after_failure.set(self.reads_after_failure.get() + 1);
        }
        let result = self.inner.read_word(addr);
        if result.is_err() {
            self.failed.set(true);
        }
        result
    }
}

/// C-style reader over a snapshot, as a foreign tool would hand one in
pub unsafe extern "C" fn read_snapshot(ctx: *mut c_void, addr: usize, value: *mut usize) -> bool {
    let space = unsafe { &*(ctx as *const SnapshotSpace) };
    match space.read_word(addr as u64) {
        Ok(word) => {
            unsafe { *value = word as usize };
            true
        }
        Err(_) => false,
    }
}

pub fn snapshot_ctx(space: &SnapshotSpace) -> *mut c_void {
    (space as *const SnapshotSpace).cast_mut().cast()
}
