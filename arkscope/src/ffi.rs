//! C boundary for out-of-process diagnostics tools
//!
//! Tools built with another toolchain (crash collectors, profilers) drive
//! the unwinder through these functions. Every function:
//! - returns [`STATUS_OK`] or [`STATUS_FAIL`]
//! - only exchanges `#[repr(C)]` types from `arkscope-common`
//! - never lets a panic cross the boundary
//!
//! Memory of the target is read through the caller's `(ctx, addr) -> word`
//! reader, and every call builds its own walker state: the target may have
//! changed since the previous call.

#![allow(unsafe_code)] // raw pointers handed in by C callers

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error};
use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::fs::File;
use std::mem::ManuallyDrop;
use std::os::fd::FromRawFd;
use std::panic::{self, AssertUnwindSafe};

use crate::address_space::CallbackSpace;
use crate::config::UnwindConfig;
use crate::domain::{FileId, MethodId};
use crate::frames::{FrameWalker, ManagedStep, StackCursor, WalkedFrame};
use crate::heap::{HeapLayout, MethodIdentityResolver};
use crate::jit::JitCaptureSession;
use crate::symbolization::ElfImage;
use arkscope_common::{JitCodeEntry, JsFunction, ReadMemFn, STATUS_FAIL, STATUS_OK};

/// Parsed images, keyed by content fingerprint
#[derive(Default)]
pub struct SymbolExtractor {
    images: HashMap<FileId, ElfImage>,
}

impl SymbolExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed image for `data`, parsing it on first sight
    ///
    /// # Errors
    /// Returns an error if the bytes are not a usable image
    pub fn image(&mut self, data: &[u8]) -> Result<&ElfImage> {
        let id = ElfImage::fingerprint(data);
        if !self.images.contains_key(&id) {
            let image = ElfImage::parse(data)?;
            debug!("Extractor cached image {id}");
            self.images.insert(id, image);
        }
        self.images.get(&id).ok_or_else(|| anyhow!("image {id} vanished from cache"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn boundary<F>(name: &str, body: F) -> i32
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => STATUS_OK,
        Ok(Err(err)) => {
            debug!("{name} failed: {err:#}");
            STATUS_FAIL
        }
        Err(_) => {
            error!("{name} panicked; returning failure to caller");
            STATUS_FAIL
        }
    }
}

/// Copy `s` into a fixed C buffer, truncating and NUL-terminating
fn fill_c_buf(buf: &mut [u8], s: &str) {
    let Some(max) = buf.len().checked_sub(1) else {
        return;
    };
    let len = s.len().min(max);
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf[len..].fill(0);
}

fn to_u64(value: usize) -> u64 {
    value as u64
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).context("value does not fit a pointer")
}

/// Allocate a symbol extractor; `*out` receives its handle
///
/// # Safety
/// `out` must be null or valid for one `usize` write.
#[no_mangle]
pub unsafe extern "C" fn arkscope_create_symbol_extractor(out: *mut usize) -> i32 {
    boundary("create_symbol_extractor", || {
        if out.is_null() {
            bail!("null out pointer");
        }
        let handle = Box::into_raw(Box::new(SymbolExtractor::new()));
        // SAFETY: checked non-null; caller guarantees validity.
        unsafe { *out = handle as usize };
        Ok(())
    })
}

/// Free an extractor made by [`arkscope_create_symbol_extractor`]
///
/// # Safety
/// `handle` must come from that function and not have been destroyed.
#[no_mangle]
pub unsafe extern "C" fn arkscope_destroy_symbol_extractor(handle: usize) -> i32 {
    boundary("destroy_symbol_extractor", || {
        if handle == 0 {
            bail!("null extractor");
        }
        // SAFETY: the handle was produced by Box::into_raw above.
        drop(unsafe { Box::from_raw(handle as *mut SymbolExtractor) });
        Ok(())
    })
}

/// Name, source position and code range of a pc inside a mapped image
///
/// The image's bytes are `data[..size]`; it is mapped at `map_base` from
/// file offset `load_offset`. A zero `extractor` parses without caching.
///
/// # Safety
/// `data` must be valid for `size` bytes, `out` for one [`JsFunction`]
/// write, and `extractor` zero or a live handle.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn arkscope_parse_frame_info(
    pc: usize,
    method_id: usize,
    map_base: usize,
    load_offset: usize,
    data: *const u8,
    size: usize,
    extractor: usize,
    out: *mut JsFunction,
) -> i32 {
    boundary("parse_frame_info", || {
        if data.is_null() || size == 0 || out.is_null() {
            bail!("null image or out pointer");
        }
        // SAFETY: caller guarantees `data` spans `size` bytes.
        let bytes = unsafe { std::slice::from_raw_parts(data, size) };

        let image_offset = to_u64(pc)
            .checked_sub(to_u64(map_base))
            .and_then(|rel| rel.checked_add(to_u64(load_offset)))
            .ok_or_else(|| anyhow!("pc 0x{pc:x} lies below map base 0x{map_base:x}"))?;
        let method = MethodId(u32::try_from(method_id).unwrap_or(u32::MAX));

        let mut scratch = SymbolExtractor::new();
        let extractor = if extractor == 0 {
            &mut scratch
        } else {
            // SAFETY: caller guarantees a live handle.
            unsafe { &mut *(extractor as *mut SymbolExtractor) }
        };
        let info = extractor.image(bytes)?.frame_info(image_offset, method)?;

        // SAFETY: checked non-null; caller guarantees validity.
        let out = unsafe { &mut *out };
        fill_c_buf(&mut out.function_name, &info.name);
        fill_c_buf(&mut out.url, &info.url);
        out.line = i32::try_from(info.line).unwrap_or(i32::MAX);
        out.column = i32::try_from(info.column).unwrap_or(i32::MAX);
        out.code_begin = info.code_begin;
        out.code_size = info.code_size;
        Ok(())
    })
}

struct StepRegisters {
    fp: *mut usize,
    sp: *mut usize,
    pc: *mut usize,
    method_id: *mut usize,
    is_managed: *mut bool,
}

impl StepRegisters {
    fn check(&self) -> Result<()> {
        if self.fp.is_null()
            || self.sp.is_null()
            || self.pc.is_null()
            || self.method_id.is_null()
            || self.is_managed.is_null()
        {
            bail!("null register pointer");
        }
        Ok(())
    }

    /// # Safety
    /// Pointers were checked and are valid for reads.
    unsafe fn cursor(&self) -> StackCursor {
        // SAFETY: upheld by caller.
        unsafe { StackCursor::new(to_u64(*self.fp), to_u64(*self.sp), to_u64(*self.pc)) }
    }

    /// # Safety
    /// Pointers were checked and are valid for writes.
    unsafe fn store(&self, cursor: StackCursor, managed: Option<&WalkedFrame>) -> Result<()> {
        let method = managed.and_then(WalkedFrame::method_id).map_or(0, |m| m.0);
        // SAFETY: upheld by caller.
        unsafe {
            *self.fp = to_usize(cursor.fp)?;
            *self.sp = to_usize(cursor.sp)?;
            *self.pc = to_usize(cursor.pc.unwrap_or(0))?;
            *self.method_id = method as usize;
            *self.is_managed = managed.is_some();
        }
        Ok(())
    }
}

fn step_once(
    read_mem: Option<ReadMemFn>,
    ctx: *mut c_void,
    regs: &StepRegisters,
    mut on_frame: impl FnMut(&WalkedFrame),
) -> Result<()> {
    let read_mem = read_mem.ok_or_else(|| anyhow!("null read function"))?;
    regs.check()?;

    // SAFETY: the C caller vouches for `read_mem` over `ctx`.
    let space = unsafe { CallbackSpace::new(ctx, read_mem) };
    let layout = HeapLayout::default();
    let walker = FrameWalker::new(&space, &layout, UnwindConfig::default());

    // SAFETY: checked above.
    let mut cursor = unsafe { regs.cursor() };
    match walker.step_to_managed(&mut cursor)? {
        ManagedStep::Managed(frame) => {
            on_frame(&frame);
            // SAFETY: checked above.
            unsafe { regs.store(cursor, Some(&frame)) }
        }
        ManagedStep::Native(native) => {
            let cursor = StackCursor::new(native.fp, native.sp, native.pc);
            // SAFETY: checked above.
            unsafe { regs.store(cursor, None) }
        }
    }
}

/// Step to the next managed frame, or out through an Entry frame
///
/// On success `*fp`, `*sp`, `*pc` hold the caller's registers, so calling
/// again continues the walk. With `*is_managed` true, `*method_id` is the
/// managed frame's method id (0 if unresolved); with it false the registers
/// are the native frame that entered the runtime.
///
/// # Safety
/// `read_mem` must be safe to call with `ctx`; the register pointers must
/// be valid for reads and writes.
#[no_mangle]
pub unsafe extern "C" fn arkscope_step_frame(
    ctx: *mut c_void,
    read_mem: Option<ReadMemFn>,
    fp: *mut usize,
    sp: *mut usize,
    pc: *mut usize,
    method_id: *mut usize,
    is_managed: *mut bool,
) -> i32 {
    boundary("step_frame", || {
        let regs = StepRegisters { fp, sp, pc, method_id, is_managed };
        step_once(read_mem, ctx, &regs, |_| {})
    })
}

/// [`arkscope_step_frame`], also recording fast-JIT bodies it passes
///
/// Entries are appended to `jit[*jit_count..jit_capacity]` skipping
/// methods already present; `*jit_count` is updated.
///
/// # Safety
/// As [`arkscope_step_frame`], plus `jit` valid for `jit_capacity`
/// entries and `jit_count` for a read and a write.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn arkscope_step_frame_with_jit(
    ctx: *mut c_void,
    read_mem: Option<ReadMemFn>,
    fp: *mut usize,
    sp: *mut usize,
    pc: *mut usize,
    method_id: *mut usize,
    is_managed: *mut bool,
    jit: *mut JitCodeEntry,
    jit_capacity: usize,
    jit_count: *mut usize,
) -> i32 {
    boundary("step_frame_with_jit", || {
        if jit.is_null() || jit_count.is_null() {
            bail!("null JIT buffer");
        }
        // SAFETY: checked non-null; caller guarantees the buffer spans
        // `jit_capacity` entries.
        let (entries, count) =
            unsafe { (std::slice::from_raw_parts_mut(jit, jit_capacity), &mut *jit_count) };
        if *count > entries.len() {
            bail!("JIT count {} exceeds capacity {}", *count, entries.len());
        }

        let regs = StepRegisters { fp, sp, pc, method_id, is_managed };
        step_once(read_mem, ctx, &regs, |frame| {
            let Some(entry) = frame.jit else {
                return;
            };
            if entries[..*count].iter().any(|e| e.method_id == entry.method_id) {
                return;
            }
            if *count < entries.len() {
                entries[*count] = entry;
                *count += 1;
            } else {
                debug!("JIT buffer full; dropping method {}", entry.method_id);
            }
        })
    })
}

/// Write an ELF dump of the recorded JIT bodies to `fd`
///
/// `fd` stays open. Bodies that can't be read are skipped; the call fails
/// only if nothing could be captured or the write fails.
///
/// # Safety
/// `read_mem` must be safe to call with `ctx`, `entries` valid for `count`
/// entries, and `fd` an open, writable descriptor.
#[no_mangle]
pub unsafe extern "C" fn arkscope_write_jit_dump(
    ctx: *mut c_void,
    read_mem: Option<ReadMemFn>,
    fd: c_int,
    entries: *const JitCodeEntry,
    count: usize,
) -> i32 {
    boundary("write_jit_dump", || {
        let read_mem = read_mem.ok_or_else(|| anyhow!("null read function"))?;
        if entries.is_null() || count == 0 || fd < 0 {
            bail!("nothing to dump");
        }
        // SAFETY: caller guarantees `entries` spans `count` entries.
        let entries = unsafe { std::slice::from_raw_parts(entries, count) };
        // SAFETY: the C caller vouches for `read_mem` over `ctx`.
        let space = unsafe { CallbackSpace::new(ctx, read_mem) };
        let layout = HeapLayout::default();
        let resolver = MethodIdentityResolver::new(&space, &layout);

        let mut session = JitCaptureSession::new();
        for entry in entries {
            session.capture_entry(&resolver, &space, *entry, None);
        }

        // SAFETY: the descriptor is borrowed, never closed here.
        let mut file = ManuallyDrop::new(unsafe { File::from_raw_fd(fd) });
        let written = session.write_dump(&mut *file)?;
        debug!("Wrote {written} byte JIT dump to fd {fd}");
        Ok(())
    })
}
