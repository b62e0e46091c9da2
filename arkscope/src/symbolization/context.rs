//! Diagnostics context: configuration plus the two shared caches
//!
//! One context is owned by whoever drives diagnostics (the CLI, a crash
//! handler, an FFI caller) and passed by reference into every operation.
//! Tests simply build a fresh one.

use anyhow::Result;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::code_range::{CodeInfo, CodeRangeIndex, MethodTable};
use super::name_cache::NameCache;
use crate::address_space::{AddressSpace, LocalSpace};
use crate::config::UnwindConfig;
use crate::domain::{FileId, SymbolError};
use crate::frames::{FramePc, FrameWalker, Walk, WalkedFrame};
use crate::heap::HeapLayout;
use crate::trace::{DebugInfoExtractor, FrameSite, TraceFrame};

/// A file with compiled code loaded in the target
pub struct LoadedFile<'a> {
    pub id: FileId,
    /// Subtracted from a runtime pc to get an address in `table`'s space
    pub load_bias: u64,
    pub table: &'a dyn MethodTable,
}

impl<'a> LoadedFile<'a> {
    #[must_use]
    pub fn new(id: FileId, table: &'a dyn MethodTable) -> Self {
        Self { id, load_bias: 0, table }
    }

    #[must_use]
    pub fn with_load_bias(mut self, load_bias: u64) -> Self {
        self.load_bias = load_bias;
        self
    }
}

pub struct DiagnosticsContext {
    config: UnwindConfig,
    layout: HeapLayout,
    names: NameCache,
    code_ranges: Mutex<HashMap<FileId, Arc<CodeRangeIndex>>>,
}

impl Default for DiagnosticsContext {
    fn default() -> Self {
        Self::new(UnwindConfig::default(), HeapLayout::default())
    }
}

impl DiagnosticsContext {
    #[must_use]
    pub fn new(config: UnwindConfig, layout: HeapLayout) -> Self {
        Self {
            names: NameCache::new(config.name_cache_capacity),
            config,
            layout,
            code_ranges: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &UnwindConfig {
        &self.config
    }

    #[must_use]
    pub fn layout(&self) -> &HeapLayout {
        &self.layout
    }

    #[must_use]
    pub fn names(&self) -> &NameCache {
        &self.names
    }

    #[must_use]
    pub fn walker<'a, A: AddressSpace + ?Sized>(&'a self, space: &'a A) -> FrameWalker<'a, A> {
        FrameWalker::new(space, &self.layout, self.config)
    }

    /// Our own address space, region-checked whenever the config asks for it
    ///
    /// The check does not depend on who is asking: walking our own pid goes
    /// through exactly the same gate as any other in-process walk.
    ///
    /// # Errors
    /// Returns an error if the region list cannot be read
    pub fn local_space(&self) -> Result<LocalSpace> {
        if self.config.check_heap_regions {
            LocalSpace::from_self_maps()
        } else {
            Ok(LocalSpace::unchecked())
        }
    }

    /// Code-range index of `file`, built from `table` on first use
    ///
    /// The cache lock is only ever tried, never waited on: if another holder
    /// has it, the index is built for this call alone.
    ///
    /// # Errors
    /// Propagates table read and overlap errors
    pub fn code_range_index<T: MethodTable + ?Sized>(
        &self,
        file: FileId,
        table: &T,
    ) -> Result<Arc<CodeRangeIndex>, SymbolError> {
        if let Ok(cache) = self.code_ranges.try_lock() {
            if let Some(index) = cache.get(&file) {
                return Ok(Arc::clone(index));
            }
        }

        let index = Arc::new(CodeRangeIndex::from_table(table)?);
        debug!("Built code range index for {file} ({} methods)", index.len());

        match self.code_ranges.try_lock() {
            // Someone may have raced us in between; keep theirs
            Ok(mut cache) => Ok(Arc::clone(cache.entry(file).or_insert(index))),
            Err(_) => Ok(index),
        }
    }

    /// Drop a file's cached index (e.g. after it was unloaded)
    pub fn forget_file(&self, file: FileId) {
        if let Ok(mut cache) = self.code_ranges.try_lock() {
            cache.remove(&file);
        }
    }

    /// Find the loaded file and method owning a native pc
    ///
    /// # Errors
    /// Returns [`SymbolError::UnresolvedSymbol`] if no file claims `pc`
    pub fn locate(&self, pc: u64, files: &[LoadedFile<'_>]) -> Result<(FileId, CodeInfo), SymbolError> {
        for file in files {
            let Some(address) = pc.checked_sub(file.load_bias) else {
                continue;
            };
            match self.code_range_index(file.id, file.table) {
                Ok(index) => {
                    if let Ok(info) = index.translate_raw_pc(address) {
                        return Ok((file.id, info));
                    }
                }
                Err(err) => debug!("Skipping {} during lookup: {err}", file.id),
            }
        }
        Err(SymbolError::UnresolvedSymbol(pc))
    }

    /// Managed frames of a walk as formatter input, innermost first
    #[must_use]
    pub fn trace_frames(
        &self,
        walk: &Walk,
        files: &[LoadedFile<'_>],
        extractor: Option<&dyn DebugInfoExtractor>,
    ) -> Vec<TraceFrame> {
        walk.managed_frames().map(|frame| self.trace_frame(frame, files, extractor)).collect()
    }

    fn trace_frame(
        &self,
        frame: &WalkedFrame,
        files: &[LoadedFile<'_>],
        extractor: Option<&dyn DebugInfoExtractor>,
    ) -> TraceFrame {
        let heap_method = frame.method_id();
        match frame.pc {
            FramePc::Bytecode { offset, .. } => TraceFrame::single(FrameSite {
                method: heap_method,
                offset: offset.map(u64::from),
                name: None,
            }),
            FramePc::Native(pc) => match self.locate(pc, files) {
                Ok((_, info)) => {
                    let inlined = extractor
                        .map(|e| e.inlined_sites(info.method_id, info.offset))
                        .unwrap_or_default();
                    TraceFrame::single(FrameSite::new(info.method_id, info.offset))
                        .with_inlined(inlined)
                }
                Err(_) => {
                    TraceFrame::single(FrameSite { method: heap_method, ..FrameSite::default() })
                }
            },
            FramePc::Unknown => {
                TraceFrame::single(FrameSite { method: heap_method, ..FrameSite::default() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MethodId;
    use crate::symbolization::CodeRange;
    use std::cell::Cell;

    struct CountingTable {
        ranges: Vec<CodeRange>,
        builds: Cell<usize>,
    }

    impl MethodTable for CountingTable {
        fn code_ranges(&self) -> Result<Vec<CodeRange>, SymbolError> {
            self.builds.set(self.builds.get() + 1);
            Ok(self.ranges.clone())
        }
    }

    #[test]
    fn test_index_is_built_once_per_file() {
        let ctx = DiagnosticsContext::default();
        let table = CountingTable {
            ranges: vec![CodeRange::new(MethodId(1), 0x1000, 0x10)],
            builds: Cell::new(0),
        };

        for _ in 0..3 {
            ctx.code_range_index(FileId(1), &table).unwrap();
        }
        assert_eq!(table.builds.get(), 1);

        ctx.forget_file(FileId(1));
        ctx.code_range_index(FileId(1), &table).unwrap();
        assert_eq!(table.builds.get(), 2);
    }

    #[test]
    fn test_contended_cache_still_answers() {
        let ctx = DiagnosticsContext::default();
        let table = vec![CodeRange::new(MethodId(4), 0x1000, 0x10)];
        let _held = ctx.code_ranges.lock().unwrap();

        let index = ctx.code_range_index(FileId(1), &table).unwrap();
        assert_eq!(index.translate_raw_pc(0x1004).unwrap().method_id, MethodId(4));
    }

    #[test]
    fn test_locate_honors_load_bias() {
        let ctx = DiagnosticsContext::default();
        let table = vec![CodeRange::new(MethodId(2), 0x100, 0x20)];
        let files = [LoadedFile::new(FileId(9), &table).with_load_bias(0x7000_0000)];

        let (file, info) = ctx.locate(0x7000_0110, &files).unwrap();
        assert_eq!(file, FileId(9));
        assert_eq!((info.method_id, info.offset), (MethodId(2), 0x10));
        assert!(ctx.locate(0x110, &files).is_err());
    }

    #[test]
    fn test_fresh_contexts_do_not_share_names() {
        let first = DiagnosticsContext::default();
        first.names().insert(MethodId(1), "a".into());
        assert!(DiagnosticsContext::default().names().is_empty());
    }
}
