//! # Symbol Resolution for Compiled Frames
//!
//! Interpreted frames tell us their method directly (a function slot) and
//! their position as a bytecode offset. Compiled frames (AOT, fast JIT) only
//! leave a raw native instruction address behind. This module turns such an
//! address back into a method and an offset, and from there into a name and
//! a source position.
//!
//! ## The Translation Problem
//!
//! A walk of a compiled frame yields something like `0x7f3a2b4c0780`. To
//! print `at render (app.ets:42:7)` we need to know:
//! - **Which loaded file** owns that address (several AOT images and the JIT
//!   code space may be mapped at once)
//! - **Which method** inside the file, and how far into its code the pc is
//! - **What the method is called** and which line the offset belongs to
//!
//! ## Address Translation Flow
//!
//! ```text
//! 1. Walker reports a native pc
//!    pc = 0x7f3a2b4c0780
//!
//! 2. Read /proc/<pid>/maps to find where the image is mapped
//!    image r-xp mapping at 0x7f3a2b4c0000, file offset 0x1000
//!
//! 3. Translate to an image offset
//!    offset = pc - map_base + load_offset = 0x1780
//!
//! 4. Binary search the file's code ranges (sorted, non-overlapping)
//!    [0x1700, 0x1900) → method render, offset 0x80
//!
//! 5. Ask the file's debug info for (method, 0x80)
//!    → app.ets:42:7, plus any callees inlined at that offset
//! ```
//!
//! ## Module Structure
//!
//! - **`code_range`**: [`CodeRangeIndex`], the per-file sorted range table
//!   and its `translate_raw_pc` binary search
//! - **`context`**: [`DiagnosticsContext`], which owns the per-file index
//!   cache and the method name cache and hands out walkers
//! - **`elf_image`**: [`ElfImage`], an AOT or JIT-dump ELF whose function
//!   symbols are the method table and whose DWARF is the line source
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing (image bases and the
//!   readable ranges behind region-checked local reads)
//! - **`name_cache`**: bounded methodId → name cache
//!
//! ## Caching
//!
//! - **Code ranges** are built the first time a file needs symbolication and
//!   kept for the context's lifetime. Callers working on another process,
//!   whose memory may differ call to call, build a fresh context per call.
//! - **Names** are kept up to a fixed count; the oldest is evicted first.
//! - Both caches only ever *try* their locks, so a walk started from a signal
//!   handler cannot deadlock on a lock the interrupted thread holds.

pub mod code_range;
pub mod context;
pub mod elf_image;
pub mod memory_maps;
pub mod name_cache;

pub use code_range::{CodeInfo, CodeRange, CodeRangeIndex, MethodTable};
pub use context::{DiagnosticsContext, LoadedFile};
pub use elf_image::{ElfImage, FrameInfo, ImageSymbol};
pub use memory_maps::{parse_memory_maps, MemoryRange};
pub use name_cache::NameCache;
