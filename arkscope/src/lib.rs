//! # arkscope - Managed Stack Unwinding for the ArkTS Runtime
//!
//! arkscope walks the call stack of an ArkTS virtual machine from the outside:
//! from a crash handler in the same process, from a debugger holding the
//! process stopped with ptrace, or from a profiler that only hands us a memory
//! reader callback. It reports which managed methods are on the stack and
//! turns them into `at <name> (<file>:<line>:<column>)` lines.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Target process (ArkTS runtime)                  │
//! │   interpreter frames · AOT frames · fast-JIT frames · builtins  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ word reads (local / ptrace / callback)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      arkscope (this crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Frames     │──▶│    Heap      │──▶│ Symbolization│         │
//! │  │ (walker)     │   │ (method ids) │   │ (code ranges)│         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         │                                      │                │
//! │         ▼                                      ▼                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │     JIT      │   │    Export    │   │    Trace     │         │
//! │  │  (ELF dump)  │   │ (walk.json)  │   │ (formatter)  │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`address_space`]: how target memory is read. Every other module only
//!   sees the [`address_space::AddressSpace`] trait.
//!   - `local`: our own memory, optionally gated on readable mappings
//!   - `remote`: another process via `PTRACE_PEEKDATA`
//!   - `callback`: a C reader function handed in over FFI
//!   - `snapshot`: an in-memory image, for tests and saved stacks
//!
//! - [`frames`]: one descriptor per frame type (where the type tag, caller
//!   link, return address and function slot live) and the walker that steps
//!   callee → caller over them
//!
//! - [`heap`]: tagged-value decoding and the function → method → method id
//!   chain behind a frame's identity
//!
//! - [`symbolization`]: native pc → (method, offset) through per-file code
//!   range indexes, ELF-backed method tables, and the diagnostics context that
//!   owns the caches
//!
//! - [`trace`]: printable trace lines, with debug info and source maps
//!   plugged in through traits
//!
//! - [`jit`]: capturing fast-JIT code seen on the stack into an ELF dump
//!
//! - [`ffi`]: the C boundary (`arkscope_step_frame`, `arkscope_parse_frame_info`, ...)
//!
//! - [`export`]: JSON walk reports
//!
//! - [`cli`], [`preflight`], [`process_lookup`]: the `arkscope` binary's
//!   argument parsing and target checks
//!
//! - [`config`], [`domain`]: configuration, core types and errors
//!
//! ## Walking a Stack
//!
//! ```text
//! fp ──▶ [type tag at fp-8] ──▶ descriptor ──▶ caller fp, return address
//!          │                                      │
//!          ├── managed? resolve function → method │
//!          └── Entry frame? stop, report native ◀─┘
//! ```
//!
//! A walk ends at the first Entry frame (back in native code), at a read
//! failure, at an unknown tag, or after `max_depth` frames. Whatever was
//! walked before the failure is kept.

pub mod address_space;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod ffi;
pub mod frames;
pub mod heap;
pub mod jit;
pub mod preflight;
pub mod process_lookup;
pub mod symbolization;
pub mod trace;
