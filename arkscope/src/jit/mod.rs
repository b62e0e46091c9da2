//! JIT code capture and ELF dumps
//!
//! - [`capture`]: per-dump sessions reading compiled bodies through an
//!   address space, deduplicated by method id
//! - [`elf`]: the minimal ELF object those sessions serialize to

pub mod capture;
pub mod elf;

pub use capture::{default_jit_name, JitCaptureSession, MachineCodeCapture};
pub use elf::{JitElfImage, JitSymbol};
