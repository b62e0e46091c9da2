//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::{UnwindConfig, DEFAULT_MAX_DEPTH};

#[derive(Parser, Debug)]
#[command(
    name = "arkscope",
    about = "Walk and symbolize the managed stack of an ArkTS runtime",
    after_help = "\
EXAMPLES:
    sudo arkscope my-app                           Attach by name, walk from rbp
    sudo arkscope --pid 1234 --fp 0x7ffd1c020f80   Walk from an explicit frame
    sudo arkscope --pid 1234 --image ./entry.an    Symbolize compiled frames
    sudo arkscope --pid 1234 --jit-dump jit.elf    Dump fast-JIT code seen on the stack"
)]
pub struct Args {
    /// Process name to inspect (auto-detects PID)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Process ID to inspect
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Frame pointer to start from (hex with 0x, or decimal); defaults to the
    /// stopped thread's frame pointer register
    #[arg(long, value_parser = parse_address)]
    pub fp: Option<u64>,

    /// Give up after this many frames
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// AOT or JIT ELF image mapped in the target, for compiled frames
    #[arg(short, long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Write the fast-JIT code found on the stack to an ELF file
    #[arg(long, value_name = "FILE")]
    pub jit_dump: Option<PathBuf>,

    /// Write a JSON walk report
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Read our own memory without checking it is mapped first
    #[arg(long)]
    pub no_region_check: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn unwind_config(&self) -> UnwindConfig {
        UnwindConfig {
            check_heap_regions: !self.no_region_check,
            ..UnwindConfig::default().with_max_depth(self.max_depth)
        }
    }
}

/// Parse `0x`-prefixed hex or plain decimal
///
/// # Errors
/// Returns a message clap shows next to the flag
pub fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}
