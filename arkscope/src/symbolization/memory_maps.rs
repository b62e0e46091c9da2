//! Memory mapping utilities for process address space analysis
//!
//! This module parses /proc/pid/maps. The readable mappings bound what the
//! local address space is allowed to dereference, and the mappings of an
//! AOT/JIT image give the base needed to turn a runtime pc into an image
//! offset.

use anyhow::{Context, Result};
use log::info;
use std::fs;

use crate::domain::Pid;

/// Memory range of a loaded binary in a process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Check if `len` bytes starting at `addr` all fall within this range
    #[must_use]
    pub fn contains_span(&self, addr: u64, len: u64) -> bool {
        addr >= self.start && addr.checked_add(len).is_some_and(|end| end <= self.end)
    }
}

/// One line of /proc/pid/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub range: MemoryRange,
    pub readable: bool,
    pub executable: bool,
    /// File offset of `range.start`
    pub offset: u64,
    pub path: Option<String>,
}

/// Parse the text of a maps file
///
/// Lines that don't parse are skipped; the kernel format is stable, so a
/// malformed line means a truncated read rather than a new layout.
#[must_use]
pub fn parse_maps(text: &str) -> Vec<Mapping> {
    text.lines().filter_map(parse_line).collect()
}

// Format: "start-end perms offset dev inode pathname"
fn parse_line(line: &str) -> Option<Mapping> {
    let mut parts = line.split_whitespace();
    let (start, end) = parts.next()?.split_once('-')?;
    let perms = parts.next()?.as_bytes();
    let offset = u64::from_str_radix(parts.next()?, 16).ok()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let path = parts.next().map(str::to_string);

    Some(Mapping {
        range: MemoryRange {
            start: u64::from_str_radix(start, 16).ok()?,
            end: u64::from_str_radix(end, 16).ok()?,
        },
        readable: perms.first() == Some(&b'r'),
        executable: perms.get(2) == Some(&b'x'),
        offset,
        path,
    })
}

/// Read and parse /proc/pid/maps
///
/// # Errors
/// Returns an error if the maps file cannot be read
pub fn read_mappings(pid: Pid) -> Result<Vec<Mapping>> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;
    Ok(parse_maps(&maps))
}

/// Readable ranges of a process, merged where adjacent
///
/// # Errors
/// Returns an error if the maps file cannot be read
pub fn readable_ranges(pid: Pid) -> Result<Vec<MemoryRange>> {
    Ok(merge_readable(&read_mappings(pid)?))
}

fn merge_readable(mappings: &[Mapping]) -> Vec<MemoryRange> {
    let mut ranges: Vec<MemoryRange> =
        mappings.iter().filter(|m| m.readable).map(|m| m.range).collect();
    ranges.sort_by_key(|r| r.start);

    let mut merged: Vec<MemoryRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Parse /proc/pid/maps to find the memory range of a specific binary
///
/// This function reads the process's memory maps and finds all mappings
/// that match the given binary path, returning the range from the minimum
/// start address to the maximum end address.
///
/// # Arguments
/// * `pid` - The process ID to query
/// * `binary_path` - The path to the binary to find (e.g., "/path/to/image.an")
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or if the binary is not found
pub fn parse_memory_maps(pid: Pid, binary_path: &str) -> Result<MemoryRange> {
    let mappings = read_mappings(pid)?;
    image_range(&mappings, binary_path)
        .ok_or_else(|| anyhow::anyhow!("Could not find memory range for {binary_path}"))
}

/// Range spanned by every mapping of `binary_path`
#[must_use]
pub fn image_range(mappings: &[Mapping], binary_path: &str) -> Option<MemoryRange> {
    let mut start_addr = None;
    let mut end_addr = None;

    // Find ALL mappings of the target binary to get the full range
    for mapping in mappings {
        if mapping.path.as_deref() == Some(binary_path) {
            let MemoryRange { start, end } = mapping.range;
            start_addr = Some(start_addr.map_or(start, |s: u64| s.min(start)));
            end_addr = Some(end_addr.map_or(end, |e: u64| e.max(end)));
        }
    }

    match (start_addr, end_addr) {
        (Some(start), Some(end)) => {
            info!(
                "Image memory range: 0x{:x} - 0x{:x} (size: {} KB)",
                start,
                end,
                end.saturating_sub(start) / 1024
            );
            Some(MemoryRange { start, end })
        }
        _ => None,
    }
}

/// Map base and file offset of the executable mapping of `binary_path`
///
/// A runtime pc inside that mapping corresponds to image offset
/// `pc - map_base + load_offset`.
#[must_use]
pub fn executable_base(mappings: &[Mapping], binary_path: &str) -> Option<(u64, u64)> {
    mappings
        .iter()
        .find(|m| m.executable && m.path.as_deref() == Some(binary_path))
        .map(|m| (m.range.start, m.offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
55d0c0a00000-55d0c0a02000 r--p 00000000 08:01 131 /usr/lib/app/entry.an
55d0c0a02000-55d0c0a09000 r-xp 00002000 08:01 131 /usr/lib/app/entry.an
55d0c0a09000-55d0c0a0b000 rw-p 00009000 08:01 131 /usr/lib/app/entry.an
7ffd1c000000-7ffd1c021000 rw-p 00000000 00:00 0 [stack]
7ffd1c021000-7ffd1c022000 ---p 00000000 00:00 0
";

    #[test]
    fn test_memory_range_contains() {
        let range = MemoryRange { start: 0x1000, end: 0x2000 };

        assert!(range.contains(0x1000));
        assert!(range.contains(0x1500));
        assert!(range.contains(0x1FFF));
        assert!(!range.contains(0x0FFF));
        assert!(!range.contains(0x2000));
        assert!(!range.contains(0x2001));
    }

    #[test]
    fn test_contains_span_rejects_straddling_reads() {
        let range = MemoryRange { start: 0x1000, end: 0x2000 };
        assert!(range.contains_span(0x1ff8, 8));
        assert!(!range.contains_span(0x1ffc, 8));
        assert!(!range.contains_span(u64::MAX - 2, 8));
    }

    #[test]
    fn test_parse_maps_fields() {
        let maps = parse_maps(SAMPLE);
        assert_eq!(maps.len(), 5);
        assert!(maps[1].executable);
        assert_eq!(maps[1].offset, 0x2000);
        assert_eq!(maps[3].path.as_deref(), Some("[stack]"));
        assert!(!maps[4].readable);
        assert_eq!(maps[4].path, None);
    }

    #[test]
    fn test_image_range_and_base() {
        let maps = parse_maps(SAMPLE);
        let range = image_range(&maps, "/usr/lib/app/entry.an").unwrap();
        assert_eq!(range, MemoryRange { start: 0x55d0_c0a0_0000, end: 0x55d0_c0a0_b000 });
        assert_eq!(
            executable_base(&maps, "/usr/lib/app/entry.an"),
            Some((0x55d0_c0a0_2000, 0x2000))
        );
        assert!(image_range(&maps, "/missing").is_none());
    }

    #[test]
    fn test_readable_ranges_merge_adjacent() {
        let merged = merge_readable(&parse_maps(SAMPLE));
        assert_eq!(
            merged,
            vec![
                MemoryRange { start: 0x55d0_c0a0_0000, end: 0x55d0_c0a0_b000 },
                MemoryRange { start: 0x7ffd_1c00_0000, end: 0x7ffd_1c02_1000 },
            ]
        );
    }

    #[test]
    fn test_parse_memory_maps_self() {
        // Test parsing our own process's memory maps
        let exe = std::env::current_exe().expect("Failed to get current exe");
        let exe_path = exe.to_str().expect("Failed to convert exe path to string");

        // This might fail in some test environments, so we allow it
        let _result = parse_memory_maps(Pid::current(), exe_path);
    }
}
