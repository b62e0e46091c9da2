//! Find a target ArkTS process by name.
//!
//! Application processes are usually named after their bundle
//! (`com.example.notes`), which the kernel truncates to 15 bytes in
//! `/proc/<pid>/stat`. Names are therefore matched against the full first
//! argument of `/proc/<pid>/cmdline` as well. When several processes match,
//! the ones that actually map the ArkTS runtime win.

use anyhow::{bail, Context, Result};
use log::warn;
use std::fs;
use std::path::Path;

use crate::domain::Pid;
use crate::symbolization::memory_maps::read_mappings;

/// Shared library every ArkTS VM process maps
pub const RUNTIME_LIBRARY: &str = "libark_jsruntime";

/// A process that matched a name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub pid: Pid,
    /// Command name from `/proc/<pid>/stat`
    pub command: String,
    /// First `cmdline` argument; bundle name for application processes
    pub argv0: String,
    /// The process has the runtime library mapped
    pub hosts_runtime: bool,
    /// `command` or the `argv0` basename equals the requested name
    pub exact: bool,
}

/// Find the ArkTS process called `name`.
///
/// # Errors
/// - No processes found
/// - Several equally good matches (ambiguous)
pub fn find_process_by_name(name: &str) -> Result<Candidate> {
    let own_pid = Pid::current();
    let mut candidates = Vec::new();

    for entry in fs::read_dir("/proc").context("Failed to read /proc")?.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let pid = Pid(pid);
        if pid == own_pid {
            continue;
        }
        if let Some(candidate) = inspect(pid, name) {
            candidates.push(candidate);
        }
    }

    choose(name, candidates)
}

/// Read what we need about `pid`; `None` for non-matches and processes that
/// vanished or are not ours to read
fn inspect(pid: Pid, name: &str) -> Option<Candidate> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid.0)).ok()?;
    let command = extract_comm(&stat).ok()?;
    let cmdline = fs::read(format!("/proc/{}/cmdline", pid.0)).unwrap_or_default();
    let argv0 = extract_argv0(&cmdline);

    let exact = match_quality(&command, &argv0, name)?;
    let hosts_runtime = read_mappings(pid)
        .map(|maps| {
            maps.iter()
                .filter_map(|m| m.path.as_deref())
                .any(is_runtime_library)
        })
        .unwrap_or(false);

    Some(Candidate { pid, command, argv0, hosts_runtime, exact })
}

/// Pick one process out of the matches.
///
/// Runtime hosts beat everything else, then exact names beat substrings.
/// Anything left tied is reported back to the user.
fn choose(name: &str, mut candidates: Vec<Candidate>) -> Result<Candidate> {
    if candidates.is_empty() {
        bail!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps -ef | grep {name}"
        );
    }

    if candidates.iter().any(|c| c.hosts_runtime) {
        candidates.retain(|c| c.hosts_runtime);
    }
    if candidates.iter().any(|c| c.exact) {
        candidates.retain(|c| c.exact);
    }

    if candidates.len() == 1 {
        let chosen = candidates.remove(0);
        if !chosen.hosts_runtime {
            warn!(
                "Process {} ({}) does not map {RUNTIME_LIBRARY}; frames may not resolve",
                chosen.pid,
                chosen.command
            );
        }
        return Ok(chosen);
    }

    let list: Vec<String> = candidates
        .iter()
        .map(|c| {
            let runtime = if c.hosts_runtime { ", ArkTS runtime" } else { "" };
            format!("  {} ({}{runtime})", c.pid.0, c.argv0)
        })
        .collect();
    bail!(
        "Multiple processes match '{name}':\n{}\n\n\
         Specify PID explicitly: arkscope --pid <PID>",
        list.join("\n")
    )
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}

fn extract_argv0(cmdline: &[u8]) -> String {
    let first = cmdline.split(|&b| b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(first).into_owned()
}

fn is_runtime_library(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(RUNTIME_LIBRARY))
}

/// `Some(true)` for an exact match, `Some(false)` for a substring match
fn match_quality(command: &str, argv0: &str, pattern: &str) -> Option<bool> {
    let argv0_base = Path::new(argv0).file_name().and_then(|n| n.to_str()).unwrap_or(argv0);
    let pattern_base = Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);

    if pattern_base.is_empty() {
        return None;
    }
    if command == pattern_base || argv0_base == pattern_base {
        Some(true)
    } else if command.contains(pattern_base) || argv0_base.contains(pattern_base) {
        Some(false)
    } else {
        None
    }
}
