//! Pre-flight checks for arkscope
//!
//! Validates the target and the system before attaching.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use log::warn;
use object::{Object, ObjectSection};
use std::path::Path;

use crate::domain::Pid;

const PTRACE_SCOPE_PATH: &str = "/proc/sys/kernel/yama/ptrace_scope";

/// Run all pre-flight checks before attaching to `pid`
///
/// # Errors
/// Returns the first failed requirement
pub fn run_preflight_checks(pid: Pid, image: Option<&Path>, quiet: bool) -> Result<()> {
    check_process_exists(pid)?;
    check_proc_access(pid)?;
    if let Some(image) = image {
        check_image(image, quiet)?;
    }
    if pid != Pid::current() {
        check_ptrace_scope(quiet)?;
    }
    Ok(())
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check Yama's ptrace policy allows us to attach
///
/// Scope 3 forbids attaching outright. Scopes 1 and 2 need root (or
/// `CAP_SYS_PTRACE`) for a non-child target, which we only warn about: the
/// attach itself reports the real outcome.
fn check_ptrace_scope(quiet: bool) -> Result<()> {
    // No Yama: classic ptrace permission checks only
    let Ok(raw) = std::fs::read_to_string(PTRACE_SCOPE_PATH) else {
        return Ok(());
    };
    check_ptrace_scope_value(raw.trim().parse().unwrap_or(0), is_root(), quiet)
}

fn check_ptrace_scope_value(scope: u32, root: bool, quiet: bool) -> Result<()> {
    match scope {
        0 => Ok(()),
        3 => bail!(
            "Permission denied: ptrace is disabled ({PTRACE_SCOPE_PATH} = 3).\n\n\
             Attaching is impossible until reboot on this system."
        ),
        _ if root => Ok(()),
        scope => {
            if !quiet {
                warn!(
                    "{PTRACE_SCOPE_PATH} = {scope}: attaching to a non-child process \
                     needs root or CAP_SYS_PTRACE"
                );
            }
            Ok(())
        }
    }
}

/// Check the image exists, is an object file, and say what it can resolve
fn check_image(path: &Path, quiet: bool) -> Result<()> {
    if !path.exists() {
        bail!(
            "Image not found: {}\n\n\
             Make sure the path is correct and the file exists.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --image must point to an ELF image, not a directory.",
            path.display()
        );
    }

    let data =
        std::fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    let obj = object::File::parse(&*data)
        .with_context(|| format!("Not an object file: {}", path.display()))?;

    if quiet {
        return Ok(());
    }

    let has_debug_info = obj.section_by_name(".debug_info").is_some_and(|s| s.size() > 0);
    let has_symtab = obj.section_by_name(".symtab").is_some_and(|s| s.size() > 0);

    if !has_symtab {
        eprintln!("warning: image has no symbol table, compiled frames will show ? names");
    } else if !has_debug_info {
        eprintln!("warning: no DWARF debug info, source locations unavailable");
    }

    Ok(())
}

/// Check if the target process exists
///
/// # Errors
/// Returns an error if `/proc/<pid>` is missing
pub fn check_process_exists(pid: Pid) -> Result<()> {
    let proc_path = format!("/proc/{}", pid.0);
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {} not found.\n\n\
             Is the process still running? Check with: ps -p {}",
            pid.0,
            pid.0
        );
    }
    Ok(())
}

/// Check if we can read the process's memory maps
///
/// # Errors
/// Returns an error if `/proc/<pid>/maps` can't be read
pub fn check_proc_access(pid: Pid) -> Result<()> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    std::fs::read_to_string(&maps_path).with_context(|| {
        format!(
            "Cannot read {maps_path}\n\n\
             This usually means:\n\
             - The process doesn't exist (check: ps -p {})\n\
             - Permission denied (run with sudo)\n\
             - /proc is not mounted",
            pid.0
        )
    })?;
    Ok(())
}
