//! # arkscope - Main Entry Point
//!
//! Attaches to a process (`arkscope <PROCESS>` or `--pid <PID>`), walks its
//! managed stack from the stopped thread's frame pointer (or `--fp`), and
//! prints one `at <name> (<file>:<line>:<column>)` line per call site.
//!
//! Optional outputs: `--jit-dump` writes the fast-JIT code seen on the stack
//! as an ELF file, `--export` writes a JSON walk report.

#![allow(clippy::too_many_lines)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use arkscope::address_space::{AddressSpace, PtraceSession};
use arkscope::cli::Args;
use arkscope::domain::{MethodId, Pid, SymbolError};
use arkscope::export::{export_walk, WalkReport};
use arkscope::frames::{FramePc, Walk, WalkEnd};
use arkscope::heap::HeapLayout;
use arkscope::jit::JitCaptureSession;
use arkscope::preflight::run_preflight_checks;
use arkscope::process_lookup::find_process_by_name;
use arkscope::symbolization::memory_maps::{executable_base, read_mappings};
use arkscope::symbolization::{DiagnosticsContext, ElfImage, LoadedFile};
use arkscope::trace::{DebugInfoExtractor, FrameSite, SourcePosition, TraceFormatter, TraceFrame};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") || msg.contains("cannot use process") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Resolve the target PID from CLI arguments.
///
/// - `arkscope my-app` - find process by name
/// - `arkscope --pid 1234` - explicit PID
fn resolve_pid(args: &Args) -> Result<Pid> {
    if let Some(ref name) = args.process {
        if args.pid.is_some() {
            bail!(
                "Cannot use PROCESS argument with --pid.\n\n\
                 Use either:\n  \
                 arkscope my-app         (find by name)\n  \
                 arkscope --pid 1234     (explicit PID)"
            );
        }
        return Ok(find_process_by_name(name)?.pid);
    }

    if let Some(pid) = args.pid {
        return Ok(Pid(pid));
    }

    bail!(
        "Missing required argument: PROCESS or --pid\n\n\
         Usage:\n  \
         arkscope my-app         Find the process by name\n  \
         arkscope --pid 1234     Explicit PID\n\n\
         Run 'arkscope --help' for more options"
    )
}

/// Extractor used when no image was given: every lookup misses
struct NoDebugInfo;

impl DebugInfoExtractor for NoDebugInfo {
    fn method_name(&self, _method: MethodId) -> Option<String> {
        None
    }

    fn source_position(
        &self,
        _method: MethodId,
        offset: u64,
    ) -> Result<SourcePosition, SymbolError> {
        Err(SymbolError::UnresolvedSymbol(offset))
    }
}

/// The `--image` file, parsed, with where the target mapped it
struct MappedImage {
    image: ElfImage,
    load_bias: u64,
}

fn load_image(pid: Pid, path: &Path) -> Result<MappedImage> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let image = ElfImage::parse(&data).with_context(|| format!("Failed to parse {}", path.display()))?;

    let canonical = std::fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve path: {}", path.display()))?;
    let mappings = read_mappings(pid)?;
    let load_bias = match executable_base(&mappings, &canonical.to_string_lossy()) {
        Some((map_base, load_offset)) => map_base.saturating_sub(load_offset),
        None => {
            warn!("{} is not mapped executable in {pid}; using it unrelocated", path.display());
            0
        }
    };
    info!("Image {} ({} methods), load bias 0x{load_bias:x}", image.id(), image.symbols().len());
    Ok(MappedImage { image, load_bias })
}

/// Trace frames for printing
///
/// Interpreted frames carry heap method ids, which live in a different
/// namespace than the image's; they are printed by id, never looked up.
fn printable_frames(
    ctx: &DiagnosticsContext,
    walk: &Walk,
    image: Option<&MappedImage>,
) -> Vec<TraceFrame> {
    let files: Vec<LoadedFile<'_>> = image
        .map(|m| LoadedFile::new(m.image.id(), &m.image).with_load_bias(m.load_bias))
        .into_iter()
        .collect();
    let extractor = image.map(|m| &m.image as &dyn DebugInfoExtractor);

    let mut frames = ctx.trace_frames(walk, &files, extractor);
    for (frame, walked) in frames.iter_mut().zip(walk.managed_frames()) {
        if let FramePc::Bytecode { offset, .. } = walked.pc {
            let name = match (walked.method_id(), offset) {
                (Some(method), Some(offset)) => format!("{method}+0x{offset:x}"),
                (Some(method), None) => method.to_string(),
                (None, _) => continue,
            };
            *frame = TraceFrame::single(FrameSite { name: Some(name), ..FrameSite::default() });
        }
    }
    frames
}

fn inspect<A: AddressSpace + ?Sized>(
    args: &Args,
    ctx: &DiagnosticsContext,
    space: &A,
    pid: Pid,
    fp: u64,
    pc: u64,
) -> Result<()> {
    let quiet = args.quiet;
    let image = args.image.as_deref().map(|path| load_image(pid, path)).transpose()?;

    if !quiet {
        println!("Walking {pid} from fp 0x{fp:x}");
    }
    let walker = ctx.walker(space);
    let walk = walker.walk(fp, pc);

    let frames = printable_frames(ctx, &walk, image.as_ref());
    let fallback = NoDebugInfo;
    let formatter = match image.as_ref() {
        Some(m) => TraceFormatter::new(&m.image),
        None => TraceFormatter::new(&fallback),
    }
    .with_name_cache(ctx.names());
    let text = formatter.format_trace(&frames);
    print!("{text}");

    match &walk.end {
        WalkEnd::AtEntry(native) => {
            if !quiet {
                println!(
                    "{} frames, entered from native pc 0x{:x}",
                    walk.frames.len(),
                    native.pc
                );
            }
        }
        WalkEnd::Error(err) => {
            eprintln!("warning: walk stopped after {} frames: {err}", walk.frames.len());
        }
    }

    if let Some(ref path) = args.jit_dump {
        let mut session = JitCaptureSession::new();
        for entry in walk.jit_entries() {
            session.capture_entry(walker.resolver(), space, entry, None);
        }
        if session.is_empty() {
            warn!("No fast-JIT code on the stack; {} not written", path.display());
        } else {
            let count = session.len();
            let mut out = BufWriter::new(
                File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
            );
            session.write_dump(&mut out).context("Failed to write JIT dump")?;
            if !quiet {
                println!("Wrote {count} JIT methods to {}", path.display());
            }
        }
    }

    if let Some(ref path) = args.export {
        let report = WalkReport::new(Some(pid), &walk).with_trace(&text);
        export_walk(&report, path)
            .with_context(|| format!("Failed to export walk to {}", path.display()))?;
        if !quiet {
            println!("Walk report written to {}", path.display());
        }
    }

    Ok(())
}

fn run() -> Result<()> {
    let args = Args::parse();
    let pid = resolve_pid(&args)?;

    run_preflight_checks(pid, args.image.as_deref(), args.quiet)?;

    if !args.quiet {
        println!("arkscope v{}", env!("CARGO_PKG_VERSION"));
    }

    let ctx = DiagnosticsContext::new(args.unwind_config(), HeapLayout::default());

    if pid == Pid::current() {
        let Some(fp) = args.fp else {
            bail!("Missing required argument: --fp is needed to walk our own stack");
        };
        let space = ctx.local_space()?;
        return inspect(&args, &ctx, &space, pid, fp, 0);
    }

    let session = PtraceSession::attach(pid)?;
    let (fp, pc) = match args.fp {
        Some(fp) => (fp, 0),
        None => {
            let regs = session.registers()?;
            (regs.fp, regs.pc)
        }
    };
    let space = session.space();
    inspect(&args, &ctx, &space, pid, fp, pc)
}
