//! Human-readable traces
//!
//! [`formatter`] turns resolved frames into `at <name> (<file>:<line>:<col>)`
//! lines, delegating positions to a [`DebugInfoExtractor`].

pub mod formatter;

pub use formatter::{
    DebugInfoExtractor, FrameSite, SourceMapTranslator, SourcePosition, TraceFormatter,
    TraceFrame,
};
