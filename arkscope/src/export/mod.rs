//! Walk report export
//!
//! Serializes a finished walk, plus the formatted trace when one was
//! produced, to JSON for offline inspection.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::domain::{ExportError, Pid};
use crate::frames::{FramePc, Walk, WalkEnd, WalkedFrame};

/// One visited frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Frame type name, e.g. `AsmInterpreterFrame`
    pub frame_type: String,
    pub fp: u64,
    pub managed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_pc: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytecode_offset: Option<u32>,
}

impl From<&WalkedFrame> for FrameRecord {
    fn from(frame: &WalkedFrame) -> Self {
        let (native_pc, bytecode_offset) = match frame.pc {
            FramePc::Native(pc) => (Some(pc), None),
            FramePc::Bytecode { offset, .. } => (None, offset),
            FramePc::Unknown => (None, None),
        };
        Self {
            frame_type: format!("{:?}", frame.frame_type),
            fp: frame.fp,
            managed: frame.managed,
            method_id: frame.method.as_ref().map(|m| m.identity.method.0),
            file_id: frame.method.as_ref().map(|m| m.identity.file.0),
            native_pc,
            bytecode_offset,
        }
    }
}

/// Everything known about one walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    pub frames: Vec<FrameRecord>,
    /// `"entry"` or the error that ended the walk
    pub end: String,
    /// Native frame that entered the runtime, when the walk got there
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_caller: Option<NativeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRecord {
    pub fp: u64,
    pub sp: u64,
    pub pc: u64,
}

impl WalkReport {
    #[must_use]
    pub fn new(pid: Option<Pid>, walk: &Walk) -> Self {
        let (end, native_caller) = match &walk.end {
            WalkEnd::AtEntry(native) => (
                "entry".to_string(),
                Some(NativeRecord { fp: native.fp, sp: native.sp, pc: native.pc }),
            ),
            WalkEnd::Error(err) => (err.to_string(), None),
        };
        Self {
            pid: pid.map(|p| p.0),
            frames: walk.frames.iter().map(FrameRecord::from).collect(),
            end,
            native_caller,
            trace: Vec::new(),
        }
    }

    /// Attach formatted trace lines
    #[must_use]
    pub fn with_trace(mut self, trace: &str) -> Self {
        self.trace = trace.lines().map(str::to_string).collect();
        self
    }

    /// Write pretty-printed JSON
    ///
    /// # Errors
    /// Returns serialization or I/O errors
    pub fn write_json<W: Write>(&self, out: &mut W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Write `report` to `path`, replacing any existing file
///
/// # Errors
/// Returns serialization or I/O errors
pub fn export_walk(report: &WalkReport, path: &Path) -> Result<(), ExportError> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    report.write_json(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UnwindError;
    use crate::frames::{FrameCategory, NativeFrame};
    use arkscope_common::FrameType;

    fn frame() -> WalkedFrame {
        WalkedFrame {
            frame_type: FrameType::AsmInterpreterFrame,
            category: FrameCategory::AsmInterpreted,
            fp: 0x2000,
            managed: true,
            pc: FramePc::Bytecode { pc: 0x9010, offset: Some(0x10) },
            method: None,
            jit: None,
        }
    }

    #[test]
    fn test_report_of_complete_walk() {
        let walk = Walk {
            frames: vec![frame()],
            end: WalkEnd::AtEntry(NativeFrame { fp: 0x3000, sp: 0x2020, pc: 0x4444 }),
        };
        let report = WalkReport::new(Some(Pid(42)), &walk).with_trace("at f (a.js:1:2)\n");

        assert_eq!(report.end, "entry");
        assert_eq!(report.frames[0].frame_type, "AsmInterpreterFrame");
        assert_eq!(report.frames[0].bytecode_offset, Some(0x10));
        assert_eq!(report.trace, vec!["at f (a.js:1:2)"]);

        let mut out = Vec::new();
        report.write_json(&mut out).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["pid"], 42);
        assert_eq!(parsed["native_caller"]["pc"], 0x4444);
        assert!(parsed["frames"][0].get("method_id").is_none());
    }

    #[test]
    fn test_report_of_failed_walk() {
        let walk = Walk { frames: Vec::new(), end: WalkEnd::Error(UnwindError::NullFrame) };
        let report = WalkReport::new(None, &walk);

        assert_ne!(report.end, "entry");
        assert!(report.native_caller.is_none());
        assert!(report.pid.is_none());
    }
}
