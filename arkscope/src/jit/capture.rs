//! JIT code capture sessions

use log::{debug, warn};
use std::collections::HashSet;
use std::io::Write;

use super::elf::JitElfImage;
use crate::address_space::AddressSpace;
use crate::domain::{DumpError, MethodId};
use crate::heap::{MachineCodeInfo, MethodIdentityResolver};
use arkscope_common::JitCodeEntry;

/// Bytes of one compiled method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineCodeCapture {
    pub method_id: MethodId,
    pub bytes: Vec<u8>,
    pub name: String,
}

/// Name used for a method nobody could name
#[must_use]
pub fn default_jit_name(method: MethodId) -> String {
    format!("jit_method_{}", method.0)
}

/// Captures collected for one dump
///
/// A method is stored at most once per session however often it is
/// captured. Writing the dump consumes the session.
#[derive(Debug, Default)]
pub struct JitCaptureSession {
    captures: Vec<MachineCodeCapture>,
    seen: HashSet<MethodId>,
}

impl JitCaptureSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, method: MethodId) -> bool {
        self.seen.contains(&method)
    }

    #[must_use]
    pub fn captures(&self) -> &[MachineCodeCapture] {
        &self.captures
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Read and keep one method's instructions
    ///
    /// Returns whether a new body was stored. Already-captured methods and
    /// unreadable bodies are skipped; neither touches earlier captures.
    pub fn capture<A: AddressSpace + ?Sized>(
        &mut self,
        space: &A,
        method: MethodId,
        code: MachineCodeInfo,
        name: Option<String>,
    ) -> bool {
        if self.contains(method) {
            debug!("{method} already captured");
            return false;
        }

        let Ok(len) = usize::try_from(code.instr_size) else {
            return false;
        };
        match space.read_bytes(code.instr_start, len) {
            Ok(bytes) => {
                let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| default_jit_name(method));
                debug!("Captured {} bytes of {name} ({method})", bytes.len());
                self.captures.push(MachineCodeCapture { method_id: method, bytes, name });
                self.seen.insert(method);
                true
            }
            Err(err) => {
                warn!("Skipping JIT body of {method}: {err}");
                false
            }
        }
    }

    /// Capture an entry recorded while stepping a stack
    pub fn capture_entry<A: AddressSpace + ?Sized>(
        &mut self,
        resolver: &MethodIdentityResolver<'_, A>,
        space: &A,
        entry: JitCodeEntry,
        name: Option<String>,
    ) -> bool {
        let method = MethodId(u32::try_from(entry.method_id).unwrap_or(u32::MAX));
        if self.contains(method) {
            return false;
        }
        match resolver.machine_code_at(entry.machine_code) {
            Ok(code) => self.capture(space, method, code, name),
            Err(err) => {
                warn!("Skipping JIT body of {method}: {err}");
                false
            }
        }
    }

    /// Everything captured so far as an ELF image
    #[must_use]
    pub fn to_image(&self) -> JitElfImage {
        let mut image = JitElfImage::new();
        for capture in &self.captures {
            image.push(&capture.name, &capture.bytes);
        }
        image
    }

    /// Serialize the session to `out`; returns the number of bytes written
    ///
    /// # Errors
    /// Returns [`DumpError::Empty`] if nothing was captured, and serializer
    /// or I/O errors otherwise
    pub fn write_dump<W: Write>(self, out: &mut W) -> Result<usize, DumpError> {
        let bytes = self.to_image().to_bytes()?;
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(bytes.len())
    }
}
