//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep method ids, file identities and process ids
//! from being swapped for one another or for raw addresses.

use serde::Serialize;
use std::fmt;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl Pid {
    /// The calling process
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn current() -> Self {
        Pid(std::process::id() as i32)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    fn from(pid: i32) -> Self {
        Pid(pid)
    }
}

/// Method id: the method's entity offset inside its loaded file
///
/// Only unique within one file; pair it with a [`FileId`] for a global key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

/// Identity of a loaded bytecode/code file
///
/// In a live runtime this is the address of the file descriptor object; for
/// images parsed from bytes it is a content fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file@0x{:x}", self.0)
    }
}

/// Globally unique method identity: (file, method offset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MethodIdentity {
    pub file: FileId,
    pub method: MethodId,
}

impl MethodIdentity {
    #[must_use]
    pub fn new(file: FileId, method: MethodId) -> Self {
        Self { file, method }
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(Pid(42).to_string(), "PID:42");
        assert_eq!(MethodId(7).to_string(), "method#7");
        assert_eq!(
            MethodIdentity::new(FileId(0x1000), MethodId(7)).to_string(),
            "file@0x1000/method#7"
        );
    }

    #[test]
    fn test_identity_ordering_is_file_major() {
        let a = MethodIdentity::new(FileId(1), MethodId(9));
        let b = MethodIdentity::new(FileId(2), MethodId(1));
        assert!(a < b);
    }
}
