//! PC → method translation for compiled code
//!
//! AOT and JIT frames carry only a native instruction address. Each loaded
//! file contributes one [`CodeRangeIndex`]: its methods' code ranges sorted
//! by start address, searched with a binary search.

use log::debug;
use serde::Serialize;

use crate::domain::{MethodId, SymbolError};

/// Code owned by one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodeRange {
    pub method_id: MethodId,
    pub code_begin: u64,
    pub code_size: u64,
}

impl CodeRange {
    #[must_use]
    pub fn new(method_id: MethodId, code_begin: u64, code_size: u64) -> Self {
        Self { method_id, code_begin, code_size }
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.code_begin.saturating_add(self.code_size)
    }

    #[must_use]
    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.code_begin && pc < self.end()
    }
}

/// Result of translating a raw pc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodeInfo {
    pub method_id: MethodId,
    /// `pc - code_begin`
    pub offset: u64,
    pub code_begin: u64,
    pub code_size: u64,
}

/// Anything that can enumerate the methods of one file that have code
pub trait MethodTable {
    /// # Errors
    /// Returns an error if the table cannot be read
    fn code_ranges(&self) -> Result<Vec<CodeRange>, SymbolError>;
}

impl MethodTable for [CodeRange] {
    fn code_ranges(&self) -> Result<Vec<CodeRange>, SymbolError> {
        Ok(self.to_vec())
    }
}

impl MethodTable for Vec<CodeRange> {
    fn code_ranges(&self) -> Result<Vec<CodeRange>, SymbolError> {
        Ok(self.clone())
    }
}

/// Non-overlapping code ranges sorted ascending by start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeRangeIndex {
    ranges: Vec<CodeRange>,
}

impl CodeRangeIndex {
    /// Sort and validate a file's ranges
    ///
    /// Empty ranges are dropped; they can never own a pc.
    ///
    /// # Errors
    /// Returns [`SymbolError::OverlappingRanges`] if two methods claim the
    /// same bytes.
    pub fn build(mut ranges: Vec<CodeRange>) -> Result<Self, SymbolError> {
        ranges.retain(|r| r.code_size > 0);
        ranges.sort_by_key(|r| r.code_begin);

        for pair in ranges.windows(2) {
            if pair[0].end() > pair[1].code_begin {
                return Err(SymbolError::OverlappingRanges {
                    first: pair[0].method_id.0,
                    second: pair[1].method_id.0,
                });
            }
        }

        debug!("Built code range index with {} methods", ranges.len());
        Ok(Self { ranges })
    }

    /// Build from a method table
    ///
    /// # Errors
    /// Propagates table and overlap errors
    pub fn from_table<T: MethodTable + ?Sized>(table: &T) -> Result<Self, SymbolError> {
        Self::build(table.code_ranges()?)
    }

    /// Method owning `pc`, and the offset of `pc` inside it
    ///
    /// # Errors
    /// Returns [`SymbolError::UnresolvedSymbol`] if no range covers `pc`
    pub fn translate_raw_pc(&self, pc: u64) -> Result<CodeInfo, SymbolError> {
        let idx = self.ranges.partition_point(|r| r.code_begin <= pc);
        let range = idx
            .checked_sub(1)
            .map(|i| &self.ranges[i])
            .filter(|r| r.contains(pc))
            .ok_or(SymbolError::UnresolvedSymbol(pc))?;

        Ok(CodeInfo {
            method_id: range.method_id,
            offset: pc - range.code_begin,
            code_begin: range.code_begin,
            code_size: range.code_size,
        })
    }

    /// Range of a given method, if it has code here
    #[must_use]
    pub fn range_of(&self, method_id: MethodId) -> Option<&CodeRange> {
        self.ranges.iter().find(|r| r.method_id == method_id)
    }

    #[must_use]
    pub fn ranges(&self) -> &[CodeRange] {
        &self.ranges
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> CodeRangeIndex {
        CodeRangeIndex::build(vec![
            CodeRange::new(MethodId(3), 0x3000, 0x100),
            CodeRange::new(MethodId(1), 0x1000, 0x80),
            CodeRange::new(MethodId(2), 0x1080, 0x40),
        ])
        .unwrap()
    }

    #[test]
    fn test_translate_inside_ranges() {
        let index = index();
        let info = index.translate_raw_pc(0x1010).unwrap();
        assert_eq!((info.method_id, info.offset), (MethodId(1), 0x10));

        // adjacent ranges: the first byte of the next one belongs to it
        assert_eq!(index.translate_raw_pc(0x1080).unwrap().method_id, MethodId(2));
        assert_eq!(index.translate_raw_pc(0x30FF).unwrap().offset, 0xFF);
    }

    #[test]
    fn test_translate_outside_ranges() {
        let index = index();
        for pc in [0, 0xFFF, 0x10C0, 0x2000, 0x3100, u64::MAX] {
            assert!(
                matches!(index.translate_raw_pc(pc), Err(SymbolError::UnresolvedSymbol(p)) if p == pc),
                "pc 0x{pc:x} should be unresolved"
            );
        }
    }

    #[test]
    fn test_every_pc_in_range_round_trips() {
        let index = index();
        for range in index.ranges() {
            for pc in range.code_begin..range.end() {
                let info = index.translate_raw_pc(pc).unwrap();
                assert_eq!(info.method_id, range.method_id);
                assert_eq!(info.offset, pc - range.code_begin);
            }
        }
    }

    #[test]
    fn test_overlap_is_rejected() {
        let err = CodeRangeIndex::build(vec![
            CodeRange::new(MethodId(1), 0x1000, 0x81),
            CodeRange::new(MethodId(2), 0x1080, 0x40),
        ])
        .unwrap_err();
        assert!(matches!(err, SymbolError::OverlappingRanges { first: 1, second: 2 }));
    }

    #[test]
    fn test_empty_ranges_are_dropped() {
        let index = CodeRangeIndex::build(vec![
            CodeRange::new(MethodId(1), 0x1000, 0),
            CodeRange::new(MethodId(2), 0x1000, 0x10),
        ])
        .unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.translate_raw_pc(0x1000).unwrap().method_id, MethodId(2));
    }
}
