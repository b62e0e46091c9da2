//! Captured memory held in our own heap

use std::collections::BTreeMap;

use super::AddressSpace;
use crate::domain::MemoryReadFailure;
use arkscope_common::WORD_SIZE;

/// Address space backed by copied memory segments
///
/// Segments are keyed by start address and must not overlap; mapping over an
/// existing segment's bytes overwrites them in place.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSpace {
    segments: BTreeMap<u64, Vec<u8>>,
}

impl SnapshotSpace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map raw bytes at `base`
    pub fn map_bytes(&mut self, base: u64, bytes: &[u8]) {
        if let Some((&start, segment)) = self.segments.range_mut(..=base).next_back() {
            let offset = usize::try_from(base - start).unwrap_or(usize::MAX);
            if offset.saturating_add(bytes.len()) <= segment.len() {
                segment[offset..offset + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
        self.segments.insert(base, bytes.to_vec());
    }

    /// Map consecutive native-endian words at `base`
    pub fn map_words(&mut self, base: u64, words: &[u64]) {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
        self.map_bytes(base, &bytes);
    }

    /// Overwrite or map a single word
    pub fn write_word(&mut self, addr: u64, value: u64) {
        self.map_words(addr, &[value]);
    }

    /// Total bytes held
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn segment_for(&self, addr: u64, len: u64) -> Option<&[u8]> {
        let (&start, segment) = self.segments.range(..=addr).next_back()?;
        let offset = usize::try_from(addr - start).ok()?;
        let end = offset.checked_add(usize::try_from(len).ok()?)?;
        segment.get(offset..end)
    }
}

impl AddressSpace for SnapshotSpace {
    fn read_word(&self, addr: u64) -> Result<u64, MemoryReadFailure> {
        let bytes = self.segment_for(addr, WORD_SIZE).ok_or(MemoryReadFailure { addr })?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_ne_bytes(raw))
    }

    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryReadFailure> {
        self.segment_for(addr, len as u64)
            .map(<[u8]>::to_vec)
            .ok_or(MemoryReadFailure { addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_word_updates_existing_segment() {
        let mut space = SnapshotSpace::new();
        space.map_words(0x1000, &[1, 2, 3]);
        space.write_word(0x1008, 20);

        assert_eq!(space.read_word(0x1008).unwrap(), 20);
        assert_eq!(space.len(), 24);
    }

    #[test]
    fn test_unmapped_read_fails_with_address() {
        let space = SnapshotSpace::new();
        assert_eq!(space.read_word(0x40).unwrap_err(), MemoryReadFailure { addr: 0x40 });
    }

    #[test]
    fn test_read_past_segment_end_fails() {
        let mut space = SnapshotSpace::new();
        space.map_words(0x1000, &[7]);
        assert!(space.read_word(0x1004).is_err());
        assert!(space.read_bytes(0x1000, 9).is_err());
    }
}
