use serde::{Deserialize, Serialize};

use crate::scan::fields::read_le;

/// Address range of a memory block. `end()` is the last valid address, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u64,
    pub len: u64,
}

impl AddressRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// Last address inside the range (equal to `start` for an empty range).
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len.saturating_sub(1))
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address - self.start < self.len
    }

    /// Offset `base` by a signed delta; `None` on overflow.
    pub fn offset_address(base: u64, delta: i64) -> Option<u64> {
        base.checked_add_signed(delta)
    }
}

/// Read-only snapshot of a named section: its bytes and where they live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionBytes {
    name: String,
    start: u64,
    bytes: Vec<u8>,
}

impl SectionBytes {
    pub fn new(name: impl Into<String>, start: u64, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), start, bytes }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.start, self.bytes.len() as u64)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.range().contains(address)
    }

    /// Section-relative offset of `address`, if it falls inside the section.
    pub fn offset_of(&self, address: u64) -> Option<usize> {
        if self.contains(address) {
            usize::try_from(address - self.start).ok()
        } else {
            None
        }
    }

    /// Bounds-checked slice of `len` bytes at section offset `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    /// Little-endian read at section offset `offset`; zero when out of range.
    pub fn read_le(&self, offset: usize, width: usize) -> u64 {
        read_le(&self.bytes, offset, width)
    }

    /// Little-endian read at virtual address `address`; zero when out of range.
    pub fn read_le_at(&self, address: u64, width: usize) -> u64 {
        match self.offset_of(address) {
            Some(offset) => read_le(&self.bytes, offset, width),
            None => 0,
        }
    }
}
