//! Fixed-width little-endian field reads that never fail.
//!
//! Out-of-range reads yield `0`, so a candidate that straddles the end of a
//! buffer is rejected by the pointer checks instead of aborting the scan.

/// Read `width` bytes (1..=8) at `offset` as a zero-extended little-endian integer.
///
/// Returns `0` when the read would leave `buffer` or when `width` is not in `1..=8`.
pub fn read_le(buffer: &[u8], offset: usize, width: usize) -> u64 {
    if width == 0 || width > 8 {
        return 0;
    }
    let Some(end) = offset.checked_add(width) else {
        return 0;
    };
    let Some(bytes) = buffer.get(offset..end) else {
        return 0;
    };
    bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
