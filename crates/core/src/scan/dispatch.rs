use crate::scan::interface::InterfaceCandidate;
use crate::scan::section::{AddressRange, SectionBytes};

/// Size of one server routine table slot on the 64-bit layout.
pub const ROUTINE_POINTER_WIDTH: u64 = 8;

/// One routine pointer read from a server routine table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEntry {
    pub index: u32,
    pub address: u64,
}

/// Routine pointers of an accepted candidate that land inside `code`.
///
/// The table is read from `data` (the section the candidate was found in).
/// Slots past the end of `data` read as zero and slots pointing outside
/// `code` are skipped; the declared count can exceed the real table length.
pub fn routine_entries<'a>(
    candidate: &InterfaceCandidate,
    data: &'a SectionBytes,
    code: AddressRange,
) -> impl Iterator<Item = DispatchEntry> + 'a {
    let table = candidate.server_routine_table;
    (0..candidate.dispatch_count).filter_map(move |index| {
        let slot = table.checked_add(u64::from(index) * ROUTINE_POINTER_WIDTH)?;
        let address = data.read_le_at(slot, ROUTINE_POINTER_WIDTH as usize);
        code.contains(address).then_some(DispatchEntry { index, address })
    })
}
