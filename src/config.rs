// SPDX-License-Identifier: MIT
//
// Value types describing a reservation's sizing policy and protection bits.
// Mirrors `MemoryInfo` from the original `wb_alloc.h` and the `PROT_*`-style
// bitmask it borrows for `commitFlags`.

use bitflags::bitflags;

bitflags! {
    /// Page protection bits requested of a `commit` call.
    ///
    /// Matches the `None`/`Read`/`Write`/`Execute` bitmask of the original
    /// `wb_alloc.h`, expressed as a `bitflags!` type the way sibling crates
    /// in this pack (`gitrustux-kernel`, `Kelsidavis-NostalgiaOS`) model
    /// page protection and mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Prot: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
    }
}

/// Sizing policy for a reservation, produced by [`crate::os::VirtualMemory::query_memory_info`]
/// or supplied directly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Total bytes to reserve up front (the allocator's address-space budget).
    pub total_memory: usize,
    /// Default growth chunk committed on demand.
    pub commit_size: usize,
    /// Host page size, used to round temp-region boundaries.
    pub page_size: usize,
    /// Default protection applied to newly committed pages.
    pub commit_flags: Prot,
}

impl MemoryInfo {
    /// Query the live host for its physical memory and page size, using the
    /// default growth chunk of one megabyte and `Read | Write` protection.
    pub fn query() -> Self {
        use crate::os::{SystemVirtualMemory, VirtualMemory};
        SystemVirtualMemory.query_memory_info()
    }

    /// Build a `MemoryInfo` with an explicit reservation budget, keeping the
    /// host's page size and defaults.
    pub fn with_total_memory(total_memory: usize) -> Self {
        Self {
            total_memory,
            ..Self::query()
        }
    }
}
