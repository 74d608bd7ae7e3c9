// SPDX-License-Identifier: MIT
//
// Mode flags for the three allocator shapes. Correspond 1:1 to the
// `Flag*` preprocessor bitmasks in the original `wb_alloc.h`.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ArenaFlags: u32 {
        /// Grow by committing from the OS as `push` runs past `end`.
        const NORMAL = 0;
        /// Backed by a caller-supplied buffer; never calls into the OS.
        const FIXED_SIZE = 1 << 0;
        /// Every `push` writes a back-pointer enabling LIFO `pop`.
        const STACK = 1 << 1;
        /// Every `push_ex` writes a metadata word before the returned pointer.
        const EXTENDED = 1 << 2;
        /// Skip zeroing freed/decommitted regions.
        const NO_ZERO_MEMORY = 1 << 3;
        /// `end_temp` just moves the pointer instead of decommit+recommit.
        const NO_RECOMMIT = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PoolFlags: u32 {
        const NORMAL = 0;
        /// Backed by a fixed-size arena; `retrieve` fails instead of growing.
        const FIXED_SIZE = 1 << 0;
        /// `release` compacts by moving the last live slot into the freed one.
        const COMPACTING = 1 << 1;
        const NO_ZERO_MEMORY = 1 << 2;
        /// Skip the O(free-list length) double-free scan in `release`.
        const NO_DOUBLE_FREE_CHECK = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaggedHeapFlags: u32 {
        const NORMAL = 0;
        const FIXED_SIZE = 1 << 0;
        const NO_ZERO_MEMORY = 1 << 1;
        const NO_SET_COMMIT_SIZE = 1 << 2;
        /// Walk up to `SEARCH_SIZE` sub-arenas for the tightest fit instead
        /// of always allocating a fresh one on overflow.
        const SEARCH_FOR_BEST_FIT = 1 << 3;
    }
}
