// SPDX-License-Identifier: MIT
//
// Groups allocations under small integer tags so an entire tag can be
// reclaimed in one call. Each tag owns a singly-linked list of small bump
// sub-arenas; the sub-arenas themselves are recycled through a single
// backing pool, so freeing a tag's storage makes it available to any other
// tag without per-tag leakage.

use std::fmt;
use std::mem;
use std::ptr;

use crate::align::align_up;
use crate::arena::Arena;
use crate::config::MemoryInfo;
use crate::error::AllocError;
use crate::flags::{PoolFlags, TaggedHeapFlags};
use crate::os::{SystemVirtualMemory, VirtualMemory};
use crate::pool::Pool;
use crate::sink::{ErrorSink, LogErrorSink};

/// Bound on the best-fit walk, so `alloc` stays O(1) amortised even with a
/// long sub-arena list.
const SEARCH_SIZE: usize = 8;

#[repr(C)]
struct SubArenaHeader {
    tag: usize,
    next: *mut SubArenaHeader,
    head: *mut u8,
    end: *mut u8,
}

/// A map from integer tags (`0..T`) to linked lists of fixed-capacity
/// sub-arenas. `T` is the tag table size, a compile-time constant replacing
/// `TAGGED_HEAP_MAX_TAG_COUNT` (default 64).
pub struct TaggedHeap<VM: VirtualMemory = SystemVirtualMemory, const T: usize = 64> {
    label: &'static str,
    arena_size: usize,
    align: usize,
    flags: TaggedHeapFlags,
    info: MemoryInfo,
    pool: Pool<VM>,
    arenas: [*mut SubArenaHeader; T],
    sink: Box<dyn ErrorSink>,
}

impl<const T: usize> TaggedHeap<SystemVirtualMemory, T> {
    /// Reserve a fresh growing arena, bind a pool over it, and initialise a
    /// tagged heap with `sub_arena_size`-capacity sub-arenas.
    pub fn bootstrap(
        label: &'static str,
        info: MemoryInfo,
        sub_arena_size: usize,
        flags: TaggedHeapFlags,
    ) -> Result<Self, AllocError> {
        let arena = Arena::init(label, info, crate::flags::ArenaFlags::NORMAL)?;
        Self::init(arena, label, sub_arena_size, flags)
    }

    /// Wrap a caller-supplied buffer as a fixed-size arena and build a
    /// fixed-size tagged heap over it.
    ///
    /// # Safety
    /// `buffer` must remain valid and exclusively accessed by the returned
    /// `TaggedHeap` for its entire lifetime.
    pub unsafe fn fixed_bootstrap(
        label: &'static str,
        sub_arena_size: usize,
        buffer: *mut u8,
        size: usize,
        flags: TaggedHeapFlags,
    ) -> Result<Self, AllocError> {
        let arena = Arena::fixed_init(label, buffer, size, crate::flags::ArenaFlags::NORMAL)?;
        Self::init(arena, label, sub_arena_size, flags | TaggedHeapFlags::FIXED_SIZE)
    }
}

impl<VM: VirtualMemory, const T: usize> TaggedHeap<VM, T> {
    /// Bind a tagged heap to an already-constructed arena.
    pub fn init(
        arena: Arena<VM>,
        label: &'static str,
        sub_arena_size: usize,
        flags: TaggedHeapFlags,
    ) -> Result<Self, AllocError> {
        let info = arena.info();
        let element_size = mem::size_of::<SubArenaHeader>() + sub_arena_size;

        let mut pool_flags = PoolFlags::NO_DOUBLE_FREE_CHECK;
        if flags.contains(TaggedHeapFlags::NO_ZERO_MEMORY) {
            pool_flags |= PoolFlags::NO_ZERO_MEMORY;
        }
        if flags.contains(TaggedHeapFlags::FIXED_SIZE) {
            pool_flags |= PoolFlags::FIXED_SIZE;
        }

        let pool = Pool::init(arena, label, element_size, pool_flags)?;

        Ok(Self {
            label,
            arena_size: sub_arena_size,
            align: 8,
            flags,
            info,
            pool,
            arenas: [ptr::null_mut(); T],
            sink: Box::new(LogErrorSink),
        })
    }

    /// Sizing helper for fixed-size bootstraps: bytes needed to host
    /// `sub_arena_count` sub-arenas of `sub_arena_size` bytes each, plus
    /// (optionally) the tag table and pool/arena bookkeeping overhead.
    pub fn calc_size(sub_arena_size: usize, sub_arena_count: usize, include_heap_header: bool) -> usize {
        let element_size = mem::size_of::<SubArenaHeader>() + sub_arena_size;
        let mut total = element_size * sub_arena_count;
        if include_heap_header {
            total += mem::size_of::<[*mut SubArenaHeader; T]>() + mem::size_of::<usize>() * 8;
        }
        total
    }

    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_align(mut self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());
        self.align = align;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    pub fn flags(&self) -> TaggedHeapFlags {
        self.flags
    }

    pub fn tag_count(&self) -> usize {
        T
    }

    pub fn pool(&self) -> &Pool<VM> {
        &self.pool
    }

    pub fn is_tag_empty(&self, tag: usize) -> bool {
        tag >= T || self.arenas[tag].is_null()
    }

    fn fail<U>(&self, err: AllocError) -> Result<U, AllocError> {
        self.sink.report(&err);
        Err(err)
    }

    fn check_tag(&self, tag: usize) -> Result<(), AllocError> {
        if tag >= T {
            return self.fail(AllocError::ModeMisuse {
                label: self.label,
                reason: "tag index out of range",
            });
        }
        Ok(())
    }

    fn new_sub_arena(&mut self, tag: usize) -> Result<*mut SubArenaHeader, AllocError> {
        let slot = match self.pool.retrieve() {
            Ok(slot) => slot,
            Err(e) => {
                let e = e.with_label(self.label);
                self.sink.report(&e);
                return Err(e);
            }
        };
        let hdr = slot as *mut SubArenaHeader;
        unsafe {
            let data_start = slot.add(mem::size_of::<SubArenaHeader>());
            ptr::write(
                hdr,
                SubArenaHeader {
                    tag,
                    next: ptr::null_mut(),
                    head: data_start,
                    end: data_start.add(self.arena_size),
                },
            );
        }
        Ok(hdr)
    }

    fn bump(&self, hdr: *mut SubArenaHeader, size: usize) -> *mut u8 {
        unsafe {
            let ptr = (*hdr).head;
            let new_head = align_up(ptr as usize + size, self.align);
            (*hdr).head = new_head as *mut u8;
            ptr
        }
    }

    fn fits(hdr: *mut SubArenaHeader, size: usize) -> bool {
        unsafe { (*hdr).head as usize + size <= (*hdr).end as usize }
    }

    fn remaining(hdr: *mut SubArenaHeader) -> usize {
        unsafe { (*hdr).end as usize - (*hdr).head as usize }
    }

    /// Walk up to `SEARCH_SIZE` sub-arenas following the tag's head, and
    /// return the one with the smallest remaining space that still fits
    /// `size` (tightest fit), if any.
    fn search_best_fit(&self, tag: usize, size: usize) -> Option<*mut SubArenaHeader> {
        let head = self.arenas[tag];
        if head.is_null() {
            return None;
        }
        let mut candidates: Vec<(*mut SubArenaHeader, usize)> = Vec::new();
        let mut cur = unsafe { (*head).next };
        let mut steps = 0;
        while !cur.is_null() && steps < SEARCH_SIZE {
            let remaining = Self::remaining(cur);
            if remaining >= size {
                candidates.push((cur, remaining));
            }
            cur = unsafe { (*cur).next };
            steps += 1;
        }
        candidates.sort_by_key(|&(_, remaining)| remaining);
        candidates.first().map(|&(ptr, _)| ptr)
    }

    /// Allocate `size` bytes under `tag`, aligned to [`TaggedHeap::align`].
    /// `size` must not exceed the sub-arena capacity.
    pub fn alloc(&mut self, tag: usize, size: usize) -> Result<*mut u8, AllocError> {
        self.check_tag(tag)?;
        if size > self.arena_size {
            return self.fail(AllocError::TagAllocTooLarge {
                label: self.label,
                requested: size,
                max: self.arena_size,
            });
        }

        if self.arenas[tag].is_null() {
            let sub = self.new_sub_arena(tag)?;
            self.arenas[tag] = sub;
        }

        let head = self.arenas[tag];
        if Self::fits(head, size) {
            return Ok(self.bump(head, size));
        }

        if self.flags.contains(TaggedHeapFlags::SEARCH_FOR_BEST_FIT) {
            if let Some(found) = self.search_best_fit(tag, size) {
                return Ok(self.bump(found, size));
            }
        }

        let sub = self.new_sub_arena(tag)?;
        unsafe { (*sub).next = self.arenas[tag] };
        self.arenas[tag] = sub;
        Ok(self.bump(sub, size))
    }

    /// Return every sub-arena under `tag` to the backing pool. Storage is
    /// zeroed on next reuse unless `NoZeroMemory` is set.
    pub fn free(&mut self, tag: usize) -> Result<(), AllocError> {
        self.check_tag(tag)?;
        let mut cur = self.arenas[tag];
        while !cur.is_null() {
            let next = unsafe { (*cur).next };
            let slot = cur as *mut u8;
            if let Err(e) = self.pool.release(slot) {
                let e = e.with_label(self.label);
                self.sink.report(&e);
                return Err(e);
            }
            cur = next;
        }
        self.arenas[tag] = ptr::null_mut();
        Ok(())
    }
}

impl<VM: VirtualMemory, const T: usize> fmt::Debug for TaggedHeap<VM, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedHeap")
            .field("label", &self.label)
            .field("arena_size", &self.arena_size)
            .field("tag_count", &T)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Prot;

    fn small_info(total: usize) -> MemoryInfo {
        MemoryInfo {
            total_memory: total,
            commit_size: 64 * 1024,
            page_size: 4096,
            commit_flags: Prot::READ | Prot::WRITE,
        }
    }

    #[test]
    fn tag_out_of_range_is_mode_misuse() {
        let mut heap: TaggedHeap<SystemVirtualMemory, 8> =
            TaggedHeap::bootstrap("range", small_info(1024 * 1024), 256, TaggedHeapFlags::NORMAL).unwrap();
        let err = heap.alloc(8, 16).unwrap_err();
        assert!(matches!(err, AllocError::ModeMisuse { .. }));
    }

    #[test]
    fn oversized_allocation_is_rejected() {
        let mut heap: TaggedHeap<SystemVirtualMemory, 8> =
            TaggedHeap::bootstrap("oversize", small_info(1024 * 1024), 256, TaggedHeapFlags::NORMAL).unwrap();
        let err = heap.alloc(0, 257).unwrap_err();
        assert!(matches!(err, AllocError::TagAllocTooLarge { .. }));
    }

    #[test]
    fn tag_free_is_isolated_and_reclaims_into_the_pool() {
        let mut heap: TaggedHeap<SystemVirtualMemory, 8> =
            TaggedHeap::bootstrap("s5", small_info(4 * 1024 * 1024), 4096, TaggedHeapFlags::NORMAL).unwrap();

        heap.alloc(1, 3000).unwrap();
        heap.alloc(1, 2000).unwrap(); // forces a second sub-arena under tag 1
        let under_two = heap.alloc(2, 1000).unwrap();

        let count_before = heap.pool().count();
        heap.free(1).unwrap();

        assert_eq!(heap.pool().count(), count_before - 2);
        assert!(heap.is_tag_empty(1));
        assert!(!heap.is_tag_empty(2));
        unsafe { std::ptr::write_bytes(under_two, 0xAA, 1) };
    }

    #[test]
    fn best_fit_picks_the_tightest_remaining_space() {
        // Build tag 7's list by hand: the head has only 300 bytes remaining
        // (too little for the 400-byte request, forcing the search), and the
        // rest of the list holds a too-small 100-remaining node followed by
        // two that fit (3800 and 500 remaining). `alloc(7, 400)` should land
        // in the 500-remaining node, the tightest fit, not the 3800-remaining
        // one.
        let mut heap: TaggedHeap<SystemVirtualMemory, 16> = TaggedHeap::bootstrap(
            "s6",
            small_info(4 * 1024 * 1024),
            4096,
            TaggedHeapFlags::SEARCH_FOR_BEST_FIT,
        )
        .unwrap();

        let node_500 = heap.new_sub_arena(7).unwrap();
        unsafe { (*node_500).head = (*node_500).head.add(heap.arena_size - 500) };

        let node_3800 = heap.new_sub_arena(7).unwrap();
        unsafe {
            (*node_3800).head = (*node_3800).head.add(heap.arena_size - 3800);
            (*node_3800).next = node_500;
        }

        let node_100 = heap.new_sub_arena(7).unwrap();
        unsafe {
            (*node_100).head = (*node_100).head.add(heap.arena_size - 100);
            (*node_100).next = node_3800;
        }

        let head = heap.new_sub_arena(7).unwrap();
        unsafe {
            (*head).head = (*head).head.add(heap.arena_size - 300);
            (*head).next = node_100;
        }

        heap.arenas[7] = head;
        let expected = unsafe { (*node_500).head };

        let got = heap.alloc(7, 400).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn calc_size_scales_with_sub_arena_count() {
        let one = TaggedHeap::<SystemVirtualMemory, 64>::calc_size(4096, 1, false);
        let ten = TaggedHeap::<SystemVirtualMemory, 64>::calc_size(4096, 10, false);
        assert_eq!(ten, one * 10);
    }
}
