// SPDX-License-Identifier: MIT
//
// Fixed-element-size recycling allocator layered over an arena. Freed slots
// thread themselves onto an intrusive free list by reinterpreting their
// first machine word, which is why `element_size` is floored at pointer
// width. An optional compacting mode keeps live slots contiguous at
// `[0, count)` instead, trading O(1) release identity for O(1) iteration.

use std::fmt;
use std::mem;

use crate::arena::Arena;
use crate::error::AllocError;
use crate::flags::{ArenaFlags, PoolFlags};
use crate::os::{SystemVirtualMemory, VirtualMemory};
use crate::sink::{ErrorSink, LogErrorSink};

/// A pool owns the arena it draws slots from.
pub struct Pool<VM: VirtualMemory = SystemVirtualMemory> {
    label: &'static str,
    arena: Arena<VM>,
    element_size: usize,
    slots: *mut u8,
    count: usize,
    capacity: usize,
    /// Highest index ever handed out from the linear region; -1 initially.
    last_filled: isize,
    free_list: *mut u8,
    flags: PoolFlags,
    sink: Box<dyn ErrorSink>,
}

impl Pool<SystemVirtualMemory> {
    /// Reserve a fresh growing arena and initialise a pool over all of it.
    pub fn bootstrap(
        label: &'static str,
        info: crate::config::MemoryInfo,
        element_size: usize,
        flags: PoolFlags,
    ) -> Result<Self, AllocError> {
        let arena = Arena::init(label, info, ArenaFlags::NORMAL)?;
        Self::init(arena, label, element_size, flags)
    }

    /// Wrap a caller-supplied buffer as a fixed-size arena and initialise a
    /// fixed-size pool over it.
    ///
    /// # Safety
    /// `buffer` must remain valid and exclusively accessed by the returned
    /// `Pool` for its entire lifetime.
    pub unsafe fn fixed_bootstrap(
        label: &'static str,
        element_size: usize,
        buffer: *mut u8,
        size: usize,
        flags: PoolFlags,
    ) -> Result<Self, AllocError> {
        let arena = Arena::fixed_init(label, buffer, size, ArenaFlags::NORMAL)?;
        Self::init(arena, label, element_size, flags | PoolFlags::FIXED_SIZE)
    }
}

impl<VM: VirtualMemory> Pool<VM> {
    /// Bind a pool to an already-constructed arena, claiming the arena's
    /// entire remaining capacity as the pool's slot array.
    pub fn init(
        arena: Arena<VM>,
        label: &'static str,
        element_size: usize,
        flags: PoolFlags,
    ) -> Result<Self, AllocError> {
        let element_size = element_size.max(mem::size_of::<usize>());
        let slots = arena.head();
        let capacity = (arena.end() as usize - slots as usize) / element_size;
        Ok(Self {
            label,
            arena,
            element_size,
            slots,
            count: 0,
            capacity,
            last_filled: -1,
            free_list: std::ptr::null_mut(),
            flags,
            sink: Box::new(LogErrorSink),
        })
    }

    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn flags(&self) -> PoolFlags {
        self.flags
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slots(&self) -> *mut u8 {
        self.slots
    }

    pub fn arena(&self) -> &Arena<VM> {
        &self.arena
    }

    fn fail<T>(&self, err: AllocError) -> Result<T, AllocError> {
        self.sink.report(&err);
        Err(err)
    }

    fn propagate<T>(&self, result: Result<T, AllocError>) -> Result<T, AllocError> {
        result.map_err(|e| {
            let relabeled = e.with_label(self.label);
            self.sink.report(&relabeled);
            relabeled
        })
    }

    fn slot_at(&self, index: usize) -> *mut u8 {
        (self.slots as usize + index * self.element_size) as *mut u8
    }

    /// Hand out a slot: pop the free list if one is available (and the pool
    /// isn't compacting), otherwise advance the linear frontier, growing the
    /// backing arena by one `commit_size` chunk if needed.
    pub fn retrieve(&mut self) -> Result<*mut u8, AllocError> {
        if !self.free_list.is_null() && !self.flags.contains(PoolFlags::COMPACTING) {
            let slot = self.free_list;
            let next = unsafe { (slot as *const *mut u8).read() };
            self.free_list = next;
            if !self.flags.contains(PoolFlags::NO_ZERO_MEMORY) {
                unsafe { std::ptr::write_bytes(slot, 0, self.element_size) };
            }
            self.count += 1;
            return Ok(slot);
        }

        if (self.last_filled + 1) as usize >= self.capacity {
            if self.flags.contains(PoolFlags::FIXED_SIZE) {
                return self.fail(AllocError::FixedSizeExhausted { label: self.label });
            }
            let grow_to = (self.arena.end() as usize + self.arena.commit_size()) as *mut u8;
            let result = self.arena.request_growth(grow_to);
            self.propagate(result)?;
            self.capacity = (self.arena.end() as usize - self.slots as usize) / self.element_size;
        }

        self.last_filled += 1;
        let ptr = self.slot_at(self.last_filled as usize);
        if !self.flags.contains(PoolFlags::NO_ZERO_MEMORY) {
            unsafe { std::ptr::write_bytes(ptr, 0, self.element_size) };
        }
        self.count += 1;
        Ok(ptr)
    }

    /// Return `ptr` to the pool. In compacting mode this moves the last
    /// live slot into `ptr`'s place, invalidating any other pointer into
    /// the pool; otherwise `ptr` is threaded onto the free list.
    pub fn release(&mut self, ptr: *mut u8) -> Result<(), AllocError> {
        if self.flags.contains(PoolFlags::COMPACTING) {
            if self.count == 0 {
                return self.fail(AllocError::ModeMisuse {
                    label: self.label,
                    reason: "release called on an empty compacting pool",
                });
            }
            let last = self.slot_at(self.count - 1);
            if last != ptr {
                unsafe { std::ptr::copy_nonoverlapping(last, ptr, self.element_size) };
            }
            self.count -= 1;
            return Ok(());
        }

        if !self.flags.contains(PoolFlags::NO_DOUBLE_FREE_CHECK) {
            let mut cur = self.free_list;
            while !cur.is_null() {
                if cur == ptr {
                    return self.fail(AllocError::DoubleFree { label: self.label });
                }
                cur = unsafe { (cur as *const *mut u8).read() };
            }
        }

        unsafe { (ptr as *mut *mut u8).write(self.free_list) };
        self.free_list = ptr;
        // With NoDoubleFreeCheck set, a caller releasing the same pointer
        // twice reaches here a second time; `count` is already at 0, and the
        // free list is left self-referential (the caller's documented risk
        // to accept), but that must not panic the allocator.
        self.count = self.count.saturating_sub(1);
        Ok(())
    }
}

impl<VM: VirtualMemory> fmt::Debug for Pool<VM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("label", &self.label)
            .field("element_size", &self.element_size)
            .field("count", &self.count)
            .field("capacity", &self.capacity)
            .field("last_filled", &self.last_filled)
            .field("flags", &self.flags)
            .finish()
    }
}
