// SPDX-License-Identifier: MIT
//
// Linear bump allocator over a reserved virtual range, with on-demand
// commit growth and optional Stack (LIFO pop) and Extended (per-allocation
// metadata word) modes.
//
// `bootstrap`/`fixed_bootstrap` are aliases of `init`/`fixed_init`: the
// original's trick of embedding the arena descriptor inside its own
// reservation exists there only to avoid a separate heap allocation for the
// descriptor. An owned `Arena` value already gets that for free, so there is
// nothing left for bootstrap to do beyond what init does (see DESIGN.md).

use std::fmt;
use std::mem;

use crate::align::align_up;
use crate::config::MemoryInfo;
use crate::error::AllocError;
use crate::flags::ArenaFlags;
use crate::os::{SystemVirtualMemory, VirtualMemory};
use crate::sink::{ErrorSink, LogErrorSink};

struct TempRegion {
    start: *mut u8,
    saved_head: *mut u8,
}

/// A linear bump allocator. Not `Send`/`Sync`: concurrent allocation is a
/// non-goal, and the raw pointers inside make that the compiler's problem
/// too, not just documentation's.
pub struct Arena<VM: VirtualMemory = SystemVirtualMemory> {
    label: &'static str,
    start: *mut u8,
    head: *mut u8,
    end: *mut u8,
    temp: Option<TempRegion>,
    /// Total bytes reserved from the OS. Zero for fixed-size arenas, which
    /// never call into the OVMF at all.
    reserved: usize,
    info: MemoryInfo,
    flags: ArenaFlags,
    align: usize,
    released: bool,
    vm: VM,
    sink: Box<dyn ErrorSink>,
}

impl Arena<SystemVirtualMemory> {
    /// Reserve `info.total_memory` bytes and commit the first
    /// `info.commit_size` of it. Fails if `flags` requests `FIXED_SIZE`
    /// (use [`Arena::fixed_init`] for that).
    pub fn init(label: &'static str, info: MemoryInfo, flags: ArenaFlags) -> Result<Self, AllocError> {
        Self::init_with(SystemVirtualMemory, label, info, flags)
    }

    /// Wrap a caller-supplied buffer. No OS calls are ever made on this
    /// arena.
    ///
    /// # Safety
    /// `buffer` must remain valid and exclusively accessed by this `Arena`
    /// for its entire lifetime.
    pub unsafe fn fixed_init(
        label: &'static str,
        buffer: *mut u8,
        size: usize,
        flags: ArenaFlags,
    ) -> Result<Self, AllocError> {
        Self::fixed_init_with(SystemVirtualMemory, label, buffer, size, flags)
    }

    /// Alias of [`Arena::init`]; see the module docs for why bootstrap
    /// collapses into plain init in this translation.
    pub fn bootstrap(label: &'static str, info: MemoryInfo, flags: ArenaFlags) -> Result<Self, AllocError> {
        Self::init(label, info, flags)
    }

    /// Alias of [`Arena::fixed_init`].
    ///
    /// # Safety
    /// Same contract as [`Arena::fixed_init`].
    pub unsafe fn fixed_bootstrap(
        label: &'static str,
        buffer: *mut u8,
        size: usize,
        flags: ArenaFlags,
    ) -> Result<Self, AllocError> {
        Self::fixed_init(label, buffer, size, flags)
    }
}

impl<VM: VirtualMemory> Arena<VM> {
    pub fn init_with(vm: VM, label: &'static str, info: MemoryInfo, flags: ArenaFlags) -> Result<Self, AllocError> {
        if flags.contains(ArenaFlags::FIXED_SIZE) {
            let err = AllocError::ModeMisuse {
                label,
                reason: "init called with FixedSize flag set; use fixed_init instead",
            };
            return Err(err);
        }
        let base = vm.reserve(info.total_memory).map_err(|e| e.with_label(label))?;
        let commit_size = info.commit_size.min(info.total_memory);
        unsafe {
            vm.commit(base, commit_size, info.commit_flags)
                .map_err(|e| e.with_label(label))?;
        }
        Ok(Self {
            label,
            start: base,
            head: base,
            end: unsafe { base.add(commit_size) },
            temp: None,
            reserved: info.total_memory,
            info,
            flags,
            align: 8,
            released: false,
            vm,
            sink: Box::new(LogErrorSink),
        })
    }

    /// # Safety
    /// `buffer` must remain valid and exclusively accessed by the returned
    /// `Arena` for its entire lifetime.
    pub unsafe fn fixed_init_with(
        vm: VM,
        label: &'static str,
        buffer: *mut u8,
        size: usize,
        flags: ArenaFlags,
    ) -> Result<Self, AllocError> {
        let flags = flags | ArenaFlags::FIXED_SIZE;
        Ok(Self {
            label,
            start: buffer,
            head: buffer,
            end: buffer.add(size),
            temp: None,
            reserved: 0,
            info: MemoryInfo {
                total_memory: size,
                commit_size: size,
                page_size: 4096,
                commit_flags: crate::config::Prot::READ | crate::config::Prot::WRITE,
            },
            flags,
            align: 8,
            released: false,
            vm,
            sink: Box::new(LogErrorSink),
        })
    }

    /// Override the default logging sink.
    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Override the default alignment (8, must be a power of two).
    pub fn with_align(mut self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());
        self.align = align;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn flags(&self) -> ArenaFlags {
        self.flags
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn start(&self) -> *mut u8 {
        self.start
    }

    pub fn head(&self) -> *mut u8 {
        self.head
    }

    pub fn end(&self) -> *mut u8 {
        self.end
    }

    pub fn info(&self) -> MemoryInfo {
        self.info
    }

    /// Bytes allocated since the arena's base.
    pub fn len(&self) -> usize {
        self.head as usize - self.start as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.start
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

    fn stack_extra(&self) -> usize {
        if self.flags.contains(ArenaFlags::STACK) {
            mem::size_of::<usize>()
        } else {
            0
        }
    }

    /// Grow `end` so that `new_head_addr` becomes reachable. No-op if it
    /// already is.
    fn ensure_capacity(&mut self, new_head_addr: usize) -> Result<(), AllocError> {
        if new_head_addr <= self.end as usize {
            return Ok(());
        }
        if self.flags.contains(ArenaFlags::FIXED_SIZE) {
            return self.fail(AllocError::FixedSizeExhausted { label: self.label });
        }
        let needed = new_head_addr - self.end as usize;
        let grow = align_up(needed, self.info.commit_size.max(1));
        if self.end as usize + grow > self.start as usize + self.reserved {
            return self.fail(AllocError::OutOfCommittedMemory {
                label: self.label,
                requested: grow,
            });
        }
        let end = self.end;
        let commit_flags = self.info.commit_flags;
        let result = unsafe { self.vm.commit(end, grow, commit_flags) };
        self.propagate(result)?;
        self.end = (self.end as usize + grow) as *mut u8;
        Ok(())
    }

    /// Default growth chunk, for callers (the pool core) that grow this
    /// arena's committed range directly rather than through `push`.
    pub(crate) fn commit_size(&self) -> usize {
        self.info.commit_size
    }

    /// Ensure `[start, addr)` is committed, growing by `commit_size`
    /// multiples as needed. Used by [`crate::pool::Pool`] to extend its
    /// backing arena without going through `push`.
    pub(crate) fn request_growth(&mut self, addr: *mut u8) -> Result<(), AllocError> {
        self.ensure_capacity(addr as usize)
    }

    fn write_backptr(&self, new_head_addr: usize, old_head_addr: usize) {
        let backptr_addr = (new_head_addr - mem::size_of::<usize>()) as *mut usize;
        unsafe { backptr_addr.write(old_head_addr) };
    }

    /// Allocate `size` bytes aligned to [`Arena::align`]. Equivalent to
    /// `push_ex(size, 0usize)`: on an `Extended`-mode arena this still
    /// reserves and writes a (zero) metadata word, matching the original's
    /// `arenaPush(arena, size)` being `arenaPushEx(arena, size, 0)`.
    pub fn push(&mut self, size: usize) -> Result<*mut u8, AllocError> {
        self.push_ex(size, 0usize)
    }

    /// Like [`Arena::push`], but in `Extended` mode also writes one word of
    /// caller metadata immediately before the returned pointer. On an arena
    /// without `Extended` mode, `extended` is ignored and this behaves
    /// exactly like `push`.
    pub fn push_ex<E: Copy>(&mut self, size: usize, extended: E) -> Result<*mut u8, AllocError> {
        let extended_mode = self.flags.contains(ArenaFlags::EXTENDED);
        let meta_size = if extended_mode { mem::size_of::<E>() } else { 0 };
        let stack_extra = self.stack_extra();
        let old_head_addr = self.head as usize;
        let new_head_addr = align_up(old_head_addr + meta_size + size + stack_extra, self.align);
        self.ensure_capacity(new_head_addr)?;
        let data_addr = if extended_mode {
            unsafe { (old_head_addr as *mut E).write(extended) };
            old_head_addr + meta_size
        } else {
            old_head_addr
        };
        if stack_extra > 0 {
            self.write_backptr(new_head_addr, old_head_addr);
        }
        self.head = new_head_addr as *mut u8;
        Ok(data_addr as *mut u8)
    }

    /// Undo the most recent `push`/`push_ex`. Requires `Stack` mode.
    /// Clamps to `start` if the recorded back-pointer would go below it.
    pub fn pop(&mut self) -> Result<(), AllocError> {
        if !self.flags.contains(ArenaFlags::STACK) {
            return self.fail(AllocError::ModeMisuse {
                label: self.label,
                reason: "pop requires Stack mode",
            });
        }
        if self.head as usize <= self.start as usize {
            return Ok(());
        }
        let backptr_addr = (self.head as usize - mem::size_of::<usize>()) as *const usize;
        let recorded = unsafe { backptr_addr.read() };
        let old_head_addr = recorded.max(self.start as usize);
        if !self.flags.contains(ArenaFlags::NO_ZERO_MEMORY) {
            let len = self.head as usize - old_head_addr;
            unsafe { std::ptr::write_bytes(old_head_addr as *mut u8, 0, len) };
        }
        self.head = old_head_addr as *mut u8;
        Ok(())
    }

    /// Open a scratch region. Idempotent: a second call before `end_temp`
    /// is a no-op.
    pub fn start_temp(&mut self) {
        if self.temp.is_some() {
            return;
        }
        let page = self.info.page_size.max(1);
        let temp_start = align_up(self.head as usize, page) as *mut u8;
        self.temp = Some(TempRegion {
            start: temp_start,
            saved_head: self.head,
        });
    }

    /// Close the scratch region opened by `start_temp`, discarding
    /// everything allocated since. A no-op if no temp region is active.
    pub fn end_temp(&mut self) -> Result<(), AllocError> {
        let Some(temp) = self.temp.take() else {
            return Ok(());
        };
        let page = self.info.page_size.max(1);
        let boundary = align_up(self.head as usize, page) as *mut u8;
        let len = boundary as usize - temp.start as usize;
        if len > 0 {
            if !self.flags.contains(ArenaFlags::NO_RECOMMIT) && !self.flags.contains(ArenaFlags::FIXED_SIZE) {
                let start = temp.start;
                let commit_flags = self.info.commit_flags;
                let result = unsafe { self.vm.decommit(start, len) };
                self.propagate(result)?;
                let result = unsafe { self.vm.commit(start, len, commit_flags) };
                self.propagate(result)?;
            } else if !self.flags.contains(ArenaFlags::NO_ZERO_MEMORY) {
                unsafe { std::ptr::write_bytes(temp.start, 0, len) };
            }
        }
        self.head = temp.saved_head;
        Ok(())
    }

    /// Decommit and recommit `[start, end)`, resetting `head` to `start`.
    /// Fixed-size arenas just zero the buffer instead, since they never
    /// touch the OVMF.
    pub fn clear(&mut self) -> Result<(), AllocError> {
        let len = self.end as usize - self.start as usize;
        if self.flags.contains(ArenaFlags::FIXED_SIZE) {
            if !self.flags.contains(ArenaFlags::NO_ZERO_MEMORY) {
                unsafe { std::ptr::write_bytes(self.start, 0, len) };
            }
            self.head = self.start;
            return Ok(());
        }
        let start = self.start;
        let commit_flags = self.info.commit_flags;
        let result = unsafe { self.vm.decommit(start, len) };
        self.propagate(result)?;
        let result = unsafe { self.vm.commit(start, len, commit_flags) };
        self.propagate(result)?;
        self.head = self.start;
        Ok(())
    }

    /// Release the reservation early. After this, the arena is inert;
    /// `Drop` will not attempt a second release.
    pub fn destroy(mut self) -> Result<(), AllocError> {
        if self.flags.contains(ArenaFlags::FIXED_SIZE) {
            self.released = true;
            return Ok(());
        }
        let start = self.start;
        let reserved = self.reserved;
        let result = unsafe { self.vm.release(start, reserved) };
        self.released = true;
        self.propagate(result)
    }
}

impl<VM: VirtualMemory> Drop for Arena<VM> {
    fn drop(&mut self) {
        if self.released || self.flags.contains(ArenaFlags::FIXED_SIZE) {
            return;
        }
        unsafe {
            let _ = self.vm.release(self.start, self.reserved);
        }
        self.released = true;
    }
}

impl<VM: VirtualMemory> fmt::Debug for Arena<VM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("label", &self.label)
            .field("start", &self.start)
            .field("head", &self.head)
            .field("end", &self.end)
            .field("flags", &self.flags)
            .field("align", &self.align)
            .finish()
    }
}
