// SPDX-License-Identifier: MIT
//
// OS Virtual-Memory Facade (OVMF). The only point of contact with the host
// operating system: reserve / commit / decommit / release of address space,
// plus a query for total physical memory and page size.
//
// Mirrors the split cpp-ipc/libipc takes between `platform::posix` and
// `platform::windows`, and the four backend hooks of the original
// `wb_alloc.h` (`wbi__allocateVirtualSpace`, `wbi__commitMemory`,
// `wbi__decommitMemory`, `wbi__freeAddressSpace`).

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

use crate::config::{MemoryInfo, Prot};
use crate::error::AllocError;

/// Abstraction over the host's virtual-memory syscalls.
///
/// Every allocator core (`Arena`, `Pool`, `TaggedHeap`) is generic over a
/// `VirtualMemory` implementation, defaulting to [`SystemVirtualMemory`].
/// Tests may supply a fake backend to exercise commit-failure paths without
/// actually exhausting address space.
pub trait VirtualMemory {
    /// Reserve `size` bytes of contiguous, inaccessible virtual address
    /// space. `size` must already be page-aligned by the caller.
    fn reserve(&self, size: usize) -> Result<*mut u8, AllocError>;

    /// Make `[addr, addr + size)` accessible with `prot`. `addr` and `size`
    /// must be page-multiples within a prior `reserve` call.
    ///
    /// # Safety
    /// `addr` must designate a live reservation from this same backend of at
    /// least `size` bytes.
    unsafe fn commit(&self, addr: *mut u8, size: usize, prot: Prot) -> Result<(), AllocError>;

    /// Return the physical backing of `[addr, addr + size)` to the OS while
    /// keeping the reservation. Contents become undefined on next commit.
    ///
    /// # Safety
    /// `addr` must designate a live, committed range from this backend.
    unsafe fn decommit(&self, addr: *mut u8, size: usize) -> Result<(), AllocError>;

    /// Return an entire reservation to the OS.
    ///
    /// # Safety
    /// `addr` must be the base of a live reservation of exactly `size` bytes
    /// obtained from `reserve` on this backend, and must not be used again.
    unsafe fn release(&self, addr: *mut u8, size: usize) -> Result<(), AllocError>;

    /// Report total physical RAM, page size, and suggested defaults.
    fn query_memory_info(&self) -> MemoryInfo;
}

/// The default [`VirtualMemory`] backend: the real host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemVirtualMemory;

#[cfg(unix)]
impl VirtualMemory for SystemVirtualMemory {
    fn reserve(&self, size: usize) -> Result<*mut u8, AllocError> {
        posix::reserve(size)
    }

    unsafe fn commit(&self, addr: *mut u8, size: usize, prot: Prot) -> Result<(), AllocError> {
        posix::commit(addr, size, prot)
    }

    unsafe fn decommit(&self, addr: *mut u8, size: usize) -> Result<(), AllocError> {
        posix::decommit(addr, size)
    }

    unsafe fn release(&self, addr: *mut u8, size: usize) -> Result<(), AllocError> {
        posix::release(addr, size)
    }

    fn query_memory_info(&self) -> MemoryInfo {
        posix::query_memory_info()
    }
}

#[cfg(windows)]
impl VirtualMemory for SystemVirtualMemory {
    fn reserve(&self, size: usize) -> Result<*mut u8, AllocError> {
        windows::reserve(size)
    }

    unsafe fn commit(&self, addr: *mut u8, size: usize, prot: Prot) -> Result<(), AllocError> {
        windows::commit(addr, size, prot)
    }

    unsafe fn decommit(&self, addr: *mut u8, size: usize) -> Result<(), AllocError> {
        windows::decommit(addr, size)
    }

    unsafe fn release(&self, addr: *mut u8, size: usize) -> Result<(), AllocError> {
        windows::release(addr, size)
    }

    fn query_memory_info(&self) -> MemoryInfo {
        windows::query_memory_info()
    }
}

/// One megabyte, the default growth chunk.
pub(crate) const DEFAULT_COMMIT_SIZE: usize = 1024 * 1024;
