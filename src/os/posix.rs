// SPDX-License-Identifier: MIT
//
// POSIX backend for the OS Virtual-Memory Facade.
//
// `reserve` maps a private anonymous range with `PROT_NONE` so the address
// space exists but touching it faults. `commit` re-maps the sub-range
// `MAP_FIXED` with the desired protection, which on Linux/macOS hands back
// fresh zero-filled pages — the same trick the donor's `wbi__commitMemory`
// backend uses. `decommit` remaps the range `PROT_NONE` the same way, which
// drops the physical backing. Everything stays `MAP_PRIVATE`: this crate has
// no IPC surface, so there is no reason to share pages across processes
// (see Open Question 2 in SPEC_FULL.md).

use crate::config::{MemoryInfo, Prot};
use crate::error::AllocError;

fn to_mmap_prot(prot: Prot) -> libc::c_int {
    let mut native = libc::PROT_NONE;
    if prot.contains(Prot::READ) {
        native |= libc::PROT_READ;
    }
    if prot.contains(Prot::WRITE) {
        native |= libc::PROT_WRITE;
    }
    if prot.contains(Prot::EXECUTE) {
        native |= libc::PROT_EXEC;
    }
    native
}

pub(super) fn reserve(size: usize) -> Result<*mut u8, AllocError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(AllocError::OutOfVirtualAddress {
            label: "os",
            requested: size,
        });
    }
    Ok(ptr as *mut u8)
}

pub(super) unsafe fn commit(addr: *mut u8, size: usize, prot: Prot) -> Result<(), AllocError> {
    let ptr = libc::mmap(
        addr as *mut libc::c_void,
        size,
        to_mmap_prot(prot),
        libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        return Err(AllocError::OutOfCommittedMemory {
            label: "os",
            requested: size,
        });
    }
    Ok(())
}

pub(super) unsafe fn decommit(addr: *mut u8, size: usize) -> Result<(), AllocError> {
    let ptr = libc::mmap(
        addr as *mut libc::c_void,
        size,
        libc::PROT_NONE,
        libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        return Err(AllocError::OutOfCommittedMemory {
            label: "os",
            requested: size,
        });
    }
    Ok(())
}

pub(super) unsafe fn release(addr: *mut u8, size: usize) -> Result<(), AllocError> {
    let ret = libc::munmap(addr as *mut libc::c_void, size);
    if ret != 0 {
        return Err(AllocError::OutOfCommittedMemory {
            label: "os",
            requested: size,
        });
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn total_physical_memory() -> usize {
    use std::ffi::CString;
    use std::mem;
    let mut value: u64 = 0;
    let mut len = mem::size_of::<u64>();
    let name = CString::new("hw.memsize").unwrap();
    let ret = unsafe {
        libc::sysctlbyname(
            name.as_ptr(),
            &mut value as *mut u64 as *mut libc::c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret == 0 {
        value as usize
    } else {
        0
    }
}

#[cfg(not(target_os = "macos"))]
fn total_physical_memory() -> usize {
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if pages < 0 || page_size < 0 {
        0
    } else {
        pages as usize * page_size as usize
    }
}

pub(super) fn query_memory_info() -> MemoryInfo {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = if page_size > 0 { page_size as usize } else { 4096 };

    MemoryInfo {
        total_memory: total_physical_memory(),
        commit_size: super::DEFAULT_COMMIT_SIZE,
        page_size,
        commit_flags: Prot::READ | Prot::WRITE,
    }
}
