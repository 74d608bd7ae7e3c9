// SPDX-License-Identifier: MIT
//
// Windows backend for the OS Virtual-Memory Facade, via `VirtualAlloc` /
// `VirtualFree` — the same calls the original `wb_alloc.h` Windows backend
// uses.

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, GlobalMemoryStatusEx, MEMORYSTATUSEX, MEM_COMMIT, MEM_DECOMMIT,
    MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
    PAGE_NOACCESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use crate::config::{MemoryInfo, Prot};
use crate::error::AllocError;

fn to_page_protect(prot: Prot) -> PAGE_PROTECTION_FLAGS {
    let read = prot.contains(Prot::READ);
    let write = prot.contains(Prot::WRITE);
    let exec = prot.contains(Prot::EXECUTE);
    match (read, write, exec) {
        (_, true, true) => PAGE_EXECUTE_READWRITE,
        (true, false, true) => PAGE_EXECUTE_READ,
        (false, false, true) => PAGE_EXECUTE,
        (_, true, false) => PAGE_READWRITE,
        (true, false, false) => PAGE_READONLY,
        (false, false, false) => PAGE_NOACCESS,
    }
}

pub(super) fn reserve(size: usize) -> Result<*mut u8, AllocError> {
    let ptr = unsafe { VirtualAlloc(std::ptr::null_mut(), size, MEM_RESERVE, PAGE_NOACCESS) };
    if ptr.is_null() {
        return Err(AllocError::OutOfVirtualAddress {
            label: "os",
            requested: size,
        });
    }
    Ok(ptr as *mut u8)
}

pub(super) unsafe fn commit(addr: *mut u8, size: usize, prot: Prot) -> Result<(), AllocError> {
    let ptr = VirtualAlloc(addr as *mut _, size, MEM_COMMIT, to_page_protect(prot));
    if ptr.is_null() {
        return Err(AllocError::OutOfCommittedMemory {
            label: "os",
            requested: size,
        });
    }
    Ok(())
}

pub(super) unsafe fn decommit(addr: *mut u8, size: usize) -> Result<(), AllocError> {
    let ok = VirtualFree(addr as *mut _, size, MEM_DECOMMIT);
    if ok == 0 {
        return Err(AllocError::OutOfCommittedMemory {
            label: "os",
            requested: size,
        });
    }
    Ok(())
}

pub(super) unsafe fn release(addr: *mut u8, size: usize) -> Result<(), AllocError> {
    // MEM_RELEASE requires the whole reservation to be freed in one call
    // with size 0.
    let ok = VirtualFree(addr as *mut _, 0, MEM_RELEASE);
    if ok == 0 {
        return Err(AllocError::OutOfCommittedMemory {
            label: "os",
            requested: size,
        });
    }
    Ok(())
}

pub(super) fn query_memory_info() -> MemoryInfo {
    let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };

    MemoryInfo {
        total_memory: total_physical_memory(),
        commit_size: super::DEFAULT_COMMIT_SIZE,
        page_size: info.dwPageSize as usize,
        commit_flags: Prot::READ | Prot::WRITE,
    }
}

fn total_physical_memory() -> usize {
    let mut status: MEMORYSTATUSEX = unsafe { std::mem::zeroed() };
    status.dwLength = std::mem::size_of::<MEMORYSTATUSEX>() as u32;
    let ok = unsafe { GlobalMemoryStatusEx(&mut status) };
    if ok == 0 {
        0
    } else {
        status.ullTotalPhys as usize
    }
}
