use memarena::config::{MemoryInfo, Prot};
use memarena::flags::TaggedHeapFlags;
use memarena::TaggedHeap;

fn info(total_memory: usize, commit_size: usize) -> MemoryInfo {
    MemoryInfo {
        total_memory,
        commit_size,
        page_size: 4096,
        commit_flags: Prot::READ | Prot::WRITE,
    }
}

#[test]
fn allocations_under_different_tags_stay_isolated() {
    let mut heap: TaggedHeap = TaggedHeap::bootstrap(
        "isolation",
        info(4 * 1024 * 1024, 64 * 1024),
        4096,
        TaggedHeapFlags::NORMAL,
    )
    .unwrap();

    let under_one = heap.alloc(1, 128).unwrap();
    let under_two = heap.alloc(2, 128).unwrap();
    unsafe {
        std::ptr::write_bytes(under_one, 0x11, 128);
        std::ptr::write_bytes(under_two, 0x22, 128);
    }

    heap.free(1).unwrap();
    assert!(heap.is_tag_empty(1));
    assert!(!heap.is_tag_empty(2));

    let still_readable = unsafe { std::slice::from_raw_parts(under_two, 128) };
    assert!(still_readable.iter().all(|&b| b == 0x22));
}

#[test]
fn freed_tag_storage_is_reclaimed_without_growing_the_pool() {
    let mut heap: TaggedHeap =
        TaggedHeap::bootstrap("reclaim", info(4 * 1024 * 1024, 64 * 1024), 4096, TaggedHeapFlags::NORMAL).unwrap();

    heap.alloc(3, 3000).unwrap();
    heap.alloc(3, 2000).unwrap(); // second sub-arena
    let pool_count_at_peak = heap.pool().count();

    heap.free(3).unwrap();
    assert_eq!(heap.pool().count(), pool_count_at_peak - 2);

    // Re-allocate the same total size under a fresh tag; no pool growth.
    heap.alloc(4, 3000).unwrap();
    heap.alloc(4, 2000).unwrap();
    assert_eq!(heap.pool().count(), pool_count_at_peak);
}

#[test]
fn fixed_size_tagged_heap_over_a_caller_buffer() {
    let mut buf = vec![0u8; TaggedHeap::<memarena::os::SystemVirtualMemory, 8>::calc_size(256, 4, true)];
    let mut heap: TaggedHeap<memarena::os::SystemVirtualMemory, 8> = unsafe {
        TaggedHeap::fixed_bootstrap("fixed", 256, buf.as_mut_ptr(), buf.len(), TaggedHeapFlags::NORMAL).unwrap()
    };

    let p = heap.alloc(0, 64).unwrap();
    unsafe { std::ptr::write_bytes(p, 7, 64) };
}
