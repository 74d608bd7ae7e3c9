use memarena::config::{MemoryInfo, Prot};
use memarena::flags::ArenaFlags;
use memarena::Arena;

fn info(total_memory: usize, commit_size: usize) -> MemoryInfo {
    MemoryInfo {
        total_memory,
        commit_size,
        page_size: 4096,
        commit_flags: Prot::READ | Prot::WRITE,
    }
}

/// S1: pushing 512 objects of 4096 bytes each against a 1 MiB commit chunk
/// should grow the committed range in exact 1 MiB steps, landing on a tight
/// 2 MiB footprint with no slack.
#[test]
fn arena_growth_tracks_commit_chunks() {
    let mut arena = Arena::init("s1", info(64 * 1024 * 1024, 1024 * 1024), ArenaFlags::NORMAL).unwrap();

    let mut last = std::ptr::null_mut();
    for _ in 0..512 {
        last = arena.push(4096).unwrap();
    }

    assert_eq!(arena.len(), 2 * 1024 * 1024);
    assert_eq!(arena.end() as usize - arena.start() as usize, 2 * 1024 * 1024);

    // The last handed-out page is live and writable.
    unsafe { std::ptr::write_bytes(last, 0x42, 4096) };
}

/// S2: a stack-mode pop restores `head` exactly and zeroes the freed bytes
/// (NoZeroMemory is off).
#[test]
fn stack_pop_restores_head_and_zeroes() {
    let mut arena = Arena::init("s2", info(1024 * 1024, 64 * 1024), ArenaFlags::STACK).unwrap();

    let p = arena.push(100).unwrap();
    unsafe { std::ptr::write_bytes(p, 0xAA, 100) };
    arena.pop().unwrap();

    let p2 = arena.push(100).unwrap();
    assert_eq!(p2, p);

    let bytes = unsafe { std::slice::from_raw_parts(p2, 100) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn fixed_size_arena_never_grows() {
    let mut buf = [0u8; 256];
    let mut arena = unsafe {
        Arena::fixed_init("fixed", buf.as_mut_ptr(), buf.len(), ArenaFlags::NORMAL).unwrap()
    };

    assert!(arena.push(200).is_ok());
    let err = arena.push(200).unwrap_err();
    assert!(matches!(err, memarena::error::AllocError::FixedSizeExhausted { .. }));
}

#[test]
fn pop_on_non_stack_arena_is_mode_misuse() {
    let mut arena = Arena::init("not-a-stack", info(1024 * 1024, 64 * 1024), ArenaFlags::NORMAL).unwrap();
    arena.push(16).unwrap();
    let err = arena.pop().unwrap_err();
    assert!(matches!(err, memarena::error::AllocError::ModeMisuse { .. }));
}

#[test]
fn end_temp_without_start_temp_is_a_no_op() {
    let mut arena = Arena::init("temp-noop", info(1024 * 1024, 64 * 1024), ArenaFlags::NORMAL).unwrap();
    arena.push(32).unwrap();
    let head_before = arena.head();
    arena.end_temp().unwrap();
    assert_eq!(arena.head(), head_before);
}

#[test]
fn temp_region_discards_allocations_made_within_it() {
    let mut arena = Arena::init("temp", info(4 * 1024 * 1024, 64 * 1024), ArenaFlags::NORMAL).unwrap();
    arena.push(64).unwrap();
    let head_before = arena.head();

    arena.start_temp();
    arena.start_temp(); // idempotent second call
    arena.push(4096).unwrap();
    arena.push(4096).unwrap();
    arena.end_temp().unwrap();

    assert_eq!(arena.head(), head_before);
}

#[test]
fn push_ex_writes_metadata_before_the_returned_pointer_in_extended_mode() {
    let mut arena = Arena::init("extended", info(1024 * 1024, 64 * 1024), ArenaFlags::EXTENDED).unwrap();

    let p = arena.push_ex(64, 0xDEADBEEFu32).unwrap();
    let meta = unsafe { ((p as usize - std::mem::size_of::<u32>()) as *const u32).read() };
    assert_eq!(meta, 0xDEADBEEF);

    unsafe { std::ptr::write_bytes(p, 0x11, 64) };
}

#[test]
fn push_ex_on_a_non_extended_arena_behaves_like_push() {
    let mut arena = Arena::init("not-extended", info(1024 * 1024, 64 * 1024), ArenaFlags::NORMAL).unwrap();

    let p = arena.push_ex(64, 0xDEADBEEFu32).unwrap();
    unsafe { std::ptr::write_bytes(p, 0x22, 64) };

    // No metadata word was reserved: the next push lands immediately after.
    let head_after = arena.head();
    assert_eq!(head_after as usize - p as usize, 64);
}
