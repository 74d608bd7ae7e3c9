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

/// Exercises the default `LogErrorSink` path end to end: a real allocator
/// failure should route through `log` without panicking, whether or not a
/// subscriber is installed to receive it.
#[test]
fn mode_misuse_reports_through_the_default_log_sink() {
    let _ = env_logger::try_init();

    let mut arena = Arena::init("log-path", info(1024 * 1024, 64 * 1024), ArenaFlags::NORMAL).unwrap();
    arena.push(16).unwrap();

    let err = arena.pop().unwrap_err();
    assert!(matches!(err, memarena::error::AllocError::ModeMisuse { .. }));
}
