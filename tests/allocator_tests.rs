//! Integration tests for the device-memory sub-allocator.
//!
//! These run against the dummy backend, which backs blocks with real host
//! memory, so mapped writes can be verified without GPU hardware. The
//! same scenarios hold for the Vulkan backend, which differs only in
//! where blocks come from.

use std::sync::Arc;

use rstest::rstest;

use gpu_suballocator::{
    AllocationRequest, AllocatorConfig, DeviceAllocator, DummyBackend, MemoryBackend,
    MemoryUsage, ResourceKind,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_allocator(backend: DummyBackend) -> DeviceAllocator {
    DeviceAllocator::new(
        Arc::new(backend),
        AllocatorConfig {
            device_local_chunk_size: 64 * 1024,
            host_visible_chunk_size: 16 * 1024,
        },
    )
}

// ============================================================================
// Workload Tests
// ============================================================================

/// Allocate a mixed batch per usage class, then free everything and verify
/// the allocator returns to a clean state.
#[rstest]
#[case::unknown(MemoryUsage::Unknown)]
#[case::device_local(MemoryUsage::DeviceLocal)]
#[case::host_visible(MemoryUsage::HostVisible)]
#[case::upload(MemoryUsage::HostVisiblePreferDeviceLocal)]
#[case::readback(MemoryUsage::DeviceLocalPreferHostVisible)]
fn test_mixed_workload_round_trip(#[case] usage: MemoryUsage) {
    init_logging();
    let allocator = small_allocator(DummyBackend::new());

    let sizes = [64u64, 1000, 128, 4096, 24, 2048];
    let alignments = [16u64, 64, 256, 4, 1024, 32];
    let kinds = [
        ResourceKind::Buffer,
        ResourceKind::ImageOptimal,
        ResourceKind::Buffer,
        ResourceKind::ImageLinear,
        ResourceKind::Buffer,
        ResourceKind::ImageOptimal,
    ];

    let mut allocations = Vec::new();
    for ((&size, &alignment), &kind) in sizes.iter().zip(&alignments).zip(&kinds) {
        let allocation = allocator
            .alloc(&AllocationRequest::new(size, alignment, kind, usage))
            .expect("allocation should succeed");
        assert_eq!(allocation.offset() % alignment, 0);
        assert_eq!(allocation.size(), size);
        allocations.push(allocation);
    }

    assert!(allocator.report().total_allocated() > 0);

    // Free in interleaved order to exercise both coalescing directions.
    for index in [1, 4, 0, 5, 2, 3] {
        allocator.free(&allocations[index]).unwrap();
    }

    let report = allocator.report();
    assert_eq!(report.total_allocated(), 0);
    assert_eq!(report.total_reserved(), 0, "empty chunks must be destroyed");
}

/// Conflicting kinds placed next to each other end up at least one
/// granularity page apart.
#[test]
fn test_granularity_separation_end_to_end() {
    init_logging();
    const PAGE: u64 = 256;
    let allocator = small_allocator(DummyBackend::new().with_granularity(PAGE));

    let buffer = allocator
        .alloc(&AllocationRequest::new(
            100,
            16,
            ResourceKind::Buffer,
            MemoryUsage::DeviceLocal,
        ))
        .unwrap();
    let image = allocator
        .alloc(&AllocationRequest::new(
            100,
            16,
            ResourceKind::ImageOptimal,
            MemoryUsage::DeviceLocal,
        ))
        .unwrap();

    // Same chunk, conflicting kinds: the pages must not overlap.
    assert!(image.offset() / PAGE > (buffer.offset() + 100 - 1) / PAGE);

    allocator.free(&buffer).unwrap();
    allocator.free(&image).unwrap();
}

/// Alloc/free churn must settle back to zero reservations, with freed
/// space continually reused rather than accumulating chunks.
#[test]
fn test_churn_reuses_freed_space() {
    init_logging();
    let allocator = small_allocator(DummyBackend::new());

    let mut live = Vec::new();
    for round in 0..50u64 {
        let size = 64 + (round * 37) % 900;
        let allocation = allocator
            .alloc(&AllocationRequest::new(
                size,
                64,
                ResourceKind::Buffer,
                MemoryUsage::DeviceLocal,
            ))
            .unwrap();
        live.push(allocation);
        // Free every other round from the front, so holes open up mid-chunk.
        if round % 2 == 1 {
            let victim = live.remove(0);
            allocator.free(&victim).unwrap();
        }
    }

    // Everything fits comfortably in one chunk's worth of space.
    let report = allocator.report();
    assert_eq!(report.memory_types[0].chunk_count, 1);

    for allocation in live {
        allocator.free(&allocation).unwrap();
    }
    assert_eq!(allocator.report().total_reserved(), 0);
}

// ============================================================================
// Mapped Memory Tests
// ============================================================================

/// Host-visible allocations can be written through their mapped pointers
/// and neighbors never overlap.
#[test]
fn test_mapped_writes_do_not_alias() {
    init_logging();
    let allocator = small_allocator(DummyBackend::new());

    let first = allocator
        .alloc(&AllocationRequest::new(
            256,
            16,
            ResourceKind::Buffer,
            MemoryUsage::HostVisible,
        ))
        .unwrap();
    let second = allocator
        .alloc(&AllocationRequest::new(
            256,
            16,
            ResourceKind::Buffer,
            MemoryUsage::HostVisible,
        ))
        .unwrap();

    // SAFETY: the allocations are live and only borrowed here.
    unsafe {
        first.mapped_slice_mut().unwrap().fill(0x11);
        second.mapped_slice_mut().unwrap().fill(0x22);
        assert!(first.mapped_slice_mut().unwrap().iter().all(|&b| b == 0x11));
        assert!(second.mapped_slice_mut().unwrap().iter().all(|&b| b == 0x22));
    }

    allocator.free(&first).unwrap();
    allocator.free(&second).unwrap();
}

// ============================================================================
// Concurrency Tests
// ============================================================================

/// Hammer one allocator from several threads; every handle must free
/// cleanly and the allocator must end empty.
#[test]
fn test_concurrent_alloc_free_smoke() {
    init_logging();
    let allocator = Arc::new(small_allocator(DummyBackend::new()));

    let mut workers = Vec::new();
    for worker in 0..4u64 {
        let allocator = Arc::clone(&allocator);
        workers.push(std::thread::spawn(move || {
            for round in 0..100u64 {
                let size = 32 + ((worker * 131 + round * 17) % 500);
                let kind = if round % 3 == 0 {
                    ResourceKind::ImageOptimal
                } else {
                    ResourceKind::Buffer
                };
                let allocation = allocator
                    .alloc(&AllocationRequest::new(
                        size,
                        64,
                        kind,
                        MemoryUsage::DeviceLocal,
                    ))
                    .expect("allocation should succeed");
                assert_eq!(allocation.offset() % 64, 0);
                if round % 4 != 3 {
                    allocator.free(&allocation).unwrap();
                } else {
                    // Hold a few across rounds to keep chunks contended.
                    std::thread::yield_now();
                    allocator.free(&allocation).unwrap();
                }
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let report = allocator.report();
    assert_eq!(report.total_allocated(), 0);
    assert_eq!(report.total_reserved(), 0);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

/// Shutdown releases every coarse block back to the backend, even with
/// live allocations still outstanding.
#[test]
fn test_shutdown_releases_leaked_chunks() {
    init_logging();
    let backend = Arc::new(DummyBackend::new());
    let allocator = DeviceAllocator::new(
        Arc::clone(&backend) as Arc<dyn MemoryBackend>,
        AllocatorConfig::default(),
    );

    let leaked = allocator
        .alloc(
            &AllocationRequest::new(1024, 16, ResourceKind::Buffer, MemoryUsage::HostVisible)
                .with_label("leaked-on-purpose"),
        )
        .unwrap();
    assert!(backend.bytes_in_use() > 0);

    allocator.shutdown();
    assert_eq!(backend.bytes_in_use(), 0);

    // The stale handle is rejected after shutdown.
    assert!(allocator.free(&leaked).is_err());
}
