//! Concurrency stress tests for the frame allocator: many CPUs hammering
//! allocate/release at once, with rebalancing pulling frames between pools.

use std::{collections::HashSet, sync::Barrier, thread};

use kmm::{
    cpu_set::LogicalCpuId,
    memory::{FrameAllocator, PAGE_SIZE},
    paging::PhysicalAddress,
};

/// Backs an allocator with a leaked host buffer; one page is sacrificed to
/// alignment.
fn leaked_allocator(frames: usize, cpus: usize) -> &'static FrameAllocator {
    let buffer = vec![0u8; (frames + 1) * PAGE_SIZE].leak();
    let first = (buffer.as_ptr() as usize).next_multiple_of(PAGE_SIZE);
    let base = PhysicalAddress::new(first);
    let allocator = unsafe { FrameAllocator::new(base, frames * PAGE_SIZE, cpus) };
    Box::leak(Box::new(allocator))
}

#[test]
fn parallel_allocations_are_distinct() {
    const THREADS: usize = 2;
    const PER_THREAD: usize = 1000;

    let allocator = leaked_allocator(4096, THREADS);
    let total = allocator.total_frames();
    let barrier = Barrier::new(THREADS);

    let batches = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS as u32)
            .map(|id| {
                let (allocator, barrier) = (&allocator, &barrier);
                scope.spawn(move || {
                    let cpu = LogicalCpuId::new(id);
                    barrier.wait();
                    (0..PER_THREAD)
                        .map(|_| allocator.allocate_frame(cpu).expect("pool exhausted"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    let mut seen = HashSet::new();
    for batch in &batches {
        for &frame in batch {
            assert!(seen.insert(frame), "{frame:?} handed out twice");
        }
    }
    assert_eq!(allocator.free_frames(), total - THREADS * PER_THREAD);

    for (id, batch) in batches.into_iter().enumerate() {
        let cpu = LogicalCpuId::new(id as u32);
        for frame in batch {
            allocator.release_frame(cpu, frame);
        }
    }
    assert_eq!(allocator.free_frames(), total);
}

#[test]
fn frames_survive_release_on_a_foreign_cpu() {
    const PER_THREAD: usize = 500;

    let allocator = leaked_allocator(2048, 2);
    let total = allocator.free_frames();

    // CPU 0 allocates, CPU 1 frees, repeatedly; frames migrate between the
    // pools through the channel and the rebalancer.
    thread::scope(|scope| {
        let (sender, receiver) = std::sync::mpsc::channel();
        scope.spawn(move || {
            let cpu = LogicalCpuId::BSP;
            for _ in 0..PER_THREAD {
                sender.send(allocator.allocate_frame(cpu).unwrap()).unwrap();
            }
        });
        scope.spawn(move || {
            let cpu = LogicalCpuId::new(1);
            for frame in receiver {
                allocator.release_frame(cpu, frame);
            }
        });
    });

    assert_eq!(allocator.free_frames(), total);
}

#[test]
fn churn_with_more_threads_than_frames_conserves_the_pool() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    // Deliberately tight: every pool keeps falling below its low-water mark,
    // so rebalancing runs constantly.
    let allocator = leaked_allocator(64, THREADS);
    let total = allocator.free_frames();
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for id in 0..THREADS as u32 {
            let (allocator, barrier) = (&allocator, &barrier);
            scope.spawn(move || {
                let cpu = LogicalCpuId::new(id);
                barrier.wait();
                let mut held = Vec::new();
                for round in 0..ROUNDS {
                    if let Some(frame) = allocator.allocate_frame(cpu) {
                        held.push(frame);
                    }
                    if round % 3 == 0 {
                        for frame in held.drain(..) {
                            allocator.release_frame(cpu, frame);
                        }
                    }
                }
                for frame in held {
                    allocator.release_frame(cpu, frame);
                }
            });
        }
    });

    assert_eq!(allocator.free_frames(), total);
    assert_eq!(allocator.used_frames(), 0);
}

#[test]
fn concurrent_refcounting_frees_exactly_once() {
    const THREADS: usize = 8;

    let allocator = leaked_allocator(32, 1);
    let total = allocator.free_frames();
    let cpu = LogicalCpuId::BSP;

    let frame = allocator.allocate_frame(cpu).unwrap();
    for _ in 0..THREADS {
        allocator.add_ref(frame);
    }
    assert_eq!(allocator.refcount(frame), THREADS + 1);

    // Every thread drops one reference; the frame must stay allocated until
    // the last reference (held here) goes away.
    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| allocator.release_frame(cpu, frame));
        }
    });
    assert_eq!(allocator.refcount(frame), 1);
    assert_eq!(allocator.free_frames(), total - 1);

    allocator.release_frame(cpu, frame);
    assert_eq!(allocator.free_frames(), total);
}
