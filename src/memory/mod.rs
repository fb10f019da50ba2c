//! # Physical memory management
//!
//! The physical frame allocator: one free-list pool per CPU, a batch
//! rebalancer that refills a low pool from donor CPUs, and the
//! reference-count table that lets frames back more than one mapping
//! (shared file pages, copy-on-write pages).
//!
//! ## Locking
//!
//! Each pool has its own lock; the batch rebalancer additionally takes a
//! global rebalance lock before any pool lock, then the local pool lock,
//! then one donor pool lock at a time — never two donors at once. Reference
//! counts are per-frame atomics: the 1→0 transition in [`FrameAllocator::release_frame`]
//! leaves the releasing CPU as the frame's sole owner, so the scrub and the
//! pool push that follow cannot race with anything; pool membership itself
//! is guarded by that pool's lock.

use alloc::boxed::Box;
use core::{
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
};

use spin::Mutex;

use crate::cpu_set::LogicalCpuId;
pub use crate::paging::{PhysicalAddress, PAGE_MASK, PAGE_SIZE};

/// A pool holding fewer free frames than this triggers rebalancing before
/// the next allocation is serviced, so steady-state allocation rarely pays
/// the cross-CPU locking cost.
pub const POOL_LOW_WATER: usize = 16;

/// Byte written over a frame when it is handed out, to defeat reliance on
/// stale contents.
const ALLOC_JUNK: u8 = 0x05;
/// Byte written over a frame when its last reference is released, to catch
/// dangling references.
const FREE_JUNK: u8 = 0x01;

/// A physical page frame, identified by its page-aligned base address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frame {
    physaddr: NonZeroUsize,
}

impl Frame {
    /// The frame containing the given physical address.
    pub fn containing(address: PhysicalAddress) -> Frame {
        Frame {
            physaddr: NonZeroUsize::new(address.data() & PAGE_MASK)
                .expect("frame 0x0 is reserved"),
        }
    }
    pub fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.physaddr.get())
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[frame at {:p}]", self.base().data() as *const u8)
    }
}

/// Per-frame bookkeeping: the reference count, and the free-list link used
/// while the frame sits in a pool.
///
/// A count of zero means the frame is in exactly one pool's free list and
/// mapped nowhere; a count of `n >= 1` means `n` page-table entries (or
/// in-flight owners) reference it.
#[derive(Debug)]
struct PageInfo {
    refcount: AtomicUsize,
    /// Base address of the next free frame in the owning pool, 0 at the
    /// list tail. Meaningless while the frame is in use.
    next: AtomicUsize,
}

impl PageInfo {
    const fn new() -> Self {
        Self {
            refcount: AtomicUsize::new(0),
            next: AtomicUsize::new(0),
        }
    }
}

/// One CPU's pool of free frames: an intrusive singly-linked list threaded
/// through [`PageInfo::next`], plus an exact count of members.
struct FramePool {
    head: Option<Frame>,
    free: usize,
}

/// The physical frame allocator.
///
/// Owns a contiguous physical region and hands out [`Frame`]s from per-CPU
/// pools. Every frame handed to a caller is either in exactly one pool's
/// free list (refcount 0) or has refcount >= 1 outstanding; no rebalancing
/// step creates or loses frames.
pub struct FrameAllocator {
    /// Base of the first managed frame.
    base: PhysicalAddress,
    info: Box<[PageInfo]>,
    pools: Box<[Mutex<FramePool>]>,
    rebalance: Mutex<()>,
}

impl FrameAllocator {
    /// Creates an allocator over the physical region `[base, base + size)`,
    /// rounded inward to page boundaries, with one pool per CPU. All frames
    /// are seeded onto the bootstrap CPU's pool.
    ///
    /// # Safety
    ///
    /// The region must be exclusively owned by the allocator for its entire
    /// lifetime and valid for reads and writes; nothing else may reference
    /// its memory.
    pub unsafe fn new(base: PhysicalAddress, size: usize, cpu_count: usize) -> Self {
        assert!(cpu_count > 0, "frame allocator needs at least one CPU pool");

        let first = crate::paging::round_up_pages(base.data());
        let last = crate::paging::round_down_pages(base.data() + size);
        let frame_count = last.saturating_sub(first) / PAGE_SIZE;

        let allocator = Self {
            base: PhysicalAddress::new(first),
            info: (0..frame_count).map(|_| PageInfo::new()).collect(),
            pools: (0..cpu_count)
                .map(|_| {
                    Mutex::new(FramePool {
                        head: None,
                        free: 0,
                    })
                })
                .collect(),
            rebalance: Mutex::new(()),
        };

        // Seed the free lists through the release path: every frame starts
        // at refcount 1, pre-owned by the seeder.
        for index in 0..frame_count {
            let frame = Frame::containing(PhysicalAddress::new(first + index * PAGE_SIZE));
            allocator.info[index].refcount.store(1, Ordering::Relaxed);
            allocator.release_frame(LogicalCpuId::BSP, frame);
        }

        allocator
    }

    /// Allocates one frame from the calling CPU's pool, rebalancing first
    /// when the pool is low.
    ///
    /// Returns `None` only when every CPU's pool was empty. On success the
    /// frame's refcount is 1 and its contents are junk-filled.
    pub fn allocate_frame(&self, cpu: LogicalCpuId) -> Option<Frame> {
        let pool_index = self.pool_index(cpu);

        let low = self.pools[pool_index].lock().free < POOL_LOW_WATER;
        if low {
            self.rebalance(pool_index);
        }

        let frame = {
            let mut pool = self.pools[pool_index].lock();
            self.pop(&mut pool)
        }?;

        unsafe {
            self.fill(frame, ALLOC_JUNK);
        }
        Some(frame)
    }

    /// Releases one logical ownership of `frame`.
    ///
    /// Only when the count reaches zero is the frame scrubbed and pushed
    /// onto the **releasing** CPU's pool — frames migrate by release
    /// locality, bounded by the rebalancer.
    ///
    /// Releasing a frame whose count is already zero, or a frame outside
    /// the managed range, is a fatal invariant violation.
    pub fn release_frame(&self, cpu: LogicalCpuId, frame: Frame) {
        let info = self.page_info(frame);

        let previous = info.refcount.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            panic!("release of {:?} whose refcount is already zero", frame);
        }
        if previous > 1 {
            return;
        }

        // Last owner: scrub to catch dangling references, then return the
        // frame to this CPU's free list.
        unsafe {
            self.fill(frame, FREE_JUNK);
        }
        let mut pool = self.pools[self.pool_index(cpu)].lock();
        info.next
            .store(pool.head.map_or(0, |head| head.base().data()), Ordering::Relaxed);
        pool.head = Some(frame);
        pool.free += 1;
    }

    /// Adds one logical ownership of an in-use frame (fork-time sharing,
    /// copy-on-write sharing).
    pub fn add_ref(&self, frame: Frame) {
        let previous = self.page_info(frame).refcount.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            panic!("add_ref on free {:?}", frame);
        }
    }

    /// Current reference count of `frame`.
    pub fn refcount(&self, frame: Frame) -> usize {
        self.page_info(frame).refcount.load(Ordering::Acquire)
    }

    pub fn total_frames(&self) -> usize {
        self.info.len()
    }

    /// Frames currently free across all pools.
    pub fn free_frames(&self) -> usize {
        self.pools.iter().map(|pool| pool.lock().free).sum()
    }

    /// Frames currently free in one CPU's pool.
    pub fn free_frames_on(&self, cpu: LogicalCpuId) -> usize {
        self.pools[self.pool_index(cpu)].lock().free
    }

    pub fn used_frames(&self) -> usize {
        self.total_frames() - self.free_frames()
    }

    pub fn cpu_count(&self) -> usize {
        self.pools.len()
    }

    /// Refills the pool at `pool_index` up to [`POOL_LOW_WATER`] by splicing
    /// list segments out of donor pools, one donor at a time.
    ///
    /// Lock order: rebalance lock, then the local pool, then each donor in
    /// turn; two donor locks are never held simultaneously.
    fn rebalance(&self, pool_index: usize) {
        let _rebalance = self.rebalance.lock();
        let mut local = self.pools[pool_index].lock();

        for donor_index in 0..self.pools.len() {
            if local.free >= POOL_LOW_WATER {
                break;
            }
            if donor_index == pool_index {
                continue;
            }

            let mut donor = self.pools[donor_index].lock();
            let amount = core::cmp::min(POOL_LOW_WATER - local.free, donor.free);
            if amount == 0 {
                continue;
            }
            self.splice(&mut donor, &mut local, amount);
            log::debug!(
                "rebalanced {} frames from pool {} to pool {}",
                amount,
                donor_index,
                pool_index
            );
        }
    }

    /// Moves the first `amount` frames of `src`'s list onto the head of
    /// `dst`'s, in O(amount). Both pools' locks are held by the caller.
    fn splice(&self, src: &mut FramePool, dst: &mut FramePool, amount: usize) {
        let head = src.head.expect("free count disagrees with free list");
        let mut tail = head;
        for _ in 1..amount {
            tail = self
                .next_free(tail)
                .expect("free count disagrees with free list");
        }

        src.head = self.next_free(tail);
        self.page_info(tail)
            .next
            .store(dst.head.map_or(0, |f| f.base().data()), Ordering::Relaxed);
        dst.head = Some(head);

        src.free -= amount;
        dst.free += amount;
    }

    fn pop(&self, pool: &mut FramePool) -> Option<Frame> {
        let frame = pool.head?;
        let info = self.page_info(frame);

        pool.head = self.next_free(frame);
        pool.free -= 1;
        info.next.store(0, Ordering::Relaxed);

        let previous = info.refcount.swap(1, Ordering::AcqRel);
        debug_assert_eq!(previous, 0, "pooled {frame:?} had a nonzero refcount");
        Some(frame)
    }

    fn next_free(&self, frame: Frame) -> Option<Frame> {
        let next = self.page_info(frame).next.load(Ordering::Relaxed);
        if next == 0 {
            None
        } else {
            Some(Frame::containing(PhysicalAddress::new(next)))
        }
    }

    fn page_info(&self, frame: Frame) -> &PageInfo {
        let offset = frame
            .base()
            .data()
            .checked_sub(self.base.data())
            .unwrap_or_else(|| panic!("{frame:?} outside managed range"));
        self.info
            .get(offset / PAGE_SIZE)
            .unwrap_or_else(|| panic!("{frame:?} outside managed range"))
    }

    fn pool_index(&self, cpu: LogicalCpuId) -> usize {
        let index = cpu.get() as usize;
        assert!(index < self.pools.len(), "no frame pool for {cpu:?}");
        index
    }

    /// Fills a frame that the caller exclusively owns.
    unsafe fn fill(&self, frame: Frame, byte: u8) {
        unsafe {
            (frame.base().data() as *mut u8).write_bytes(byte, PAGE_SIZE);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Leaks a buffer large enough for `frames` page frames and builds an
    /// allocator over the aligned region inside it.
    pub(crate) fn new_allocator(frames: usize, cpu_count: usize) -> FrameAllocator {
        let buffer = Box::leak(vec![0u8; (frames + 1) * PAGE_SIZE].into_boxed_slice());
        let first = crate::paging::round_up_pages(buffer.as_mut_ptr() as usize);
        let allocator = unsafe {
            FrameAllocator::new(PhysicalAddress::new(first), frames * PAGE_SIZE, cpu_count)
        };
        assert_eq!(allocator.total_frames(), frames);
        allocator
    }

    /// The frame's contents, viewed through the identity physical mapping.
    pub(crate) fn frame_bytes(frame: Frame) -> &'static [u8] {
        unsafe { core::slice::from_raw_parts(frame.base().data() as *const u8, PAGE_SIZE) }
    }

    /// Overwrites part of a frame the test logically owns.
    pub(crate) fn write_frame(frame: Frame, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= PAGE_SIZE);
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                (frame.base().data() as *mut u8).add(offset),
                bytes.len(),
            );
        }
    }
}
