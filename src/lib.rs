//! # kmm — kernel memory-management core
//!
//! The physical-memory and virtual-memory-mapping core of a small multi-core
//! kernel. It answers two questions for the rest of the kernel: "give me a
//! free physical page / take this physical page back", fairly and cheaply
//! across CPUs, and "make this region of a process's address space
//! transparently backed by a file, paged in on demand, and copy-on-write
//! where required".
//!
//! The crate is freestanding (`no_std` outside of tests) and instance-based:
//! the kernel embeds one [`memory::FrameAllocator`] over the physical memory
//! handed over by the bootloader, while tests own small disjoint regions.
//! The on-disk file system is consumed only through the
//! [`context::file::Vnode`] trait; the scheduler and trap dispatch layers
//! decide *when* the operations here run.

#![cfg_attr(not(test), no_std)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate bitflags;

pub mod context;
pub mod cpu_set;
pub mod memory;
pub mod paging;
pub mod syscall;
