//! # Syscall surface
//!
//! Decoding and validation of the raw memory-mapping syscalls, the errno
//! encoding they return through, and the guarded user-memory copies the
//! rest of the kernel uses to move data across the user boundary.

pub mod error;
pub mod flag;
pub mod memory;
pub mod usercopy;

pub use self::error::{Error, Result};
pub use self::memory::{sys_mmap, sys_munmap};
