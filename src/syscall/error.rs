//! # Syscall error values
//!
//! Errno-style error type shared by every fallible operation in the crate.
//! Recoverable failures (bad arguments, exhausted resources, unmapped
//! addresses) are returned as `Error` values; invariant violations that
//! indicate a kernel bug abort via `panic!` at the point of detection.

use core::fmt;

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Error {
    pub errno: i32,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    pub const fn new(errno: i32) -> Error {
        Error { errno }
    }

    /// Multiplexes a result into the single `usize` a syscall returns.
    ///
    /// Errors are encoded as the top 4096 values of the `usize` range, the
    /// same convention user space decodes with [`Error::demux`].
    pub fn mux(result: Result<usize>) -> usize {
        match result {
            Ok(value) => value,
            Err(error) => (-error.errno) as usize,
        }
    }

    /// Inverse of [`Error::mux`].
    pub fn demux(value: usize) -> Result<usize> {
        let errno = -(value as i32);
        if (1..=4095).contains(&errno) {
            Err(Error::new(errno))
        } else {
            Ok(value)
        }
    }

    fn text(self) -> &'static str {
        match self.errno {
            EIO => "I/O error",
            EBADF => "Bad file number",
            ENOMEM => "Out of memory",
            EACCES => "Permission denied",
            EFAULT => "Bad address",
            EINVAL => "Invalid argument",
            EMFILE => "Too many open files",
            _ => "Unknown error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {{ errno: {}, desc: {:?} }}", self.errno, self.text())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const ENOMEM: i32 = 12;
pub const EACCES: i32 = 13;
pub const EFAULT: i32 = 14;
pub const EINVAL: i32 = 22;
pub const EMFILE: i32 = 24;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_demux_round_trip() {
        assert_eq!(Error::demux(Error::mux(Ok(42))), Ok(42));
        assert_eq!(
            Error::demux(Error::mux(Err(Error::new(EINVAL)))),
            Err(Error::new(EINVAL))
        );
    }
}
