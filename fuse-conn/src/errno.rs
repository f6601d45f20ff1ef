use std::fmt;
use std::io;

/// A raw errno carried in negative replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Self = Self(libc::EPERM);
    pub const ENOENT: Self = Self(libc::ENOENT);
    pub const EINTR: Self = Self(libc::EINTR);
    pub const EIO: Self = Self(libc::EIO);
    pub const EAGAIN: Self = Self(libc::EAGAIN);
    pub const EACCES: Self = Self(libc::EACCES);
    pub const EEXIST: Self = Self(libc::EEXIST);
    pub const ENOTDIR: Self = Self(libc::ENOTDIR);
    pub const EISDIR: Self = Self(libc::EISDIR);
    pub const EINVAL: Self = Self(libc::EINVAL);
    pub const ERANGE: Self = Self(libc::ERANGE);
    pub const ENOSYS: Self = Self(libc::ENOSYS);
    pub const ENODATA: Self = Self(libc::ENODATA);

    #[must_use]
    pub const fn from_raw(errno: i32) -> Self {
        Self(errno)
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Maps an I/O error to the errno it carries, or `EIO` for synthetic ones.
    #[must_use]
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self(errno),
            None => Self::EIO,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}
