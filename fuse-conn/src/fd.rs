use std::io;
use std::os::raw::{c_char, c_int, c_void};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// An owned `/dev/fuse` descriptor.
///
/// `close` may be called any number of times from any thread; the first call
/// releases the descriptor. Dropping an unclosed descriptor closes it.
#[derive(Debug)]
pub struct FuseDesc {
    fd: RawFd,
    closed: AtomicBool,
}

impl FuseDesc {
    /// # Errors
    /// Returns [`io::Error`] when the device cannot be opened.
    pub fn open() -> io::Result<Self> {
        unsafe {
            let dev_path = b"/dev/fuse\0";
            let pathname: *const c_char = dev_path.as_ptr().cast();

            let ret: c_int = libc::open(pathname, libc::O_RDWR);
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            debug_assert!(ret > 0);
            Ok(Self {
                fd: ret,
                closed: AtomicBool::new(false),
            })
        }
    }

    /// Releases the descriptor. Idempotent.
    ///
    /// # Errors
    /// Returns [`io::Error`] from the first failed `close(2)`.
    pub fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        unsafe {
            let ret: c_int = libc::close(self.fd);
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }
}

impl Drop for FuseDesc {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            unsafe {
                let ret = libc::close(self.fd);
                debug_assert_eq!(ret, 0);
            }
        }
    }
}

impl AsRawFd for FuseDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

#[allow(clippy::as_conversions, clippy::cast_sign_loss)]
const fn force_cast(x: isize) -> usize {
    x as usize
}

fn read(fd: &'_ FuseDesc, buf: &mut [u8]) -> io::Result<usize> {
    unsafe {
        let buf_ptr: *mut c_void = buf.as_mut_ptr().cast();
        let ret: isize = libc::read(fd.fd, buf_ptr, buf.len());
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        // a non-negative `ssize_t` value can not overflow `usize`
        Ok(force_cast(ret))
    }
}

fn write(fd: &'_ FuseDesc, buf: &[u8]) -> io::Result<usize> {
    unsafe {
        let buf_ptr: *const c_void = buf.as_ptr().cast();
        let ret: isize = libc::write(fd.fd, buf_ptr, buf.len());
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        // a non-negative `ssize_t` value can not overflow `usize`
        Ok(force_cast(ret))
    }
}

impl io::Read for &'_ FuseDesc {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read(self, buf)
    }
}

impl io::Write for &'_ FuseDesc {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
