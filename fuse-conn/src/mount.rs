//! mount

use crate::fd::FuseDesc;

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}

/// Attaches a FUSE fd to the given mount point.
pub(crate) fn mount(fd: &FuseDesc, mount_point: &Path) -> io::Result<()> {
    let target = c_path(mount_point)?;

    let rootmode = {
        let mut st: libc::stat = unsafe { mem::zeroed() };
        let ret = unsafe { libc::stat(target.as_ptr(), &mut st) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        st.st_mode & libc::S_IFMT
    };

    let user_id = unsafe { libc::getuid() };
    let group_id = unsafe { libc::getgid() };

    let opts = format!(
        "fd={},rootmode={:o},user_id={},group_id={}",
        fd.as_raw_fd(),
        rootmode,
        user_id,
        group_id,
    );
    let opts = CString::new(opts)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    let fstype = b"fuse\0";
    let source = b"/dev/fuse\0";

    unsafe {
        let ret = libc::mount(
            source.as_ptr().cast(),
            target.as_ptr(),
            fstype.as_ptr().cast(),
            libc::MS_NOSUID | libc::MS_NODEV,
            opts.as_ptr().cast(),
        );
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}
