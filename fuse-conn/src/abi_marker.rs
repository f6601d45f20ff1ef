//! The allow-list of types the codec may reinterpret as raw kernel bytes.

#[allow(clippy::wildcard_imports)]
use crate::kernel::*;

/// Plain-old-data types that cross the kernel boundary verbatim.
///
/// Implementors must be `#[repr(C)]`, contain no pointers, and stay
/// meaningful under any byte pattern the kernel may produce. The trait is
/// sealed: the set of wire types is closed by this module.
pub unsafe trait FuseAbiData: sealed::Sealed {}

mod sealed {
    pub trait Sealed {}
}

macro_rules! abi_data {
    ($($t:ty),+ $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            unsafe impl FuseAbiData for $t {}
        )+

    };
}

abi_data!(
    u8, u16, u32, u64,
    i8, i16, i32, i64,
    fuse_in_header, fuse_out_header,
    fuse_init_in, fuse_init_out,
    fuse_attr, fuse_kstatfs,
    fuse_entry_out, fuse_forget_in,
    fuse_getattr_in, fuse_attr_out,
    fuse_mknod_in, fuse_mkdir_in, fuse_setattr_in,
    fuse_open_in, fuse_open_out,
    fuse_release_in, fuse_flush_in,
    fuse_read_in, fuse_write_in, fuse_write_out,
    fuse_statfs_out, fuse_fsync_in,
    fuse_getxattr_in, fuse_getxattr_out,
    fuse_interrupt_in, fuse_dirent,
);
