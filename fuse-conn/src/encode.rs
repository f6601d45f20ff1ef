//! Reply wire assembly.

use crate::abi_marker::FuseAbiData;
use crate::kernel;

use std::convert::TryFrom;
use std::io::IoSlice;
use std::mem;
use std::slice;

use smallvec::SmallVec;

/// Reinterprets an ABI value as its wire bytes.
pub fn abi_bytes<T: FuseAbiData>(val: &T) -> &[u8] {
    let ptr: *const T = val;
    // sound for FuseAbiData implementors: repr(C) plain old data
    unsafe { slice::from_raw_parts(ptr.cast(), mem::size_of::<T>()) }
}

/// The iovec of one reply message under assembly. Slot 0 is reserved for
/// the out-header, patched in once the body length is known.
pub struct ReplyBuf<'c> {
    bufs: SmallVec<[IoSlice<'c>; 8]>,
    body_len: usize,
}

/// A reply value that can lay itself out as kernel wire bytes.
pub trait Encode {
    fn encode<'c>(&'c self, out: &mut ReplyBuf<'c>);
}

impl<'c> ReplyBuf<'c> {
    pub(crate) fn collect<E: Encode>(reply: &'c E) -> Self {
        let mut out = Self {
            bufs: SmallVec::new(),
            body_len: 0,
        };
        out.bufs.push(IoSlice::new(&[]));
        reply.encode(&mut out);
        out
    }

    /// Appends an ABI struct to the reply body.
    pub fn put<T: FuseAbiData>(&mut self, val: &'c T) {
        self.put_bytes(abi_bytes(val));
    }

    /// Appends raw bytes to the reply body.
    pub fn put_bytes(&mut self, bytes: &'c [u8]) {
        self.body_len = self.body_len.checked_add(bytes.len()).unwrap_or_else(|| {
            panic!(
                "reply length overflow: body_len = {}, add = {}",
                self.body_len,
                bytes.len()
            )
        });
        self.bufs.push(IoSlice::new(bytes));
    }

    pub(crate) fn body_len(&self) -> usize {
        self.body_len
    }

    pub(crate) fn set_header(&mut self, header: &'c kernel::fuse_out_header) {
        self.bufs[0] = IoSlice::new(abi_bytes(header));
    }

    pub(crate) fn as_slices(&self) -> &[IoSlice<'c>] {
        &self.bufs
    }
}

pub(crate) fn out_header(unique: u64, error: i32, body_len: usize) -> kernel::fuse_out_header {
    let header_len = mem::size_of::<kernel::fuse_out_header>();

    let len: u32 = header_len
        .checked_add(body_len)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or_else(|| panic!("reply length overflow: body_len = {}", body_len));

    kernel::fuse_out_header { len, error, unique }
}
