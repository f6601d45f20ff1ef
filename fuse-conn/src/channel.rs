//! The boundary between the connection core and the kernel channel.

use crate::decode::{DecodeError, Decoder};
use crate::kernel;

use std::convert::TryFrom;
use std::io::{self, IoSlice};
use std::mem;
use std::sync::Arc;

use aligned_utils::bytes::AlignedBytes;
use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;

/// Kernel protocol version negotiated at mount time.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolVersion {
    /// major version number
    pub major: u32,
    /// minor version number
    pub minor: u32,
}

/// A kernel channel as seen by the connection core.
///
/// `read_frame` has a single-reader contract: the core never issues two
/// reads concurrently, and frames arrive in exact kernel send order.
/// `write_reply` must tolerate concurrent callers; replies are committed
/// from handler tasks in whatever order they finish.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Reads the next request frame. `Ok(None)` means the kernel has closed
    /// the channel.
    async fn read_frame(&self) -> io::Result<Option<Frame>>;

    /// Writes one complete reply message.
    async fn write_reply(&self, bufs: &[IoSlice<'_>]) -> io::Result<()>;

    /// The protocol version, stable for the channel's lifetime.
    fn protocol(&self) -> ProtocolVersion;

    /// Resolves once the mount handshake has completed.
    async fn ready(&self) -> io::Result<()>;

    /// Releases the kernel channel. Idempotent. Must not be called while
    /// operations read from the channel are still awaiting their reply.
    fn close(&self) -> io::Result<()>;
}

/// Owned copy of the request header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub len: u32,
    pub opcode: u32,
    pub unique: u64,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// One kernel-delivered request message.
///
/// The frame owns its buffer for the whole life of the operation; the reply
/// path consumes the frame after the reply bytes are written, at which point
/// the buffer returns to its pool. Ownership makes the destroy-exactly-once
/// contract structural.
#[derive(Debug)]
pub struct Frame {
    header: FrameHeader,
    buf: Option<AlignedBytes>,
    data_len: usize,
    pool: Option<Arc<BufferPool>>,
}

impl Frame {
    /// Parses the header out of a raw message. `data_len` is the number of
    /// valid bytes in `buf`; it must match the length claimed by the header.
    pub fn parse(
        buf: AlignedBytes,
        data_len: usize,
        pool: Option<Arc<BufferPool>>,
    ) -> Result<Self, DecodeError> {
        if data_len > buf.len() {
            return Err(DecodeError::NotEnough);
        }

        let raw: kernel::fuse_in_header = Decoder::new(&buf[..data_len]).fetch()?;

        if usize::try_from(raw.len) != Ok(data_len) {
            return Err(DecodeError::InvalidValue);
        }

        let header = FrameHeader {
            len: raw.len,
            opcode: raw.opcode,
            unique: raw.unique,
            nodeid: raw.nodeid,
            uid: raw.uid,
            gid: raw.gid,
            pid: raw.pid,
        };

        Ok(Self {
            header,
            buf: Some(buf),
            data_len,
            pool,
        })
    }

    #[must_use]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The op payload after the request header.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        let start = mem::size_of::<kernel::fuse_in_header>();

        #[allow(clippy::unwrap_used)] // present until drop
        let buf = self.buf.as_ref().unwrap();
        &buf[start..self.data_len]
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            if let Some(buf) = self.buf.take() {
                pool.release(buf);
            }
        }
    }
}

/// Pool of aligned request buffers.
#[derive(Debug)]
pub struct BufferPool {
    /// lockfree queue
    queue: ArrayQueue<AlignedBytes>,
    /// buffer size
    buf_len: usize,
    /// buffer alignment
    align: usize,
}

impl BufferPool {
    #[must_use]
    pub fn new(cap: usize, buf_len: usize, align: usize) -> Self {
        Self {
            queue: ArrayQueue::new(cap),
            buf_len,
            align,
        }
    }

    /// Pops a pooled buffer, or allocates a fresh one if the pool is empty.
    #[must_use]
    pub fn acquire(&self) -> AlignedBytes {
        match self.queue.pop() {
            Some(buf) => buf,
            None => AlignedBytes::new_zeroed(self.buf_len, self.align),
        }
    }

    /// Returns a buffer. Drops it if the pool is full or the geometry does
    /// not match.
    pub fn release(&self, buf: AlignedBytes) {
        if buf.len() == self.buf_len && buf.align() == self.align {
            drop(self.queue.push(buf));
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::encode;

    /// Builds a wire-format frame the way the kernel would deliver it.
    pub(crate) fn frame_with_pool(
        opcode: u32,
        unique: u64,
        body: &[u8],
        pool: Option<Arc<BufferPool>>,
    ) -> Frame {
        let header_len = mem::size_of::<kernel::fuse_in_header>();
        let total = header_len + body.len();

        let mut buf = match pool.as_ref() {
            Some(pool) => pool.acquire(),
            None => AlignedBytes::new_zeroed(256, 8),
        };
        assert!(total <= buf.len());

        #[allow(clippy::as_conversions)]
        let header = kernel::fuse_in_header {
            len: total as u32,
            opcode,
            unique,
            nodeid: kernel::FUSE_ROOT_ID,
            uid: 0,
            gid: 0,
            pid: 0,
            padding: 0,
        };

        buf[..header_len].copy_from_slice(encode::abi_bytes(&header));
        buf[header_len..total].copy_from_slice(body);

        Frame::parse(buf, total, pool).unwrap()
    }

    pub(crate) fn frame(opcode: u32, unique: u64, body: &[u8]) -> Frame {
        frame_with_pool(opcode, unique, body, None)
    }
}
