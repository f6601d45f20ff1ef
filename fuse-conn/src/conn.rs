//! The concrete `/dev/fuse` channel.

use crate::channel::{BufferPool, Channel, Frame, ProtocolVersion};
use crate::encode;
use crate::fd::FuseDesc;
use crate::kernel;
use crate::mount::mount;
use crate::ops::{self, FuseInitFlags, Operation, ReplyInit};

use std::io::{self, IoSlice, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use blocking::unblock;
use tracing::debug;

/// page size
const PAGE_SIZE: usize = 4096;

/// max background
const MAX_BACKGROUND: u16 = 10;

/// congestion threshold
const CONGESTION_THRESHOLD: u16 = 10;

/// max write size
const MAX_WRITE_SIZE: u32 = 128 * 1024;

/// request buffer size
const BUFFER_SIZE: usize = 128 * 1024 + 512;

/// A mounted `/dev/fuse` channel.
///
/// Reads run on the blocking thread pool against a pooled aligned buffer;
/// replies are flattened and committed with a single `write(2)`, which the
/// device requires and which makes concurrent reply writers safe.
#[derive(Debug)]
pub struct DevFuse {
    fd: Arc<FuseDesc>,
    pool: Arc<BufferPool>,
    proto: ProtocolVersion,
}

impl DevFuse {
    /// Opens `/dev/fuse`, attaches it to `mount_point`, and performs the
    /// `FUSE_INIT` handshake.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the device cannot be opened, the mount
    /// fails, or the handshake goes off script.
    pub async fn mount(mount_point: PathBuf) -> io::Result<Self> {
        let fd = Arc::new(unblock(FuseDesc::open).await?);
        debug!(?fd, "connected to /dev/fuse");

        {
            let fd = Arc::clone(&fd);
            debug!(?mount_point, "mounting");
            unblock(move || mount(&fd, &mount_point)).await?;
        }
        debug!("mounted");

        let pool = Arc::new(BufferPool::new(
            usize::from(MAX_BACKGROUND),
            BUFFER_SIZE,
            PAGE_SIZE,
        ));

        // The first request must be FUSE_INIT; answer it before handing the
        // channel over.
        let frame = {
            let fd = Arc::clone(&fd);
            let buf = pool.acquire();
            let (buf, ret) = unblock(move || {
                let mut buf = buf;
                let ret = (&*fd).read(&mut buf);
                (buf, ret)
            })
            .await;
            let nread = ret?;

            Frame::parse(buf, nread, Some(Arc::clone(&pool)))
                .map_err(|err| invalid_data(format!("bad init frame: {}", err)))?
        };

        let boot = ProtocolVersion {
            major: kernel::FUSE_KERNEL_VERSION,
            minor: kernel::FUSE_KERNEL_MINOR_VERSION,
        };

        let init = match ops::convert(&frame, boot)
            .map_err(|err| invalid_data(format!("Convert: {}", err)))?
        {
            Operation::Init(init) => init,
            other => {
                return Err(invalid_data(format!(
                    "first request is not FUSE_INIT: {}",
                    other
                )))
            }
        };

        if init.major() != kernel::FUSE_KERNEL_VERSION {
            return Err(invalid_data(format!(
                "unsupported protocol major version: {}",
                init.major()
            )));
        }

        let proto = ProtocolVersion {
            major: init.major(),
            minor: init.minor(),
        };

        let conn = Self { fd, pool, proto };

        let mut reply = ReplyInit::default();
        let _ = reply
            .major(kernel::FUSE_KERNEL_VERSION)
            .minor(kernel::FUSE_KERNEL_MINOR_VERSION)
            .max_readahead(init.max_readahead())
            .flags(FuseInitFlags::empty())
            .max_background(MAX_BACKGROUND)
            .congestion_threshold(CONGESTION_THRESHOLD)
            .max_write(MAX_WRITE_SIZE)
            .time_gran(1)
            .max_pages(0);

        let header;
        let mut out = encode::ReplyBuf::collect(&reply);
        header = encode::out_header(frame.header().unique, 0, out.body_len());
        out.set_header(&header);
        conn.write_reply(out.as_slices()).await?;

        debug!(major = proto.major, minor = proto.minor, "initialized");

        Ok(conn)
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[async_trait]
impl Channel for DevFuse {
    async fn read_frame(&self) -> io::Result<Option<Frame>> {
        loop {
            let fd = Arc::clone(&self.fd);
            let buf = self.pool.acquire();
            let (buf, ret) = unblock(move || {
                let mut buf = buf;
                let ret = (&*fd).read(&mut buf);
                (buf, ret)
            })
            .await;

            match ret {
                Ok(nread) => {
                    let frame = Frame::parse(buf, nread, Some(Arc::clone(&self.pool)))
                        .map_err(|err| invalid_data(format!("bad frame: {}", err)))?;
                    return Ok(Some(frame));
                }
                Err(err) => match err.raw_os_error() {
                    // the kernel closed the channel (unmount)
                    Some(libc::ENODEV) => return Ok(None),
                    Some(libc::EAGAIN) | Some(libc::EINTR) | Some(libc::ENOENT) => continue,
                    _ => return Err(err),
                },
            }
        }
    }

    async fn write_reply(&self, bufs: &[IoSlice<'_>]) -> io::Result<()> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut msg = Vec::with_capacity(total);
        for buf in bufs {
            msg.extend_from_slice(buf);
        }

        let fd = Arc::clone(&self.fd);
        let nwrite = unblock(move || (&*fd).write(&msg)).await?;

        // the device accepts only whole messages
        if nwrite != total {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "partial reply write",
            ));
        }
        Ok(())
    }

    fn protocol(&self) -> ProtocolVersion {
        self.proto
    }

    async fn ready(&self) -> io::Result<()> {
        // the INIT handshake completes inside `mount`
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.fd.close()
    }
}
