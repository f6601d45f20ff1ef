//! A FUSE userspace runtime built around a [`Connection`]: framed request
//! intake from the kernel, typed operations, per-request cancellation
//! scopes, and concurrent reply commits.

#![deny(clippy::all)]

#[macro_use]
mod internel_macros;

// unsafe modules
mod abi_marker;
mod decode;
mod encode;
mod fd;
mod mount;

// safe modules
mod cancel;
mod channel;
mod conn;
mod connection;
mod errno;
mod fs;
mod oplog;
mod utils;

pub mod kernel;
pub mod ops;

pub use self::cancel::{CancelHandle, CancelScope};
pub use self::channel::{BufferPool, Channel, Frame, FrameHeader, ProtocolVersion};
pub use self::conn::DevFuse;
pub use self::connection::{Connection, OpContext};
pub use self::decode::{Decode, DecodeError, Decoder};
pub use self::encode::{Encode, ReplyBuf};
pub use self::errno::Errno;
pub use self::fd::FuseDesc;
pub use self::fs::{serve, FileSystem};
pub use self::oplog::OpLogger;
pub use self::ops::Operation;
