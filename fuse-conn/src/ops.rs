//! Typed operations and their reply values.
//!
//! [`convert`] is the codec boundary: it turns a raw request frame into an
//! owned [`Operation`] that can be moved into a handler task. Reply values
//! implement [`Encode`]; the [`IsReplyOf`] relation pins down which reply
//! type answers which operation at compile time.

use crate::channel::{Frame, ProtocolVersion};
use crate::decode::DecodeError;
use crate::decode::Decoder;
use crate::encode::{self, Encode, ReplyBuf};
use crate::kernel;
#[allow(clippy::wildcard_imports)]
use crate::kernel::fuse_opcode::*;
use crate::utils::force_convert;

use std::convert::TryFrom;
use std::fmt;
use std::mem;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use memchr::memchr;

#[derive(Debug)]
#[non_exhaustive]
pub enum Operation {
    Flush(OpFlush),
    FSync(OpFSync),
    Forget(OpForget),
    GetAttr(OpGetAttr),
    GetXAttr(OpGetXAttr),
    Init(OpInit),
    Interrupt(OpInterrupt),
    Lookup(OpLookup),
    MkDir(OpMkDir),
    MkNod(OpMkNod),
    Open(OpOpen),
    OpenDir(OpOpenDir),
    Read(OpRead),
    ReadDir(OpReadDir),
    ReadLink(OpReadLink),
    Release(OpRelease),
    ReleaseDir(OpReleaseDir),
    RmDir(OpRmDir),
    SetAttr(OpSetAttr),
    StatFs(OpStatFs),
    SymLink(OpSymLink),
    Unlink(OpUnlink),
    Write(OpWrite),
}

impl Operation {
    /// The operation's bare name, for error-sink lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Flush(_) => "Flush",
            Operation::FSync(_) => "FSync",
            Operation::Forget(_) => "Forget",
            Operation::GetAttr(_) => "GetAttr",
            Operation::GetXAttr(_) => "GetXAttr",
            Operation::Init(_) => "Init",
            Operation::Interrupt(_) => "Interrupt",
            Operation::Lookup(_) => "Lookup",
            Operation::MkDir(_) => "MkDir",
            Operation::MkNod(_) => "MkNod",
            Operation::Open(_) => "Open",
            Operation::OpenDir(_) => "OpenDir",
            Operation::Read(_) => "Read",
            Operation::ReadDir(_) => "ReadDir",
            Operation::ReadLink(_) => "ReadLink",
            Operation::Release(_) => "Release",
            Operation::ReleaseDir(_) => "ReleaseDir",
            Operation::RmDir(_) => "RmDir",
            Operation::SetAttr(_) => "SetAttr",
            Operation::StatFs(_) => "StatFs",
            Operation::SymLink(_) => "SymLink",
            Operation::Unlink(_) => "Unlink",
            Operation::Write(_) => "Write",
        }
    }
}

/// Short one-line description, used for the `<-` debug record.
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Forget(op) => write!(f, "Forget(nlookup={})", op.nlookup()),
            Operation::Interrupt(op) => write!(f, "Interrupt(target={})", op.unique()),
            Operation::Lookup(op) => {
                write!(f, "Lookup(name={:?})", String::from_utf8_lossy(op.name()))
            }
            Operation::MkDir(op) => write!(
                f,
                "MkDir(name={:?}, mode={:#o})",
                String::from_utf8_lossy(op.name()),
                op.mode()
            ),
            Operation::MkNod(op) => write!(
                f,
                "MkNod(name={:?}, mode={:#o})",
                String::from_utf8_lossy(op.name()),
                op.mode()
            ),
            Operation::Read(op) => write!(
                f,
                "Read(fh={}, offset={}, size={})",
                op.fh(),
                op.offset(),
                op.size()
            ),
            Operation::ReadDir(op) => write!(
                f,
                "ReadDir(fh={}, offset={}, size={})",
                op.fh(),
                op.offset(),
                op.size()
            ),
            Operation::Write(op) => write!(
                f,
                "Write(fh={}, offset={}, size={})",
                op.fh(),
                op.offset(),
                op.size()
            ),
            Operation::GetXAttr(op) => {
                write!(f, "GetXAttr(name={:?})", String::from_utf8_lossy(op.name()))
            }
            Operation::SymLink(op) => write!(
                f,
                "SymLink(name={:?}, link={:?})",
                String::from_utf8_lossy(op.name()),
                String::from_utf8_lossy(op.link())
            ),
            Operation::Unlink(op) => {
                write!(f, "Unlink(name={:?})", String::from_utf8_lossy(op.name()))
            }
            Operation::RmDir(op) => {
                write!(f, "RmDir(name={:?})", String::from_utf8_lossy(op.name()))
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Turns a raw frame into a typed operation.
///
/// # Errors
/// Returns [`DecodeError`] when the frame cannot be decoded under the given
/// protocol version.
pub fn convert(frame: &Frame, proto: ProtocolVersion) -> Result<Operation, DecodeError> {
    if proto.major != kernel::FUSE_KERNEL_VERSION {
        tracing::error!(major = proto.major, "unsupported protocol major version");
        return Err(DecodeError::InvalidValue);
    }

    let opcode = frame.header().opcode;

    let mut de = Decoder::new(frame.body());
    de.all_consuming(|de| {
        let op = match opcode {
            FUSE_FLUSH => Operation::Flush(de.decode()?),
            FUSE_FORGET => Operation::Forget(de.decode()?),
            FUSE_FSYNC => Operation::FSync(de.decode()?),
            FUSE_GETATTR => Operation::GetAttr(de.decode()?),
            FUSE_GETXATTR => Operation::GetXAttr(de.decode()?),
            FUSE_INIT => Operation::Init(de.decode()?),
            FUSE_INTERRUPT => Operation::Interrupt(de.decode()?),
            FUSE_LOOKUP => Operation::Lookup(de.decode()?),
            FUSE_MKDIR => Operation::MkDir(de.decode()?),
            FUSE_MKNOD => Operation::MkNod(de.decode()?),
            FUSE_OPEN => Operation::Open(de.decode()?),
            FUSE_OPENDIR => Operation::OpenDir(de.decode()?),
            FUSE_READ => Operation::Read(de.decode()?),
            FUSE_READDIR => Operation::ReadDir(de.decode()?),
            FUSE_READLINK => Operation::ReadLink(de.decode()?),
            FUSE_RELEASE => Operation::Release(de.decode()?),
            FUSE_RELEASEDIR => Operation::ReleaseDir(de.decode()?),
            FUSE_RMDIR => Operation::RmDir(de.decode()?),
            FUSE_SETATTR => Operation::SetAttr(de.decode()?),
            FUSE_STATFS => Operation::StatFs(de.decode()?),
            FUSE_SYMLINK => Operation::SymLink(de.decode()?),
            FUSE_UNLINK => Operation::Unlink(de.decode()?),
            FUSE_WRITE => Operation::Write(de.decode()?),
            _ => {
                tracing::error!(%opcode, "unimplemented operation");
                return Err(DecodeError::InvalidValue);
            }
        };
        Ok(op)
    })
}

/// Marks `Self` as a valid reply type for the operation `T`.
pub trait IsReplyOf<T> {}

#[derive(Debug, thiserror::Error)]
#[error("NulError: nul position = {}", .pos)]
pub struct NulError {
    pos: usize,
}

impl NulError {
    #[must_use]
    pub fn nul_position(&self) -> usize {
        self.pos
    }
}

fn check_nul_free(bytes: &[u8]) -> Result<&[u8], NulError> {
    match memchr(0, bytes) {
        None => Ok(bytes),
        Some(pos) => Err(NulError { pos }),
    }
}

bitflags! {
    pub struct FuseInitFlags: u32 {
        const ASYNC_READ = kernel::FUSE_ASYNC_READ;
        const ATOMIC_O_TRUNC = kernel::FUSE_ATOMIC_O_TRUNC;
        const BIG_WRITES = kernel::FUSE_BIG_WRITES;
        const DO_READDIRPLUS = kernel::FUSE_DO_READDIRPLUS;
        const WRITEBACK_CACHE = kernel::FUSE_WRITEBACK_CACHE;
        const PARALLEL_DIROPS = kernel::FUSE_PARALLEL_DIROPS;
        const MAX_PAGES = kernel::FUSE_MAX_PAGES;
    }
}

#[derive(Debug, Default)]
pub struct ReplyEmpty(());

impl Encode for ReplyEmpty {
    fn encode<'c>(&'c self, _: &mut ReplyBuf<'c>) {}
}

#[derive(Debug)]
pub struct OpInit(kernel::fuse_init_in);

#[derive(Debug, Default)]
pub struct ReplyInit(kernel::fuse_init_out);

derive_Decode!(OpInit);

derive_Encode!(ReplyInit);

declare_relation!(OpInit => ReplyInit);

impl OpInit {
    getters!(
        major: u32,
        minor: u32,
        max_readahead: u32,
    );

    #[must_use]
    pub fn flags(&self) -> FuseInitFlags {
        FuseInitFlags::from_bits_truncate(self.0.flags)
    }
}

impl ReplyInit {
    setters!(
        major: u32,
        minor: u32,
        max_readahead: u32,
        max_background: u16,
        congestion_threshold: u16,
        max_write: u32,
        time_gran: u32,
        max_pages: u16,
    );

    pub fn flags(&mut self, flags: FuseInitFlags) -> &mut Self {
        self.0.flags = flags.bits();
        self
    }
}

#[derive(Debug)]
pub struct OpLookup {
    name: Vec<u8>,
}

impl OpLookup {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

derive_Decode!(@name OpLookup, name);

declare_relation!(OpLookup => ReplyEntry);

#[derive(Debug, Default)]
pub struct Attr(kernel::fuse_attr);

impl Attr {
    setters!(
        ino: u64,
        size: u64,
        blocks: u64,
        mode: u32,
        nlink: u32,
        uid: u32,
        gid: u32,
        rdev: u32,
        blksize: u32,
    );

    #[inline]
    pub fn atime(&mut self, time: SystemTime) -> &mut Self {
        let time = time.duration_since(UNIX_EPOCH).unwrap_or_default();

        self.0.atime = time.as_secs();
        self.0.atimensec = time.subsec_nanos();
        self
    }

    #[inline]
    pub fn mtime(&mut self, time: SystemTime) -> &mut Self {
        let time = time.duration_since(UNIX_EPOCH).unwrap_or_default();

        self.0.mtime = time.as_secs();
        self.0.mtimensec = time.subsec_nanos();
        self
    }

    #[inline]
    pub fn ctime(&mut self, time: SystemTime) -> &mut Self {
        let time = time.duration_since(UNIX_EPOCH).unwrap_or_default();

        self.0.ctime = time.as_secs();
        self.0.ctimensec = time.subsec_nanos();
        self
    }
}

#[derive(Debug, Default)]
pub struct Entry(kernel::fuse_entry_out);

impl Entry {
    setters!(nodeid: u64, generation: u64,);

    #[inline]
    pub fn attr(&mut self, attr: Attr) -> &mut Self {
        self.0.attr = attr.0;
        self
    }

    #[inline]
    pub fn entry_valid(&mut self, timeout: Duration) -> &mut Self {
        self.0.entry_valid = timeout.as_secs();
        self.0.entry_valid_nsec = timeout.subsec_nanos();
        self
    }

    #[inline]
    pub fn attr_valid(&mut self, timeout: Duration) -> &mut Self {
        self.0.attr_valid = timeout.as_secs();
        self.0.attr_valid_nsec = timeout.subsec_nanos();
        self
    }
}

#[derive(Debug)]
pub struct ReplyEntry(kernel::fuse_entry_out);

impl ReplyEntry {
    #[must_use]
    #[inline]
    pub const fn new(entry: Entry) -> Self {
        Self(entry.0)
    }
}

derive_Encode!(ReplyEntry);

#[derive(Debug)]
pub struct OpForget(kernel::fuse_forget_in);

derive_Decode!(OpForget);

impl OpForget {
    getters!(nlookup: u64,);
}

#[derive(Debug)]
pub struct OpGetAttr(kernel::fuse_getattr_in);

#[derive(Debug)]
pub struct OpSetAttr(kernel::fuse_setattr_in);

derive_Decode!(OpGetAttr);
derive_Decode!(OpSetAttr);

impl OpGetAttr {
    getters!(fh: u64,);
}

impl OpSetAttr {
    getters!(
        valid: u32,
        fh: u64,
        size: u64,
        mode: u32,
        uid: u32,
        gid: u32,
    );
}

#[derive(Debug, Default)]
pub struct ReplyAttr(kernel::fuse_attr_out);

impl ReplyAttr {
    #[inline]
    pub fn attr_valid(&mut self, timeout: Duration) -> &mut Self {
        self.0.attr_valid = timeout.as_secs();
        self.0.attr_valid_nsec = timeout.subsec_nanos();
        self
    }

    #[inline]
    pub fn attr(&mut self, attr: Attr) -> &mut Self {
        self.0.attr = attr.0;
        self
    }
}

derive_Encode!(ReplyAttr);

declare_relation!(OpGetAttr => ReplyAttr);
declare_relation!(OpSetAttr => ReplyAttr);

#[derive(Debug)]
pub struct OpReadLink(());

derive_Decode!(@empty OpReadLink);

pub struct ReplyReadLink<'a>(&'a [u8]);

impl<'a> ReplyReadLink<'a> {
    /// # Errors
    /// Returns [`NulError`] when the link name contains a NUL byte.
    #[inline]
    pub fn new(link_name: &'a [u8]) -> Result<Self, NulError> {
        check_nul_free(link_name)?;
        Ok(Self(link_name))
    }
}

impl Encode for ReplyReadLink<'_> {
    fn encode<'c>(&'c self, out: &mut ReplyBuf<'c>) {
        out.put_bytes(self.0);
    }
}

declare_relation!(OpReadLink => ReplyReadLink<'_>);

#[derive(Debug)]
pub struct OpSymLink {
    name: Vec<u8>,
    link: Vec<u8>,
}

impl OpSymLink {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub fn link(&self) -> &[u8] {
        &self.link
    }
}

derive_Decode!(@name OpSymLink, name, link);

declare_relation!(OpSymLink => ReplyEntry);

#[derive(Debug)]
pub struct OpUnlink {
    name: Vec<u8>,
}

impl OpUnlink {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

derive_Decode!(@name OpUnlink, name);

declare_relation!(OpUnlink => ReplyEmpty);

#[derive(Debug)]
pub struct OpMkNod {
    arg: kernel::fuse_mknod_in,
    name: Vec<u8>,
}

impl OpMkNod {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.arg.mode
    }

    #[must_use]
    pub const fn rdev(&self) -> u32 {
        self.arg.rdev
    }
}

derive_Decode!(@arg_name OpMkNod, arg, name);

declare_relation!(OpMkNod => ReplyEntry);

#[derive(Debug)]
pub struct OpMkDir {
    arg: kernel::fuse_mkdir_in,
    name: Vec<u8>,
}

impl OpMkDir {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.arg.mode
    }
}

derive_Decode!(@arg_name OpMkDir, arg, name);

declare_relation!(OpMkDir => ReplyEntry);

#[derive(Debug)]
pub struct OpRmDir {
    name: Vec<u8>,
}

impl OpRmDir {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

derive_Decode!(@name OpRmDir, name);

declare_relation!(OpRmDir => ReplyEmpty);

#[derive(Debug)]
pub struct OpOpen(kernel::fuse_open_in);

derive_Decode!(OpOpen);

impl OpOpen {
    getters!(flags: u32,);
}

#[derive(Debug, Default)]
pub struct ReplyOpen(kernel::fuse_open_out);

derive_Encode!(ReplyOpen);

declare_relation!(OpOpen => ReplyOpen);

impl ReplyOpen {
    setters!(
        fh: u64,
        open_flags: u32,
    );
}

#[derive(Debug)]
pub struct OpRead(kernel::fuse_read_in);

derive_Decode!(OpRead);

impl OpRead {
    getters!(
        fh: u64,
        offset: u64,
        size: u32,
        read_flags: u32,
        lock_owner: u64,
        flags: u32,
    );
}

pub struct ReplyData<'a> {
    buf: &'a [u8],
    offset: usize,
    max_write_size: usize,
}

impl<'a> ReplyData<'a> {
    #[must_use]
    #[inline]
    pub const fn new(buf: &'a [u8], offset: usize, max_write_size: usize) -> Self {
        Self {
            buf,
            offset,
            max_write_size,
        }
    }
}

impl Encode for ReplyData<'_> {
    fn encode<'c>(&'c self, out: &mut ReplyBuf<'c>) {
        let start = self.offset.min(self.buf.len());
        let end = self
            .offset
            .saturating_add(self.max_write_size)
            .min(self.buf.len());
        out.put_bytes(&self.buf[start..end]);
    }
}

declare_relation!(OpRead => ReplyData<'_>);

#[derive(Debug)]
pub struct OpWrite {
    arg: kernel::fuse_write_in,
    data: Vec<u8>,
}

impl OpWrite {
    #[must_use]
    pub const fn fh(&self) -> u64 {
        self.arg.fh
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.arg.offset
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.arg.size
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

derive_Decode!(@arg_data OpWrite, arg, data);

#[derive(Debug, Default)]
pub struct ReplyWrite(kernel::fuse_write_out);

derive_Encode!(ReplyWrite);

declare_relation!(OpWrite => ReplyWrite);

impl ReplyWrite {
    setters!(size: u32,);
}

#[derive(Debug)]
pub struct OpStatFs(());

derive_Decode!(@empty OpStatFs);

#[derive(Debug, Default)]
pub struct ReplyStatFs(kernel::fuse_statfs_out);

derive_Encode!(ReplyStatFs);

declare_relation!(OpStatFs => ReplyStatFs);

#[derive(Debug)]
pub struct OpRelease(kernel::fuse_release_in);

derive_Decode!(OpRelease);

impl OpRelease {
    getters!(fh: u64, flags: u32,);
}

declare_relation!(OpRelease => ReplyEmpty);

#[derive(Debug)]
pub struct OpFSync(kernel::fuse_fsync_in);

derive_Decode!(OpFSync);

impl OpFSync {
    getters!(fh: u64, fsync_flags: u32,);
}

declare_relation!(OpFSync => ReplyEmpty);

#[derive(Debug)]
pub struct OpReadDir(kernel::fuse_read_in);

derive_Decode!(OpReadDir);

impl OpReadDir {
    getters!(
        fh: u64,
        offset: u64,
        size: u32,
    );
}

/// Accumulates wire-format directory entries.
#[derive(Debug, Default)]
pub struct Directory {
    buf: Vec<u8>,
}

impl Directory {
    #[must_use]
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    /// # Errors
    /// Returns [`NulError`] when the entry name contains a NUL byte.
    pub fn add_entry(&mut self, ino: u64, dir_type: u32, name: &[u8]) -> Result<(), NulError> {
        /// <https://doc.rust-lang.org/std/alloc/struct.Layout.html#method.padding_needed_for>
        const fn round_up(len: usize, align: usize) -> usize {
            len.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
        }

        check_nul_free(name)?;

        let namelen: u32 = force_convert(name.len());

        let entry_len = kernel::fuse_dirent::offset_of_name().wrapping_add(name.len());
        let entry_len_padded = round_up(entry_len, mem::size_of::<u64>());

        // the offset field carries the offset of the *next* entry
        let next_off: u64 = force_convert(self.buf.len().wrapping_add(entry_len_padded));

        let dirent = kernel::fuse_dirent {
            ino,
            off: next_off,
            namelen,
            r#type: dir_type,
        };

        let target_len = self.buf.len().wrapping_add(entry_len_padded);
        self.buf.reserve(entry_len_padded);
        self.buf.extend_from_slice(encode::abi_bytes(&dirent));
        self.buf.extend_from_slice(name);
        self.buf.resize(target_len, 0);

        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

pub struct ReplyDirectory<'a> {
    dir: &'a Directory,
    offset: usize,
    max_write_size: usize,
}

declare_relation!(OpReadDir => ReplyDirectory<'_>);

impl<'a> ReplyDirectory<'a> {
    #[must_use]
    #[inline]
    pub const fn new(dir: &'a Directory, offset: usize, max_write_size: usize) -> Self {
        Self {
            dir,
            offset,
            max_write_size,
        }
    }
}

impl Encode for ReplyDirectory<'_> {
    fn encode<'c>(&'c self, out: &mut ReplyBuf<'c>) {
        let buf: &[u8] = &self.dir.buf;
        let start = self.offset.min(buf.len());
        let end = self
            .offset
            .saturating_add(self.max_write_size)
            .min(buf.len());
        out.put_bytes(&buf[start..end]);
    }
}

#[derive(Debug)]
pub struct OpOpenDir(kernel::fuse_open_in);

derive_Decode!(OpOpenDir);

impl OpOpenDir {
    getters!(flags: u32,);
}

#[derive(Debug, Default)]
pub struct ReplyOpenDir(kernel::fuse_open_out);

derive_Encode!(ReplyOpenDir);

declare_relation!(OpOpenDir => ReplyOpenDir);

impl ReplyOpenDir {
    setters!(
        fh: u64,
        open_flags: u32,
    );
}

#[derive(Debug)]
pub struct OpReleaseDir(kernel::fuse_release_in);

derive_Decode!(OpReleaseDir);

impl OpReleaseDir {
    getters!(fh: u64,);
}

declare_relation!(OpReleaseDir => ReplyEmpty);

#[derive(Debug)]
pub struct OpFlush(kernel::fuse_flush_in);

derive_Decode!(OpFlush);

impl OpFlush {
    getters!(fh: u64, lock_owner: u64,);
}

declare_relation!(OpFlush => ReplyEmpty);

#[derive(Debug)]
pub struct OpInterrupt(kernel::fuse_interrupt_in);

derive_Decode!(OpInterrupt);

impl OpInterrupt {
    // the `unique` id of the request being interrupted
    getters!(unique: u64,);
}

#[derive(Debug)]
pub struct OpGetXAttr {
    arg: kernel::fuse_getxattr_in,
    name: Vec<u8>,
}

impl OpGetXAttr {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.arg.size
    }
}

derive_Decode!(@arg_name OpGetXAttr, arg, name);

pub struct ReplyGetXAttr<'a> {
    out: kernel::fuse_getxattr_out,
    buf: &'a [u8],
}

impl<'a> ReplyGetXAttr<'a> {
    #[must_use]
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        let buf_len =
            u32::try_from(buf.len()).unwrap_or_else(|e| panic!("buf is too large: {}", e));

        Self {
            out: kernel::fuse_getxattr_out {
                size: buf_len,
                padding: 0,
            },
            buf,
        }
    }
}

impl Encode for ReplyGetXAttr<'_> {
    fn encode<'c>(&'c self, out: &mut ReplyBuf<'c>) {
        out.put(&self.out);
        out.put_bytes(self.buf);
    }
}

declare_relation!(OpGetXAttr => ReplyGetXAttr<'_>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::frame;
    use crate::encode::abi_bytes;

    const PROTO: ProtocolVersion = ProtocolVersion {
        major: 7,
        minor: 31,
    };

    #[test]
    fn convert_lookup_carries_name() {
        let frame = frame(FUSE_LOOKUP, 7, b"foo\0");
        let op = convert(&frame, PROTO).unwrap();

        match op {
            Operation::Lookup(lookup) => assert_eq!(lookup.name(), b"foo"),
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn convert_interrupt_carries_target() {
        let body = abi_bytes(&kernel::fuse_interrupt_in { unique: 42 }).to_vec();
        let frame = frame(FUSE_INTERRUPT, 8, &body);

        match convert(&frame, PROTO).unwrap() {
            Operation::Interrupt(intr) => assert_eq!(intr.unique(), 42),
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn convert_rejects_unknown_opcode() {
        let frame = frame(999, 1, &[]);
        assert_eq!(convert(&frame, PROTO).unwrap_err(), DecodeError::InvalidValue);
    }

    #[test]
    fn convert_rejects_trailing_garbage() {
        let body = abi_bytes(&kernel::fuse_interrupt_in { unique: 42 }).to_vec();
        let mut body = body;
        body.push(0xff);
        let frame = frame(FUSE_INTERRUPT, 8, &body);

        assert_eq!(convert(&frame, PROTO).unwrap_err(), DecodeError::TooMuchData);
    }

    #[test]
    fn convert_rejects_foreign_protocol_major() {
        let frame = frame(FUSE_LOOKUP, 7, b"foo\0");
        let proto = ProtocolVersion { major: 8, minor: 0 };
        assert_eq!(convert(&frame, proto).unwrap_err(), DecodeError::InvalidValue);
    }

    #[test]
    fn directory_entries_are_padded_to_eight_bytes() {
        let mut dir = Directory::with_capacity(128);
        dir.add_entry(1, u32::from(libc::DT_DIR), b".").unwrap();
        assert_eq!(dir.len() % 8, 0);

        dir.add_entry(2, u32::from(libc::DT_REG), b"hello").unwrap();
        assert_eq!(dir.len() % 8, 0);
    }

    #[test]
    fn directory_rejects_embedded_nul() {
        let mut dir = Directory::default();
        let err = dir.add_entry(1, u32::from(libc::DT_REG), b"he\0llo").unwrap_err();
        assert_eq!(err.nul_position(), 2);
    }

    #[test]
    fn reply_readlink_rejects_embedded_nul() {
        assert!(ReplyReadLink::new(b"target").is_ok());
        assert!(ReplyReadLink::new(b"tar\0get").is_err());
    }
}
