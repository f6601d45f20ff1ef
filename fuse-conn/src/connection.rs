//! The connection core: owns the kernel channel, reads framed requests,
//! derives per-request cancellation scopes, and funnels typed replies back
//! as wire messages.
//!
//! Frame intake is strictly serial; replies are committed concurrently from
//! whatever tasks run the handlers. The registry below is the only shared
//! mutable state, and the reply path removes a request's entry *before*
//! writing the reply bytes: once the reply is visible, the kernel is free to
//! reuse the `unique` id for a new request.

use crate::cancel::{CancelHandle, CancelScope};
use crate::channel::{Channel, Frame, FrameHeader};
use crate::encode::{self, Encode};
use crate::errno::Errno;
use crate::kernel::fuse_opcode::FUSE_FORGET;
use crate::oplog::OpLogger;
use crate::ops::{self, IsReplyOf, Operation, ReplyStatFs};

use std::collections::HashMap;
use std::fmt;
use std::io::{self, IoSlice};
use std::sync::{Arc, Mutex};

/// In-flight request table: kernel `unique` id to cancellation trigger.
///
/// Entries exist exactly while an op is out with user code and un-replied.
/// `forget` requests never get an entry: their ids are eligible for reuse
/// the instant the request is read, since no reply is ever sent.
#[derive(Debug, Default)]
struct CancelRegistry {
    entries: Mutex<HashMap<u64, CancelHandle>>,
}

impl CancelRegistry {
    fn record(&self, unique: u64, handle: CancelHandle) {
        #[allow(clippy::unwrap_used)] // poisoned only by a panicking holder
        let mut entries = self.entries.lock().unwrap();
        if entries.insert(unique, handle).is_some() {
            panic!("duplicate cancel entry for request {}", unique);
        }
    }

    /// Removes the entry and fires its trigger. The reader loop guarantees
    /// pairing, so a missing entry is a protocol bug.
    fn finish(&self, unique: u64) {
        #[allow(clippy::unwrap_used)]
        let handle = {
            let mut entries = self.entries.lock().unwrap();
            entries
                .remove(&unique)
                .unwrap_or_else(|| panic!("no cancel entry for request {}", unique))
        };
        handle.fire();
    }

    /// Fires the trigger if the request is still in flight. The entry stays
    /// in the table; the reply path removes it. A missing entry means the
    /// reply raced ahead of the interrupt, which is fine.
    fn interrupt(&self, unique: u64) {
        #[allow(clippy::unwrap_used)]
        let handle = self.entries.lock().unwrap().get(&unique).cloned();
        if let Some(handle) = handle {
            handle.fire();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[cfg(test)]
    fn contains(&self, unique: u64) -> bool {
        self.entries.lock().unwrap().contains_key(&unique)
    }
}

/// Connection state reachable from reply paths on other tasks.
struct Shared {
    channel: Arc<dyn Channel>,
    registry: CancelRegistry,
    debug_log: Option<OpLogger>,
    error_log: Option<OpLogger>,
}

/// A connection to the FUSE kernel process.
pub struct Connection {
    shared: Arc<Shared>,
    /// The scope from which all op scopes are derived.
    scope: CancelScope,
    /// For log correlation only; wraparound is harmless.
    next_op_id: u32,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("next_op_id", &self.next_op_id)
            .finish()
    }
}

impl Connection {
    /// Wraps a mounted channel. The loggers may be omitted; each missing
    /// sink silently suppresses its category.
    #[must_use]
    pub fn new(
        scope: CancelScope,
        debug_log: Option<OpLogger>,
        error_log: Option<OpLogger>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                registry: CancelRegistry::default(),
                debug_log,
                error_log,
            }),
            scope,
            next_op_id: 0,
        }
    }

    /// Resolves once the mount handshake has completed.
    ///
    /// # Errors
    /// Returns the mount error, if the handshake failed.
    pub async fn ready(&self) -> io::Result<()> {
        self.shared.channel.ready().await
    }

    /// Releases the kernel channel. Must not be called while operations read
    /// from this connection are still awaiting their reply.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the channel fails to close.
    pub fn close(&self) -> io::Result<()> {
        self.shared.channel.close()
    }

    /// Sets up per-op state. Every op other than `forget` gets a scope of
    /// its own, registered under the request's `unique` id; `forget` runs
    /// directly under the connection scope (see [`CancelRegistry`]).
    fn begin_op(&self, header: &FrameHeader) -> CancelScope {
        if header.opcode == FUSE_FORGET {
            return self.scope.clone();
        }

        let (scope, handle) = self.scope.child();
        self.shared.registry.record(header.unique, handle);
        scope
    }

    /// Reads the next operation from the kernel. `Ok(None)` means the kernel
    /// has closed the channel.
    ///
    /// Operations are delivered in exactly the order the kernel sent them.
    /// Must not be called concurrently with itself. `statfs` and `interrupt`
    /// requests are handled internally and never surface.
    ///
    /// # Errors
    /// Returns the channel's read error, or a wrapped convert error when a
    /// frame cannot be decoded (subsequent frames are unaffected).
    pub async fn read_op(&mut self) -> io::Result<Option<(OpContext, Operation)>> {
        loop {
            let frame = match self.shared.channel.read_frame().await? {
                Some(frame) => frame,
                None => return Ok(None),
            };

            let header = *frame.header();

            let op_id = self.next_op_id;
            self.next_op_id = self.next_op_id.wrapping_add(1);

            let scope = self.begin_op(&header);

            let proto = self.shared.channel.protocol();
            let op = match ops::convert(&frame, proto) {
                Ok(op) => op,
                Err(err) => {
                    // The typed op never existed, so no reply path will run:
                    // release the cancel entry here and let the frame drop.
                    if header.opcode != FUSE_FORGET {
                        self.shared.registry.finish(header.unique);
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Convert: {}", err),
                    ));
                }
            };

            op_trace!(self.shared.debug_log, op_id, "<- {}", op);

            let cx = OpContext {
                scope,
                replier: Replier {
                    shared: Arc::clone(&self.shared),
                    frame,
                    op_id,
                    name: op.name(),
                },
            };

            match op {
                // Answering statfs is required for the mount to complete on
                // some platforms; it is not surfaced to the filesystem.
                Operation::StatFs(op) => {
                    cx.reply(&op, ReplyStatFs::default()).await?;
                }
                Operation::Interrupt(op) => {
                    self.shared.registry.interrupt(op.unique());
                    cx.discard();
                }
                op => return Ok(Some((cx, op))),
            }
        }
    }
}

/// Everything a reply commit needs, bundled so it can travel with the op
/// into a handler task. Consuming it completes the op's lifecycle; the
/// frame buffer returns to its pool when the commit finishes.
struct Replier {
    shared: Arc<Shared>,
    frame: Frame,
    op_id: u32,
    name: &'static str,
}

enum Outcome<'a> {
    Ok(&'a (dyn fmt::Debug + Send + Sync)),
    Err(Errno),
}

impl Replier {
    fn unique(&self) -> u64 {
        self.frame.header().unique
    }

    async fn commit(self, bufs: &[IoSlice<'_>], outcome: Outcome<'_>) -> io::Result<()> {
        let header = *self.frame.header();

        // The entry must be gone before the reply bytes reach the kernel;
        // a reused `unique` may otherwise collide with it.
        if header.opcode != FUSE_FORGET {
            self.shared.registry.finish(header.unique);
        }

        match outcome {
            Outcome::Ok(op) => {
                op_trace!(self.shared.debug_log, self.op_id, "-> OK: {:?}", op);
            }
            Outcome::Err(errno) => {
                op_trace!(self.shared.debug_log, self.op_id, "-> error: {}", errno);
                if let Some(error_log) = self.shared.error_log.as_ref() {
                    error_log.log(format_args!("({}) error: {}", self.name, errno));
                }
            }
        }

        if header.opcode == FUSE_FORGET {
            // forget carries no reply; committing only releases the frame
            return Ok(());
        }

        self.shared
            .channel
            .write_reply(bufs)
            .await
            .map_err(|err| io::Error::new(err.kind(), format!("WriteToKernel: {}", err)))
    }

    /// Completes the op without writing anything. Used for the internally
    /// handled interrupt requests.
    fn discard(self) {
        let header = *self.frame.header();
        if header.opcode != FUSE_FORGET {
            self.shared.registry.finish(header.unique);
        }
    }
}

/// Per-operation context handed to user code alongside the typed op.
///
/// Committing a reply consumes the context; each op gets exactly one reply.
/// Dropping the context without replying releases the frame but leaves the
/// kernel waiting, so handlers should always answer non-`forget` ops.
pub struct OpContext {
    scope: CancelScope,
    replier: Replier,
}

impl fmt::Debug for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("op_id", &self.replier.op_id)
            .field("unique", &self.replier.unique())
            .finish()
    }
}

impl OpContext {
    /// The op's cancellation scope. Fired when the kernel interrupts the
    /// request, when the connection scope is cancelled, or on reply commit.
    #[must_use]
    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// The request header as delivered by the kernel.
    #[must_use]
    pub fn header(&self) -> &FrameHeader {
        self.replier.frame.header()
    }

    /// Commits a successful reply.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the reply cannot be written to the kernel.
    pub async fn reply<T, R>(self, op: &T, reply: R) -> io::Result<()>
    where
        T: fmt::Debug + Send + Sync,
        R: IsReplyOf<T> + Encode,
    {
        // declared before `out`, which borrows it until the commit returns
        let header;

        let mut out = encode::ReplyBuf::collect(&reply);
        header = encode::out_header(self.replier.unique(), 0, out.body_len());
        out.set_header(&header);

        self.replier.commit(out.as_slices(), Outcome::Ok(op)).await
    }

    /// Commits a negative reply carrying `errno`.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the reply cannot be written to the kernel.
    pub async fn reply_err(self, errno: Errno) -> io::Result<()> {
        let header = encode::out_header(
            self.replier.unique(),
            errno.as_raw().wrapping_neg(),
            0,
        );
        let bufs = [IoSlice::new(encode::abi_bytes(&header))];

        self.replier.commit(&bufs, Outcome::Err(errno)).await
    }

    /// Writes a correlated debug line for this op. Prefer the [`op_log!`]
    /// macro, which fills in the call site.
    ///
    /// [`op_log!`]: crate::op_log
    pub fn log_at(&self, file: &str, line: u32, args: fmt::Arguments<'_>) {
        if let Some(debug_log) = self.replier.shared.debug_log.as_ref() {
            debug_log.log_op(self.replier.op_id, file, line, args);
        }
    }

    fn discard(self) {
        self.replier.discard();
    }
}

/// Writes a correlated line to the connection's debug sink, tagged with the
/// call site, through an [`OpContext`].
#[macro_export]
macro_rules! op_log {
    ($cx:expr, $($arg:tt)+) => {
        $cx.log_at(file!(), line!(), format_args!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{frame, frame_with_pool};
    use crate::channel::{BufferPool, ProtocolVersion};
    use crate::encode::abi_bytes;
    use crate::kernel;
    #[allow(clippy::wildcard_imports)]
    use crate::kernel::fuse_opcode::*;
    use crate::ops::{Entry, ReplyEntry};

    use std::collections::VecDeque;
    use std::convert::TryInto;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_std::task;
    use async_trait::async_trait;

    struct MockChannel {
        frames: Mutex<VecDeque<io::Result<Option<Frame>>>>,
        written: Mutex<Vec<Vec<u8>>>,
        fail_writes: AtomicBool,
        write_hook: Mutex<Option<Box<dyn FnMut() + Send>>>,
    }

    impl MockChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(VecDeque::new()),
                written: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
                write_hook: Mutex::new(None),
            })
        }

        fn push(&self, frame: Frame) {
            self.frames.lock().unwrap().push_back(Ok(Some(frame)));
        }

        fn written(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }

        fn set_write_hook(&self, hook: Box<dyn FnMut() + Send>) {
            *self.write_hook.lock().unwrap() = Some(hook);
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        async fn read_frame(&self) -> io::Result<Option<Frame>> {
            match self.frames.lock().unwrap().pop_front() {
                Some(next) => next,
                None => Ok(None),
            }
        }

        async fn write_reply(&self, bufs: &[IoSlice<'_>]) -> io::Result<()> {
            if let Some(hook) = self.write_hook.lock().unwrap().as_mut() {
                hook();
            }

            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "kernel is gone"));
            }

            let mut msg = Vec::new();
            for buf in bufs {
                msg.extend_from_slice(buf);
            }
            self.written.lock().unwrap().push(msg);
            Ok(())
        }

        fn protocol(&self) -> ProtocolVersion {
            ProtocolVersion {
                major: 7,
                minor: 31,
            }
        }

        async fn ready(&self) -> io::Result<()> {
            Ok(())
        }

        fn close(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn connection(mock: &Arc<MockChannel>) -> Connection {
        let channel: Arc<dyn Channel> = mock.clone();
        Connection::new(CancelScope::root(), None, None, channel)
    }

    fn forget_body() -> Vec<u8> {
        abi_bytes(&kernel::fuse_forget_in { nlookup: 1 }).to_vec()
    }

    fn getattr_body() -> Vec<u8> {
        abi_bytes(&kernel::fuse_getattr_in {
            getattr_flags: 0,
            dummy: 0,
            fh: 0,
        })
        .to_vec()
    }

    fn interrupt_body(target: u64) -> Vec<u8> {
        abi_bytes(&kernel::fuse_interrupt_in { unique: target }).to_vec()
    }

    fn out_header_of(msg: &[u8]) -> (u32, i32, u64) {
        let len = u32::from_ne_bytes(msg[0..4].try_into().unwrap());
        let error = i32::from_ne_bytes(msg[4..8].try_into().unwrap());
        let unique = u64::from_ne_bytes(msg[8..16].try_into().unwrap());
        (len, error, unique)
    }

    #[test]
    fn delivers_ops_in_kernel_order() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_LOOKUP, 1, b"foo\0"));
            mock.push(frame(FUSE_GETATTR, 2, &getattr_body()));
            mock.push(frame(FUSE_READLINK, 3, &[]));

            let mut conn = connection(&mock);

            let (_cx1, op1) = conn.read_op().await.unwrap().unwrap();
            let (_cx2, op2) = conn.read_op().await.unwrap().unwrap();
            let (_cx3, op3) = conn.read_op().await.unwrap().unwrap();

            assert!(matches!(op1, Operation::Lookup(_)));
            assert!(matches!(op2, Operation::GetAttr(_)));
            assert!(matches!(op3, Operation::ReadLink(_)));

            assert!(conn.read_op().await.unwrap().is_none());
        });
    }

    #[test]
    fn round_trip_reply_reaches_channel() {
        task::block_on(async {
            let mock = MockChannel::new();
            let pool = Arc::new(BufferPool::new(4, 256, 8));
            mock.push(frame_with_pool(
                FUSE_LOOKUP,
                7,
                b"foo\0",
                Some(Arc::clone(&pool)),
            ));

            let mut conn = connection(&mock);
            let (cx, op) = conn.read_op().await.unwrap().unwrap();

            let lookup = match op {
                Operation::Lookup(lookup) => lookup,
                other => panic!("unexpected operation: {:?}", other),
            };

            let mut entry = Entry::default();
            entry.nodeid(2);
            cx.reply(&lookup, ReplyEntry::new(entry)).await.unwrap();

            let written = mock.written();
            assert_eq!(written.len(), 1);

            let expected_len = std::mem::size_of::<kernel::fuse_out_header>()
                + std::mem::size_of::<kernel::fuse_entry_out>();
            let (len, error, unique) = out_header_of(&written[0]);
            assert_eq!(len as usize, expected_len);
            assert_eq!(written[0].len(), expected_len);
            assert_eq!(error, 0);
            assert_eq!(unique, 7);

            assert_eq!(conn.shared.registry.len(), 0);
            assert_eq!(pool.pooled(), 1);
        });
    }

    #[test]
    fn replies_commit_in_any_order() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_LOOKUP, 1, b"a\0"));
            mock.push(frame(FUSE_LOOKUP, 2, b"b\0"));
            mock.push(frame(FUSE_LOOKUP, 3, b"c\0"));

            let mut conn = connection(&mock);
            let first = conn.read_op().await.unwrap().unwrap();
            let second = conn.read_op().await.unwrap().unwrap();
            let third = conn.read_op().await.unwrap().unwrap();
            assert_eq!(conn.shared.registry.len(), 3);

            for (cx, _op) in vec![second, third, first] {
                cx.reply_err(Errno::ENOENT).await.unwrap();
            }

            assert_eq!(conn.shared.registry.len(), 0);
            assert_eq!(mock.written().len(), 3);
        });
    }

    #[test]
    fn forget_never_registers() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_FORGET, 12, &forget_body()));

            let mut conn = connection(&mock);
            let (cx, op) = conn.read_op().await.unwrap().unwrap();

            assert!(matches!(op, Operation::Forget(_)));
            assert_eq!(conn.shared.registry.len(), 0);

            // committing a forget touches neither the registry nor the wire
            cx.reply_err(Errno::EIO).await.unwrap();
            assert_eq!(conn.shared.registry.len(), 0);
            assert!(mock.written().is_empty());
        });
    }

    #[test]
    fn forget_id_reuse_is_tolerated() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_FORGET, 12, &forget_body()));
            mock.push(frame(FUSE_LOOKUP, 12, b"foo\0"));

            let mut conn = connection(&mock);

            let (_cx1, op1) = conn.read_op().await.unwrap().unwrap();
            assert!(matches!(op1, Operation::Forget(_)));

            let (cx2, op2) = conn.read_op().await.unwrap().unwrap();
            assert!(matches!(op2, Operation::Lookup(_)));
            assert!(conn.shared.registry.contains(12));

            cx2.reply_err(Errno::ENOENT).await.unwrap();
            assert_eq!(conn.shared.registry.len(), 0);
        });
    }

    #[test]
    fn statfs_is_answered_internally() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_STATFS, 1, &[]));
            mock.push(frame(FUSE_LOOKUP, 2, b"foo\0"));

            let mut conn = connection(&mock);

            // the statfs must be consumed and answered before the lookup
            // surfaces
            let (_cx, op) = conn.read_op().await.unwrap().unwrap();
            assert!(matches!(op, Operation::Lookup(_)));

            let written = mock.written();
            assert_eq!(written.len(), 1);

            let expected_len = std::mem::size_of::<kernel::fuse_out_header>()
                + std::mem::size_of::<kernel::fuse_statfs_out>();
            let (len, error, unique) = out_header_of(&written[0]);
            assert_eq!(len as usize, expected_len);
            assert_eq!(error, 0);
            assert_eq!(unique, 1);
        });
    }

    #[test]
    fn interrupt_cancels_inflight_op() {
        task::block_on(async {
            let mock = MockChannel::new();
            let read_in = zeroed_read_in();
            mock.push(frame(FUSE_READ, 9, abi_bytes(&read_in)));
            mock.push(frame(FUSE_INTERRUPT, 10, &interrupt_body(9)));

            let mut conn = connection(&mock);

            let (cx, op) = conn.read_op().await.unwrap().unwrap();
            assert!(matches!(op, Operation::Read(_)));
            assert!(!cx.scope().is_cancelled());

            // consumes the interrupt internally, then hits end of stream
            assert!(conn.read_op().await.unwrap().is_none());

            assert!(cx.scope().is_cancelled());
            assert!(mock.written().is_empty());

            // the interrupted op is still registered until its reply commits
            assert_eq!(conn.shared.registry.len(), 1);

            cx.reply_err(Errno::EINTR).await.unwrap();
            assert_eq!(conn.shared.registry.len(), 0);
            assert_eq!(mock.written().len(), 1);
        });
    }

    #[test]
    fn late_interrupt_is_silent() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_GETATTR, 4, &getattr_body()));

            let mut conn = connection(&mock);
            let (cx, _op) = conn.read_op().await.unwrap().unwrap();
            cx.reply_err(Errno::ENOENT).await.unwrap();

            mock.push(frame(FUSE_INTERRUPT, 5, &interrupt_body(4)));
            assert!(conn.read_op().await.unwrap().is_none());

            assert_eq!(conn.shared.registry.len(), 0);
            assert_eq!(mock.written().len(), 1);
        });
    }

    #[test]
    fn registry_entry_removed_before_reply_write() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_LOOKUP, 12, b"foo\0"));

            let mut conn = connection(&mock);
            let (cx, _op) = conn.read_op().await.unwrap().unwrap();

            let shared = Arc::clone(&conn.shared);
            let observed = Arc::new(AtomicBool::new(false));
            let observed_in_hook = Arc::clone(&observed);
            mock.set_write_hook(Box::new(move || {
                assert!(
                    !shared.registry.contains(12),
                    "registry entry still present at write time"
                );
                observed_in_hook.store(true, Ordering::SeqCst);
            }));

            cx.reply_err(Errno::ENOENT).await.unwrap();
            assert!(observed.load(Ordering::SeqCst));

            // a fresh request reusing the unique must register cleanly
            mock.push(frame(FUSE_LOOKUP, 12, b"bar\0"));
            let (_cx2, _op2) = conn.read_op().await.unwrap().unwrap();
            assert!(conn.shared.registry.contains(12));
        });
    }

    #[test]
    fn frame_destroyed_on_every_reply_path() {
        task::block_on(async {
            let pool = Arc::new(BufferPool::new(8, 256, 8));

            // all three frames up front, each on its own fresh buffer
            let mock = MockChannel::new();
            mock.push(frame_with_pool(
                FUSE_LOOKUP,
                1,
                b"a\0",
                Some(Arc::clone(&pool)),
            ));
            mock.push(frame_with_pool(
                FUSE_LOOKUP,
                2,
                b"b\0",
                Some(Arc::clone(&pool)),
            ));
            mock.push(frame_with_pool(
                FUSE_LOOKUP,
                3,
                b"c\0",
                Some(Arc::clone(&pool)),
            ));
            assert_eq!(pool.pooled(), 0);

            let mut conn = connection(&mock);

            // success
            let (cx, op) = conn.read_op().await.unwrap().unwrap();
            let lookup = match op {
                Operation::Lookup(lookup) => lookup,
                other => panic!("unexpected operation: {:?}", other),
            };
            cx.reply(&lookup, ReplyEntry::new(Entry::default()))
                .await
                .unwrap();
            assert_eq!(pool.pooled(), 1);

            // user error
            let (cx, _op) = conn.read_op().await.unwrap().unwrap();
            cx.reply_err(Errno::ENOENT).await.unwrap();
            assert_eq!(pool.pooled(), 2);

            // wire write failure
            let (cx, _op) = conn.read_op().await.unwrap().unwrap();
            mock.fail_writes.store(true, Ordering::SeqCst);
            cx.reply_err(Errno::ENOENT).await.unwrap_err();
            assert_eq!(pool.pooled(), 3);
        });
    }

    #[test]
    fn write_failure_surfaces_after_cleanup() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_LOOKUP, 6, b"foo\0"));

            let mut conn = connection(&mock);
            let (cx, _op) = conn.read_op().await.unwrap().unwrap();

            mock.fail_writes.store(true, Ordering::SeqCst);
            let err = cx.reply_err(Errno::ENOENT).await.unwrap_err();

            assert!(err.to_string().contains("WriteToKernel"), "err = {}", err);
            assert_eq!(conn.shared.registry.len(), 0);
        });
    }

    #[test]
    fn convert_error_surfaces_and_stream_continues() {
        task::block_on(async {
            let mock = MockChannel::new();
            // lookup body without its NUL terminator cannot be decoded
            mock.push(frame(FUSE_LOOKUP, 5, b"foo"));
            mock.push(frame(FUSE_LOOKUP, 6, b"bar\0"));

            let mut conn = connection(&mock);

            let err = conn.read_op().await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
            assert!(err.to_string().contains("Convert"), "err = {}", err);

            // the failed frame's cancel entry was rolled back
            assert_eq!(conn.shared.registry.len(), 0);

            let (_cx, op) = conn.read_op().await.unwrap().unwrap();
            assert!(matches!(op, Operation::Lookup(_)));
        });
    }

    #[test]
    fn parent_cancel_reaches_all_live_ops() {
        task::block_on(async {
            let root = CancelScope::root();

            let mock = MockChannel::new();
            mock.push(frame(FUSE_LOOKUP, 1, b"a\0"));
            mock.push(frame(FUSE_LOOKUP, 2, b"b\0"));

            let channel: Arc<dyn Channel> = mock.clone();
            let mut conn = Connection::new(root.clone(), None, None, channel);

            let (cx1, _op1) = conn.read_op().await.unwrap().unwrap();
            let (cx2, _op2) = conn.read_op().await.unwrap().unwrap();

            root.cancel();

            assert!(cx1.scope().is_cancelled());
            assert!(cx2.scope().is_cancelled());
        });
    }

    #[test]
    #[should_panic(expected = "duplicate cancel entry")]
    fn duplicate_unique_while_inflight_panics() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.push(frame(FUSE_LOOKUP, 7, b"a\0"));
            mock.push(frame(FUSE_LOOKUP, 7, b"b\0"));

            let mut conn = connection(&mock);
            let _first = conn.read_op().await.unwrap().unwrap();
            let _second = conn.read_op().await.unwrap();
        });
    }

    #[test]
    #[should_panic(expected = "no cancel entry")]
    fn finish_without_entry_panics() {
        let registry = CancelRegistry::default();
        registry.finish(1);
    }

    #[test]
    fn interrupt_without_entry_is_noop() {
        let registry = CancelRegistry::default();
        registry.interrupt(1);
    }

    #[test]
    fn read_error_is_surfaced() {
        task::block_on(async {
            let mock = MockChannel::new();
            mock.frames
                .lock()
                .unwrap()
                .push_back(Err(io::Error::new(io::ErrorKind::Other, "device failure")));

            let mut conn = connection(&mock);
            let err = conn.read_op().await.unwrap_err();
            assert!(err.to_string().contains("device failure"));
        });
    }

    #[test]
    fn debug_sink_records_op_lifecycle() {
        use std::io::Write;

        #[derive(Clone, Default)]
        struct SharedBuf(Arc<Mutex<Vec<u8>>>);

        impl Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        task::block_on(async {
            let buf = SharedBuf::default();
            let mock = MockChannel::new();
            mock.push(frame(FUSE_LOOKUP, 1, b"foo\0"));

            let channel: Arc<dyn Channel> = mock.clone();
            let mut conn = Connection::new(
                CancelScope::root(),
                Some(OpLogger::new(Box::new(buf.clone()))),
                None,
                channel,
            );

            let (cx, _op) = conn.read_op().await.unwrap().unwrap();
            op_log!(cx, "handling lookup");
            cx.reply_err(Errno::ENOENT).await.unwrap();

            let log = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
            assert!(log.contains("<- Lookup(name=\"foo\")"), "log = {}", log);
            assert!(log.contains("handling lookup"), "log = {}", log);
            assert!(log.contains("-> error:"), "log = {}", log);
            assert!(log.lines().all(|l| l.starts_with("Op 0x00000000 ")));
        });
    }

    fn zeroed_read_in() -> kernel::fuse_read_in {
        kernel::fuse_read_in {
            fh: 0,
            offset: 0,
            size: 4096,
            read_flags: 0,
            lock_owner: 0,
            flags: 0,
            padding: 0,
        }
    }
}
