//! A tiny tree that audits kernel lookup/forget pairing.
//!
//! Serves a root directory holding a file `foo` and a directory `bar`. Any
//! non-existent name may be created under either directory, but the
//! resulting inode appears unlinked immediately. Per-inode reference counts
//! follow the kernel's lookups and forgets; the process panics if a count
//! would go negative, and [`ForgetFs::check`] panics after unmount if any
//! issued inode was never forgotten.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
#[allow(clippy::wildcard_imports)]
use fuse_conn::ops::*;
use fuse_conn::{Errno, FileSystem, OpContext, Operation};
use tracing::debug;

const INO_ROOT: u64 = 1;
const INO_FOO: u64 = 2;
const INO_BAR: u64 = 3;
const INO_DYNAMIC: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Dir,
}

#[derive(Debug)]
struct Inode {
    kind: Kind,
    lookups: u64,
}

#[derive(Debug)]
struct State {
    inodes: HashMap<u64, Inode>,
    next_ino: u64,
}

#[derive(Debug)]
pub struct ForgetFs {
    state: Mutex<State>,
}

impl ForgetFs {
    #[must_use]
    pub fn new() -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(
            INO_ROOT,
            Inode {
                kind: Kind::Dir,
                lookups: 1,
            },
        );
        inodes.insert(
            INO_FOO,
            Inode {
                kind: Kind::File,
                lookups: 0,
            },
        );
        inodes.insert(
            INO_BAR,
            Inode {
                kind: Kind::Dir,
                lookups: 0,
            },
        );

        Self {
            state: Mutex::new(State {
                inodes,
                next_ino: INO_DYNAMIC,
            }),
        }
    }

    /// Panics if any inode still has a non-zero reference count, the root
    /// included: the kernel drops its implicit root reference with a forget
    /// at unmount. For use after unmounting.
    pub fn check(&self) {
        let state = self.state.lock().unwrap();
        for (ino, inode) in &state.inodes {
            if inode.lookups != 0 {
                panic!("inode {} still has {} lookups", ino, inode.lookups);
            }
        }
    }

    fn kind_of(&self, ino: u64) -> Option<Kind> {
        self.state
            .lock()
            .unwrap()
            .inodes
            .get(&ino)
            .map(|inode| inode.kind)
    }

    /// Records one more kernel reference to `ino`.
    fn bump(&self, ino: u64) {
        let mut state = self.state.lock().unwrap();
        let inode = state
            .inodes
            .get_mut(&ino)
            .unwrap_or_else(|| panic!("lookup of unknown inode {}", ino));
        inode.lookups += 1;
    }

    fn forget(&self, ino: u64, nlookup: u64) {
        let mut state = self.state.lock().unwrap();
        let inode = state
            .inodes
            .get_mut(&ino)
            .unwrap_or_else(|| panic!("forget of unknown inode {}", ino));
        inode.lookups = inode
            .lookups
            .checked_sub(nlookup)
            .unwrap_or_else(|| panic!("negative lookup count for inode {}", ino));
    }

    /// Issues a fresh inode that appears unlinked immediately.
    fn create(&self, kind: Kind) -> u64 {
        let mut state = self.state.lock().unwrap();
        let ino = state.next_ino;
        state.next_ino += 1;
        state.inodes.insert(ino, Inode { kind, lookups: 1 });
        ino
    }
}

impl Default for ForgetFs {
    fn default() -> Self {
        Self::new()
    }
}

fn attr_for(ino: u64, kind: Kind) -> Attr {
    let mut attr = Attr::default();
    attr.ino(ino).nlink(1).blksize(4096);
    match kind {
        Kind::Dir => attr.mode(libc::S_IFDIR | 0o777),
        Kind::File => attr.mode(libc::S_IFREG | 0o777),
    };
    attr
}

fn entry_for(ino: u64, kind: Kind) -> ReplyEntry {
    let mut entry = Entry::default();
    entry.nodeid(ino).attr(attr_for(ino, kind));
    ReplyEntry::new(entry)
}

impl ForgetFs {
    async fn do_lookup(&self, cx: OpContext, op: OpLookup) -> io::Result<()> {
        let parent = cx.header().nodeid;

        let found = match (parent, op.name()) {
            (INO_ROOT, b"foo") => Some((INO_FOO, Kind::File)),
            (INO_ROOT, b"bar") => Some((INO_BAR, Kind::Dir)),
            _ => None,
        };

        match found {
            Some((ino, kind)) => {
                self.bump(ino);
                cx.reply(&op, entry_for(ino, kind)).await
            }
            None => cx.reply_err(Errno::ENOENT).await,
        }
    }

    async fn do_getattr(&self, cx: OpContext, op: OpGetAttr) -> io::Result<()> {
        let ino = cx.header().nodeid;

        match self.kind_of(ino) {
            Some(kind) => {
                let mut reply = ReplyAttr::default();
                reply.attr(attr_for(ino, kind));
                cx.reply(&op, reply).await
            }
            None => cx.reply_err(Errno::ENOENT).await,
        }
    }

    async fn do_open(&self, cx: OpContext, op: OpOpen) -> io::Result<()> {
        let ino = cx.header().nodeid;
        debug!(ino, flags = op.flags(), "open");

        match self.kind_of(ino) {
            Some(Kind::File) => cx.reply(&op, ReplyOpen::default()).await,
            Some(Kind::Dir) => cx.reply_err(Errno::EISDIR).await,
            None => cx.reply_err(Errno::ENOENT).await,
        }
    }

    async fn do_opendir(&self, cx: OpContext, op: OpOpenDir) -> io::Result<()> {
        let ino = cx.header().nodeid;

        match self.kind_of(ino) {
            Some(Kind::Dir) => cx.reply(&op, ReplyOpenDir::default()).await,
            Some(Kind::File) => cx.reply_err(Errno::ENOTDIR).await,
            None => cx.reply_err(Errno::ENOENT).await,
        }
    }

    async fn do_readdir(&self, cx: OpContext, op: OpReadDir) -> io::Result<()> {
        let ino = cx.header().nodeid;

        let mut dir = Directory::with_capacity(256);
        match ino {
            INO_ROOT => {
                dir.add_entry(INO_ROOT, u32::from(libc::DT_DIR), b".").unwrap();
                dir.add_entry(INO_ROOT, u32::from(libc::DT_DIR), b"..").unwrap();
                dir.add_entry(INO_FOO, u32::from(libc::DT_REG), b"foo").unwrap();
                dir.add_entry(INO_BAR, u32::from(libc::DT_DIR), b"bar").unwrap();
            }
            INO_BAR => {
                dir.add_entry(INO_BAR, u32::from(libc::DT_DIR), b".").unwrap();
                dir.add_entry(INO_ROOT, u32::from(libc::DT_DIR), b"..").unwrap();
            }
            _ => return cx.reply_err(Errno::ENOTDIR).await,
        }

        #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
        let offset = op.offset() as usize;

        let reply = ReplyDirectory::new(&dir, offset, op.size() as usize);
        cx.reply(&op, reply).await
    }

    async fn do_mknod(&self, cx: OpContext, op: OpMkNod) -> io::Result<()> {
        let parent = cx.header().nodeid;

        if self.kind_of(parent) != Some(Kind::Dir) {
            return cx.reply_err(Errno::ENOTDIR).await;
        }

        let ino = self.create(Kind::File);
        debug!(ino, name = ?String::from_utf8_lossy(op.name()), "mknod");
        cx.reply(&op, entry_for(ino, Kind::File)).await
    }

    async fn do_mkdir(&self, cx: OpContext, op: OpMkDir) -> io::Result<()> {
        let parent = cx.header().nodeid;

        if self.kind_of(parent) != Some(Kind::Dir) {
            return cx.reply_err(Errno::ENOTDIR).await;
        }

        let ino = self.create(Kind::Dir);
        debug!(ino, name = ?String::from_utf8_lossy(op.name()), "mkdir");
        cx.reply(&op, entry_for(ino, Kind::Dir)).await
    }
}

#[async_trait]
impl FileSystem for ForgetFs {
    async fn dispatch(&self, cx: OpContext, op: Operation) -> io::Result<()> {
        match op {
            Operation::Lookup(op) => self.do_lookup(cx, op).await,
            Operation::Forget(op) => {
                // no reply; dropping the context releases the frame
                self.forget(cx.header().nodeid, op.nlookup());
                Ok(())
            }
            Operation::GetAttr(op) => self.do_getattr(cx, op).await,
            Operation::Open(op) => self.do_open(cx, op).await,
            Operation::OpenDir(op) => self.do_opendir(cx, op).await,
            Operation::ReadDir(op) => self.do_readdir(cx, op).await,
            Operation::MkNod(op) => self.do_mknod(cx, op).await,
            Operation::MkDir(op) => self.do_mkdir(cx, op).await,
            Operation::Release(op) => cx.reply(&op, ReplyEmpty::default()).await,
            Operation::ReleaseDir(op) => cx.reply(&op, ReplyEmpty::default()).await,
            Operation::Flush(op) => cx.reply(&op, ReplyEmpty::default()).await,
            _ => cx.reply_err(Errno::ENOSYS).await,
        }
    }
}
