//! The dispatch seam between the connection and a filesystem
//! implementation.

use crate::connection::{Connection, OpContext};
use crate::ops::Operation;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_std::task;
use event_listener::Event;
use tracing::error;

/// A filesystem served over a [`Connection`].
///
/// `dispatch` runs on its own task per operation; implementations reply
/// through the [`OpContext`] and may block or run as long as they need. The
/// context's scope reports kernel interrupts and connection shutdown.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync + 'static {
    async fn dispatch(&self, cx: OpContext, op: Operation) -> io::Result<()>;
}

/// Counts handler tasks so teardown can wait for stragglers.
#[derive(Debug, Default)]
struct Inflight {
    count: AtomicUsize,
    drained: Event,
}

struct InflightGuard {
    inner: Arc<Inflight>,
}

impl Inflight {
    fn enter(self: &Arc<Self>) -> InflightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InflightGuard {
            inner: Arc::clone(self),
        }
    }

    async fn wait(&self) {
        loop {
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            let listener = self.drained.listen();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            listener.await;
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify(usize::MAX);
        }
    }
}

/// Serves `fs` until the kernel closes the channel, spawning one task per
/// operation. Outstanding handlers are drained before the channel is
/// released.
///
/// # Errors
/// Returns the first fatal connection error.
pub async fn serve<F>(mut conn: Connection, fs: Arc<F>) -> io::Result<()>
where
    F: FileSystem,
{
    let inflight = Arc::new(Inflight::default());

    let ret = loop {
        match conn.read_op().await {
            Ok(Some((cx, op))) => {
                let fs = Arc::clone(&fs);
                let guard = inflight.enter();
                let _ = task::spawn(async move {
                    let _guard = guard;
                    let name = op.name();
                    if let Err(err) = fs.dispatch(cx, op).await {
                        error!(%err, op = name, "operation handler failed");
                    }
                });
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    // quiesce before releasing the kernel channel
    inflight.wait().await;
    conn.close()?;

    ret
}
