//! Send side of the channel engine.
//!
//! Producers append to a FIFO under a short lock. Whoever appends while the
//! send path is idle takes the socket's write half out of the queue and
//! spawns the single flush task; the flush task drains the queue in batches
//! and parks the write half back when nothing is left. The hand-back happens
//! under the same lock as the emptiness check, so an append can never be
//! stranded between the two.
//!
//! Whichever side ends up holding the write half when the channel closes
//! shuts it down: the engine for an idle path, the flush task otherwise.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use tokio::io::{self, AsyncWrite, AsyncWriteExt, WriteHalf};

use super::engine::Inner;
use crate::cause::{CloseCause, SocketErrorCode};
use crate::error::{Error, Result};
use crate::io::{SendContext, Socket};

/// Upper bound on the write-side shutdown during close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// The write half plus its staging buffer. Exactly one exists per channel;
/// whoever holds it is the only writer.
#[derive(Debug)]
pub(super) struct SendPath<W> {
    pub(super) half: W,
    pub(super) ctx: SendContext,
}

/// Outcome of [`SendQueue::next_batch`].
#[derive(Debug)]
pub(super) enum Batch<W> {
    /// Chunks to write next, in acceptance order.
    Ready(SendPath<W>, Vec<Bytes>),
    /// Nothing left; the path was parked back in the queue.
    Parked,
    /// The queue closed; the caller owns the path and must shut it down.
    Closed(SendPath<W>),
}

#[derive(Debug)]
struct QueueState<W> {
    chunks: VecDeque<Bytes>,

    /// Bytes accepted but not yet written, including the batch in flight.
    pending_bytes: usize,

    /// `Some` while the send path is idle.
    idle: Option<SendPath<W>>,

    flushing: bool,
    closed: bool,
}

#[derive(Debug)]
pub(super) struct SendQueue<W> {
    state: Mutex<QueueState<W>>,
    limit: Option<usize>,
}

impl<W> SendQueue<W> {
    pub(super) fn new(half: W, ctx: SendContext, limit: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                pending_bytes: 0,
                idle: Some(SendPath { half, ctx }),
                flushing: false,
                closed: false,
            }),
            limit,
        }
    }

    /// Appends a chunk. Returns the send path when the caller has to start
    /// the flush.
    pub(super) fn push(&self, chunk: Bytes) -> Result<Option<SendPath<W>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ChannelClosed);
        }
        if let Some(limit) = self.limit
            && state.pending_bytes.saturating_add(chunk.len()) > limit
        {
            return Err(Error::SendQueueFull {
                pending: state.pending_bytes,
                limit,
            });
        }

        state.pending_bytes += chunk.len();
        state.chunks.push_back(chunk);

        if state.flushing {
            return Ok(None);
        }
        let path = state.idle.take();
        state.flushing = path.is_some();
        Ok(path)
    }

    /// Settles the previous batch and takes the next one.
    pub(super) fn next_batch(&self, path: SendPath<W>, written: usize) -> Batch<W> {
        let mut state = self.state.lock();
        state.pending_bytes = state.pending_bytes.saturating_sub(written);

        if state.closed {
            state.flushing = false;
            return Batch::Closed(path);
        }
        if state.chunks.is_empty() {
            state.flushing = false;
            state.idle = Some(path);
            return Batch::Parked;
        }

        // Coalesce up to the staging capacity, but always take one chunk.
        let budget = path.ctx.capacity();
        let mut batch = Vec::new();
        let mut batch_len = 0;
        while let Some(chunk) = state.chunks.front() {
            if !batch.is_empty() && batch_len + chunk.len() > budget {
                break;
            }
            batch_len += chunk.len();
            batch.extend(state.chunks.pop_front());
        }
        Batch::Ready(path, batch)
    }

    /// Marks the queue closed and discards everything not yet written.
    /// Returns the send path if it was idle.
    pub(super) fn close(&self) -> Option<SendPath<W>> {
        let mut state = self.state.lock();
        state.closed = true;
        state.chunks.clear();
        state.pending_bytes = 0;
        state.idle.take()
    }

    pub(super) fn pending_bytes(&self) -> usize {
        self.state.lock().pending_bytes
    }
}

pub(super) async fn run<S: Socket>(inner: Arc<Inner<S>>, path: SendPath<WriteHalf<S>>) {
    let mut path = path;
    let mut written = 0;
    loop {
        let batch = match inner.sender.next_batch(path, written) {
            Batch::Ready(next, batch) => {
                path = next;
                batch
            }
            Batch::Parked => return,
            Batch::Closed(path) => {
                shutdown(inner.label.clone(), path.half).await;
                return;
            }
        };

        for chunk in &batch {
            path.ctx.stage(chunk);
        }
        let len = path.ctx.staged().len();

        let result = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => None,
            result = write_staged(&mut path) => Some(result),
        };
        let Some(result) = result else {
            trace!("[{}] close interrupted a {} byte write", inner.label, len);
            shutdown(inner.label.clone(), path.half).await;
            return;
        };
        path.ctx.clear();

        if let Err(err) = result {
            warn!("[{}] send failed: {}", inner.label, err);
            inner.terminate(CloseCause::SocketError(SocketErrorCode::from(&err)));
            return;
        }

        inner.stats.record_send(len);
        trace!("[{}] sent {} bytes", inner.label, len);
        written = len;
    }
}

async fn write_staged<W: AsyncWrite + Unpin>(path: &mut SendPath<W>) -> io::Result<()> {
    path.half.write_all(path.ctx.staged()).await?;
    path.half.flush().await
}

/// Shuts the write side down, giving up after [`SHUTDOWN_GRACE`].
pub(super) async fn shutdown<W: AsyncWrite + Unpin>(label: String, mut half: W) {
    match tokio::time::timeout(SHUTDOWN_GRACE, half.shutdown()).await {
        Ok(Ok(())) => trace!("[{}] write side shut down", label),
        Ok(Err(err)) => debug!("[{}] write side shutdown failed: {}", label, err),
        Err(_) => debug!("[{}] write side shutdown timed out", label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(limit: Option<usize>) -> SendQueue<()> {
        SendQueue::new((), SendContext::with_capacity(8), limit)
    }

    fn ready(batch: Batch<()>) -> (SendPath<()>, Vec<Bytes>) {
        match batch {
            Batch::Ready(path, chunks) => (path, chunks),
            other => panic!("expected a batch, got {other:?}"),
        }
    }

    #[test]
    fn test_first_push_takes_path() {
        let queue = queue(None);
        assert!(queue.push(Bytes::from_static(b"a")).unwrap().is_some());
        assert!(queue.push(Bytes::from_static(b"b")).unwrap().is_none());
        assert_eq!(queue.pending_bytes(), 2);
    }

    #[test]
    fn test_batches_are_fifo_and_bounded_by_staging_capacity() {
        let queue = queue(None);
        let path = queue.push(Bytes::from_static(b"12345")).unwrap().unwrap();
        queue.push(Bytes::from_static(b"678")).unwrap();
        queue.push(Bytes::from_static(b"9")).unwrap();

        let (path, batch) = ready(queue.next_batch(path, 0));
        assert_eq!(
            batch,
            vec![Bytes::from_static(b"12345"), Bytes::from_static(b"678")]
        );

        let (path, batch) = ready(queue.next_batch(path, 8));
        assert_eq!(batch, vec![Bytes::from_static(b"9")]);
        assert_eq!(queue.pending_bytes(), 1);

        assert!(matches!(queue.next_batch(path, 1), Batch::Parked));
        assert_eq!(queue.pending_bytes(), 0);

        // Path parked: the next push starts a new flush.
        assert!(queue.push(Bytes::from_static(b"x")).unwrap().is_some());
    }

    #[test]
    fn test_oversized_chunk_still_sent_alone() {
        let queue = queue(None);
        let path = queue.push(Bytes::from(vec![7u8; 32])).unwrap().unwrap();
        let (_, batch) = ready(queue.next_batch(path, 0));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].len(), 32);
    }

    #[test]
    fn test_limit_rejects_without_enqueueing() {
        let queue = queue(Some(8));
        queue.push(Bytes::from_static(b"123456")).unwrap();
        let err = queue.push(Bytes::from_static(b"789")).unwrap_err();
        assert!(matches!(err, Error::SendQueueFull { pending: 6, limit: 8 }));
        assert_eq!(queue.pending_bytes(), 6);
        queue.push(Bytes::from_static(b"78")).unwrap();
    }

    #[test]
    fn test_close_discards_and_rejects() {
        let queue = queue(None);
        let path = queue.push(Bytes::from_static(b"abc")).unwrap().unwrap();
        assert!(queue.close().is_none());
        assert!(matches!(
            queue.push(Bytes::from_static(b"d")),
            Err(Error::ChannelClosed)
        ));
        // The flush owner gets the path back to shut it down.
        assert!(matches!(queue.next_batch(path, 0), Batch::Closed(_)));
    }

    #[test]
    fn test_close_returns_idle_path() {
        let queue = queue(None);
        assert!(queue.close().is_some());
        assert!(queue.close().is_none());
    }
}
