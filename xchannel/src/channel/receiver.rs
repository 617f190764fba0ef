//! Receive side of the channel engine.
//!
//! One read is armed at a time. A completed read is handed to the handler
//! as a [`ReceiveLease`] that owns the receive context; the loop waits for
//! the context to come back before arming the next read.

use core::fmt;
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::oneshot;

use super::engine::Inner;
use crate::cause::{CloseCause, SocketErrorCode};
use crate::io::{ReceiveContext, Socket};

/// Borrowed view of one receive completion.
///
/// The window `buffer()[offset()..offset() + size()]` is valid until
/// [`proceed`](Self::proceed) gives the buffer back to the engine, which then
/// reuses it for the next read. Consumers that need the bytes afterwards
/// must copy them. Dropping a lease without calling `proceed` parks the
/// receive path until the channel is closed.
pub struct ReceiveLease {
    ctx: ReceiveContext,
    len: usize,
    ack: oneshot::Sender<ReceiveContext>,
}

impl ReceiveLease {
    /// The whole backing buffer.
    pub fn buffer(&self) -> &[u8] {
        self.ctx.buffer()
    }

    pub fn offset(&self) -> usize {
        self.ctx.offset()
    }

    /// Bytes transferred by this completion.
    pub fn size(&self) -> usize {
        self.len
    }

    /// The received bytes.
    pub fn bytes(&self) -> &[u8] {
        self.ctx.filled(self.len)
    }

    /// Returns the buffer to the engine and arms the next receive.
    pub fn proceed(self) {
        // Fails only when the channel already closed; the buffer is dropped.
        let _ = self.ack.send(self.ctx);
    }
}

impl fmt::Debug for ReceiveLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveLease")
            .field("offset", &self.ctx.offset())
            .field("size", &self.len)
            .finish()
    }
}

pub(super) async fn run<S: Socket>(
    inner: Arc<Inner<S>>,
    mut reader: ReadHalf<S>,
    mut ctx: ReceiveContext,
) {
    loop {
        let read = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return,
            read = reader.read(ctx.window_mut()) => read,
        };

        let len = match read {
            Ok(0) => {
                debug!("[{}] remote end closed", inner.label);
                inner.terminate(CloseCause::Normal);
                return;
            }
            Ok(len) => len,
            Err(err) => {
                warn!("[{}] receive failed: {}", inner.label, err);
                inner.terminate(CloseCause::SocketError(SocketErrorCode::from(&err)));
                return;
            }
        };

        // A close that raced this read wins; its bytes are dropped.
        if !inner.enter_dispatch() {
            trace!("[{}] discarding {} bytes read during close", inner.label, len);
            return;
        }
        inner.stats.record_receive(len);
        trace!("[{}] received {} bytes", inner.label, len);

        let (ack, acked) = oneshot::channel();
        if let Err(err) = inner.dispatch_bytes(ReceiveLease { ctx, len, ack }) {
            inner.terminate(CloseCause::Exception(Arc::new(err)));
            return;
        }

        ctx = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return,
            acked = acked => match acked {
                Ok(ctx) => ctx,
                Err(_) => {
                    debug!(
                        "[{}] receive lease dropped without proceed, receive path parked",
                        inner.label
                    );
                    inner.cancel.cancelled().await;
                    return;
                }
            },
        };
    }
}
