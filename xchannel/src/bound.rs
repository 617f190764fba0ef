//! Owned-data facade over [`ChannelEngine`].
//!
//! A [`BoundChannel`] is tied to one socket and one pair of contexts for its
//! whole life. Every received window is copied into an owned [`Bytes`]
//! before it is published, and the engine is told to proceed right away, so
//! this facade applies no consumer-visible backpressure. Termination is
//! reported as at most one [`ChannelEvent::Error`] followed by exactly one
//! [`ChannelEvent::Closed`], after which the event stream ends.

use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use log::trace;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cause::CloseCause;
use crate::channel::{ChannelEngine, ChannelHandler, ChannelState, ChannelStats, ReceiveLease};
use crate::config::ChannelConfig;
use crate::error::{Error, Result};
use crate::io::{ReceiveContext, SendContext, Socket};

/// Lifecycle messages published by a [`BoundChannel`].
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A received chunk. Owned; safe to keep.
    BytesReceived(Bytes),

    /// The channel terminated abnormally. `Error::Socket` for transport
    /// faults, the original error for local faults.
    Error(Arc<Error>),

    /// The channel terminated. Always the last event.
    Closed,
}

/// Receiving end of a channel's events.
#[derive(Debug)]
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelEvents {
    /// Waits for the next event. Returns `None` after `Closed` was delivered.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ChannelEvents {
    type Item = ChannelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChannelEvent>> {
        self.rx.poll_recv(cx)
    }
}

/// Copies leases out and maps close causes onto events.
struct EventRelay {
    events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl EventRelay {
    fn publish(&self, event: ChannelEvent) {
        if let Some(events) = self.events.lock().as_ref()
            && events.send(event).is_err()
        {
            trace!("channel events receiver dropped");
        }
    }
}

impl ChannelHandler for EventRelay {
    fn bytes_received(&self, lease: ReceiveLease) {
        // The engine reuses the buffer once we proceed.
        let data = Bytes::copy_from_slice(lease.bytes());
        self.publish(ChannelEvent::BytesReceived(data));
        lease.proceed();
    }

    fn closed(&self, cause: &CloseCause) {
        if let Some(err) = cause.to_error() {
            self.publish(ChannelEvent::Error(err));
        }
        self.publish(ChannelEvent::Closed);
        // Ends the stream.
        self.events.lock().take();
    }
}

/// A channel bound to a single socket.
///
/// Dropping the channel closes it.
pub struct BoundChannel<S: Socket> {
    engine: ChannelEngine<S>,
}

impl<S: Socket> BoundChannel<S> {
    /// Binds to `socket` and the given preallocated contexts.
    ///
    /// Fails with [`Error::NoRuntime`](crate::Error::NoRuntime) outside a
    /// Tokio runtime. Events start flowing after [`start`](Self::start).
    pub fn new(
        socket: S,
        receive: ReceiveContext,
        send: SendContext,
        config: &ChannelConfig,
    ) -> Result<(Self, ChannelEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = Arc::new(EventRelay {
            events: Mutex::new(Some(tx)),
        });
        let engine = ChannelEngine::new(socket, receive, send, relay, config)?;
        Ok((Self { engine }, ChannelEvents { rx }))
    }

    /// Binds to `socket` with contexts allocated from `config`.
    pub fn with_config(socket: S, config: &ChannelConfig) -> Result<(Self, ChannelEvents)> {
        let (receive, send) = config.contexts()?;
        Self::new(socket, receive, send, config)
    }

    /// Starts receiving. See [`ChannelEngine::start`].
    pub fn start(&self) -> Result<()> {
        self.engine.start()
    }

    /// Queues `bytes` for transmission. See [`ChannelEngine::send`].
    pub fn send(&self, bytes: impl Into<Bytes>) -> Result<()> {
        self.engine.send(bytes)
    }

    /// Closes the channel. Further calls do nothing.
    pub fn close(&self) {
        self.engine.close();
    }

    pub fn state(&self) -> ChannelState {
        self.engine.state()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    pub fn close_cause(&self) -> Option<CloseCause> {
        self.engine.close_cause()
    }

    pub fn stats(&self) -> ChannelStats {
        self.engine.stats()
    }

    /// The label used in this channel's log lines.
    pub fn label(&self) -> &str {
        self.engine.label()
    }
}

impl<S: Socket> Drop for BoundChannel<S> {
    fn drop(&mut self) {
        self.engine.close();
    }
}

impl<S: Socket> core::fmt::Debug for BoundChannel<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoundChannel")
            .field("engine", &self.engine)
            .finish()
    }
}
