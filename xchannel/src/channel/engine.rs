use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::receiver::{self, ReceiveLease};
use super::sender::{self, SendQueue};
use super::{ChannelHandler, ChannelState, ChannelStats, StateCell, StatsCounters};
use crate::cause::CloseCause;
use crate::config::ChannelConfig;
use crate::error::{Error, Result};
use crate::io::{ReceiveContext, SendContext, Socket};

/// Drives one connected socket.
///
/// Cloning yields another handle to the same channel. All methods take
/// `&self` and may be called from any thread, including from inside the
/// handler.
///
/// # Send ordering
///
/// Payloads reach the socket in the order their `send` calls acquired the
/// queue lock. Calls made from one thread are therefore transmitted in call
/// order; concurrent callers are ordered by whichever appended first.
///
/// # Callback ordering
///
/// [`ChannelHandler::closed`] is always the last callback. A close that
/// lands while `bytes_received` is running is reported once that call
/// returns; until then the channel stays in [`ChannelState::Closing`].
pub struct ChannelEngine<S: Socket> {
    inner: Arc<Inner<S>>,
}

pub(super) struct Inner<S: Socket> {
    pub(super) label: String,
    state: StateCell,
    cause: OnceLock<CloseCause>,
    pub(super) cancel: CancellationToken,
    handler: Arc<dyn ChannelHandler>,
    pub(super) sender: SendQueue<WriteHalf<S>>,
    receiver: Mutex<Option<(ReadHalf<S>, ReceiveContext)>>,
    dispatch: Mutex<DispatchGate>,
    runtime: Handle,
    pub(super) stats: StatsCounters,
}

/// Tracks a `bytes_received` call in progress and a close reported while
/// it runs.
#[derive(Debug, Default)]
struct DispatchGate {
    active: bool,
    deferred: Option<CloseCause>,
}

impl<S: Socket> ChannelEngine<S> {
    /// Binds an engine to a connected socket and its preallocated contexts.
    ///
    /// The engine spawns its receive and send tasks on the current Tokio
    /// runtime and fails with [`Error::NoRuntime`] when there is none.
    /// Nothing is read until [`start`](Self::start).
    pub fn new(
        socket: S,
        receive: ReceiveContext,
        send: SendContext,
        handler: Arc<dyn ChannelHandler>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let (read_half, write_half) = tokio::io::split(socket);
        let inner = Inner {
            label: config.label.clone(),
            state: StateCell::new(),
            cause: OnceLock::new(),
            cancel: CancellationToken::new(),
            handler,
            sender: SendQueue::new(write_half, send, config.max_pending_send_bytes),
            receiver: Mutex::new(Some((read_half, receive))),
            dispatch: Mutex::new(DispatchGate::default()),
            runtime,
            stats: StatsCounters::default(),
        };
        debug!("[{}] channel created", inner.label);
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Arms the first receive.
    ///
    /// Register everything that consumes handler output before calling
    /// this; completions may be delivered immediately afterwards.
    pub fn start(&self) -> Result<()> {
        match self.inner.state.try_start() {
            Ok(()) => {}
            Err(ChannelState::Started) => return Err(Error::AlreadyStarted),
            Err(_) => return Err(Error::ChannelClosed),
        }
        // A concurrent close may already have released the read half.
        let Some((reader, ctx)) = self.inner.receiver.lock().take() else {
            return Err(Error::ChannelClosed);
        };
        debug!("[{}] channel started", self.inner.label);
        self.inner
            .runtime
            .spawn(receiver::run(Arc::clone(&self.inner), reader, ctx));
        Ok(())
    }

    /// Queues `bytes` for transmission.
    ///
    /// Returns once the payload is accepted; there is no completion signal.
    /// Fails with [`Error::ChannelClosed`] after termination and with
    /// [`Error::SendQueueFull`] when the configured bound would be exceeded.
    /// In both cases nothing is queued.
    pub fn send(&self, bytes: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Ok(());
        }

        match self.inner.sender.push(bytes) {
            Ok(Some(path)) => {
                self.inner
                    .runtime
                    .spawn(sender::run(Arc::clone(&self.inner), path));
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                if matches!(err, Error::SendQueueFull { .. }) {
                    self.inner.stats.record_rejected();
                }
                Err(err)
            }
        }
    }

    /// Closes the channel. Only the first call has any effect.
    pub fn close(&self) {
        self.inner.terminate(CloseCause::Normal);
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state.load()
    }

    /// Returns true once termination has begun.
    pub fn is_closed(&self) -> bool {
        self.state() >= ChannelState::Closing
    }

    /// The recorded close cause, once the channel terminated.
    pub fn close_cause(&self) -> Option<CloseCause> {
        self.inner.cause.get().cloned()
    }

    pub fn stats(&self) -> ChannelStats {
        self.inner.stats.snapshot(self.inner.sender.pending_bytes())
    }

    /// The label used in this channel's log lines.
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl<S: Socket> Clone for ChannelEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Socket> core::fmt::Debug for ChannelEngine<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelEngine")
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

impl<S: Socket> Inner<S> {
    /// Claims the handler for one `bytes_received` call. Fails once
    /// termination has begun.
    pub(super) fn enter_dispatch(&self) -> bool {
        let mut gate = self.dispatch.lock();
        if self.state.load() >= ChannelState::Closing {
            return false;
        }
        gate.active = true;
        true
    }

    /// Hands `lease` to the handler. Must follow a successful
    /// [`enter_dispatch`](Self::enter_dispatch).
    pub(super) fn dispatch_bytes(&self, lease: ReceiveLease) -> Result<()> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.handler.bytes_received(lease)))
            .map_err(|payload| {
                let message = panic_message(payload.as_ref());
                warn!("[{}] handler panicked on receive: {}", self.label, message);
                Error::HandlerPanicked(message)
            });

        let deferred = {
            let mut gate = self.dispatch.lock();
            gate.active = false;
            gate.deferred.take()
        };
        if let Some(cause) = deferred {
            self.finish(&cause);
        }
        result
    }

    /// Moves the channel to `Closed` with `cause`. Returns false when another
    /// termination already won.
    pub(super) fn terminate(&self, cause: CloseCause) -> bool {
        if !self.state.begin_closing() {
            trace!("[{}] already closing, dropping cause: {}", self.label, cause);
            return false;
        }
        debug!("[{}] closing: {}", self.label, cause);
        let _ = self.cause.set(cause.clone());

        self.cancel.cancel();
        if let Some(path) = self.sender.close() {
            self.runtime.spawn(sender::shutdown(self.label.clone(), path.half));
        }
        drop(self.receiver.lock().take());

        {
            let mut gate = self.dispatch.lock();
            if gate.active {
                trace!("[{}] close reported after the running receive callback", self.label);
                gate.deferred = Some(cause);
                return true;
            }
        }
        self.finish(&cause);
        true
    }

    fn finish(&self, cause: &CloseCause) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.handler.closed(cause))) {
            warn!(
                "[{}] handler panicked on close: {}",
                self.label,
                panic_message(payload.as_ref())
            );
        }

        self.state.finish_closing();
        debug!("[{}] channel closed", self.label);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
