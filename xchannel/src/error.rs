//! Error type shared by the engine, the facade and the contexts.

use thiserror::Error;

use crate::cause::SocketErrorCode;

/// Errors produced by a channel.
///
/// Operations on a running channel only ever return [`Error::ChannelClosed`],
/// [`Error::AlreadyStarted`] or [`Error::SendQueueFull`]. Transport faults
/// travel through the close path instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The channel reached `Closing`/`Closed`; nothing more is transmitted.
    #[error("channel is closed")]
    ChannelClosed,

    /// `start` was called more than once.
    #[error("channel already started")]
    AlreadyStarted,

    /// Accepting the payload would exceed the configured send queue bound.
    #[error("send queue full: {pending} bytes pending, limit is {limit}")]
    SendQueueFull {
        /// Bytes accepted but not yet written.
        pending: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The transport reported a fault.
    #[error("socket error: {0}")]
    Socket(SocketErrorCode),

    /// A channel was built outside a Tokio runtime.
    #[error("no Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The receive window does not fit in its backing buffer.
    #[error("receive window {offset}+{capacity} exceeds buffer of {len} bytes")]
    InvalidReceiveWindow {
        offset: usize,
        capacity: usize,
        len: usize,
    },

    /// A channel handler panicked while the engine was dispatching to it.
    #[error("channel handler panicked: {0}")]
    HandlerPanicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
