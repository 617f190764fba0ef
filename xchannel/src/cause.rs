//! Close-cause classification.

use core::fmt;
use std::io;
use std::sync::Arc;

use crate::error::Error;

/// Transport-reported fault, captured from the `io::Error` of a failed
/// receive or send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketErrorCode {
    kind: io::ErrorKind,
    raw_os_error: Option<i32>,
}

impl SocketErrorCode {
    /// Builds a code from an OS error number.
    pub fn from_raw_os_error(code: i32) -> Self {
        Self::from(&io::Error::from_raw_os_error(code))
    }

    /// Returns the portable error kind.
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// Returns the OS error number, if the transport reported one.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.raw_os_error
    }
}

impl From<&io::Error> for SocketErrorCode {
    fn from(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            raw_os_error: err.raw_os_error(),
        }
    }
}

impl fmt::Display for SocketErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw_os_error {
            Some(code) => write!(f, "{} (os error {})", self.kind, code),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Why a channel terminated. Exactly one is recorded per channel.
#[derive(Debug, Clone)]
pub enum CloseCause {
    /// The remote end closed gracefully, or the owner called `close`.
    Normal,

    /// The transport reported a fault.
    SocketError(SocketErrorCode),

    /// A local fault, such as a panicking handler.
    Exception(Arc<Error>),
}

impl CloseCause {
    /// Returns true for a graceful termination.
    pub fn is_normal(&self) -> bool {
        matches!(self, CloseCause::Normal)
    }

    /// Converts the cause into the single failure signal surfaced to
    /// consumers. `Normal` has none.
    pub fn to_error(&self) -> Option<Arc<Error>> {
        match self {
            CloseCause::Normal => None,
            CloseCause::SocketError(code) => Some(Arc::new(Error::Socket(*code))),
            CloseCause::Exception(err) => Some(Arc::clone(err)),
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::Normal => write!(f, "normal"),
            CloseCause::SocketError(code) => write!(f, "socket error: {}", code),
            CloseCause::Exception(err) => write!(f, "exception: {}", err),
        }
    }
}
