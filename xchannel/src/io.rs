//! Socket bound and the preallocated per-direction I/O contexts.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// A connected, bidirectional byte stream a channel can drive.
pub trait Socket: AsyncRead + AsyncWrite + Send + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Send + 'static {}

/// Receive-side context: a fixed backing buffer and the window
/// `[offset, offset + capacity)` every receive fills.
///
/// The context is reused for every receive of a channel. While a
/// [`ReceiveLease`](crate::channel::ReceiveLease) is outstanding it lives in
/// the lease, otherwise in the engine.
#[derive(Debug)]
pub struct ReceiveContext {
    buffer: Box<[u8]>,
    offset: usize,
    capacity: usize,
}

impl ReceiveContext {
    /// Binds a receive window to a caller-supplied buffer.
    pub fn new(buffer: impl Into<Box<[u8]>>, offset: usize, capacity: usize) -> Result<Self> {
        let buffer = buffer.into();
        let fits = offset
            .checked_add(capacity)
            .is_some_and(|end| end <= buffer.len());
        // A zero-length window would read as EOF on every receive.
        if capacity == 0 || !fits {
            return Err(Error::InvalidReceiveWindow {
                offset,
                capacity,
                len: buffer.len(),
            });
        }
        Ok(Self {
            buffer,
            offset,
            capacity,
        })
    }

    /// Allocates a dedicated buffer whose window spans all of it.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(vec![0u8; capacity], 0, capacity)
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn window_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.offset..self.offset + self.capacity]
    }

    pub(crate) fn filled(&self, len: usize) -> &[u8] {
        &self.buffer[self.offset..self.offset + len]
    }
}

/// Send-side context: the staging buffer queued chunks are coalesced into
/// before each write. Its allocation is kept across writes.
#[derive(Debug)]
pub struct SendContext {
    staging: BytesMut,
}

impl SendContext {
    pub fn new(staging: BytesMut) -> Self {
        Self { staging }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(BytesMut::with_capacity(capacity))
    }

    /// Returns the bytes of the batch currently being written.
    pub fn staged(&self) -> &[u8] {
        &self.staging
    }

    pub(crate) fn capacity(&self) -> usize {
        self.staging.capacity()
    }

    pub(crate) fn stage(&mut self, chunk: &[u8]) {
        self.staging.extend_from_slice(chunk);
    }

    pub(crate) fn clear(&mut self) {
        self.staging.clear();
    }
}
