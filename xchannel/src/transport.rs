//! In-memory sockets for driving a channel without a network.
//!
//! [`ScriptedSocket`] plays back reads queued through its [`ScriptHandle`]
//! (data, end-of-stream or an OS error) and records everything written to
//! it. Writes can be paused to keep a send in flight, or failed with an OS
//! error code.
//!
//! # Example
//!
//! ```rust,ignore
//! use xchannel::transport::ScriptedSocket;
//!
//! let (socket, handle) = ScriptedSocket::new();
//! handle.push_data(b"Hello");
//! handle.push_eof();
//! // hand `socket` to a channel, then inspect `handle.written()`
//! ```

use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;

#[derive(Debug)]
enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Fail(i32),
}

#[derive(Debug, Default)]
struct Script {
    reads: VecDeque<ReadStep>,
    read_waker: Option<Waker>,
    written: Vec<u8>,
    writes_paused: bool,
    write_waker: Option<Waker>,
    write_error: Option<i32>,
    shutdown: bool,
    released: bool,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<Script>,
    wrote: Notify,
}

/// A socket whose reads are scripted and whose writes are recorded.
#[derive(Debug)]
pub struct ScriptedSocket {
    shared: Arc<Shared>,
}

/// Controls and inspects a [`ScriptedSocket`].
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    shared: Arc<Shared>,
}

impl ScriptedSocket {
    /// Creates a socket with an empty script.
    pub fn new() -> (Self, ScriptHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ScriptHandle { shared },
        )
    }
}

impl Drop for ScriptedSocket {
    fn drop(&mut self) {
        self.shared.script.lock().released = true;
    }
}

impl ScriptHandle {
    /// Queues a chunk of inbound data. Empty chunks are ignored since they
    /// would read as end-of-stream.
    pub fn push_data(&self, data: impl AsRef<[u8]>) {
        let data = data.as_ref();
        if !data.is_empty() {
            self.push(ReadStep::Data(data.to_vec()));
        }
    }

    /// Queues a graceful end-of-stream.
    pub fn push_eof(&self) {
        self.push(ReadStep::Eof);
    }

    /// Queues a read failure carrying OS error `code`.
    pub fn push_os_error(&self, code: i32) {
        self.push(ReadStep::Fail(code));
    }

    fn push(&self, step: ReadStep) {
        let waker = {
            let mut script = self.shared.script.lock();
            script.reads.push_back(step);
            script.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Number of queued read steps not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.shared.script.lock().reads.len()
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.script.lock().written.clone()
    }

    /// Waits until at least `len` bytes were written and returns them all.
    pub async fn wait_written(&self, len: usize) -> Vec<u8> {
        loop {
            let wrote = self.shared.wrote.notified();
            {
                let script = self.shared.script.lock();
                if script.written.len() >= len {
                    return script.written.clone();
                }
            }
            wrote.await;
        }
    }

    /// Makes writes pend until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.shared.script.lock().writes_paused = true;
    }

    pub fn resume_writes(&self) {
        let waker = {
            let mut script = self.shared.script.lock();
            script.writes_paused = false;
            script.write_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Fails every following write with OS error `code`.
    pub fn fail_writes(&self, code: i32) {
        let waker = {
            let mut script = self.shared.script.lock();
            script.write_error = Some(code);
            script.write_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Returns true once the write side was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.script.lock().shutdown
    }

    /// Returns true once the socket itself was dropped.
    pub fn is_released(&self) -> bool {
        self.shared.script.lock().released
    }
}

impl AsyncRead for ScriptedSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut script = self.shared.script.lock();
        match script.reads.pop_front() {
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    script.reads.push_front(ReadStep::Data(rest));
                }
                Poll::Ready(Ok(()))
            }
            Some(ReadStep::Eof) => Poll::Ready(Ok(())),
            Some(ReadStep::Fail(code)) => Poll::Ready(Err(io::Error::from_raw_os_error(code))),
            None => {
                script.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for ScriptedSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut script = self.shared.script.lock();
        if let Some(code) = script.write_error {
            return Poll::Ready(Err(io::Error::from_raw_os_error(code)));
        }
        if script.writes_paused {
            script.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        script.written.extend_from_slice(buf);
        drop(script);
        self.shared.wrote.notify_one();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.script.lock().shutdown = true;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_scripted_reads() {
        let (mut socket, handle) = ScriptedSocket::new();
        handle.push_data(b"Hello, World!");
        handle.push_eof();

        let mut buf = [0u8; 5];
        assert_eq!(socket.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"Hello");
        assert_eq!(handle.pending_reads(), 2);

        let mut rest = [0u8; 32];
        let n = socket.read(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b", World!");
        assert_eq!(socket.read(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let (mut socket, handle) = ScriptedSocket::new();
        handle.push_os_error(104);
        let err = socket.read(&mut [0u8; 8]).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(104));
    }

    #[tokio::test]
    async fn test_recorded_writes() {
        let (mut socket, handle) = ScriptedSocket::new();
        socket.write_all(b"Test data").await.unwrap();
        assert_eq!(handle.wait_written(9).await, b"Test data");

        socket.shutdown().await.unwrap();
        assert!(handle.is_shutdown());
        assert!(!handle.is_released());
        drop(socket);
        assert!(handle.is_released());
    }

    #[tokio::test]
    async fn test_paused_and_failed_writes() {
        let (mut socket, handle) = ScriptedSocket::new();
        handle.pause_writes();
        let writer = tokio::spawn(async move {
            let result = socket.write_all(b"held").await;
            (socket, result)
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(handle.written().is_empty());

        handle.resume_writes();
        let (mut socket, result) = writer.await.unwrap();
        result.unwrap();
        assert_eq!(handle.written(), b"held");

        handle.fail_writes(32);
        let err = socket.write_all(b"x").await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(32));
    }
}
