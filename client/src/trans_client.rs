use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UnixStream};
use tokio_vsock::{VsockAddr, VsockStream};
use xchannel::{BoundChannel, ChannelConfig, ChannelEvent, Error, Result, Socket};
use log::*;

const DEFAULT_TARGET: &str = "tcp:127.0.0.1:7878";

/// Size of each `send` call.
const CHUNK_SIZE: usize = 16 * 1024;

/// Pause before retrying a send rejected by a full queue.
const RETRY_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub enum ClientTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl ClientTarget {
    /// Reads `XCHANNEL_TARGET` (`tcp:ADDR`, `unix:PATH` or `vsock:CID:PORT`).
    pub fn from_env() -> Option<Self> {
        let target =
            std::env::var("XCHANNEL_TARGET").unwrap_or_else(|_| DEFAULT_TARGET.to_string());
        Self::parse(&target)
    }

    fn parse(target: &str) -> Option<Self> {
        let (scheme, rest) = target.split_once(':')?;
        match scheme {
            "tcp" => rest.parse().ok().map(ClientTarget::Tcp),
            "unix" => Some(ClientTarget::Unix(PathBuf::from(rest))),
            "vsock" => {
                let (cid, port) = rest.split_once(':')?;
                Some(ClientTarget::Vsock {
                    cid: cid.parse().ok()?,
                    port: port.parse().ok()?,
                })
            }
            _ => None,
        }
    }
}

pub struct TransClient {
    target: ClientTarget,
    config: ChannelConfig,
}

impl TransClient {
    pub fn new(target: ClientTarget) -> Self {
        Self {
            target,
            config: ChannelConfig::default().with_label("client"),
        }
    }

    /// Sends `message` and waits until the server echoed all of it back.
    pub async fn echo(&self, message: &[u8]) -> Result<()> {
        info!("Connecting to target: {:?}", self.target);
        match &self.target {
            ClientTarget::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                info!("Unix socket connected.");
                self.process_stream(stream, message).await
            }
            ClientTarget::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                info!("TCP socket connected.");
                self.process_stream(stream, message).await
            }
            ClientTarget::Vsock { cid, port } => {
                let stream = VsockStream::connect(VsockAddr::new(*cid, *port)).await?;
                info!("Vsock socket connected.");
                self.process_stream(stream, message).await
            }
        }
    }

    async fn process_stream<S: Socket>(&self, stream: S, message: &[u8]) -> Result<()> {
        let (channel, mut events) = BoundChannel::with_config(stream, &self.config)?;
        channel.start()?;

        let start = Instant::now();
        for chunk in message.chunks(CHUNK_SIZE) {
            send_chunk(&channel, Bytes::copy_from_slice(chunk)).await?;
        }
        let elapsed = start.elapsed();
        let speed = (message.len() as f64 / 1024.0) / elapsed.as_secs_f64();
        info!("=== Send Queued ===");
        info!("Total queued: {} KB", message.len() / 1024);
        info!("Time: {:.2} seconds", elapsed.as_secs_f64());
        info!("Speed: {:.2} KB/s", speed);
        info!("");

        let mut received = 0;
        while received < message.len() {
            match events.next().await {
                Some(ChannelEvent::BytesReceived(data)) => received += data.len(),
                Some(ChannelEvent::Error(e)) => error!("Channel error: {}", e),
                Some(ChannelEvent::Closed) | None => break,
            }
        }
        let elapsed = start.elapsed();
        let speed = (received as f64 / 1024.0) / elapsed.as_secs_f64();
        info!("=== Echo Complete ===");
        info!("Total received: {} KB", received / 1024);
        info!("Time: {:.2} seconds", elapsed.as_secs_f64());
        info!("Speed: {:.2} KB/s", speed);

        channel.close();
        while let Some(event) = events.next().await {
            if let ChannelEvent::Closed = event {
                info!("Channel closed: {:?}", channel.stats());
            }
        }

        if received < message.len() {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }
}

/// Queues `chunk`, waiting for the flush to make room while the queue is full.
/// Fails at once when `chunk` alone is larger than the queue bound.
async fn send_chunk<S: Socket>(channel: &BoundChannel<S>, chunk: Bytes) -> Result<()> {
    loop {
        match channel.send(chunk.clone()) {
            Err(Error::SendQueueFull { limit, .. }) if chunk.len() <= limit => {
                tokio::time::sleep(RETRY_DELAY).await
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xchannel::transport::ScriptedSocket;

    #[test]
    fn test_parse_targets() {
        assert!(matches!(ClientTarget::parse("tcp:127.0.0.1:7878"), Some(ClientTarget::Tcp(_))));
        assert!(matches!(ClientTarget::parse("unix:/tmp/x.sock"), Some(ClientTarget::Unix(_))));
        assert!(matches!(
            ClientTarget::parse("vsock:3:1234"),
            Some(ClientTarget::Vsock { cid: 3, port: 1234 })
        ));
        assert!(ClientTarget::parse("vsock:3").is_none());
    }

    #[tokio::test]
    async fn test_send_chunk_waits_for_room() {
        let (socket, handle) = ScriptedSocket::new();
        let config = ChannelConfig::default().with_max_pending_send_bytes(8);
        let (channel, _events) = BoundChannel::with_config(socket, &config).unwrap();
        handle.pause_writes();
        channel.send(&b"123456"[..]).unwrap();

        let resume = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.resume_writes();
        };
        let (sent, ()) = tokio::join!(send_chunk(&channel, Bytes::from_static(b"7890")), resume);
        sent.unwrap();
        assert_eq!(handle.wait_written(10).await, b"1234567890");
    }

    #[tokio::test]
    async fn test_send_chunk_rejects_chunk_over_bound() {
        let (socket, handle) = ScriptedSocket::new();
        let config = ChannelConfig::default().with_max_pending_send_bytes(4);
        let (channel, _events) = BoundChannel::with_config(socket, &config).unwrap();

        let sent = tokio::time::timeout(
            Duration::from_secs(5),
            send_chunk(&channel, Bytes::from_static(b"too large")),
        )
        .await
        .expect("oversized chunk must not be retried");
        assert!(matches!(sent, Err(Error::SendQueueFull { limit: 4, .. })));
        assert!(handle.written().is_empty());
    }
}
