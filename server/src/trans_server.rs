use futures::StreamExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tokio::net::{TcpListener, UnixListener};
use tokio_vsock::{VsockAddr, VsockListener};
use xchannel::{BoundChannel, ChannelConfig, ChannelEvent, Socket};
use log::*;

const DEFAULT_TARGET: &str = "tcp:127.0.0.1:7878";

#[derive(Debug)]
pub enum ServerTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl ServerTarget {
    /// Reads `XCHANNEL_TARGET` (`tcp:ADDR`, `unix:PATH` or `vsock:CID:PORT`).
    pub fn from_env() -> Option<Self> {
        let target =
            std::env::var("XCHANNEL_TARGET").unwrap_or_else(|_| DEFAULT_TARGET.to_string());
        Self::parse(&target)
    }

    fn parse(target: &str) -> Option<Self> {
        let (scheme, rest) = target.split_once(':')?;
        match scheme {
            "tcp" => rest.parse().ok().map(ServerTarget::Tcp),
            "unix" => Some(ServerTarget::Unix(PathBuf::from(rest))),
            "vsock" => {
                let (cid, port) = rest.split_once(':')?;
                Some(ServerTarget::Vsock {
                    cid: cid.parse().ok()?,
                    port: port.parse().ok()?,
                })
            }
            _ => None,
        }
    }
}

pub struct TransServer {
    target: ServerTarget,
    config: ChannelConfig,
}

impl TransServer {
    pub fn new(target: ServerTarget) -> Self {
        Self {
            target,
            config: ChannelConfig::default(),
        }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        match &self.target {
            ServerTarget::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)?;
                info!("Server listening on Unix Socket {:?}", path);
                let mut accepted = 0u64;
                loop {
                    let (stream, _) = listener.accept().await?;
                    accepted += 1;
                    info!("Accepted Unix connection #{}", accepted);
                    let config = self.config.clone().with_label(format!("unix-{}", accepted));
                    tokio::spawn(Self::handle_connection(stream, config));
                }
            }
            ServerTarget::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Server listening on TCP {:?}", addr);
                loop {
                    let (stream, peer) = listener.accept().await?;
                    info!("Accepted TCP connection from {:?}", peer);
                    let config = self.config.clone().with_label(format!("tcp-{}", peer));
                    tokio::spawn(Self::handle_connection(stream, config));
                }
            }
            ServerTarget::Vsock { cid, port } => {
                let listener = VsockListener::bind(VsockAddr::new(*cid, *port))?;
                info!("Server listening on Vsock CID:{} Port:{}", cid, port);
                loop {
                    let (stream, addr) = listener.accept().await?;
                    info!("Accepted Vsock connection from {:?}", addr);
                    let config = self.config.clone().with_label(format!("vsock-{:?}", addr));
                    tokio::spawn(Self::handle_connection(stream, config));
                }
            }
        }
    }

    /// Echoes every received chunk back until the channel closes.
    pub async fn handle_connection<S: Socket>(stream: S, config: ChannelConfig) {
        let (channel, mut events) = match BoundChannel::with_config(stream, &config) {
            Ok(bound) => bound,
            Err(e) => {
                error!("[{}] Failed to bind channel: {}", config.label, e);
                return;
            }
        };
        if let Err(e) = channel.start() {
            error!("[{}] Failed to start channel: {}", config.label, e);
            return;
        }

        let start = Instant::now();
        while let Some(event) = events.next().await {
            match event {
                ChannelEvent::BytesReceived(data) => {
                    if let Err(e) = channel.send(data) {
                        warn!("[{}] Echo rejected: {}", config.label, e);
                        channel.close();
                    }
                }
                ChannelEvent::Error(e) => {
                    error!("[{}] Channel error: {}", config.label, e);
                }
                ChannelEvent::Closed => break,
            }
        }

        let elapsed = start.elapsed();
        let stats = channel.stats();
        let speed = (stats.bytes_sent as f64 / 1024.0) / elapsed.as_secs_f64();
        info!("=== Connection Closed [{}] ===", config.label);
        info!("Cause: {:?}", channel.close_cause());
        info!("Total received: {} KB", stats.bytes_received / 1024);
        info!("Total echoed: {} KB", stats.bytes_sent / 1024);
        info!("Time: {:.2} seconds", elapsed.as_secs_f64());
        info!("Speed: {:.2} KB/s", speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert!(matches!(ServerTarget::parse("tcp:127.0.0.1:7878"), Some(ServerTarget::Tcp(_))));
        assert!(matches!(ServerTarget::parse("unix:/tmp/x.sock"), Some(ServerTarget::Unix(_))));
        assert!(matches!(
            ServerTarget::parse("vsock:3:1234"),
            Some(ServerTarget::Vsock { cid: 3, port: 1234 })
        ));
        assert!(ServerTarget::parse("tcp:not-an-addr").is_none());
        assert!(ServerTarget::parse("udp:1.2.3.4:5").is_none());
    }
}
