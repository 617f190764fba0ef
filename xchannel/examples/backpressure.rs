//! Receive backpressure example using the raw engine.
//!
//! A handler holds each lease for a while before proceeding. The writer on
//! the other end of an in-memory pipe keeps pushing data, but the engine
//! never has more than one receive in flight, so the reader's pace sets the
//! pace of the whole channel.
//!
//! Run with: cargo run --example backpressure

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use xchannel::{ChannelConfig, ChannelEngine, ChannelHandler, CloseCause, ReceiveLease};

/// Forwards leases to a slow consumer task instead of proceeding inline.
struct Deferring {
    leases: mpsc::UnboundedSender<ReceiveLease>,
    closed: mpsc::UnboundedSender<CloseCause>,
}

impl ChannelHandler for Deferring {
    fn bytes_received(&self, lease: ReceiveLease) {
        let _ = self.leases.send(lease);
    }

    fn closed(&self, cause: &CloseCause) {
        let _ = self.closed.send(cause.clone());
    }
}

#[tokio::main]
async fn main() -> xchannel::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    println!("=== XChannel Backpressure Example ===\n");

    let (local, mut remote) = tokio::io::duplex(64);
    let (lease_tx, mut leases) = mpsc::unbounded_channel();
    let (closed_tx, mut closed) = mpsc::unbounded_channel();

    let config = ChannelConfig::default()
        .with_label("slow-reader")
        .with_receive_buffer_size(16);
    let (receive, send) = config.contexts()?;
    let handler = Arc::new(Deferring {
        leases: lease_tx,
        closed: closed_tx,
    });
    let engine = ChannelEngine::new(local, receive, send, handler, &config)?;
    engine.start()?;

    let writer = tokio::spawn(async move {
        let start = Instant::now();
        for i in 0..8u8 {
            remote.write_all(&[b'a' + i; 16]).await?;
            println!("writer: chunk {} accepted after {:?}", i, start.elapsed());
        }
        remote.shutdown().await
    });

    loop {
        tokio::select! {
            Some(lease) = leases.recv() => {
                println!(
                    "reader: {} bytes at offset {}: {:?}",
                    lease.size(),
                    lease.offset(),
                    String::from_utf8_lossy(lease.bytes())
                );
                tokio::time::sleep(Duration::from_millis(100)).await;
                lease.proceed();
            }
            Some(cause) = closed.recv() => {
                println!("closed: {}", cause);
                break;
            }
        }
    }

    writer.await.expect("writer task panicked")?;
    println!("\nstats: {:?}", engine.stats());
    Ok(())
}
