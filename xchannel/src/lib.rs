//! # XChannel - Event-Driven Duplex Socket Channels
//!
//! XChannel turns a connected socket into a channel with a small event API:
//!
//! - **Send / Close** inward, callable from any thread
//! - **BytesReceived / Error / Closed** outward, delivered in order
//! - **Receive backpressure**: the next read is armed only after the consumer
//!   acknowledges the previous one
//! - **Exact close reporting**: every channel terminates once, with exactly
//!   one cause (normal, socket error, or local exception)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                    BoundChannel (facade)                 │
//! │  ┌─────────────────┐ ┌────────────────────────────────┐ │
//! │  │  Copy + Proceed │ │  CloseCause -> Error, Closed   │ │
//! │  └─────────────────┘ └────────────────────────────────┘ │
//! ├─────────────────────────────────────────────────────────┤
//! │                    ChannelEngine                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐    │
//! │  │ Receive     │ │ Send queue  │ │ Close (once)    │    │
//! │  │ + lease     │ │ + flush     │ │ classification  │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘    │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Socket Layer                          │
//! │  ┌─────────────────────────────────────────────────┐    │
//! │  │     Any connected AsyncRead + AsyncWrite stream  │    │
//! │  └─────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use xchannel::{BoundChannel, ChannelConfig, ChannelEvent};
//!
//! let (channel, mut events) = BoundChannel::with_config(stream, &ChannelConfig::default())?;
//! channel.start()?;
//! channel.send(&b"Hello, World!"[..])?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChannelEvent::BytesReceived(data) => println!("{} bytes", data.len()),
//!         ChannelEvent::Error(err) => eprintln!("channel failed: {err}"),
//!         ChannelEvent::Closed => break,
//!     }
//! }
//! ```

#![deny(unsafe_code)]

pub mod bound;
pub mod cause;
pub mod channel;
pub mod config;
pub mod error;
pub mod io;
pub mod transport;

// Re-export commonly used types
pub use bound::{BoundChannel, ChannelEvent, ChannelEvents};
pub use cause::{CloseCause, SocketErrorCode};
pub use channel::{ChannelEngine, ChannelHandler, ChannelState, ChannelStats, ReceiveLease};
pub use config::ChannelConfig;
pub use error::{Error, Result};
pub use io::{ReceiveContext, SendContext, Socket};
