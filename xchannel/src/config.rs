use crate::io::{ReceiveContext, SendContext};

/// Default receive buffer size in bytes.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 8 * 1024;

/// Default initial capacity of the send staging buffer.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 64 * 1024;

/// Default bound on bytes accepted by `send` but not yet written.
pub const DEFAULT_MAX_PENDING_SEND_BYTES: usize = 16 * 1024 * 1024;

/// Default log label of a channel.
pub const DEFAULT_LABEL: &str = "channel";

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Prefix of every log line the channel emits.
    pub label: String,
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    /// `None` means the send queue is unbounded.
    pub max_pending_send_bytes: Option<usize>,
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            max_pending_send_bytes: Some(DEFAULT_MAX_PENDING_SEND_BYTES),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = size;
        self
    }

    pub fn with_max_pending_send_bytes(mut self, limit: usize) -> Self {
        self.max_pending_send_bytes = Some(limit);
        self
    }

    pub fn unbounded_send_queue(mut self) -> Self {
        self.max_pending_send_bytes = None;
        self
    }

    /// Allocates a fresh receive/send context pair sized by this config.
    pub fn contexts(&self) -> crate::Result<(ReceiveContext, SendContext)> {
        Ok((
            ReceiveContext::with_capacity(self.receive_buffer_size)?,
            SendContext::with_capacity(self.send_buffer_size),
        ))
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.receive_buffer_size, DEFAULT_RECEIVE_BUFFER_SIZE);
        assert_eq!(config.max_pending_send_bytes, Some(DEFAULT_MAX_PENDING_SEND_BYTES));
    }

    #[test]
    fn test_builder_chain() {
        let config = ChannelConfig::new()
            .with_label("peer-1")
            .with_receive_buffer_size(16)
            .with_send_buffer_size(32)
            .unbounded_send_queue();
        assert_eq!(config.label, "peer-1");
        assert_eq!(config.receive_buffer_size, 16);
        assert_eq!(config.send_buffer_size, 32);
        assert!(config.max_pending_send_bytes.is_none());

        let (recv, send) = config.contexts().unwrap();
        assert_eq!(recv.capacity(), 16);
        assert!(send.staged().is_empty());
    }

    #[test]
    fn test_zero_receive_buffer_rejected() {
        let config = ChannelConfig::new().with_receive_buffer_size(0);
        assert!(config.contexts().is_err());
    }
}
