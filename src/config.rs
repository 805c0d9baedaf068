//! Connection configuration.
//!
//! Consumed once at construction. Every field has a default, so a JSON
//! document only needs the values that differ:
//!
//! ```
//! use framelink::ConnectionConfig;
//!
//! let config = ConnectionConfig::from_json_str(r#"{ "host": "10.0.0.5", "port": 7777 }"#).unwrap();
//! assert_eq!(config.remote_addr(), "10.0.0.5:7777");
//! assert_eq!(config.receive_buffer_size, 1024);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FramelinkError, Result};
use crate::protocol::{
    ByteOrder, FrameCodec, DEFAULT_MAGIC, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_TYPE_NAME_LENGTH,
};

/// Default maximum pending packets before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout in milliseconds.
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 5_000;

/// Settings for one client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    /// Remote port. Zero is rejected by [`validate`](Self::validate).
    pub port: u16,
    /// Initial receive buffer capacity; grows on demand.
    pub receive_buffer_size: usize,
    /// Outbound packet buffers created up front.
    pub packet_pool_size: usize,
    /// Connect from [`Connection::start`](crate::Connection::start).
    pub auto_connect: bool,
    pub connect_timeout_ms: Option<u64>,
    pub nodelay: bool,
    /// `SO_LINGER` in milliseconds. `Some(0)` resets the socket on close
    /// instead of lingering in TIME_WAIT.
    pub linger_ms: Option<u64>,
    pub max_payload_size: u32,
    pub max_type_name_length: u32,
    pub magic: u32,
    pub byte_order: ByteOrder,
    pub writer: WriterConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            receive_buffer_size: 1024,
            packet_pool_size: 64,
            auto_connect: true,
            connect_timeout_ms: Some(5_000),
            nodelay: true,
            linger_ms: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_type_name_length: DEFAULT_MAX_TYPE_NAME_LENGTH,
            magic: DEFAULT_MAGIC,
            byte_order: ByteOrder::default(),
            writer: WriterConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Defaults pointed at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(FramelinkError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(FramelinkError::Config("port must be set".into()));
        }
        if self.receive_buffer_size == 0 {
            return Err(FramelinkError::Config(
                "receive_buffer_size must be greater than zero".into(),
            ));
        }
        if self.writer.channel_capacity == 0 {
            return Err(FramelinkError::Config(
                "writer.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.writer.max_pending_frames == 0 {
            return Err(FramelinkError::Config(
                "writer.max_pending_frames must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` as passed to the resolver.
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger_ms.map(Duration::from_millis)
    }

    /// Frame codec matching the wire settings.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new()
            .with_magic(self.magic)
            .with_byte_order(self.byte_order)
            .with_max_payload_size(self.max_payload_size)
            .with_max_type_name_length(self.max_type_name_length)
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Maximum pending packets before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the packet queue.
    pub channel_capacity: usize,
    /// How long a send waits for backpressure to clear.
    pub backpressure_timeout_ms: u64,
}

impl WriterConfig {
    #[inline]
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.receive_buffer_size, 1024);
        assert_eq!(config.packet_pool_size, 64);
        assert!(config.auto_connect);
        assert!(config.nodelay);
        assert_eq!(config.linger(), None);
        assert_eq!(config.magic, 0xABCD);
        assert_eq!(config.byte_order, ByteOrder::Little);
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.writer.backpressure_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ConnectionConfig::from_json_str(
            r#"{
                "port": 9000,
                "auto_connect": false,
                "byte_order": "big",
                "connect_timeout_ms": null,
                "linger_ms": 0,
                "writer": { "channel_capacity": 8 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(!config.auto_connect);
        assert_eq!(config.byte_order, ByteOrder::Big);
        assert_eq!(config.connect_timeout(), None);
        assert_eq!(config.linger(), Some(Duration::ZERO));
        assert_eq!(config.writer.channel_capacity, 8);
        assert_eq!(config.writer.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_missing_port_rejected() {
        let err = ConnectionConfig::from_json_str("{}").unwrap_err();
        assert!(matches!(err, FramelinkError::Config(msg) if msg.contains("port")));
    }

    #[test]
    fn test_zero_receive_buffer_rejected() {
        let mut config = ConnectionConfig::new("localhost", 80);
        config.receive_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        let err = ConnectionConfig::from_json_str("{ port: ").unwrap_err();
        assert!(matches!(err, FramelinkError::Json(_)));
    }

    #[test]
    fn test_codec_follows_config() {
        let mut config = ConnectionConfig::new("localhost", 80);
        config.magic = 0x1234;
        config.byte_order = ByteOrder::Big;

        let codec = config.codec();
        assert_eq!(codec.magic(), 0x1234);
        assert_eq!(codec.byte_order(), ByteOrder::Big);
    }

    #[test]
    fn test_remote_addr() {
        assert_eq!(
            ConnectionConfig::new("example.com", 4000).remote_addr(),
            "example.com:4000"
        );
    }
}
