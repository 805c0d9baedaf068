//! Error types for framelink.

use std::time::Duration;

use thiserror::Error;

use crate::buffer::BufferError;

/// Main error type for all framelink operations.
#[derive(Debug, Error)]
pub enum FramelinkError {
    /// The TCP connect attempt failed. Not fatal to the process.
    #[error("Connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connect attempt did not complete in time.
    #[error("Connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The peer closed the stream (zero-byte read).
    #[error("Peer closed the connection")]
    PeerClosed,

    /// I/O error on the socket during send or receive.
    #[error("Socket fault: {0}")]
    SocketFault(#[from] std::io::Error),

    /// Frame header carried the wrong magic constant.
    #[error("Protocol desync: expected magic {expected:#010x}, found {found:#010x}")]
    ProtocolDesync { expected: u32, found: u32 },

    /// Header advertised a length above the configured limit.
    #[error("Frame field of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Type name bytes were not valid UTF-8.
    #[error("Frame type name is not valid UTF-8")]
    InvalidTypeName,

    /// No decoder is registered for the type name.
    #[error("Unresolved message type: {0}")]
    UnresolvedMessageType(String),

    /// The decoder for a known type rejected the payload.
    #[error("Payload decode failed for {type_name}: {message}")]
    PayloadDecode { type_name: String, message: String },

    /// JSON serialization error on the send path.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cursor buffer misuse.
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Operation requires a connected socket.
    #[error("Not connected")]
    NotConnected,

    /// Writer channel closed underneath a send.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - too many packets pending.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FramelinkError {
    /// Classify an error that tears down the connection.
    ///
    /// Returns `None` for errors that leave the connection usable
    /// (connect failures, backpressure, configuration).
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            FramelinkError::PeerClosed => Some(DisconnectReason::PeerClosed),
            FramelinkError::SocketFault(e) => Some(DisconnectReason::SocketFault(e.to_string())),
            FramelinkError::ConnectionClosed => {
                Some(DisconnectReason::SocketFault(self.to_string()))
            }
            FramelinkError::ProtocolDesync { .. }
            | FramelinkError::FrameTooLarge { .. }
            | FramelinkError::InvalidTypeName
            | FramelinkError::Buffer(_) => Some(DisconnectReason::ProtocolDesync(self.to_string())),
            FramelinkError::UnresolvedMessageType(name) => {
                Some(DisconnectReason::UnresolvedMessageType(name.clone()))
            }
            FramelinkError::PayloadDecode { type_name, .. } => {
                Some(DisconnectReason::UnresolvedMessageType(type_name.clone()))
            }
            _ => None,
        }
    }
}

/// Why a connection left the `Connected` state.
///
/// Fatal errors are collapsed into these buckets for observers; recovery is
/// identical for all of them (the connection is torn down).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally.
    Requested,
    /// Zero-byte read.
    PeerClosed,
    /// I/O error on send or receive.
    SocketFault(String),
    /// Bad magic or an unparseable header.
    ProtocolDesync(String),
    /// Dispatch could not resolve or decode a message type.
    UnresolvedMessageType(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::PeerClosed => write!(f, "peer closed"),
            DisconnectReason::SocketFault(msg) => write!(f, "socket fault: {}", msg),
            DisconnectReason::ProtocolDesync(msg) => write!(f, "protocol desync: {}", msg),
            DisconnectReason::UnresolvedMessageType(name) => {
                write!(f, "unresolved message type: {}", name)
            }
        }
    }
}

/// Result type alias using FramelinkError.
pub type Result<T> = std::result::Result<T, FramelinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors_map_to_reason() {
        let err = FramelinkError::ProtocolDesync {
            expected: 0xABCD,
            found: 0x1234,
        };
        assert!(matches!(
            err.disconnect_reason(),
            Some(DisconnectReason::ProtocolDesync(_))
        ));

        let err = FramelinkError::UnresolvedMessageType("MsgChat".to_string());
        assert_eq!(
            err.disconnect_reason(),
            Some(DisconnectReason::UnresolvedMessageType("MsgChat".to_string()))
        );

        assert_eq!(
            FramelinkError::PeerClosed.disconnect_reason(),
            Some(DisconnectReason::PeerClosed)
        );
    }

    #[test]
    fn test_non_fatal_errors_have_no_reason() {
        let err = FramelinkError::ConnectFailed {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.disconnect_reason().is_none());
        assert!(FramelinkError::BackpressureTimeout.disconnect_reason().is_none());
        assert!(FramelinkError::NotConnected.disconnect_reason().is_none());
    }

    #[test]
    fn test_desync_display() {
        let err = FramelinkError::ProtocolDesync {
            expected: 0xABCD,
            found: 0xFFFF,
        };
        assert_eq!(
            err.to_string(),
            "Protocol desync: expected magic 0x0000abcd, found 0x0000ffff"
        );
    }
}
