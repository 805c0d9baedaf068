//! # framelink
//!
//! Client-side transport core for a single persistent TCP connection
//! carrying type-tagged, length-prefixed binary frames.
//!
//! ## Architecture
//!
//! - **Buffers**: a growable circular [`ByteCursorBuffer`] for receiving,
//!   pooled buffers ([`ObjectPool`]) for outbound packets
//! - **Framing**: [`FrameCodec`] turns `(type name, payload)` into bytes and
//!   back, tolerating frames split across any number of reads
//! - **Connection**: a state machine with one receive task and one writer
//!   task per connection, dispatching frames in wire order
//!
//! ## Wire format
//!
//! ```text
//! [u32 magic][u32 payload length][u32 type name length][type name][payload]
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use framelink::{Connection, Message, MessageRegistry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Chat {
//!     text: String,
//! }
//!
//! impl Message for Chat {
//!     const TYPE_NAME: &'static str = "MsgChat";
//! }
//!
//! #[tokio::main]
//! async fn main() -> framelink::Result<()> {
//!     let mut registry = MessageRegistry::new();
//!     registry.register(|chat: Chat| {
//!         println!("{}", chat.text);
//!         Ok(())
//!     });
//!
//!     let connection = Connection::builder()
//!         .port(7777)
//!         .dispatcher(registry)
//!         .start()
//!         .await?;
//!
//!     connection.send_message(&Chat { text: "hello".into() }).await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod transport;

mod connection;
mod stats;
mod writer;

pub use buffer::{BufferError, ByteCursorBuffer};
pub use config::{ConnectionConfig, WriterConfig};
pub use connection::{Connection, ConnectionBuilder, ConnectionEvent, ConnectionState};
pub use dispatch::{Dispatch, Message, MessageRegistry};
pub use error::{DisconnectReason, FramelinkError, Result};
pub use pool::{ObjectPool, Poolable, Pooled};
pub use protocol::{Decoded, Frame, FrameCodec};
pub use stats::ConnectionStats;
