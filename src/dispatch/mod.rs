//! Dispatch module - delivering decoded frames to the application.
//!
//! Provides:
//! - [`Dispatch`] - the inbound callback the connection invokes per frame
//! - [`Message`] - a typed message bound to its wire type name
//! - [`MessageRegistry`] - maps type names to decode functions and handlers
//!
//! Dispatch runs inline on the receive task, in wire order. Handlers must
//! not block; hand longer work off to a channel or a spawned task.
//!
//! # Example
//!
//! ```
//! use framelink::dispatch::{Message, MessageRegistry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct ChatMessage {
//!     text: String,
//! }
//!
//! impl Message for ChatMessage {
//!     const TYPE_NAME: &'static str = "MsgChat_SC";
//! }
//!
//! let mut registry = MessageRegistry::new();
//! registry.register(|msg: ChatMessage| {
//!     println!("chat: {}", msg.text);
//!     Ok(())
//! });
//! assert!(registry.contains("MsgChat_SC"));
//! ```

mod registry;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use registry::MessageRegistry;

/// Receiver of decoded frames.
///
/// Returning `UnresolvedMessageType` or `PayloadDecode` tears the connection
/// down. Any other error is logged and the stream continues.
pub trait Dispatch: Send + Sync + 'static {
    fn on_message(&self, type_name: &str, payload: Bytes) -> Result<()>;
}

impl<F> Dispatch for F
where
    F: Fn(&str, Bytes) -> Result<()> + Send + Sync + 'static,
{
    fn on_message(&self, type_name: &str, payload: Bytes) -> Result<()> {
        self(type_name, payload)
    }
}

/// Application message with a fixed wire type name.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_NAME: &'static str;
}
