//! Registry mapping wire type names to typed handlers.
//!
//! Populated once at startup, then handed to the connection as its
//! [`Dispatch`] implementation. A type name with no entry is
//! [`FramelinkError::UnresolvedMessageType`].

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use super::{Dispatch, Message};
use crate::codec::JsonCodec;
use crate::error::{FramelinkError, Result};

type RawHandler = Box<dyn Fn(Bytes) -> Result<()> + Send + Sync>;

/// Registry of per-type handlers.
#[derive(Default)]
pub struct MessageRegistry {
    handlers: HashMap<String, RawHandler>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler under `M::TYPE_NAME`.
    ///
    /// The payload is decoded with [`JsonCodec`] before the handler runs.
    /// Registering the same type twice replaces the earlier handler.
    pub fn register<M, F>(&mut self, handler: F)
    where
        M: Message,
        F: Fn(M) -> Result<()> + Send + Sync + 'static,
    {
        self.insert(
            M::TYPE_NAME,
            Box::new(move |payload: Bytes| {
                let message: M =
                    JsonCodec::decode(&payload).map_err(|e| FramelinkError::PayloadDecode {
                        type_name: M::TYPE_NAME.to_string(),
                        message: e.to_string(),
                    })?;
                handler(message)
            }),
        );
    }

    /// Register a handler that receives the undecoded payload.
    pub fn register_raw<F>(&mut self, type_name: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> Result<()> + Send + Sync + 'static,
    {
        self.insert(type_name, Box::new(handler));
    }

    fn insert(&mut self, type_name: impl Into<String>, handler: RawHandler) {
        let type_name = type_name.into();
        if self.handlers.insert(type_name.clone(), handler).is_some() {
            debug!(type_name = %type_name, "Replaced message handler");
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered type names, in no particular order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl Dispatch for MessageRegistry {
    fn on_message(&self, type_name: &str, payload: Bytes) -> Result<()> {
        let handler = self
            .handlers
            .get(type_name)
            .ok_or_else(|| FramelinkError::UnresolvedMessageType(type_name.to_string()))?;

        trace!(type_name, bytes = payload.len(), "Dispatching message");
        handler(payload)
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("type_names", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
