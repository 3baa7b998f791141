//! The message abstraction handed to processors.

use crate::error::BoxError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use strum::{AsRefStr, Display};
use tokio::sync::watch;

/// How a message is settled with its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Disposition {
    /// Mark the message as handled.
    Ack,
    /// Reject the message (redelivery or discard is up to the transport).
    Nack,
}

/// Per-message context: correlation metadata plus the shutdown signal the
/// consumer was started with.
#[derive(Debug, Clone)]
pub struct MessageContext {
    correlation_id: String,
    headers: HashMap<String, String>,
    shutdown: watch::Receiver<bool>,
}

impl MessageContext {
    /// Create a context with a fresh correlation ID.
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            headers: HashMap::new(),
            shutdown,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// True once shutdown was requested or the shutdown sender is gone.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Resolves when shutdown is requested.
    pub async fn cancelled(&self) {
        let mut shutdown = self.shutdown.clone();
        let _ = shutdown.wait_for(|stop| *stop).await;
    }
}

/// A single inbound message.
///
/// Transports implement this trait; the component only routes the message to
/// the processor and then acks or nacks it. Use [`decode`](#method.decode) on
/// `dyn Message` to get a typed payload.
#[async_trait]
pub trait Message: Send + Sync {
    /// Context the message was received with.
    fn context(&self) -> &MessageContext;

    /// Decode the payload into a JSON value.
    fn decode_value(&self) -> Result<serde_json::Value, BoxError>;

    /// Acknowledge the message.
    async fn ack(&self) -> Result<(), BoxError>;

    /// Reject the message.
    async fn nack(&self) -> Result<(), BoxError>;
}

impl<'a> dyn Message + 'a {
    /// Decode the payload into the caller's type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BoxError> {
        let value = self.decode_value()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Settle the message with the given disposition.
    pub async fn settle(&self, disposition: Disposition) -> Result<(), BoxError> {
        match disposition {
            Disposition::Ack => self.ack().await,
            Disposition::Nack => self.nack().await,
        }
    }
}
