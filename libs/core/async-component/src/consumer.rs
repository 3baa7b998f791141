//! Consumer and consumer factory traits implemented by transports.

use crate::error::BoxError;
use crate::message::Message;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// The two streams a consumer hands to the component once it starts consuming.
///
/// Any value on `errors` is fatal to the run loop. When `messages` ends the
/// component stops with [`ComponentError::StreamClosed`](crate::ComponentError::StreamClosed).
pub struct Deliveries {
    pub messages: mpsc::Receiver<Box<dyn Message>>,
    pub errors: mpsc::Receiver<BoxError>,
}

impl Deliveries {
    pub fn new(
        messages: mpsc::Receiver<Box<dyn Message>>,
        errors: mpsc::Receiver<BoxError>,
    ) -> Self {
        Self { messages, errors }
    }
}

/// A message source.
///
/// The component calls [`consume`](Consumer::consume) once per consumer and
/// [`close`](Consumer::close) exactly once when its run loop exits.
#[async_trait]
pub trait Consumer: Send {
    /// Start consuming. The shutdown receiver is the one passed to `Component::run`.
    async fn consume(&mut self, shutdown: watch::Receiver<bool>) -> Result<Deliveries, BoxError>;

    /// Transport-specific timeout (fetch or idle timeout).
    fn set_timeout(&mut self, timeout: Duration);

    /// Release the consumer's resources.
    async fn close(&mut self) -> Result<(), BoxError>;
}

/// Builds a fresh consumer each time a component starts running.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Consumer>, BoxError>;
}
