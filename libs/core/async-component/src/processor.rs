//! Processor trait for message handling.

use crate::error::BoxError;
use crate::message::Message;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Message processor.
///
/// Return `Ok(())` and the message is acked. Return an error and the
/// component's [`FailStrategy`](crate::FailStrategy) decides what happens.
///
/// # Example
///
/// ```rust,ignore
/// use async_component::{BoxError, Message, Processor};
/// use async_trait::async_trait;
///
/// struct OrderProcessor;
///
/// #[async_trait]
/// impl Processor for OrderProcessor {
///     async fn process(&self, message: &dyn Message) -> Result<(), BoxError> {
///         let order: Order = message.decode()?;
///         store(order).await?;
///         Ok(())
///     }
///
///     fn name(&self) -> &str {
///         "order_processor"
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, message: &dyn Message) -> Result<(), BoxError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "processor"
    }
}

/// A [`Processor`] backed by a closure. See [`processor_fn`].
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Wrap a closure as a processor.
///
/// ```rust,ignore
/// let processor = processor_fn(|msg| Box::pin(async move {
///     let event: Event = msg.decode()?;
///     handle(event).await?;
///     Ok::<(), BoxError>(())
/// }));
/// ```
pub fn processor_fn<F>(f: F) -> FnProcessor<F>
where
    F: for<'a> Fn(&'a dyn Message) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync,
{
    FnProcessor {
        name: "fn_processor".to_string(),
        f,
    }
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: for<'a> Fn(&'a dyn Message) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync,
{
    async fn process(&self, message: &dyn Message) -> Result<(), BoxError> {
        (self.f)(message).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
