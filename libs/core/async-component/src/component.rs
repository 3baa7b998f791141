//! The component run loop.
//!
//! A run goes through two states:
//!
//! - **Acquiring**: create a consumer through the factory, retrying up to
//!   `retries` more times with `retry_wait` in between.
//! - **Running**: multiplex shutdown, consumer errors and messages until
//!   shutdown or a fatal condition.
//!
//! Shutdown always ends a run with `Ok(())`; every other exit is an error.
//! Once created, the consumer is closed exactly once, whichever way the run ends.

use crate::config::ComponentBuilder;
use crate::consumer::{Consumer, ConsumerFactory, Deliveries};
use crate::error::ComponentError;
use crate::message::{Disposition, Message};
use crate::metrics::ComponentMetrics;
use crate::processor::Processor;
use crate::strategy::{FailStrategy, Flow};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// A configured consumer/processor pair. Build one with [`Component::builder`].
pub struct Component {
    pub(crate) name: String,
    pub(crate) processor: Arc<dyn Processor>,
    pub(crate) consumer_factory: Arc<dyn ConsumerFactory>,
    pub(crate) fail_strategy: FailStrategy,
    pub(crate) retries: u32,
    pub(crate) retry_wait: Duration,
    pub(crate) metrics: ComponentMetrics,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("processor", &self.processor.name())
            .field("fail_strategy", &self.fail_strategy)
            .field("retries", &self.retries)
            .field("retry_wait", &self.retry_wait)
            .finish_non_exhaustive()
    }
}

impl Component {
    pub fn builder(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fail_strategy(&self) -> FailStrategy {
        self.fail_strategy
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_wait(&self) -> Duration {
        self.retry_wait
    }

    /// Run the component until shutdown or a fatal error.
    ///
    /// Send `true` on the shutdown channel (or drop its sender) to stop
    /// gracefully; the run then returns `Ok(())`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ComponentError> {
        let span = info_span!("component", name = %self.name);
        self.run_inner(shutdown).instrument(span).await
    }

    async fn run_inner(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ComponentError> {
        info!(
            processor = %self.processor.name(),
            fail_strategy = %self.fail_strategy,
            retries = self.retries,
            retry_wait = ?self.retry_wait,
            "Starting component"
        );

        let Some(mut consumer) = self.acquire_consumer(&mut shutdown).await? else {
            info!("Shutdown requested while acquiring consumer");
            return Ok(());
        };

        let result = self.consume(&mut consumer, &mut shutdown).await;

        match consumer.close().await {
            Ok(()) => debug!("Consumer closed"),
            Err(e) => warn!(error = %e, "Failed to close consumer"),
        }

        match &result {
            Ok(()) => info!("Component stopped"),
            Err(e) => error!(error = %e, "Component stopped with error"),
        }
        result
    }

    /// Create a consumer, retrying on failure.
    ///
    /// Returns `Ok(None)` if shutdown was requested during a retry wait.
    async fn acquire_consumer(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Box<dyn Consumer>>, ComponentError> {
        let max_attempts = self.retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.metrics.acquisition_attempt();

            let err = match self.consumer_factory.create().await {
                Ok(consumer) => {
                    debug!(attempt, "Consumer created");
                    return Ok(Some(consumer));
                }
                Err(e) => e,
            };
            self.metrics.acquisition_failed();

            if attempt >= max_attempts {
                return Err(ComponentError::Acquisition {
                    attempts: attempt,
                    source: err,
                });
            }

            warn!(
                attempt,
                max_attempts,
                retry_wait = ?self.retry_wait,
                error = %err,
                "Failed to create consumer, retrying"
            );

            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return Ok(None),
                _ = tokio::time::sleep(self.retry_wait) => {}
            }
        }
    }

    async fn consume(
        &self,
        consumer: &mut Box<dyn Consumer>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ComponentError> {
        let Deliveries {
            mut messages,
            mut errors,
        } = consumer
            .consume(shutdown.clone())
            .await
            .map_err(ComponentError::Consume)?;

        let mut errors_open = true;

        loop {
            // Shutdown is polled first so message traffic cannot starve it.
            tokio::select! {
                biased;

                _ = shutdown_requested(shutdown) => {
                    info!("Shutdown signal received, stopping component");
                    return Ok(());
                }

                err = errors.recv(), if errors_open => match err {
                    Some(e) => {
                        self.metrics.transport_error();
                        return Err(ComponentError::Transport(e));
                    }
                    None => {
                        debug!("Consumer error stream closed");
                        errors_open = false;
                    }
                },

                msg = messages.recv() => match msg {
                    Some(msg) => self.dispatch(msg.as_ref()).await?,
                    None => return Err(ComponentError::StreamClosed),
                },
            }
        }
    }

    /// Process one message and settle it according to the outcome.
    async fn dispatch(&self, message: &dyn Message) -> Result<(), ComponentError> {
        self.metrics.message_received();
        let correlation_id = message.context().correlation_id();
        debug!(correlation_id, "Processing message");

        let start = Instant::now();
        match self.processor.process(message).await {
            Ok(()) => {
                self.metrics.message_processed(start.elapsed());
                self.settle(message, Disposition::Ack).await
            }
            Err(e) => {
                self.metrics
                    .processing_failed(self.fail_strategy, start.elapsed());

                let (disposition, flow) = self.fail_strategy.on_failure();
                let settled = self.settle(message, disposition).await;

                match flow {
                    Flow::Continue => {
                        settled?;
                        warn!(
                            correlation_id,
                            error = %e,
                            fail_strategy = %self.fail_strategy,
                            %disposition,
                            "Message processing failed, continuing"
                        );
                        Ok(())
                    }
                    // The processor error wins; a failed reject is only logged.
                    Flow::Exit => {
                        if let Err(settle_err) = settled {
                            error!(
                                correlation_id,
                                error = %settle_err,
                                processing_error = %e,
                                "Failed to reject message before stopping"
                            );
                        }
                        Err(ComponentError::Processing(e))
                    }
                }
            }
        }
    }

    async fn settle(
        &self,
        message: &dyn Message,
        disposition: Disposition,
    ) -> Result<(), ComponentError> {
        message
            .settle(disposition)
            .await
            .map_err(|source| ComponentError::Acknowledge {
                disposition,
                source,
            })?;
        self.metrics.message_settled(disposition);
        Ok(())
    }
}

/// Resolves once shutdown is requested. A dropped sender can no longer signal,
/// so it counts as a request.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MockConsumerFactory;
    use crate::error::BoxError;
    use crate::processor::processor_fn;
    use std::sync::Mutex;

    fn failing_component(factory: MockConsumerFactory, retries: u32, wait: Duration) -> Component {
        Component::builder("test")
            .with_processor(processor_fn(|_| {
                Box::pin(async { Err::<(), BoxError>("PROC ERROR".into()) })
            }))
            .with_consumer_factory(factory)
            .with_retries(retries)
            .with_retry_wait(wait)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_acquisition_retries_then_fails() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);

        let mut factory = MockConsumerFactory::new();
        factory.expect_create().times(4).returning(move || {
            recorded.lock().unwrap().push(Instant::now());
            Err("FACTORY ERROR".into())
        });

        let component = failing_component(factory, 3, Duration::from_millis(2));
        let (_tx, rx) = watch::channel(false);

        let err = component.run(rx).await.unwrap_err();
        match err {
            ComponentError::Acquisition { attempts, source } => {
                assert_eq!(attempts, 4);
                assert_eq!(source.to_string(), "FACTORY ERROR");
            }
            other => panic!("unexpected error: {other}"),
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(2));
        }
    }

    #[tokio::test]
    async fn test_acquisition_without_retries_attempts_once() {
        let mut factory = MockConsumerFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(|| Err("FACTORY ERROR".into()));

        let component = failing_component(factory, 0, Duration::ZERO);
        let (_tx, rx) = watch::channel(false);

        let err = component.run(rx).await.unwrap_err();
        assert!(matches!(err, ComponentError::Acquisition { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_wait() {
        let mut factory = MockConsumerFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(|| Err("FACTORY ERROR".into()));

        let component = failing_component(factory, 5, Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { component.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run did not observe shutdown during retry wait")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unbounded_retry_wait_is_logged_and_interruptible() {
        let mut factory = MockConsumerFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(|| Err("FACTORY ERROR".into()));

        let component = failing_component(factory, 1, Duration::MAX);
        assert_eq!(component.retry_wait(), Duration::MAX);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { component.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run did not observe shutdown during retry wait")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_debug_hides_collaborators() {
        let component = failing_component(MockConsumerFactory::new(), 2, Duration::from_millis(5));
        let debug = format!("{component:?}");
        assert!(debug.contains("\"test\""));
        assert!(debug.contains("NackExit"));
        assert!(debug.contains("fn_processor"));
    }
}
