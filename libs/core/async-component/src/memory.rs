//! In-memory, channel-backed transport.
//!
//! Useful for tests, local development and wiring demos. A
//! [`MemoryPublisher`] feeds JSON payloads (or injected transport errors) into
//! a queue; [`MemoryConsumerFactory`] builds consumers that drain it. Every
//! ack/nack is recorded in [`Outcomes`].
//!
//! A message dropped without being acked or nacked (still buffered when its
//! consumer closes, for instance) goes back on the queue and is redelivered
//! in publish order.
//!
//! ```rust,ignore
//! let (publisher, factory) = memory::channel(64);
//! let outcomes = factory.outcomes();
//!
//! let component = Component::builder("orders")
//!     .with_processor(processor)
//!     .with_consumer_factory(factory)
//!     .build()?;
//!
//! publisher.publish(&order).await?;
//! ```

use crate::consumer::{Consumer, ConsumerFactory, Deliveries};
use crate::error::BoxError;
use crate::message::{Disposition, Message, MessageContext};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

struct Queued {
    seq: u64,
    correlation_id: Option<String>,
    payload: serde_json::Value,
}

enum Envelope {
    Message(Queued),
    Error(BoxError),
}

/// Published envelopes plus messages handed back for redelivery.
struct Queue {
    incoming: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    redelivery: Mutex<VecDeque<Queued>>,
    redelivered: Notify,
}

impl Queue {
    fn requeue(&self, queued: Queued) {
        {
            let mut pending = self
                .redelivery
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let at = pending.partition_point(|p| p.seq < queued.seq);
            pending.insert(at, queued);
        }
        self.redelivered.notify_one();
    }

    fn take_redelivery(&self) -> Option<Queued> {
        self.redelivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Next envelope, redeliveries first. `None` once every publisher is gone.
    async fn next(&self, incoming: &mut mpsc::Receiver<Envelope>) -> Option<Envelope> {
        loop {
            if let Some(queued) = self.take_redelivery() {
                return Some(Envelope::Message(queued));
            }
            tokio::select! {
                _ = self.redelivered.notified() => continue,
                next = incoming.recv() => return next,
            }
        }
    }
}

type Source = Arc<Queue>;

/// Create a publisher and a consumer factory sharing one bounded queue.
pub fn channel(capacity: usize) -> (MemoryPublisher, MemoryConsumerFactory) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let publisher = MemoryPublisher {
        tx,
        sequence: Arc::new(AtomicU64::new(0)),
    };
    let factory = MemoryConsumerFactory {
        source: Arc::new(Queue {
            incoming: tokio::sync::Mutex::new(rx),
            redelivery: Mutex::new(VecDeque::new()),
            redelivered: Notify::new(),
        }),
        outcomes: Outcomes::default(),
        stats: Arc::new(ConsumerStats::default()),
        failures_left: Arc::new(AtomicU32::new(0)),
    };
    (publisher, factory)
}

/// Sending half of an in-memory queue. Dropping every publisher ends the
/// message stream of the active consumer.
#[derive(Clone)]
pub struct MemoryPublisher {
    tx: mpsc::Sender<Envelope>,
    sequence: Arc<AtomicU64>,
}

impl MemoryPublisher {
    /// Publish a payload with a generated correlation ID.
    pub async fn publish<T: Serialize>(&self, payload: &T) -> Result<(), BoxError> {
        self.send_message(None, payload).await
    }

    pub async fn publish_with_id<T: Serialize>(
        &self,
        correlation_id: impl Into<String>,
        payload: &T,
    ) -> Result<(), BoxError> {
        self.send_message(Some(correlation_id.into()), payload).await
    }

    /// Inject a transport error; it shows up on the consumer's error stream.
    pub async fn fail(&self, error: impl Into<BoxError>) -> Result<(), BoxError> {
        self.tx
            .send(Envelope::Error(error.into()))
            .await
            .map_err(|_| "memory queue closed".into())
    }

    async fn send_message<T: Serialize>(
        &self,
        correlation_id: Option<String>,
        payload: &T,
    ) -> Result<(), BoxError> {
        let payload = serde_json::to_value(payload)?;
        self.tx
            .send(Envelope::Message(Queued {
                seq: self.sequence.fetch_add(1, Ordering::SeqCst),
                correlation_id,
                payload,
            }))
            .await
            .map_err(|_| "memory queue closed".into())
    }
}

/// One recorded settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub correlation_id: String,
    pub disposition: Disposition,
}

/// Shared log of ack/nack outcomes, in the order they happened.
#[derive(Debug, Clone, Default)]
pub struct Outcomes {
    inner: Arc<Mutex<Vec<Outcome>>>,
}

impl Outcomes {
    fn record(&self, correlation_id: &str, disposition: Disposition) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Outcome {
                correlation_id: correlation_id.to_string(),
                disposition,
            });
    }

    pub fn snapshot(&self) -> Vec<Outcome> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.disposition == disposition)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle counters shared by a factory and the consumers it creates.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    create_attempts: AtomicUsize,
    created: AtomicUsize,
    closed: AtomicUsize,
}

impl ConsumerStats {
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Factory for [`MemoryConsumer`]s reading from the shared queue.
#[derive(Clone)]
pub struct MemoryConsumerFactory {
    source: Source,
    outcomes: Outcomes,
    stats: Arc<ConsumerStats>,
    failures_left: Arc<AtomicU32>,
}

impl MemoryConsumerFactory {
    /// Make the next `count` calls to `create` fail, simulating a broker that
    /// is not reachable yet.
    pub fn with_failed_attempts(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn outcomes(&self) -> Outcomes {
        self.outcomes.clone()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl ConsumerFactory for MemoryConsumerFactory {
    async fn create(&self) -> Result<Box<dyn Consumer>, BoxError> {
        self.stats.create_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err("memory broker unavailable".into());
        }

        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConsumer {
            source: Arc::clone(&self.source),
            outcomes: self.outcomes.clone(),
            stats: Arc::clone(&self.stats),
            timeout: None,
            forwarder: None,
        }))
    }
}

/// Consumer draining an in-memory queue.
///
/// With a timeout set, going that long without an envelope produces an idle
/// timeout error on the error stream.
pub struct MemoryConsumer {
    source: Source,
    outcomes: Outcomes,
    stats: Arc<ConsumerStats>,
    timeout: Option<Duration>,
    forwarder: Option<JoinHandle<()>>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn consume(&mut self, shutdown: watch::Receiver<bool>) -> Result<Deliveries, BoxError> {
        if self.forwarder.is_some() {
            return Err("memory consumer is already consuming".into());
        }

        let (msg_tx, msg_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);

        self.forwarder = Some(tokio::spawn(forward(
            Arc::clone(&self.source),
            msg_tx,
            err_tx,
            shutdown,
            self.outcomes.clone(),
            self.timeout,
        )));

        Ok(Deliveries::new(msg_rx, err_rx))
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    async fn close(&mut self) -> Result<(), BoxError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
            let _ = forwarder.await;
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        debug!("Memory consumer closed");
        Ok(())
    }
}

async fn forward(
    source: Source,
    messages: mpsc::Sender<Box<dyn Message>>,
    errors: mpsc::Sender<BoxError>,
    shutdown: watch::Receiver<bool>,
    outcomes: Outcomes,
    timeout: Option<Duration>,
) {
    let mut incoming = source.incoming.lock().await;

    loop {
        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, source.next(&mut incoming)).await {
                Ok(next) => next,
                Err(_) => {
                    let _ = errors
                        .send(format!("no message received within {limit:?}").into())
                        .await;
                    return;
                }
            },
            None => source.next(&mut incoming).await,
        };

        match next {
            Some(Envelope::Message(queued)) => {
                let mut context = MessageContext::new(shutdown.clone());
                if let Some(id) = queued.correlation_id {
                    context = context.with_correlation_id(id);
                }
                let message = MemoryMessage {
                    context,
                    seq: queued.seq,
                    payload: queued.payload,
                    outcomes: outcomes.clone(),
                    queue: Arc::clone(&source),
                    settled: AtomicBool::new(false),
                };
                // A refused (or aborted) send drops the message, which requeues it.
                if messages.send(Box::new(message)).await.is_err() {
                    return;
                }
            }
            Some(Envelope::Error(e)) => {
                if errors.send(e).await.is_err() {
                    return;
                }
            }
            None => return,
        }
    }
}

/// A message delivered by [`MemoryConsumer`]. Dropping it unsettled puts it
/// back on the queue.
pub struct MemoryMessage {
    context: MessageContext,
    seq: u64,
    payload: serde_json::Value,
    outcomes: Outcomes,
    queue: Source,
    settled: AtomicBool,
}

impl Drop for MemoryMessage {
    fn drop(&mut self) {
        if self.settled.load(Ordering::SeqCst) {
            return;
        }
        debug!(
            correlation_id = self.context.correlation_id(),
            "Unsettled message returned to queue"
        );
        self.queue.requeue(Queued {
            seq: self.seq,
            correlation_id: Some(self.context.correlation_id().to_string()),
            payload: std::mem::take(&mut self.payload),
        });
    }
}

#[async_trait]
impl Message for MemoryMessage {
    fn context(&self) -> &MessageContext {
        &self.context
    }

    fn decode_value(&self) -> Result<serde_json::Value, BoxError> {
        Ok(self.payload.clone())
    }

    async fn ack(&self) -> Result<(), BoxError> {
        self.settled.store(true, Ordering::SeqCst);
        self.outcomes
            .record(self.context.correlation_id(), Disposition::Ack);
        Ok(())
    }

    async fn nack(&self) -> Result<(), BoxError> {
        self.settled.store(true, Ordering::SeqCst);
        self.outcomes
            .record(self.context.correlation_id(), Disposition::Nack);
        Ok(())
    }
}
