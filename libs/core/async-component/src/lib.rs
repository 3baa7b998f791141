//! Async Component
//!
//! A pluggable message-consumption engine. A [`Component`] wraps a
//! [`ConsumerFactory`] and a [`Processor`] and runs a supervised loop:
//!
//! 1. create a consumer, retrying up to `retries` extra times with `retry_wait` between attempts
//! 2. start consuming and multiplex shutdown, consumer errors and messages
//! 3. hand each message to the processor, then ack it, or apply the [`FailStrategy`] on failure
//!
//! ## Failure strategies
//!
//! | Strategy   | Message | Loop                          |
//! |------------|---------|-------------------------------|
//! | `NackExit` | nack    | stops with the processing error |
//! | `Nack`     | nack    | continues                     |
//! | `Ack`      | ack     | continues                     |
//!
//! Shutdown (a `true` on the `watch` channel passed to [`Component::run`])
//! always ends the run with `Ok(())`; every other exit returns a [`ComponentError`].
//!
//! ## Example
//!
//! ```ignore
//! use async_component::{Component, FailStrategy, memory};
//! use tokio::sync::watch;
//!
//! let (publisher, factory) = memory::channel(64);
//!
//! let component = Component::builder("orders")
//!     .with_processor(OrderProcessor::new(repo))
//!     .with_consumer_factory(factory)
//!     .with_fail_strategy(FailStrategy::Nack)
//!     .with_retries(3)
//!     .with_retry_wait(Duration::from_millis(500))
//!     .build()?;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! component.run(shutdown_rx).await?;
//! ```

mod component;
mod config;
mod consumer;
mod error;
mod message;
pub mod memory;
pub mod metrics;
mod processor;
mod strategy;

pub use component::Component;
pub use config::{ComponentBuilder, ComponentSettings};
pub use consumer::{Consumer, ConsumerFactory, Deliveries};
pub use error::{BoxError, ComponentError, ConfigErrors, ConfigViolation, SettingsError};
pub use message::{Disposition, Message, MessageContext};
pub use metrics::ComponentMetrics;
pub use processor::{FnProcessor, Processor, processor_fn};
pub use strategy::{FailStrategy, Flow};
