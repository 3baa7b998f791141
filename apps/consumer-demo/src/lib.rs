//! Consumer Demo
//!
//! Wires an [`async_component::Component`] end to end: environment settings,
//! structured logging, Prometheus metrics, the in-memory transport and
//! ctrl-c driven shutdown.
//!
//! ## Environment
//!
//! - `ORDERS_NAME`, `ORDERS_FAIL_STRATEGY`, `ORDERS_RETRIES`, `ORDERS_RETRY_WAIT_MS`:
//!   component settings (see [`ComponentSettings::from_env`])
//! - `DEMO_EVENTS`: number of demo events to publish (default: 10)
//! - `APP_ENV`: `production` for JSON logs, anything else for pretty logs
//! - `RUST_LOG`: log filter override

use async_component::{
    BoxError, Component, ComponentBuilder, ComponentSettings, Message, Processor, memory,
};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Order event carried by the demo queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: u64,
    pub sku: String,
    pub quantity: u32,
}

/// Validates order events; zero-quantity orders fail processing.
#[derive(Debug, Default)]
pub struct OrderProcessor;

#[async_trait]
impl Processor for OrderProcessor {
    async fn process(&self, message: &dyn Message) -> Result<(), BoxError> {
        let order: OrderEvent = message.decode()?;
        if order.quantity == 0 {
            return Err(format!("order {} has no items", order.id).into());
        }

        info!(
            order_id = order.id,
            sku = %order.sku,
            quantity = order.quantity,
            correlation_id = message.context().correlation_id(),
            "Order accepted"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "order_processor"
    }
}

/// Demo events: every fifth order is empty and fails processing.
pub fn demo_events(count: u64) -> Vec<OrderEvent> {
    (1..=count)
        .map(|id| OrderEvent {
            id,
            sku: format!("SKU-{:04}", id % 7),
            quantity: if id % 5 == 0 { 0 } else { (id % 3 + 1) as u32 },
        })
        .collect()
}

/// Run the demo worker until ctrl-c (or SIGTERM) or a fatal component error.
pub async fn run() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("Failed to install Prometheus recorder")?;

    let settings =
        ComponentSettings::from_env("ORDERS").wrap_err("Failed to load component settings")?;
    let events: u64 = std::env::var("DEMO_EVENTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    info!(
        name = %settings.name,
        fail_strategy = %settings.fail_strategy,
        retries = settings.retries,
        retry_wait_ms = settings.retry_wait_ms,
        "Component settings loaded"
    );

    let (publisher, factory) = memory::channel(64);

    let component: Component = ComponentBuilder::from_settings(&settings)
        .with_processor(OrderProcessor)
        .with_consumer_factory(factory)
        .build()
        .wrap_err("Invalid component configuration")?;

    tokio::spawn(async move {
        for event in demo_events(events) {
            let id = format!("order-{}", event.id);
            if let Err(e) = publisher.publish_with_id(id, &event).await {
                error!(error = %e, "Failed to publish demo event");
                return;
            }
        }
        debug!(events, "Demo events published");
        // Keep the queue open so the component runs until shutdown.
        std::future::pending::<()>().await;
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let result = component.run(shutdown_rx).await;
    debug!(metrics = %metrics.render(), "Final metrics");

    result.wrap_err("Component stopped with a fatal error")
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let is_prod = std::env::var("APP_ENV")
        .map(|e| e.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    let result = if is_prod {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(false).flatten_event(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).pretty())
            .try_init()
    };

    if result.is_err() {
        debug!("Tracing already initialized, skipping re-initialization");
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => res?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    info!("Shutdown signal received");
    Ok(())
}
