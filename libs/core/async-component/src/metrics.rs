//! Metrics for component run loops.
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the host
//! application installs a recorder (e.g. `metrics-exporter-prometheus`).

use crate::message::Disposition;
use crate::strategy::FailStrategy;
use metrics::{counter, histogram};
use std::time::Duration;

/// Component metrics helper, labelled by component name.
#[derive(Debug, Clone)]
pub struct ComponentMetrics {
    component: String,
}

impl ComponentMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record a consumer creation attempt
    pub fn acquisition_attempt(&self) {
        counter!(
            "async_component_consumer_create_attempts_total",
            "component" => self.component.clone()
        )
        .increment(1);
    }

    /// Record a failed consumer creation attempt
    pub fn acquisition_failed(&self) {
        counter!(
            "async_component_consumer_create_failures_total",
            "component" => self.component.clone()
        )
        .increment(1);
    }

    pub fn message_received(&self) {
        counter!(
            "async_component_messages_received_total",
            "component" => self.component.clone()
        )
        .increment(1);
    }

    /// Record a successfully processed message
    pub fn message_processed(&self, duration: Duration) {
        counter!(
            "async_component_messages_processed_total",
            "component" => self.component.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "async_component_processing_duration_seconds",
            "component" => self.component.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a processing failure and the strategy that handled it
    pub fn processing_failed(&self, strategy: FailStrategy, duration: Duration) {
        counter!(
            "async_component_messages_processed_total",
            "component" => self.component.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "async_component_processing_errors_total",
            "component" => self.component.clone(),
            "strategy" => strategy.to_string()
        )
        .increment(1);

        histogram!(
            "async_component_processing_duration_seconds",
            "component" => self.component.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record an ack or nack sent back to the transport
    pub fn message_settled(&self, disposition: Disposition) {
        counter!(
            "async_component_messages_settled_total",
            "component" => self.component.clone(),
            "disposition" => disposition.to_string()
        )
        .increment(1);
    }

    pub fn transport_error(&self) {
        counter!(
            "async_component_transport_errors_total",
            "component" => self.component.clone()
        )
        .increment(1);
    }
}
