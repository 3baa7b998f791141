//! Component configuration.
//!
//! [`ComponentBuilder`] collects the configuration and validates it in one
//! pass; [`ComponentSettings`] loads the scalar parts from the environment.

use crate::component::Component;
use crate::consumer::ConsumerFactory;
use crate::error::{ComponentError, ConfigErrors, ConfigViolation, SettingsError};
use crate::metrics::ComponentMetrics;
use crate::processor::Processor;
use crate::strategy::FailStrategy;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Scalar component settings, usually loaded with [`ComponentSettings::from_env`].
///
/// The strategy and retry wait are kept in their raw form so that bad values
/// are reported by [`ComponentBuilder::build`] together with every other violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSettings {
    pub name: String,
    pub fail_strategy: String,
    pub retries: u32,
    pub retry_wait_ms: i64,
}

impl ComponentSettings {
    /// Load settings from `{PREFIX}_NAME`, `{PREFIX}_FAIL_STRATEGY`,
    /// `{PREFIX}_RETRIES` and `{PREFIX}_RETRY_WAIT_MS`.
    ///
    /// Defaults: name is the lowercased prefix, strategy `nack_exit`,
    /// no retries, no wait.
    pub fn from_env(prefix: &str) -> Result<Self, SettingsError> {
        let name = env::var(format!("{prefix}_NAME"))
            .unwrap_or_else(|_| prefix.to_lowercase().replace('_', "-"));
        let fail_strategy = env::var(format!("{prefix}_FAIL_STRATEGY"))
            .unwrap_or_else(|_| FailStrategy::default().to_string());

        Ok(Self {
            name,
            fail_strategy,
            retries: parse_env(&format!("{prefix}_RETRIES"), 0)?,
            retry_wait_ms: parse_env(&format!("{prefix}_RETRY_WAIT_MS"), 0)?,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| SettingsError::Parse {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Builder for [`Component`].
///
/// # Example
///
/// ```rust,ignore
/// let component = Component::builder("orders")
///     .with_processor(OrderProcessor::new(repo))
///     .with_consumer_factory(KafkaConsumerFactory::new(brokers, "orders"))
///     .with_fail_strategy(FailStrategy::Nack)
///     .with_retries(3)
///     .with_retry_wait(Duration::from_secs(1))
///     .build()?;
/// ```
pub struct ComponentBuilder {
    name: String,
    processor: Option<Arc<dyn Processor>>,
    consumer_factory: Option<Arc<dyn ConsumerFactory>>,
    fail_strategy: Result<FailStrategy, String>,
    retries: u32,
    retry_wait: Result<Duration, i64>,
}

impl ComponentBuilder {
    /// Create a builder with default strategy (`nack_exit`), no retries and no wait.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processor: None,
            consumer_factory: None,
            fail_strategy: Ok(FailStrategy::default()),
            retries: 0,
            retry_wait: Ok(Duration::ZERO),
        }
    }

    /// Create a builder from loaded settings. Processor and factory still need to be set.
    pub fn from_settings(settings: &ComponentSettings) -> Self {
        Self::new(settings.name.clone())
            .with_fail_strategy_name(&settings.fail_strategy)
            .with_retries(settings.retries)
            .with_retry_wait_ms(settings.retry_wait_ms)
    }

    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn with_shared_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_consumer_factory(mut self, factory: impl ConsumerFactory + 'static) -> Self {
        self.consumer_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_shared_consumer_factory(mut self, factory: Arc<dyn ConsumerFactory>) -> Self {
        self.consumer_factory = Some(factory);
        self
    }

    pub fn with_fail_strategy(mut self, strategy: FailStrategy) -> Self {
        self.fail_strategy = Ok(strategy);
        self
    }

    /// Set the strategy by name (`nack_exit`, `nack`, `ack`).
    /// Unknown names are reported by `build`.
    pub fn with_fail_strategy_name(mut self, name: &str) -> Self {
        self.fail_strategy = name.trim().parse().map_err(|_| name.to_string());
        self
    }

    /// Additional consumer creation attempts after the first one.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = Ok(wait);
        self
    }

    /// Set the retry wait in milliseconds. Negative values are reported by `build`.
    pub fn with_retry_wait_ms(mut self, wait_ms: i64) -> Self {
        self.retry_wait = u64::try_from(wait_ms)
            .map(Duration::from_millis)
            .map_err(|_| wait_ms);
        self
    }

    /// Validate every field and build the component.
    ///
    /// All violations are returned together in [`ComponentError::Config`].
    pub fn build(self) -> Result<Component, ComponentError> {
        let mut violations = Vec::new();

        if self.name.is_empty() {
            violations.push(ConfigViolation::MissingName);
        }
        if self.processor.is_none() {
            violations.push(ConfigViolation::MissingProcessor);
        }
        if self.consumer_factory.is_none() {
            violations.push(ConfigViolation::MissingConsumerFactory);
        }
        if let Err(name) = &self.fail_strategy {
            violations.push(ConfigViolation::InvalidStrategy(name.clone()));
        }
        if let Err(wait_ms) = self.retry_wait {
            violations.push(ConfigViolation::NegativeRetryWait(wait_ms));
        }

        match (
            self.processor,
            self.consumer_factory,
            self.fail_strategy,
            self.retry_wait,
        ) {
            (Some(processor), Some(consumer_factory), Ok(fail_strategy), Ok(retry_wait))
                if violations.is_empty() =>
            {
                Ok(Component {
                    metrics: ComponentMetrics::new(&self.name),
                    name: self.name,
                    processor,
                    consumer_factory,
                    fail_strategy,
                    retries: self.retries,
                    retry_wait,
                })
            }
            _ => Err(ConfigErrors::new(violations).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MockConsumerFactory;
    use crate::error::BoxError;
    use crate::processor::processor_fn;

    fn noop() -> impl Processor {
        processor_fn(|_| Box::pin(async { Ok::<(), BoxError>(()) }))
    }

    fn violations(result: Result<Component, ComponentError>) -> Vec<ConfigViolation> {
        match result {
            Err(ComponentError::Config(errors)) => errors.violations().to_vec(),
            Err(other) => panic!("expected config error, got {other}"),
            Ok(_) => panic!("expected config error, got a component"),
        }
    }

    #[test]
    fn test_build_success_with_defaults() {
        let component = ComponentBuilder::new("name")
            .with_processor(noop())
            .with_consumer_factory(MockConsumerFactory::new())
            .build()
            .unwrap();

        assert_eq!(component.name(), "name");
        assert_eq!(component.fail_strategy(), FailStrategy::NackExit);
        assert_eq!(component.retries(), 0);
        assert_eq!(component.retry_wait(), Duration::ZERO);
    }

    #[test]
    fn test_missing_name() {
        let result = ComponentBuilder::new("")
            .with_processor(noop())
            .with_consumer_factory(MockConsumerFactory::new())
            .build();
        assert_eq!(violations(result), vec![ConfigViolation::MissingName]);
    }

    #[test]
    fn test_missing_processor() {
        let result = ComponentBuilder::new("name")
            .with_consumer_factory(MockConsumerFactory::new())
            .build();
        assert_eq!(violations(result), vec![ConfigViolation::MissingProcessor]);
    }

    #[test]
    fn test_missing_consumer_factory() {
        let result = ComponentBuilder::new("name").with_processor(noop()).build();
        assert_eq!(violations(result), vec![ConfigViolation::MissingConsumerFactory]);
    }

    #[test]
    fn test_invalid_fail_strategy() {
        let result = ComponentBuilder::new("name")
            .with_processor(noop())
            .with_consumer_factory(MockConsumerFactory::new())
            .with_fail_strategy_name("3")
            .build();
        assert_eq!(
            violations(result),
            vec![ConfigViolation::InvalidStrategy("3".to_string())]
        );
    }

    #[test]
    fn test_negative_retry_wait() {
        let result = ComponentBuilder::new("name")
            .with_processor(noop())
            .with_consumer_factory(MockConsumerFactory::new())
            .with_retry_wait_ms(-2)
            .build();
        assert_eq!(violations(result), vec![ConfigViolation::NegativeRetryWait(-2)]);
    }

    #[test]
    fn test_all_violations_reported_together() {
        let result = ComponentBuilder::new("")
            .with_fail_strategy_name("sometimes")
            .with_retry_wait_ms(-1)
            .build();

        assert_eq!(
            violations(result),
            vec![
                ConfigViolation::MissingName,
                ConfigViolation::MissingProcessor,
                ConfigViolation::MissingConsumerFactory,
                ConfigViolation::InvalidStrategy("sometimes".to_string()),
                ConfigViolation::NegativeRetryWait(-1),
            ]
        );
    }

    #[test]
    fn test_later_valid_value_replaces_invalid_one() {
        let component = ComponentBuilder::new("name")
            .with_processor(noop())
            .with_consumer_factory(MockConsumerFactory::new())
            .with_fail_strategy_name("bogus")
            .with_fail_strategy(FailStrategy::Ack)
            .with_retry_wait_ms(-5)
            .with_retry_wait(Duration::from_millis(5))
            .build()
            .unwrap();

        assert_eq!(component.fail_strategy(), FailStrategy::Ack);
        assert_eq!(component.retry_wait(), Duration::from_millis(5));
    }

    #[test]
    fn test_builder_pattern() {
        let component = ComponentBuilder::new("orders")
            .with_processor(noop())
            .with_consumer_factory(MockConsumerFactory::new())
            .with_fail_strategy_name("Nack")
            .with_retries(3)
            .with_retry_wait_ms(2)
            .build()
            .unwrap();

        assert_eq!(component.fail_strategy(), FailStrategy::Nack);
        assert_eq!(component.retries(), 3);
        assert_eq!(component.retry_wait(), Duration::from_millis(2));
    }

    #[test]
    fn test_shared_collaborators_are_not_copied() {
        let processor: Arc<dyn Processor> = Arc::new(noop());
        let factory: Arc<dyn ConsumerFactory> = Arc::new(MockConsumerFactory::new());

        let first = ComponentBuilder::new("first")
            .with_shared_processor(Arc::clone(&processor))
            .with_shared_consumer_factory(Arc::clone(&factory))
            .build()
            .unwrap();
        let second = ComponentBuilder::new("second")
            .with_shared_processor(Arc::clone(&processor))
            .with_shared_consumer_factory(Arc::clone(&factory))
            .build()
            .unwrap();

        assert!(Arc::ptr_eq(&first.processor, &second.processor));
        assert!(Arc::ptr_eq(&first.consumer_factory, &factory));
        assert_eq!(Arc::strong_count(&processor), 3);
        assert_eq!(Arc::strong_count(&factory), 3);
    }

    #[test]
    fn test_settings_from_env_defaults() {
        temp_env::with_vars_unset(
            [
                "ORDERS_CONSUMER_NAME",
                "ORDERS_CONSUMER_FAIL_STRATEGY",
                "ORDERS_CONSUMER_RETRIES",
                "ORDERS_CONSUMER_RETRY_WAIT_MS",
            ],
            || {
                let settings = ComponentSettings::from_env("ORDERS_CONSUMER").unwrap();
                assert_eq!(settings.name, "orders-consumer");
                assert_eq!(settings.fail_strategy, "nack_exit");
                assert_eq!(settings.retries, 0);
                assert_eq!(settings.retry_wait_ms, 0);
            },
        );
    }

    #[test]
    fn test_settings_from_env_values() {
        temp_env::with_vars(
            [
                ("BILLING_NAME", Some("billing")),
                ("BILLING_FAIL_STRATEGY", Some("ack")),
                ("BILLING_RETRIES", Some("3")),
                ("BILLING_RETRY_WAIT_MS", Some("250")),
            ],
            || {
                let settings = ComponentSettings::from_env("BILLING").unwrap();
                assert_eq!(
                    settings,
                    ComponentSettings {
                        name: "billing".to_string(),
                        fail_strategy: "ack".to_string(),
                        retries: 3,
                        retry_wait_ms: 250,
                    }
                );
            },
        );
    }

    #[test]
    fn test_settings_from_env_parse_error() {
        temp_env::with_var("BROKEN_RETRIES", Some("many"), || {
            let err = ComponentSettings::from_env("BROKEN").unwrap_err();
            assert!(err.to_string().contains("BROKEN_RETRIES"));
        });
    }

    #[test]
    fn test_settings_bad_values_surface_in_build() {
        let settings = ComponentSettings {
            name: "billing".to_string(),
            fail_strategy: "retry_forever".to_string(),
            retries: 1,
            retry_wait_ms: -10,
        };

        let result = ComponentBuilder::from_settings(&settings)
            .with_processor(noop())
            .with_consumer_factory(MockConsumerFactory::new())
            .build();

        assert_eq!(
            violations(result),
            vec![
                ConfigViolation::InvalidStrategy("retry_forever".to_string()),
                ConfigViolation::NegativeRetryWait(-10),
            ]
        );
    }
}
