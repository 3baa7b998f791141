//! Error types for the component, its configuration and its collaborators.
//!
//! Every path out of [`Component::run`](crate::Component::run) other than a
//! shutdown request surfaces one of the [`ComponentError`] variants below.

use crate::message::Disposition;
use std::fmt;
use thiserror::Error;

/// Boxed error used at collaborator boundaries (factories, consumers, messages, processors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single precondition violated while building a component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigViolation {
    #[error("component name is required")]
    MissingName,

    #[error("processor is required")]
    MissingProcessor,

    #[error("consumer factory is required")]
    MissingConsumerFactory,

    #[error("invalid fail strategy '{0}'")]
    InvalidStrategy(String),

    #[error("retry wait must be non-negative, got {0}ms")]
    NegativeRetryWait(i64),
}

/// All violations reported by one `build` call, in the order they were checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors(Vec<ConfigViolation>);

impl ConfigErrors {
    pub(crate) fn new(violations: Vec<ConfigViolation>) -> Self {
        Self(violations)
    }

    pub fn violations(&self) -> &[ConfigViolation] {
        &self.0
    }

    pub fn contains(&self, violation: &ConfigViolation) -> bool {
        self.0.contains(violation)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Errors returned by component construction and by the run loop.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// One or more configuration preconditions failed
    #[error("invalid component configuration: {0}")]
    Config(ConfigErrors),

    /// The consumer factory kept failing until the retry budget ran out
    #[error("failed to create consumer after {attempts} attempt(s): {source}")]
    Acquisition {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// The consumer refused to start consuming
    #[error("failed to start consuming: {0}")]
    Consume(#[source] BoxError),

    /// The consumer reported an error on its error stream
    #[error("an error occurred during message consumption: {0}")]
    Transport(#[source] BoxError),

    /// The processor failed under the `nack_exit` strategy
    #[error("message processing failed: {0}")]
    Processing(#[source] BoxError),

    /// Acknowledging or rejecting a message failed
    #[error("failed to {disposition} message: {source}")]
    Acknowledge {
        disposition: Disposition,
        #[source]
        source: BoxError,
    },

    /// The consumer's message stream ended while the component was running
    #[error("consumer message stream closed")]
    StreamClosed,
}

impl ComponentError {
    /// The aggregated violations, if this is a configuration error.
    pub fn config_errors(&self) -> Option<&ConfigErrors> {
        match self {
            ComponentError::Config(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ConfigErrors> for ComponentError {
    fn from(errors: ConfigErrors) -> Self {
        ComponentError::Config(errors)
    }
}

/// Errors raised while loading [`ComponentSettings`](crate::ComponentSettings) from the environment.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to parse environment variable '{key}': {details}")]
    Parse { key: String, details: String },
}
