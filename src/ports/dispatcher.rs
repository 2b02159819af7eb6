use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::routing::RoutingTarget;

/// Field map exchanged with the pipeline runtime.
pub type Fields = Map<String, Value>;

/// Failure reported by the downstream computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    /// The computation ran and reported a business-logic error
    #[error("{message}")]
    Domain {
        message: String,
        cause: Option<String>,
    },

    /// Anything the computation did not classify (including panics)
    #[error("{0}")]
    Unclassified(String),

    /// The computation was interrupted before it produced a value
    #[error("Computation was interrupted")]
    Interrupted,

    /// The computation could not be set up (missing endpoint, bad template ...)
    #[error("{0}")]
    Configuration(String),
}

impl DispatchError {
    /// Convenience constructor for a domain failure with a nested cause.
    pub fn domain(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain { .. } => "domain",
            Self::Unclassified(_) => "unclassified",
            Self::Interrupted => "interrupted",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Input handed to the downstream computation for one request.
///
/// The gateway starts from the configured base context and adds the request
/// key, POST body and auxiliary query parameters under the configured field
/// names before dispatching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: Fields,
}

impl Payload {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Set a field, replacing any previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Borrow a field as a string, if it is one.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

/// Dispatcher defines the port (interface) to the pipeline runtime.
///
/// The gateway treats the computation as an opaque async boundary: it is
/// invoked at most once per leader and is never cancelled by the gateway.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Run the computation registered for `target` with the given payload.
    ///
    /// # Returns
    /// The resulting field map, from which the gateway renders the configured
    /// result field, or a classified failure.
    async fn dispatch(&self, target: &RoutingTarget, payload: Payload) -> DispatchResult<Fields>;
}
