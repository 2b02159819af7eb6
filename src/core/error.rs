//! Client-facing failure taxonomy and the JSON error envelope.
//!
//! Every failure a request can run into is a [`GatewayError`]. The HTTP
//! adapter turns it into a status code plus an [`ErrorEnvelope`] body; this
//! module stays free of any transport types beyond the status code.
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::ports::dispatcher::DispatchError;

/// Errors surfaced to the client of the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    /// Request target is not of the form `/?q=...`
    #[error("Malformed request: {uri}")]
    MalformedRequest { uri: String },

    /// `q` was present but empty
    #[error("Empty request")]
    EmptyRequest,

    /// Percent-decoding failed or the key is not a valid URL in host mode
    #[error("{0}")]
    InvalidEncoding(String),

    /// The key has no entry in the configured routing table
    #[error("{0}")]
    Routing(String),

    /// The downstream computation failed
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// No result within the configured request timeout
    #[error("No result after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    /// HTTP status code for this failure class.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest { .. }
            | Self::EmptyRequest
            | Self::InvalidEncoding(_)
            | Self::Routing(_) => StatusCode::BAD_REQUEST,
            Self::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Failure class name reported in the `exception` field.
    pub fn exception(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } | Self::EmptyRequest => "MalformedRequest",
            Self::InvalidEncoding(_) => "InvalidEncoding",
            Self::Routing(_) => "RoutingFailure",
            Self::Dispatch(DispatchError::Domain { .. }) => "DomainFailure",
            Self::Dispatch(DispatchError::Unclassified(_)) => "UnclassifiedFailure",
            Self::Dispatch(DispatchError::Interrupted) => "Interrupted",
            Self::Dispatch(DispatchError::Configuration(_)) => "ConfigurationFailure",
            Self::Timeout(_) => "Timeout",
        }
    }

    /// Human readable description of the failure class.
    pub fn description(&self) -> String {
        match self {
            Self::MalformedRequest { uri } => {
                format!("Invalid request format. Expected '/?q=...', got {uri}")
            }
            Self::EmptyRequest => "Empty request".to_string(),
            Self::InvalidEncoding(message) => format!(
                "Request was not encoded correctly or host is not valid! {message}"
            ),
            Self::Routing(message) => format!("Bad request: {message}"),
            Self::Dispatch(DispatchError::Domain { message, cause }) => match cause {
                Some(cause) => format!("Error during request execution. {message}: {cause}"),
                None => format!("Error during request execution. {message}"),
            },
            Self::Dispatch(DispatchError::Unclassified(_)) => {
                "Error during request execution, unknown cause.".to_string()
            }
            Self::Dispatch(DispatchError::Interrupted) => {
                "Request was interrupted on server side!".to_string()
            }
            Self::Dispatch(DispatchError::Configuration(_)) => {
                "Severe gateway definition error.".to_string()
            }
            Self::Timeout(after) => format!(
                "Request did not complete within {}",
                humantime::format_duration(*after)
            ),
        }
    }

    /// Build the JSON body sent to the client.
    ///
    /// Configuration failures expose nothing beyond the description.
    pub fn envelope(&self) -> ErrorEnvelope {
        let message = match self {
            Self::Dispatch(DispatchError::Configuration(_)) => None,
            other => Some(other.to_string()),
        };
        ErrorEnvelope {
            exception: self.exception(),
            message,
            description: self.description(),
        }
    }

    /// Emit a log line at the severity this failure class deserves.
    pub fn log(&self, key: Option<&str>) {
        let key = key.unwrap_or("-");
        match self {
            Self::MalformedRequest { .. } | Self::EmptyRequest => {
                tracing::debug!(key, "Rejected malformed request: {}", self)
            }
            Self::InvalidEncoding(message) => tracing::info!(
                key,
                "Request not encoded properly or not a valid host: {}",
                message
            ),
            Self::Routing(message) => tracing::warn!(key, "Received unknown request: {}", message),
            Self::Dispatch(DispatchError::Domain { message, cause }) => tracing::warn!(
                key,
                "{}; {}",
                message,
                cause.as_deref().unwrap_or("no cause")
            ),
            Self::Dispatch(DispatchError::Unclassified(detail)) => tracing::error!(
                key,
                error = ?self,
                "Unexpected failure inside the downstream computation: {}",
                detail
            ),
            Self::Dispatch(DispatchError::Interrupted) => {
                tracing::warn!(key, "Request interrupted on server side")
            }
            Self::Dispatch(DispatchError::Configuration(detail)) => {
                tracing::error!(key, "Failed to set up the downstream computation: {}", detail)
            }
            Self::Timeout(after) => tracing::warn!(
                key,
                "Request timed out after {}",
                humantime::format_duration(*after)
            ),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub exception: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub description: String,
}

impl ErrorEnvelope {
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"description":"{}"}}"#, self.description.escape_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_request_is_bad_request() {
        let err = GatewayError::MalformedRequest {
            uri: "/?x=1".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.description(),
            "Invalid request format. Expected '/?q=...', got /?x=1"
        );
    }

    #[test]
    fn domain_failure_includes_cause() {
        let err = GatewayError::from(DispatchError::domain("scrape failed", "404 from origin"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = err.envelope();
        assert_eq!(envelope.exception, "DomainFailure");
        assert!(envelope.description.contains("404 from origin"));
    }

    #[test]
    fn unclassified_failure_is_generic() {
        let err = GatewayError::from(DispatchError::Unclassified("index out of bounds".into()));
        let envelope = err.envelope();
        assert_eq!(
            envelope.description,
            "Error during request execution, unknown cause."
        );
        assert_eq!(envelope.message.as_deref(), Some("index out of bounds"));
    }

    #[test]
    fn configuration_failure_hides_detail() {
        let err = GatewayError::from(DispatchError::Configuration("no endpoint for t9".into()));
        let json = err.envelope().to_json();
        assert!(!json.contains("t9"));
        assert!(json.contains("\"description\""));
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = GatewayError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.exception(), "Timeout");
    }
}
