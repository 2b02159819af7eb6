use std::net::IpAddr;

use axum::http::{HeaderName, HeaderValue};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::models::{FieldConfig, GatewayConfig, ResponseConfig, RoutingConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

static HOSTNAME: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$",
    )
});

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem at once
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.host, config.port) {
            errors.push(e);
        }

        if let Some(raw) = &config.request_timeout {
            if let Err(e) = humantime::parse_duration(raw) {
                errors.push(ValidationError::InvalidField {
                    field: "request_timeout".to_string(),
                    message: format!("'{raw}' is not a duration: {e}"),
                });
            }
        }

        errors.extend(Self::validate_routing(&config.routing));
        errors.extend(Self::validate_response(&config.response));
        errors.extend(Self::validate_fields(&config.fields));

        for user in config.basic_auth.keys() {
            if user.is_empty() || user.contains(':') {
                errors.push(ValidationError::InvalidField {
                    field: "basic_auth".to_string(),
                    message: format!("Invalid user name '{user}': must be non-empty without ':'"),
                });
            }
        }

        if !config.dispatch.endpoints.is_empty() {
            for target in config.routing.targets() {
                match config.dispatch.endpoints.get(target) {
                    Some(endpoint) => {
                        if let Err(e) =
                            Self::validate_url(endpoint, &format!("dispatch endpoint '{target}'"))
                        {
                            errors.push(e);
                        }
                    }
                    None => errors.push(ValidationError::MissingField {
                        field: format!("dispatch.endpoints.{target}"),
                    }),
                }
            }
        }

        if config.dispatch.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "dispatch.timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(host: &str, port: u16) -> ValidationResult<()> {
        if host.parse::<IpAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: format!("{host}:{port}"),
                reason: "Host must be an IP address (e.g., '127.0.0.1' or '0.0.0.0')".to_string(),
            });
        }
        if port == 0 {
            return Err(ValidationError::InvalidListenAddress {
                address: format!("{host}:{port}"),
                reason: "Port must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_routing(routing: &RoutingConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match routing {
            RoutingConfig::Host { hosts } => {
                if hosts.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "routing.hosts".to_string(),
                    });
                }
                for (host, target) in hosts {
                    if let Err(e) = Self::validate_host(host) {
                        errors.push(e);
                    }
                    if target.is_empty() {
                        errors.push(ValidationError::InvalidField {
                            field: format!("routing.hosts.{host}"),
                            message: "Target label cannot be empty".to_string(),
                        });
                    }
                }
            }
            RoutingConfig::Literal { requests } => {
                if requests.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "routing.requests".to_string(),
                    });
                }
                for (request, target) in requests {
                    if target.is_empty() {
                        errors.push(ValidationError::InvalidField {
                            field: format!("routing.requests.{request}"),
                            message: "Target label cannot be empty".to_string(),
                        });
                    }
                }
            }
            RoutingConfig::Default { target } => {
                if target.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "routing.target".to_string(),
                    });
                }
            }
        }

        errors
    }

    fn validate_response(response: &ResponseConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if HeaderValue::from_str(&response.content_type).is_err() || response.content_type.is_empty()
        {
            errors.push(ValidationError::InvalidField {
                field: "response.content_type".to_string(),
                message: format!("Invalid content type '{}'", response.content_type),
            });
        }

        for (name, value) in &response.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: "response.headers".to_string(),
                    message: format!("Invalid header name '{name}'"),
                });
            }
            if HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("response.headers.{name}"),
                    message: format!("Invalid header value '{value}'"),
                });
            }
        }

        errors
    }

    fn validate_fields(fields: &FieldConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if fields.expected.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "fields.expected".to_string(),
            });
        }

        let named = [
            ("fields.put", &fields.put),
            ("fields.put_body", &fields.put_body),
            ("fields.put_params", &fields.put_params),
        ];
        for (field, name) in named {
            if name.as_deref() == Some("") {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Field name cannot be empty; omit it instead".to_string(),
                });
            }
        }

        errors
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_host(host: &str) -> ValidationResult<()> {
        let field = format!("routing.hosts.{host}");

        if host.is_empty() {
            return Err(ValidationError::InvalidField {
                field,
                message: "Host cannot be empty".to_string(),
            });
        }

        if host.contains("://") {
            return Err(ValidationError::InvalidField {
                field,
                message: "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')".to_string(),
            });
        }

        let hostname = HOSTNAME.as_ref().map_err(|e| ValidationError::ValidationFailed {
            message: format!("hostname pattern failed to compile: {e}"),
        })?;
        if !hostname.is_match(host) {
            return Err(ValidationError::InvalidField {
                field,
                message: format!("Invalid hostname format: '{host}'"),
            });
        }

        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
