//! Configuration data structures for Dendrite.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! They are serde-friendly and carry defaults so that a minimal config only
//! needs a routing section. Builders and enums here are part of the public
//! API for embedding.
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Memoize successful results per request key
    #[serde(default)]
    pub cache: bool,
    /// Handle at most one request at a time, in arrival order
    #[serde(default)]
    pub queue: bool,
    /// Upper bound on how long a request waits for its result (humantime, e.g. "30s").
    /// Unset means wait until the computation finishes.
    #[serde(default)]
    pub request_timeout: Option<String>,
    pub routing: RoutingConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    /// Username → password; empty disables authentication
    #[serde(default)]
    pub basic_auth: HashMap<String, String>,
    #[serde(default)]
    pub fields: FieldConfig,
    /// Base payload copied into every dispatch
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Socket address the listener binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .wrap_err_with(|| format!("Invalid listen host '{}'", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Parsed request timeout, `None` if unbounded.
    pub fn request_timeout(&self) -> Result<Option<Duration>> {
        self.request_timeout
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw)
                    .wrap_err_with(|| format!("Invalid request_timeout '{raw}'"))
            })
            .transpose()
    }
}

/// Builder for [`GatewayConfig`], mainly for embedding and tests.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    cache: bool,
    queue: bool,
    request_timeout: Option<String>,
    routing: Option<RoutingConfig>,
    response: Option<ResponseConfig>,
    basic_auth: HashMap<String, String>,
    fields: Option<FieldConfig>,
    context: serde_json::Map<String, serde_json::Value>,
    dispatch: Option<DispatchConfig>,
    logging: Option<LoggingConfig>,
}

impl GatewayConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enable or disable the result cache
    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    /// Enable or disable global request serialization
    pub fn queue(mut self, enabled: bool) -> Self {
        self.queue = enabled;
        self
    }

    /// Bound request waits, e.g. `"500ms"`
    pub fn request_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.request_timeout = Some(timeout.into());
        self
    }

    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn response(mut self, response: ResponseConfig) -> Self {
        self.response = Some(response);
        self
    }

    /// Add a basic auth credential
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth.insert(user.into(), password.into());
        self
    }

    pub fn fields(mut self, fields: FieldConfig) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Add a base context entry
    pub fn context(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(name.into(), value);
        self
    }

    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> Result<GatewayConfig, String> {
        let routing = self
            .routing
            .ok_or_else(|| "routing is required".to_string())?;

        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(default_host),
            port: self.port.unwrap_or_else(default_port),
            cache: self.cache,
            queue: self.queue,
            request_timeout: self.request_timeout,
            routing,
            response: self.response.unwrap_or_default(),
            basic_auth: self.basic_auth,
            fields: self.fields.unwrap_or_default(),
            context: self.context,
            dispatch: self.dispatch.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        })
    }
}

/// Routing mode (tagged enum) deciding which target handles a request key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "mode")]
#[serde(rename_all = "snake_case")]
pub enum RoutingConfig {
    /// Key is a URL; its host name selects the target
    Host { hosts: HashMap<String, String> },
    /// The exact decoded key selects the target
    Literal { requests: HashMap<String, String> },
    /// Every request goes to one target
    Default { target: String },
}

impl RoutingConfig {
    /// Every target label this routing can produce.
    pub fn targets(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = match self {
            RoutingConfig::Host { hosts: table } | RoutingConfig::Literal { requests: table } => {
                table.values().map(String::as_str).collect()
            }
            RoutingConfig::Default { target } => vec![target.as_str()],
        };
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

/// Content type and fixed headers of successful responses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ResponseConfig {
    pub content_type: String,
    pub headers: HashMap<String, String>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            content_type: "text/plain".to_string(),
            headers: HashMap::new(),
        }
    }
}

/// Field names used to build the dispatch payload and read its result.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FieldConfig {
    /// Field of the returned map holding the response body
    pub expected: String,
    /// Field receiving the request key; `None` omits it
    pub put: Option<String>,
    /// Field receiving the POST body; `None` omits it
    pub put_body: Option<String>,
    /// Field receiving the query parameter map; `None` omits it
    pub put_params: Option<String>,
    /// Prefix applied to every query parameter name
    pub params_prefix: String,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            expected: "result".to_string(),
            put: Some("request".to_string()),
            put_body: None,
            put_params: None,
            params_prefix: String::new(),
        }
    }
}

/// Settings of the HTTP dispatcher forwarding payloads to remote workers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-call timeout of a remote worker request
    pub timeout_secs: u64,
    /// Target label → worker URL
    pub endpoints: HashMap<String, String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            endpoints: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = GatewayConfig::builder()
            .routing(RoutingConfig::Default {
                target: "worker".into(),
            })
            .build()
            .unwrap();

        assert_eq!(config.port, 8080);
        assert!(!config.cache);
        assert!(!config.queue);
        assert_eq!(config.response.content_type, "text/plain");
        assert_eq!(config.fields.expected, "result");
        assert_eq!(config.request_timeout().unwrap(), None);
        assert_eq!(
            config.socket_addr().unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn builder_requires_routing() {
        assert!(GatewayConfig::builder().build().is_err());
    }

    #[test]
    fn request_timeout_parses_humantime() {
        let config = GatewayConfig::builder()
            .routing(RoutingConfig::Default {
                target: "worker".into(),
            })
            .request_timeout("1s 500ms")
            .build()
            .unwrap();
        assert_eq!(
            config.request_timeout().unwrap(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn routing_targets_are_deduplicated() {
        let routing = RoutingConfig::Host {
            hosts: [("a.com", "t1"), ("b.com", "t1"), ("c.com", "t2")]
                .into_iter()
                .map(|(h, t)| (h.to_string(), t.to_string()))
                .collect(),
        };
        assert_eq!(routing.targets(), vec!["t1", "t2"]);
    }
}
