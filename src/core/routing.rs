//! Request key → downstream target resolution.
//!
//! Exactly one routing mode is active per gateway, chosen once from
//! configuration. A configured table never falls back to a default target.
use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use url::Url;

use super::{error::GatewayError, resolver::RequestKey};
use crate::config::RoutingConfig;

/// Label of the downstream computation a request is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingTarget(String);

impl RoutingTarget {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing strategy selected at configuration time.
#[derive(Debug, Clone)]
pub enum RoutingTable {
    /// Key is a URL; its host selects the target
    Host(HashMap<String, RoutingTarget>),
    /// The whole decoded key selects the target
    Literal(HashMap<String, RoutingTarget>),
    /// Every request goes to one target
    Default(RoutingTarget),
}

impl RoutingTable {
    /// Build the routing table from configuration. Host names are matched
    /// case-insensitively.
    pub fn from_config(config: &RoutingConfig) -> Self {
        match config {
            RoutingConfig::Host { hosts } => Self::Host(
                hosts
                    .iter()
                    .map(|(host, target)| (host.to_ascii_lowercase(), RoutingTarget::new(target)))
                    .collect(),
            ),
            RoutingConfig::Literal { requests } => Self::Literal(
                requests
                    .iter()
                    .map(|(key, target)| (key.clone(), RoutingTarget::new(target)))
                    .collect(),
            ),
            RoutingConfig::Default { target } => Self::Default(RoutingTarget::new(target)),
        }
    }

    /// Resolve the target for a key.
    ///
    /// # Errors
    /// * [`GatewayError::InvalidEncoding`] if host mode is active and the key is not a URL with a host
    /// * [`GatewayError::Routing`] if the key (or its host) has no mapping
    pub fn resolve(&self, key: &RequestKey) -> Result<RoutingTarget, GatewayError> {
        match self {
            Self::Host(hosts) => {
                let url = Url::parse(key.as_str())
                    .map_err(|e| GatewayError::InvalidEncoding(format!("{key}: {e}")))?;
                let host = url.host_str().ok_or_else(|| {
                    GatewayError::InvalidEncoding(format!("{key}: URL has no host"))
                })?;
                hosts
                    .get(&host.to_ascii_lowercase())
                    .cloned()
                    .ok_or_else(|| GatewayError::Routing(format!("Host mapping not defined: {key}")))
            }
            Self::Literal(requests) => requests
                .get(key.as_str())
                .cloned()
                .ok_or_else(|| GatewayError::Routing(format!("Request mapping not defined: {key}"))),
            Self::Default(target) => Ok(target.clone()),
        }
    }

    /// Every target this table can route to.
    pub fn targets(&self) -> Vec<&RoutingTarget> {
        let mut targets: Vec<&RoutingTarget> = match self {
            Self::Host(table) | Self::Literal(table) => table.values().collect(),
            Self::Default(target) => vec![target],
        };
        targets.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        targets.dedup();
        targets
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Host(_) => "host",
            Self::Literal(_) => "literal",
            Self::Default(_) => "default",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_table() -> RoutingTable {
        RoutingTable::from_config(&RoutingConfig::Host {
            hosts: [("a.com", "T1"), ("B.com", "T2")]
                .into_iter()
                .map(|(h, t)| (h.to_string(), t.to_string()))
                .collect(),
        })
    }

    #[test]
    fn host_mode_routes_by_url_host() {
        let table = host_table();
        let target = table.resolve(&RequestKey::from("http://a.com/x")).unwrap();
        assert_eq!(target.as_str(), "T1");
        let target = table
            .resolve(&RequestKey::from("https://b.com/deep/path?y=1"))
            .unwrap();
        assert_eq!(target.as_str(), "T2");
    }

    #[test]
    fn unmapped_host_is_a_routing_failure() {
        let table = host_table();
        let err = table
            .resolve(&RequestKey::from("http://c.com/x"))
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Routing("Host mapping not defined: http://c.com/x".into())
        );
    }

    #[test]
    fn host_mode_rejects_non_urls() {
        let table = host_table();
        assert!(matches!(
            table.resolve(&RequestKey::from("not a url")),
            Err(GatewayError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn literal_mode_requires_exact_key() {
        let table = RoutingTable::from_config(&RoutingConfig::Literal {
            requests: [("STATE".to_string(), "getElapsedErrorTime".to_string())]
                .into_iter()
                .collect(),
        });
        assert_eq!(
            table.resolve(&RequestKey::from("STATE")).unwrap().as_str(),
            "getElapsedErrorTime"
        );
        assert!(matches!(
            table.resolve(&RequestKey::from("state")),
            Err(GatewayError::Routing(_))
        ));
    }

    #[test]
    fn default_mode_routes_everything() {
        let table = RoutingTable::from_config(&RoutingConfig::Default {
            target: "worker".to_string(),
        });
        assert_eq!(
            table.resolve(&RequestKey::from("anything")).unwrap().as_str(),
            "worker"
        );
        assert_eq!(table.targets().len(), 1);
    }
}
