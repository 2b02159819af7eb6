//! Request key derivation.
//!
//! Inbound requests must target `/?q=<urlencoded-key>[&extra=params...]`.
//! The decoded `q` value becomes the [`RequestKey`]; every query parameter is
//! additionally exposed to the downstream computation as an auxiliary map.
use std::{borrow::Cow, collections::BTreeMap, fmt};

use super::error::GatewayError;

const KEY_PREFIX: &str = "q=";

/// Canonical identity of a logical request, used for coalescing and caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A request that passed format validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub key: RequestKey,
    /// All query parameters, names prefixed with the configured prefix
    pub params: BTreeMap<String, String>,
}

/// Derives request keys from the raw request target.
#[derive(Debug, Clone, Default)]
pub struct KeyResolver {
    params_prefix: String,
}

impl KeyResolver {
    pub fn new(params_prefix: impl Into<String>) -> Self {
        Self {
            params_prefix: params_prefix.into(),
        }
    }

    /// Validate the request target and extract key plus auxiliary parameters.
    ///
    /// # Errors
    /// * [`GatewayError::MalformedRequest`] if the target is not `/?q=...`
    /// * [`GatewayError::EmptyRequest`] if `q` carries no value
    /// * [`GatewayError::InvalidEncoding`] if a parameter does not percent-decode to UTF-8
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Result<ResolvedRequest, GatewayError> {
        let query = match query {
            Some(query) if path == "/" && query.starts_with(KEY_PREFIX) => query,
            _ => {
                return Err(GatewayError::MalformedRequest {
                    uri: original_uri(path, query),
                });
            }
        };

        if query.len() == KEY_PREFIX.len() {
            return Err(GatewayError::EmptyRequest);
        }

        let mut pairs = Vec::new();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            pairs.push((decode_component(name)?, decode_component(value)?));
        }

        let key = match pairs.first() {
            Some((_, value)) if !value.is_empty() => RequestKey::new(value.clone()),
            _ => return Err(GatewayError::EmptyRequest),
        };

        let params = pairs
            .into_iter()
            .map(|(name, value)| (format!("{}{}", self.params_prefix, name), value))
            .collect();

        Ok(ResolvedRequest { key, params })
    }
}

fn original_uri(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

/// Decode one `application/x-www-form-urlencoded` component.
fn decode_component(raw: &str) -> Result<String, GatewayError> {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };

    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .map_err(|e| GatewayError::InvalidEncoding(format!("{raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_url_encoded_key() {
        let resolver = KeyResolver::default();
        let resolved = resolver
            .resolve("/", Some("q=http%3A%2F%2Fa.com%2Fx"))
            .unwrap();
        assert_eq!(resolved.key.as_str(), "http://a.com/x");
        assert_eq!(resolved.params.get("q").unwrap(), "http://a.com/x");
    }

    #[test]
    fn plus_decodes_to_space() {
        let resolver = KeyResolver::default();
        let resolved = resolver.resolve("/", Some("q=hello+world")).unwrap();
        assert_eq!(resolved.key.as_str(), "hello world");
    }

    #[test]
    fn extra_params_are_prefixed() {
        let resolver = KeyResolver::new("req_");
        let resolved = resolver
            .resolve("/", Some("q=STATE&page=2&lang=en%20US"))
            .unwrap();
        assert_eq!(resolved.key.as_str(), "STATE");
        assert_eq!(resolved.params.get("req_page").unwrap(), "2");
        assert_eq!(resolved.params.get("req_lang").unwrap(), "en US");
        assert_eq!(resolved.params.get("req_q").unwrap(), "STATE");
        assert!(!resolved.params.contains_key("page"));
    }

    #[test]
    fn missing_query_is_malformed() {
        let resolver = KeyResolver::default();
        let err = resolver.resolve("/", None).unwrap_err();
        assert_eq!(err, GatewayError::MalformedRequest { uri: "/".into() });
    }

    #[test]
    fn wrong_parameter_name_is_malformed() {
        let resolver = KeyResolver::default();
        let err = resolver.resolve("/", Some("x=1")).unwrap_err();
        assert_eq!(
            err,
            GatewayError::MalformedRequest {
                uri: "/?x=1".into()
            }
        );
    }

    #[test]
    fn key_must_be_first_parameter() {
        let resolver = KeyResolver::default();
        assert!(matches!(
            resolver.resolve("/", Some("page=1&q=abc")),
            Err(GatewayError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn other_paths_are_malformed() {
        let resolver = KeyResolver::default();
        assert!(matches!(
            resolver.resolve("/api", Some("q=abc")),
            Err(GatewayError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn empty_key_is_rejected() {
        let resolver = KeyResolver::default();
        assert_eq!(
            resolver.resolve("/", Some("q=")).unwrap_err(),
            GatewayError::EmptyRequest
        );
        assert_eq!(
            resolver.resolve("/", Some("q=&page=1")).unwrap_err(),
            GatewayError::EmptyRequest
        );
    }

    #[test]
    fn invalid_utf8_is_an_encoding_error() {
        let resolver = KeyResolver::default();
        assert!(matches!(
            resolver.resolve("/", Some("q=%FF%FE")),
            Err(GatewayError::InvalidEncoding(_))
        ));
    }
}
