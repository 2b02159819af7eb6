use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::{
    config::DispatchConfig,
    core::RoutingTarget,
    ports::dispatcher::{DispatchError, DispatchResult, Dispatcher, Fields, Payload},
};

// Client-facing causes; the transport error with the worker URL is only logged.
const WORKER_UNREACHABLE: &str = "Worker unreachable";
const WORKER_UNREADABLE: &str = "Worker response unreadable";

/// Dispatcher forwarding each payload as JSON to a remote pipeline worker.
///
/// Every routing target maps to one worker URL. The worker answers a `POST`
/// of the payload object with a JSON object of output fields, which are
/// merged over the payload (outputs win) to form the result. Non-2xx answers
/// are domain failures; their body may carry `{"message": .., "cause": ..}`.
pub struct HttpDispatcher {
    client: Client,
    endpoints: HashMap<String, Url>,
}

/// Failure body a worker may return with a non-2xx status.
#[derive(Debug, Deserialize)]
struct WorkerFailure {
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

impl HttpDispatcher {
    /// Create a dispatcher for the configured endpoints.
    ///
    /// # Errors
    /// Fails if an endpoint is not a valid URL or the client cannot be built.
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let endpoints = config
            .endpoints
            .iter()
            .map(|(target, endpoint)| {
                Url::parse(endpoint)
                    .wrap_err_with(|| format!("Invalid endpoint for target '{target}': {endpoint}"))
                    .map(|url| (target.clone(), url))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("dendrite/", env!("CARGO_PKG_VERSION")))
            .build()
            .wrap_err("Failed to build HTTP dispatcher client")?;

        tracing::info!(endpoints = endpoints.len(), "Created HTTP dispatcher");
        Ok(Self { client, endpoints })
    }

    pub fn endpoint(&self, target: &RoutingTarget) -> Option<&Url> {
        self.endpoints.get(target.as_str())
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, target: &RoutingTarget, payload: Payload) -> DispatchResult<Fields> {
        let endpoint = self.endpoint(target).ok_or_else(|| {
            DispatchError::Configuration(format!("No dispatch endpoint for target '{target}'"))
        })?;

        tracing::debug!(%target, %endpoint, "Forwarding payload to worker");
        let response = self
            .client
            .post(endpoint.clone())
            .json(payload.fields())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(%target, %endpoint, error = %e, "Worker request failed");
                DispatchError::Unclassified(WORKER_UNREACHABLE.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            tracing::error!(%target, %endpoint, error = %e, "Worker response unreadable");
            DispatchError::Unclassified(WORKER_UNREADABLE.to_string())
        })?;

        if !status.is_success() {
            return Err(worker_failure(status, &body));
        }

        let outputs: Fields = serde_json::from_str(&body).map_err(|e| {
            DispatchError::Unclassified(format!("Worker answered with invalid JSON object: {e}"))
        })?;

        let mut fields = payload.into_fields();
        fields.extend(outputs);
        Ok(fields)
    }
}

fn worker_failure(status: StatusCode, body: &str) -> DispatchError {
    match serde_json::from_str::<WorkerFailure>(body) {
        Ok(failure) => DispatchError::Domain {
            message: failure.message,
            cause: failure.cause,
        },
        Err(_) if body.is_empty() => DispatchError::Domain {
            message: format!("Worker failed with {status}"),
            cause: None,
        },
        Err(_) => DispatchError::domain(format!("Worker failed with {status}"), body),
    }
}
