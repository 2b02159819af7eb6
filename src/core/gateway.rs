//! Core gateway orchestration service.
//!
//! `GatewayService` owns everything a request needs besides the transport:
//! the serialization gate, key resolver, routing table, coalescing
//! coordinator and the dispatcher handle. One call to
//! [`GatewayService::handle`] runs the whole pipeline:
//!
//! gate → key resolution → routing → acquire → (cached | lead | follow) → render
//!
//! A leader's computation runs in its own task which always releases the
//! leadership, so a request that times out (or whose client disconnects)
//! never strands its followers.
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::Instrument;

use crate::{
    config::GatewayConfig,
    core::{
        coordinator::{Acquire, Coordinator, Flight},
        error::GatewayError,
        gate::SerializationGate,
        resolver::{KeyResolver, ResolvedRequest},
        routing::{RoutingTable, RoutingTarget},
    },
    metrics::{self, DispatchTimer},
    ports::dispatcher::{DispatchError, Dispatcher, Fields, Payload},
    tracing_setup,
};

/// Transport-neutral view of an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    pub path: String,
    pub query: Option<String>,
    /// POST body, if any
    pub body: Option<String>,
}

impl InboundRequest {
    pub fn get(path: impl Into<String>, query: Option<&str>) -> Self {
        Self {
            path: path.into(),
            query: query.map(str::to_string),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, query: Option<&str>, body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::get(path, query)
        }
    }
}

/// Central orchestrator for coalescing, caching and dispatching requests.
///
/// Construct with [`GatewayService::new`]; share it behind an `Arc`.
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    resolver: KeyResolver,
    routing: RoutingTable,
    coordinator: Arc<Coordinator>,
    gate: SerializationGate,
    dispatcher: Arc<dyn Dispatcher>,
    context: ArcSwap<Fields>,
    request_timeout: Option<Duration>,
}

impl GatewayService {
    /// Build the service from validated configuration.
    ///
    /// # Errors
    /// Fails if `request_timeout` is not a valid duration.
    pub fn new(config: Arc<GatewayConfig>, dispatcher: Arc<dyn Dispatcher>) -> eyre::Result<Self> {
        let request_timeout = config.request_timeout()?;
        let routing = RoutingTable::from_config(&config.routing);

        tracing::info!(
            mode = routing.mode(),
            targets = routing.targets().len(),
            cache = config.cache,
            queue = config.queue,
            timeout = ?request_timeout,
            "Gateway service configured"
        );

        Ok(Self {
            resolver: KeyResolver::new(config.fields.params_prefix.clone()),
            routing,
            coordinator: Arc::new(Coordinator::new(config.cache)),
            gate: SerializationGate::new(config.queue),
            dispatcher,
            context: ArcSwap::from_pointee(config.context.clone()),
            request_timeout,
            config,
        })
    }

    /// Handle one request inside the serialization gate and produce the
    /// rendered result.
    ///
    /// Failures are logged here at the severity of their class; the caller
    /// only translates them.
    pub async fn handle(&self, request: InboundRequest) -> Result<Arc<str>, GatewayError> {
        let _pass = self.gate.enter().await;
        self.process(request).await
    }

    /// Like [`GatewayService::handle`], but without entering the gate.
    ///
    /// For transports that hold the [`SerializationGate`] pass themselves so
    /// the critical section also covers reading the body and writing the
    /// response.
    pub async fn process(&self, request: InboundRequest) -> Result<Arc<str>, GatewayError> {
        let resolved = match self
            .resolver
            .resolve(&request.path, request.query.as_deref())
        {
            Ok(resolved) => resolved,
            Err(e) => {
                e.log(None);
                return Err(e);
            }
        };

        let key = resolved.key.clone();
        let result = self.coalesce(resolved, request.body).await;
        if let Err(e) = &result {
            e.log(Some(key.as_str()));
        }
        result
    }

    /// Replace the base payload copied into every dispatch.
    pub fn set_context(&self, context: Fields) {
        self.context.store(Arc::new(context));
    }

    pub fn context(&self) -> Arc<Fields> {
        self.context.load_full()
    }

    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn gate(&self) -> &SerializationGate {
        &self.gate
    }

    async fn coalesce(
        &self,
        resolved: ResolvedRequest,
        body: Option<String>,
    ) -> Result<Arc<str>, GatewayError> {
        // Routing failures must never touch the in-flight set.
        let target = self.routing.resolve(&resolved.key)?;
        let deadline = self.request_timeout.map(|limit| Instant::now() + limit);

        loop {
            match self.coordinator.acquire(&resolved.key).await {
                Acquire::Cached(value) => return Ok(value),
                Acquire::Leader(flight) => {
                    let payload = self.payload(&resolved, body);
                    return self.lead(flight, target, payload, deadline).await;
                }
                Acquire::Follower(waiter) => waiter
                    .wait(self.remaining(deadline))
                    .await
                    .map_err(|_| self.timeout_error())?,
            }
        }
    }

    /// Run the computation as leader and wait for it, bounded by `deadline`.
    async fn lead(
        &self,
        flight: Flight,
        target: RoutingTarget,
        payload: Payload,
        deadline: Option<Instant>,
    ) -> Result<Arc<str>, GatewayError> {
        let coordinator = Arc::clone(&self.coordinator);
        let dispatcher = Arc::clone(&self.dispatcher);
        let expected = self.config.fields.expected.clone();
        let span = tracing_setup::create_dispatch_span(target.as_str(), flight.key().as_str());

        let computation = tokio::spawn(
            async move {
                let timer = DispatchTimer::new(target.as_str());
                let outcome = AssertUnwindSafe(dispatcher.dispatch(&target, payload))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(DispatchError::Unclassified(panic_message(&*panic))))
                    .map(|fields| render_result(&fields, &expected));

                coordinator.release(flight, outcome.as_ref().ok()).await;

                let kind = outcome.as_ref().err().map_or("ok", DispatchError::kind);
                let span = tracing::Span::current();
                span.record("dispatch.outcome", kind);
                span.record("duration_ms", timer.elapsed().as_millis() as u64);
                metrics::increment_dispatch_total(target.as_str(), kind);
                tracing::debug!("Computation finished");
                outcome
            }
            .instrument(span),
        );

        // Dropping the handle on timeout detaches the task; it still releases.
        let joined = match self.remaining(deadline) {
            Some(limit) => tokio::time::timeout(limit, computation)
                .await
                .map_err(|_| self.timeout_error())?,
            None => computation.await,
        };

        match joined {
            Ok(outcome) => outcome.map_err(GatewayError::from),
            Err(e) if e.is_cancelled() => Err(DispatchError::Interrupted.into()),
            Err(e) => Err(DispatchError::Unclassified(e.to_string()).into()),
        }
    }

    fn payload(&self, resolved: &ResolvedRequest, body: Option<String>) -> Payload {
        let fields = &self.config.fields;
        let mut payload = Payload::new(Fields::clone(&self.context.load_full()));

        if let Some(put) = &fields.put {
            payload.insert(put, resolved.key.as_str());
        }
        if let (Some(put_body), Some(body)) = (&fields.put_body, body) {
            payload.insert(put_body, body);
        }
        if let Some(put_params) = &fields.put_params {
            let params: Fields = resolved
                .params
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect();
            payload.insert(put_params, Value::Object(params));
        }

        payload
    }

    fn remaining(&self, deadline: Option<Instant>) -> Option<Duration> {
        deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn timeout_error(&self) -> GatewayError {
        GatewayError::Timeout(self.request_timeout.unwrap_or_default())
    }
}

/// Render the configured result field of a finished computation.
///
/// Strings are written verbatim, a missing or `null` field renders as
/// `null`, anything else as its JSON text.
pub fn render_result(fields: &Fields, expected: &str) -> Arc<str> {
    match fields.get(expected) {
        Some(Value::String(text)) => Arc::from(text.as_str()),
        None | Some(Value::Null) => Arc::from("null"),
        Some(other) => Arc::from(other.to_string()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("computation panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("computation panicked: {message}")
    } else {
        "computation panicked".to_string()
    }
}

impl std::fmt::Debug for GatewayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayService")
            .field("routing", &self.routing.mode())
            .field("cache", &self.coordinator.cache_enabled())
            .field("queue", &self.gate.is_enabled())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
