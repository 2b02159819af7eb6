//! Dendrite - a coalescing HTTP gateway in front of an asynchronous pipeline.
//!
//! Dendrite accepts `GET`/`POST` requests of the form `/?q=<key>`, routes
//! each key to a downstream computation and returns that computation's
//! result as the response body. Identical concurrent requests are coalesced
//! so at most one computation per key runs at a time.
//!
//! # Features
//! - Single-flight execution per request key with broadcast wake-up of waiters
//! - Optional unbounded memoization of successful results
//! - Optional global serialization of all requests in arrival order
//! - Host, literal or default routing of keys to downstream targets
//! - Structured JSON error envelopes with per-class status codes
//! - Optional request timeout (504) that never strands other waiters
//! - HTTP Basic authentication, fixed response headers, permissive CORS
//! - Pluggable [`ports::Dispatcher`]; [`adapters::HttpDispatcher`] forwards to remote workers
//! - Metrics via the `metrics` facade & structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use dendrite::{
//!     GatewayService,
//!     adapters::{GatewayServer, HttpDispatcher},
//!     utils::GracefulShutdown,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = Arc::new(dendrite::config::loader::load_config("config.toml").await?);
//! let dispatcher = Arc::new(HttpDispatcher::new(&cfg.dispatch)?);
//! let gateway = Arc::new(GatewayService::new(cfg, dispatcher)?);
//!
//! let shutdown = GracefulShutdown::new();
//! let server = GatewayServer::new(gateway, shutdown.shutdown_token())?;
//! let running = server.start().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the coalescing logic inside `core`, free of any HTTP types
//! besides status codes.
//!
//! # Error Handling
//! Request failures are [`GatewayError`]s translated at the HTTP boundary.
//! Startup APIs return `eyre::Result<T>` with `WrapErr` context attached.
//!
//! # Concurrency & Data Structures
//! Shared maps (in-flight keys, result cache) are `scc::HashMap`s owned by the
//! coordinator; callers only see `acquire` / `release`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{GatewayServer, HttpDispatcher, HttpHandler},
    core::{GatewayError, GatewayService, InboundRequest},
    ports::Dispatcher,
    utils::GracefulShutdown,
};
